//! Configuration for the crawl pipeline.
//!
//! Settings come from a TOML file, from `TRAWL_*` environment variables, or
//! both; environment variables win over the file. Every field has a default,
//! so an empty configuration runs the whole pipeline against a local Redis.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::queue::QueueConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue backend shared by all stages
    pub queue: QueueConfig,

    /// Scheduler stage configuration
    pub scheduler: SchedulerConfig,

    /// Fetcher stage configuration
    pub fetcher: FetcherConfig,

    /// Processor stage configuration
    pub processor: ProcessorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Scheduler stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// HTTP listen address for the liveness probe
    pub listen: String,
}

/// Fetcher stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// HTTP listen address for the probe and the one-shot fetch endpoint
    pub listen: String,

    /// Maximum concurrent fetches; 0 means unlimited
    pub concurrency: usize,
}

/// Processor stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// HTTP listen address for the probe and the dry-run endpoint
    pub listen: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen: String::from("0.0.0.0:20000"),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            listen: String::from("0.0.0.0:21000"),
            concurrency: 0,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            listen: String::from("0.0.0.0:22000"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(backend) = std::env::var("TRAWL_QUEUE_BACKEND")
            .ok()
            .and_then(|v| match v.to_lowercase().as_str() {
                "redis" => Some(crate::queue::QueueBackend::Redis),
                "memory" => Some(crate::queue::QueueBackend::Memory),
                _ => None,
            })
        {
            self.queue.backend = backend;
        }
        if let Ok(url) = std::env::var("TRAWL_REDIS_URL") {
            self.queue.redis_url = url;
        }
        if let Ok(namespace) = std::env::var("TRAWL_NAMESPACE") {
            self.queue.namespace = namespace;
        }
        if let Some(size) = std::env::var("TRAWL_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.queue.pool_size = size;
        }
        if let Ok(listen) = std::env::var("TRAWL_SCHEDULER_LISTEN") {
            self.scheduler.listen = listen;
        }
        if let Ok(listen) = std::env::var("TRAWL_FETCHER_LISTEN") {
            self.fetcher.listen = listen;
        }
        if let Some(concurrency) = std::env::var("TRAWL_FETCH_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.fetcher.concurrency = concurrency;
        }
        if let Ok(listen) = std::env::var("TRAWL_PROCESSOR_LISTEN") {
            self.processor.listen = listen;
        }
        if let Ok(level) = std::env::var("TRAWL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRAWL_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.queue.backend == crate::queue::QueueBackend::Redis
            && self.queue.redis_url.is_empty()
        {
            anyhow::bail!("queue.redis_url must be set for the redis backend");
        }

        if self.queue.pool_size == 0 {
            anyhow::bail!("queue.pool_size must be greater than 0");
        }

        let names = [
            ("new_task", &self.queue.names.new_task),
            ("fetch", &self.queue.names.fetch),
            ("process", &self.queue.names.process),
            ("result", &self.queue.names.result),
            ("status", &self.queue.names.status),
        ];
        for (field, name) in names {
            if name.is_empty() {
                anyhow::bail!("queue.names.{field} must not be empty");
            }
        }

        self.scheduler_addr()?;
        self.fetcher_addr()?;
        self.processor_addr()?;

        if self.logging.format != "text" && self.logging.format != "json" {
            anyhow::bail!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                self.logging.format
            );
        }

        Ok(())
    }

    /// Scheduler listen address as a socket address
    pub fn scheduler_addr(&self) -> Result<SocketAddr> {
        self.scheduler
            .listen
            .parse()
            .with_context(|| format!("Invalid scheduler.listen address: {}", self.scheduler.listen))
    }

    /// Fetcher listen address as a socket address
    pub fn fetcher_addr(&self) -> Result<SocketAddr> {
        self.fetcher
            .listen
            .parse()
            .with_context(|| format!("Invalid fetcher.listen address: {}", self.fetcher.listen))
    }

    /// Processor listen address as a socket address
    pub fn processor_addr(&self) -> Result<SocketAddr> {
        self.processor
            .listen
            .parse()
            .with_context(|| format!("Invalid processor.listen address: {}", self.processor.listen))
    }
}

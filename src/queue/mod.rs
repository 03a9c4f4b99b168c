//! Message queues connecting the pipeline stages.
//!
//! Every stage boundary is a named FIFO queue carrying JSON strings:
//! new-task, fetch, process and result, plus an optional status channel.
//! Two backends implement the same [`Queue`] trait:
//! - [`redis::RedisQueue`]: Redis lists behind a deadpool connection pool,
//!   the production backend shared between distributed stage processes
//! - [`memory::MemoryQueue`]: an in-process deque, used by tests and the
//!   single-binary `all` mode
//!
//! Delivery is at least once. Consumers must tolerate duplicates and treat
//! undecodable messages as droppable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{StatusMessage, Task};

pub mod memory;
pub mod redis;

pub use memory::MemoryQueue;
pub use redis::RedisQueue;

/// Queue backend failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {name} is full (capacity {capacity})")]
    Full { name: String, capacity: usize },

    #[error("redis command failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("redis pool unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("failed to build redis pool: {0}")]
    Connect(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A named FIFO message queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Queue name, without any backend namespace prefix.
    fn name(&self) -> &str;

    /// Append one message.
    async fn put(&self, message: String) -> Result<(), QueueError>;

    /// Remove up to `count` messages from the front.
    ///
    /// Backend errors are logged and surface as an empty batch so a stage
    /// loop keeps polling through transient outages.
    async fn pop(&self, count: usize) -> Vec<String>;

    /// Current queue depth. Backend errors are logged and read as 0.
    async fn size(&self) -> usize;

    /// Maximum queue depth, 0 when unbounded.
    fn capacity(&self) -> usize;
}

/// Serialize a value and append it to a queue.
pub async fn put_json<T: Serialize>(queue: &dyn Queue, value: &T) -> Result<(), QueueError> {
    queue.put(serde_json::to_string(value)?).await
}

/// Clip a message for abandon logs, respecting char boundaries.
pub(crate) fn preview(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Queue backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

/// Names of the stage-boundary queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    pub new_task: String,
    pub fetch: String,
    pub process: String,
    pub result: String,
    pub status: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            new_task: "newtask".to_string(),
            fetch: "scheduler2fetcher".to_string(),
            process: "fetcher2processor".to_string(),
            result: "processor2result".to_string(),
            status: "status".to_string(),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    /// Redis URL (e.g. redis://localhost:6379)
    pub redis_url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing (`<namespace>:<name>`)
    pub namespace: String,

    /// Per-queue capacity for the memory backend. 0 = unbounded.
    pub memory_capacity: usize,

    /// Publish task progress snapshots to the status channel.
    pub status_channel: bool,

    pub names: QueueNames,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            namespace: "sys".to_string(),
            memory_capacity: 0,
            status_channel: false,
            names: QueueNames::default(),
        }
    }
}

/// The stage-boundary queues of one pipeline, shared by all stages.
#[derive(Clone)]
pub struct QueueSet {
    /// Producer submissions and tasks discovered during processing.
    pub new_task: Arc<dyn Queue>,
    /// Scheduler output awaiting fetch.
    pub fetch: Arc<dyn Queue>,
    /// Fetched responses awaiting callback execution.
    pub process: Arc<dyn Queue>,
    /// Callback results awaiting the result worker.
    pub result: Arc<dyn Queue>,
    /// Optional progress channel, disabled by default.
    pub status: Option<Arc<dyn Queue>>,
}

impl QueueSet {
    /// Open the queue set described by a config.
    pub async fn open(config: &QueueConfig) -> Result<Self, QueueError> {
        match config.backend {
            QueueBackend::Memory => Ok(Self::in_memory(config)),
            QueueBackend::Redis => {
                let pool = redis::connect(&config.redis_url, config.pool_size).await?;
                let queue = |name: &str| -> Arc<dyn Queue> {
                    Arc::new(RedisQueue::new(pool.clone(), &config.namespace, name))
                };
                Ok(Self {
                    new_task: queue(&config.names.new_task),
                    fetch: queue(&config.names.fetch),
                    process: queue(&config.names.process),
                    result: queue(&config.names.result),
                    status: config
                        .status_channel
                        .then(|| queue(&config.names.status)),
                })
            }
        }
    }

    /// Build an in-process queue set.
    pub fn in_memory(config: &QueueConfig) -> Self {
        let queue = |name: &str| -> Arc<dyn Queue> {
            Arc::new(MemoryQueue::new(name, config.memory_capacity))
        };
        Self {
            new_task: queue(&config.names.new_task),
            fetch: queue(&config.names.fetch),
            process: queue(&config.names.process),
            result: queue(&config.names.result),
            status: config
                .status_channel
                .then(|| queue(&config.names.status)),
        }
    }

    /// Publish a progress snapshot when the status channel is configured.
    ///
    /// Status reports are advisory; a failed publish is logged and dropped
    /// rather than failing the stage that produced it.
    pub async fn report_status(&self, task: &Task) {
        if let Some(queue) = &self.status {
            if let Err(error) = put_json(queue.as_ref(), &StatusMessage::new(task)).await {
                tracing::warn!(
                    task_id = %task.task_id,
                    error = %error,
                    "status report dropped"
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

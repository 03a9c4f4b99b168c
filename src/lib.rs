//! trawl - Distributed Web Crawling Pipeline
//!
//! A queue-driven crawling system that decomposes a crawl into four stages
//! (scheduler, fetcher, processor and result worker) connected by named FIFO
//! queues, so each stage can run in its own process and scale independently.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`queue`] - Stage-boundary message queues (Redis or in-memory)
//! - [`model`] - Core data structures: tasks, responses, results, envelopes
//! - [`project`] - Crawl project registry, callbacks and lifecycle hooks
//! - [`scheduler`] - New-task intake and periodic (cron) task synthesis
//! - [`fetcher`] - HTTP execution with retries, redirects and cookies
//! - [`processor`] - Callback dispatch over fetched responses
//! - [`worker`] - Terminal result delivery
//! - [`curl`] - Task construction from `curl` command lines
//! - [`server`] - Per-stage HTTP endpoints
//!
//! # Example
//!
//! ```no_run
//! use trawl::config::Config;
//! use trawl::project::{CallbackOutcome, Project, ProjectRegistry};
//! use trawl::queue::QueueSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let queues = QueueSet::open(&config.queue).await?;
//!
//!     let project = Project::builder("demo")
//!         .callback("index", |_task, response| {
//!             println!("fetched {} bytes", response.content.len());
//!             Ok(CallbackOutcome::default())
//!         })
//!         .build()?;
//!
//!     let registry = ProjectRegistry::new();
//!     registry.register(project).await;
//!     // Run stages against `queues` and `registry`; see the binary.
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod curl;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod processor;
pub mod project;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod stage;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::fetcher::Fetcher;
    pub use crate::model::{CrawlResult, Response, Task, TaskStatus};
    pub use crate::processor::Processor;
    pub use crate::project::{CallbackOutcome, Project, ProjectRegistry};
    pub use crate::queue::{Queue, QueueSet};
    pub use crate::scheduler::Scheduler;
    pub use crate::worker::ResultWorker;
}

// Direct re-exports for convenience
pub use model::{CrawlResult, Response, Task, TaskStatus};

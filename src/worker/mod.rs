//! Result worker stage: the last stop for extracted results.
//!
//! The worker drains the result queue, stamps each task `Resulted` and hands
//! the result to the registered result hooks, stage-global first and then
//! the owning project's. It deliberately has no HTTP surface; delivery to
//! storage, notification fan-out or export all belong in hooks.
//!
//! When no hook is registered anywhere the result is logged instead of
//! silently vanishing, which keeps a freshly wired pipeline observable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::model::{CrawlResult, ResultMessage, Task, TaskStatus};
use crate::project::{Project, ProjectRegistry, ResultHook};
use crate::queue::{preview, QueueSet};
use crate::stage::{idle, StageState};

/// Sleep between polls when the result queue is empty.
const SLEEP_IDLE: Duration = Duration::from_secs(2);

// ============================================================================
// ResultWorker
// ============================================================================

/// Hook-dispatching consumer of the result queue.
#[derive(Clone)]
pub struct ResultWorker {
    queues: QueueSet,
    registry: Arc<ProjectRegistry>,
    hooks: Vec<Arc<dyn ResultHook>>,
    state: Arc<StageState>,
}

impl ResultWorker {
    pub fn new(queues: QueueSet, registry: Arc<ProjectRegistry>) -> Self {
        Self {
            queues,
            registry,
            hooks: Vec::new(),
            state: StageState::new("result_worker"),
        }
    }

    /// Cap concurrent result handlers. 0 = unbounded.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.state = StageState::with_limit("result_worker", limit);
        self
    }

    /// Registers a stage-global result hook, run for every result.
    pub fn with_hook(mut self, hook: impl ResultHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Runs the worker until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.state.try_begin_run() {
            tracing::warn!("result worker is running, you should not run it again");
            return;
        }
        tracing::info!("result worker started");

        while !*shutdown.borrow() {
            if self.state.is_paused() {
                idle(&mut shutdown, SLEEP_IDLE).await;
                continue;
            }

            let messages = self.queues.result.pop(1).await;
            if messages.is_empty() {
                idle(&mut shutdown, SLEEP_IDLE).await;
                continue;
            }

            for message in messages {
                let Some(envelope) = decode_result_message(&message) else {
                    continue;
                };
                let guard = self.state.dispatch().await;
                let worker = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    worker.handle_result(envelope.task, envelope.result).await;
                });
            }
        }

        self.state.pause();
        self.state.drain().await;
        self.state.end_run();
        tracing::info!("result worker stopped");
    }

    /// Stamps the task `Resulted` and runs the result hooks.
    async fn handle_result(&self, mut task: Task, result: CrawlResult) {
        task.status = TaskStatus::Resulted;
        self.queues.report_status(&task).await;

        let project = self.registry.get(&task.project).await;
        let project_hooks: &[Arc<dyn ResultHook>] = project
            .as_deref()
            .map(Project::result_hooks)
            .unwrap_or(&[]);

        if self.hooks.is_empty() && project_hooks.is_empty() {
            tracing::info!(
                task_id = %task.task_id,
                url = %task.url,
                err_code = result.err_code,
                err_message = %result.err_message,
                parsed = %String::from_utf8_lossy(&result.parsed),
                "result"
            );
        }

        for hook in &self.hooks {
            hook.on_result(&task, &result).await;
        }
        for hook in project_hooks {
            hook.on_result(&task, &result).await;
        }
    }
}

fn decode_result_message(message: &str) -> Option<ResultMessage> {
    match serde_json::from_str(message) {
        Ok(envelope) => Some(envelope),
        Err(error) => {
            tracing::warn!(
                op = "abandon",
                error = %error,
                message = preview(message, 300),
                "dropping malformed result message"
            );
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Processor stage: runs project callbacks over fetched responses.
//!
//! The processor drains the process queue one envelope at a time, resolves
//! the owning project and hands the response to the callback named by the
//! task. The callback's outcome fans out in two directions: follow-up tasks
//! are re-injected as bare JSON onto the new-task queue, an extracted result
//! is wrapped in a [`ResultMessage`] for the result worker.
//!
//! Tasks for unknown projects or callbacks, and callbacks that return an
//! error, are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;

use crate::model::{CrawlResult, ProcessMessage, Response, ResultMessage, Task, TaskStatus};
use crate::project::{ProcessHook, Project, ProjectRegistry};
use crate::queue::{preview, put_json, QueueSet};
use crate::server;
use crate::stage::{idle, StageState};

/// Sleep between polls when the process queue is empty.
const SLEEP_IDLE: Duration = Duration::from_secs(1);

// ============================================================================
// Processor
// ============================================================================

/// Callback-dispatching stage between fetcher and result worker.
#[derive(Clone)]
pub struct Processor {
    queues: QueueSet,
    registry: Arc<ProjectRegistry>,
    hooks: Vec<Arc<dyn ProcessHook>>,
    state: Arc<StageState>,
}

impl Processor {
    pub fn new(queues: QueueSet, registry: Arc<ProjectRegistry>) -> Self {
        Self {
            queues,
            registry,
            hooks: Vec::new(),
            state: StageState::new("processor"),
        }
    }

    /// Cap concurrent callback handlers. 0 = unbounded.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.state = StageState::with_limit("processor", limit);
        self
    }

    /// Registers a stage-global process hook, run for every task.
    pub fn with_hook(mut self, hook: impl ProcessHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Runs the processor until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.state.try_begin_run() {
            tracing::warn!("processor is running, you should not run it again");
            return;
        }
        tracing::info!("processor started");

        while !*shutdown.borrow() {
            if self.state.is_paused() {
                idle(&mut shutdown, SLEEP_IDLE).await;
                continue;
            }

            let messages = self.queues.process.pop(1).await;
            if messages.is_empty() {
                idle(&mut shutdown, SLEEP_IDLE).await;
                continue;
            }

            for message in messages {
                let Some(envelope) = decode_process_message(&message) else {
                    continue;
                };
                let guard = self.state.dispatch().await;
                let worker = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    worker.process_one(envelope.task, envelope.response).await;
                });
            }
        }

        self.state.pause();
        self.state.drain().await;
        self.state.end_run();
        tracing::info!("processor stopped");
    }

    /// Runs one task's callback and publishes whatever it produced.
    async fn process_one(&self, mut task: Task, response: Response) {
        let Some(project) = self.registry.get(&task.project).await else {
            tracing::warn!(
                project = %task.project,
                task_id = %task.task_id,
                "project not registered, dropping task"
            );
            return;
        };

        let outcome = match project.execute_callback(&task.process.callback, &task, &response) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    project = %task.project,
                    callback = %task.process.callback,
                    task_id = %task.task_id,
                    error = %error,
                    "callback failed, dropping task"
                );
                return;
            }
        };

        task.status = TaskStatus::Processed;
        self.queues.report_status(&task).await;

        for new_task in outcome.new_tasks {
            self.send_new_task(&project, new_task).await;
        }

        if let Some(result) = outcome.result {
            self.send_result(&project, &task, result).await;
        }
    }

    /// Re-injects a callback-discovered task through the new-task queue.
    ///
    /// New tasks go out as bare JSON with their status reset to `Init`; the
    /// scheduler treats them exactly like externally submitted tasks.
    async fn send_new_task(&self, project: &Project, mut task: Task) {
        task.status = TaskStatus::Init;
        match put_json(self.queues.new_task.as_ref(), &task).await {
            Ok(()) => {
                for hook in &self.hooks {
                    hook.on_send_new_task(&task).await;
                }
                for hook in project.process_hooks() {
                    hook.on_send_new_task(&task).await;
                }
            }
            Err(error) => {
                tracing::error!(
                    op = "send_new_task",
                    task_id = %task.task_id,
                    url = %task.url,
                    error = %error,
                    "failed to publish follow-up task"
                );
            }
        }
    }

    /// Forwards an extracted result to the result worker.
    async fn send_result(&self, project: &Project, task: &Task, result: CrawlResult) {
        let message = ResultMessage::new(task.clone(), result);
        match put_json(self.queues.result.as_ref(), &message).await {
            Ok(()) => {
                for hook in &self.hooks {
                    hook.on_send_result(&message.task, &message.result).await;
                }
                for hook in project.process_hooks() {
                    hook.on_send_result(&message.task, &message.result).await;
                }
            }
            Err(error) => {
                tracing::error!(
                    op = "send_result",
                    task_id = %task.task_id,
                    project = %task.project,
                    error = %error,
                    "failed to publish result"
                );
            }
        }
    }

    /// HTTP surface: liveness probe plus a dry-run callback endpoint.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(server::pong))
            .route("/process", post(process_once))
            .with_state(self.clone())
    }
}

/// Shape of the `/process` dry-run reply.
#[derive(Debug, Serialize)]
struct ProcessOutput {
    task: Task,
    result: Option<CrawlResult>,
    new_tasks: Vec<Task>,
}

/// Runs a callback against a posted envelope without touching the queues.
///
/// Useful while developing a project: post a captured `ProcessMessage` and
/// inspect what the callback would emit. Hooks do not run here.
async fn process_once(
    State(processor): State<Processor>,
    Json(envelope): Json<ProcessMessage>,
) -> axum::response::Response {
    let ProcessMessage { mut task, response } = envelope;
    let execution = processor
        .registry
        .execute_callback(&task.project, &task.process.callback, &task, &response)
        .await;
    match execution {
        Ok(outcome) => {
            task.status = TaskStatus::Processed;
            let output = ProcessOutput {
                task,
                result: outcome.result,
                new_tasks: outcome.new_tasks,
            };
            (StatusCode::OK, Json(output)).into_response()
        }
        Err(error) => (StatusCode::BAD_REQUEST, error.to_string()).into_response(),
    }
}

fn decode_process_message(message: &str) -> Option<ProcessMessage> {
    match serde_json::from_str(message) {
        Ok(envelope) => Some(envelope),
        Err(error) => {
            tracing::warn!(
                op = "abandon",
                error = %error,
                message = preview(message, 300),
                "dropping malformed process message"
            );
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

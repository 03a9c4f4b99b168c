//! Fetch stage: turns scheduled tasks into HTTP responses.
//!
//! The fetcher drains the fetch queue in batches of 20, spawns one handler
//! per task and publishes a task/response envelope to the process queue for
//! every task it does not abandon. Tasks with the reserved `data` scheme
//! skip the network entirely and flow through as empty 200 responses so
//! periodic callbacks reach the processor.
//!
//! Fetch hooks run around every real HTTP exchange: stage-global hooks
//! first, then the hooks of the task's project.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::watch;
use url::Url;

use crate::model::{FetchMessage, ProcessMessage, Response, Task, DATA_SCHEME};
use crate::project::{FetchHook, ProjectRegistry};
use crate::queue::{preview, put_json, QueueSet};
use crate::server;
use crate::stage::{idle, StageState};

pub mod client;

pub use client::{execute, FetchError};

const LOOP_SIZE: usize = 20;
const SLEEP_IDLE: Duration = Duration::from_secs(3);

/// The fetch stage.
#[derive(Clone)]
pub struct Fetcher {
    queues: QueueSet,
    registry: Arc<ProjectRegistry>,
    hooks: Vec<Arc<dyn FetchHook>>,
    state: Arc<StageState>,
}

impl Fetcher {
    pub fn new(queues: QueueSet, registry: Arc<ProjectRegistry>) -> Self {
        Self {
            queues,
            registry,
            hooks: Vec::new(),
            state: StageState::new("fetcher"),
        }
    }

    /// Cap concurrent fetch handlers. 0 = unbounded.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.state = StageState::with_limit("fetcher", limit);
        self
    }

    /// Attach a stage-global hook, running before any project hooks.
    pub fn with_hook(mut self, hook: impl FetchHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Drain the fetch queue until shutdown, then wait out in-flight fetches.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.state.try_begin_run() {
            tracing::warn!("fetcher is running, you should not run it again");
            return;
        }
        tracing::info!("fetcher starting");

        while !*shutdown.borrow() {
            if self.state.is_paused() {
                idle(&mut shutdown, SLEEP_IDLE).await;
                continue;
            }

            let messages = self.queues.fetch.pop(LOOP_SIZE).await;
            let count = messages.len();

            for message in messages {
                let Some(envelope) = decode_fetch_message(&message) else {
                    continue;
                };
                let guard = self.state.dispatch().await;
                let worker = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    worker.run_one(envelope.task).await;
                });
            }

            // A full batch means the queue likely has more waiting.
            if count < LOOP_SIZE {
                idle(&mut shutdown, SLEEP_IDLE).await;
            }
        }

        self.state.pause();
        self.state.drain().await;
        self.state.end_run();
        tracing::info!("fetcher stopped");
    }

    async fn run_one(&self, mut task: Task) {
        let Some(response) = self.fetch(&mut task).await else {
            return;
        };

        if !task.is_data_task() {
            self.queues.report_status(&task).await;
        }

        let envelope = ProcessMessage::new(task, response);
        if let Err(error) = put_json(self.queues.process.as_ref(), &envelope).await {
            tracing::error!(
                task_id = %envelope.task.task_id,
                project = %envelope.task.project,
                error = %error,
                "failed to publish fetched response"
            );
        }
    }

    /// Fetch one task: validate, run hooks, execute, log the outcome.
    ///
    /// Returns `None` when the task is abandoned for an unusable URL.
    /// `data` tasks come back as empty 200 responses without touching hooks,
    /// logs or the task's crawl stamp.
    pub async fn fetch(&self, task: &mut Task) -> Option<Response> {
        let url = match Url::parse(&task.url) {
            Ok(url) => url,
            Err(error) => {
                tracing::error!(
                    op = "abandon",
                    task_id = %task.task_id,
                    project = %task.project,
                    url = %task.url,
                    error = %error,
                    "invalid url"
                );
                return None;
            }
        };

        if url.scheme() == DATA_SCHEME {
            return Some(Response::no_fetch(task.url.clone()));
        }

        self.before_request(task).await;
        let response = client::execute(task).await;

        if response.err_message.is_empty() {
            tracing::info!(
                task_id = %task.task_id,
                url = %task.url,
                cost_ms = response.time_ms,
                status_code = response.status_code,
                "fetch ok"
            );
        } else {
            tracing::error!(
                task_id = %task.task_id,
                url = %task.url,
                cost_ms = response.time_ms,
                status_code = response.status_code,
                error = %response.err_message,
                proxy = %task.fetch.proxy,
                "fetch failed"
            );
        }

        self.after_request(task, &response).await;
        Some(response)
    }

    async fn before_request(&self, task: &mut Task) {
        for hook in &self.hooks {
            hook.before_request(task).await;
        }
        if let Some(project) = self.registry.get(&task.project).await {
            for hook in project.fetch_hooks() {
                hook.before_request(task).await;
            }
        }
    }

    async fn after_request(&self, task: &Task, response: &Response) {
        for hook in &self.hooks {
            hook.after_request(task, response).await;
        }
        if let Some(project) = self.registry.get(&task.project).await {
            for hook in project.fetch_hooks() {
                hook.after_request(task, response).await;
            }
        }
    }

    /// Debug surface: `GET /` liveness, `POST /fetch` for one-off fetches
    /// that bypass the queues.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(server::pong))
            .route("/fetch", post(fetch_once))
            .with_state(self.clone())
    }
}

async fn fetch_once(
    State(fetcher): State<Fetcher>,
    Json(mut task): Json<Task>,
) -> axum::response::Response {
    match fetcher.fetch(&mut task).await {
        Some(response) => (StatusCode::OK, Json(ProcessMessage::new(task, response))).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            format!("unfetchable url: {}", task.url),
        )
            .into_response(),
    }
}

fn decode_fetch_message(message: &str) -> Option<FetchMessage> {
    match serde_json::from_str::<FetchMessage>(message) {
        Ok(envelope) => Some(envelope),
        Err(error) => {
            tracing::error!(
                op = "abandon",
                error = %error,
                message = preview(message, 300),
                "undecodable fetch message"
            );
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

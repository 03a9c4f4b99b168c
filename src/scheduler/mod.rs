//! Scheduler stage: drains the new-task queue and feeds the fetch queue.
//!
//! The scheduler is the entry point of the pipeline. Producers push bare
//! [`Task`] JSON onto the new-task queue; the scheduler decodes each one,
//! runs the schedule hooks, stamps the task `Scheduled` and republishes it
//! wrapped in a [`FetchMessage`]. Alongside the queue loop it runs one cron
//! loop per registered project, synthesizing a `data://` task for every
//! periodic callback each time its interval elapses.
//!
//! Malformed queue messages are logged and dropped, never retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::sync::watch;

use crate::model::{FetchMessage, Task, TaskStatus};
use crate::project::{Project, ProjectRegistry, ScheduleHook};
use crate::queue::{preview, put_json, QueueSet};
use crate::server;
use crate::stage::{idle, StageState};

/// Maximum number of new-task messages drained per loop iteration.
const BATCH_SIZE: usize = 1000;

/// Sleep between iterations when the queue had fewer than a full batch.
const SLEEP_IDLE: Duration = Duration::from_secs(1);

/// Sleep between iterations after draining a full batch.
const SLEEP_BUSY: Duration = Duration::from_millis(100);

/// Granularity of the periodic-callback clock.
const CRON_TICK: Duration = Duration::from_millis(100);

// ============================================================================
// Scheduler
// ============================================================================

/// Queue-driven scheduler stage.
#[derive(Clone)]
pub struct Scheduler {
    queues: QueueSet,
    registry: Arc<ProjectRegistry>,
    hooks: Vec<Arc<dyn ScheduleHook>>,
    state: Arc<StageState>,
}

impl Scheduler {
    pub fn new(queues: QueueSet, registry: Arc<ProjectRegistry>) -> Self {
        Self {
            queues,
            registry,
            hooks: Vec::new(),
            state: StageState::new("scheduler"),
        }
    }

    /// Cap concurrent accept handlers. 0 = unbounded.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.state = StageState::with_limit("scheduler", limit);
        self
    }

    /// Registers a stage-global schedule hook, run for every task.
    pub fn with_hook(mut self, hook: impl ScheduleHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Runs the scheduler until `shutdown` flips to `true`.
    ///
    /// Spawns the new-task queue loop plus one cron loop per project that
    /// registered periodic callbacks, then waits for all of them to wind
    /// down and for in-flight tasks to drain.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        if !self.state.try_begin_run() {
            tracing::warn!("scheduler is running, you should not run it again");
            return;
        }
        tracing::info!("scheduler started");

        let mut loops = Vec::new();

        let worker = self.clone();
        let signal = shutdown.clone();
        loops.push(tokio::spawn(async move {
            worker.process_task_queue(signal).await;
        }));

        for project in self.registry.all().await {
            let periodic = project.periodic_callbacks();
            if periodic.is_empty() {
                continue;
            }
            let worker = self.clone();
            let signal = shutdown.clone();
            loops.push(tokio::spawn(async move {
                worker.process_project_cron(project, periodic, signal).await;
            }));
        }

        for handle in loops {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "scheduler loop terminated abnormally");
            }
        }

        self.state.pause();
        self.state.drain().await;
        self.state.end_run();
        tracing::info!("scheduler stopped");
    }

    /// Drains the new-task queue in batches and hands each task to `accept`.
    async fn process_task_queue(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if self.state.is_paused() {
                idle(&mut shutdown, SLEEP_IDLE).await;
                continue;
            }

            let messages = self.queues.new_task.pop(BATCH_SIZE).await;
            let count = messages.len();

            for message in messages {
                let task: Task = match serde_json::from_str(&message) {
                    Ok(task) => task,
                    Err(error) => {
                        tracing::warn!(
                            op = "abandon_new",
                            error = %error,
                            message = preview(&message, 300),
                            "dropping malformed new-task message"
                        );
                        continue;
                    }
                };

                let guard = self.state.dispatch().await;
                let worker = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    worker.accept(task).await;
                });
            }

            let pause = if count < BATCH_SIZE { SLEEP_IDLE } else { SLEEP_BUSY };
            idle(&mut shutdown, pause).await;
        }
    }

    /// Fires each periodic callback of `project` whenever its interval elapses.
    ///
    /// Intervals are measured from loop start, so the first fire lands one
    /// full interval after the scheduler comes up rather than immediately.
    async fn process_project_cron(
        &self,
        project: Arc<Project>,
        periodic: Vec<(String, Duration)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            project = %project.name(),
            callbacks = periodic.len(),
            "starting periodic callbacks"
        );

        let mut crons: Vec<(String, Duration, Instant)> = periodic
            .into_iter()
            .map(|(name, every)| (name, every, Instant::now()))
            .collect();

        while !*shutdown.borrow() {
            if !self.state.is_paused() {
                for (name, every, last_fired) in &mut crons {
                    if last_fired.elapsed() < *every {
                        continue;
                    }
                    tracing::debug!(project = %project.name(), callback = %name, "cron fired");
                    let mut task = Task::cron(project.name(), name);
                    self.select(&mut task).await;
                    *last_fired = Instant::now();
                }
            }
            idle(&mut shutdown, CRON_TICK).await;
        }
    }

    /// Runs the new-task hooks, then schedules the task onto the fetch queue.
    async fn accept(&self, mut task: Task) {
        for hook in &self.hooks {
            hook.on_task_new(&task).await;
        }
        self.select(&mut task).await;
    }

    /// Stamps the task `Scheduled` and publishes it for the fetcher.
    ///
    /// The select hooks and the status report only run when the publish
    /// succeeded; on failure the task is logged and dropped.
    async fn select(&self, task: &mut Task) {
        task.status = TaskStatus::Scheduled;
        match put_json(self.queues.fetch.as_ref(), &FetchMessage::new(task.clone())).await {
            Ok(()) => {
                for hook in &self.hooks {
                    hook.on_task_select(task).await;
                }
                self.queues.report_status(task).await;
            }
            Err(error) => {
                tracing::error!(
                    op = "select",
                    task_id = %task.task_id,
                    project = %task.project,
                    error = %error,
                    "failed to publish scheduled task"
                );
            }
        }
    }

    /// HTTP surface of the scheduler: a liveness probe only.
    pub fn router(&self) -> Router {
        Router::new().route("/", get(server::pong))
    }
}

// ============================================================================
// Tests
// ============================================================================

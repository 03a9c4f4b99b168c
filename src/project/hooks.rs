// Stage extension hooks.
//
// Each pipeline stage exposes one hook trait with no-op defaults, so an
// implementor overrides only the moments it cares about. Hooks run at two
// levels: stage-global hooks attached when a stage is constructed, then the
// hooks of the project owning the task. Hook failures must stay internal;
// these methods cannot return errors and should log their own problems.

use async_trait::async_trait;

use crate::model::{CrawlResult, Response, Task};

/// Observes the scheduler accepting and dispatching tasks.
#[async_trait]
pub trait ScheduleHook: Send + Sync {
    /// A task arrived on the new-task queue and was accepted.
    async fn on_task_new(&self, _task: &Task) {}

    /// A task was selected and published to the fetch queue.
    async fn on_task_select(&self, _task: &Task) {}
}

/// Wraps the fetcher around each HTTP exchange.
#[async_trait]
pub trait FetchHook: Send + Sync {
    /// Runs before the request is built; may rewrite the task in place.
    async fn before_request(&self, _task: &mut Task) {}

    /// Runs after the exchange, successful or not.
    async fn after_request(&self, _task: &Task, _response: &Response) {}
}

/// Observes the processor publishing callback output.
#[async_trait]
pub trait ProcessHook: Send + Sync {
    /// A callback-discovered task is about to join the new-task queue.
    async fn on_send_new_task(&self, _task: &Task) {}

    /// A callback result is about to join the result queue.
    async fn on_send_result(&self, _task: &Task, _result: &CrawlResult) {}
}

/// Consumes final results; ordinarily the last stop in the pipeline.
#[async_trait]
pub trait ResultHook: Send + Sync {
    async fn on_result(&self, _task: &Task, _result: &CrawlResult) {}
}

// ============================================================================
// Tests
// ============================================================================

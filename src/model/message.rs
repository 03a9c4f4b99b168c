// Queue envelopes exchanged between pipeline stages.
//
// The new-task queue carries bare `Task` JSON; the fetch, process and
// result queues wrap the task in the envelopes below.

use serde::{Deserialize, Serialize};

use super::{CrawlResult, Response, Task, TaskStatus};

/// Envelope on the fetch queue: a task the scheduler accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchMessage {
    pub task: Task,
}

/// Envelope on the process queue: a task plus the response fetched for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMessage {
    pub task: Task,
    pub response: Response,
}

/// Envelope on the result queue: a task plus what its callback extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task: Task,
    pub result: CrawlResult,
}

/// Progress report published on the optional status channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub task_id: String,
    pub status: TaskStatus,
}

impl FetchMessage {
    pub fn new(task: Task) -> Self {
        Self { task }
    }
}

impl ProcessMessage {
    pub fn new(task: Task, response: Response) -> Self {
        Self { task, response }
    }
}

impl ResultMessage {
    pub fn new(task: Task, result: CrawlResult) -> Self {
        Self { task, result }
    }
}

impl StatusMessage {
    pub fn new(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

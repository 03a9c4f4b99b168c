// Task record and its schedule/fetch/process sub-records.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default scheduling priority for new tasks.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Reserved URL scheme for synthesized tasks that require no network fetch.
///
/// The fetcher answers `data://<callback>` tasks with a synthetic 200
/// response instead of dispatching a request.
pub const DATA_SCHEME: &str = "data";

/// Task lifecycle status, strictly forward-moving.
///
/// Serialized as its integer value on the wire.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskStatus {
    /// Created by a producer, not yet scheduled.
    #[default]
    Init = 0,
    /// Accepted by the scheduler and published to the fetch queue.
    Scheduled = 1,
    /// Fetch attempted (successfully or not).
    Crawled = 2,
    /// Callback executed by the processor.
    Processed = 3,
    /// Seen by the result worker.
    Resulted = 4,
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Init),
            1 => Ok(Self::Scheduled),
            2 => Ok(Self::Crawled),
            3 => Ok(Self::Processed),
            4 => Ok(Self::Resulted),
            other => Err(format!("invalid task status: {other}")),
        }
    }
}

/// Scheduling parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSchedule {
    pub priority: i32,
    /// Earliest execution time, epoch seconds. 0 = immediately.
    pub execute_time: i64,
    /// Idempotency tag; tasks sharing an itag describe the same unit of work.
    pub i_tag: String,
    /// Force a refresh even when the idempotency tag matches.
    pub force: bool,
    pub auto_recrawl: bool,
    /// Recrawl interval in seconds when `auto_recrawl` is set.
    pub age: i64,
}

/// HTTP execution parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFetch {
    /// GET, POST or HEAD; anything else falls back to GET.
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Explicit cookies, overriding same-named pairs from a `Cookie` header.
    pub cookies: HashMap<String, String>,
    /// Ask for compressed transfer when the task carries no Accept-Encoding.
    pub use_gzip: bool,
    /// Request body, sent on POST.
    pub data: String,
    /// Proxy URL; prefixed with `http://` when bare host:port.
    pub proxy: String,
    /// Total request attempts. Absent = 3, 0 behaves as a single attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Redirect cap. Absent = 10, 0 = unlimited, negative = forbid redirects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<i32>,
    /// Connect timeout in seconds. 0 = default (30).
    pub connect_timeout: u64,
    /// Total request timeout in seconds. 0 = default (120).
    pub timeout: u64,
}

/// Processing parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskProcess {
    /// Name of the project callback that handles the fetched response.
    pub callback: String,
    /// Callback time budget in seconds. Carried on the wire, not enforced.
    pub process_timeout: u64,
}

/// One unit of crawl work, passed stage to stage through the queues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub url: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub task_id: String,
    /// Free-form classification tag.
    #[serde(default)]
    pub catg: String,
    /// Free-form secondary classification tag.
    #[serde(default)]
    pub sub_catg: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub schedule: TaskSchedule,
    #[serde(default)]
    pub fetch: TaskFetch,
    #[serde(default)]
    pub process: TaskProcess,
    /// Opaque user data riding the whole pipeline untouched.
    #[serde(default)]
    pub save: serde_json::Map<String, serde_json::Value>,
    /// Epoch seconds.
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
    /// Epoch seconds of the last fetch attempt.
    #[serde(default)]
    pub last_crawl: i64,
}

/// Producer-facing task parameters, applied over a fresh task.
///
/// This is the parameter set the curl adapter extracts; see
/// [`crate::curl::task_from_curl`].
#[derive(Debug, Clone, Default)]
pub struct TaskParams {
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub cookies: Option<HashMap<String, String>>,
    /// Request body. Presence forces the method to POST, even when empty.
    pub data: Option<String>,
    pub use_gzip: bool,
    pub callback: Option<String>,
}

impl Task {
    /// Create an `Init` task for a URL with a fresh id and timestamps.
    pub fn new(url: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            url: url.into(),
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Init,
            schedule: TaskSchedule {
                priority: DEFAULT_PRIORITY,
                ..TaskSchedule::default()
            },
            fetch: TaskFetch {
                method: "GET".to_string(),
                ..TaskFetch::default()
            },
            create_time: now,
            update_time: now,
            ..Task::default()
        }
    }

    /// Create a task from a URL and a producer parameter set.
    pub fn with_params(url: impl Into<String>, params: &TaskParams) -> Self {
        let mut task = Self::new(url);
        task.apply(params);
        task
    }

    /// Synthesize a no-fetch cron task targeting a project callback.
    pub fn cron(project: &str, callback: &str) -> Self {
        let mut task = Self::new(format!("{DATA_SCHEME}://{callback}"));
        task.project = project.to_string();
        task.process.callback = callback.to_string();
        task
    }

    /// Overlay producer parameters onto this task.
    ///
    /// `headers` and `cookies` replace the existing maps wholesale; a `data`
    /// value forces the method to POST.
    pub fn apply(&mut self, params: &TaskParams) {
        if let Some(method) = params.method.as_deref() {
            if !method.is_empty() {
                self.fetch.method = method.to_uppercase();
            }
        }
        if let Some(headers) = &params.headers {
            self.fetch.headers = headers.clone();
        }
        if let Some(cookies) = &params.cookies {
            self.fetch.cookies = cookies.clone();
        }
        if let Some(data) = params.data.as_deref() {
            if !data.is_empty() {
                self.fetch.data = data.to_string();
            }
            self.fetch.method = "POST".to_string();
        }
        if params.use_gzip {
            self.fetch.use_gzip = true;
        }
        if let Some(callback) = params.callback.as_deref() {
            if !callback.is_empty() {
                self.process.callback = callback.to_string();
            }
        }
    }

    /// Whether the task targets the reserved no-fetch scheme.
    pub fn is_data_task(&self) -> bool {
        self.url
            .split_once("://")
            .is_some_and(|(scheme, _)| scheme == DATA_SCHEME)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Crawl projects: named callback sets with per-stage hooks.
//!
//! A project bundles everything the pipeline needs to know about one crawl:
//! - callbacks, looked up by name from `task.process.callback`, which parse
//!   a fetched response into new tasks and an optional result
//! - periodic callbacks, fired by the scheduler on a timer as no-fetch tasks
//! - per-stage hooks running around fetch, process and result handling
//!
//! Stages share one [`ProjectRegistry`]; registration is first-wins.
//!
//! # Example
//!
//! ```rust,ignore
//! use trawl::model::Task;
//! use trawl::project::{CallbackOutcome, Project, ProjectRegistry};
//!
//! let project = Project::builder("news")
//!     .callback("parse_list", |_task, response| {
//!         let mut outcome = CallbackOutcome::default();
//!         for href in list_links(response) {
//!             let mut next = Task::new(href);
//!             next.project = "news".into();
//!             next.process.callback = "parse_article".into();
//!             outcome.new_tasks.push(next);
//!         }
//!         Ok(outcome)
//!     })
//!     .build()?;
//!
//! let registry = ProjectRegistry::new();
//! registry.register(project).await;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::{CrawlResult, Response, Task};

pub mod hooks;

pub use hooks::{FetchHook, ProcessHook, ResultHook, ScheduleHook};

/// Project construction and callback dispatch failures.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project name is empty")]
    EmptyName,

    #[error("project {project} has a callback with an empty name")]
    EmptyCallbackName { project: String },

    #[error("project {project} registers callback {callback} twice")]
    DuplicateCallback { project: String, callback: String },

    #[error("project {0} is not registered")]
    ProjectNotFound(String),

    #[error("project {project} has no callback named {callback}")]
    CallbackNotFound { project: String, callback: String },

    #[error("callback {callback} failed")]
    CallbackFailed {
        callback: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What a callback hands back to the processor.
#[derive(Debug, Default)]
pub struct CallbackOutcome {
    /// Follow-up tasks, re-injected through the new-task queue.
    pub new_tasks: Vec<Task>,
    /// Extracted result, forwarded to the result queue when present.
    pub result: Option<CrawlResult>,
}

impl CallbackOutcome {
    /// Outcome carrying only a result.
    pub fn with_result(result: CrawlResult) -> Self {
        Self {
            new_tasks: Vec::new(),
            result: Some(result),
        }
    }

    /// Outcome carrying only follow-up tasks.
    pub fn with_tasks(new_tasks: Vec<Task>) -> Self {
        Self {
            new_tasks,
            result: None,
        }
    }
}

type CallbackFn = Arc<dyn Fn(&Task, &Response) -> anyhow::Result<CallbackOutcome> + Send + Sync>;

/// A named response handler, optionally fired on a timer.
#[derive(Clone)]
pub struct Callback {
    name: String,
    /// When set, the scheduler synthesizes a no-fetch task for this callback
    /// every interval.
    every: Option<Duration>,
    func: CallbackFn,
}

impl Callback {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn every(&self) -> Option<Duration> {
        self.every
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("every", &self.every)
            .finish_non_exhaustive()
    }
}

/// One registered crawl, holding its callbacks and hooks.
pub struct Project {
    name: String,
    callbacks: HashMap<String, Callback>,
    fetch_hooks: Vec<Arc<dyn FetchHook>>,
    process_hooks: Vec<Arc<dyn ProcessHook>>,
    result_hooks: Vec<Arc<dyn ResultHook>>,
}

impl Project {
    pub fn builder(name: impl Into<String>) -> ProjectBuilder {
        ProjectBuilder {
            name: name.into(),
            callbacks: Vec::new(),
            fetch_hooks: Vec::new(),
            process_hooks: Vec::new(),
            result_hooks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered callback names, sorted for stable output.
    pub fn callback_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callbacks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Callbacks the scheduler should fire on a timer.
    pub fn periodic_callbacks(&self) -> Vec<(String, Duration)> {
        let mut periodic: Vec<(String, Duration)> = self
            .callbacks
            .values()
            .filter_map(|cb| cb.every.map(|every| (cb.name.clone(), every)))
            .collect();
        periodic.sort_by(|a, b| a.0.cmp(&b.0));
        periodic
    }

    /// Run a callback against a fetched response.
    pub fn execute_callback(
        &self,
        name: &str,
        task: &Task,
        response: &Response,
    ) -> Result<CallbackOutcome, ProjectError> {
        let callback = self
            .callbacks
            .get(name)
            .ok_or_else(|| ProjectError::CallbackNotFound {
                project: self.name.clone(),
                callback: name.to_string(),
            })?;
        (callback.func)(task, response).map_err(|source| ProjectError::CallbackFailed {
            callback: name.to_string(),
            source,
        })
    }

    pub fn fetch_hooks(&self) -> &[Arc<dyn FetchHook>] {
        &self.fetch_hooks
    }

    pub fn process_hooks(&self) -> &[Arc<dyn ProcessHook>] {
        &self.process_hooks
    }

    pub fn result_hooks(&self) -> &[Arc<dyn ResultHook>] {
        &self.result_hooks
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("callbacks", &self.callback_names())
            .finish_non_exhaustive()
    }
}

/// Accumulates callbacks and hooks, validated once at [`ProjectBuilder::build`].
pub struct ProjectBuilder {
    name: String,
    callbacks: Vec<Callback>,
    fetch_hooks: Vec<Arc<dyn FetchHook>>,
    process_hooks: Vec<Arc<dyn ProcessHook>>,
    result_hooks: Vec<Arc<dyn ResultHook>>,
}

impl ProjectBuilder {
    /// Add a response callback.
    pub fn callback<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Task, &Response) -> anyhow::Result<CallbackOutcome> + Send + Sync + 'static,
    {
        self.callbacks.push(Callback {
            name: name.into(),
            every: None,
            func: Arc::new(func),
        });
        self
    }

    /// Add a callback the scheduler fires every `every` as a no-fetch task.
    pub fn periodic_callback<F>(mut self, name: impl Into<String>, every: Duration, func: F) -> Self
    where
        F: Fn(&Task, &Response) -> anyhow::Result<CallbackOutcome> + Send + Sync + 'static,
    {
        self.callbacks.push(Callback {
            name: name.into(),
            every: Some(every),
            func: Arc::new(func),
        });
        self
    }

    pub fn fetch_hook(mut self, hook: impl FetchHook + 'static) -> Self {
        self.fetch_hooks.push(Arc::new(hook));
        self
    }

    pub fn process_hook(mut self, hook: impl ProcessHook + 'static) -> Self {
        self.process_hooks.push(Arc::new(hook));
        self
    }

    pub fn result_hook(mut self, hook: impl ResultHook + 'static) -> Self {
        self.result_hooks.push(Arc::new(hook));
        self
    }

    /// Validate and assemble the project.
    pub fn build(self) -> Result<Project, ProjectError> {
        if self.name.is_empty() {
            return Err(ProjectError::EmptyName);
        }

        let mut callbacks = HashMap::with_capacity(self.callbacks.len());
        for callback in self.callbacks {
            if callback.name.is_empty() {
                return Err(ProjectError::EmptyCallbackName { project: self.name });
            }
            let name = callback.name.clone();
            if callbacks.insert(name.clone(), callback).is_some() {
                return Err(ProjectError::DuplicateCallback {
                    project: self.name,
                    callback: name,
                });
            }
        }

        Ok(Project {
            name: self.name,
            callbacks,
            fetch_hooks: self.fetch_hooks,
            process_hooks: self.process_hooks,
            result_hooks: self.result_hooks,
        })
    }
}

/// Shared lookup table from project name to project.
///
/// Handed to every stage as an `Arc`; stages resolve `task.project` here.
#[derive(Default)]
pub struct ProjectRegistry {
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project. The first registration of a name wins; later
    /// ones are logged and ignored.
    pub async fn register(&self, project: Project) -> Arc<Project> {
        let mut projects = self.projects.write().await;
        match projects.get(project.name()) {
            Some(existing) => {
                tracing::warn!(project = %project.name(), "project already registered, keeping first");
                Arc::clone(existing)
            }
            None => {
                let project = Arc::new(project);
                projects.insert(project.name().to_string(), Arc::clone(&project));
                tracing::info!(
                    project = %project.name(),
                    callbacks = project.callbacks.len(),
                    "project registered"
                );
                project
            }
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Project>> {
        self.projects.read().await.get(name).cloned()
    }

    /// Registered project names, sorted for stable output.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn all(&self) -> Vec<Arc<Project>> {
        self.projects.read().await.values().cloned().collect()
    }

    /// Resolve a project and run one of its callbacks.
    pub async fn execute_callback(
        &self,
        project: &str,
        callback: &str,
        task: &Task,
        response: &Response,
    ) -> Result<CallbackOutcome, ProjectError> {
        let project = self
            .get(project)
            .await
            .ok_or_else(|| ProjectError::ProjectNotFound(project.to_string()))?;
        project.execute_callback(callback, task, response)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Common test utilities
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use trawl::model::{CrawlResult, Task};
use trawl::project::{CallbackOutcome, Project, ProjectRegistry};
use trawl::queue::{QueueConfig, QueueSet};

/// In-process queue set with the default names.
pub fn memory_queues() -> QueueSet {
    QueueSet::in_memory(&QueueConfig::default())
}

/// Registry holding a two-callback news-style project: `parse_list` fans out
/// one article task, `parse_article` extracts a result.
pub async fn news_registry() -> Arc<ProjectRegistry> {
    let project = Project::builder("news")
        .callback("parse_list", |task, _response| {
            let mut next = Task::new("http://example.test/article/1");
            next.project = task.project.clone();
            next.process.callback = "parse_article".to_string();
            Ok(CallbackOutcome::with_tasks(vec![next]))
        })
        .callback("parse_article", |_task, response| {
            Ok(CallbackOutcome::with_result(CrawlResult::from_response(
                response,
            )))
        })
        .build()
        .expect("valid project");

    let registry = Arc::new(ProjectRegistry::new());
    registry.register(project).await;
    registry
}

/// Task addressed at a project callback.
pub fn task_for(url: &str, project: &str, callback: &str) -> Task {
    let mut task = Task::new(url);
    task.project = project.to_string();
    task.process.callback = callback.to_string();
    task
}

/// Poll `probe` every 20ms until it holds or the budget runs out.
pub async fn wait_until<F, Fut>(budget: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + budget;
    loop {
        if probe().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

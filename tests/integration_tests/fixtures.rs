//! Test fixtures for integration tests
//!
//! Provides sample HTML, a ready-made crawl project and pipeline plumbing
//! shared by the integration test modules.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use trawl::fetcher::Fetcher;
use trawl::model::{CrawlResult, Task};
use trawl::processor::Processor;
use trawl::project::{CallbackOutcome, Project, ProjectRegistry, ResultHook};
use trawl::queue::{QueueConfig, QueueSet};
use trawl::scheduler::Scheduler;
use trawl::worker::ResultWorker;

/// Sample front page with two article links.
pub const LIST_PAGE_HTML: &str = r#"
<!DOCTYPE html>
<html lang="ko">
<head>
    <meta charset="UTF-8">
    <title>뉴스 목록</title>
</head>
<body>
    <ul class="headlines">
        <li><a class="headline" href="/article/1">첫 번째 기사</a></li>
        <li><a class="headline" href="/article/2">두 번째 기사</a></li>
    </ul>
    <a class="footer" href="/about">회사 소개</a>
</body>
</html>
"#;

/// Sample article content for testing
pub const ARTICLE_HTML: &str = r#"
<!DOCTYPE html>
<html lang="ko">
<head>
    <meta charset="UTF-8">
    <title>차세대 크롤러 공개</title>
</head>
<body>
    <article>
        <h1>차세대 크롤러 공개</h1>
        <p>새로운 분산 크롤링 시스템이 공개되었습니다.</p>
    </article>
</body>
</html>
"#;

/// Sample article HTML with a different title
pub const ARTICLE_HTML_ALT: &str = r#"
<!DOCTYPE html>
<html lang="ko">
<head>
    <meta charset="UTF-8">
    <title>반도체 산단 가속</title>
</head>
<body>
    <article>
        <h1>반도체 산단 가속</h1>
        <p>용인 반도체 국가산단 조성이 가속화되고 있습니다.</p>
    </article>
</body>
</html>
"#;

/// Sample error HTML (404 page)
pub const ERROR_404_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head><title>404 Not Found</title></head>
<body>
    <h1>페이지를 찾을 수 없습니다</h1>
</body>
</html>
"#;

/// Result hook forwarding every delivered result out of the pipeline.
pub struct Deliver(pub mpsc::UnboundedSender<(Task, CrawlResult)>);

#[async_trait]
impl ResultHook for Deliver {
    async fn on_result(&self, task: &Task, result: &CrawlResult) {
        let _ = self.0.send((task.clone(), result.clone()));
    }
}

/// Two-callback news project: `parse_list` follows every `a.headline` link,
/// `parse_article` extracts the page title into `parsed`.
///
/// Delivered results are forwarded to the returned receiver.
pub fn news_project() -> (Project, mpsc::UnboundedReceiver<(Task, CrawlResult)>) {
    let (delivered, results) = mpsc::unbounded_channel();

    let project = Project::builder("news")
        .callback("parse_list", |task, response| {
            let base = url::Url::parse(&response.url)?;
            let selector = scraper::Selector::parse("a.headline")
                .map_err(|e| anyhow::anyhow!("headline selector: {e}"))?;

            let mut outcome = CallbackOutcome::default();
            for link in response.document().select(&selector) {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                let mut next = Task::new(base.join(href)?.to_string());
                next.project = task.project.clone();
                next.process.callback = "parse_article".to_string();
                outcome.new_tasks.push(next);
            }
            Ok(outcome)
        })
        .callback("parse_article", |_task, response| {
            let selector = scraper::Selector::parse("title")
                .map_err(|e| anyhow::anyhow!("title selector: {e}"))?;
            let title = response
                .document()
                .select(&selector)
                .next()
                .map(|node| node.text().collect::<String>())
                .unwrap_or_default();

            let mut result = CrawlResult::from_response(response);
            result.parsed = title.into_bytes();
            Ok(CallbackOutcome::with_result(result))
        })
        .result_hook(Deliver(delivered))
        .build()
        .expect("valid project");

    (project, results)
}

/// Task aimed at the news project's list callback.
pub fn list_task(base_url: &str) -> Task {
    let mut task = Task::new(format!("{base_url}/list"));
    task.project = "news".to_string();
    task.process.callback = "parse_list".to_string();
    task
}

/// Task aimed at the news project's article callback.
pub fn article_task(base_url: &str, id: u32) -> Task {
    let mut task = Task::new(format!("{base_url}/article/{id}"));
    task.project = "news".to_string();
    task.process.callback = "parse_article".to_string();
    task
}

/// In-process queue set with the default names.
pub fn memory_queues() -> QueueSet {
    QueueSet::in_memory(&QueueConfig::default())
}

/// Start all four stages against shared queues.
///
/// Returns the shutdown sender and the stage join handles; tests flip the
/// sender and await the handles to wind the pipeline down.
pub async fn start_pipeline(
    queues: &QueueSet,
    registry: &Arc<ProjectRegistry>,
) -> (watch::Sender<bool>, Vec<JoinHandle<()>>) {
    let scheduler = Scheduler::new(queues.clone(), Arc::clone(registry));
    let fetcher = Fetcher::new(queues.clone(), Arc::clone(registry));
    let processor = Processor::new(queues.clone(), Arc::clone(registry));
    let worker = ResultWorker::new(queues.clone(), Arc::clone(registry));

    let (signal, shutdown) = watch::channel(false);
    let stages = vec![
        tokio::spawn({
            let rx = shutdown.clone();
            async move { scheduler.run(rx).await }
        }),
        tokio::spawn({
            let rx = shutdown.clone();
            async move { fetcher.run(rx).await }
        }),
        tokio::spawn({
            let rx = shutdown.clone();
            async move { processor.run(rx).await }
        }),
        tokio::spawn(async move { worker.run(shutdown).await }),
    ];
    (signal, stages)
}

/// Flip shutdown and wait for every stage to drain.
pub async fn stop_pipeline(signal: watch::Sender<bool>, stages: Vec<JoinHandle<()>>) {
    signal.send(true).expect("stages listening");
    for stage in stages {
        tokio::time::timeout(std::time::Duration::from_secs(10), stage)
            .await
            .expect("stage should stop on shutdown")
            .expect("stage task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_fixtures_not_empty() {
        assert!(!LIST_PAGE_HTML.is_empty());
        assert!(!ARTICLE_HTML.is_empty());
        assert!(!ARTICLE_HTML_ALT.is_empty());
        assert!(!ERROR_404_HTML.is_empty());
    }

    #[test]
    fn test_news_project_has_both_callbacks() {
        let (project, _results) = news_project();
        assert!(project.has_callback("parse_list"));
        assert!(project.has_callback("parse_article"));
    }
}

//! End-to-end pipeline demo on in-process queues.
//!
//! Registers a one-callback project, runs all four stages in this process
//! and submits a single page fetch. A result hook hands the final
//! [`CrawlResult`] back to `main` once the task has traveled
//! scheduler -> fetcher -> processor -> result worker.
//!
//! Run with: cargo run --example quickstart [url]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use trawl::fetcher::Fetcher;
use trawl::model::{CrawlResult, Task};
use trawl::processor::Processor;
use trawl::project::{CallbackOutcome, Project, ProjectRegistry, ResultHook};
use trawl::queue::{put_json, QueueConfig, QueueSet};
use trawl::scheduler::Scheduler;
use trawl::worker::ResultWorker;

/// Forwards each delivered result out of the pipeline.
struct Deliver(mpsc::Sender<CrawlResult>);

#[async_trait]
impl ResultHook for Deliver {
    async fn on_result(&self, _task: &Task, result: &CrawlResult) {
        let _ = self.0.send(result.clone()).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/".to_string());

    let queues = QueueSet::in_memory(&QueueConfig::default());
    let (delivered, mut results) = mpsc::channel(1);

    let project = Project::builder("quickstart")
        .callback("front_page", |_task, response| {
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
        .build()?;

    let registry = Arc::new(ProjectRegistry::new());
    registry.register(project).await;

    let scheduler = Scheduler::new(queues.clone(), Arc::clone(&registry));
    let fetcher = Fetcher::new(queues.clone(), Arc::clone(&registry));
    let processor = Processor::new(queues.clone(), Arc::clone(&registry));
    let worker = ResultWorker::new(queues.clone(), registry);

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

    let mut task = Task::new(&url);
    task.project = "quickstart".to_string();
    task.process.callback = "front_page".to_string();

    println!("Submitting {url}");
    put_json(queues.new_task.as_ref(), &task).await?;

    match tokio::time::timeout(Duration::from_secs(60), results.recv()).await {
        Ok(Some(result)) if result.err_code == 0 => {
            println!("Fetched {} ({} chars of html)", result.url, result.html.len());
            println!("Title: {}", String::from_utf8_lossy(&result.parsed));
        }
        Ok(Some(result)) => {
            println!(
                "Fetch failed with code {}: {}",
                result.err_code, result.err_message
            );
        }
        _ => println!("No result within 60 seconds"),
    }

    signal.send(true)?;
    for stage in stages {
        stage.await?;
    }
    Ok(())
}

//! Multi-instance pipeline tests
//!
//! Several copies of each stage compete on the same queues, the way a real
//! deployment runs separate scheduler, fetcher and processor processes
//! against shared Redis lists:
//! 1. Competing consumers split the queue without losing tasks
//! 2. Every submitted task is delivered exactly once
//! 3. Concurrent fetch dispatch keeps slow sites from serializing the batch

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trawl::fetcher::Fetcher;
use trawl::model::TaskStatus;
use trawl::processor::Processor;
use trawl::project::ProjectRegistry;
use trawl::queue::{put_json, QueueSet};
use trawl::scheduler::Scheduler;
use trawl::worker::ResultWorker;

use super::fixtures::{article_task, memory_queues, news_project, stop_pipeline, ARTICLE_HTML};

const RESULT_BUDGET: Duration = Duration::from_secs(30);

/// Start a crew with the given instance counts plus one result worker.
async fn start_crew(
    queues: &QueueSet,
    registry: &Arc<ProjectRegistry>,
    schedulers: usize,
    fetchers: usize,
    processors: usize,
) -> (watch::Sender<bool>, Vec<JoinHandle<()>>) {
    let (signal, shutdown) = watch::channel(false);
    let mut stages = Vec::new();

    for _ in 0..schedulers {
        let stage = Scheduler::new(queues.clone(), Arc::clone(registry));
        let rx = shutdown.clone();
        stages.push(tokio::spawn(async move { stage.run(rx).await }));
    }
    for _ in 0..fetchers {
        let stage = Fetcher::new(queues.clone(), Arc::clone(registry));
        let rx = shutdown.clone();
        stages.push(tokio::spawn(async move { stage.run(rx).await }));
    }
    for _ in 0..processors {
        let stage = Processor::new(queues.clone(), Arc::clone(registry));
        let rx = shutdown.clone();
        stages.push(tokio::spawn(async move { stage.run(rx).await }));
    }

    let worker = ResultWorker::new(queues.clone(), Arc::clone(registry));
    stages.push(tokio::spawn(async move { worker.run(shutdown).await }));

    (signal, stages)
}

async fn mount_articles(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/article/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(server)
        .await;
}

// ============================================================================
// Competing Consumer Tests
// ============================================================================

#[tokio::test]
async fn test_competing_fetchers_deliver_every_task_once() {
    // Arrange: two fetchers and two processors share the queues
    let mock_server = MockServer::start().await;
    mount_articles(&mock_server).await;

    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    let (signal, stages) = start_crew(&queues, &registry, 1, 2, 2).await;

    // Act: submit ten distinct article tasks
    let mut submitted = HashSet::new();
    for id in 1..=10u32 {
        let task = article_task(&mock_server.uri(), id);
        submitted.insert(task.task_id.clone());
        put_json(queues.new_task.as_ref(), &task).await.unwrap();
    }

    let mut delivered = HashSet::new();
    for _ in 0..10 {
        let (done, result) = timeout(RESULT_BUDGET, results.recv())
            .await
            .expect("every task should be delivered within budget")
            .expect("result channel open");
        assert_eq!(done.status, TaskStatus::Resulted);
        assert_eq!(result.err_code, 0);
        assert!(
            delivered.insert(done.task_id.clone()),
            "task {} delivered twice",
            done.task_id
        );
    }

    // Assert: exactly the submitted set, nothing extra
    assert_eq!(delivered, submitted);
    assert!(results.try_recv().is_err(), "no duplicate deliveries");

    stop_pipeline(signal, stages).await;

    assert_eq!(queues.new_task.size().await, 0);
    assert_eq!(queues.fetch.size().await, 0);
    assert_eq!(queues.process.size().await, 0);
    assert_eq!(queues.result.size().await, 0);
}

#[tokio::test]
async fn test_second_scheduler_instance_shares_the_load() {
    // Arrange: two scheduler instances poll the same new-task queue
    let mock_server = MockServer::start().await;
    mount_articles(&mock_server).await;

    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    let (signal, stages) = start_crew(&queues, &registry, 2, 1, 1).await;

    // Act
    let mut submitted = HashSet::new();
    for id in 1..=6u32 {
        let task = article_task(&mock_server.uri(), id);
        submitted.insert(task.task_id.clone());
        put_json(queues.new_task.as_ref(), &task).await.unwrap();
    }

    let mut delivered = HashSet::new();
    for _ in 0..6 {
        let (done, _result) = timeout(RESULT_BUDGET, results.recv())
            .await
            .expect("every task should be delivered within budget")
            .expect("result channel open");
        assert!(
            delivered.insert(done.task_id.clone()),
            "task {} scheduled twice",
            done.task_id
        );
    }

    // Assert: popping is atomic, so double scheduling never happens
    assert_eq!(delivered, submitted);
    assert!(results.try_recv().is_err());

    stop_pipeline(signal, stages).await;
}

// ============================================================================
// Concurrent Dispatch Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_fetch_dispatch_on_slow_site() {
    // Arrange: every article answers after 200ms
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/article/\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ARTICLE_HTML)
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&mock_server)
        .await;

    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    // One fetcher, but four requests may be in flight at once
    let scheduler = Scheduler::new(queues.clone(), Arc::clone(&registry));
    let fetcher = Fetcher::new(queues.clone(), Arc::clone(&registry)).with_concurrency(4);
    let processor = Processor::new(queues.clone(), Arc::clone(&registry));
    let worker = ResultWorker::new(queues.clone(), Arc::clone(&registry));

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

    // Act: eight slow articles
    for id in 1..=8u32 {
        put_json(queues.new_task.as_ref(), &article_task(&mock_server.uri(), id))
            .await
            .unwrap();
    }

    let start = std::time::Instant::now();
    for _ in 0..8 {
        let (_done, result) = timeout(RESULT_BUDGET, results.recv())
            .await
            .expect("every task should be delivered within budget")
            .expect("result channel open");
        assert_eq!(result.err_code, 0);
    }
    let elapsed = start.elapsed();

    // Assert: all delivered; with four slots the batch overlaps instead of
    // running one 200ms request at a time
    println!("Delivered 8 slow articles in {elapsed:?}");
    assert!(
        elapsed < RESULT_BUDGET,
        "batch should finish well inside the budget, took {elapsed:?}"
    );

    stop_pipeline(signal, stages).await;
}

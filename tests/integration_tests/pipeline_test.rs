//! End-to-end pipeline integration tests
//!
//! Drives the complete workflow over in-process queues:
//! 1. Task submission onto the new-task queue
//! 2. Scheduling
//! 3. HTTP fetch (mocked)
//! 4. Callback execution and fan-out
//! 5. Result delivery through the result hook

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trawl::model::{CrawlResult, StatusMessage, TaskStatus};
use trawl::project::{CallbackOutcome, Project, ProjectRegistry};
use trawl::queue::{put_json, QueueConfig, QueueSet};

use super::fixtures::{
    article_task, list_task, memory_queues, news_project, start_pipeline, stop_pipeline,
    Deliver, ARTICLE_HTML, ARTICLE_HTML_ALT, ERROR_404_HTML, LIST_PAGE_HTML,
};

/// Generous budget per delivered result; the stage idle sleeps add up to a
/// few seconds per pipeline hop.
const RESULT_BUDGET: Duration = Duration::from_secs(30);

async fn mount_news_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAGE_HTML))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML_ALT))
        .mount(server)
        .await;
}

// ============================================================================
// Complete Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_single_article_success() {
    // Arrange: mock site, in-process queues, news project
    let mock_server = MockServer::start().await;
    mount_news_site(&mock_server).await;

    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    let (signal, stages) = start_pipeline(&queues, &registry).await;

    // Act: submit one article task straight to the new-task queue
    let task = article_task(&mock_server.uri(), 1);
    let submitted_id = task.task_id.clone();
    put_json(queues.new_task.as_ref(), &task).await.unwrap();

    let (done, result) = timeout(RESULT_BUDGET, results.recv())
        .await
        .expect("pipeline should deliver within budget")
        .expect("result channel open");

    // Assert: the task made the full circuit
    assert_eq!(done.task_id, submitted_id);
    assert_eq!(done.status, TaskStatus::Resulted);
    assert_eq!(result.err_code, 0, "err: {}", result.err_message);
    assert_eq!(result.url, format!("{}/article/1", mock_server.uri()));
    assert!(result.html.contains("분산 크롤링 시스템"));
    assert_eq!(
        String::from_utf8(result.parsed.clone()).unwrap(),
        "차세대 크롤러 공개"
    );

    stop_pipeline(signal, stages).await;
}

#[tokio::test]
async fn test_pipeline_list_fans_out_to_articles() {
    // Arrange
    let mock_server = MockServer::start().await;
    mount_news_site(&mock_server).await;

    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    let (signal, stages) = start_pipeline(&queues, &registry).await;

    // Act: the list page links two articles; both should come back
    put_json(queues.new_task.as_ref(), &list_task(&mock_server.uri()))
        .await
        .unwrap();

    let mut titles = Vec::new();
    for _ in 0..2 {
        let (done, result) = timeout(RESULT_BUDGET, results.recv())
            .await
            .expect("pipeline should deliver within budget")
            .expect("result channel open");
        assert_eq!(done.status, TaskStatus::Resulted);
        assert_eq!(done.project, "news");
        assert_eq!(done.process.callback, "parse_article");
        assert_eq!(result.err_code, 0);
        titles.push(String::from_utf8(result.parsed).unwrap());
    }

    // Assert: one result per linked article, order not guaranteed
    titles.sort();
    let mut expected = vec!["차세대 크롤러 공개", "반도체 산단 가속"];
    expected.sort();
    assert_eq!(titles, expected);

    // The list page itself produced tasks, not a result
    assert!(results.try_recv().is_err(), "no third result expected");

    stop_pipeline(signal, stages).await;

    // All queues drained once everything was delivered
    assert_eq!(queues.new_task.size().await, 0);
    assert_eq!(queues.fetch.size().await, 0);
    assert_eq!(queues.process.size().await, 0);
    assert_eq!(queues.result.size().await, 0);
}

#[tokio::test]
async fn test_pipeline_reports_http_errors_as_results() {
    // Arrange: the article endpoint answers 404
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article/9"))
        .respond_with(ResponseTemplate::new(404).set_body_string(ERROR_404_HTML))
        .mount(&mock_server)
        .await;

    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    let (signal, stages) = start_pipeline(&queues, &registry).await;

    // Act
    put_json(queues.new_task.as_ref(), &article_task(&mock_server.uri(), 9))
        .await
        .unwrap();

    let (done, result) = timeout(RESULT_BUDGET, results.recv())
        .await
        .expect("pipeline should deliver within budget")
        .expect("result channel open");

    // Assert: the failure is a first-class result, not a dropped task
    assert_eq!(done.status, TaskStatus::Resulted);
    assert_eq!(result.err_code, 404);
    assert!(result.html.contains("페이지를 찾을 수 없습니다"));

    stop_pipeline(signal, stages).await;
}

// ============================================================================
// Periodic Callback Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_periodic_callback_flows_end_to_end() {
    // Arrange: a project whose only callback fires on a timer. No mock
    // server; cron tasks carry the data:// scheme and are never fetched.
    let queues = memory_queues();
    let registry = Arc::new(ProjectRegistry::new());

    let (delivered, mut results) = tokio::sync::mpsc::unbounded_channel();
    let project = Project::builder("ticker")
        .periodic_callback(
            "heartbeat",
            Duration::from_millis(300),
            |_task, response| {
                Ok(CallbackOutcome::with_result(CrawlResult::from_response(
                    response,
                )))
            },
        )
        .result_hook(Deliver(delivered))
        .build()
        .unwrap();
    registry.register(project).await;

    // Act: cron loops are picked up when the scheduler starts
    let (signal, stages) = start_pipeline(&queues, &registry).await;

    let (done, result) = timeout(RESULT_BUDGET, results.recv())
        .await
        .expect("cron result should be delivered within budget")
        .expect("result channel open");

    // Assert: the synthesized task traversed every stage without a fetch
    assert_eq!(done.project, "ticker");
    assert_eq!(done.process.callback, "heartbeat");
    assert_eq!(done.url, "data://heartbeat");
    assert_eq!(done.status, TaskStatus::Resulted);
    assert_eq!(result.err_code, 0);
    assert_eq!(result.url, "data://heartbeat");
    assert!(result.html.is_empty());

    stop_pipeline(signal, stages).await;
}

// ============================================================================
// Status Channel Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_status_channel_tracks_lifecycle() {
    // Arrange: status channel enabled, single article flow
    let mock_server = MockServer::start().await;
    mount_news_site(&mock_server).await;

    let config = QueueConfig {
        status_channel: true,
        ..QueueConfig::default()
    };
    let queues = QueueSet::in_memory(&config);
    let registry = Arc::new(ProjectRegistry::new());
    let (project, mut results) = news_project();
    registry.register(project).await;

    let (signal, stages) = start_pipeline(&queues, &registry).await;

    // Act
    let task = article_task(&mock_server.uri(), 1);
    let submitted_id = task.task_id.clone();
    put_json(queues.new_task.as_ref(), &task).await.unwrap();

    timeout(RESULT_BUDGET, results.recv())
        .await
        .expect("pipeline should deliver within budget")
        .expect("result channel open");

    stop_pipeline(signal, stages).await;

    // Assert: each stage reported exactly one forward step
    let status_queue = queues.status.as_ref().expect("status channel configured");
    let raw = status_queue.pop(16).await;
    let snapshots: Vec<StatusMessage> = raw
        .iter()
        .map(|message| serde_json::from_str(message).expect("status envelope"))
        .collect();

    assert_eq!(snapshots.len(), 4, "one snapshot per stage");
    for snapshot in &snapshots {
        assert_eq!(snapshot.task_id, submitted_id);
    }
    let order: Vec<TaskStatus> = snapshots.iter().map(|s| s.status).collect();
    assert_eq!(
        order,
        vec![
            TaskStatus::Scheduled,
            TaskStatus::Crawled,
            TaskStatus::Processed,
            TaskStatus::Resulted,
        ]
    );
}

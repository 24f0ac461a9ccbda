//! End-to-end pipeline tests: dispatch, worker execution, completion
//! tracking, and synthesis against in-memory collaborators.

mod common;

use async_trait::async_trait;
use atlas::config::{AtlasConfig, SynthesisConfig};
use atlas::store::paths::DatePartition;
use atlas::types::{
    AppError, Completion, DispatchRequest, ProjectConfig, Result, SynthesisRequest,
};
use atlas::{
    ChannelScheduler, CompletionTracker, Dispatcher, InMemoryQueue, MemoryStore, ObjectStore,
    QueueReceiver, ResearchWorker, RetryScheduler, SynthesisCoordinator, SynthesisOutcome,
};
use common::{MockLLMClient, MockSearchProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Scheduler that records schedule calls instead of re-delivering them.
#[derive(Default)]
struct RecordingScheduler {
    scheduled: Mutex<Vec<SynthesisRequest>>,
}

#[async_trait]
impl RetryScheduler for RecordingScheduler {
    async fn schedule(&self, request: SynthesisRequest, _delay: Duration) -> Result<()> {
        self.scheduled.lock().push(request);
        Ok(())
    }
}

fn test_config() -> AtlasConfig {
    AtlasConfig {
        version: "it".to_string(),
        projects: vec![
            ProjectConfig {
                name: "alpha".to_string(),
                description: Some("First project".to_string()),
                ..Default::default()
            },
            ProjectConfig {
                name: "beta".to_string(),
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

fn worker(store: Arc<MemoryStore>, llm: MockLLMClient) -> ResearchWorker {
    ResearchWorker::new(store, Arc::new(MockSearchProvider::new()), Arc::new(llm))
}

/// Drain up to `limit` items from the queue through the worker, ignoring
/// per-item errors the way the server loop does.
async fn drain(worker: &ResearchWorker, receiver: &QueueReceiver, limit: usize) -> usize {
    let mut processed = 0;
    while processed < limit {
        let Some(item) = receiver.try_recv().await.unwrap() else {
            break;
        };
        let _ = worker.process(&item).await;
        processed += 1;
    }
    processed
}

#[tokio::test]
async fn test_full_pipeline_happy_path() {
    let store = Arc::new(MemoryStore::new());
    let (queue, receiver) = InMemoryQueue::channel();
    let config = test_config();

    // Fan out: 2 projects x 2 sub-topics.
    let decomposition_llm = MockLLMClient::decomposition();
    let dispatcher = Dispatcher::new(store.as_ref(), &queue, &decomposition_llm);
    let summary = dispatcher
        .dispatch(&config, &DispatchRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.sub_topics_queued, 4);

    // Workers drain the queue.
    let worker = worker(store.clone(), MockLLMClient::findings());
    assert_eq!(drain(&worker, &receiver, 10).await, 4);

    // The run is complete.
    let tracker = CompletionTracker::new(store.as_ref());
    let status = tracker
        .check(DatePartition::today(), &summary.run_id, 0.8)
        .await
        .unwrap();
    assert_eq!(status.status, Completion::Complete);
    assert_eq!(status.success_count, 4);
    assert!(status.missing.is_empty());

    // Fan in: synthesis finds the run and stores a report.
    let scheduler = Arc::new(RecordingScheduler::default());
    let coordinator = SynthesisCoordinator::new(
        store.clone(),
        Arc::new(MockLLMClient::report()),
        scheduler.clone(),
    );
    let outcome = coordinator
        .synthesize(&SynthesisConfig::default(), SynthesisRequest::default())
        .await
        .unwrap();

    let SynthesisOutcome::Completed(done) = outcome else {
        panic!("expected a completed synthesis");
    };
    assert_eq!(done.run_id, summary.run_id);
    assert_eq!(done.completion_status.status, Completion::Complete);
    assert_eq!(done.confidence_score, 0.8);
    assert!(store.get(&done.report_location).await.unwrap().is_some());
    assert!(scheduler.scheduled.lock().is_empty());
}

#[tokio::test]
async fn test_incomplete_run_retries_then_completes() {
    let store = Arc::new(MemoryStore::new());
    let (queue, receiver) = InMemoryQueue::channel();
    let config = test_config();

    let decomposition_llm = MockLLMClient::decomposition();
    let dispatcher = Dispatcher::new(store.as_ref(), &queue, &decomposition_llm);
    let summary = dispatcher
        .dispatch(&config, &DispatchRequest::default())
        .await
        .unwrap();

    // Only one of four outcomes lands before the first synthesis attempt.
    let worker = worker(store.clone(), MockLLMClient::findings());
    assert_eq!(drain(&worker, &receiver, 1).await, 1);

    let scheduler = Arc::new(RecordingScheduler::default());
    let coordinator = SynthesisCoordinator::new(
        store.clone(),
        Arc::new(MockLLMClient::report()),
        scheduler.clone(),
    );
    let synthesis_config = SynthesisConfig::default();

    let outcome = coordinator
        .synthesize(&synthesis_config, SynthesisRequest::default())
        .await
        .unwrap();
    let SynthesisOutcome::InProgress(progress) = outcome else {
        panic!("expected a scheduled retry");
    };
    assert_eq!(progress.retry_count, 1);

    let retried = scheduler.scheduled.lock().pop().unwrap();
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.run_id.as_deref(), Some(summary.run_id.as_str()));

    // The remaining work finishes before the retry fires.
    assert_eq!(drain(&worker, &receiver, 10).await, 3);

    let outcome = coordinator
        .synthesize(&synthesis_config, retried)
        .await
        .unwrap();
    let SynthesisOutcome::Completed(done) = outcome else {
        panic!("expected the retry to complete");
    };
    assert_eq!(done.completion_status.success_count, 4);
}

#[tokio::test]
async fn test_failed_items_count_toward_completion() {
    let store = Arc::new(MemoryStore::new());
    let (queue, receiver) = InMemoryQueue::channel();
    let config = test_config();

    let decomposition_llm = MockLLMClient::decomposition();
    let dispatcher = Dispatcher::new(store.as_ref(), &queue, &decomposition_llm);
    let summary = dispatcher
        .dispatch(&config, &DispatchRequest::default())
        .await
        .unwrap();

    // Every research call fails, so every item writes a failure record.
    let worker = worker(store.clone(), MockLLMClient::failing());
    assert_eq!(drain(&worker, &receiver, 10).await, 4);

    let tracker = CompletionTracker::new(store.as_ref());
    let status = tracker
        .check(DatePartition::today(), &summary.run_id, 0.8)
        .await
        .unwrap();
    assert_eq!(status.status, Completion::Complete);
    assert_eq!(status.success_count, 0);
    assert_eq!(status.failed_count, 4);

    // Synthesis still runs over a run made of failures.
    let scheduler = Arc::new(RecordingScheduler::default());
    let coordinator = SynthesisCoordinator::new(
        store.clone(),
        Arc::new(MockLLMClient::report()),
        scheduler,
    );
    let outcome = coordinator
        .synthesize(&SynthesisConfig::default(), SynthesisRequest::default())
        .await
        .unwrap();
    let SynthesisOutcome::Completed(done) = outcome else {
        panic!("expected completed synthesis");
    };
    assert_eq!(done.completion_status.failed_count, 4);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_forces_partial_report() {
    let store = Arc::new(MemoryStore::new());
    let manifest = common::seed_manifest(store.as_ref(), "run-partial", &[
        "first seeded topic",
        "second seeded topic",
        "third seeded topic",
    ])
    .await;
    common::seed_success(store.as_ref(), &manifest.expected_files[0]).await;

    let scheduler = Arc::new(RecordingScheduler::default());
    let coordinator = SynthesisCoordinator::new(
        store.clone(),
        Arc::new(MockLLMClient::report()),
        scheduler.clone(),
    );

    let synthesis_config = SynthesisConfig::default();
    let request = SynthesisRequest {
        run_id: Some("run-partial".to_string()),
        retry_count: synthesis_config.max_retries,
        ..Default::default()
    };
    let outcome = coordinator
        .synthesize(&synthesis_config, request)
        .await
        .unwrap();

    let SynthesisOutcome::Completed(done) = outcome else {
        panic!("expected a partial report");
    };
    assert_eq!(done.completion_status.status, Completion::Incomplete);
    assert_eq!(done.completion_status.success_count, 1);
    assert_eq!(done.completion_status.missing.len(), 2);
    assert!(scheduler.scheduled.lock().is_empty());
}

#[tokio::test]
async fn test_synthesis_of_unknown_run_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(RecordingScheduler::default());
    let coordinator = SynthesisCoordinator::new(
        store,
        Arc::new(MockLLMClient::report()),
        scheduler,
    );

    let err = coordinator
        .synthesize(&SynthesisConfig::default(), SynthesisRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let (queue, receiver) = InMemoryQueue::channel();
    let config = test_config();

    let decomposition_llm = MockLLMClient::decomposition();
    let dispatcher = Dispatcher::new(store.as_ref(), &queue, &decomposition_llm);
    let summary = dispatcher
        .dispatch(&config, &DispatchRequest::default())
        .await
        .unwrap();

    // Deliver one item twice, then drain normally.
    let worker = worker(store.clone(), MockLLMClient::findings());
    let item = receiver.try_recv().await.unwrap().unwrap();
    worker.process(&item).await.unwrap();
    receiver.redeliver(&item).unwrap();
    drain(&worker, &receiver, 10).await;

    let tracker = CompletionTracker::new(store.as_ref());
    let status = tracker
        .check(DatePartition::today(), &summary.run_id, 0.8)
        .await
        .unwrap();
    // The duplicate overwrote the same key: exactly the expected counts.
    assert_eq!(status.success_count, 4);
    assert_eq!(status.status, Completion::Complete);
}

#[tokio::test]
async fn test_channel_scheduler_delivers_after_delay() {
    let (scheduler, mut rx) = ChannelScheduler::channel();
    let request = SynthesisRequest {
        run_id: Some("run-x".to_string()),
        retry_count: 3,
        ..Default::default()
    };

    scheduler
        .schedule(request, Duration::from_millis(5))
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("retry was not delivered")
        .expect("channel closed");
    assert_eq!(delivered.retry_count, 3);
    assert_eq!(delivered.run_id.as_deref(), Some("run-x"));
}

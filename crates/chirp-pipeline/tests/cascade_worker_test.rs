// ============================================================================
// Cascade worker scenario tests
// ============================================================================
//
// End-to-end over the in-memory broker and in-memory cascade store:
// publish -> consume -> cascade -> ack / requeue / dead-letter.
//
// ============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chirp_broker::{DeletionEvent, InMemoryBroker, MessagePublisher};
use chirp_config::WorkerConfig;
use chirp_pipeline::testing::InMemoryCascadeStore;
use chirp_pipeline::{
    CascadeStore, CascadeTarget, CascadeWorker, StorageError, WorkerPhase, WorkerStats,
};
use tokio::sync::Notify;

fn test_config(max_retries: u32) -> WorkerConfig {
    WorkerConfig {
        poll_timeout_ms: 20,
        max_retries,
        outbox_poll_interval_ms: 20,
        outbox_batch_size: 10,
    }
}

/// Poll `cond` until it holds or two seconds pass
async fn wait_until<F, Fut>(cond: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Spawn a worker over `hub`/`store`, wait for `cond`, stop it, return stats
async fn run_worker_until<F, Fut>(
    hub: &InMemoryBroker,
    store: Arc<InMemoryCascadeStore>,
    config: WorkerConfig,
    cond: F,
) -> WorkerStats
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut worker = CascadeWorker::new(Box::new(hub.consumer()), store, &config);

    let shutdown_clone = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(shutdown_clone).await.unwrap() });

    wait_until(cond).await;
    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap()
}

#[tokio::test]
async fn scenario_a_full_cascade_acked_exactly_once() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryCascadeStore::new());
    store.seed("gulsan", 3, 2, 1);

    let payload = DeletionEvent::new("gulsan").to_bytes().unwrap();
    hub.publisher().publish(&payload).await.unwrap();

    let hub_ref = hub.clone();
    let stats = run_worker_until(&hub, store.clone(), test_config(5), || {
        let hub = hub_ref.clone();
        async move { hub.acked_count().await == 1 }
    })
    .await;

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(store.remaining("gulsan"), (0, 0, 0));
    assert_eq!(hub.acked_count().await, 1);
    assert_eq!(hub.queued_len().await, 0);
    assert_eq!(hub.unacked_len().await, 0);
}

#[tokio::test]
async fn scenario_b_unknown_user_is_acked_noop() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryCascadeStore::new());
    store.seed("someone-else", 4, 4, 4);

    let payload = DeletionEvent::new("ghost").to_bytes().unwrap();
    hub.publisher().publish(&payload).await.unwrap();

    let hub_ref = hub.clone();
    let stats = run_worker_until(&hub, store.clone(), test_config(5), || {
        let hub = hub_ref.clone();
        async move { hub.acked_count().await == 1 }
    })
    .await;

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dead_lettered, 0);
    // Unrelated rows untouched
    assert_eq!(store.remaining("someone-else"), (4, 4, 4));
    assert!(hub.dead_letters().await.is_empty());
}

#[tokio::test]
async fn scenario_c_storage_failure_never_acks_then_dead_letters() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryCascadeStore::new());
    store.seed("gulsan", 3, 2, 1);
    store.fail_on(CascadeTarget::Likes);

    let payload = DeletionEvent::new("gulsan").to_bytes().unwrap();
    hub.publisher().publish(&payload).await.unwrap();

    let hub_ref = hub.clone();
    let stats = run_worker_until(&hub, store.clone(), test_config(3), || {
        let hub = hub_ref.clone();
        async move { !hub.dead_letters().await.is_empty() }
    })
    .await;

    // Never acknowledged: the likes delete kept failing
    assert_eq!(hub.acked_count().await, 0);
    assert_eq!(stats.completed, 0);
    // Two requeues, then the third attempt exhausted the budget
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dead_lettered, 1);

    let dead = hub.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert!(dead[0].1.contains("incomplete"), "reason: {}", dead[0].1);
    assert_eq!(dead[0].2, 3);

    // The tweets and replies deletes persisted; likes rows survive for a
    // later replay
    assert_eq!(store.remaining("gulsan"), (0, 2, 0));
}

#[tokio::test]
async fn scenario_d_malformed_body_dead_lettered_not_retried() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryCascadeStore::new());

    hub.publisher()
        .publish(b"this is not a deletion event")
        .await
        .unwrap();

    let hub_ref = hub.clone();
    let stats = run_worker_until(&hub, store, test_config(5), || {
        let hub = hub_ref.clone();
        async move { !hub.dead_letters().await.is_empty() }
    })
    .await;

    assert_eq!(stats.retried, 0);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(hub.acked_count().await, 0);

    let dead = hub.dead_letters().await;
    assert!(dead[0].1.contains("malformed"), "reason: {}", dead[0].1);
    assert_eq!(dead[0].2, 1);
}

/// Store whose first delete blocks until the test releases it, so the test
/// can flip the shutdown flag while a message is mid-cascade
struct GatedStore {
    inner: InMemoryCascadeStore,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryCascadeStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl CascadeStore for GatedStore {
    async fn delete_tweets(&self, username: &str) -> Result<u64, StorageError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.delete_tweets(username).await
    }

    async fn delete_likes(&self, username: &str) -> Result<u64, StorageError> {
        self.inner.delete_likes(username).await
    }

    async fn delete_replies(&self, username: &str) -> Result<u64, StorageError> {
        self.inner.delete_replies(username).await
    }
}

#[tokio::test]
async fn shutdown_during_processing_finishes_the_in_flight_message() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(GatedStore::new());
    store.inner.seed("gulsan", 3, 2, 1);

    let payload = DeletionEvent::new("gulsan").to_bytes().unwrap();
    hub.publisher().publish(&payload).await.unwrap();

    let mut worker = CascadeWorker::new(Box::new(hub.consumer()), store.clone(), &test_config(5));
    let phase = worker.phase_handle();
    let shutdown = Arc::new(AtomicBool::new(false));

    let shutdown_clone = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(shutdown_clone).await.unwrap() });

    // Wait until the cascade is mid-flight, then request shutdown
    store.entered.notified().await;
    assert_eq!(phase.get(), WorkerPhase::Processing);
    shutdown.store(true, Ordering::SeqCst);
    store.release.notify_one();

    let stats = handle.await.unwrap();

    // The in-flight message was processed and acked before the stop
    assert_eq!(stats.completed, 1);
    assert_eq!(hub.acked_count().await, 1);
    assert_eq!(hub.unacked_len().await, 0);
    assert_eq!(store.inner.remaining("gulsan"), (0, 0, 0));
    assert_eq!(phase.get(), WorkerPhase::Stopped);
}

#[tokio::test]
async fn redelivery_of_same_event_is_a_noop() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryCascadeStore::new());
    store.seed("gulsan", 3, 2, 1);

    // The broker may deliver the same event any number of times
    let payload = DeletionEvent::new("gulsan").to_bytes().unwrap();
    let publisher = hub.publisher();
    publisher.publish(&payload).await.unwrap();
    publisher.publish(&payload).await.unwrap();
    publisher.publish(&payload).await.unwrap();

    let hub_ref = hub.clone();
    let stats = run_worker_until(&hub, store.clone(), test_config(5), || {
        let hub = hub_ref.clone();
        async move { hub.acked_count().await == 3 }
    })
    .await;

    // Net effect identical to a single successful execution
    assert_eq!(stats.completed, 3);
    assert_eq!(store.remaining("gulsan"), (0, 0, 0));
    assert!(hub.dead_letters().await.is_empty());
}

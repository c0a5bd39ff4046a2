// ============================================================================
// Outbox relay tests
// ============================================================================

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chirp_broker::{BrokerError, DeletionEvent, InMemoryBroker, MessagePublisher};
use chirp_config::WorkerConfig;
use chirp_pipeline::testing::InMemoryOutboxStore;
use chirp_pipeline::OutboxRelay;
use uuid::Uuid;

fn test_config() -> WorkerConfig {
    WorkerConfig {
        poll_timeout_ms: 20,
        max_retries: 5,
        outbox_poll_interval_ms: 20,
        outbox_batch_size: 10,
    }
}

fn enqueue(store: &InMemoryOutboxStore, username: &str) -> i64 {
    let event = DeletionEvent::new(username);
    let event_id = Uuid::parse_str(&event.id).unwrap();
    store.enqueue(event_id, username, event.to_bytes().unwrap())
}

/// Transport that fails the first `failures` publishes, then succeeds
struct FlakyTransport {
    inner: Arc<dyn MessagePublisher>,
    remaining_failures: AtomicU32,
}

#[async_trait]
impl MessagePublisher for FlakyTransport {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        if self.remaining_failures.load(Ordering::SeqCst) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(BrokerError::Connection("connection refused".to_string()));
        }
        self.inner.publish(payload).await
    }
}

#[tokio::test]
async fn relay_publishes_and_marks_pending_rows() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryOutboxStore::new());
    enqueue(&store, "gulsan");
    enqueue(&store, "arjun");

    let relay = OutboxRelay::new(store.clone(), Arc::new(hub.publisher()), &test_config());

    let published = relay.relay_once().await.unwrap();
    assert_eq!(published, 2);
    assert_eq!(hub.published_count().await, 2);
    assert_eq!(store.pending_count(), 0);
    assert_eq!(store.published_count(), 2);
}

#[tokio::test]
async fn relay_records_failure_and_retries_later() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryOutboxStore::new());
    let row_id = enqueue(&store, "gulsan");

    let transport = Arc::new(FlakyTransport {
        inner: Arc::new(hub.publisher()),
        remaining_failures: AtomicU32::new(1),
    });
    let relay = OutboxRelay::new(store.clone(), transport, &test_config());

    // First pass fails, the row stays pending with the error recorded
    assert_eq!(relay.relay_once().await.unwrap(), 0);
    assert_eq!(store.pending_count(), 1);
    assert!(store
        .last_error(row_id)
        .expect("failure should be recorded")
        .contains("connection refused"));

    // Second pass succeeds
    assert_eq!(relay.relay_once().await.unwrap(), 1);
    assert_eq!(store.pending_count(), 0);
    assert_eq!(hub.published_count().await, 1);
}

#[tokio::test]
async fn relay_run_loop_drains_backlog_and_stops() {
    let hub = InMemoryBroker::new();
    let store = Arc::new(InMemoryOutboxStore::new());
    enqueue(&store, "gulsan");
    enqueue(&store, "arjun");
    enqueue(&store, "mira");

    let relay = OutboxRelay::new(store.clone(), Arc::new(hub.publisher()), &test_config());
    let shutdown = Arc::new(AtomicBool::new(false));

    let shutdown_clone = shutdown.clone();
    let handle = tokio::spawn(async move { relay.run(shutdown_clone).await });

    for _ in 0..200 {
        if store.pending_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();

    assert_eq!(store.pending_count(), 0);
    assert_eq!(hub.published_count().await, 3);
}

// ============================================================================
// Outbox relay
// ============================================================================
//
// The guaranteed-delivery publish path. The owning service writes the
// serialized envelope into the outbox table in the same transaction as the
// user-row delete; this relay drains unpublished rows and retries until
// the broker accepts each payload. A crash between publish and
// mark_published duplicates the event, which the idempotent cascade
// absorbs.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use chirp_broker::MessagePublisher;
use chirp_config::WorkerConfig;

/// One unpublished outbox row
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: Uuid,
    pub username: String,
    /// Canonical envelope bytes, serialized once at enqueue time
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for pending deletion events
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished rows, up to `limit`
    async fn fetch_unpublished(&self, limit: i64) -> anyhow::Result<Vec<OutboxEvent>>;

    /// Mark a row as delivered to the broker
    async fn mark_published(&self, id: i64) -> anyhow::Result<()>;

    /// Record a failed publish attempt
    async fn record_failure(&self, id: i64, error: &str) -> anyhow::Result<()>;
}

/// Relays outbox rows to the broker until acked
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    transport: Arc<dyn MessagePublisher>,
    poll_interval: Duration,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        transport: Arc<dyn MessagePublisher>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            poll_interval: Duration::from_millis(config.outbox_poll_interval_ms),
            batch_size: config.outbox_batch_size,
        }
    }

    /// Drain one batch of pending rows
    ///
    /// Stops at the first publish failure (ordering within the batch is
    /// preserved across retries) and returns the number of rows published.
    pub async fn relay_once(&self) -> anyhow::Result<usize> {
        let pending = self.store.fetch_unpublished(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut published = 0;
        for event in &pending {
            match self.transport.publish(&event.payload).await {
                Ok(()) => {
                    self.store.mark_published(event.id).await?;
                    info!(
                        event_id = %event.event_id,
                        username = %event.username,
                        attempts = event.attempts + 1,
                        "Outbox event published"
                    );
                    published += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Publish failed, will retry on next pass"
                    );
                    self.store.record_failure(event.id, &e.to_string()).await?;
                    break;
                }
            }
        }

        Ok(published)
    }

    /// Poll the outbox until `shutdown` is set
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Outbox relay started"
        );

        while !shutdown.load(Ordering::SeqCst) {
            let published = match self.relay_once().await {
                Ok(published) => published,
                Err(e) => {
                    error!(error = %e, "Outbox pass failed");
                    0
                }
            };

            // A full batch means there is likely more backlog; anything less
            // means drained or blocked on a failing broker - wait either way.
            if (published as i64) < self.batch_size {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        info!("Outbox relay stopped gracefully");
        Ok(())
    }
}

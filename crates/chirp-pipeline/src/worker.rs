// ============================================================================
// Cascade worker
// ============================================================================
//
// The long-lived consumer loop:
//
//   Stopped -> Starting -> Listening -> (message) -> Processing -> Listening
//           -> ... -> Stopping -> Stopped
//
// The shutdown flag is checked on every poll iteration, so the worker stops
// within one poll timeout; an in-flight message always finishes processing
// first. The broker connection is owned by the worker for its entire life
// and released in every exit path.
//
// ============================================================================

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use chirp_broker::{BrokerError, Delivery, MessageConsumer};
use chirp_config::WorkerConfig;

use crate::processor::{process_delivery, ProcessOutcome};
use crate::retry::{RetryDecision, RetryTracker};
use crate::store::CascadeStore;

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const REQUEUE_BACKOFF: Duration = Duration::from_millis(100);

/// Consumer lifecycle phase, observable by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    Stopped = 0,
    Starting = 1,
    Listening = 2,
    Processing = 3,
    Stopping = 4,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerPhase::Starting,
            2 => WorkerPhase::Listening,
            3 => WorkerPhase::Processing,
            4 => WorkerPhase::Stopping,
            _ => WorkerPhase::Stopped,
        }
    }

    /// Whether the pipeline is up from an operator's point of view
    pub fn is_healthy(&self) -> bool {
        matches!(self, WorkerPhase::Listening | WorkerPhase::Processing)
    }
}

/// Shared handle to the worker's current phase
#[derive(Clone, Default)]
pub struct PhaseCell(Arc<AtomicU8>);

impl PhaseCell {
    pub fn get(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, phase: WorkerPhase) {
        self.0.store(phase as u8, Ordering::SeqCst);
    }

    fn try_start(&self) -> bool {
        self.0
            .compare_exchange(
                WorkerPhase::Stopped as u8,
                WorkerPhase::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

/// Cumulative processing counters
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub ack_failures: u64,
    pub receive_errors: u64,
}

/// The cascade-delete consumer worker
pub struct CascadeWorker {
    consumer: Box<dyn MessageConsumer>,
    store: Arc<dyn CascadeStore>,
    retries: RetryTracker,
    phase: PhaseCell,
    poll_timeout: Duration,
    stats: WorkerStats,
}

impl CascadeWorker {
    pub fn new(
        consumer: Box<dyn MessageConsumer>,
        store: Arc<dyn CascadeStore>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            retries: RetryTracker::new(config.max_retries),
            phase: PhaseCell::default(),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            stats: WorkerStats::default(),
        }
    }

    /// Handle for observing the worker phase (health endpoint)
    pub fn phase_handle(&self) -> PhaseCell {
        self.phase.clone()
    }

    /// Run the consumer loop until `shutdown` is set
    ///
    /// Idempotent against repeated starts: if the worker is already past
    /// Stopped, the call logs a warning and returns immediately.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> anyhow::Result<WorkerStats> {
        if !self.phase.try_start() {
            warn!(phase = ?self.phase.get(), "Cascade worker already started, ignoring");
            return Ok(self.stats);
        }

        self.phase.set(WorkerPhase::Listening);
        info!("Cascade worker listening for deletion events");

        let mut last_metrics_log = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            match self.consumer.recv(self.poll_timeout).await {
                Ok(Some(delivery)) => {
                    self.phase.set(WorkerPhase::Processing);
                    self.handle_delivery(delivery).await;
                    self.phase.set(WorkerPhase::Listening);
                }
                Ok(None) => {
                    // Poll timeout: loop around and re-check the shutdown flag
                }
                Err(BrokerError::Closed) => {
                    error!("Broker connection closed, stopping cascade worker");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Broker receive error");
                    self.stats.receive_errors += 1;
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }

            if last_metrics_log.elapsed() >= METRICS_LOG_INTERVAL {
                info!(
                    completed = self.stats.completed,
                    retried = self.stats.retried,
                    dead_lettered = self.stats.dead_lettered,
                    "Cascade worker progress"
                );
                last_metrics_log = Instant::now();
            }
        }

        self.phase.set(WorkerPhase::Stopping);
        if let Err(e) = self.consumer.close().await {
            warn!(error = %e, "Failed to close broker connection cleanly");
        }
        self.phase.set(WorkerPhase::Stopped);
        info!(
            completed = self.stats.completed,
            retried = self.stats.retried,
            dead_lettered = self.stats.dead_lettered,
            "Cascade worker stopped gracefully"
        );

        Ok(self.stats)
    }

    async fn handle_delivery(&mut self, delivery: Delivery) {
        match process_delivery(self.store.as_ref(), &delivery.payload).await {
            ProcessOutcome::Completed { event_id, .. } => {
                // Ack strictly after the cascade returned: a crash before this
                // point redelivers the message and the cascade re-runs as a
                // no-op.
                match self.consumer.ack(&delivery).await {
                    Ok(()) => {
                        self.stats.completed += 1;
                        self.retries.clear(&event_id);
                    }
                    Err(e) => {
                        // The broker will redeliver; the cascade is idempotent
                        error!(error = %e, event_id = %event_id, "Failed to ack completed message");
                        self.stats.ack_failures += 1;
                    }
                }
            }
            ProcessOutcome::Retry { event_id, reason } => {
                match self.retries.register_failure(&event_id) {
                    RetryDecision::Retry(attempt) => {
                        warn!(
                            event_id = %event_id,
                            attempt = attempt,
                            reason = %reason,
                            "Requeueing deletion event for retry"
                        );
                        if let Err(e) = self.consumer.requeue(&delivery).await {
                            error!(error = %e, event_id = %event_id, "Failed to requeue message");
                        }
                        self.stats.retried += 1;
                        // Avoid a tight redelivery loop on a persistently
                        // failing store
                        tokio::time::sleep(REQUEUE_BACKOFF).await;
                    }
                    RetryDecision::Exhausted(attempts) => {
                        error!(
                            event_id = %event_id,
                            attempts = attempts,
                            reason = %reason,
                            "Deletion event exhausted retries, dead-lettering"
                        );
                        if let Err(e) = self
                            .consumer
                            .dead_letter(&delivery, &reason, attempts)
                            .await
                        {
                            error!(error = %e, event_id = %event_id, "Failed to dead-letter message");
                        } else {
                            self.retries.clear(&event_id);
                            self.stats.dead_lettered += 1;
                        }
                    }
                }
            }
            ProcessOutcome::DeadLetter { reason } => {
                if let Err(e) = self.consumer.dead_letter(&delivery, &reason, 1).await {
                    error!(error = %e, "Failed to dead-letter undecodable message");
                } else {
                    self.stats.dead_lettered += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCascadeStore;
    use chirp_broker::InMemoryBroker;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            poll_timeout_ms: 20,
            max_retries: 3,
            outbox_poll_interval_ms: 20,
            outbox_batch_size: 10,
        }
    }

    #[tokio::test]
    async fn test_double_start_is_noop() {
        let hub = InMemoryBroker::new();
        let store = Arc::new(InMemoryCascadeStore::new());
        let mut worker = CascadeWorker::new(Box::new(hub.consumer()), store, &test_config());

        // Simulate a worker that is already listening
        worker.phase.set(WorkerPhase::Listening);

        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = worker.run(shutdown).await.unwrap();
        assert_eq!(stats.completed, 0);
        // Phase untouched by the rejected second start
        assert_eq!(worker.phase.get(), WorkerPhase::Listening);
    }

    #[tokio::test]
    async fn test_shutdown_reaches_stopped_phase() {
        let hub = InMemoryBroker::new();
        let store = Arc::new(InMemoryCascadeStore::new());
        let mut worker = CascadeWorker::new(Box::new(hub.consumer()), store, &test_config());
        let phase = worker.phase_handle();

        let shutdown = Arc::new(AtomicBool::new(true));
        worker.run(shutdown).await.unwrap();
        assert_eq!(phase.get(), WorkerPhase::Stopped);
    }
}

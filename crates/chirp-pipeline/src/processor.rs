// ============================================================================
// Message processor
// ============================================================================
//
// Decides the fate of one delivery. The outcome controls acknowledgment:
// only Completed leads to an ack, so the message is never removed from the
// broker before the cascade has actually run.
//
// Permanent failures (payloads redelivery cannot fix) are separated from
// transient ones so a malformed message is dead-lettered on first sight
// instead of looping through redelivery forever.
//
// ============================================================================

use tracing::{info, warn};

use chirp_broker::DeletionEvent;

use crate::executor::{cascade_delete, CascadeReport};
use crate::store::CascadeStore;

/// Result of processing one delivery
///
/// CRITICAL: only `Completed` may be acked. `Retry` leaves the message for
/// redelivery; `DeadLetter` removes it to the dead-letter channel.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Cascade ran to completion - ack the message
    Completed {
        event_id: String,
        report: CascadeReport,
    },
    /// Transient failure - do NOT ack, leave for redelivery
    Retry { event_id: String, reason: String },
    /// Permanent failure - route to the dead-letter channel
    DeadLetter { reason: String },
}

/// Process a single deletion-event delivery
pub async fn process_delivery(store: &dyn CascadeStore, payload: &[u8]) -> ProcessOutcome {
    let event = match DeletionEvent::from_bytes(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable deletion event, routing to dead-letter");
            return ProcessOutcome::DeadLetter {
                reason: e.to_string(),
            };
        }
    };

    match cascade_delete(store, &event.user_name).await {
        Ok(report) => {
            info!(
                event_id = %event.id,
                username = %event.user_name,
                tweets = report.tweets_deleted,
                likes = report.likes_deleted,
                replies = report.replies_deleted,
                "Cascade delete completed"
            );
            ProcessOutcome::Completed {
                event_id: event.id,
                report,
            }
        }
        Err(failure) => {
            warn!(
                event_id = %event.id,
                username = %event.user_name,
                failed_targets = ?failure.failed_targets(),
                "Cascade delete incomplete, message will be retried"
            );
            ProcessOutcome::Retry {
                event_id: event.id,
                reason: failure.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CascadeTarget;
    use crate::testing::InMemoryCascadeStore;

    #[tokio::test]
    async fn test_valid_event_completes() {
        let store = InMemoryCascadeStore::new();
        store.seed("gulsan", 3, 2, 1);

        let payload = DeletionEvent::new("gulsan").to_bytes().unwrap();
        match process_delivery(&store, &payload).await {
            ProcessOutcome::Completed { report, .. } => assert_eq!(report.total(), 6),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered() {
        let store = InMemoryCascadeStore::new();
        match process_delivery(&store, b"{{{ not json").await {
            ProcessOutcome::DeadLetter { reason } => {
                assert!(reason.contains("malformed"), "reason was: {reason}");
            }
            other => panic!("expected DeadLetter, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_schema_version_is_dead_lettered() {
        let store = InMemoryCascadeStore::new();
        let payload =
            br#"{"schemaVersion":9,"id":"x","messageCreated":"2024-05-01T10:00:00Z","userName":"gulsan"}"#;
        assert!(matches!(
            process_delivery(&store, payload).await,
            ProcessOutcome::DeadLetter { .. }
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_requests_retry() {
        let store = InMemoryCascadeStore::new();
        store.seed("gulsan", 1, 1, 1);
        store.fail_on(CascadeTarget::Likes);

        let payload = DeletionEvent::new("gulsan").to_bytes().unwrap();
        match process_delivery(&store, &payload).await {
            ProcessOutcome::Retry { reason, .. } => {
                assert!(reason.contains("incomplete"), "reason was: {reason}");
            }
            other => panic!("expected Retry, got {:?}", other),
        }
    }
}

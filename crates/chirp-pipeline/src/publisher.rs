use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use chirp_broker::{BrokerError, DeletionEvent, EnvelopeError, MessagePublisher};

/// Failure to hand a deletion event to the broker
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid deletion event: {0}")]
    Invalid(#[from] EnvelopeError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Publishes deletion events over the configured transport
pub struct DeletionPublisher {
    transport: Arc<dyn MessagePublisher>,
}

impl DeletionPublisher {
    pub fn new(transport: Arc<dyn MessagePublisher>) -> Self {
        Self { transport }
    }

    /// Publish one event, surfacing transport failures to the caller
    pub async fn publish(&self, event: &DeletionEvent) -> Result<(), PublishError> {
        event.validate()?;
        let payload = event.to_bytes()?;
        self.transport.publish(&payload).await?;

        debug!(event_id = %event.id, username = %event.user_name, "Published deletion event");
        Ok(())
    }

    /// Fire-and-forget publish for callers that must not block on messaging
    ///
    /// The upstream profile delete has already committed locally; a publish
    /// failure here is logged and swallowed so that delete still succeeds
    /// from the user's point of view. Deployments that cannot afford to
    /// lose the event use the outbox relay instead.
    pub async fn publish_best_effort(&self, username: &str) {
        let event = DeletionEvent::new(username);
        if let Err(e) = self.publish(&event).await {
            error!(
                error = %e,
                event_id = %event.id,
                "Failed to publish deletion event; dependent records will not be cascaded"
            );
        }
    }
}

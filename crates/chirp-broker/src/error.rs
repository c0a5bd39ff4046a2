use thiserror::Error;

/// Transport-level failures
///
/// External client errors are flattened to strings at the adapter boundary
/// so callers don't grow a dependency on lapin or rdkafka error types.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("acknowledge failed: {0}")]
    Ack(String),

    #[error("dead-letter failed: {0}")]
    DeadLetter(String),

    #[error("broker connection closed")]
    Closed,
}

/// Envelope decode failures
///
/// All variants are permanent: redelivery cannot fix them, so the consumer
/// dead-letters instead of requeueing.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed deletion event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported deletion event schema version {0}")]
    UnsupportedVersion(u32),

    #[error("deletion event has an empty userName")]
    EmptyUsername,
}

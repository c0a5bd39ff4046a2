use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BrokerError;

/// A message handed out by a consumer, pending acknowledgment
///
/// Position fields are adapter-specific: RabbitMQ uses `tag` (the AMQP
/// delivery tag), Kafka uses `partition`/`offset`. The in-memory adapter
/// uses `tag` as a monotonic counter.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub tag: u64,
    pub partition: i32,
    pub offset: i64,
    /// Broker-reported redelivery flag (best effort; Kafka leaves it false)
    pub redelivered: bool,
}

/// Publishing side of the broker
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Send one serialized envelope to the deletion-event channel
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Consuming side of the broker
///
/// One consumer per process; messages are handed out one at a time
/// (prefetch / poll of 1), so processing is sequential. Every received
/// delivery must end in exactly one of `ack`, `requeue`, or `dead_letter`.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Wait up to `timeout` for the next delivery
    ///
    /// Returns `Ok(None)` when the timeout expires without a message, so
    /// the caller can re-check its shutdown flag between polls.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Remove the message from the queue after the handler succeeded
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Leave the message for redelivery after a transient failure
    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Route the message to the dead-letter channel and remove it from the
    /// main redelivery loop
    async fn dead_letter(
        &mut self,
        delivery: &Delivery,
        reason: &str,
        retry_count: u32,
    ) -> Result<(), BrokerError>;

    /// Release the broker connection
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Wrapper written to the dead-letter channel
///
/// The original body is carried as base64 because dead-lettered payloads
/// are frequently not valid JSON in the first place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub payload: String,
    pub reason: String,
    pub retry_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(payload: &[u8], reason: &str, retry_count: u32) -> Self {
        Self {
            payload: BASE64.encode(payload),
            reason: reason.to_string(),
            retry_count,
            dead_lettered_at: Utc::now(),
        }
    }

    /// Decode the original message body
    pub fn original_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::DeadLetter(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_record_roundtrip() {
        let record = DeadLetterRecord::new(b"not json at all", "malformed payload", 1);
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"reason\":\"malformed payload\""));
        assert!(json.contains("\"retryCount\":1"));

        let decoded: DeadLetterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.original_payload().unwrap(), b"not json at all");
    }
}

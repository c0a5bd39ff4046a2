use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EnvelopeError;

/// Current envelope schema version
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    // Pre-versioning publishers omitted the field entirely; treat those
    // payloads as version 1 rather than rejecting them.
    SCHEMA_VERSION
}

/// Deletion event envelope
///
/// The single canonical wire schema, used unchanged by publisher and
/// consumer. Serialized as UTF-8 JSON:
///
/// `{ "schemaVersion": 1, "id": "...", "messageCreated": "...", "userName": "..." }`
///
/// The event is created once at publish time and immutable afterwards.
/// `userName` names an account whose local user record was already durably
/// deleted before the event was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionEvent {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Unique event ID (UUID v4), correlation/dedup key
    pub id: String,

    /// Publish-time timestamp (RFC 3339)
    pub message_created: DateTime<Utc>,

    /// The deleted account - the sole payload
    pub user_name: String,
}

impl DeletionEvent {
    /// Create a new event for a deleted account
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: Uuid::new_v4().to_string(),
            message_created: Utc::now(),
            user_name: username.into(),
        }
    }

    /// Validate envelope structure
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(self.schema_version));
        }
        if self.user_name.trim().is_empty() {
            return Err(EnvelopeError::EmptyUsername);
        }
        Ok(())
    }

    /// Serialize to the canonical JSON wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a received payload
    ///
    /// Every failure here is permanent: the payload will never become
    /// readable on redelivery, so callers route these to the dead-letter
    /// path instead of requeueing.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let event: DeletionEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_field_names() {
        let event = DeletionEvent::new("gulsan");
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"schemaVersion\":1"));
        assert!(json.contains("\"id\""));
        assert!(json.contains("\"messageCreated\""));
        assert!(json.contains("\"userName\":\"gulsan\""));
    }

    #[test]
    fn test_roundtrip() {
        let event = DeletionEvent::new("gulsan");
        let decoded = DeletionEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_legacy_payload_without_version_accepted() {
        let raw = br#"{"id":"abc-123","messageCreated":"2024-05-01T10:00:00Z","userName":"gulsan"}"#;
        let event = DeletionEvent::from_bytes(raw).unwrap();
        assert_eq!(event.schema_version, SCHEMA_VERSION);
        assert_eq!(event.user_name, "gulsan");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let raw = br#"{"schemaVersion":7,"id":"abc","messageCreated":"2024-05-01T10:00:00Z","userName":"gulsan"}"#;
        match DeletionEvent::from_bytes(raw) {
            Err(EnvelopeError::UnsupportedVersion(7)) => {}
            other => panic!("expected UnsupportedVersion(7), got {:?}", other),
        }
    }

    #[test]
    fn test_empty_username_rejected() {
        let raw = br#"{"id":"abc","messageCreated":"2024-05-01T10:00:00Z","userName":"  "}"#;
        assert!(matches!(
            DeletionEvent::from_bytes(raw),
            Err(EnvelopeError::EmptyUsername)
        ));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(matches!(
            DeletionEvent::from_bytes(b"not json at all"),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}

//! Notification record wire format.
//!
//! Each slot in the region is a little-endian `u16` length followed by that
//! many bytes of UTF-8 JSON. A zero length marks the end of the written
//! records.

use serde::{Deserialize, Serialize};

use ledgerkeep_core::event::StoredEvent;
use ledgerkeep_core::identity::StreamId;
use ledgerkeep_core::store::StateToken;

use crate::error::NotificationError;

/// Bytes taken by the length prefix.
pub const LENGTH_PREFIX: usize = 2;

/// Largest JSON body a slot can carry.
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// One committed event as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub stream_id: StreamId,
    #[serde(rename = "type")]
    pub event_type: String,
    /// The event payload as JSON text.
    pub payload: String,
    pub sequence_number: u64,
    /// State token of the stream after the commit.
    pub state: String,
}

impl NotificationRecord {
    #[must_use]
    pub fn from_event(event: &StoredEvent, state: &StateToken) -> Self {
        Self {
            stream_id: event.stream_id,
            event_type: event.event_type.clone(),
            payload: event.payload.to_string(),
            sequence_number: event.sequence_number,
            state: state.as_str().to_owned(),
        }
    }

    /// Serializes the record body, without its length prefix.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::RecordTooLarge` if the body exceeds
    /// [`MAX_RECORD_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, NotificationError> {
        let body = serde_json::to_vec(self)?;
        if body.len() > MAX_RECORD_LEN {
            return Err(NotificationError::RecordTooLarge {
                size: body.len(),
                max: MAX_RECORD_LEN,
            });
        }
        Ok(body)
    }

    /// Parses a record body.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Json` if the body is not a valid record.
    pub fn decode(body: &[u8]) -> Result<Self, NotificationError> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn stored_event(payload: serde_json::Value) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            stream_id: StreamId::new(),
            sequence_number: 7,
            event_type: "subject.created".to_owned(),
            payload,
            ends_lifecycle: false,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_encoded_record_uses_wire_field_names() {
        // Arrange
        let event = stored_event(json!({"id": "test"}));
        let record = NotificationRecord::from_event(&event, &StateToken::new("abc"));

        // Act
        let body = record.encode().unwrap();

        // Assert
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["streamId"], json!(event.stream_id.to_string()));
        assert_eq!(value["type"], "subject.created");
        assert_eq!(value["payload"], r#"{"id":"test"}"#);
        assert_eq!(value["sequenceNumber"], 7);
        assert_eq!(value["state"], "abc");
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let event = stored_event(json!("x".repeat(MAX_RECORD_LEN)));
        let record = NotificationRecord::from_event(&event, &StateToken::new("abc"));

        let result = record.encode();

        match result {
            Err(NotificationError::RecordTooLarge { size, max }) => {
                assert!(size > max);
                assert_eq!(max, 65_535);
            }
            other => panic!("expected RecordTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_body() {
        let result = NotificationRecord::decode(b"{not json");

        assert!(matches!(result, Err(NotificationError::Json(_))));
    }
}

//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::StreamId;

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type tag (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON, without the type tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error>;
}

/// An event awaiting its first commit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Type tag for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Whether applying this event ended the aggregate's lifecycle.
    pub ends_lifecycle: bool,
}

/// Stored representation of a committed domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Stream this event belongs to.
    pub stream_id: StreamId,
    /// Sequence number within the stream, starting at 1.
    pub sequence_number: u64,
    /// Type tag for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Whether this event ended the aggregate's lifecycle.
    pub ends_lifecycle: bool,
    /// Timestamp of the commit that stored the event.
    pub occurred_at: DateTime<Utc>,
}

//! Event store contract and state tokens.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PersistenceError;
use crate::event::{NewEvent, StoredEvent};
use crate::identity::StreamId;

/// Opaque checksum of the exact set of events a reader observed for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateToken(String);

impl StateToken {
    /// Wraps a store-defined token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Chains `event` onto the token of the stream prefix that precedes it.
    ///
    /// The result depends only on the events themselves, so two readers that
    /// observed the same events compute the same token.
    #[must_use]
    pub fn chain(previous: Option<&StateToken>, event: &StoredEvent) -> Self {
        let mut hasher = Sha256::new();
        if let Some(previous) = previous {
            hasher.update(previous.0.as_bytes());
        }
        hasher.update(event.sequence_number.to_le_bytes());
        hasher.update(event.event_type.as_bytes());
        hasher.update([0]);
        hasher.update(event.payload.to_string().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of reading a stream tail.
#[derive(Debug, Clone, Default)]
pub struct EventStream {
    /// Events after the requested revision, in ascending sequence order.
    pub events: Vec<StoredEvent>,
    /// Current state token, `None` for an empty stream.
    pub state: Option<StateToken>,
    /// Sequence number of the last committed event, 0 for an empty stream.
    pub revision: u64,
}

/// Position of a stream after an append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHead {
    /// State token after the append, `None` for an empty stream.
    pub state: Option<StateToken>,
    /// Sequence number of the last committed event, 0 for an empty stream.
    pub revision: u64,
}

/// A batch that has just been committed to a stream.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    /// The stream the batch was appended to.
    pub stream_id: StreamId,
    /// The committed events, in sequence order.
    pub events: Vec<StoredEvent>,
    /// The stream's state token after the commit.
    pub state: StateToken,
}

/// Failure reported by a [`CommitNotifier`].
pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

/// Receives committed batches from a store's commit path.
///
/// Publishing is best effort: a failure is reported to the store, which
/// logs it and still treats the commit as successful.
pub trait CommitNotifier: Send + Sync {
    /// Publishes a committed batch to observers.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be delivered.
    fn publish(&self, batch: &CommittedBatch) -> Result<(), PublishError>;
}

/// Append-only, per-stream ordered event log with optimistic concurrency.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` if the stream's current state equals
    /// `expected_state`. `None` is accepted only for an empty stream or a
    /// stream whose last event ended the aggregate's lifecycle; only such a
    /// new incarnation may append after that event. Either all events are
    /// written or none are.
    ///
    /// Returns the stream's head after the append.
    async fn append(
        &self,
        stream_id: StreamId,
        expected_state: Option<&StateToken>,
        events: &[NewEvent],
    ) -> Result<StreamHead, PersistenceError>;

    /// Reads all events with a sequence number greater than `from_revision`.
    async fn read_from(
        &self,
        stream_id: StreamId,
        from_revision: u64,
    ) -> Result<EventStream, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn stored(sequence_number: u64, payload: serde_json::Value) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            stream_id: StreamId::new(),
            sequence_number,
            event_type: "subject.created".into(),
            payload,
            ends_lifecycle: false,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_chain_ignores_event_identity_and_timestamps() {
        // Arrange
        let a = stored(1, json!({"id": "test"}));
        let b = stored(1, json!({"id": "test"}));

        // Act
        let token_a = StateToken::chain(None, &a);
        let token_b = StateToken::chain(None, &b);

        // Assert
        assert_eq!(token_a, token_b);
    }

    #[test]
    fn test_chain_depends_on_prefix() {
        let first = stored(1, json!({"id": "test"}));
        let second = stored(2, json!({"id": "test"}));
        let root = StateToken::chain(None, &first);

        let chained = StateToken::chain(Some(&root), &second);
        let unchained = StateToken::chain(None, &second);

        assert_ne!(chained, unchained);
        assert_eq!(chained.as_str().len(), 64);
    }
}

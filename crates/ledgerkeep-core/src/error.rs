//! Domain and persistence error types.

use thiserror::Error;

use crate::identity::StreamId;
use crate::store::StateToken;

/// Errors raised by aggregates while handling commands.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate's lifecycle has ended; it accepts no further commands.
    #[error("lifecycle of aggregate {aggregate_type} has ended")]
    LifecycleEnded {
        /// The aggregate type that rejected the command.
        aggregate_type: &'static str,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level persistence error type returned by the repository and stores.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The aggregate type is missing a registration, natural key, factory,
    /// memento projection or event type mapping.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The aggregate declares a natural key but its current value is absent.
    #[error("cannot save aggregate of type {aggregate_type}: natural key has no value")]
    NullNaturalKey {
        /// The aggregate type being saved.
        aggregate_type: String,
    },

    /// A load was attempted with a key of the wrong type.
    #[error(
        "invalid natural key for aggregate of type {aggregate_type}: expected {expected}, found {actual}"
    )]
    NaturalKeyTypeMismatch {
        /// The aggregate type being loaded.
        aggregate_type: String,
        /// The registered natural key type.
        expected: &'static str,
        /// The type supplied by the caller.
        actual: &'static str,
    },

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on stream {stream_id}: expected state {}, found {}",
        display_token(.expected.as_ref()),
        display_token(.actual.as_ref())
    )]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: StreamId,
        /// The state the writer observed when it last read the stream.
        expected: Option<StateToken>,
        /// The state currently held by the store.
        actual: Option<StateToken>,
    },

    /// Events were appended behind a lifecycle end by a writer that observed
    /// it, instead of by a new incarnation.
    #[error(
        "stream {stream_id} ended its aggregate's lifecycle; only a new incarnation may append"
    )]
    StreamEnded {
        /// The stream whose last event ended the lifecycle.
        stream_id: StreamId,
    },

    /// A snapshot was requested for an aggregate with unsaved events.
    #[error("aggregate of type {aggregate_type} has uncommitted events")]
    UncommittedChanges {
        /// The aggregate type being snapshotted.
        aggregate_type: String,
    },

    /// No stream is bound to the natural key.
    #[error("aggregate of type {aggregate_type} with natural key {natural_key} not found")]
    AggregateNotFound {
        /// The aggregate type being loaded.
        aggregate_type: String,
        /// The natural key, rendered as JSON.
        natural_key: String,
    },

    /// A stream is empty or inconsistent with its identity/snapshot records.
    #[error("stream {stream_id} is corrupt: {reason}")]
    Corruption {
        /// The affected stream.
        stream_id: StreamId,
        /// What was inconsistent.
        reason: String,
    },

    /// Memento or event payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An infrastructure failure translated by a store implementation.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl PersistenceError {
    /// Returns `true` for conflicts the caller can resolve by reloading and
    /// retrying.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

fn display_token(token: Option<&StateToken>) -> &str {
    token.map_or("<none>", StateToken::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_renders_missing_tokens() {
        // Arrange
        let error = PersistenceError::ConcurrencyConflict {
            stream_id: StreamId::new(),
            expected: None,
            actual: Some(StateToken::new("abc")),
        };

        // Act
        let message = error.to_string();

        // Assert
        assert!(message.contains("expected state <none>"));
        assert!(message.contains("found abc"));
        assert!(error.is_conflict());
    }

    #[test]
    fn test_not_found_is_not_a_conflict() {
        let error = PersistenceError::AggregateNotFound {
            aggregate_type: "Subject".into(),
            natural_key: "\"test\"".into(),
        };

        assert!(!error.is_conflict());
    }
}

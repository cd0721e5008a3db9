//! In-memory event store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use ledgerkeep_core::clock::{Clock, SystemClock};
use ledgerkeep_core::error::PersistenceError;
use ledgerkeep_core::event::{NewEvent, StoredEvent};
use ledgerkeep_core::identity::StreamId;
use ledgerkeep_core::store::{
    CommitNotifier, CommittedBatch, EventStore, EventStream, StateToken, StreamHead,
};

#[derive(Debug, Default)]
struct Stream {
    events: Vec<StoredEvent>,
    state: Option<StateToken>,
}

impl Stream {
    fn revision(&self) -> u64 {
        self.events.last().map_or(0, |event| event.sequence_number)
    }

    fn head(&self) -> StreamHead {
        StreamHead {
            state: self.state.clone(),
            revision: self.revision(),
        }
    }

    /// Checks that a writer holding `expected` may append `count` events.
    fn check(
        &self,
        stream_id: StreamId,
        expected: Option<&StateToken>,
        count: usize,
    ) -> Result<(), PersistenceError> {
        let ended = self.events.last().is_some_and(|event| event.ends_lifecycle);
        let accepted = match expected {
            Some(expected) => self.state.as_ref() == Some(expected),
            None => self.events.is_empty() || ended,
        };
        if !accepted {
            return Err(PersistenceError::ConcurrencyConflict {
                stream_id,
                expected: expected.cloned(),
                actual: self.state.clone(),
            });
        }
        if ended && expected.is_some() && count > 0 {
            return Err(PersistenceError::StreamEnded { stream_id });
        }
        Ok(())
    }
}

/// Event store held in process memory.
pub struct MemoryEventStore {
    streams: RwLock<HashMap<StreamId, Stream>>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn CommitNotifier>>,
}

impl MemoryEventStore {
    /// Creates an empty store stamping commits with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            notifier: None,
        }
    }

    /// Replaces the clock used to stamp committed events.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publishes every committed batch to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn CommitNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEventStore")
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Infrastructure("event store lock poisoned".into())
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        stream_id: StreamId,
        expected_state: Option<&StateToken>,
        events: &[NewEvent],
    ) -> Result<StreamHead, PersistenceError> {
        let batch = {
            let mut streams = self.streams.write().map_err(|_| poisoned())?;
            let empty = Stream::default();
            let current = streams.get(&stream_id).unwrap_or(&empty);
            current.check(stream_id, expected_state, events.len())?;
            let head = current.head();
            if events.is_empty() {
                return Ok(head);
            }

            let occurred_at = self.clock.now();
            let mut state = head.state.clone();
            let mut sequence_number = head.revision;
            let committed: Vec<StoredEvent> = events
                .iter()
                .map(|event| {
                    sequence_number += 1;
                    let stored = StoredEvent {
                        event_id: Uuid::new_v4(),
                        stream_id,
                        sequence_number,
                        event_type: event.event_type.clone(),
                        payload: event.payload.clone(),
                        ends_lifecycle: event.ends_lifecycle,
                        occurred_at,
                    };
                    state = Some(StateToken::chain(state.as_ref(), &stored));
                    stored
                })
                .collect();
            let Some(state) = state else {
                return Ok(head);
            };

            let stream = streams.entry(stream_id).or_default();
            stream.events.extend(committed.iter().cloned());
            stream.state = Some(state.clone());
            debug!(
                stream_id = %stream_id,
                events = committed.len(),
                revision = sequence_number,
                "committed events"
            );
            CommittedBatch {
                stream_id,
                events: committed,
                state,
            }
        };

        if let Some(notifier) = &self.notifier
            && let Err(error) = notifier.publish(&batch)
        {
            warn!(stream_id = %stream_id, %error, "failed to publish commit notification");
        }
        let revision = batch.events.last().map_or(0, |event| event.sequence_number);
        Ok(StreamHead {
            state: Some(batch.state),
            revision,
        })
    }

    async fn read_from(
        &self,
        stream_id: StreamId,
        from_revision: u64,
    ) -> Result<EventStream, PersistenceError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        let Some(stream) = streams.get(&stream_id) else {
            return Ok(EventStream::default());
        };
        Ok(EventStream {
            events: stream
                .events
                .iter()
                .filter(|event| event.sequence_number > from_revision)
                .cloned()
                .collect(),
            state: stream.state.clone(),
            revision: stream.revision(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use ledgerkeep_core::store::PublishError;
    use ledgerkeep_test_support::{ManualClock, RecordingNotifier};
    use serde_json::json;

    use super::*;

    fn new_event(event_type: &str) -> NewEvent {
        NewEvent {
            event_type: event_type.to_owned(),
            payload: json!({"id": "test"}),
            ends_lifecycle: false,
        }
    }

    struct BrokenNotifier;

    impl CommitNotifier for BrokenNotifier {
        fn publish(&self, _batch: &CommittedBatch) -> Result<(), PublishError> {
            Err("region unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_first_append_assigns_sequence_numbers_from_one() {
        // Arrange
        let fixed_now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::starting_at(fixed_now));
        let store = MemoryEventStore::new().with_clock(clock);
        let stream_id = StreamId::new();

        // Act
        let head = store
            .append(stream_id, None, &[new_event("a"), new_event("b")])
            .await
            .unwrap();

        // Assert
        let stream = store.read_from(stream_id, 0).await.unwrap();
        assert_eq!(stream.events.len(), 2);
        assert_eq!(stream.events[0].sequence_number, 1);
        assert_eq!(stream.events[1].sequence_number, 2);
        assert_eq!(stream.events[0].occurred_at, fixed_now);
        assert_eq!(stream.revision, 2);
        assert_eq!(head.revision, 2);
        assert_eq!(stream.state, head.state);
    }

    #[tokio::test]
    async fn test_each_batch_is_stamped_with_its_commit_time() {
        // Arrange
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::starting_at(start));
        let store = MemoryEventStore::new().with_clock(clock.clone());
        let stream_id = StreamId::new();
        let first = store.append(stream_id, None, &[new_event("a")]).await.unwrap();

        // Act
        let later = clock.advance(TimeDelta::minutes(5));
        store
            .append(stream_id, first.state.as_ref(), &[new_event("b"), new_event("c")])
            .await
            .unwrap();

        // Assert
        let stream = store.read_from(stream_id, 0).await.unwrap();
        let stamps: Vec<_> = stream.events.iter().map(|e| e.occurred_at).collect();
        assert_eq!(stamps, vec![start, later, later]);
    }

    #[tokio::test]
    async fn test_append_with_stale_state_conflicts_and_writes_nothing() {
        // Arrange
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        let first = store
            .append(stream_id, None, &[new_event("a")])
            .await
            .unwrap()
            .state;
        let second = store
            .append(stream_id, first.as_ref(), &[new_event("b")])
            .await
            .unwrap()
            .state;

        // Act
        let result = store
            .append(stream_id, first.as_ref(), &[new_event("c"), new_event("d")])
            .await;

        // Assert
        match result {
            Err(PersistenceError::ConcurrencyConflict {
                stream_id: conflicted,
                expected,
                actual,
            }) => {
                assert_eq!(conflicted, stream_id);
                assert_eq!(expected, first);
                assert_eq!(actual, second);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(store.read_from(stream_id, 0).await.unwrap().events.len(), 2);
    }

    #[tokio::test]
    async fn test_append_without_state_to_existing_stream_conflicts() {
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        store.append(stream_id, None, &[new_event("a")]).await.unwrap();

        let result = store.append(stream_id, None, &[new_event("b")]).await;

        assert!(matches!(
            result,
            Err(PersistenceError::ConcurrencyConflict { expected: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_append_without_state_after_lifecycle_end_continues_sequence() {
        // Arrange
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        let ending = NewEvent {
            ends_lifecycle: true,
            ..new_event("ended")
        };
        store
            .append(stream_id, None, &[new_event("created"), ending])
            .await
            .unwrap();

        // Act
        let head = store
            .append(stream_id, None, &[new_event("created")])
            .await
            .unwrap();

        // Assert
        let stream = store.read_from(stream_id, 0).await.unwrap();
        let sequence: Vec<u64> = stream.events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2, 3]);
        assert_eq!(head.revision, 3);
    }

    #[tokio::test]
    async fn test_append_behind_lifecycle_end_with_observed_state_is_rejected() {
        // Arrange
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        let ending = NewEvent {
            ends_lifecycle: true,
            ..new_event("ended")
        };
        let ended = store
            .append(stream_id, None, &[new_event("created"), ending])
            .await
            .unwrap();

        // Act
        let result = store
            .append(stream_id, ended.state.as_ref(), &[new_event("did_something")])
            .await;

        // Assert
        match result {
            Err(PersistenceError::StreamEnded { stream_id: ended_stream }) => {
                assert_eq!(ended_stream, stream_id);
            }
            other => panic!("expected StreamEnded, got {other:?}"),
        }
        assert_eq!(store.read_from(stream_id, 0).await.unwrap().revision, 2);
        let resave = store.append(stream_id, ended.state.as_ref(), &[]).await.unwrap();
        assert_eq!(resave, ended);
    }

    #[tokio::test]
    async fn test_rejected_append_does_not_create_the_stream() {
        // Arrange
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        let foreign = StateToken::new("foreign");

        // Act
        let result = store
            .append(stream_id, Some(&foreign), &[new_event("a")])
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(PersistenceError::ConcurrencyConflict { actual: None, .. })
        ));
        assert!(store.streams.read().unwrap().get(&stream_id).is_none());
    }

    #[tokio::test]
    async fn test_empty_append_leaves_state_unchanged() {
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        let head = store.append(stream_id, None, &[new_event("a")]).await.unwrap();

        let after = store.append(stream_id, head.state.as_ref(), &[]).await.unwrap();

        assert_eq!(after, head);
        assert_eq!(store.read_from(stream_id, 0).await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_read_from_returns_only_the_tail() {
        let store = MemoryEventStore::new();
        let stream_id = StreamId::new();
        store
            .append(stream_id, None, &[new_event("a"), new_event("b"), new_event("c")])
            .await
            .unwrap();

        let stream = store.read_from(stream_id, 2).await.unwrap();

        assert_eq!(stream.events.len(), 1);
        assert_eq!(stream.events[0].event_type, "c");
        assert_eq!(stream.revision, 3);
    }

    #[tokio::test]
    async fn test_read_from_unknown_stream_is_empty() {
        let store = MemoryEventStore::new();

        let stream = store.read_from(StreamId::new(), 0).await.unwrap();

        assert!(stream.events.is_empty());
        assert!(stream.state.is_none());
        assert_eq!(stream.revision, 0);
    }

    #[tokio::test]
    async fn test_same_events_produce_same_state_in_separate_stores() {
        let a = MemoryEventStore::new();
        let b = MemoryEventStore::new();
        let stream_id = StreamId::new();

        let head_a = a.append(stream_id, None, &[new_event("a")]).await.unwrap();
        let head_b = b.append(stream_id, None, &[new_event("a")]).await.unwrap();

        assert_eq!(head_a, head_b);
    }

    #[tokio::test]
    async fn test_commit_publishes_batch_to_notifier() {
        // Arrange
        let notifier = Arc::new(RecordingNotifier::new());
        let store = MemoryEventStore::new().with_notifier(notifier.clone());
        let stream_id = StreamId::new();

        // Act
        let head = store
            .append(stream_id, None, &[new_event("a"), new_event("b")])
            .await
            .unwrap();

        // Assert
        let batches = notifier.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].stream_id, stream_id);
        assert_eq!(batches[0].events.len(), 2);
        assert_eq!(Some(batches[0].state.clone()), head.state);
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_fail_the_commit() {
        let store = MemoryEventStore::new().with_notifier(Arc::new(BrokenNotifier));
        let stream_id = StreamId::new();

        let head = store.append(stream_id, None, &[new_event("a")]).await;

        assert!(head.unwrap().state.is_some());
        assert_eq!(store.read_from(stream_id, 0).await.unwrap().events.len(), 1);
    }
}

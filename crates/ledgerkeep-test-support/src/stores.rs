//! Test doubles for the store contracts.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ledgerkeep_core::error::PersistenceError;
use ledgerkeep_core::event::NewEvent;
use ledgerkeep_core::identity::StreamId;
use ledgerkeep_core::snapshot::{Snapshot, SnapshotStore};
use ledgerkeep_core::store::{
    CommitNotifier, CommittedBatch, EventStore, EventStream, PublishError, StateToken, StreamHead,
};

/// One `read_from` call observed by [`RecordingEventStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCall {
    pub stream_id: StreamId,
    pub from_revision: u64,
    /// Number of events the wrapped store returned.
    pub returned: usize,
}

/// Wraps another event store and records every read, so tests can assert how
/// many events a load actually replayed.
pub struct RecordingEventStore {
    inner: Arc<dyn EventStore>,
    reads: Mutex<Vec<ReadCall>>,
}

impl RecordingEventStore {
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Returns the reads observed so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reads(&self) -> Vec<ReadCall> {
        self.reads.lock().unwrap().clone()
    }

    /// Returns the most recent read, if any.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn last_read(&self) -> Option<ReadCall> {
        self.reads.lock().unwrap().last().copied()
    }
}

impl std::fmt::Debug for RecordingEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingEventStore")
            .field("reads", &self.reads)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn append(
        &self,
        stream_id: StreamId,
        expected_state: Option<&StateToken>,
        events: &[NewEvent],
    ) -> Result<StreamHead, PersistenceError> {
        self.inner.append(stream_id, expected_state, events).await
    }

    async fn read_from(
        &self,
        stream_id: StreamId,
        from_revision: u64,
    ) -> Result<EventStream, PersistenceError> {
        let stream = self.inner.read_from(stream_id, from_revision).await?;
        self.reads.lock().unwrap().push(ReadCall {
            stream_id,
            from_revision,
            returned: stream.events.len(),
        });
        Ok(stream)
    }
}

/// An event store that accepts every append and forgets it. Loading through
/// it finds a bound identity with no events behind it.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn append(
        &self,
        _stream_id: StreamId,
        _expected_state: Option<&StateToken>,
        _events: &[NewEvent],
    ) -> Result<StreamHead, PersistenceError> {
        Ok(StreamHead::default())
    }

    async fn read_from(
        &self,
        _stream_id: StreamId,
        _from_revision: u64,
    ) -> Result<EventStream, PersistenceError> {
        Ok(EventStream::default())
    }
}

/// An event store whose every operation fails with an infrastructure error.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _stream_id: StreamId,
        _expected_state: Option<&StateToken>,
        _events: &[NewEvent],
    ) -> Result<StreamHead, PersistenceError> {
        Err(PersistenceError::Infrastructure("connection refused".into()))
    }

    async fn read_from(
        &self,
        _stream_id: StreamId,
        _from_revision: u64,
    ) -> Result<EventStream, PersistenceError> {
        Err(PersistenceError::Infrastructure("connection refused".into()))
    }
}

/// A snapshot store that never holds anything. Loads through it always replay
/// the full stream.
#[derive(Debug)]
pub struct NoSnapshots;

#[async_trait]
impl SnapshotStore for NoSnapshots {
    async fn put(&self, _stream_id: StreamId, _snapshot: Snapshot) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn get(&self, _stream_id: StreamId) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(None)
    }
}

/// A commit notifier that keeps every batch it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    batches: Mutex<Vec<CommittedBatch>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the batches published so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<CommittedBatch> {
        self.batches.lock().unwrap().clone()
    }
}

impl CommitNotifier for RecordingNotifier {
    fn publish(&self, batch: &CommittedBatch) -> Result<(), PublishError> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

//! Snapshot store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::identity::StreamId;

/// A cached memento used to bound replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence number of the last event folded into the memento.
    pub revision: u64,
    /// The aggregate's memento.
    pub memento: serde_json::Value,
    /// Whether an event at or before `revision` ended the lifecycle.
    #[serde(default)]
    pub lifecycle_ended: bool,
}

/// Latest-only snapshot cache.
///
/// Snapshots are an optimization: a store that never returns one must still
/// yield correct loads, only with a full replay.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replaces any snapshot held for the stream.
    async fn put(&self, stream_id: StreamId, snapshot: Snapshot) -> Result<(), PersistenceError>;

    /// Returns the most recently stored snapshot for the stream.
    async fn get(&self, stream_id: StreamId) -> Result<Option<Snapshot>, PersistenceError>;
}

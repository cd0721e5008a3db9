//! In-memory snapshot store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use ledgerkeep_core::error::PersistenceError;
use ledgerkeep_core::identity::StreamId;
use ledgerkeep_core::snapshot::{Snapshot, SnapshotStore};

/// Latest-only snapshot cache held in process memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<StreamId, Snapshot>>,
}

impl MemorySnapshotStore {
    /// Creates an empty snapshot store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Infrastructure("snapshot store lock poisoned".into())
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, stream_id: StreamId, snapshot: Snapshot) -> Result<(), PersistenceError> {
        self.snapshots
            .write()
            .map_err(|_| poisoned())?
            .insert(stream_id, snapshot);
        Ok(())
    }

    async fn get(&self, stream_id: StreamId) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| poisoned())?
            .get(&stream_id)
            .cloned())
    }
}

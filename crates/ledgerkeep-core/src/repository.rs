//! Aggregate repository: the load/save protocol over the identity map,
//! event store and snapshot store.

use std::any::type_name;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::aggregate::AggregateRoot;
use crate::error::PersistenceError;
use crate::event::{DomainEvent, NewEvent};
use crate::identity::{IdentityKey, IdentityMap, StreamId};
use crate::registry::{AggregateType, TypeRegistry};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::store::{EventStore, EventStream};

/// Loads and saves aggregates by natural key.
#[derive(Clone)]
pub struct Repository {
    registry: Arc<TypeRegistry>,
    identity_map: Arc<dyn IdentityMap>,
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl Repository {
    /// Creates a repository over the given stores.
    #[must_use]
    pub fn new(
        registry: Arc<TypeRegistry>,
        identity_map: Arc<dyn IdentityMap>,
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            registry,
            identity_map,
            events,
            snapshots,
        }
    }

    /// Appends the aggregate's uncommitted events to its stream.
    ///
    /// On success the aggregate's events are marked committed and it
    /// remembers the new state token, so it can be saved again without a
    /// reload. Conflicts are never retried here.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Configuration` if the type is not fully
    /// configured, `PersistenceError::NullNaturalKey` if the key has no
    /// value, and `PersistenceError::ConcurrencyConflict` if the stream moved
    /// on since the aggregate was read.
    #[instrument(skip_all, fields(aggregate_type = type_name::<A>()))]
    pub async fn save<A: AggregateRoot>(&self, aggregate: &mut A) -> Result<(), PersistenceError> {
        let aggregate_type = self.registry.require::<A>()?;
        let (key_type, natural_key) = aggregate_type.natural_key_of(aggregate)?;
        let stream_id = self
            .identity_map
            .get_or_add(IdentityKey {
                aggregate_type: aggregate_type.name(),
                key_type,
                value: &natural_key,
                comparer: aggregate_type.comparer(),
            })
            .await?;

        // Types without a memento cannot be snapshotted, so they cannot be
        // saved either.
        aggregate_type.capture(aggregate)?;

        let events = pending_events(aggregate_type, aggregate)?;
        let pre_commit_state = aggregate.root().state().cloned();
        let head = self
            .events
            .append(stream_id, pre_commit_state.as_ref(), &events)
            .await?;

        debug!(
            stream_id = %stream_id,
            events = events.len(),
            revision = head.revision,
            "saved aggregate"
        );
        aggregate.root_mut().commit(head);
        Ok(())
    }

    /// Loads the aggregate bound to `natural_key`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::AggregateNotFound` if the key was never
    /// saved, `PersistenceError::NaturalKeyTypeMismatch` if `K` is not the
    /// registered key type, and `PersistenceError::Corruption` if the stream
    /// is empty or inconsistent with its snapshot.
    #[instrument(skip_all, fields(aggregate_type = type_name::<A>()))]
    pub async fn load<A, K>(&self, natural_key: &K) -> Result<A, PersistenceError>
    where
        A: AggregateRoot,
        K: Serialize + 'static,
    {
        let aggregate_type = self.registry.require::<A>()?;
        let stream_id = self
            .resolve(aggregate_type, natural_key)
            .await?
            .ok_or_else(|| PersistenceError::AggregateNotFound {
                aggregate_type: aggregate_type.name().to_owned(),
                natural_key: serde_json::to_string(natural_key).unwrap_or_default(),
            })?;

        let snapshot = self.snapshots.get(stream_id).await?;
        let base_revision = snapshot.as_ref().map_or(0, |snapshot| snapshot.revision);
        let stream = self.events.read_from(stream_id, base_revision).await?;
        debug!(
            stream_id = %stream_id,
            base_revision,
            tail = stream.events.len(),
            "loaded stream"
        );

        reconstitute(aggregate_type, stream_id, snapshot, stream)
    }

    /// Returns the stream bound to `natural_key` without creating one.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::NaturalKeyTypeMismatch` if `K` is not the
    /// registered key type.
    pub async fn stream_id<A, K>(
        &self,
        natural_key: &K,
    ) -> Result<Option<StreamId>, PersistenceError>
    where
        A: AggregateRoot,
        K: Serialize + 'static,
    {
        let aggregate_type = self.registry.require::<A>()?;
        self.resolve(aggregate_type, natural_key).await
    }

    /// Stores a snapshot of a fully committed aggregate. Snapshot cadence is
    /// the caller's decision; `save` never snapshots.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::UncommittedChanges` if the aggregate has
    /// unsaved events and `PersistenceError::AggregateNotFound` if it was
    /// never saved.
    pub async fn snapshot<A: AggregateRoot>(&self, aggregate: &A) -> Result<(), PersistenceError> {
        let aggregate_type = self.registry.require::<A>()?;
        if !aggregate.uncommitted_events().is_empty() {
            return Err(PersistenceError::UncommittedChanges {
                aggregate_type: aggregate_type.name().to_owned(),
            });
        }

        let (key_type, natural_key) = aggregate_type.natural_key_of(aggregate)?;
        let stream_id = self
            .identity_map
            .try_get(IdentityKey {
                aggregate_type: aggregate_type.name(),
                key_type,
                value: &natural_key,
                comparer: aggregate_type.comparer(),
            })
            .await?
            .ok_or_else(|| PersistenceError::AggregateNotFound {
                aggregate_type: aggregate_type.name().to_owned(),
                natural_key: natural_key.to_string(),
            })?;

        let snapshot = Snapshot {
            revision: aggregate.revision(),
            memento: aggregate_type.capture(aggregate)?,
            lifecycle_ended: aggregate.root().is_ended_in_history(),
        };
        debug!(stream_id = %stream_id, revision = snapshot.revision, "storing snapshot");
        self.snapshots.put(stream_id, snapshot).await
    }

    async fn resolve<A, K>(
        &self,
        aggregate_type: &AggregateType<A>,
        natural_key: &K,
    ) -> Result<Option<StreamId>, PersistenceError>
    where
        A: AggregateRoot,
        K: Serialize + 'static,
    {
        let key_type = aggregate_type.key_type().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "cannot load aggregate of type {} as there is no natural key defined",
                aggregate_type.name()
            ))
        })?;
        if key_type != type_name::<K>() {
            return Err(PersistenceError::NaturalKeyTypeMismatch {
                aggregate_type: aggregate_type.name().to_owned(),
                expected: key_type,
                actual: type_name::<K>(),
            });
        }

        let value = serde_json::to_value(natural_key)?;
        self.identity_map
            .try_get(IdentityKey {
                aggregate_type: aggregate_type.name(),
                key_type,
                value: &value,
                comparer: aggregate_type.comparer(),
            })
            .await
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn pending_events<A: AggregateRoot>(
    aggregate_type: &AggregateType<A>,
    aggregate: &A,
) -> Result<Vec<NewEvent>, PersistenceError> {
    aggregate
        .uncommitted_events()
        .iter()
        .enumerate()
        .map(|(index, event)| {
            let event_type = event.event_type();
            if !aggregate_type.handles(event_type) {
                return Err(PersistenceError::Configuration(format!(
                    "aggregate of type {} has no mapping for event type {event_type}",
                    aggregate_type.name()
                )));
            }
            Ok(NewEvent {
                event_type: event_type.to_owned(),
                payload: event.to_payload()?,
                ends_lifecycle: aggregate.root().ends_lifecycle(index),
            })
        })
        .collect()
}

/// Rebuilds a live aggregate from an optional snapshot and the events that
/// follow it.
///
/// # Errors
///
/// Returns `PersistenceError::Corruption` if the stream is empty, has a
/// sequence gap, ends before the snapshot, or holds an unregistered event
/// type.
fn reconstitute<A: AggregateRoot>(
    aggregate_type: &AggregateType<A>,
    stream_id: StreamId,
    snapshot: Option<Snapshot>,
    stream: EventStream,
) -> Result<A, PersistenceError> {
    let corrupt = |reason: String| PersistenceError::Corruption { stream_id, reason };

    if snapshot.is_none() && stream.events.is_empty() {
        return Err(corrupt(
            "stream identifier is bound but the stream holds no events".into(),
        ));
    }
    let base_revision = snapshot.as_ref().map_or(0, |snapshot| snapshot.revision);
    if stream.revision < base_revision {
        return Err(corrupt(format!(
            "snapshot revision {base_revision} exceeds stream revision {}",
            stream.revision
        )));
    }

    let mut aggregate = aggregate_type.create()?;
    let mut ended = false;
    if let Some(snapshot) = snapshot {
        aggregate_type.restore(&mut aggregate, snapshot.memento)?;
        ended = snapshot.lifecycle_ended;
    }
    aggregate.root_mut().reset(base_revision, None);
    if ended {
        aggregate.root_mut().mark_ended_in_history();
    }

    for stored in stream.events {
        let expected = aggregate.revision() + 1;
        if stored.sequence_number != expected {
            return Err(corrupt(format!(
                "expected sequence number {expected}, found {}",
                stored.sequence_number
            )));
        }
        let event = aggregate_type
            .decode(&stored.event_type, stored.payload)
            .ok_or_else(|| {
                corrupt(format!(
                    "event {expected} has unregistered type {}",
                    stored.event_type
                ))
            })??;

        if aggregate.is_lifecycle_ended() {
            // Events after a lifecycle end belong to a new incarnation bound
            // to the same natural key.
            let revision = aggregate.revision();
            aggregate = aggregate_type.create()?;
            aggregate.root_mut().reset(revision, None);
        }
        aggregate.handle(&event);
        aggregate.root_mut().advance();
    }

    if aggregate.is_lifecycle_ended() {
        aggregate.root_mut().mark_ended_in_history();
    }
    let revision = aggregate.revision();
    if revision != stream.revision {
        return Err(corrupt(format!(
            "replayed to revision {revision} but the stream is at {}",
            stream.revision
        )));
    }
    aggregate.root_mut().reset(revision, stream.state);
    Ok(aggregate)
}

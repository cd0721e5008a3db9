//! Aggregate root abstraction.

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::store::{StateToken, StreamHead};

/// Persistence bookkeeping embedded in every aggregate root.
#[derive(Debug, Clone)]
pub struct RootState<E> {
    revision: u64,
    state: Option<StateToken>,
    uncommitted: Vec<E>,
    /// Index into `uncommitted` of the event that ended the lifecycle.
    ending_event: Option<usize>,
    ended: bool,
    /// The end was recorded by a committed or replayed event.
    ended_in_history: bool,
}

impl<E> Default for RootState<E> {
    fn default() -> Self {
        Self {
            revision: 0,
            state: None,
            uncommitted: Vec::new(),
            ending_event: None,
            ended: false,
            ended_in_history: false,
        }
    }
}

impl<E> RootState<E> {
    /// Creates bookkeeping for a brand-new aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last committed event plus the events raised
    /// since. A new incarnation counts from zero until its first save.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The state token observed at the last load or save.
    #[must_use]
    pub fn state(&self) -> Option<&StateToken> {
        self.state.as_ref()
    }

    /// Events raised since the last commit.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[E] {
        &self.uncommitted
    }

    /// Returns `true` once the lifecycle has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Marks the lifecycle as ended. Called from event handlers so that the
    /// transition survives replay.
    pub fn end_lifecycle(&mut self) {
        self.ended = true;
    }

    /// Returns `true` if the lifecycle was ended by an event that is part of
    /// the stream, as opposed to an unpersisted `end_lifecycle` call.
    #[must_use]
    pub fn is_ended_in_history(&self) -> bool {
        self.ended_in_history
    }

    /// Returns `true` if the uncommitted event at `index` ended the lifecycle.
    #[must_use]
    pub fn ends_lifecycle(&self, index: usize) -> bool {
        self.ending_event == Some(index)
    }

    /// Clears uncommitted events and moves to the stream head the store
    /// reported for the commit.
    pub fn commit(&mut self, head: StreamHead) {
        if self.ending_event.take().is_some() {
            self.ended_in_history = true;
        }
        self.uncommitted.clear();
        self.state = head.state;
        self.revision = head.revision;
    }

    fn record(&mut self, event: E, ended_by_it: bool) {
        if ended_by_it {
            self.ending_event = Some(self.uncommitted.len());
        }
        self.uncommitted.push(event);
        self.revision += 1;
    }

    pub(crate) fn advance(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn mark_ended_in_history(&mut self) {
        self.ended = true;
        self.ended_in_history = true;
    }

    pub(crate) fn reset(&mut self, revision: u64, state: Option<StateToken>) {
        self.revision = revision;
        self.state = state;
        self.uncommitted.clear();
        self.ending_event = None;
    }
}

/// Trait for aggregate roots that reconstitute from event history.
pub trait AggregateRoot: Send + Sync + Sized + 'static {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the embedded persistence bookkeeping.
    fn root(&self) -> &RootState<Self::Event>;

    /// Returns the embedded persistence bookkeeping mutably.
    fn root_mut(&mut self) -> &mut RootState<Self::Event>;

    /// Apply an event to mutate internal state, both live and during
    /// reconstitution.
    fn handle(&mut self, event: &Self::Event);

    /// Returns the current revision (number of events applied).
    fn revision(&self) -> u64 {
        self.root().revision()
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event] {
        self.root().uncommitted_events()
    }

    /// Returns `true` once the lifecycle has ended.
    fn is_lifecycle_ended(&self) -> bool {
        self.root().is_ended()
    }

    /// Applies a new event and queues it for the next save.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::LifecycleEnded` if the lifecycle has ended.
    fn raise(&mut self, event: Self::Event) -> Result<(), DomainError> {
        ensure_active::<Self>(self)?;
        self.handle(&event);
        let ended = self.root().is_ended();
        self.root_mut().record(event, ended);
        Ok(())
    }

    /// Ends the lifecycle without an event. The transition is not persisted;
    /// aggregates that must stay ended after a reload end their lifecycle
    /// from an event handler instead.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::LifecycleEnded` if the lifecycle already ended.
    fn end_lifecycle(&mut self) -> Result<(), DomainError> {
        ensure_active::<Self>(self)?;
        self.root_mut().end_lifecycle();
        Ok(())
    }
}

fn ensure_active<A: AggregateRoot>(aggregate: &A) -> Result<(), DomainError> {
    if aggregate.is_lifecycle_ended() {
        return Err(DomainError::LifecycleEnded {
            aggregate_type: std::any::type_name::<A>(),
        });
    }
    Ok(())
}

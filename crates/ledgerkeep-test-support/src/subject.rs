//! `Subject`: a minimal aggregate keyed by a string identifier.

use ledgerkeep_core::aggregate::{AggregateRoot, RootState};
use ledgerkeep_core::error::DomainError;
use ledgerkeep_core::event::DomainEvent;
use ledgerkeep_core::registry::{AggregateType, TypeRegistry};
use serde::{Deserialize, Serialize};

pub const CREATED: &str = "subject.created";
pub const DID_SOMETHING: &str = "subject.did_something";
pub const DESTROYED: &str = "subject.destroyed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCreated {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectDidSomething {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectDestroyed {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectEvent {
    Created(SubjectCreated),
    DidSomething(SubjectDidSomething),
    Destroyed(SubjectDestroyed),
}

impl DomainEvent for SubjectEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => CREATED,
            Self::DidSomething(_) => DID_SOMETHING,
            Self::Destroyed(_) => DESTROYED,
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Created(payload) => serde_json::to_value(payload),
            Self::DidSomething(payload) => serde_json::to_value(payload),
            Self::Destroyed(payload) => serde_json::to_value(payload),
        }
    }
}

/// Sample aggregate. Its natural key is `id`, unset until creation.
#[derive(Debug, Default)]
pub struct Subject {
    pub id: Option<String>,
    pub times_done: u32,
    root: RootState<SubjectEvent>,
}

/// Snapshot projection of [`Subject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMemento {
    pub id: Option<String>,
    pub times_done: u32,
}

impl Subject {
    /// Creates a subject bound to `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `id` is empty.
    pub fn create(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::Validation("subject id must not be empty".into()));
        }
        let mut subject = Self::default();
        subject.raise(SubjectEvent::Created(SubjectCreated { id }))?;
        Ok(subject)
    }

    /// Records that the subject did something.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::LifecycleEnded` once the subject is destroyed.
    pub fn do_something(&mut self) -> Result<(), DomainError> {
        self.raise(SubjectEvent::DidSomething(SubjectDidSomething {}))
    }

    /// Destroys the subject, ending its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::LifecycleEnded` if already destroyed.
    pub fn destroy(&mut self) -> Result<(), DomainError> {
        self.raise(SubjectEvent::Destroyed(SubjectDestroyed {}))
    }
}

impl AggregateRoot for Subject {
    type Event = SubjectEvent;

    fn root(&self) -> &RootState<SubjectEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut RootState<SubjectEvent> {
        &mut self.root
    }

    fn handle(&mut self, event: &SubjectEvent) {
        match event {
            SubjectEvent::Created(created) => self.id = Some(created.id.clone()),
            SubjectEvent::DidSomething(_) => self.times_done += 1,
            SubjectEvent::Destroyed(_) => self.root.end_lifecycle(),
        }
    }
}

/// Full registration for [`Subject`].
#[must_use]
pub fn subject_type() -> AggregateType<Subject> {
    AggregateType::named("subject")
        .natural_key(|subject: &Subject| subject.id.clone())
        .factory(Subject::default)
        .memento(
            |subject: &Subject| SubjectMemento {
                id: subject.id.clone(),
                times_done: subject.times_done,
            },
            |subject: &mut Subject, memento: SubjectMemento| {
                subject.id = memento.id;
                subject.times_done = memento.times_done;
            },
        )
        .event(CREATED, SubjectEvent::Created)
        .event(DID_SOMETHING, SubjectEvent::DidSomething)
        .event(DESTROYED, SubjectEvent::Destroyed)
}

/// A registry holding only [`subject_type`].
#[must_use]
pub fn registry() -> TypeRegistry {
    TypeRegistry::new().with(subject_type())
}

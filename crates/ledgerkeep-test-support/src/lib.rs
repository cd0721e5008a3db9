//! Shared test doubles and a sample aggregate for ledgerkeep.

mod clock;
mod stores;
mod subject;

pub use clock::ManualClock;
pub use stores::{
    EmptyEventStore, FailingEventStore, NoSnapshots, ReadCall, RecordingEventStore,
    RecordingNotifier,
};
pub use subject::{
    Subject, SubjectCreated, SubjectDestroyed, SubjectDidSomething, SubjectEvent, SubjectMemento,
    registry, subject_type,
};

//! In-memory reference implementations of the ledgerkeep store contracts.
//!
//! These stores keep everything in process memory. They implement the same
//! optimistic concurrency and ordering guarantees a durable adapter must.

pub mod event_store;
pub mod identity_map;
pub mod snapshot_store;

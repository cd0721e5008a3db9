//! ledgerkeep core: identity-stable storage for event-sourced aggregates.
//!
//! This crate defines the aggregate, identity map, event store and snapshot
//! store contracts, and the repository that executes the load/save protocol
//! against them. It contains no storage implementation.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod identity;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod store;

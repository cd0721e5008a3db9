//! Cross-process commit notifications for ledgerkeep.
//!
//! A store's commit path appends one length-prefixed JSON record per
//! committed event to a memory-mapped file and bumps a generation counter in
//! a companion signal file. Listener threads in any process on the machine
//! watch the counter, scan the new records and raise local notifications.
//! The channel is best effort and never a source of truth: observers re-read
//! authoritative state from the event store.

pub mod config;
pub mod error;
pub mod listener;
pub mod notifier;
pub mod record;
mod region;
mod signal;

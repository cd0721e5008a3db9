//! Notification channel error types.

use thiserror::Error;

/// Errors raised while writing to or reading from the notification region.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Opening, locking, mapping or flushing a backing file failed.
    #[error("notification file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("notification record serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The encoded record does not fit the 2-byte length prefix.
    #[error("notification record of {size} bytes exceeds the {max} byte limit")]
    RecordTooLarge { size: usize, max: usize },

    /// The record does not fit in the space left in the region.
    #[error("notification region is full: {needed} bytes needed at offset {offset} of {capacity}")]
    RegionFull {
        offset: usize,
        needed: usize,
        capacity: usize,
    },

    /// An environment setting could not be parsed.
    #[error("invalid notification configuration: {0}")]
    Configuration(String),
}

//! Notification channel configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::NotificationError;

/// File name of the region under the system temp directory.
pub const DEFAULT_FILE_NAME: &str = "ledgerkeep-notifications";

/// Default region size: 10 MiB.
pub const DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;

/// Default interval at which listeners check the signal file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Smallest region size accepted from the environment.
pub const MIN_CAPACITY: usize = 64;

/// Where the region lives and how listeners watch it. Writers and listeners
/// on one machine must agree on `region_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub region_path: PathBuf,
    pub capacity: usize,
    pub poll_interval: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            region_path: std::env::temp_dir().join(DEFAULT_FILE_NAME),
            capacity: DEFAULT_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl NotificationConfig {
    /// Uses `region_path` with default capacity and poll interval.
    #[must_use]
    pub fn at(region_path: impl Into<PathBuf>) -> Self {
        Self {
            region_path: region_path.into(),
            ..Self::default()
        }
    }

    /// Reads `LEDGERKEEP_NOTIFY_PATH`, `LEDGERKEEP_NOTIFY_CAPACITY` and
    /// `LEDGERKEEP_NOTIFY_POLL_MS`, falling back to the defaults for unset
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Configuration` if a variable is set but
    /// does not parse, or the capacity is below [`MIN_CAPACITY`].
    pub fn from_env() -> Result<Self, NotificationError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("LEDGERKEEP_NOTIFY_PATH") {
            config.region_path = PathBuf::from(path);
        }
        if let Ok(capacity) = std::env::var("LEDGERKEEP_NOTIFY_CAPACITY") {
            config.capacity = capacity.parse().map_err(|e| {
                NotificationError::Configuration(format!(
                    "LEDGERKEEP_NOTIFY_CAPACITY must be a byte count: {e}"
                ))
            })?;
        }
        if let Ok(poll_ms) = std::env::var("LEDGERKEEP_NOTIFY_POLL_MS") {
            let millis: u64 = poll_ms.parse().map_err(|e| {
                NotificationError::Configuration(format!(
                    "LEDGERKEEP_NOTIFY_POLL_MS must be a number of milliseconds: {e}"
                ))
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }
        if config.capacity < MIN_CAPACITY {
            return Err(NotificationError::Configuration(format!(
                "LEDGERKEEP_NOTIFY_CAPACITY must be at least {MIN_CAPACITY} bytes"
            )));
        }
        Ok(config)
    }

    /// Path of the companion file holding the generation counter and write
    /// offset.
    #[must_use]
    pub fn signal_path(&self) -> PathBuf {
        let mut path = self.region_path.clone().into_os_string();
        path.push(".signal");
        path.into()
    }
}

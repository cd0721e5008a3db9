//! Listener side of the notification channel.
//!
//! A listener owns one background thread. The thread sleeps on its shutdown
//! channel for one poll interval at a time; whenever the signal file's
//! contents have changed it scans the region from its cursor to the sentinel
//! and broadcasts what it found to local subscribers.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::NotificationError;
use crate::record::NotificationRecord;
use crate::region::{self, Slot};
use crate::signal::{SignalFile, SignalState};

/// Buffered notifications per subscriber before it starts lagging.
pub const CHANNEL_CAPACITY: usize = 256;

/// Local events raised after a scan that found new records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Carries the highest sequence number among the scanned records.
    EventCommitted { sequence_number: u64 },
    /// Always carries batch id 0; batches are not tracked yet.
    BatchPrepared { batch_id: u64 },
}

/// Handle to a running listener thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct NotificationListener {
    sender: broadcast::Sender<Notification>,
    shutdown: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationListener {
    /// Attaches to the region described by `config` and starts watching it.
    /// Neither file has to exist yet.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Io` if the thread cannot be spawned.
    pub fn start(config: NotificationConfig) -> Result<Self, NotificationError> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = mpsc::channel();
        let poll_interval = config.poll_interval;
        let region_path = config.region_path.display().to_string();
        let scanner = Scanner::attach(config);
        let events = sender.clone();
        let worker = thread::Builder::new()
            .name("ledgerkeep-notify".into())
            .spawn(move || run(scanner, &shutdown_rx, &events, poll_interval))?;
        info!(region_path, "notification listener started");
        Ok(Self {
            sender,
            shutdown: Some(shutdown),
            worker: Some(worker),
        })
    }

    /// Returns a receiver for notifications raised after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Stops the thread, waits for it to exit and removes the region and
    /// signal files.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The thread may already be gone; joining below still applies.
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("notification listener thread panicked");
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut scanner: Scanner,
    shutdown: &mpsc::Receiver<()>,
    events: &broadcast::Sender<Notification>,
    poll_interval: Duration,
) {
    loop {
        match shutdown.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        match scanner.scan() {
            Ok(Some(sequence_number)) => {
                // Sending fails only while nobody is subscribed.
                let _ = events.send(Notification::EventCommitted { sequence_number });
                let _ = events.send(Notification::BatchPrepared { batch_id: 0 });
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "notification scan failed"),
        }
    }
    scanner.remove_files();
    info!("notification listener stopped");
}

/// Read cursor over the region plus the last signal state acted on.
///
/// A changed region id means the region was deleted and recreated, so the
/// cursor goes back to the start.
#[derive(Debug)]
struct Scanner {
    config: NotificationConfig,
    cursor: usize,
    seen: Option<SignalState>,
}

impl Scanner {
    fn attach(config: NotificationConfig) -> Self {
        let seen = match current_state(&config) {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "could not read notification signal, watching for it");
                None
            }
        };
        Self {
            config,
            cursor: 0,
            seen,
        }
    }

    /// Scans new records if the signal moved since the last scan. Returns the
    /// highest sequence number decoded, or `None` if nothing new was read.
    fn scan(&mut self) -> Result<Option<u64>, NotificationError> {
        let Some(signal) = SignalFile::open(&self.config.signal_path())? else {
            return Ok(None);
        };
        let _lock = signal.lock_shared()?;
        let state = signal.read()?;
        if self.seen == Some(state) {
            return Ok(None);
        }
        let recreated = self
            .seen
            .is_some_and(|seen| seen.region_id != state.region_id);
        self.seen = Some(state);
        if recreated || state.offset < self.cursor as u64 {
            debug!(
                cursor = self.cursor,
                region_id = %state.region_id,
                "notification region was recreated, rewinding"
            );
            self.cursor = 0;
        }

        let Some(mapped) = region::map_for_read(&self.config.region_path)? else {
            return Ok(None);
        };
        let mut highest = None;
        loop {
            match region::read_slot(&mapped, self.cursor) {
                Slot::Record { body, next } => {
                    match NotificationRecord::decode(body) {
                        Ok(record) => {
                            highest = highest.max(Some(record.sequence_number));
                        }
                        Err(error) => {
                            warn!(
                                offset = self.cursor,
                                %error,
                                "skipping malformed notification record"
                            );
                        }
                    }
                    self.cursor = next;
                }
                Slot::End => break,
                Slot::Overrun { length } => {
                    warn!(
                        offset = self.cursor,
                        length,
                        "notification record overruns the region, stopping scan"
                    );
                    break;
                }
            }
        }
        Ok(highest)
    }

    fn remove_files(&self) {
        for path in [self.config.region_path.clone(), self.config.signal_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed notification file"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to remove notification file");
                }
            }
        }
    }
}

fn current_state(config: &NotificationConfig) -> io::Result<Option<SignalState>> {
    let Some(signal) = SignalFile::open(&config.signal_path())? else {
        return Ok(None);
    };
    let _lock = signal.lock_shared()?;
    Ok(Some(signal.read()?))
}

#[cfg(test)]
mod tests {
    use ledgerkeep_core::identity::StreamId;

    use super::*;
    use crate::notifier::SharedMemoryNotifier;

    fn config(dir: &tempfile::TempDir) -> NotificationConfig {
        NotificationConfig {
            capacity: 4_096,
            ..NotificationConfig::at(dir.path().join("region"))
        }
    }

    fn record(sequence_number: u64) -> NotificationRecord {
        NotificationRecord {
            stream_id: StreamId::new(),
            event_type: "subject.created".to_owned(),
            payload: "{}".to_owned(),
            sequence_number,
            state: "abc".to_owned(),
        }
    }

    #[test]
    fn test_scan_without_files_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = Scanner::attach(config(&dir));

        assert_eq!(scanner.scan().unwrap(), None);
    }

    #[test]
    fn test_scan_reports_highest_sequence_once_per_signal() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = Scanner::attach(config(&dir));
        let notifier = SharedMemoryNotifier::new(config(&dir));
        notifier.append(&[record(3), record(9), record(4)]).unwrap();

        // Act
        let first = scanner.scan().unwrap();
        let second = scanner.scan().unwrap();

        // Assert
        assert_eq!(first, Some(9));
        assert_eq!(second, None);
    }

    #[test]
    fn test_scan_resumes_from_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = Scanner::attach(config(&dir));
        let notifier = SharedMemoryNotifier::new(config(&dir));
        notifier.append(&[record(5)]).unwrap();
        scanner.scan().unwrap();

        notifier.append(&[record(2)]).unwrap();

        assert_eq!(scanner.scan().unwrap(), Some(2));
    }

    #[test]
    fn test_scan_skips_malformed_record() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let mut scanner = Scanner::attach(config.clone());
        let mut bytes = vec![0u8; 4_096];
        let next = region::write_slot(&mut bytes, 0, b"{broken").unwrap();
        let body = record(6).encode().unwrap();
        let end = region::write_slot(&mut bytes, next, &body).unwrap();
        std::fs::write(&config.region_path, &bytes).unwrap();
        let signal = SignalFile::create(&config.signal_path()).unwrap();
        signal
            .write(SignalState {
                generation: 1,
                offset: end as u64,
                ..SignalState::fresh_region()
            })
            .unwrap();

        // Act
        let highest = scanner.scan().unwrap();

        // Assert
        assert_eq!(highest, Some(6));
        assert_eq!(scanner.cursor, end);
    }

    #[test]
    fn test_scan_rewinds_when_region_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let mut scanner = Scanner::attach(config.clone());
        let notifier = SharedMemoryNotifier::new(config.clone());
        notifier.append(&[record(1), record(2)]).unwrap();
        scanner.scan().unwrap();
        scanner.remove_files();

        notifier.append(&[record(1)]).unwrap();

        assert_eq!(scanner.scan().unwrap(), Some(1));
    }

    #[test]
    fn test_scan_rewinds_when_recreated_region_grows_past_cursor() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let mut scanner = Scanner::attach(config.clone());
        let notifier = SharedMemoryNotifier::new(config.clone());
        notifier.append(&[record(1)]).unwrap();
        assert_eq!(scanner.scan().unwrap(), Some(1));
        let old_cursor = scanner.cursor;
        scanner.remove_files();

        // Act
        notifier
            .append(&[record(10), record(11), record(12)])
            .unwrap();
        let highest = scanner.scan().unwrap();

        // Assert
        assert_eq!(highest, Some(12));
        assert!(scanner.cursor > old_cursor);
    }

    #[test]
    fn test_attach_ignores_signals_raised_before_it() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SharedMemoryNotifier::new(config(&dir));
        notifier.append(&[record(1)]).unwrap();

        let mut scanner = Scanner::attach(config(&dir));

        assert_eq!(scanner.scan().unwrap(), None);
    }
}

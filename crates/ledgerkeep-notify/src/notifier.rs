//! Writer side of the notification channel.

use ledgerkeep_core::store::{CommitNotifier, CommittedBatch, PublishError};
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::error::NotificationError;
use crate::record::NotificationRecord;
use crate::region;
use crate::signal::{SignalFile, SignalState};

/// Publishes committed batches into the shared region.
///
/// Plug it into a store with `MemoryEventStore::with_notifier`. Records that
/// do not fit are dropped with a warning; the commit itself is never failed.
#[derive(Debug, Clone)]
pub struct SharedMemoryNotifier {
    config: NotificationConfig,
}

impl SharedMemoryNotifier {
    #[must_use]
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Appends `records` to the region and raises the signal once. Returns the
    /// number of records written.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Io` if the region or signal file cannot be
    /// opened, locked, mapped or flushed.
    pub fn append(&self, records: &[NotificationRecord]) -> Result<usize, NotificationError> {
        let signal = SignalFile::create(&self.config.signal_path())?;
        let _lock = signal.lock_exclusive()?;
        let mut state = signal.read()?;
        if state.region_id.is_nil() {
            state = SignalState::fresh_region();
            debug!(region_id = %state.region_id, "creating notification region");
        }

        let mut mapped = region::map_for_write(&self.config.region_path, self.config.capacity)?;
        let mut offset = usize::try_from(state.offset)
            .unwrap_or(usize::MAX)
            .min(mapped.len());

        let mut written = 0;
        for record in records {
            let body = match record.encode() {
                Ok(body) => body,
                Err(error @ NotificationError::RecordTooLarge { .. }) => {
                    warn!(
                        stream_id = %record.stream_id,
                        sequence_number = record.sequence_number,
                        %error,
                        "dropping oversized notification record"
                    );
                    continue;
                }
                Err(error) => return Err(error),
            };
            match region::write_slot(&mut mapped, offset, &body) {
                Ok(next) => {
                    offset = next;
                    written += 1;
                }
                Err(error) => {
                    warn!(
                        stream_id = %record.stream_id,
                        sequence_number = record.sequence_number,
                        %error,
                        "notification region exhausted, dropping remaining records"
                    );
                    break;
                }
            }
        }
        if written == 0 {
            return Ok(0);
        }

        mapped.flush()?;
        signal.write(SignalState {
            region_id: state.region_id,
            generation: state.generation.wrapping_add(1),
            offset: offset as u64,
        })?;
        debug!(records = written, offset, "raised notification signal");
        Ok(written)
    }
}

impl CommitNotifier for SharedMemoryNotifier {
    fn publish(&self, batch: &CommittedBatch) -> Result<(), PublishError> {
        let records: Vec<NotificationRecord> = batch
            .events
            .iter()
            .map(|event| NotificationRecord::from_event(event, &batch.state))
            .collect();
        self.append(&records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ledgerkeep_core::identity::StreamId;

    use super::*;
    use crate::region::{Slot, read_slot};

    fn record(sequence_number: u64, payload: String) -> NotificationRecord {
        NotificationRecord {
            stream_id: StreamId::new(),
            event_type: "subject.did_something".to_owned(),
            payload,
            sequence_number,
            state: "abc".to_owned(),
        }
    }

    fn notifier(dir: &tempfile::TempDir, capacity: usize) -> SharedMemoryNotifier {
        SharedMemoryNotifier::new(NotificationConfig {
            capacity,
            ..NotificationConfig::at(dir.path().join("region"))
        })
    }

    #[test]
    fn test_append_writes_records_and_bumps_generation() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let notifier = notifier(&dir, 4_096);

        // Act
        let written = notifier
            .append(&[record(1, "{}".into()), record(2, "{}".into())])
            .unwrap();

        // Assert
        assert_eq!(written, 2);
        let signal = SignalFile::open(&notifier.config().signal_path())
            .unwrap()
            .unwrap();
        let state = signal.read().unwrap();
        assert_eq!(state.generation, 1);
        assert!(!state.region_id.is_nil());
        let bytes = std::fs::read(&notifier.config().region_path).unwrap();
        assert_eq!(bytes.len(), 4_096);
        let Slot::Record { body, next } = read_slot(&bytes, 0) else {
            panic!("expected a record at offset 0");
        };
        assert_eq!(NotificationRecord::decode(body).unwrap().sequence_number, 1);
        let Slot::Record { next, .. } = read_slot(&bytes, next) else {
            panic!("expected a second record");
        };
        assert_eq!(next as u64, state.offset);
        assert_eq!(read_slot(&bytes, next), Slot::End);
    }

    #[test]
    fn test_appends_continue_from_previous_offset() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = notifier(&dir, 4_096);
        notifier.append(&[record(1, "{}".into())]).unwrap();

        notifier.append(&[record(2, "{}".into())]).unwrap();

        let bytes = std::fs::read(&notifier.config().region_path).unwrap();
        let Slot::Record { next, .. } = read_slot(&bytes, 0) else {
            panic!("expected a record at offset 0");
        };
        let Slot::Record { body, .. } = read_slot(&bytes, next) else {
            panic!("expected a second record");
        };
        assert_eq!(NotificationRecord::decode(body).unwrap().sequence_number, 2);
    }

    #[test]
    fn test_oversized_record_is_dropped_and_rest_written() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = notifier(&dir, 1024 * 1024);

        let written = notifier
            .append(&[record(1, "x".repeat(70_000)), record(2, "{}".into())])
            .unwrap();

        assert_eq!(written, 1);
    }

    #[test]
    fn test_full_region_drops_records_without_signalling() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let notifier = notifier(&dir, 64);

        // Act
        let written = notifier.append(&[record(1, "x".repeat(100))]).unwrap();

        // Assert
        assert_eq!(written, 0);
        let signal = SignalFile::open(&notifier.config().signal_path())
            .unwrap()
            .unwrap();
        assert_eq!(signal.read().unwrap().generation, 0);
    }
}

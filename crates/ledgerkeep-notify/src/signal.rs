//! Signal file: the region's identity, a generation counter and the region's
//! write offset.
//!
//! Writers bump the generation after flushing new records; listeners poll it
//! to learn that the region changed. A writer that finds no identity creates
//! a new region and stamps a fresh one. The file also carries the lock that
//! serializes writers and keeps readers off a half-written region.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::warn;
use uuid::Uuid;

const SIGNAL_LEN: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SignalState {
    /// Identity of the current region file; nil until a writer creates it.
    pub region_id: Uuid,
    pub generation: u64,
    /// Offset of the sentinel following the last written record.
    pub offset: u64,
}

impl SignalState {
    /// State of a region that is about to be written for the first time.
    pub fn fresh_region() -> Self {
        Self {
            region_id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    fn decode(bytes: [u8; SIGNAL_LEN]) -> Self {
        let mut region_id = [0u8; 16];
        let mut generation = [0u8; 8];
        let mut offset = [0u8; 8];
        region_id.copy_from_slice(&bytes[..16]);
        generation.copy_from_slice(&bytes[16..24]);
        offset.copy_from_slice(&bytes[24..]);
        Self {
            region_id: Uuid::from_bytes(region_id),
            generation: u64::from_le_bytes(generation),
            offset: u64::from_le_bytes(offset),
        }
    }

    fn encode(self) -> [u8; SIGNAL_LEN] {
        let mut bytes = [0u8; SIGNAL_LEN];
        bytes[..16].copy_from_slice(self.region_id.as_bytes());
        bytes[16..24].copy_from_slice(&self.generation.to_le_bytes());
        bytes[24..].copy_from_slice(&self.offset.to_le_bytes());
        bytes
    }
}

/// An open signal file.
#[derive(Debug)]
pub(crate) struct SignalFile {
    file: File,
}

impl SignalFile {
    /// Opens the signal file for writing, creating it if missing.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Opens an existing signal file for reading. `Ok(None)` if no writer has
    /// created it yet.
    pub fn open(path: &Path) -> io::Result<Option<Self>> {
        match File::open(path) {
            Ok(file) => Ok(Some(Self { file })),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Takes the writer lock. Blocks until other writers and readers let go.
    pub fn lock_exclusive(&self) -> io::Result<SignalLock<'_>> {
        self.file.lock()?;
        Ok(SignalLock { file: &self.file })
    }

    /// Takes a reader lock. Blocks while a writer holds the file.
    pub fn lock_shared(&self) -> io::Result<SignalLock<'_>> {
        self.file.lock_shared()?;
        Ok(SignalLock { file: &self.file })
    }

    /// Reads the current state. A new or truncated file reads as zero.
    pub fn read(&self) -> io::Result<SignalState> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = [0u8; SIGNAL_LEN];
        match file.read_exact(&mut bytes) {
            Ok(()) => Ok(SignalState::decode(bytes)),
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                Ok(SignalState::default())
            }
            Err(error) => Err(error),
        }
    }

    pub fn write(&self, state: SignalState) -> io::Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&state.encode())?;
        file.flush()
    }
}

/// Held lock on a signal file, released on drop.
#[derive(Debug)]
pub(crate) struct SignalLock<'a> {
    file: &'a File,
}

impl Drop for SignalLock<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.file.unlock() {
            warn!(%error, "failed to release notification signal lock");
        }
    }
}

//! Slot codec and memory mapping for the region file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::error::NotificationError;
use crate::record::LENGTH_PREFIX;

/// What a reader finds at an offset.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Slot<'a> {
    Record { body: &'a [u8], next: usize },
    /// Sentinel, or no room left for a prefix.
    End,
    /// The prefix claims more bytes than the region holds.
    Overrun { length: usize },
}

pub(crate) fn read_slot(region: &[u8], offset: usize) -> Slot<'_> {
    let Some(prefix) = region.get(offset..offset + LENGTH_PREFIX) else {
        return Slot::End;
    };
    let length = usize::from(u16::from_le_bytes([prefix[0], prefix[1]]));
    if length == 0 {
        return Slot::End;
    }
    let start = offset + LENGTH_PREFIX;
    match region.get(start..start + length) {
        Some(body) => Slot::Record {
            body,
            next: start + length,
        },
        None => Slot::Overrun { length },
    }
}

/// Writes `body` at `offset` and returns the offset after it.
///
/// The body and the trailing sentinel are written before the length prefix,
/// so a reader never sees a non-zero length ahead of a partial body.
pub(crate) fn write_slot(
    region: &mut [u8],
    offset: usize,
    body: &[u8],
) -> Result<usize, NotificationError> {
    let length = u16::try_from(body.len()).map_err(|_| NotificationError::RecordTooLarge {
        size: body.len(),
        max: usize::from(u16::MAX),
    })?;
    let start = offset + LENGTH_PREFIX;
    let end = start + body.len();
    if end + LENGTH_PREFIX > region.len() {
        return Err(NotificationError::RegionFull {
            offset,
            needed: body.len() + 2 * LENGTH_PREFIX,
            capacity: region.len(),
        });
    }
    region[start..end].copy_from_slice(body);
    region[end..end + LENGTH_PREFIX].fill(0);
    region[offset..start].copy_from_slice(&length.to_le_bytes());
    Ok(end)
}

/// Opens the region for writing, creating it zero-filled at `capacity` bytes
/// if it is missing or shorter.
pub(crate) fn map_for_write(path: &Path, capacity: usize) -> io::Result<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if file.metadata()?.len() < capacity as u64 {
        file.set_len(capacity as u64)?;
    }
    map_mut(&file)
}

/// Maps the region read-only. `Ok(None)` if the file does not exist or is
/// empty.
pub(crate) fn map_for_read(path: &Path) -> io::Result<Option<Mmap>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    map(&file).map(Some)
}

#[allow(unsafe_code)]
fn map_mut(file: &File) -> io::Result<MmapMut> {
    // SAFETY: the region is only written while the writer holds the
    // exclusive lock on the signal file, and readers hold the shared lock
    // for as long as they look at their mapping.
    unsafe { MmapMut::map_mut(file) }
}

#[allow(unsafe_code)]
fn map(file: &File) -> io::Result<Mmap> {
    // SAFETY: see `map_mut`; callers keep the shared signal lock while the
    // mapping is alive.
    unsafe { Mmap::map(file) }
}

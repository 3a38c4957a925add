//! File-backed node store.
//!
//! Every node occupies one slot of the backing file. A slot holds a small
//! record header (payload length and CRC32 of the payload) followed by the
//! payload, padded to a multiple of [`SLOT_ALIGN`]. The slot directory lives
//! in memory only: the file is scratch space for a single cache instance and
//! is truncated when the store is created or cleared.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{NodeId, NodeStore};
use crate::errors::{CacheError, CacheResult};

/// Slot sizes are rounded up to this many bytes
const SLOT_ALIGN: u64 = 256;

/// Length (u32) + checksum (u32)
const RECORD_HEADER: u64 = 8;

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    capacity: u64,
}

struct DiskState {
    file: File,
    slots: HashMap<NodeId, Slot>,
    free: Vec<Slot>,
    end: u64,
}

impl DiskState {
    /// Finds room for a record of `needed` bytes, reusing freed slots first.
    fn allocate(&mut self, needed: u64) -> Slot {
        if let Some(pos) = self.free.iter().position(|s| s.capacity >= needed) {
            return self.free.swap_remove(pos);
        }
        let capacity = needed.div_ceil(SLOT_ALIGN) * SLOT_ALIGN;
        let slot = Slot {
            offset: self.end,
            capacity,
        };
        self.end += capacity;
        slot
    }
}

/// A node store writing node bytes into a single file.
pub struct DiskNodeStore {
    state: Mutex<DiskState>,
    path: PathBuf,
}

impl DiskNodeStore {
    /// Creates (or truncates) the backing file at `path`.
    pub fn create(path: impl AsRef<Path>) -> CacheResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        log::debug!("Created disk node store at {:?}", path.as_ref());
        Ok(Self {
            state: Mutex::new(DiskState {
                file,
                slots: HashMap::new(),
                free: Vec::new(),
                end: 0,
            }),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of nodes currently stored.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the backing file in bytes, including freed slots.
    pub fn file_size(&self) -> u64 {
        self.state.lock().end
    }
}

impl NodeStore for DiskNodeStore {
    fn read(&self, id: NodeId) -> CacheResult<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        let slot = match state.slots.get(&id) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        state.file.seek(SeekFrom::Start(slot.offset))?;
        let mut header = [0u8; RECORD_HEADER as usize];
        state.file.read_exact(&mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if len as u64 + RECORD_HEADER > slot.capacity {
            return Err(CacheError::Store(format!(
                "corrupt record header for {}: length {} exceeds slot",
                id, len
            )));
        }

        let mut bytes = vec![0u8; len];
        state.file.read_exact(&mut bytes)?;

        let actual = crc32(&bytes);
        if actual != expected {
            return Err(CacheError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Node checksum mismatch for {} (expected: {:x}, got: {:x})",
                    id, expected, actual
                ),
            )));
        }
        Ok(Some(bytes))
    }

    fn write(&self, id: NodeId, bytes: &[u8]) -> CacheResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CacheError::Store(format!("node {} too large: {} bytes", id, bytes.len()))
        })?;
        let needed = bytes.len() as u64 + RECORD_HEADER;

        let mut state = self.state.lock();
        let slot = match state.slots.get(&id).copied() {
            Some(slot) if slot.capacity >= needed => slot,
            Some(slot) => {
                state.free.push(slot);
                state.allocate(needed)
            }
            None => state.allocate(needed),
        };

        let mut record = Vec::with_capacity(needed as usize);
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&crc32(bytes).to_le_bytes());
        record.extend_from_slice(bytes);

        state.file.seek(SeekFrom::Start(slot.offset))?;
        state.file.write_all(&record)?;
        state.slots.insert(id, slot);
        Ok(())
    }

    fn remove(&self, id: NodeId) -> CacheResult<()> {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.remove(&id) {
            state.free.push(slot);
        }
        Ok(())
    }

    fn clear(&self) -> CacheResult<()> {
        let mut state = self.state.lock();
        state.file.set_len(0)?;
        state.slots.clear();
        state.free.clear();
        state.end = 0;
        Ok(())
    }

    fn flush(&self) -> CacheResult<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }
}

/// CRC32-MPEG2 over `data`
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    const POLY: u32 = 0x04C11DB7;

    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x80000000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }

    crc ^ 0xFFFFFFFF
}

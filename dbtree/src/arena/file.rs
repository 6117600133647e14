//! File-backed arena.
//!
//! A [`HeapArena`] whose image is persisted to a single file on `sync()` and
//! reloaded by `open()`. Offsets are stable across the round trip, so a tree
//! root offset saved by the caller can be reopened after a restart.
//!
//! # File Format
//!
//! ```text
//! magic            8 bytes  "DBTARENA"
//! format_version   u32
//! capacity         u64
//! data_len         u64
//! live_count       u64
//! free_count       u64
//! blocks           (offset u64, size u64) * (live_count + free_count)
//! data             data_len bytes
//! checksum         u32 CRC32 of everything above
//! ```
//!
//! All integers are little-endian.

// Image lengths are u64 on disk and usize in memory.
#![allow(clippy::cast_possible_truncation)]

#[cfg(unix)]
use std::fs::File;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::arena::heap::HeapArena;
use crate::arena::{Arena, ArenaError, Offset};

/// Magic number identifying an arena image: "DBTARENA"
pub const MAGIC: [u8; 8] = *b"DBTARENA";

/// Current image format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header size before the block table.
const HEADER_SIZE: usize = 8 + 4 + 8 * 4;

/// An arena persisted to a file.
#[derive(Debug)]
pub struct FileArena {
    heap: HeapArena,
    path: PathBuf,
}

impl FileArena {
    /// Create a new, empty arena file.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, ArenaError> {
        if path.exists() {
            return Err(ArenaError::AlreadyExists(path.to_path_buf()));
        }

        let arena = Self {
            heap: HeapArena::with_capacity(capacity),
            path: path.to_path_buf(),
        };
        arena.sync()?;
        tracing::debug!("created arena file {}", path.display());
        Ok(arena)
    }

    /// Open an existing arena file and validate its image.
    pub fn open(path: &Path) -> Result<Self, ArenaError> {
        let bytes = fs::read(path)?;
        let heap = decode_image(&bytes)?;
        tracing::debug!(
            "opened arena file {} ({} live allocations)",
            path.display(),
            heap.live_allocations()
        );
        Ok(Self {
            heap,
            path: path.to_path_buf(),
        })
    }

    /// Write the current image to disk.
    ///
    /// The image is written to a sibling temporary file and renamed over the
    /// arena file, so a crash leaves either the old or the new image.
    pub fn sync(&self) -> Result<(), ArenaError> {
        let image = encode_image(&self.heap);
        let tmp_path = self.path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&image)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        #[cfg(unix)]
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Persist the rename itself
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory arena.
    #[must_use]
    pub const fn heap(&self) -> &HeapArena {
        &self.heap
    }
}

impl Arena for FileArena {
    fn allocate(&mut self, size: usize) -> Result<Offset, ArenaError> {
        self.heap.allocate(size)
    }

    fn free(&mut self, offset: Offset) -> Result<(), ArenaError> {
        self.heap.free(offset)
    }

    fn read(&self, offset: Offset, buf: &mut [u8]) -> Result<(), ArenaError> {
        self.heap.read(offset, buf)
    }

    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), ArenaError> {
        self.heap.write(offset, bytes)
    }
}

fn encode_image(heap: &HeapArena) -> Vec<u8> {
    let live = heap.live_blocks();
    let free = heap.free_blocks();
    let data = heap.as_bytes();

    let mut image = Vec::with_capacity(HEADER_SIZE + (live.len() + free.len()) * 16 + data.len() + 4);
    image.extend_from_slice(&MAGIC);
    image.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    image.extend_from_slice(&(heap.capacity() as u64).to_le_bytes());
    image.extend_from_slice(&(data.len() as u64).to_le_bytes());
    image.extend_from_slice(&(live.len() as u64).to_le_bytes());
    image.extend_from_slice(&(free.len() as u64).to_le_bytes());
    for (offset, size) in live.iter().chain(free.iter()) {
        image.extend_from_slice(&offset.to_le_bytes());
        image.extend_from_slice(&(*size as u64).to_le_bytes());
    }
    image.extend_from_slice(data);

    let checksum = crc32fast::hash(&image);
    image.extend_from_slice(&checksum.to_le_bytes());
    image
}

/// Little-endian reader over an image with bounds checking.
struct ImageReader<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> ImageReader<'b> {
    const fn new(bytes: &'b [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'b [u8], ArenaError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| ArenaError::Corrupt("truncated arena image".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, ArenaError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, ArenaError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn blocks(&mut self, count: u64) -> Result<Vec<(Offset, usize)>, ArenaError> {
        (0..count)
            .map(|_| Ok((self.u64()?, self.u64()? as usize)))
            .collect()
    }
}

fn decode_image(bytes: &[u8]) -> Result<HeapArena, ArenaError> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(ArenaError::Corrupt("arena image too short".to_string()));
    }

    let (body, stored) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(ArenaError::Corrupt(format!(
            "checksum mismatch: expected {stored:#010x}, got {computed:#010x}"
        )));
    }

    let mut reader = ImageReader::new(body);
    if reader.take(8)? != MAGIC {
        return Err(ArenaError::Corrupt("bad magic".to_string()));
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(ArenaError::Corrupt(format!("unsupported format version {version}")));
    }

    let capacity = reader.u64()? as usize;
    let data_len = reader.u64()? as usize;
    let live_count = reader.u64()?;
    let free_count = reader.u64()?;
    let live = reader.blocks(live_count)?;
    let free = reader.blocks(free_count)?;
    let data = reader.take(data_len)?.to_vec();

    HeapArena::from_parts(data, &live, &free, capacity)
}

//! Offset-addressed memory arenas.
//!
//! The tree engine never holds native pointers into tree memory. Every node,
//! record body and root descriptor is named by an [`Offset`] and accessed
//! through the [`Arena`] contract, so the same tree can live in ordinary heap
//! memory or in a durable image that is reloaded after a restart.
//!
//! # Usage
//!
//! ```
//! use dbtree::arena::{Arena, HeapArena, NULL_OFFSET};
//!
//! let mut arena = HeapArena::new();
//! let offset = arena.allocate(16)?;
//! assert_ne!(offset, NULL_OFFSET);
//!
//! arena.write_u64(offset, 42)?;
//! assert_eq!(arena.read_u64(offset)?, 42);
//!
//! arena.free(offset)?;
//! # Ok::<(), dbtree::ArenaError>(())
//! ```

mod file;
mod heap;

use std::path::PathBuf;

pub use file::FileArena;
pub use heap::HeapArena;

/// Location of an allocation inside an arena.
pub type Offset = u64;

/// Offset that never names an allocation; used for "no node" / empty tree.
pub const NULL_OFFSET: Offset = 0;

/// The allocate/free/read/write contract the engine consumes.
///
/// Implementations must never return [`NULL_OFFSET`] from `allocate` and must
/// hand out zeroed memory.
pub trait Arena {
    /// Allocate `size` bytes and return their offset.
    fn allocate(&mut self, size: usize) -> Result<Offset, ArenaError>;

    /// Release an allocation previously returned by `allocate`.
    fn free(&mut self, offset: Offset) -> Result<(), ArenaError>;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: Offset, buf: &mut [u8]) -> Result<(), ArenaError>;

    /// Copy `bytes` into the arena starting at `offset`.
    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), ArenaError>;

    /// Read `len` bytes into a fresh vector.
    fn read_vec(&self, offset: Offset, len: usize) -> Result<Vec<u8>, ArenaError> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read a little-endian u64.
    fn read_u64(&self, offset: Offset) -> Result<u64, ArenaError> {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write a little-endian u64.
    fn write_u64(&mut self, offset: Offset, value: u64) -> Result<(), ArenaError> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// Errors that can occur when working with an arena.
#[derive(Debug)]
pub enum ArenaError {
    /// The arena has no room for an allocation of this size.
    OutOfMemory { size: usize },
    /// The offset does not name a live allocation.
    InvalidOffset(Offset),
    /// An access falls outside the arena.
    OutOfBounds { offset: Offset, len: usize },
    /// Backing file already exists.
    AlreadyExists(PathBuf),
    /// Persisted arena image failed validation.
    Corrupt(String),
    /// I/O error on the backing file.
    Io(std::io::Error),
}

impl std::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfMemory { size } => write!(f, "out of memory allocating {size} bytes"),
            Self::InvalidOffset(offset) => write!(f, "invalid offset: {offset}"),
            Self::OutOfBounds { offset, len } => {
                write!(f, "access of {len} bytes at offset {offset} is out of bounds")
            }
            Self::AlreadyExists(path) => write!(f, "arena file already exists: {}", path.display()),
            Self::Corrupt(message) => write!(f, "corrupt arena image: {message}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ArenaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArenaError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

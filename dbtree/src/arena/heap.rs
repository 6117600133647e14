//! Heap-backed arena.
//!
//! Allocations are carved from one growable byte buffer and named by their
//! byte offset into it. Freed blocks are kept on per-size free lists and
//! reused by later allocations of the same rounded size.

// Offsets are u64 but buffer indices are usize. On 64-bit systems these are the same size.
#![allow(clippy::cast_possible_truncation)]

use std::collections::{BTreeMap, HashMap};

use crate::arena::{Arena, ArenaError, NULL_OFFSET, Offset};
use crate::config::EngineConfig;

/// Allocation granularity in bytes.
pub const ALIGNMENT: usize = 8;

/// Bytes reserved at the start of the buffer so that offset 0 stays null.
const RESERVED: usize = ALIGNMENT;

/// Round `size` up to the allocation granularity (minimum one unit).
#[must_use]
pub const fn rounded_size(size: usize) -> usize {
    let size = if size == 0 { 1 } else { size };
    size.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// An arena that lives in process memory.
///
/// # Invariants
///
/// - `data.len() >= RESERVED`, so [`NULL_OFFSET`] is never handed out
/// - every live offset maps to its rounded size in `live`
/// - every offset on a free list is absent from `live`
#[derive(Debug)]
pub struct HeapArena {
    /// Backing bytes.
    data: Vec<u8>,
    /// Live allocations: offset -> rounded size.
    live: HashMap<Offset, usize>,
    /// Freed blocks by rounded size.
    free_lists: BTreeMap<usize, Vec<Offset>>,
    /// Maximum size of `data` in bytes, 0 for unbounded.
    capacity: usize,
    /// Sum of live allocation sizes.
    allocated_bytes: usize,
}

impl HeapArena {
    /// Create an unbounded arena.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an arena that refuses to grow past `capacity` bytes (0 = unbounded).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; RESERVED],
            live: HashMap::new(),
            free_lists: BTreeMap::new(),
            capacity,
            allocated_bytes: 0,
        }
    }

    /// Create an arena sized by the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_capacity(config.arena_capacity)
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Total bytes held by live allocations (after rounding).
    #[must_use]
    pub const fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Size of the backing buffer, including freed blocks.
    #[must_use]
    pub fn footprint(&self) -> usize {
        self.data.len()
    }

    /// Configured capacity, 0 for unbounded.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `offset` names a live allocation.
    #[must_use]
    pub fn is_live(&self, offset: Offset) -> bool {
        self.live.contains_key(&offset)
    }

    /// Raw backing bytes.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Live allocations sorted by offset.
    pub(crate) fn live_blocks(&self) -> Vec<(Offset, usize)> {
        let mut blocks: Vec<(Offset, usize)> = self.live.iter().map(|(&o, &s)| (o, s)).collect();
        blocks.sort_unstable();
        blocks
    }

    /// Free blocks sorted by offset.
    pub(crate) fn free_blocks(&self) -> Vec<(Offset, usize)> {
        let mut blocks: Vec<(Offset, usize)> = self
            .free_lists
            .iter()
            .flat_map(|(&size, offsets)| offsets.iter().map(move |&o| (o, size)))
            .collect();
        blocks.sort_unstable();
        blocks
    }

    /// Rebuild an arena from a persisted image.
    ///
    /// Validates that every block lies inside `data`, that no block overlaps
    /// the reserved prefix and that no offset is listed twice.
    pub(crate) fn from_parts(
        data: Vec<u8>,
        live: &[(Offset, usize)],
        free: &[(Offset, usize)],
        capacity: usize,
    ) -> Result<Self, ArenaError> {
        if data.len() < RESERVED {
            return Err(ArenaError::Corrupt("arena image shorter than its header".to_string()));
        }

        let mut arena = Self {
            data,
            live: HashMap::with_capacity(live.len()),
            free_lists: BTreeMap::new(),
            capacity,
            allocated_bytes: 0,
        };

        let mut seen = HashMap::with_capacity(live.len() + free.len());
        for &(offset, size) in live.iter().chain(free.iter()) {
            let end = (offset as usize).checked_add(size);
            if (offset as usize) < RESERVED
                || size == 0
                || size % ALIGNMENT != 0
                || end.is_none_or(|end| end > arena.data.len())
            {
                return Err(ArenaError::Corrupt(format!(
                    "block at offset {offset} with size {size} lies outside the image"
                )));
            }
            if seen.insert(offset, size).is_some() {
                return Err(ArenaError::Corrupt(format!("offset {offset} listed twice")));
            }
        }

        for &(offset, size) in live {
            arena.live.insert(offset, size);
            arena.allocated_bytes += size;
        }
        for &(offset, size) in free {
            arena.free_lists.entry(size).or_default().push(offset);
        }

        Ok(arena)
    }

    fn check_bounds(&self, offset: Offset, len: usize) -> Result<usize, ArenaError> {
        let start = offset as usize;
        if offset == NULL_OFFSET || start.checked_add(len).is_none_or(|end| end > self.data.len()) {
            return Err(ArenaError::OutOfBounds { offset, len });
        }
        Ok(start)
    }
}

impl Default for HeapArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for HeapArena {
    fn allocate(&mut self, size: usize) -> Result<Offset, ArenaError> {
        let rounded = rounded_size(size);

        // Reuse a freed block of the same size class first
        if let Some(offset) = self.free_lists.get_mut(&rounded).and_then(Vec::pop) {
            let start = offset as usize;
            self.data[start..start + rounded].fill(0);
            self.live.insert(offset, rounded);
            self.allocated_bytes += rounded;
            return Ok(offset);
        }

        let start = self.data.len();
        let end = start + rounded;
        if self.capacity != 0 && end > self.capacity {
            return Err(ArenaError::OutOfMemory { size });
        }

        self.data.resize(end, 0);
        let offset = start as Offset;
        self.live.insert(offset, rounded);
        self.allocated_bytes += rounded;
        Ok(offset)
    }

    fn free(&mut self, offset: Offset) -> Result<(), ArenaError> {
        let size = self
            .live
            .remove(&offset)
            .ok_or(ArenaError::InvalidOffset(offset))?;
        self.allocated_bytes -= size;
        self.free_lists.entry(size).or_default().push(offset);
        Ok(())
    }

    fn read(&self, offset: Offset, buf: &mut [u8]) -> Result<(), ArenaError> {
        let start = self.check_bounds(offset, buf.len())?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), ArenaError> {
        let start = self.check_bounds(offset, bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_aligned_and_never_null() {
        let mut arena = HeapArena::new();
        for size in [1usize, 7, 8, 9, 100] {
            let offset = arena.allocate(size).expect("allocate");
            assert_ne!(offset, NULL_OFFSET);
            assert_eq!(offset as usize % ALIGNMENT, 0);
        }
        assert_eq!(arena.live_allocations(), 5);
    }

    #[test]
    fn test_freed_block_is_reused_zeroed() {
        let mut arena = HeapArena::new();
        let first = arena.allocate(24).expect("allocate");
        arena.write(first, &[0xAB; 24]).expect("write");
        arena.free(first).expect("free");

        let second = arena.allocate(20).expect("allocate again");
        assert_eq!(first, second);
        assert_eq!(arena.read_vec(second, 24).expect("read"), vec![0u8; 24]);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut arena = HeapArena::new();
        let offset = arena.allocate(8).expect("allocate");
        arena.free(offset).expect("free");
        assert!(matches!(arena.free(offset), Err(ArenaError::InvalidOffset(o)) if o == offset));
    }

    #[test]
    fn test_capacity_limit_reports_out_of_memory() {
        let mut arena = HeapArena::with_capacity(64);
        let offset = arena.allocate(48).expect("fits");
        assert!(matches!(
            arena.allocate(16),
            Err(ArenaError::OutOfMemory { size: 16 })
        ));

        // Freed space of the same size class is still usable
        arena.free(offset).expect("free");
        arena.allocate(48).expect("reuse after free");
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut arena = HeapArena::new();
        let offset = arena.allocate(8).expect("allocate");
        let mut buf = [0u8; 16];
        assert!(matches!(
            arena.read(offset, &mut buf),
            Err(ArenaError::OutOfBounds { .. })
        ));
        assert!(matches!(
            arena.write(NULL_OFFSET, &[1]),
            Err(ArenaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_accounting() {
        let mut arena = HeapArena::new();
        let a = arena.allocate(10).expect("allocate");
        let _b = arena.allocate(30).expect("allocate");
        assert_eq!(arena.allocated_bytes(), 16 + 32);
        arena.free(a).expect("free");
        assert_eq!(arena.allocated_bytes(), 32);
        assert_eq!(arena.live_allocations(), 1);
        assert_eq!(arena.free_blocks(), vec![(a, 16)]);

        // Reusing the freed block does not grow the buffer
        assert_eq!(arena.footprint(), 8 + 16 + 32);
        arena.allocate(12).expect("allocate");
        assert_eq!(arena.footprint(), 8 + 16 + 32);
        arena.allocate(12).expect("allocate");
        assert_eq!(arena.footprint(), 8 + 16 + 32 + 16);
    }

    #[test]
    fn test_from_parts_rejects_overlapping_header() {
        let result = HeapArena::from_parts(vec![0u8; 64], &[(0, 8)], &[], 0);
        assert!(matches!(result, Err(ArenaError::Corrupt(_))));
    }
}

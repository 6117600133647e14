//! Root descriptor.
//!
//! The only persistent state of a tree outside its nodes. It lives either in
//! its own arena allocation or embedded in a caller's structure.
//!
//! ```text
//! node_size    u8    record capacity of the root node
//! order        u8
//! depth        u16   0 = empty tree
//! class        u32   0 = no tree
//! features     u64
//! generation   u64
//! node         u64   root node offset, 0 when empty
//! ```

use crate::arena::{Arena, NULL_OFFSET, Offset};
use crate::btree::class::Features;
use crate::btree::{MAX_ORDER, MIN_ORDER};
use crate::error::BTreeError;

/// Size of a root descriptor in bytes.
pub const ROOT_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RootDescriptor {
    /// Record capacity of the current root node. Below `order` only for a
    /// dynamic root that has not grown yet.
    pub node_size: u8,
    pub order: u8,
    pub depth: u16,
    pub class: u32,
    pub features: Features,
    /// Bumped on every structural change.
    pub generation: u64,
    pub node: Offset,
}

impl RootDescriptor {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ROOT_SIZE] {
        let mut bytes = [0u8; ROOT_SIZE];
        bytes[0] = self.node_size;
        bytes[1] = self.order;
        bytes[2..4].copy_from_slice(&self.depth.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.class.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.features.bits().to_le_bytes());
        bytes[16..24].copy_from_slice(&self.generation.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.node.to_le_bytes());
        bytes
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; ROOT_SIZE]) -> Self {
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        Self {
            node_size: bytes[0],
            order: bytes[1],
            depth: u16::from_le_bytes([bytes[2], bytes[3]]),
            class: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            features: Features::from_bits(u64_at(8)),
            generation: u64_at(16),
            node: u64_at(24),
        }
    }

    pub fn read(arena: &dyn Arena, offset: Offset) -> Result<Self, BTreeError> {
        let mut bytes = [0u8; ROOT_SIZE];
        arena.read(offset, &mut bytes)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn write(&self, arena: &mut dyn Arena, offset: Offset) -> Result<(), BTreeError> {
        arena.write(offset, &self.to_bytes())?;
        Ok(())
    }

    /// Whether the descriptor holds no tree.
    #[must_use]
    pub const fn is_vacant(&self) -> bool {
        self.class == 0
    }

    /// Check the fields that do not depend on the class.
    pub fn validate(&self) -> Result<(), BTreeError> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&self.order) {
            return Err(BTreeError::corrupt(format!("order {} out of range", self.order)));
        }
        if (self.depth == 0) != (self.node == NULL_OFFSET) {
            return Err(BTreeError::corrupt(format!(
                "depth {} disagrees with root node {}",
                self.depth, self.node
            )));
        }
        if self.depth > 0 && (self.node_size == 0 || self.node_size > self.order) {
            return Err(BTreeError::corrupt(format!(
                "root capacity {} invalid for order {}",
                self.node_size, self.order
            )));
        }
        if self.depth > 1 && self.node_size != self.order {
            return Err(BTreeError::corrupt("internal root below full order"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;

    fn sample() -> RootDescriptor {
        RootDescriptor {
            node_size: 4,
            order: 4,
            depth: 2,
            class: 7,
            features: Features::UINT_KEY | Features::DYNAMIC_ROOT,
            generation: 42,
            node: 128,
        }
    }

    #[test]
    fn test_write_read() {
        let mut arena = HeapArena::new();
        let offset = arena.allocate(ROOT_SIZE).expect("allocate");
        sample().write(&mut arena, offset).expect("write");
        assert_eq!(RootDescriptor::read(&arena, offset).expect("read"), sample());
    }

    #[test]
    fn test_zeroed_descriptor_is_vacant() {
        assert!(RootDescriptor::from_bytes(&[0u8; ROOT_SIZE]).is_vacant());
        assert!(!sample().is_vacant());
    }

    #[test]
    fn test_validate() {
        sample().validate().expect("valid root");

        let bad_order = RootDescriptor { order: 64, ..sample() };
        assert!(matches!(bad_order.validate(), Err(BTreeError::Corrupt(_))));

        let dangling = RootDescriptor { node: NULL_OFFSET, ..sample() };
        assert!(matches!(dangling.validate(), Err(BTreeError::Corrupt(_))));

        let small_internal_root = RootDescriptor { node_size: 2, ..sample() };
        assert!(matches!(small_internal_root.validate(), Err(BTreeError::Corrupt(_))));
    }
}

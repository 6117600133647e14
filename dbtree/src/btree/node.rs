//! Node and record layout.
//!
//! A node is a single arena allocation:
//!
//! ```text
//! flags        u16   LEAF = 1, ROOT = 2
//! keyn         u16   number of records
//! pad          u32
//! generation   u64   root generation when the node was last written
//! child        u64   leftmost child (internal nodes), 0 for leaves
//! records      keyn * (body u64 + inline key)
//! ```
//!
//! The inline key area is `hkey_size` bytes for hashed trees and 8 bytes for
//! integer and direct-key trees. Nodes are read into a [`Node`], changed in
//! memory and written back whole.

// Record counts are bounded by the order (at most 63) and fit in u16.
#![allow(clippy::cast_possible_truncation)]

use crate::arena::{Arena, NULL_OFFSET, Offset};
use crate::btree::class::{Features, InlineKey, Record};
use crate::btree::HKEY_MAX;
use crate::error::BTreeError;

/// Size of the node header in bytes.
pub const NODE_HEADER_SIZE: usize = 24;

/// Node is a leaf.
pub const NODE_LEAF: u16 = 1;
/// Node is the root.
pub const NODE_ROOT: u16 = 1 << 1;

const KNOWN_FLAGS: u16 = NODE_LEAF | NODE_ROOT;

/// Size of a record's body offset.
const BODY_SIZE: usize = 8;

/// How inline keys are stored, fixed for the lifetime of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Hashed { size: usize },
    Uint,
    Direct,
}

impl KeyMode {
    /// Pick the key mode for a tree instance.
    pub fn select(features: Features, hkey_size: usize) -> Result<Self, BTreeError> {
        let uint = features.contains(Features::UINT_KEY);
        let direct = features.contains(Features::DIRECT_KEY);
        match (uint, direct) {
            (true, true) => Err(BTreeError::invalid(
                "integer keys and direct keys cannot be combined",
            )),
            (true, false) => Ok(Self::Uint),
            (false, true) => Ok(Self::Direct),
            (false, false) if (1..=HKEY_MAX).contains(&hkey_size) => {
                Ok(Self::Hashed { size: hkey_size })
            }
            (false, false) => Err(BTreeError::invalid(
                "class has no hashed key; enable integer or direct keys",
            )),
        }
    }

    /// Bytes of inline key per record.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Hashed { size } => size,
            Self::Uint | Self::Direct => 8,
        }
    }

    /// Bytes per record in a node.
    #[must_use]
    pub const fn record_size(self) -> usize {
        BODY_SIZE + self.key_len()
    }

    /// Bytes of a node holding up to `capacity` records.
    #[must_use]
    pub const fn node_size(self, capacity: usize) -> usize {
        NODE_HEADER_SIZE + capacity * self.record_size()
    }

    fn encode_record(self, rec: &Record, out: &mut Vec<u8>) {
        out.extend_from_slice(&rec.body.to_le_bytes());
        match (&rec.key, self) {
            (InlineKey::Hashed(hkey), Self::Hashed { size }) => {
                let len = hkey.len().min(size);
                out.extend_from_slice(&hkey[..len]);
                out.resize(out.len() + size - len, 0);
            }
            (InlineKey::Uint(key), _) => out.extend_from_slice(&key.to_le_bytes()),
            (InlineKey::Direct(offset), _) => out.extend_from_slice(&offset.to_le_bytes()),
            (InlineKey::Hashed(_), _) => out.resize(out.len() + self.key_len(), 0),
        }
    }

    fn decode_record(self, bytes: &[u8]) -> Record {
        let body = read_u64(bytes, 0);
        let key = match self {
            Self::Hashed { size } => InlineKey::Hashed(bytes[BODY_SIZE..BODY_SIZE + size].to_vec()),
            Self::Uint => InlineKey::Uint(read_u64(bytes, BODY_SIZE)),
            Self::Direct => InlineKey::Direct(read_u64(bytes, BODY_SIZE)),
        };
        Record { body, key }
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// In-memory copy of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub flags: u16,
    pub generation: u64,
    /// Leftmost child; [`NULL_OFFSET`] for leaves.
    pub child: Offset,
    pub records: Vec<Record>,
}

impl Node {
    /// A leaf holding `records`.
    #[must_use]
    pub const fn leaf(records: Vec<Record>) -> Self {
        Self {
            flags: NODE_LEAF,
            generation: 0,
            child: NULL_OFFSET,
            records,
        }
    }

    /// An internal node whose leftmost child is `child`.
    #[must_use]
    pub const fn internal(child: Offset, records: Vec<Record>) -> Self {
        Self {
            flags: 0,
            generation: 0,
            child,
            records,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.flags & NODE_LEAF != 0
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.flags & NODE_ROOT != 0
    }

    pub const fn set_root(&mut self, root: bool) {
        if root {
            self.flags |= NODE_ROOT;
        } else {
            self.flags &= !NODE_ROOT;
        }
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Child `i` of an internal node: `child` for 0, else `records[i - 1].body`.
    ///
    /// Out-of-range indices yield [`NULL_OFFSET`], which the arena rejects.
    #[must_use]
    pub fn child_at(&self, i: usize) -> Offset {
        match i {
            0 => self.child,
            _ => self.records.get(i - 1).map_or(NULL_OFFSET, |rec| rec.body),
        }
    }

    /// Read the node at `offset`.
    pub fn read(arena: &dyn Arena, offset: Offset, mode: KeyMode) -> Result<Self, BTreeError> {
        let mut header = [0u8; NODE_HEADER_SIZE];
        arena.read(offset, &mut header)?;

        let flags = u16::from_le_bytes([header[0], header[1]]);
        let keyn = usize::from(u16::from_le_bytes([header[2], header[3]]));
        let generation = read_u64(&header, 8);
        let child = read_u64(&header, 16);

        if flags & !KNOWN_FLAGS != 0 {
            return Err(BTreeError::corrupt(format!(
                "node {offset} has unknown flags {flags:#x}"
            )));
        }
        let is_leaf = flags & NODE_LEAF != 0;
        if is_leaf == (child != NULL_OFFSET) {
            return Err(BTreeError::corrupt(format!(
                "node {offset} child pointer disagrees with its leaf flag"
            )));
        }

        let record_size = mode.record_size();
        let bytes = arena.read_vec(offset + NODE_HEADER_SIZE as u64, keyn * record_size)?;
        let records = bytes
            .chunks_exact(record_size)
            .map(|chunk| mode.decode_record(chunk))
            .collect();

        Ok(Self {
            flags,
            generation,
            child,
            records,
        })
    }

    /// Write the node to `offset`.
    pub fn write(&self, arena: &mut dyn Arena, offset: Offset, mode: KeyMode) -> Result<(), BTreeError> {
        let mut bytes = Vec::with_capacity(mode.node_size(self.len()));
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&self.generation.to_le_bytes());
        bytes.extend_from_slice(&self.child.to_le_bytes());
        for rec in &self.records {
            mode.encode_record(rec, &mut bytes);
        }
        arena.write(offset, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;

    fn hashed(byte: u8) -> InlineKey {
        InlineKey::Hashed(vec![byte; 4])
    }

    #[test]
    fn test_key_mode_selection() {
        assert_eq!(
            KeyMode::select(Features::UINT_KEY | Features::DYNAMIC_ROOT, 0).expect("uint"),
            KeyMode::Uint
        );
        assert_eq!(
            KeyMode::select(Features::DIRECT_KEY, 16).expect("direct"),
            KeyMode::Direct
        );
        assert_eq!(
            KeyMode::select(Features::NONE, 16).expect("hashed"),
            KeyMode::Hashed { size: 16 }
        );
        assert!(KeyMode::select(Features::UINT_KEY | Features::DIRECT_KEY, 0).is_err());
        assert!(KeyMode::select(Features::NONE, 0).is_err());
    }

    #[test]
    fn test_node_sizes() {
        assert_eq!(KeyMode::Uint.record_size(), 16);
        assert_eq!(KeyMode::Uint.node_size(4), 24 + 64);
        assert_eq!(KeyMode::Hashed { size: 16 }.node_size(3), 24 + 72);
    }

    #[test]
    fn test_leaf_write_read() {
        let mode = KeyMode::Hashed { size: 4 };
        let mut arena = HeapArena::new();
        let offset = arena.allocate(mode.node_size(4)).expect("allocate");

        let mut node = Node::leaf(vec![
            Record { body: 64, key: hashed(1) },
            Record { body: 72, key: hashed(2) },
        ]);
        node.set_root(true);
        node.generation = 9;
        node.write(&mut arena, offset, mode).expect("write");

        let read = Node::read(&arena, offset, mode).expect("read");
        assert_eq!(read, node);
        assert!(read.is_leaf());
        assert!(read.is_root());
    }

    #[test]
    fn test_internal_children() {
        let mode = KeyMode::Uint;
        let mut arena = HeapArena::new();
        let offset = arena.allocate(mode.node_size(3)).expect("allocate");

        let node = Node::internal(
            100,
            vec![
                Record { body: 200, key: InlineKey::Uint(10) },
                Record { body: 300, key: InlineKey::Uint(20) },
            ],
        );
        node.write(&mut arena, offset, mode).expect("write");
        let read = Node::read(&arena, offset, mode).expect("read");

        assert!(!read.is_leaf());
        assert_eq!(read.child_at(0), 100);
        assert_eq!(read.child_at(1), 200);
        assert_eq!(read.child_at(2), 300);
        assert_eq!(read.child_at(3), NULL_OFFSET);
    }

    #[test]
    fn test_leaf_with_child_is_corrupt() {
        let mode = KeyMode::Uint;
        let mut arena = HeapArena::new();
        let offset = arena.allocate(mode.node_size(1)).expect("allocate");
        let mut node = Node::leaf(Vec::new());
        node.child = 48;
        node.write(&mut arena, offset, mode).expect("write");
        assert!(matches!(
            Node::read(&arena, offset, mode),
            Err(BTreeError::Corrupt(_))
        ));
    }
}

//! Ordered key-value tree engine.
//!
//! A B+tree whose nodes live in an [`Arena`](crate::arena::Arena) and refer to
//! each other by offset. Key comparison, record storage and visibility are
//! delegated to a registered [`TreeClass`].
//!
//! # Structure
//!
//! - Leaf nodes hold records pointing at class-allocated bodies
//! - Internal nodes hold separator records pointing at child nodes
//! - The root descriptor (32 bytes) records order, depth, class, features,
//!   generation and the root node offset
//!
//! # Usage
//!
//! ```
//! use dbtree::classes::{CLASS_UINT, register_builtin_classes};
//! use dbtree::{Features, HeapArena, Intent, ProbeOpc, Tree};
//!
//! register_builtin_classes()?;
//! let mut arena = HeapArena::new();
//! let mut tree = Tree::create(&mut arena, CLASS_UINT, Features::UINT_KEY, 8)?;
//!
//! tree.update(&7u64.to_le_bytes(), b"seven")?;
//! assert_eq!(tree.lookup(&7u64.to_le_bytes())?, b"seven");
//!
//! let entry = tree.fetch(ProbeOpc::Ge, Intent::DEFAULT, Some(&5u64.to_le_bytes()))?;
//! assert_eq!(entry.key, 7u64.to_le_bytes());
//! # Ok::<(), dbtree::BTreeError>(())
//! ```

mod anchor;
mod class;
mod delete;
mod drain;
mod insert;
mod iter;
mod node;
mod overhead;
mod probe;
mod registry;
mod root;
mod tree;


pub use anchor::{ANCHOR_SIZE, Anchor, AnchorState, EMBEDDED_KEY_MAX};
pub use class::{
    Availability, ClassCtx, Features, InlineKey, Intent, Record, RecordStat, TreeClass,
};
pub use drain::DrainStatus;
pub use iter::{IterOptions, TreeIter};
pub use overhead::{NodeOverhead, TreeOverhead, overhead_get, overhead_get_with_config};
pub use probe::ProbeOpc;
pub use registry::{RegisteredClass, lookup_class, register_class};
pub use tree::{Entry, Tree, TreeAttr, TreeStat};

/// Smallest supported tree order.
pub const MIN_ORDER: u8 = 3;

/// Largest supported tree order.
pub const MAX_ORDER: u8 = 63;

/// Largest hashed key a class may declare, in bytes.
pub const HKEY_MAX: usize = 32;

// Tests assert with expect() for readable failures.
#![cfg_attr(test, allow(clippy::expect_used))]
// Life of a tree operation:
// 1. A caller registers a tree class (key scheme + record callbacks)
// 2. create/open binds a handle to a root descriptor inside an arena
// 3. Every lookup, upsert, delete and iteration starts with a probe
//     - descend from the root node comparing inline keys
//     - fall back to the class's full-key comparison on ties
// 4. Mutations split or rebalance nodes on the probe path
// 5. destroy/drain frees records bottom-up through the class callbacks
//
// System components:
//  - Arena (offset-addressed memory, heap or file backed)
//  - Class registry
//  - Tree engine (probe, insert, delete, iterate, drain)

pub mod arena;
pub mod btree;
pub mod classes;
pub mod config;
mod error;
#[cfg(test)]
mod testing;

pub use arena::{Arena, ArenaError, FileArena, HeapArena, NULL_OFFSET, Offset};
pub use btree::{
    Anchor, AnchorState, Availability, ClassCtx, DrainStatus, Entry, Features, InlineKey, Intent,
    IterOptions, MAX_ORDER, MIN_ORDER, NodeOverhead, ProbeOpc, Record, RecordStat, RegisteredClass,
    Tree, TreeAttr, TreeClass, TreeIter, TreeOverhead, TreeStat, lookup_class, overhead_get,
    overhead_get_with_config, register_class,
};
pub use config::{ConfigError, EngineConfig};
pub use error::BTreeError;

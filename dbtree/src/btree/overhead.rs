//! Static space estimates for capacity planning.

use crate::btree::class::Features;
use crate::btree::tree::check_create_args;
use crate::config::EngineConfig;
use crate::error::BTreeError;

/// Size of one node allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOverhead {
    /// Bytes per node, allocator overhead included.
    pub size: usize,
    /// Records the node holds.
    pub order: u8,
}

/// Per-node and per-record metadata of a tree configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOverhead {
    /// Bytes each record occupies inside its node.
    pub node_record_size: usize,
    /// Class metadata per record body, if the class reports it.
    pub record_msize: Option<usize>,
    pub leaf_node: NodeOverhead,
    pub internal_node_size: usize,
    /// Successive root sizes before the root reaches full order. Empty
    /// without [`Features::DYNAMIC_ROOT`].
    pub dynamic_root: Vec<NodeOverhead>,
}

/// Estimate the space a tree of `class_id` with `features` and `order`
/// would use, without creating one. `alloc_overhead` is the arena's
/// per-allocation overhead in bytes.
///
/// The dynamic root sizes are those of a tree from [`Tree::create`],
/// whose root starts with room for one record.
///
/// [`Tree::create`]: crate::btree::Tree::create
///
/// # Errors
///
/// - `NotFound` if `class_id` is not registered
/// - `InvalidArgument` on a bad order or unsupported features
pub fn overhead_get(
    alloc_overhead: usize,
    class_id: u32,
    features: Features,
    order: u8,
) -> Result<TreeOverhead, BTreeError> {
    estimate(
        alloc_overhead,
        class_id,
        features,
        order,
        EngineConfig::DEFAULT_DYNAMIC_ROOT_INITIAL,
    )
}

/// As [`overhead_get`] for a tree from [`Tree::create_with_config`]: the
/// configured default order, and dynamic root sizes starting at
/// `dynamic_root_initial`.
///
/// [`Tree::create_with_config`]: crate::btree::Tree::create_with_config
pub fn overhead_get_with_config(
    alloc_overhead: usize,
    class_id: u32,
    features: Features,
    config: &EngineConfig,
) -> Result<TreeOverhead, BTreeError> {
    estimate(
        alloc_overhead,
        class_id,
        features,
        config.default_order,
        config.dynamic_root_initial,
    )
}

fn estimate(
    alloc_overhead: usize,
    class_id: u32,
    features: Features,
    order: u8,
    root_initial: u8,
) -> Result<TreeOverhead, BTreeError> {
    let (class, mode) = check_create_args(class_id, features, order)?;
    let node = |capacity: u8| NodeOverhead {
        size: mode.node_size(usize::from(capacity)) + alloc_overhead,
        order: capacity,
    };

    let mut dynamic_root = Vec::new();
    if features.contains(Features::DYNAMIC_ROOT) {
        let mut capacity = root_initial.max(1);
        while capacity < order {
            dynamic_root.push(node(capacity));
            capacity = capacity.saturating_mul(2);
        }
    }

    Ok(TreeOverhead {
        node_record_size: mode.record_size(),
        record_msize: class.ops().rec_msize(alloc_overhead),
        leaf_node: node(order),
        internal_node_size: node(order).size,
        dynamic_root,
    })
}

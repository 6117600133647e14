//! Tree handle: lifecycle, queries and point operations.
//!
//! A [`Tree`] binds a root descriptor in an arena to its registered class.
//! The handle itself is never persisted; reopening a root yields an
//! equivalent handle.

use std::any::Any;
use std::sync::Arc;

use crate::arena::{Arena, NULL_OFFSET, Offset};
use crate::btree::class::{Availability, ClassCtx, Features, Intent, Record, TreeClass};
use crate::btree::node::{KeyMode, Node};
use crate::btree::probe::{Cursor, ProbeOpc, TraceLevel};
use crate::btree::registry::{RegisteredClass, lookup_class};
use crate::btree::root::{ROOT_SIZE, RootDescriptor};
use crate::btree::{MAX_ORDER, MIN_ORDER};
use crate::config::EngineConfig;
use crate::error::BTreeError;

/// Handle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HandleState {
    Open,
    /// Drained to empty; every operation fails.
    Destroyed,
}

/// A record as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// The class flagged the record as needing cleanup.
    pub dirty: bool,
}

/// Tree attributes returned by [`Tree::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeAttr {
    pub order: u8,
    pub depth: u16,
    pub class: u32,
    pub features: Features,
    /// Record count: exact up to depth 1, an estimate from the root fan-out
    /// beyond that.
    pub count: u64,
}

/// Aggregate statistics returned by [`Tree::query_stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStat {
    pub node_nr: u64,
    pub rec_nr: u64,
    pub key_sum: u64,
    pub key_max: u64,
    pub val_sum: u64,
    pub val_max: u64,
}

/// An open tree.
///
/// # Invariants
///
/// - `root` mirrors the descriptor stored at `root_off`
/// - `mode` was selected from `root.features` and the class hashed key size
pub struct Tree<'a> {
    pub(super) arena: &'a mut dyn Arena,
    pub(super) class: Arc<RegisteredClass>,
    pub(super) private: Option<Box<dyn Any + Send>>,
    pub(super) root_off: Offset,
    pub(super) root: RootDescriptor,
    pub(super) mode: KeyMode,
    /// Whether `root_off` was allocated by the engine (and is freed on destroy).
    pub(super) owns_root: bool,
    pub(super) state: HandleState,
    /// Path of the last probe, reused by `ProbeOpc::Bypass` and embedded iterators.
    pub(super) cursor: Cursor,
    pub(super) dynamic_root_initial: u8,
}

impl std::fmt::Debug for Tree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root_off", &self.root_off)
            .field("root", &self.root)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> Tree<'a> {
    /// Create an empty tree whose root descriptor is allocated in `arena`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `class_id` is not registered
    /// - `InvalidArgument` on an order outside `3..=63` or features the class
    ///   does not support
    /// - `OutOfMemory` if the root descriptor cannot be allocated
    pub fn create(
        arena: &'a mut dyn Arena,
        class_id: u32,
        features: Features,
        order: u8,
    ) -> Result<Self, BTreeError> {
        Self::create_owned(
            arena,
            class_id,
            features,
            order,
            EngineConfig::DEFAULT_DYNAMIC_ROOT_INITIAL,
        )
    }

    /// Create an empty tree using the configured default order.
    pub fn create_with_config(
        arena: &'a mut dyn Arena,
        class_id: u32,
        features: Features,
        config: &EngineConfig,
    ) -> Result<Self, BTreeError> {
        Self::create_owned(
            arena,
            class_id,
            features,
            config.default_order,
            config.dynamic_root_initial,
        )
    }

    /// Create an empty tree whose root descriptor lives at `root_off`.
    ///
    /// The caller owns the 32 bytes at `root_off`; destroying the tree
    /// zeroes them instead of freeing them.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), plus `AlreadyExists` if `root_off`
    /// already holds a tree.
    pub fn create_inplace(
        arena: &'a mut dyn Arena,
        class_id: u32,
        features: Features,
        order: u8,
        root_off: Offset,
    ) -> Result<Self, BTreeError> {
        let existing = RootDescriptor::read(&*arena, root_off)?;
        if !existing.is_vacant() {
            return Err(BTreeError::AlreadyExists);
        }
        Self::init_root(
            arena,
            class_id,
            features,
            order,
            root_off,
            false,
            EngineConfig::DEFAULT_DYNAMIC_ROOT_INITIAL,
        )
    }

    fn create_owned(
        arena: &'a mut dyn Arena,
        class_id: u32,
        features: Features,
        order: u8,
        dynamic_root_initial: u8,
    ) -> Result<Self, BTreeError> {
        // Validate before allocating so a bad request leaves the arena untouched
        check_create_args(class_id, features, order)?;
        let root_off = arena.allocate(ROOT_SIZE)?;
        // The arena hands out zeroed memory, so the descriptor starts vacant
        Self::init_root(
            arena,
            class_id,
            features,
            order,
            root_off,
            true,
            dynamic_root_initial,
        )
    }

    fn init_root(
        arena: &'a mut dyn Arena,
        class_id: u32,
        features: Features,
        order: u8,
        root_off: Offset,
        owns_root: bool,
        dynamic_root_initial: u8,
    ) -> Result<Self, BTreeError> {
        let (class, mode) = check_create_args(class_id, features, order)?;
        let root = RootDescriptor {
            node_size: 0,
            order,
            depth: 0,
            class: class_id,
            features,
            generation: 0,
            node: NULL_OFFSET,
        };
        root.write(arena, root_off)?;

        tracing::debug!(
            "created tree at {root_off}: class {class_id}, order {order}, features {:#x}",
            features.bits()
        );
        Ok(Self {
            arena,
            class,
            private: None,
            root_off,
            root,
            mode,
            owns_root,
            state: HandleState::Open,
            cursor: Cursor::default(),
            dynamic_root_initial: dynamic_root_initial.clamp(1, order),
        })
    }

    /// Open the tree whose root descriptor was allocated by [`create`](Self::create).
    ///
    /// # Errors
    ///
    /// - `NotFound` if no tree lives at `root_off` or its class is not registered
    /// - `Corrupt` if the descriptor or root node fails validation
    pub fn open(arena: &'a mut dyn Arena, root_off: Offset) -> Result<Self, BTreeError> {
        Self::bind(arena, root_off, true)
    }

    /// Open a tree created with [`create_inplace`](Self::create_inplace).
    pub fn open_inplace(arena: &'a mut dyn Arena, root_off: Offset) -> Result<Self, BTreeError> {
        Self::bind(arena, root_off, false)
    }

    fn bind(arena: &'a mut dyn Arena, root_off: Offset, owns_root: bool) -> Result<Self, BTreeError> {
        let root = RootDescriptor::read(&*arena, root_off)?;
        if root.is_vacant() {
            return Err(BTreeError::NotFound);
        }
        let class = lookup_class(root.class).ok_or(BTreeError::NotFound)?;
        root.validate()?;
        if !root.features.is_subset_of(class.features()) {
            return Err(BTreeError::corrupt(format!(
                "features {:#x} not supported by class {}",
                root.features.bits(),
                root.class
            )));
        }
        let mode = KeyMode::select(root.features, class.ops().hkey_size())
            .map_err(|e| BTreeError::corrupt(e.to_string()))?;
        if !root.features.contains(Features::DYNAMIC_ROOT)
            && root.depth > 0
            && root.node_size != root.order
        {
            return Err(BTreeError::corrupt("fixed root below full order"));
        }

        if root.depth > 0 {
            let node = Node::read(&*arena, root.node, mode)?;
            if !node.is_root() || node.is_leaf() != (root.depth == 1) {
                return Err(BTreeError::corrupt(format!(
                    "root node {} flags {:#x} disagree with depth {}",
                    root.node, node.flags, root.depth
                )));
            }
        }

        tracing::debug!(
            "opened tree at {root_off}: class {}, depth {}, generation {}",
            root.class,
            root.depth,
            root.generation
        );
        Ok(Self {
            arena,
            class,
            private: None,
            root_off,
            root,
            mode,
            owns_root,
            state: HandleState::Open,
            cursor: Cursor::default(),
            dynamic_root_initial: EngineConfig::DEFAULT_DYNAMIC_ROOT_INITIAL,
        })
    }

    /// Release the handle. The tree is unchanged.
    pub fn close(self) {
        tracing::debug!("closed tree at {}", self.root_off);
    }

    /// Free every record body and node, then the root descriptor.
    ///
    /// Record bodies are released through the class `rec_free` with `args`,
    /// leftmost first. Each record leaves the tree before the next is freed,
    /// so a failing `rec_free` returns with the remaining records still
    /// reachable from a valid root.
    pub fn destroy(mut self, mut args: Option<&mut dyn Any>) -> Result<(), BTreeError> {
        self.ensure_open()?;
        self.cursor = Cursor::default();
        while self.root.depth > 0 {
            let trace = self.first_trace()?;
            self.remove_at(&trace, args.as_deref_mut())?;
        }
        self.release_root()
    }

    /// Attach opener-private context, visible to class callbacks through
    /// [`ClassCtx::private`]. Returns the previous context.
    pub fn set_private(&mut self, private: Box<dyn Any + Send>) -> Option<Box<dyn Any + Send>> {
        self.private.replace(private)
    }

    /// Offset of the root descriptor.
    #[must_use]
    pub const fn root_offset(&self) -> Offset {
        self.root_off
    }

    /// Current root generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.root.generation
    }

    /// Order, depth, class, features and an estimated record count.
    pub fn query(&mut self) -> Result<TreeAttr, BTreeError> {
        self.ensure_open()?;
        let count = match self.root.depth {
            0 => 0,
            1 => self.read_node(self.root.node)?.len() as u64,
            depth => {
                let children = self.read_node(self.root.node)?.len() as u64 + 1;
                let half = u64::from(self.root.order).div_ceil(2);
                children.saturating_mul(half.saturating_pow(u32::from(depth) - 1))
            }
        };
        Ok(TreeAttr {
            order: self.root.order,
            depth: self.root.depth,
            class: self.root.class,
            features: self.root.features,
            count,
        })
    }

    /// Node and record statistics, computed by a full traversal.
    pub fn query_stat(&mut self) -> Result<TreeStat, BTreeError> {
        self.ensure_open()?;
        let mut stat = TreeStat::default();
        if self.root.depth == 0 {
            return Ok(stat);
        }

        let mut stack = vec![self.root.node];
        while let Some(offset) = stack.pop() {
            let node = self.read_node(offset)?;
            stat.node_nr += 1;
            if !node.is_leaf() {
                stack.extend((0..=node.len()).map(|i| node.child_at(i)));
                continue;
            }
            for rec in &node.records {
                let rec_stat = {
                    let (ops, ctx) = self.class_ctx();
                    ops.rec_stat(&ctx, rec)?
                };
                stat.rec_nr += 1;
                stat.key_sum += rec_stat.key_size as u64;
                stat.key_max = stat.key_max.max(rec_stat.key_size as u64);
                stat.val_sum += rec_stat.value_size as u64;
                stat.val_max = stat.val_max.max(rec_stat.value_size as u64);
            }
        }
        Ok(stat)
    }

    /// Whether the tree holds no records.
    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        self.ensure_open()?;
        Ok(self.root.depth == 0)
    }

    /// Value stored under `key`.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Vec<u8>, BTreeError> {
        self.fetch(ProbeOpc::Eq, Intent::DEFAULT, Some(key))
            .map(|entry| entry.value)
    }

    /// Probe with `opc` and return the matched record, including its key.
    ///
    /// The probe path is kept so a following `ProbeOpc::Bypass` operation can
    /// reuse it.
    pub fn fetch(
        &mut self,
        opc: ProbeOpc,
        intent: Intent,
        key: Option<&[u8]>,
    ) -> Result<Entry, BTreeError> {
        self.ensure_open()?;
        let mut cursor = std::mem::take(&mut self.cursor);
        let result = match self.probe_with(&mut cursor, opc, intent, key) {
            Ok(true) => self.entry_at(&cursor.trace, intent),
            Ok(false) => Err(BTreeError::NotFound),
            Err(e) => Err(e),
        };
        self.cursor = cursor;
        result
    }

    /// Render every node through the class `rec_string`, also logged at
    /// debug level.
    pub fn dump(&mut self) -> Result<String, BTreeError> {
        self.ensure_open()?;
        let mut out = format!(
            "tree {}: class {}, order {}, depth {}, generation {}\n",
            self.root_off, self.root.class, self.root.order, self.root.depth, self.root.generation
        );
        if self.root.depth > 0 {
            let mut stack = vec![(self.root.node, 0usize)];
            while let Some((offset, level)) = stack.pop() {
                let node = self.read_node(offset)?;
                let indent = "  ".repeat(level + 1);
                let kind = if node.is_leaf() { "leaf" } else { "internal" };
                out.push_str(&format!(
                    "{indent}{kind} {offset} ({} records, generation {})\n",
                    node.len(),
                    node.generation
                ));
                for rec in &node.records {
                    let line = {
                        let (ops, ctx) = self.class_ctx();
                        ops.rec_string(&ctx, rec, node.is_leaf())
                    };
                    out.push_str(&format!("{indent}  {line}\n"));
                }
                if !node.is_leaf() {
                    // Reversed so the leftmost child is rendered first
                    stack.extend((0..=node.len()).rev().map(|i| (node.child_at(i), level + 1)));
                }
            }
        }
        tracing::debug!("{out}");
        Ok(out)
    }

    pub(super) fn ensure_open(&self) -> Result<(), BTreeError> {
        match self.state {
            HandleState::Open => Ok(()),
            HandleState::Destroyed => Err(BTreeError::Destroyed),
        }
    }

    /// The class callbacks together with a context borrowing this handle.
    pub(super) fn class_ctx(&mut self) -> (&dyn TreeClass, ClassCtx<'_>) {
        let ctx = ClassCtx::new(&mut *self.arena, self.private.as_deref(), self.root.features);
        (self.class.ops(), ctx)
    }

    pub(super) fn read_node(&self, offset: Offset) -> Result<Node, BTreeError> {
        Node::read(&*self.arena, offset, self.mode)
    }

    /// Stamp `node` with the current generation and write it back.
    pub(super) fn write_node(&mut self, offset: Offset, node: &mut Node) -> Result<(), BTreeError> {
        let capacity = self.capacity_of(node);
        if node.len() > capacity {
            return Err(BTreeError::corrupt(format!(
                "node {offset} holds {} records, capacity {capacity}",
                node.len()
            )));
        }
        node.generation = self.root.generation;
        node.write(&mut *self.arena, offset, self.mode)
    }

    /// Allocate a node with room for `capacity` records.
    pub(super) fn alloc_node(&mut self, capacity: u8) -> Result<Offset, BTreeError> {
        let size = self.mode.node_size(usize::from(capacity));
        let offset = {
            let (ops, mut ctx) = self.class_ctx();
            ops.node_alloc(&mut ctx, size)?
        };
        self.bump_generation();
        Ok(offset)
    }

    pub(super) fn free_node(&mut self, offset: Offset) -> Result<(), BTreeError> {
        self.arena.free(offset)?;
        self.bump_generation();
        Ok(())
    }

    pub(super) const fn bump_generation(&mut self) {
        self.root.generation += 1;
    }

    pub(super) fn save_root(&mut self) -> Result<(), BTreeError> {
        self.root.write(&mut *self.arena, self.root_off)
    }

    /// Record capacity of `node`: the root may be smaller than `order`.
    pub(super) fn capacity_of(&self, node: &Node) -> usize {
        if node.is_root() {
            usize::from(self.root.node_size)
        } else {
            usize::from(self.root.order)
        }
    }

    /// Minimum records of a non-root node.
    pub(super) fn min_records(&self, leaf: bool) -> usize {
        let order = usize::from(self.root.order);
        if leaf { order.div_ceil(2) } else { order / 2 }
    }

    /// Entry for the record at the leaf of `trace`.
    pub(super) fn entry_at(&mut self, trace: &[TraceLevel], intent: Intent) -> Result<Entry, BTreeError> {
        let rec = self.record_at(trace)?;
        let (ops, ctx) = self.class_ctx();
        let availability = ops.check_availability(&ctx, &rec, intent)?;
        let (key, value) = ops.rec_fetch(&ctx, &rec)?;
        Ok(Entry {
            key,
            value,
            dirty: availability == Availability::Dirty,
        })
    }

    /// The record the leaf of `trace` points at.
    pub(super) fn record_at(&self, trace: &[TraceLevel]) -> Result<Record, BTreeError> {
        let level = trace.last().ok_or(BTreeError::NotFound)?;
        let leaf = self.read_node(level.node)?;
        leaf.records
            .get(level.at)
            .cloned()
            .ok_or_else(|| BTreeError::corrupt(format!("no record {} in leaf {}", level.at, level.node)))
    }

    /// Free or zero the root descriptor and mark the handle destroyed.
    pub(super) fn release_root(&mut self) -> Result<(), BTreeError> {
        if self.owns_root {
            self.arena.free(self.root_off)?;
        } else {
            self.arena.write(self.root_off, &[0u8; ROOT_SIZE])?;
        }
        self.root = RootDescriptor::default();
        self.cursor = Cursor::default();
        self.state = HandleState::Destroyed;
        tracing::debug!("destroyed tree at {}", self.root_off);
        Ok(())
    }
}

/// Validate create arguments and resolve the class.
pub(super) fn check_create_args(
    class_id: u32,
    features: Features,
    order: u8,
) -> Result<(Arc<RegisteredClass>, KeyMode), BTreeError> {
    if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
        return Err(BTreeError::invalid(format!(
            "order {order} outside {MIN_ORDER}..={MAX_ORDER}"
        )));
    }
    let class = lookup_class(class_id).ok_or(BTreeError::NotFound)?;
    if !features.is_subset_of(class.features()) {
        return Err(BTreeError::invalid(format!(
            "features {:#x} not supported by class {class_id} ({:#x})",
            features.bits(),
            class.features().bits()
        )));
    }
    let mode = KeyMode::select(features, class.ops().hkey_size())?;
    Ok((class, mode))
}

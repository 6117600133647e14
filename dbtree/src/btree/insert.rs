//! Upsert and node splitting.
//!
//! Inserting into a full leaf splits it and pushes a separator into the
//! parent, which may split in turn. Every node the split chain needs is
//! allocated before any node is modified, so running out of memory leaves
//! the tree as it was.

use crate::arena::Offset;
use crate::btree::class::{Features, InlineKey, Intent, Record};
use crate::btree::node::{KeyMode, Node};
use crate::btree::probe::{Cursor, CursorState, ProbeOpc, TraceLevel};
use crate::btree::tree::Tree;
use crate::error::BTreeError;

impl Tree<'_> {
    /// Insert or update the record for `key`.
    ///
    /// `opc` must be `Eq` or `Bypass`. A `None` value is a punch; what that
    /// means is up to the class. Records hidden from `intent` are updated
    /// like visible ones.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` on any other opcode or a stale bypass
    /// - `Conflict` if the class reports an in-progress writer
    /// - `OutOfMemory` if a body or node cannot be allocated; the tree is unchanged
    pub fn upsert(
        &mut self,
        opc: ProbeOpc,
        intent: Intent,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), BTreeError> {
        self.ensure_open()?;
        if !matches!(opc, ProbeOpc::Eq | ProbeOpc::Bypass) {
            return Err(BTreeError::invalid(format!("upsert does not accept {opc:?}")));
        }

        let mut cursor = std::mem::take(&mut self.cursor);
        let result = self.upsert_with(&mut cursor, opc, intent, key, value, false);
        self.cursor = Cursor::default();
        result
    }

    /// Set the value of `key`, inserting it if absent.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
        self.upsert(ProbeOpc::Eq, Intent::DEFAULT, key, Some(value))
    }

    /// Insert `key`, failing with `AlreadyExists` if it is present.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
        self.ensure_open()?;
        let mut cursor = std::mem::take(&mut self.cursor);
        let result = self.upsert_with(&mut cursor, ProbeOpc::Eq, Intent::DEFAULT, key, Some(value), true);
        self.cursor = Cursor::default();
        result
    }

    fn upsert_with(
        &mut self,
        cursor: &mut Cursor,
        opc: ProbeOpc,
        intent: Intent,
        key: &[u8],
        value: Option<&[u8]>,
        insert_only: bool,
    ) -> Result<(), BTreeError> {
        self.probe_with(cursor, opc, intent, Some(key))?;
        match cursor.state {
            CursorState::Found | CursorState::Hidden if insert_only => Err(BTreeError::AlreadyExists),
            CursorState::Found | CursorState::Hidden => self.update_record(&cursor.trace, key, value),
            CursorState::NotFound => self.insert_record(&cursor.trace, key, value),
            CursorState::Unset => Err(BTreeError::invalid("upsert probe did not settle on a slot")),
        }
    }

    /// Replace the value of the record at the leaf slot of `trace`.
    fn update_record(&mut self, trace: &[TraceLevel], key: &[u8], value: Option<&[u8]>) -> Result<(), BTreeError> {
        let Some(&TraceLevel { node: leaf_off, at }) = trace.last() else {
            return Err(BTreeError::NotFound);
        };
        let mut leaf = self.read_node(leaf_off)?;
        let Some(old) = leaf.records.get(at).cloned() else {
            return Err(BTreeError::corrupt(format!("no record {at} in leaf {leaf_off}")));
        };

        let mut rec = old.clone();
        let in_place = {
            let (ops, mut ctx) = self.class_ctx();
            ops.rec_update(&mut ctx, &mut rec, value)
        };
        match in_place {
            Ok(()) if rec.body == old.body => return Ok(()),
            Ok(()) => {}
            Err(BTreeError::NoPermission) => {
                // Allocate the replacement first so a failure leaves the old body intact
                let (ops, mut ctx) = self.class_ctx();
                rec.body = ops.rec_alloc(&mut ctx, key, value)?;
                if let Err(e) = ops.rec_free(&mut ctx, &old, None) {
                    if let Err(undo) = ops.rec_free(&mut ctx, &rec, None) {
                        tracing::warn!("failed to release replacement body {}: {undo}", rec.body);
                    }
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }

        tracing::trace!("record body {} replaced by {}", old.body, rec.body);
        leaf.records[at] = rec;
        self.bump_generation();
        self.write_node(leaf_off, &mut leaf)?;
        self.save_root()
    }

    /// Allocate a body for `key` and insert it at the slot of `trace`.
    fn insert_record(&mut self, trace: &[TraceLevel], key: &[u8], value: Option<&[u8]>) -> Result<(), BTreeError> {
        let inline = self.search_key(key)?.inline;
        let body = {
            let (ops, mut ctx) = self.class_ctx();
            ops.rec_alloc(&mut ctx, key, value)?
        };
        let rec = Record { body, key: inline };

        if let Err(e) = self.insert_at(trace, rec.clone()) {
            let (ops, mut ctx) = self.class_ctx();
            if let Err(undo) = ops.rec_free(&mut ctx, &rec, None) {
                tracing::warn!("failed to release record body {body} after insert error: {undo}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn insert_at(&mut self, trace: &[TraceLevel], rec: Record) -> Result<(), BTreeError> {
        let Some(&TraceLevel { node: leaf_off, at }) = trace.last() else {
            return self.plant_root(rec);
        };

        let mut leaf = self.read_node(leaf_off)?;
        let capacity = self.capacity_of(&leaf);
        if leaf.len() < capacity {
            leaf.records.insert(at, rec);
            self.bump_generation();
            self.write_node(leaf_off, &mut leaf)?;
            return self.save_root();
        }

        if leaf.is_root() && self.root.node_size < self.root.order {
            return self.grow_root(leaf_off, leaf, at, rec);
        }

        let spare = self.alloc_nodes(self.split_budget(trace)?)?;
        self.split_insert(trace, leaf, at, rec, spare)
    }

    /// First record of an empty tree: allocate a root leaf.
    fn plant_root(&mut self, rec: Record) -> Result<(), BTreeError> {
        let capacity = if self.root.features.contains(Features::DYNAMIC_ROOT) {
            self.dynamic_root_initial
        } else {
            self.root.order
        };
        let offset = self.alloc_node(capacity)?;

        self.root.node = offset;
        self.root.depth = 1;
        self.root.node_size = capacity;
        self.bump_generation();

        let mut root = Node::leaf(vec![rec]);
        root.set_root(true);
        self.write_node(offset, &mut root)?;
        self.save_root()?;
        tracing::debug!("tree {} planted root leaf {offset} with capacity {capacity}", self.root_off);
        Ok(())
    }

    /// Move a full dynamic root leaf into a larger allocation.
    fn grow_root(&mut self, old_off: Offset, mut leaf: Node, at: usize, rec: Record) -> Result<(), BTreeError> {
        let old_capacity = self.root.node_size;
        let capacity = (old_capacity * 2).min(self.root.order);
        let offset = self.alloc_node(capacity)?;

        leaf.records.insert(at, rec);
        self.root.node = offset;
        self.root.node_size = capacity;
        self.bump_generation();
        self.write_node(offset, &mut leaf)?;
        self.free_node(old_off)?;
        self.save_root()?;
        tracing::debug!("tree {} root grew from {old_capacity} to {capacity} records", self.root_off);
        Ok(())
    }

    /// Number of nodes a split starting at the leaf of `trace` allocates.
    fn split_budget(&self, trace: &[TraceLevel]) -> Result<usize, BTreeError> {
        let order = usize::from(self.root.order);
        let mut needed = 1;
        for level in trace[..trace.len() - 1].iter().rev() {
            if self.read_node(level.node)?.len() < order {
                return Ok(needed);
            }
            needed += 1;
        }
        // The root splits too and needs a new parent
        Ok(needed + 1)
    }

    fn alloc_nodes(&mut self, count: usize) -> Result<Vec<Offset>, BTreeError> {
        let mut spare = Vec::with_capacity(count);
        for _ in 0..count {
            match self.alloc_node(self.root.order) {
                Ok(offset) => spare.push(offset),
                Err(e) => {
                    for offset in spare {
                        self.free_node(offset)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(spare)
    }

    fn split_insert(
        &mut self,
        trace: &[TraceLevel],
        mut node: Node,
        at: usize,
        rec: Record,
        mut spare: Vec<Offset>,
    ) -> Result<(), BTreeError> {
        let order = usize::from(self.root.order);
        node.records.insert(at, rec);
        self.bump_generation();

        let mut level = trace.len() - 1;
        let mut node_off = trace[level].node;
        loop {
            let right_off = spare
                .pop()
                .ok_or_else(|| BTreeError::corrupt("split ran out of preallocated nodes"))?;
            let (separator, mut right) = self.split_node(&mut node, right_off)?;
            let was_root = node.is_root();
            node.set_root(false);
            self.write_node(node_off, &mut node)?;
            self.write_node(right_off, &mut right)?;
            tracing::trace!("split node {node_off} into {right_off} at level {level}");

            let separator = Record { body: right_off, key: separator };
            if was_root {
                let root_off = spare
                    .pop()
                    .ok_or_else(|| BTreeError::corrupt("split ran out of preallocated nodes"))?;
                let mut root = Node::internal(node_off, vec![separator]);
                root.set_root(true);
                self.root.node = root_off;
                self.root.depth += 1;
                self.root.node_size = self.root.order;
                self.write_node(root_off, &mut root)?;
                tracing::debug!("tree {} grew to depth {}", self.root_off, self.root.depth);
                break;
            }

            level -= 1;
            let TraceLevel { node: parent_off, at: child_index } = trace[level];
            let mut parent = self.read_node(parent_off)?;
            parent.records.insert(child_index, separator);
            if parent.len() <= order {
                self.write_node(parent_off, &mut parent)?;
                break;
            }
            node = parent;
            node_off = parent_off;
        }

        for offset in spare {
            self.free_node(offset)?;
        }
        self.save_root()
    }

    /// Split an overfull node in two; returns the separator key and the
    /// right half, which will live at `right_off`.
    fn split_node(&self, node: &mut Node, right_off: Offset) -> Result<(InlineKey, Node), BTreeError> {
        let order = usize::from(self.root.order);
        if node.is_leaf() {
            let right = node.records.split_off((order + 2) / 2);
            let separator = match self.mode {
                KeyMode::Direct => InlineKey::Direct(right_off),
                KeyMode::Uint | KeyMode::Hashed { .. } => right
                    .first()
                    .map(|rec| rec.key.clone())
                    .ok_or_else(|| BTreeError::corrupt("leaf split produced an empty right half"))?,
            };
            if matches!(self.mode, KeyMode::Hashed { .. })
                && node.records.last().map(|rec| &rec.key) == Some(&separator)
            {
                tracing::warn!("leaf split at {right_off} separates records sharing a hashed key");
            }
            return Ok((separator, Node::leaf(right)));
        }

        let mut right = node.records.split_off((order + 1) / 2);
        if right.is_empty() {
            return Err(BTreeError::corrupt("internal split produced an empty right half"));
        }
        let median = right.remove(0);
        Ok((median.key, Node::internal(median.body, right)))
    }
}

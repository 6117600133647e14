//! Record removal and rebalancing.
//!
//! After a removal leaves a node below its minimum occupancy, it borrows one
//! record from a sibling with records to spare, or merges with a sibling and
//! removes their separator from the parent, which may then underflow in turn.
//! Merges always keep the left node and free the right one.

use std::any::Any;

use crate::arena::{NULL_OFFSET, Offset};
use crate::btree::class::{InlineKey, Intent, Record};
use crate::btree::node::{KeyMode, Node};
use crate::btree::probe::{Cursor, ProbeOpc, TraceLevel};
use crate::btree::tree::Tree;
use crate::error::BTreeError;

impl Tree<'_> {
    /// Remove the record selected by `opc` and `key`.
    ///
    /// The body is released through the class `rec_free` with `args`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the probe matches no visible record.
    pub fn delete(
        &mut self,
        opc: ProbeOpc,
        intent: Intent,
        key: Option<&[u8]>,
        args: Option<&mut dyn Any>,
    ) -> Result<(), BTreeError> {
        self.ensure_open()?;
        let mut cursor = std::mem::take(&mut self.cursor);
        let result = match self.probe_with(&mut cursor, opc, intent, key) {
            Ok(true) => self.remove_at(&cursor.trace, args),
            Ok(false) => Err(BTreeError::NotFound),
            Err(e) => Err(e),
        };
        self.cursor = Cursor::default();
        result
    }

    /// Free and remove the record at the leaf slot of `trace`, then
    /// rebalance along the path.
    pub(super) fn remove_at(&mut self, trace: &[TraceLevel], args: Option<&mut dyn Any>) -> Result<(), BTreeError> {
        let Some(&TraceLevel { node: leaf_off, at }) = trace.last() else {
            return Err(BTreeError::NotFound);
        };
        let mut leaf = self.read_node(leaf_off)?;
        let Some(rec) = leaf.records.get(at).cloned() else {
            return Err(BTreeError::corrupt(format!("no record {at} in leaf {leaf_off}")));
        };

        {
            let (ops, mut ctx) = self.class_ctx();
            ops.rec_free(&mut ctx, &rec, args)?;
        }
        leaf.records.remove(at);
        self.bump_generation();
        tracing::trace!("removed record {} from leaf {leaf_off}", rec.body);

        self.rebalance(trace, leaf)?;
        self.save_root()
    }

    /// Restore occupancy from the leaf of `trace` upward. `node` is the
    /// modified, not yet written, leaf.
    fn rebalance(&mut self, trace: &[TraceLevel], mut node: Node) -> Result<(), BTreeError> {
        let mut level = trace.len() - 1;
        loop {
            let node_off = trace[level].node;
            if node.is_root() {
                return self.settle_root(node_off, node);
            }
            let min = self.min_records(node.is_leaf());
            if node.len() >= min {
                return self.write_node(node_off, &mut node);
            }

            let TraceLevel { node: parent_off, at: child_index } = trace[level - 1];
            let mut parent = self.read_node(parent_off)?;

            if child_index > 0 {
                let left_off = parent.child_at(child_index - 1);
                let mut left = self.read_node(left_off)?;
                if left.len() > min {
                    self.borrow_from_left(&mut parent, child_index, &mut left, &mut node, node_off)?;
                    self.write_node(left_off, &mut left)?;
                    self.write_node(node_off, &mut node)?;
                    return self.write_node(parent_off, &mut parent);
                }
                if child_index == parent.len() {
                    self.merge(&mut parent, child_index - 1, &mut left, node)?;
                    self.write_node(left_off, &mut left)?;
                    self.free_node(node_off)?;
                    tracing::debug!("merged node {node_off} into left sibling {left_off}");
                    node = parent;
                    level -= 1;
                    continue;
                }
            }

            let right_off = parent.child_at(child_index + 1);
            if right_off == NULL_OFFSET {
                return Err(BTreeError::corrupt(format!("node {parent_off} has a single child")));
            }
            let mut right = self.read_node(right_off)?;
            if right.len() > min {
                self.borrow_from_right(&mut parent, child_index, &mut node, &mut right, right_off)?;
                self.write_node(right_off, &mut right)?;
                self.write_node(node_off, &mut node)?;
                return self.write_node(parent_off, &mut parent);
            }
            self.merge(&mut parent, child_index, &mut node, right)?;
            self.write_node(node_off, &mut node)?;
            self.free_node(right_off)?;
            tracing::debug!("merged right sibling {right_off} into node {node_off}");
            node = parent;
            level -= 1;
        }
    }

    /// Separator key for a subtree whose leftmost leaf is `leaf`.
    fn leaf_separator(&self, leaf: &Node, leaf_off: Offset) -> Result<InlineKey, BTreeError> {
        match self.mode {
            KeyMode::Direct => Ok(InlineKey::Direct(leaf_off)),
            KeyMode::Uint | KeyMode::Hashed { .. } => leaf
                .records
                .first()
                .map(|rec| rec.key.clone())
                .ok_or_else(|| BTreeError::corrupt(format!("leaf {leaf_off} is empty"))),
        }
    }

    /// Move the last record of `left` to the front of `node` (child `child_index`).
    fn borrow_from_left(
        &self,
        parent: &mut Node,
        child_index: usize,
        left: &mut Node,
        node: &mut Node,
        node_off: Offset,
    ) -> Result<(), BTreeError> {
        let moved = left
            .records
            .pop()
            .ok_or_else(|| BTreeError::corrupt("left sibling is empty"))?;
        let separator = &mut parent.records[child_index - 1];
        if node.is_leaf() {
            node.records.insert(0, moved);
            separator.key = self.leaf_separator(node, node_off)?;
        } else {
            // Rotate through the parent: the separator comes down, the
            // sibling's last key goes up
            let down = Record { body: node.child, key: std::mem::replace(&mut separator.key, moved.key) };
            node.records.insert(0, down);
            node.child = moved.body;
        }
        Ok(())
    }

    /// Move the first record of `right` to the end of `node` (child `child_index`).
    fn borrow_from_right(
        &self,
        parent: &mut Node,
        child_index: usize,
        node: &mut Node,
        right: &mut Node,
        right_off: Offset,
    ) -> Result<(), BTreeError> {
        if right.records.is_empty() {
            return Err(BTreeError::corrupt("right sibling is empty"));
        }
        let moved = right.records.remove(0);
        let separator = &mut parent.records[child_index];
        if node.is_leaf() {
            node.records.push(moved);
            separator.key = self.leaf_separator(right, right_off)?;
        } else {
            let down = Record { body: right.child, key: std::mem::replace(&mut separator.key, moved.key) };
            node.records.push(down);
            right.child = moved.body;
        }
        Ok(())
    }

    /// Append `right` to `left` and drop their separator at `sep_index`.
    fn merge(&self, parent: &mut Node, sep_index: usize, left: &mut Node, right: Node) -> Result<(), BTreeError> {
        if sep_index >= parent.len() {
            return Err(BTreeError::corrupt(format!("no separator {sep_index} to merge across")));
        }
        let separator = parent.records.remove(sep_index);
        if !left.is_leaf() {
            left.records.push(Record { body: right.child, key: separator.key });
        }
        left.records.extend(right.records);
        if left.len() > usize::from(self.root.order) {
            return Err(BTreeError::corrupt(format!("merge overfills a node: {} records", left.len())));
        }
        Ok(())
    }

    /// Write back a modified root, freeing it when empty or collapsing it
    /// into its only child.
    fn settle_root(&mut self, root_off: Offset, mut root: Node) -> Result<(), BTreeError> {
        if !root.is_empty() {
            return self.write_node(root_off, &mut root);
        }

        if root.is_leaf() {
            self.free_node(root_off)?;
            self.root.node = NULL_OFFSET;
            self.root.depth = 0;
            self.root.node_size = 0;
            tracing::debug!("tree {} is empty", self.root_off);
            return Ok(());
        }

        let child_off = root.child;
        let mut child = self.read_node(child_off)?;
        child.set_root(true);
        self.free_node(root_off)?;
        self.root.node = child_off;
        self.root.depth -= 1;
        self.root.node_size = self.root.order;
        self.write_node(child_off, &mut child)?;
        tracing::debug!("tree {} shrank to depth {}", self.root_off, self.root.depth);
        Ok(())
    }
}

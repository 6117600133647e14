//! Probe engine.
//!
//! Every operation starts by descending from the root to a leaf slot. The
//! path is recorded in a [`Cursor`] as one `(node, index)` pair per level:
//! the child index taken in internal nodes and the record index in the leaf.
//!
//! Relational opcodes first find the lower bound (the first record not less
//! than the key) and then step one record left or right along the leaf
//! level, climbing and redescending the trace as needed. Records a class
//! reports as unavailable are stepped over.

use std::cmp::Ordering;

use crate::arena::{NULL_OFFSET, Offset};
use crate::btree::class::{Availability, InlineKey, Intent, Record};
use crate::btree::node::{KeyMode, Node};
use crate::btree::tree::Tree;
use crate::error::BTreeError;

/// Probe opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOpc {
    /// Reuse the path of the preceding probe on the same handle.
    ///
    /// Only valid while the tree has not changed since that probe; a stale
    /// path is rejected with `InvalidArgument`.
    Bypass,
    /// Smallest record; the key is ignored.
    First,
    /// Largest record; the key is ignored.
    Last,
    /// Exact match.
    Eq,
    /// Smallest record greater than the key.
    Gt,
    /// Largest record less than the key.
    Lt,
    /// Smallest record greater than or equal to the key.
    Ge,
    /// Largest record less than or equal to the key.
    Le,
}

/// One level of a probe path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLevel {
    pub node: Offset,
    /// Child index in an internal node, record index in a leaf.
    pub at: usize,
}

/// Outcome of the last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    #[default]
    Unset,
    /// The leaf slot holds the matched record.
    Found,
    /// An exact match exists but is not visible under the probe intent.
    Hidden,
    /// No exact match; the leaf slot is where the key would be inserted.
    NotFound,
}

/// A probe path plus the generation it was taken at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub trace: Vec<TraceLevel>,
    pub state: CursorState,
    pub generation: u64,
}

impl Cursor {
    pub fn reset(&mut self) {
        self.trace.clear();
        self.state = CursorState::Unset;
    }
}

/// A probed key prepared for comparison against inline keys.
pub struct SearchKey<'k> {
    pub bytes: &'k [u8],
    pub inline: InlineKey,
}

enum Descent<'s, 'k> {
    First,
    Last,
    Key(&'s SearchKey<'k>),
}

/// Parse an integer-key tree key.
pub fn uint_key(key: &[u8]) -> Result<u64, BTreeError> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| {
        BTreeError::invalid(format!(
            "integer keys are 8 bytes, got {}",
            key.len()
        ))
    })?;
    Ok(u64::from_le_bytes(bytes))
}

impl Tree<'_> {
    /// Position `cursor` according to `opc`.
    ///
    /// Returns whether a visible record was found. For `Eq` the cursor is
    /// left at the insertion slot (state `NotFound`) or at an invisible
    /// match (state `Hidden`).
    pub(super) fn probe_with(
        &mut self,
        cursor: &mut Cursor,
        opc: ProbeOpc,
        intent: Intent,
        key: Option<&[u8]>,
    ) -> Result<bool, BTreeError> {
        if opc == ProbeOpc::Bypass {
            return self.bypass(cursor);
        }

        cursor.reset();
        cursor.generation = self.root.generation;

        let search = match (opc, key) {
            (ProbeOpc::First | ProbeOpc::Last, _) => None,
            (_, Some(key)) => Some(self.search_key(key)?),
            (_, None) => {
                return Err(BTreeError::invalid(format!("{opc:?} probe needs a key")));
            }
        };

        if self.root.depth == 0 {
            if opc == ProbeOpc::Eq {
                cursor.state = CursorState::NotFound;
            }
            return Ok(false);
        }

        let found = match search {
            None => {
                let forward = opc == ProbeOpc::First;
                cursor.trace = self.descend(if forward { &Descent::First } else { &Descent::Last })?;
                self.skip_unavailable(&mut cursor.trace, forward, intent)?
            }
            Some(search) => {
                let exact = self.locate(&search, &mut cursor.trace)?;
                match opc {
                    ProbeOpc::Eq => {
                        if !exact {
                            cursor.state = CursorState::NotFound;
                            return Ok(false);
                        }
                        if self.availability(&cursor.trace, intent)? == Availability::Unavailable {
                            cursor.state = CursorState::Hidden;
                            return Ok(false);
                        }
                        true
                    }
                    ProbeOpc::Ge => {
                        self.settle_forward(&mut cursor.trace)?
                            && self.skip_unavailable(&mut cursor.trace, true, intent)?
                    }
                    ProbeOpc::Gt => {
                        let moved = if exact {
                            self.step(&mut cursor.trace, true)?
                        } else {
                            self.settle_forward(&mut cursor.trace)?
                        };
                        moved && self.skip_unavailable(&mut cursor.trace, true, intent)?
                    }
                    ProbeOpc::Le => {
                        let moved = exact || self.step(&mut cursor.trace, false)?;
                        moved && self.skip_unavailable(&mut cursor.trace, false, intent)?
                    }
                    _ => {
                        self.step(&mut cursor.trace, false)?
                            && self.skip_unavailable(&mut cursor.trace, false, intent)?
                    }
                }
            }
        };

        cursor.state = if found { CursorState::Found } else { CursorState::Unset };
        tracing::trace!("probe {opc:?} found={found} trace={:?}", cursor.trace);
        Ok(found)
    }

    fn bypass(&self, cursor: &Cursor) -> Result<bool, BTreeError> {
        if cursor.generation != self.root.generation {
            return Err(BTreeError::invalid(
                "bypass probe after the tree changed; probe again",
            ));
        }
        match cursor.state {
            CursorState::Found => Ok(true),
            CursorState::Hidden | CursorState::NotFound => Ok(false),
            CursorState::Unset => Err(BTreeError::invalid("bypass probe without a preceding probe")),
        }
    }

    /// Prepare `key` for comparison in this tree's key mode.
    pub(super) fn search_key<'k>(&mut self, key: &'k [u8]) -> Result<SearchKey<'k>, BTreeError> {
        let inline = match self.mode {
            KeyMode::Uint => InlineKey::Uint(uint_key(key)?),
            KeyMode::Hashed { size } => {
                let mut hkey = vec![0u8; size];
                let (ops, ctx) = self.class_ctx();
                ops.hkey_gen(&ctx, key, &mut hkey);
                InlineKey::Hashed(hkey)
            }
            KeyMode::Direct => InlineKey::Direct(NULL_OFFSET),
        };
        Ok(SearchKey { bytes: key, inline })
    }

    /// Order of `rec` relative to `key`.
    ///
    /// Internal hashed records compare by hashed key only; leaves break
    /// hashed-key ties with the full key.
    pub(super) fn compare(
        &mut self,
        rec: &Record,
        leaf: bool,
        key: &SearchKey<'_>,
    ) -> Result<Ordering, BTreeError> {
        match (&rec.key, &key.inline) {
            (InlineKey::Uint(stored), InlineKey::Uint(probed)) => Ok(stored.cmp(probed)),
            (InlineKey::Hashed(stored), InlineKey::Hashed(probed)) => {
                let (ops, ctx) = self.class_ctx();
                let order = ops.hkey_cmp(stored, probed);
                if order != Ordering::Equal || !leaf {
                    return Ok(order);
                }
                Ok(ops.key_cmp(&ctx, rec, key.bytes)?.unwrap_or(Ordering::Equal))
            }
            (InlineKey::Direct(_), InlineKey::Direct(_)) if leaf => self.full_cmp(rec, key.bytes),
            (InlineKey::Direct(leaf_off), InlineKey::Direct(_)) => {
                // The separator key is the first record of the referenced leaf
                let node = self.read_node(*leaf_off)?;
                let first = node.records.first().ok_or_else(|| {
                    BTreeError::corrupt(format!("separator leaf {leaf_off} is empty"))
                })?;
                self.full_cmp(first, key.bytes)
            }
            _ => Err(BTreeError::corrupt("record key does not match the tree key mode")),
        }
    }

    fn full_cmp(&mut self, rec: &Record, key: &[u8]) -> Result<Ordering, BTreeError> {
        let (ops, ctx) = self.class_ctx();
        ops.key_cmp(&ctx, rec, key)?
            .ok_or_else(|| BTreeError::invalid("direct-key trees need a class with key_cmp"))
    }

    /// Number of leading records of `node` for which `pred(rec vs key)` holds.
    fn partition(
        &mut self,
        node: &Node,
        key: &SearchKey<'_>,
        pred: impl Fn(Ordering) -> bool,
    ) -> Result<usize, BTreeError> {
        let leaf = node.is_leaf();
        let (mut lo, mut hi) = (0, node.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.compare(&node.records[mid], leaf, key)?) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn descend(&mut self, descent: &Descent<'_, '_>) -> Result<Vec<TraceLevel>, BTreeError> {
        let depth = usize::from(self.root.depth);
        let mut trace = Vec::with_capacity(depth);
        let mut offset = self.root.node;

        loop {
            let node = self.read_node(offset)?;
            if node.is_leaf() != (trace.len() + 1 == depth) {
                return Err(BTreeError::corrupt(format!(
                    "node {offset} at level {} of a depth {depth} tree has the wrong kind",
                    trace.len()
                )));
            }

            let at = match descent {
                Descent::First => 0,
                Descent::Last if node.is_leaf() => node.len().saturating_sub(1),
                Descent::Last => node.len(),
                // Leaf: lower bound. Internal: equal keys descend right.
                Descent::Key(key) if node.is_leaf() => self.partition(&node, key, Ordering::is_lt)?,
                Descent::Key(key) => self.partition(&node, key, Ordering::is_le)?,
            };
            trace.push(TraceLevel { node: offset, at });

            if node.is_leaf() {
                return Ok(trace);
            }
            offset = node.child_at(at);
        }
    }

    /// Put the lower bound of `key` in `trace`; returns whether it is an exact match.
    ///
    /// The slot may be one past the last record of its leaf.
    fn locate(&mut self, key: &SearchKey<'_>, trace: &mut Vec<TraceLevel>) -> Result<bool, BTreeError> {
        *trace = self.descend(&Descent::Key(key))?;
        if matches!(self.mode, KeyMode::Hashed { .. }) {
            self.rewind_hash_ties(key, trace)?;
        }

        let Some(&TraceLevel { node, at }) = trace.last() else {
            return Ok(false);
        };
        let leaf = self.read_node(node)?;
        match leaf.records.get(at) {
            Some(rec) => Ok(self.compare(rec, true, key)? == Ordering::Equal),
            None => Ok(false),
        }
    }

    /// Internal nodes only see hashed keys, so records sharing a hashed key
    /// can straddle a leaf boundary left of where the descent landed. Walk
    /// back while the previous leaf still ends at or above `key`.
    fn rewind_hash_ties(&mut self, key: &SearchKey<'_>, trace: &mut Vec<TraceLevel>) -> Result<(), BTreeError> {
        while trace.last().is_some_and(|level| level.at == 0) {
            let mut prev = trace.clone();
            if !self.step(&mut prev, false)? {
                return Ok(());
            }
            let Some(level) = prev.last_mut() else {
                return Ok(());
            };
            let leaf = self.read_node(level.node)?;
            let Some(last) = leaf.records.get(level.at) else {
                return Ok(());
            };
            if self.compare(last, true, key)? == Ordering::Less {
                return Ok(());
            }
            level.at = self.partition(&leaf, key, Ordering::is_lt)?;
            tracing::trace!("hashed key tie: lower bound moved to leaf {}", level.node);
            *trace = prev;
        }
        Ok(())
    }

    /// If the leaf slot is one past the end, move to the next record.
    fn settle_forward(&mut self, trace: &mut [TraceLevel]) -> Result<bool, BTreeError> {
        let Some(level) = trace.last_mut() else {
            return Ok(false);
        };
        let len = self.read_node(level.node)?.len();
        if level.at < len {
            return Ok(true);
        }
        level.at = len.saturating_sub(1);
        self.step(trace, true)
    }

    /// Move the leaf slot of `trace` one record forward or backward.
    ///
    /// Returns false, leaving `trace` unchanged, at either end of the tree.
    pub(super) fn step(&mut self, trace: &mut [TraceLevel], forward: bool) -> Result<bool, BTreeError> {
        let Some(leaf_level) = trace.len().checked_sub(1) else {
            return Ok(false);
        };
        let leaf_len = self.read_node(trace[leaf_level].node)?.len();
        let at = trace[leaf_level].at;
        if forward && at + 1 < leaf_len {
            trace[leaf_level].at += 1;
            return Ok(true);
        }
        if !forward && at > 0 {
            trace[leaf_level].at = (at - 1).min(leaf_len.saturating_sub(1));
            return Ok(true);
        }

        // Climb to the nearest ancestor with a sibling in this direction
        for level in (0..leaf_level).rev() {
            let node = self.read_node(trace[level].node)?;
            let at = trace[level].at;
            let next = if forward {
                (at < node.len()).then_some(at + 1)
            } else {
                at.checked_sub(1)
            };
            let Some(child_index) = next else {
                continue;
            };

            // Descend along the near edge of the sibling subtree
            trace[level].at = child_index;
            let mut offset = node.child_at(child_index);
            for lower in &mut trace[level + 1..] {
                let child = self.read_node(offset)?;
                let at = match (forward, child.is_leaf()) {
                    (true, _) => 0,
                    (false, true) => child.len().saturating_sub(1),
                    (false, false) => child.len(),
                };
                *lower = TraceLevel { node: offset, at };
                offset = child.child_at(at);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Classify the record at the leaf slot of `trace`.
    pub(super) fn availability(&mut self, trace: &[TraceLevel], intent: Intent) -> Result<Availability, BTreeError> {
        let rec = self.record_at(trace)?;
        let (ops, ctx) = self.class_ctx();
        ops.check_availability(&ctx, &rec, intent)
    }

    /// Step over unavailable records; returns false if none is left.
    pub(super) fn skip_unavailable(
        &mut self,
        trace: &mut [TraceLevel],
        forward: bool,
        intent: Intent,
    ) -> Result<bool, BTreeError> {
        loop {
            if self.availability(trace, intent)? != Availability::Unavailable {
                return Ok(true);
            }
            if !self.step(trace, forward)? {
                return Ok(false);
            }
        }
    }

    /// Path to the leftmost record, ignoring visibility.
    pub(super) fn first_trace(&mut self) -> Result<Vec<TraceLevel>, BTreeError> {
        self.descend(&Descent::First)
    }
}

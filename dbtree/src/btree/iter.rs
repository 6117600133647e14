//! Cursor iteration with resumable anchors.

use std::any::Any;
use std::ops::ControlFlow;

use crate::btree::anchor::{Anchor, AnchorState};
use crate::btree::class::Intent;
use crate::btree::probe::{Cursor, ProbeOpc};
use crate::btree::tree::{Entry, Tree};
use crate::error::BTreeError;

/// Options for [`Tree::iter_prepare`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterOptions {
    /// Keep the iterator path in the handle's own cursor slot instead of a
    /// private one. After the iterator finishes, a `ProbeOpc::Bypass`
    /// operation on the handle acts on the record the iterator stopped at,
    /// provided nothing changed the tree in between.
    pub embedded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Not probed yet, or invalidated by a delete.
    Unset,
    Record,
    End,
}

/// An iterator over one tree.
///
/// Any change to the tree other than [`delete`](Self::delete) through this
/// iterator makes further steps fail with `InvalidArgument`.
pub struct TreeIter<'t, 'a> {
    tree: &'t mut Tree<'a>,
    embedded: bool,
    cursor: Cursor,
    position: Position,
    intent: Intent,
}

impl std::fmt::Debug for TreeIter<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeIter")
            .field("embedded", &self.embedded)
            .field("position", &self.position)
            .field("intent", &self.intent)
            .finish_non_exhaustive()
    }
}

impl<'a> Tree<'a> {
    /// Create an iterator. It must be positioned with
    /// [`TreeIter::probe`] before use.
    pub fn iter_prepare(&mut self, options: IterOptions) -> Result<TreeIter<'_, 'a>, BTreeError> {
        self.ensure_open()?;
        if options.embedded {
            self.cursor = Cursor::default();
        }
        Ok(TreeIter {
            tree: self,
            embedded: options.embedded,
            cursor: Cursor::default(),
            position: Position::Unset,
            intent: Intent::DEFAULT,
        })
    }

    /// Walk every visible record in order, or in reverse if `backward`.
    ///
    /// Stops early when `visit` breaks; an error from `visit` stops the walk
    /// and is returned.
    pub fn iterate<F>(&mut self, intent: Intent, backward: bool, mut visit: F) -> Result<(), BTreeError>
    where
        F: FnMut(&Entry) -> Result<ControlFlow<()>, BTreeError>,
    {
        let mut iter = self.iter_prepare(IterOptions::default())?;
        let opc = if backward { ProbeOpc::Last } else { ProbeOpc::First };
        match iter.probe(opc, intent, None) {
            Ok(()) => {}
            Err(BTreeError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        }

        loop {
            let entry = iter.entry()?;
            if visit(&entry)?.is_break() {
                return Ok(());
            }
            let moved = if backward { iter.prev_record()? } else { iter.next_record()? };
            if !moved {
                return Ok(());
            }
        }
    }
}

impl TreeIter<'_, '_> {
    fn with_cursor<R>(&mut self, f: impl FnOnce(&mut Tree<'_>, &mut Cursor) -> R) -> R {
        let slot = if self.embedded { &mut self.tree.cursor } else { &mut self.cursor };
        let mut cursor = std::mem::take(slot);
        let result = f(&mut *self.tree, &mut cursor);
        if self.embedded {
            self.tree.cursor = cursor;
        } else {
            self.cursor = cursor;
        }
        result
    }

    /// Position the iterator with `opc` and `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if no visible record matches; the iterator is then at its
    /// end.
    pub fn probe(&mut self, opc: ProbeOpc, intent: Intent, key: Option<&[u8]>) -> Result<(), BTreeError> {
        if opc == ProbeOpc::Bypass {
            return Err(BTreeError::invalid("iterators cannot probe with Bypass"));
        }
        self.intent = intent;
        let found = self.with_cursor(|tree, cursor| tree.probe_with(cursor, opc, intent, key));
        match found {
            Ok(true) => {
                self.position = Position::Record;
                Ok(())
            }
            Ok(false) => {
                self.position = Position::End;
                Err(BTreeError::NotFound)
            }
            Err(e) => {
                self.position = Position::Unset;
                Err(e)
            }
        }
    }

    /// Position the iterator from an anchor captured by [`fetch`](Self::fetch).
    ///
    /// A zero anchor starts from the first record, or the last for `Lt`,
    /// `Le` and `Last`. An end-of-iteration anchor finds nothing.
    pub fn probe_anchor(&mut self, opc: ProbeOpc, intent: Intent, anchor: &Anchor) -> Result<(), BTreeError> {
        match anchor.state() {
            AnchorState::Zero => {
                let opc = match opc {
                    ProbeOpc::First | ProbeOpc::Ge | ProbeOpc::Gt => ProbeOpc::First,
                    ProbeOpc::Last | ProbeOpc::Le | ProbeOpc::Lt => ProbeOpc::Last,
                    ProbeOpc::Eq | ProbeOpc::Bypass => {
                        return Err(BTreeError::invalid(format!("{opc:?} probe needs a key anchor")));
                    }
                };
                self.probe(opc, intent, None)
            }
            AnchorState::Eof => {
                self.intent = intent;
                self.position = Position::End;
                Err(BTreeError::NotFound)
            }
            AnchorState::Key => {
                let key = {
                    let (ops, ctx) = self.tree.class_ctx();
                    ops.key_decode(&ctx, anchor)?
                };
                self.probe(opc, intent, Some(&key))
            }
        }
    }

    /// Advance to the next visible record. Returns false at the end.
    pub fn next_record(&mut self) -> Result<bool, BTreeError> {
        self.advance(true)
    }

    /// Move back to the previous visible record. Returns false at the start.
    pub fn prev_record(&mut self) -> Result<bool, BTreeError> {
        self.advance(false)
    }

    fn advance(&mut self, forward: bool) -> Result<bool, BTreeError> {
        match self.position {
            Position::Unset => return Err(BTreeError::invalid("iterator is not positioned; probe first")),
            Position::End => return Ok(false),
            Position::Record => {}
        }
        let intent = self.intent;
        let moved = self.with_cursor(|tree, cursor| {
            tree.check_cursor(cursor)?;
            Ok::<_, BTreeError>(
                tree.step(&mut cursor.trace, forward)?
                    && tree.skip_unavailable(&mut cursor.trace, forward, intent)?,
            )
        })?;
        if !moved {
            self.position = Position::End;
        }
        Ok(moved)
    }

    /// The current record.
    pub fn entry(&mut self) -> Result<Entry, BTreeError> {
        self.ensure_record()?;
        let intent = self.intent;
        self.with_cursor(|tree, cursor| {
            tree.check_cursor(cursor)?;
            tree.entry_at(&cursor.trace, intent)
        })
    }

    /// The current record and an anchor from which a later iterator can
    /// resume.
    pub fn fetch(&mut self) -> Result<(Entry, Anchor), BTreeError> {
        let entry = self.entry()?;
        let mut anchor = Anchor::new();
        let (ops, ctx) = self.tree.class_ctx();
        ops.key_encode(&ctx, &entry.key, &mut anchor)?;
        Ok((entry, anchor))
    }

    /// Remove the current record. The iterator must be probed again before
    /// it can be used.
    pub fn delete(&mut self, args: Option<&mut dyn Any>) -> Result<(), BTreeError> {
        self.ensure_record()?;
        let result = self.with_cursor(|tree, cursor| {
            tree.check_cursor(cursor)?;
            let result = tree.remove_at(&cursor.trace, args);
            cursor.reset();
            result
        });
        self.position = Position::Unset;
        result
    }

    /// Whether the underlying tree holds no records.
    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        self.tree.is_empty()
    }

    /// Release the iterator.
    pub fn finish(self) {
        tracing::trace!("iterator finished at {:?}", self.position);
    }

    fn ensure_record(&self) -> Result<(), BTreeError> {
        match self.position {
            Position::Record => Ok(()),
            Position::End => Err(BTreeError::NotFound),
            Position::Unset => Err(BTreeError::invalid("iterator is not positioned; probe first")),
        }
    }
}

impl Tree<'_> {
    /// Reject a cursor taken before the last change to the tree.
    fn check_cursor(&self, cursor: &Cursor) -> Result<(), BTreeError> {
        self.ensure_open()?;
        if cursor.generation != self.root.generation {
            return Err(BTreeError::invalid("tree changed since the iterator was probed"));
        }
        Ok(())
    }
}

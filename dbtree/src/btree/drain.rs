//! Incremental destruction.

use std::any::Any;

use crate::btree::probe::Cursor;
use crate::btree::tree::Tree;
use crate::error::BTreeError;

/// Result of one [`Tree::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainStatus {
    /// Credits left unused.
    pub credits: u32,
    /// The tree became empty and was destroyed.
    pub destroyed: bool,
}

impl Tree<'_> {
    /// Remove up to `credits` records from the left edge of the tree.
    ///
    /// Once the tree is empty the root is released as by
    /// [`destroy`](Self::destroy) and the handle becomes unusable; callers
    /// keep draining until `destroyed` is reported.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `credits` is zero.
    pub fn drain(&mut self, credits: u32, mut args: Option<&mut dyn Any>) -> Result<DrainStatus, BTreeError> {
        self.ensure_open()?;
        if credits == 0 {
            return Err(BTreeError::invalid("drain needs at least one credit"));
        }
        self.cursor = Cursor::default();

        let mut left = credits;
        while left > 0 && self.root.depth > 0 {
            let trace = self.first_trace()?;
            self.remove_at(&trace, args.as_deref_mut())?;
            left -= 1;
        }

        let destroyed = self.root.depth == 0;
        if destroyed {
            self.release_root()?;
        }
        tracing::debug!(
            "drained {} records from tree {}, destroyed={destroyed}",
            credits - left,
            self.root_off
        );
        Ok(DrainStatus { credits: left, destroyed })
    }
}

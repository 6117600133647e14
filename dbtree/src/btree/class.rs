//! Tree class capability set.
//!
//! A class decides how keys compare and how record bodies are stored. The
//! engine only ever sees a record as a body offset plus an inline key; every
//! byte behind the body offset belongs to the class.

use std::any::Any;
use std::cmp::Ordering;
use std::ops::BitOr;

use crate::arena::{Arena, Offset};
use crate::btree::anchor::Anchor;
use crate::error::BTreeError;

/// Feature bits of a tree instance or class.
///
/// Bits above the engine-defined ones are class-defined and passed through
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Features(u64);

impl Features {
    /// No features: hashed keys, fixed-size root.
    pub const NONE: Self = Self(0);
    /// Keys are unsigned 64-bit integers stored inline.
    pub const UINT_KEY: Self = Self(1);
    /// Keys are compared in full through the class; nothing is hashed.
    pub const DIRECT_KEY: Self = Self(1 << 1);
    /// The root node starts small and grows to full order before splitting.
    pub const DYNAMIC_ROOT: Self = Self(1 << 2);

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether every bit of `self` is set in `other`.
    #[must_use]
    pub const fn is_subset_of(self, other: Self) -> bool {
        other.contains(self)
    }
}

impl BitOr for Features {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Caller-supplied reason for a visibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Intent(pub u32);

impl Intent {
    /// Ordinary read or update.
    pub const DEFAULT: Self = Self(0);
    /// Cleanup pass that must see every record regardless of state.
    pub const PURGE: Self = Self(1);
}

/// Outcome of a record visibility check.
///
/// An in-progress writer is reported as `Err(BTreeError::Conflict)` rather
/// than as a variant, so it always surfaces to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Visible and clean.
    Clean,
    /// Visible, but the caller should clean it up.
    Dirty,
    /// Not visible under this intent; probes skip it.
    Unavailable,
}

/// Inline comparison key of a record.
///
/// Exactly one representation is used per tree, selected from the feature
/// mask when the tree is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InlineKey {
    /// Fixed-size hashed key compared byte-wise.
    Hashed(Vec<u8>),
    /// Unsigned integer key.
    Uint(u64),
    /// Direct-key trees: in an internal node, the offset of the leaf whose
    /// first record holds the separator key. Leaf records carry
    /// [`NULL_OFFSET`](crate::arena::NULL_OFFSET).
    Direct(Offset),
}

/// One entry of a node.
///
/// In a leaf, `body` is the class-allocated record body. In an internal
/// node, `body` is the child node holding keys at or above `key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub body: Offset,
    pub key: InlineKey,
}

/// Size of one record as reported by a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordStat {
    pub key_size: usize,
    pub value_size: usize,
}

/// What a class callback can see of the tree it serves.
pub struct ClassCtx<'t> {
    arena: &'t mut dyn Arena,
    private: Option<&'t (dyn Any + Send)>,
    features: Features,
}

impl<'t> ClassCtx<'t> {
    pub(crate) fn new(
        arena: &'t mut dyn Arena,
        private: Option<&'t (dyn Any + Send)>,
        features: Features,
    ) -> Self {
        Self {
            arena,
            private,
            features,
        }
    }

    /// The arena the tree lives in.
    #[must_use]
    pub fn arena(&self) -> &dyn Arena {
        &*self.arena
    }

    /// Mutable access to the arena, for body allocation and updates.
    pub fn arena_mut(&mut self) -> &mut dyn Arena {
        &mut *self.arena
    }

    /// The opener's private context, if it has type `T`.
    #[must_use]
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.and_then(|p| p.downcast_ref::<T>())
    }

    /// Feature mask of the tree instance.
    #[must_use]
    pub const fn features(&self) -> Features {
        self.features
    }
}

/// Capability set of a tree class.
///
/// `rec_alloc`, `rec_free` and `rec_fetch` are required; everything else has
/// a default. Comparisons report the order of the *record* relative to the
/// probed key.
pub trait TreeClass: Send + Sync {
    /// Size of the hashed key in bytes, 0 if the class does not hash.
    fn hkey_size(&self) -> usize {
        0
    }

    /// Fill `hkey` (exactly `hkey_size()` bytes) from `key`.
    ///
    /// The default copies the key prefix, zero padded.
    fn hkey_gen(&self, _ctx: &ClassCtx<'_>, key: &[u8], hkey: &mut [u8]) {
        let len = key.len().min(hkey.len());
        hkey[..len].copy_from_slice(&key[..len]);
        hkey[len..].fill(0);
    }

    /// Compare a stored hashed key with a probed one.
    fn hkey_cmp(&self, rec_hkey: &[u8], hkey: &[u8]) -> Ordering {
        rec_hkey.cmp(hkey)
    }

    /// Compare the full key of a leaf record with `key`.
    ///
    /// `None` means the class cannot compare full keys: hashed trees then
    /// treat equal hashed keys as a match, and direct-key trees fail.
    fn key_cmp(
        &self,
        _ctx: &ClassCtx<'_>,
        _rec: &Record,
        _key: &[u8],
    ) -> Result<Option<Ordering>, BTreeError> {
        Ok(None)
    }

    /// Encode `key` into an anchor.
    fn key_encode(&self, _ctx: &ClassCtx<'_>, key: &[u8], anchor: &mut Anchor) -> Result<(), BTreeError> {
        anchor.embed_key(key)
    }

    /// Recover the key stored in an anchor by `key_encode`.
    fn key_decode(&self, _ctx: &ClassCtx<'_>, anchor: &Anchor) -> Result<Vec<u8>, BTreeError> {
        anchor.embedded_key().map(<[u8]>::to_vec)
    }

    /// Allocate a record body for `key`. A `None` value is a punch.
    fn rec_alloc(
        &self,
        ctx: &mut ClassCtx<'_>,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<Offset, BTreeError>;

    /// Release a record body.
    ///
    /// `args` is whatever the caller of delete/drain/destroy passed through.
    fn rec_free(
        &self,
        ctx: &mut ClassCtx<'_>,
        rec: &Record,
        args: Option<&mut dyn Any>,
    ) -> Result<(), BTreeError>;

    /// Return `(key, value)` of a leaf record.
    fn rec_fetch(&self, ctx: &ClassCtx<'_>, rec: &Record) -> Result<(Vec<u8>, Vec<u8>), BTreeError>;

    /// Update a record in place.
    ///
    /// Return `Err(BTreeError::NoPermission)` to make the engine allocate a
    /// fresh body and free the old one instead. A class may also move the
    /// body itself by changing `rec.body`.
    fn rec_update(
        &self,
        _ctx: &mut ClassCtx<'_>,
        _rec: &mut Record,
        _value: Option<&[u8]>,
    ) -> Result<(), BTreeError> {
        Err(BTreeError::NoPermission)
    }

    /// Key and value sizes of a leaf record.
    fn rec_stat(&self, ctx: &ClassCtx<'_>, rec: &Record) -> Result<RecordStat, BTreeError> {
        let (key, value) = self.rec_fetch(ctx, rec)?;
        Ok(RecordStat {
            key_size: key.len(),
            value_size: value.len(),
        })
    }

    /// Human-readable rendering of a record for `Tree::dump`.
    fn rec_string(&self, _ctx: &ClassCtx<'_>, rec: &Record, leaf: bool) -> String {
        if leaf {
            format!("{:?} -> body {}", rec.key, rec.body)
        } else {
            format!("{:?} -> node {}", rec.key, rec.body)
        }
    }

    /// Metadata bytes per record body beyond key and value, if known.
    fn rec_msize(&self, _alloc_overhead: usize) -> Option<usize> {
        None
    }

    /// Classify a leaf record under `intent`.
    fn check_availability(
        &self,
        _ctx: &ClassCtx<'_>,
        _rec: &Record,
        _intent: Intent,
    ) -> Result<Availability, BTreeError> {
        Ok(Availability::Clean)
    }

    /// Allocate a node of `size` bytes.
    fn node_alloc(&self, ctx: &mut ClassCtx<'_>, size: usize) -> Result<Offset, BTreeError> {
        Ok(ctx.arena_mut().allocate(size)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_subsets() {
        let class = Features::UINT_KEY | Features::DYNAMIC_ROOT;
        assert!(Features::UINT_KEY.is_subset_of(class));
        assert!(Features::NONE.is_subset_of(class));
        assert!(!Features::DIRECT_KEY.is_subset_of(class));
        assert!(class.contains(Features::DYNAMIC_ROOT));
        assert_eq!(class.bits(), 5);
    }

    #[test]
    fn test_class_defined_bits_pass_through() {
        let custom = Features::from_bits(1 << 20) | Features::UINT_KEY;
        assert_eq!(custom.bits(), (1 << 20) | 1);
        assert!(custom.contains(Features::from_bits(1 << 20)));
    }
}

//! Built-in tree classes.
//!
//! All three store record bodies in the same layout:
//!
//! ```text
//! state     u8     RecordState
//! padding   3 bytes
//! key_len   u32    0 for integer keys, which live inline
//! val_len   u32
//! key       key_len bytes
//! value     val_len bytes
//! ```
//!
//! New records take their state from the opener-private context when it is a
//! [`RecordState`], so a caller can stage dirty or hidden records.

mod direct;
mod hashed;
mod uint;

use std::any::Any;

use crate::arena::{Arena, Offset};
use crate::btree::{Availability, ClassCtx, Features, Intent, Record, register_class};
use crate::error::BTreeError;

pub use direct::{DIRECT_ANCHOR_KEY_MAX, DirectKeyClass};
pub use hashed::{HASHED_KEY_SIZE, HashedKeyClass, hash_key};
pub use uint::UintKeyClass;

/// Class id of [`UintKeyClass`].
pub const CLASS_UINT: u32 = 1;
/// Class id of [`HashedKeyClass`].
pub const CLASS_HASHED: u32 = 2;
/// Class id of [`DirectKeyClass`].
pub const CLASS_DIRECT: u32 = 3;

const BODY_HEADER_SIZE: usize = 12;

/// Visibility state stored in every record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RecordState {
    #[default]
    Committed = 0,
    /// Visible, reported as dirty.
    Dirty = 1,
    /// Invisible except to purges.
    Hidden = 2,
    /// Owned by an unfinished writer; readers get a conflict.
    InProgress = 3,
}

impl TryFrom<u8> for RecordState {
    type Error = BTreeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Committed),
            1 => Ok(Self::Dirty),
            2 => Ok(Self::Hidden),
            3 => Ok(Self::InProgress),
            other => Err(BTreeError::corrupt(format!("unknown record state {other}"))),
        }
    }
}

impl RecordState {
    /// Visibility of a record in this state under `intent`.
    pub fn availability(self, intent: Intent) -> Result<Availability, BTreeError> {
        if intent == Intent::PURGE {
            return Ok(Availability::Clean);
        }
        match self {
            Self::Committed => Ok(Availability::Clean),
            Self::Dirty => Ok(Availability::Dirty),
            Self::Hidden => Ok(Availability::Unavailable),
            Self::InProgress => Err(BTreeError::Conflict),
        }
    }
}

/// Register the built-in classes under their default ids.
///
/// Classes that are already registered are left alone, so this may be
/// called more than once.
pub fn register_builtin_classes() -> Result<(), BTreeError> {
    let results = [
        register_class(CLASS_UINT, Features::UINT_KEY | Features::DYNAMIC_ROOT, UintKeyClass),
        register_class(CLASS_HASHED, Features::DYNAMIC_ROOT, HashedKeyClass),
        register_class(CLASS_DIRECT, Features::DIRECT_KEY | Features::DYNAMIC_ROOT, DirectKeyClass),
    ];
    for result in results {
        match result {
            Ok(()) | Err(BTreeError::AlreadyRegistered(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BodyHeader {
    state: RecordState,
    key_len: usize,
    val_len: usize,
}

impl BodyHeader {
    fn read(arena: &dyn Arena, body: Offset) -> Result<Self, BTreeError> {
        let mut bytes = [0u8; BODY_HEADER_SIZE];
        arena.read(body, &mut bytes)?;
        let key_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let val_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        Ok(Self {
            state: RecordState::try_from(bytes[0])?,
            key_len: key_len as usize,
            val_len: val_len as usize,
        })
    }

    fn to_bytes(self) -> Result<[u8; BODY_HEADER_SIZE], BTreeError> {
        let len = |n: usize| {
            u32::try_from(n).map_err(|_| BTreeError::invalid(format!("record field of {n} bytes is too large")))
        };
        let mut bytes = [0u8; BODY_HEADER_SIZE];
        bytes[0] = self.state as u8;
        bytes[4..8].copy_from_slice(&len(self.key_len)?.to_le_bytes());
        bytes[8..12].copy_from_slice(&len(self.val_len)?.to_le_bytes());
        Ok(bytes)
    }
}

/// State for records written through `ctx`.
fn staged_state(ctx: &ClassCtx<'_>) -> RecordState {
    ctx.private::<RecordState>().copied().unwrap_or_default()
}

/// Allocate and fill a body. `key` is empty for inline integer keys.
fn alloc_body(ctx: &mut ClassCtx<'_>, key: &[u8], value: Option<&[u8]>) -> Result<Offset, BTreeError> {
    let value = value.unwrap_or_default();
    let header = BodyHeader {
        state: staged_state(ctx),
        key_len: key.len(),
        val_len: value.len(),
    }
    .to_bytes()?;

    let mut bytes = Vec::with_capacity(BODY_HEADER_SIZE + key.len() + value.len());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(key);
    bytes.extend_from_slice(value);

    let arena = ctx.arena_mut();
    let body = arena.allocate(bytes.len())?;
    arena.write(body, &bytes)?;
    Ok(body)
}

/// Stored key and value of a body.
fn read_body(arena: &dyn Arena, body: Offset) -> Result<(RecordState, Vec<u8>, Vec<u8>), BTreeError> {
    let header = BodyHeader::read(arena, body)?;
    let mut payload = arena.read_vec(body + BODY_HEADER_SIZE as u64, header.key_len + header.val_len)?;
    let value = payload.split_off(header.key_len);
    Ok((header.state, payload, value))
}

/// Stored key of a body, without the value.
fn read_key(arena: &dyn Arena, body: Offset) -> Result<Vec<u8>, BTreeError> {
    let header = BodyHeader::read(arena, body)?;
    Ok(arena.read_vec(body + BODY_HEADER_SIZE as u64, header.key_len)?)
}

/// Overwrite the value when its length is unchanged.
fn update_body(ctx: &mut ClassCtx<'_>, rec: &Record, value: Option<&[u8]>) -> Result<(), BTreeError> {
    let value = value.unwrap_or_default();
    let state = staged_state(ctx);
    let arena = ctx.arena_mut();
    let mut header = BodyHeader::read(arena, rec.body)?;
    if header.val_len != value.len() {
        return Err(BTreeError::NoPermission);
    }
    header.state = state;
    arena.write(rec.body, &header.to_bytes()?)?;
    arena.write(rec.body + (BODY_HEADER_SIZE + header.key_len) as u64, value)?;
    Ok(())
}

/// Free a body, handing its value to `args` when that is a `Vec<u8>`.
fn free_body(ctx: &mut ClassCtx<'_>, rec: &Record, args: Option<&mut dyn Any>) -> Result<(), BTreeError> {
    if let Some(out) = args.and_then(|args| args.downcast_mut::<Vec<u8>>()) {
        *out = read_body(ctx.arena(), rec.body)?.2;
    }
    ctx.arena_mut().free(rec.body)?;
    Ok(())
}

fn body_availability(ctx: &ClassCtx<'_>, rec: &Record, intent: Intent) -> Result<Availability, BTreeError> {
    BodyHeader::read(ctx.arena(), rec.body)?.state.availability(intent)
}

const fn body_msize(alloc_overhead: usize) -> usize {
    BODY_HEADER_SIZE + alloc_overhead
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;

    #[test]
    fn test_state_availability() {
        assert_eq!(
            RecordState::Committed.availability(Intent::DEFAULT).expect("committed"),
            Availability::Clean
        );
        assert_eq!(
            RecordState::Dirty.availability(Intent::DEFAULT).expect("dirty"),
            Availability::Dirty
        );
        assert_eq!(
            RecordState::Hidden.availability(Intent::DEFAULT).expect("hidden"),
            Availability::Unavailable
        );
        assert!(matches!(
            RecordState::InProgress.availability(Intent::DEFAULT),
            Err(BTreeError::Conflict)
        ));
        assert_eq!(
            RecordState::InProgress.availability(Intent::PURGE).expect("purge sees all"),
            Availability::Clean
        );
    }

    #[test]
    fn test_body_layout() {
        let mut arena = HeapArena::new();
        let mut ctx = ClassCtx::new(&mut arena, None, Features::NONE);
        let body = alloc_body(&mut ctx, b"key", Some(b"value")).expect("alloc");

        let (state, key, value) = read_body(ctx.arena(), body).expect("read");
        assert_eq!(state, RecordState::Committed);
        assert_eq!(key, b"key");
        assert_eq!(value, b"value");
        assert_eq!(read_key(ctx.arena(), body).expect("key"), b"key");
    }

    #[test]
    fn test_update_requires_same_length() {
        let mut arena = HeapArena::new();
        let mut ctx = ClassCtx::new(&mut arena, None, Features::NONE);
        let body = alloc_body(&mut ctx, b"k", Some(b"aaaa")).expect("alloc");
        let rec = Record { body, key: crate::btree::InlineKey::Hashed(vec![0; 16]) };

        update_body(&mut ctx, &rec, Some(b"bbbb")).expect("same length");
        assert_eq!(read_body(ctx.arena(), body).expect("read").2, b"bbbb");
        assert!(matches!(
            update_body(&mut ctx, &rec, Some(b"longer")),
            Err(BTreeError::NoPermission)
        ));
    }

    #[test]
    fn test_free_preserves_value() {
        let mut arena = HeapArena::new();
        let mut ctx = ClassCtx::new(&mut arena, None, Features::NONE);
        let body = alloc_body(&mut ctx, b"k", Some(b"kept")).expect("alloc");
        let rec = Record { body, key: crate::btree::InlineKey::Uint(1) };

        let mut out = Vec::<u8>::new();
        free_body(&mut ctx, &rec, Some(&mut out)).expect("free");
        assert_eq!(out, b"kept");
        assert!(!arena.is_live(body));
    }

    #[test]
    fn test_staged_state_from_private() {
        let mut arena = HeapArena::new();
        let staged = RecordState::Hidden;
        let mut ctx = ClassCtx::new(&mut arena, Some(&staged), Features::NONE);
        let body = alloc_body(&mut ctx, b"", Some(b"v")).expect("alloc");
        assert_eq!(read_body(ctx.arena(), body).expect("read").0, RecordState::Hidden);
    }
}

//! Direct-key class.
//!
//! Nothing is hashed: every comparison reads the full key from the record
//! body, so iteration follows lexicographic key order.

use std::any::Any;
use std::cmp::Ordering;

use crate::arena::Offset;
use crate::btree::{Anchor, Availability, ClassCtx, InlineKey, Intent, Record, TreeClass};
use crate::classes::{
    alloc_body, body_availability, body_msize, free_body, read_body, read_key, update_body,
};
use crate::error::BTreeError;

/// Longest key the anchor encoding of this class holds: the payload minus a
/// 2-byte length.
pub const DIRECT_ANCHOR_KEY_MAX: usize = 102;

/// Byte keys compared lexicographically in full.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectKeyClass;

impl TreeClass for DirectKeyClass {
    fn key_cmp(&self, ctx: &ClassCtx<'_>, rec: &Record, key: &[u8]) -> Result<Option<Ordering>, BTreeError> {
        let stored = read_key(ctx.arena(), rec.body)?;
        Ok(Some(stored.as_slice().cmp(key)))
    }

    fn key_encode(&self, _ctx: &ClassCtx<'_>, key: &[u8], anchor: &mut Anchor) -> Result<(), BTreeError> {
        let len = u16::try_from(key.len())
            .ok()
            .filter(|&len| usize::from(len) <= DIRECT_ANCHOR_KEY_MAX)
            .ok_or_else(|| {
                BTreeError::invalid(format!(
                    "key of {} bytes does not fit in an anchor ({DIRECT_ANCHOR_KEY_MAX} max)",
                    key.len()
                ))
            })?;
        let mut payload = Vec::with_capacity(2 + key.len());
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(key);
        anchor.set_payload(&payload)
    }

    fn key_decode(&self, _ctx: &ClassCtx<'_>, anchor: &Anchor) -> Result<Vec<u8>, BTreeError> {
        let payload = anchor.payload();
        let len = usize::from(u16::from_le_bytes([payload[0], payload[1]]));
        if len > DIRECT_ANCHOR_KEY_MAX {
            return Err(BTreeError::invalid(format!("anchor key length {len} is invalid")));
        }
        Ok(payload[2..2 + len].to_vec())
    }

    fn rec_alloc(&self, ctx: &mut ClassCtx<'_>, key: &[u8], value: Option<&[u8]>) -> Result<Offset, BTreeError> {
        alloc_body(ctx, key, value)
    }

    fn rec_free(&self, ctx: &mut ClassCtx<'_>, rec: &Record, args: Option<&mut dyn Any>) -> Result<(), BTreeError> {
        free_body(ctx, rec, args)
    }

    fn rec_fetch(&self, ctx: &ClassCtx<'_>, rec: &Record) -> Result<(Vec<u8>, Vec<u8>), BTreeError> {
        let (_, key, value) = read_body(ctx.arena(), rec.body)?;
        Ok((key, value))
    }

    fn rec_update(&self, ctx: &mut ClassCtx<'_>, rec: &mut Record, value: Option<&[u8]>) -> Result<(), BTreeError> {
        update_body(ctx, rec, value)
    }

    fn rec_string(&self, ctx: &ClassCtx<'_>, rec: &Record, leaf: bool) -> String {
        if let (InlineKey::Direct(leaf_off), false) = (&rec.key, leaf) {
            // Separator keys live in the first record of the named leaf
            return format!("first key of leaf {leaf_off} -> node {}", rec.body);
        }
        match read_key(ctx.arena(), rec.body) {
            Ok(key) => format!("{} -> body {}", String::from_utf8_lossy(&key), rec.body),
            Err(e) => format!("<{e}> -> body {}", rec.body),
        }
    }

    fn rec_msize(&self, alloc_overhead: usize) -> Option<usize> {
        Some(body_msize(alloc_overhead))
    }

    fn check_availability(&self, ctx: &ClassCtx<'_>, rec: &Record, intent: Intent) -> Result<Availability, BTreeError> {
        body_availability(ctx, rec, intent)
    }
}

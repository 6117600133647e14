//! Integer-key class.

use std::any::Any;

use crate::arena::Offset;
use crate::btree::{Availability, ClassCtx, InlineKey, Intent, Record, RecordStat, TreeClass};
use crate::classes::{
    BodyHeader, alloc_body, body_availability, body_msize, free_body, read_body, update_body,
};
use crate::error::BTreeError;

/// Keys are 8-byte little-endian `u64`s held inline in the records; bodies
/// hold only the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct UintKeyClass;

fn inline_uint(rec: &Record) -> Result<u64, BTreeError> {
    match rec.key {
        InlineKey::Uint(key) => Ok(key),
        _ => Err(BTreeError::corrupt(format!("record {} has no integer key", rec.body))),
    }
}

impl TreeClass for UintKeyClass {
    fn rec_alloc(&self, ctx: &mut ClassCtx<'_>, _key: &[u8], value: Option<&[u8]>) -> Result<Offset, BTreeError> {
        alloc_body(ctx, &[], value)
    }

    fn rec_free(&self, ctx: &mut ClassCtx<'_>, rec: &Record, args: Option<&mut dyn Any>) -> Result<(), BTreeError> {
        free_body(ctx, rec, args)
    }

    fn rec_fetch(&self, ctx: &ClassCtx<'_>, rec: &Record) -> Result<(Vec<u8>, Vec<u8>), BTreeError> {
        let key = inline_uint(rec)?;
        let (_, _, value) = read_body(ctx.arena(), rec.body)?;
        Ok((key.to_le_bytes().to_vec(), value))
    }

    fn rec_update(&self, ctx: &mut ClassCtx<'_>, rec: &mut Record, value: Option<&[u8]>) -> Result<(), BTreeError> {
        update_body(ctx, rec, value)
    }

    fn rec_stat(&self, ctx: &ClassCtx<'_>, rec: &Record) -> Result<RecordStat, BTreeError> {
        let header = BodyHeader::read(ctx.arena(), rec.body)?;
        Ok(RecordStat {
            key_size: size_of::<u64>(),
            value_size: header.val_len,
        })
    }

    fn rec_string(&self, _ctx: &ClassCtx<'_>, rec: &Record, leaf: bool) -> String {
        let key = inline_uint(rec).map_or_else(|_| "?".to_string(), |key| key.to_string());
        if leaf {
            format!("{key} -> body {}", rec.body)
        } else {
            format!("{key} -> node {}", rec.body)
        }
    }

    fn rec_msize(&self, alloc_overhead: usize) -> Option<usize> {
        Some(body_msize(alloc_overhead))
    }

    fn check_availability(&self, ctx: &ClassCtx<'_>, rec: &Record, intent: Intent) -> Result<Availability, BTreeError> {
        body_availability(ctx, rec, intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;
    use crate::btree::Features;

    #[test]
    fn test_fetch_rebuilds_key_from_record() {
        let mut arena = HeapArena::new();
        let mut ctx = ClassCtx::new(&mut arena, None, Features::UINT_KEY);
        let body = UintKeyClass.rec_alloc(&mut ctx, &42u64.to_le_bytes(), Some(b"answer")).expect("alloc");
        let rec = Record { body, key: InlineKey::Uint(42) };

        let (key, value) = UintKeyClass.rec_fetch(&ctx, &rec).expect("fetch");
        assert_eq!(key, 42u64.to_le_bytes());
        assert_eq!(value, b"answer");

        let stat = UintKeyClass.rec_stat(&ctx, &rec).expect("stat");
        assert_eq!(stat, RecordStat { key_size: 8, value_size: 6 });
        assert_eq!(UintKeyClass.rec_string(&ctx, &rec, true), format!("42 -> body {body}"));
    }

    #[test]
    fn test_punch_stores_empty_value() {
        let mut arena = HeapArena::new();
        let mut ctx = ClassCtx::new(&mut arena, None, Features::UINT_KEY);
        let body = UintKeyClass.rec_alloc(&mut ctx, &1u64.to_le_bytes(), None).expect("alloc");
        let rec = Record { body, key: InlineKey::Uint(1) };
        assert!(UintKeyClass.rec_fetch(&ctx, &rec).expect("fetch").1.is_empty());
    }
}

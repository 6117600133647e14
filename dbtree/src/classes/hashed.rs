//! Hashed-key class.
//!
//! Records are ordered by a 16-byte hashed key and then by the full key, so
//! iteration order is hash order rather than key order.

use std::any::Any;
use std::cmp::Ordering;

use crate::arena::Offset;
use crate::btree::{Availability, ClassCtx, Intent, Record, TreeClass};
use crate::classes::{
    alloc_body, body_availability, body_msize, free_body, read_body, read_key, update_body,
};
use crate::error::BTreeError;

/// Size of the hashed key.
pub const HASHED_KEY_SIZE: usize = 16;

const PREFIX_LEN: usize = 8;

/// Hashed key of `key`: big-endian CRC32, big-endian length, then the
/// first 8 key bytes zero padded.
#[must_use]
pub fn hash_key(key: &[u8]) -> [u8; HASHED_KEY_SIZE] {
    let mut hkey = [0u8; HASHED_KEY_SIZE];
    hkey[..4].copy_from_slice(&crc32fast::hash(key).to_be_bytes());
    // Keys past 4 GiB share a length field
    let len = u32::try_from(key.len()).unwrap_or(u32::MAX);
    hkey[4..8].copy_from_slice(&len.to_be_bytes());
    let prefix = key.len().min(PREFIX_LEN);
    hkey[8..8 + prefix].copy_from_slice(&key[..prefix]);
    hkey
}

/// Arbitrary byte keys stored in the body, compared by hashed key with a
/// full-key tie break.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedKeyClass;

impl TreeClass for HashedKeyClass {
    fn hkey_size(&self) -> usize {
        HASHED_KEY_SIZE
    }

    fn hkey_gen(&self, _ctx: &ClassCtx<'_>, key: &[u8], hkey: &mut [u8]) {
        hkey.copy_from_slice(&hash_key(key));
    }

    fn key_cmp(&self, ctx: &ClassCtx<'_>, rec: &Record, key: &[u8]) -> Result<Option<Ordering>, BTreeError> {
        let stored = read_key(ctx.arena(), rec.body)?;
        Ok(Some(stored.as_slice().cmp(key)))
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
        if !leaf {
            return format!("{:?} -> node {}", rec.key, rec.body);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;
    use crate::btree::{Features, InlineKey};

    #[test]
    fn test_hash_key_layout() {
        let hkey = hash_key(b"abc");
        assert_eq!(hkey[..4], crc32fast::hash(b"abc").to_be_bytes());
        assert_eq!(hkey[4..8], 3u32.to_be_bytes());
        assert_eq!(&hkey[8..], b"abc\0\0\0\0\0");

        let long = hash_key(b"a longer key");
        assert_eq!(&long[8..], b"a longer");
    }

    #[test]
    fn test_full_key_tie_break() {
        let mut arena = HeapArena::new();
        let mut ctx = ClassCtx::new(&mut arena, None, Features::NONE);
        let body = HashedKeyClass.rec_alloc(&mut ctx, b"mango", Some(b"1")).expect("alloc");
        let rec = Record { body, key: InlineKey::Hashed(hash_key(b"mango").to_vec()) };

        let cmp = |key: &[u8]| HashedKeyClass.key_cmp(&ctx, &rec, key).expect("compare");
        assert_eq!(cmp(b"mango"), Some(Ordering::Equal));
        assert_eq!(cmp(b"melon"), Some(Ordering::Less));
        assert_eq!(cmp(b"apple"), Some(Ordering::Greater));
    }
}

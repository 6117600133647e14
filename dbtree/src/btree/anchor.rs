//! Serializable iteration positions.
//!
//! An anchor captures where an iterator stood so a later call can resume
//! from there without keeping the iterator alive. The generic encoding is a
//! little-endian u32 length followed by up to [`EMBEDDED_KEY_MAX`] key bytes;
//! a class may replace it with its own encoding of the 104-byte buffer.

use crate::error::BTreeError;

/// Largest key the generic anchor encoding can hold.
pub const EMBEDDED_KEY_MAX: usize = 100;

/// Size of the anchor payload buffer.
pub const ANCHOR_BUF_SIZE: usize = 4 + EMBEDDED_KEY_MAX;

/// Size of a serialized anchor: state byte plus payload.
pub const ANCHOR_SIZE: usize = 1 + ANCHOR_BUF_SIZE;

/// What an anchor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AnchorState {
    /// Start of iteration; probing behaves like `First` (or `Last`).
    #[default]
    Zero = 0,
    /// A key encoded in the payload.
    Key = 1,
    /// Iteration finished.
    Eof = 2,
}

impl TryFrom<u8> for AnchorState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::Key),
            2 => Ok(Self::Eof),
            _ => Err(value),
        }
    }
}

/// A fixed-size resume token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    state: AnchorState,
    buf: [u8; ANCHOR_BUF_SIZE],
}

impl Default for Anchor {
    fn default() -> Self {
        Self::new()
    }
}

impl Anchor {
    /// An anchor at the start of iteration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AnchorState::Zero,
            buf: [0u8; ANCHOR_BUF_SIZE],
        }
    }

    /// An anchor past the end of iteration.
    #[must_use]
    pub const fn eof() -> Self {
        Self {
            state: AnchorState::Eof,
            buf: [0u8; ANCHOR_BUF_SIZE],
        }
    }

    #[must_use]
    pub const fn state(&self) -> AnchorState {
        self.state
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        matches!(self.state, AnchorState::Zero)
    }

    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self.state, AnchorState::Eof)
    }

    /// Store `key` with the generic length-prefixed encoding.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the key is longer than [`EMBEDDED_KEY_MAX`].
    pub fn embed_key(&mut self, key: &[u8]) -> Result<(), BTreeError> {
        if key.len() > EMBEDDED_KEY_MAX {
            return Err(BTreeError::invalid(format!(
                "key of {} bytes does not fit in an anchor ({EMBEDDED_KEY_MAX} max)",
                key.len()
            )));
        }
        // Bounded by EMBEDDED_KEY_MAX above
        #[allow(clippy::cast_possible_truncation)]
        let len = key.len() as u32;
        self.buf.fill(0);
        self.buf[..4].copy_from_slice(&len.to_le_bytes());
        self.buf[4..4 + key.len()].copy_from_slice(key);
        self.state = AnchorState::Key;
        Ok(())
    }

    /// The key stored by [`embed_key`](Self::embed_key).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the anchor holds no key or a bad length.
    pub fn embedded_key(&self) -> Result<&[u8], BTreeError> {
        if self.state != AnchorState::Key {
            return Err(BTreeError::invalid("anchor does not hold a key"));
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > EMBEDDED_KEY_MAX {
            return Err(BTreeError::invalid(format!("anchor key length {len} is invalid")));
        }
        Ok(&self.buf[4..4 + len])
    }

    /// Raw payload for class-defined encodings.
    #[must_use]
    pub const fn payload(&self) -> &[u8; ANCHOR_BUF_SIZE] {
        &self.buf
    }

    /// Replace the payload with a class-defined encoding.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `bytes` exceeds the payload size.
    pub fn set_payload(&mut self, bytes: &[u8]) -> Result<(), BTreeError> {
        if bytes.len() > ANCHOR_BUF_SIZE {
            return Err(BTreeError::invalid(format!(
                "anchor payload of {} bytes exceeds {ANCHOR_BUF_SIZE}",
                bytes.len()
            )));
        }
        self.buf.fill(0);
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.state = AnchorState::Key;
        Ok(())
    }

    /// Serialize to a fixed-size image.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ANCHOR_SIZE] {
        let mut bytes = [0u8; ANCHOR_SIZE];
        bytes[0] = self.state as u8;
        bytes[1..].copy_from_slice(&self.buf);
        bytes
    }

    /// Parse an image produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the length or state byte is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BTreeError> {
        if bytes.len() != ANCHOR_SIZE {
            return Err(BTreeError::invalid(format!(
                "anchor image must be {ANCHOR_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let state = AnchorState::try_from(bytes[0])
            .map_err(|s| BTreeError::invalid(format!("unknown anchor state {s}")))?;
        let mut buf = [0u8; ANCHOR_BUF_SIZE];
        buf.copy_from_slice(&bytes[1..]);
        Ok(Self { state, buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_key_round_trip() {
        let mut anchor = Anchor::new();
        assert!(anchor.is_zero());

        let key = vec![0x5A; EMBEDDED_KEY_MAX];
        anchor.embed_key(&key).expect("key fits");
        assert_eq!(anchor.state(), AnchorState::Key);
        assert_eq!(anchor.embedded_key().expect("decode"), key.as_slice());

        anchor.embed_key(b"short").expect("key fits");
        assert_eq!(anchor.embedded_key().expect("decode"), b"short");
    }

    #[test]
    fn test_oversized_key_is_rejected() {
        let mut anchor = Anchor::new();
        let key = vec![1u8; EMBEDDED_KEY_MAX + 1];
        assert!(matches!(
            anchor.embed_key(&key),
            Err(BTreeError::InvalidArgument(_))
        ));
        assert!(anchor.is_zero());
    }

    #[test]
    fn test_zero_and_eof_hold_no_key() {
        assert!(Anchor::new().embedded_key().is_err());
        let eof = Anchor::eof();
        assert!(eof.is_eof());
        assert!(!eof.is_zero());
        assert!(eof.embedded_key().is_err());
    }

    #[test]
    fn test_serialized_image() {
        let mut anchor = Anchor::new();
        anchor.embed_key(b"resume-here").expect("key fits");
        let bytes = anchor.to_bytes();
        assert_eq!(bytes.len(), ANCHOR_SIZE);
        assert_eq!(Anchor::from_bytes(&bytes).expect("parse"), anchor);

        assert!(Anchor::from_bytes(&bytes[..10]).is_err());
        let mut bad_state = bytes;
        bad_state[0] = 9;
        assert!(Anchor::from_bytes(&bad_state).is_err());
    }
}

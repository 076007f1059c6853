// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Keyed message envelope carried in a frame body.
//!
//! ```text
//! | crc32 u32 LE | key_len i32 LE | key | msg_len i32 LE | msg |
//! ```
//!
//! The checksum covers everything after it. A mismatch means the frame was
//! read while a writer was mid-append, or wraparound has overwritten part of
//! it; either way the frame is not ours to deliver. The two fields must
//! account for the whole body; leftover bytes are rejected as well.

use crate::error::{BufferError, IntegrityError};

/// Checksum field size.
pub const HASH_LEN: usize = 4;

/// Length prefix size.
const LEN_PREFIX: usize = 4;

/// Smallest possible envelope (hash and two empty fields).
pub const MIN_ENVELOPE_LEN: usize = HASH_LEN + 2 * LEN_PREFIX;

/// A decoded envelope borrowing from the frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub key: &'a [u8],
    pub message: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn new(key: &'a [u8], message: &'a [u8]) -> Self {
        Self { key, message }
    }

    /// Encoded size of this envelope.
    pub fn encoded_len(&self) -> usize {
        MIN_ENVELOPE_LEN + self.key.len() + self.message.len()
    }

    /// Serialize, prefixing the CRC32 of the length-prefixed fields.
    pub fn encode(&self) -> Result<Vec<u8>, BufferError> {
        let key_len = length_prefix(self.key.len(), self.encoded_len())?;
        let message_len = length_prefix(self.message.len(), self.encoded_len())?;

        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&[0u8; HASH_LEN]);
        out.extend_from_slice(&key_len.to_le_bytes());
        out.extend_from_slice(self.key);
        out.extend_from_slice(&message_len.to_le_bytes());
        out.extend_from_slice(self.message);

        let hash = crc32fast::hash(&out[HASH_LEN..]);
        out[..HASH_LEN].copy_from_slice(&hash.to_le_bytes());
        Ok(out)
    }

    /// Verify the checksum and split the fields.
    pub fn decode(body: &'a [u8]) -> Result<Self, IntegrityError> {
        let (hash, rest) = split(body, HASH_LEN)?;
        let expected = u32::from_le_bytes(to_array(hash));
        let actual = crc32fast::hash(rest);
        if expected != actual {
            return Err(IntegrityError::ChecksumMismatch { expected, actual });
        }

        let (key, rest) = take_field(rest, "key_length")?;
        let (message, rest) = take_field(rest, "message_length")?;
        if !rest.is_empty() {
            return Err(IntegrityError::TrailingBytes { extra: rest.len() });
        }

        Ok(Self { key, message })
    }
}

fn length_prefix(len: usize, total: usize) -> Result<i32, BufferError> {
    i32::try_from(len).map_err(|_| BufferError::Overflow {
        length: total,
        max: i32::MAX as usize,
    })
}

fn split(bytes: &[u8], at: usize) -> Result<(&[u8], &[u8]), IntegrityError> {
    if bytes.len() < at {
        return Err(IntegrityError::Truncated {
            needed: at,
            available: bytes.len(),
        });
    }
    Ok(bytes.split_at(at))
}

fn to_array(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

/// Read one `i32` length prefix and the bytes it announces.
fn take_field<'a>(
    bytes: &'a [u8],
    field: &'static str,
) -> Result<(&'a [u8], &'a [u8]), IntegrityError> {
    let (prefix, rest) = split(bytes, LEN_PREFIX)?;
    let value = i32::from_le_bytes(to_array(prefix));
    let len = usize::try_from(value).map_err(|_| IntegrityError::InvalidLength { field, value })?;
    split(rest, len)
}

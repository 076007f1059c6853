// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Frame layout for the circular buffer.
//!
//! ```text
//! | tick i64 LE | before_offset i32 LE | body_length i32 LE | body ... |
//! ```
//!
//! The header is always 16 bytes. Frames chain backwards through
//! `before_offset`, which names the start of the previously written frame.

use crate::error::BufferError;

/// Frame header size in bytes (tick + before_offset + body_length).
pub const FRAME_HEADER_LEN: usize = 16;

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Logical write timestamp.
    pub tick: i64,
    /// Start offset of the frame written before this one.
    pub before_offset: i32,
    /// Number of body bytes following the header.
    pub body_length: i32,
}

impl FrameHeader {
    /// Encode to the on-ring representation.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..8].copy_from_slice(&self.tick.to_le_bytes());
        out[8..12].copy_from_slice(&self.before_offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.body_length.to_le_bytes());
        out
    }

    /// Decode from the on-ring representation.
    pub fn decode(bytes: &[u8; FRAME_HEADER_LEN]) -> Self {
        let mut tick = [0u8; 8];
        tick.copy_from_slice(&bytes[0..8]);
        let mut before = [0u8; 4];
        before.copy_from_slice(&bytes[8..12]);
        let mut body = [0u8; 4];
        body.copy_from_slice(&bytes[12..16]);

        Self {
            tick: i64::from_le_bytes(tick),
            before_offset: i32::from_le_bytes(before),
            body_length: i32::from_le_bytes(body),
        }
    }

    /// Header plus body length, or `None` for a negative body length.
    pub fn frame_len(&self) -> Option<usize> {
        usize::try_from(self.body_length)
            .ok()
            .map(|body| FRAME_HEADER_LEN + body)
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tick: i64,
    pub before_offset: i32,
    pub body: Vec<u8>,
}

impl Frame {
    /// Serialize header and body into one contiguous byte string.
    pub fn encode(&self) -> Result<Vec<u8>, BufferError> {
        let body_length = i32::try_from(self.body.len()).map_err(|_| BufferError::Overflow {
            length: FRAME_HEADER_LEN + self.body.len(),
            max: i32::MAX as usize,
        })?;

        let header = FrameHeader {
            tick: self.tick,
            before_offset: self.before_offset,
            body_length,
        };

        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.body.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Deserialize a frame whose bytes have already been made contiguous.
    ///
    /// `offset` is only used for error reporting.
    pub fn decode(bytes: &[u8], offset: usize) -> Result<Self, BufferError> {
        let header_bytes: &[u8; FRAME_HEADER_LEN] = bytes
            .get(..FRAME_HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| BufferError::CorruptFrame {
                offset,
                reason: format!("{} bytes is shorter than a frame header", bytes.len()),
            })?;

        let header = FrameHeader::decode(header_bytes);
        let frame_len = header.frame_len().ok_or_else(|| BufferError::CorruptFrame {
            offset,
            reason: format!("negative body length {}", header.body_length),
        })?;

        if frame_len != bytes.len() {
            return Err(BufferError::CorruptFrame {
                offset,
                reason: format!(
                    "header announces {} bytes, {} supplied",
                    frame_len,
                    bytes.len()
                ),
            });
        }

        Ok(Self {
            tick: header.tick,
            before_offset: header.before_offset,
            body: bytes[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

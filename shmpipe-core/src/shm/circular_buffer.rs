// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Self-describing circular buffer over a shared region.
//!
//! Region layout:
//!
//! ```text
//! | ring area: frames, N - 4 bytes ............ | footer: latest frame offset i32 LE |
//! ```
//!
//! There is no head or tail pointer. Writers append after the latest frame
//! and publish the new offset in the footer; readers walk backwards from the
//! footer through each frame's `before_offset` until the chain leaves the
//! last lap. Appends are O(1) and "everything since tick X" costs one step
//! per frame newer than X.

use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::BufferError;
use crate::shm::frame::{Frame, FrameHeader, FRAME_HEADER_LEN};
use crate::shm::region::SharedRegion;

/// Footer size in bytes (latest frame start offset as i32).
pub const FOOTER_LEN: usize = 4;

/// Smallest region the buffer accepts.
pub const MIN_REGION_SIZE: usize = FOOTER_LEN + 64;

/// Pause between advisory lock attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_micros(100);

/// How appends are serialised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterLock {
    /// Serialise every writer on the same backing object inside this
    /// process. Cross-process writers must not overlap.
    #[default]
    #[serde(rename = "process")]
    ProcessLocal,
    /// Additionally hold an exclusive `flock` on the region while appending.
    #[serde(rename = "advisory")]
    Advisory,
}

/// Tuning for a circular buffer.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    /// Bytes kept below ring capacity when computing the per-frame limit.
    pub frame_margin: usize,
    /// Writer serialisation policy.
    pub writer_lock: WriterLock,
    /// How long `insert` waits for the advisory lock.
    pub lock_timeout: Duration,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            frame_margin: 0,
            writer_lock: WriterLock::ProcessLocal,
            lock_timeout: Duration::from_millis(100),
        }
    }
}

/// A frame read back from the ring, with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    /// Start offset inside the ring area.
    pub offset: usize,
    pub tick: i64,
    pub before_offset: i32,
    pub body: Vec<u8>,
}

impl StoredFrame {
    /// Header plus body length.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body.len()
    }

    /// Offset at which the next frame is written.
    fn next_start(&self, max_end: usize) -> usize {
        (self.offset + self.frame_len() + 1) % max_end
    }
}

/// Circular buffer of frames inside a shared region.
///
/// The region is shared and injected; dropping the buffer never tears it
/// down for other participants.
pub struct CircularBuffer {
    region: Arc<dyn SharedRegion>,
    /// End of the ring area; the footer starts here.
    max_end: usize,
    options: BufferOptions,
    /// Serialises appends from this process, shared with every other buffer
    /// over the same backing object.
    writer: Arc<Mutex<()>>,
}

/// Held for the duration of one append.
struct WriterGuard<'a> {
    advisory: Option<&'a dyn SharedRegion>,
    _local: MutexGuard<'a, ()>,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        if let Some(region) = self.advisory {
            if let Err(e) = region.unlock() {
                tracing::warn!(name = %region.name(), error = %e, "Failed to release writer lock");
            }
        }
    }
}

impl CircularBuffer {
    /// Create a circular buffer over `region`.
    ///
    /// The region is used as-is: an all-zero region is an empty buffer, and
    /// a region already written by another participant is picked up where it
    /// left off.
    pub fn new(region: Arc<dyn SharedRegion>, options: BufferOptions) -> Result<Self, BufferError> {
        let size = region.size();

        if size < MIN_REGION_SIZE {
            return Err(BufferError::InvalidBufferState {
                reason: format!("Region too small: {} bytes (min {})", size, MIN_REGION_SIZE),
            });
        }

        if size - FOOTER_LEN > i32::MAX as usize {
            return Err(BufferError::InvalidBufferState {
                reason: format!("Region too large for i32 offsets: {} bytes", size),
            });
        }

        let max_end = size - FOOTER_LEN;
        if options.frame_margin + FRAME_HEADER_LEN >= max_end {
            return Err(BufferError::InvalidBufferState {
                reason: format!(
                    "Frame margin {} leaves no room in a {} byte ring",
                    options.frame_margin, max_end
                ),
            });
        }

        let writer = region.writer_mutex();
        Ok(Self {
            region,
            max_end,
            options,
            writer,
        })
    }

    /// Name of the underlying region.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Size of the ring area in bytes.
    pub fn capacity(&self) -> usize {
        self.max_end
    }

    /// Largest frame (header + body) `insert` accepts.
    pub fn max_frame_len(&self) -> usize {
        self.max_end - self.options.frame_margin
    }

    /// Largest body `insert` accepts.
    pub fn max_body_len(&self) -> usize {
        self.max_frame_len() - FRAME_HEADER_LEN
    }

    /// Append a frame carrying `data` and return the tick it was given.
    pub fn insert(&self, data: &[u8]) -> Result<i64, BufferError> {
        if data.is_empty() {
            return Err(BufferError::EmptyPayload);
        }

        let frame_len = FRAME_HEADER_LEN + data.len();
        if frame_len > self.max_frame_len() {
            return Err(BufferError::Overflow {
                length: frame_len,
                max: self.max_frame_len(),
            });
        }

        let _guard = self.lock_writer()?;

        let latest = match self.latest_frame() {
            Ok(latest) => latest,
            Err(BufferError::Region(e)) => return Err(BufferError::Region(e)),
            Err(e) => {
                // A writer died mid-append; restart the chain
                tracing::warn!(name = %self.name(), error = %e, "Latest frame unreadable, restarting chain");
                None
            }
        };

        let now = now_tick();
        let (start, before_offset, tick) = match &latest {
            None => (0, 0, now),
            Some(prev) => (
                prev.next_start(self.max_end),
                prev.offset as i32,
                now.max(prev.tick.saturating_add(1)),
            ),
        };

        let bytes = Frame {
            tick,
            before_offset,
            body: data.to_vec(),
        }
        .encode()?;

        self.write_wrapped(start, &bytes)?;
        self.write_footer(start)?;

        tracing::trace!(name = %self.name(), tick = tick, offset = start, length = frame_len, "Inserted frame");

        Ok(tick)
    }

    /// Tick of the most recent frame, or `None` if nothing was ever written.
    pub fn latest_tick(&self) -> Result<Option<i64>, BufferError> {
        Ok(self.latest_frame()?.map(|frame| frame.tick))
    }

    /// The frame named by the footer, or `None` for an empty buffer.
    pub fn latest_frame(&self) -> Result<Option<StoredFrame>, BufferError> {
        let offset = self.read_footer()?;
        let frame = self.read_frame(offset)?;

        // A zero body length only occurs in a never-written (all zero) ring
        if frame.body.is_empty() {
            return Ok(None);
        }

        Ok(Some(frame))
    }

    /// Every reachable frame with a tick strictly greater than `after`,
    /// ascending by tick.
    pub fn frames_after(&self, after: i64) -> Result<Vec<StoredFrame>, BufferError> {
        let Some(latest) = self.latest_frame()? else {
            return Ok(Vec::new());
        };

        if latest.tick <= after {
            return Ok(Vec::new());
        }

        // One lap of minimum-size frames bounds the walk even on a corrupt chain
        let max_steps = self.max_end / (FRAME_HEADER_LEN + 1) + 1;
        let mut covered = latest.frame_len();
        let mut current = latest;
        let mut collected = Vec::new();

        loop {
            if collected.len() + 1 >= max_steps {
                break;
            }

            // Only frame in the buffer
            if current.offset == 0 && current.before_offset == 0 {
                break;
            }

            let Some(prev_offset) = usize::try_from(current.before_offset)
                .ok()
                .filter(|offset| *offset < self.max_end)
            else {
                break;
            };

            let prev = match self.read_frame(prev_offset) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::trace!(offset = prev_offset, error = %e, "Chain ends at unreadable frame");
                    break;
                }
            };

            // Ticks strictly decrease going back; anything else means the
            // walk wrapped onto newer data or stale bytes
            if prev.body.is_empty() || prev.tick >= current.tick || prev.tick <= after {
                break;
            }

            // The predecessor must end where the current frame starts and fit
            // in one lap together with all newer frames
            if prev.next_start(self.max_end) != current.offset
                || covered + 1 + prev.frame_len() > self.max_end
            {
                break;
            }

            covered += 1 + prev.frame_len();
            collected.push(std::mem::replace(&mut current, prev));
        }

        collected.push(current);
        collected.reverse();
        Ok(collected)
    }

    /// Decode the frame starting at `offset`.
    pub fn read_frame(&self, offset: usize) -> Result<StoredFrame, BufferError> {
        let mut raw = [0u8; FRAME_HEADER_LEN];
        self.read_wrapped(offset, &mut raw)?;
        let header = FrameHeader::decode(&raw);

        let frame_len = header.frame_len().ok_or_else(|| BufferError::CorruptFrame {
            offset,
            reason: format!("negative body length {}", header.body_length),
        })?;

        if frame_len > self.max_end {
            return Err(BufferError::Overflow {
                length: frame_len,
                max: self.max_end,
            });
        }

        let mut bytes = vec![0u8; frame_len];
        self.read_wrapped(offset, &mut bytes)?;
        let frame = Frame::decode(&bytes, offset)?;

        Ok(StoredFrame {
            offset,
            tick: frame.tick,
            before_offset: frame.before_offset,
            body: frame.body,
        })
    }

    /// Split `[start, start + length)` at the ring end.
    ///
    /// Returns the lengths of the piece at `start` and the piece at 0.
    fn span(&self, start: usize, length: usize) -> Result<(usize, usize), BufferError> {
        if start >= self.max_end {
            return Err(BufferError::CorruptFrame {
                offset: start,
                reason: format!("start beyond ring end {}", self.max_end),
            });
        }

        let end = start + length;
        if end <= self.max_end {
            return Ok((length, 0));
        }

        let overflow = end - self.max_end;
        if overflow >= self.max_end {
            return Err(BufferError::Overflow {
                length,
                max: self.max_end,
            });
        }

        Ok((length - overflow, overflow))
    }

    fn write_wrapped(&self, start: usize, bytes: &[u8]) -> Result<(), BufferError> {
        let (first, second) = self.span(start, bytes.len())?;
        self.region.write_at(start, &bytes[..first])?;
        if second > 0 {
            self.region.write_at(0, &bytes[first..])?;
        }
        Ok(())
    }

    fn read_wrapped(&self, start: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        let (first, second) = self.span(start, dst.len())?;
        let (head, tail) = dst.split_at_mut(first);
        self.region.read_at(start, head)?;
        if second > 0 {
            self.region.read_at(0, tail)?;
        }
        Ok(())
    }

    fn read_footer(&self) -> Result<usize, BufferError> {
        let mut raw = [0u8; FOOTER_LEN];
        self.region.read_at(self.max_end, &mut raw)?;
        fence(Ordering::Acquire);

        let offset = i32::from_le_bytes(raw);
        usize::try_from(offset)
            .ok()
            .filter(|offset| *offset < self.max_end)
            .ok_or_else(|| BufferError::CorruptFrame {
                offset: self.max_end,
                reason: format!("footer names offset {}", offset),
            })
    }

    fn write_footer(&self, start: usize) -> Result<(), BufferError> {
        fence(Ordering::Release);
        self.region
            .write_at(self.max_end, &(start as i32).to_le_bytes())?;
        Ok(())
    }

    fn lock_writer(&self) -> Result<WriterGuard<'_>, BufferError> {
        let local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if self.options.writer_lock == WriterLock::ProcessLocal {
            return Ok(WriterGuard {
                advisory: None,
                _local: local,
            });
        }

        let started = Instant::now();
        loop {
            if self.region.try_lock_exclusive()? {
                return Ok(WriterGuard {
                    advisory: Some(self.region.as_ref()),
                    _local: local,
                });
            }

            let waited = started.elapsed();
            if waited >= self.options.lock_timeout {
                return Err(BufferError::WriterLockTimeout {
                    name: self.name().to_string(),
                    waited,
                });
            }
            std::thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }
}

/// Wall-clock nanoseconds since the Unix epoch, never below 1.
fn now_tick() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::region::HeapRegion;

    fn buffer(size: usize) -> (Arc<HeapRegion>, CircularBuffer) {
        buffer_with(size, BufferOptions::default())
    }

    fn buffer_with(size: usize, options: BufferOptions) -> (Arc<HeapRegion>, CircularBuffer) {
        let region = Arc::new(HeapRegion::new("test", size));
        let buffer = CircularBuffer::new(region.clone(), options).unwrap();
        (region, buffer)
    }

    fn payload(seed: usize, len: usize) -> Vec<u8> {
        (0..len).map(|i| (seed * 31 + i) as u8).collect()
    }

    #[test]
    fn test_empty_buffer() {
        let (_, buffer) = buffer(256);
        assert_eq!(buffer.latest_tick().unwrap(), None);
        assert!(buffer.frames_after(i64::MIN).unwrap().is_empty());
    }

    #[test]
    fn test_region_too_small() {
        let region = Arc::new(HeapRegion::new("tiny", 32));
        assert!(CircularBuffer::new(region, BufferOptions::default()).is_err());
    }

    #[test]
    fn test_single_frame() {
        let (_, buffer) = buffer(256);
        let tick = buffer.insert(b"hello").unwrap();

        assert_eq!(buffer.latest_tick().unwrap(), Some(tick));
        let frames = buffer.frames_after(i64::MIN).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].offset, 0);
        assert_eq!(frames[0].before_offset, 0);
        assert_eq!(frames[0].body, b"hello");
    }

    #[test]
    fn test_layout_and_footer() {
        let (region, buffer) = buffer(256);
        buffer.insert(b"abc").unwrap();
        buffer.insert(b"defg").unwrap();

        // second frame starts one byte past the end of the first
        let mut footer = [0u8; 4];
        region.read_at(252, &mut footer).unwrap();
        assert_eq!(i32::from_le_bytes(footer), 20);

        let second = buffer.read_frame(20).unwrap();
        assert_eq!(second.before_offset, 0);
        assert_eq!(second.body, b"defg");
    }

    #[test]
    fn test_ticks_strictly_increase() {
        let (_, buffer) = buffer(4096);
        let ticks: Vec<i64> = (0..50).map(|i| buffer.insert(&payload(i, 8)).unwrap()).collect();
        assert!(ticks.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_frames_after_filters_by_tick() {
        let (_, buffer) = buffer(1024);
        let ticks: Vec<i64> = (0..5).map(|i| buffer.insert(&payload(i, 10)).unwrap()).collect();

        let frames = buffer.frames_after(ticks[2]).unwrap();
        let got: Vec<i64> = frames.iter().map(|f| f.tick).collect();
        assert_eq!(got, ticks[3..].to_vec());

        assert!(buffer.frames_after(ticks[4]).unwrap().is_empty());
    }

    #[test]
    fn test_wraparound_is_bit_exact() {
        let (_, buffer) = buffer(256);
        let max_end = buffer.capacity();
        let mut written = Vec::new();

        for i in 0..40 {
            let body = payload(i, 5 + (i * 7) % 40);
            let tick = buffer.insert(&body).unwrap();
            written.push((tick, body));
        }

        let frames = buffer.frames_after(i64::MIN).unwrap();
        assert!(!frames.is_empty());
        assert!(frames.len() < written.len());

        // Exactly the newest frames that fit in one lap
        let mut expected = 0;
        let mut span = 0;
        for (_, body) in written.iter().rev() {
            let len = FRAME_HEADER_LEN + body.len();
            let next = if expected == 0 { len } else { span + 1 + len };
            if next > max_end {
                break;
            }
            span = next;
            expected += 1;
        }
        assert_eq!(frames.len(), expected);

        let tail = &written[written.len() - expected..];
        for (frame, (tick, body)) in frames.iter().zip(tail) {
            assert_eq!(frame.tick, *tick);
            assert_eq!(&frame.body, body);
        }

        assert!(frames.windows(2).all(|pair| pair[0].tick < pair[1].tick));
    }

    #[test]
    fn test_header_straddles_ring_end() {
        let (_, buffer) = buffer(100);
        // ring area is 96 bytes; 16 + 70 = 86, next start = 87
        buffer.insert(&payload(1, 70)).unwrap();
        // header at 87 spans 87..96 and 0..7
        let body = payload(2, 20);
        let tick = buffer.insert(&body).unwrap();

        let latest = buffer.latest_frame().unwrap().unwrap();
        assert_eq!(latest.offset, 87);
        assert_eq!(latest.tick, tick);
        assert_eq!(latest.body, body);

        // first frame was overwritten by the wrapped tail
        let frames = buffer.frames_after(i64::MIN).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_body_straddles_ring_end() {
        let (_, buffer) = buffer(200);
        // ring area 196; first frame 16 + 100 ends at 116, next starts 117
        buffer.insert(&payload(1, 100)).unwrap();
        let first_tick = buffer.latest_tick().unwrap().unwrap();
        let body = payload(2, 60);
        buffer.insert(&body).unwrap();

        // 117 + 76 = 193 fits; next starts at 194 and the body wraps
        let third = payload(3, 40);
        buffer.insert(&third).unwrap();

        let latest = buffer.latest_frame().unwrap().unwrap();
        assert_eq!(latest.offset, 194);
        assert_eq!(latest.body, third);

        let frames = buffer.frames_after(first_tick).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].body, body);
        assert_eq!(frames[1].body, third);
    }

    #[test]
    fn test_overflow_boundary() {
        let (_, buffer) = buffer(256);
        let max_body = buffer.max_body_len();
        assert_eq!(max_body, 252 - FRAME_HEADER_LEN);

        assert!(buffer.insert(&vec![1u8; max_body]).is_ok());
        assert!(matches!(
            buffer.insert(&vec![1u8; max_body + 1]),
            Err(BufferError::Overflow { .. })
        ));
    }

    #[test]
    fn test_overflow_boundary_with_margin() {
        let options = BufferOptions {
            frame_margin: 32,
            ..BufferOptions::default()
        };
        let (_, buffer) = buffer_with(256, options);
        assert_eq!(buffer.max_frame_len(), 220);

        assert!(buffer.insert(&vec![1u8; 220 - FRAME_HEADER_LEN]).is_ok());
        assert!(matches!(
            buffer.insert(&vec![1u8; 221 - FRAME_HEADER_LEN]),
            Err(BufferError::Overflow { length: 221, max: 220 })
        ));
    }

    #[test]
    fn test_full_lap_frames_keep_working() {
        let (_, buffer) = buffer(256);
        let max_body = buffer.max_body_len();
        for i in 0..5 {
            let body = payload(i, max_body);
            buffer.insert(&body).unwrap();
            let frames = buffer.frames_after(i64::MIN).unwrap();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].body, body);
        }
    }

    #[test]
    fn test_empty_payload_rejected() {
        let (_, buffer) = buffer(256);
        assert!(matches!(buffer.insert(&[]), Err(BufferError::EmptyPayload)));
    }

    #[test]
    fn test_corrupt_chain_terminates() {
        let (region, buffer) = buffer(512);
        for i in 0..6 {
            buffer.insert(&payload(i, 12)).unwrap();
        }

        // Point the latest frame's before_offset at itself
        let latest = buffer.latest_frame().unwrap().unwrap();
        region
            .write_at(latest.offset + 8, &(latest.offset as i32).to_le_bytes())
            .unwrap();

        let frames = buffer.frames_after(i64::MIN).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_garbage_footer_is_error_and_insert_recovers() {
        let (region, buffer) = buffer(256);
        buffer.insert(b"first").unwrap();
        region.write_at(252, &(-7i32).to_le_bytes()).unwrap();

        assert!(buffer.frames_after(i64::MIN).is_err());

        buffer.insert(b"second").unwrap();
        let frames = buffer.frames_after(i64::MIN).unwrap();
        assert_eq!(frames.last().unwrap().body, b"second");
    }

    #[test]
    fn test_span_splits_at_ring_end() {
        let (_, buffer) = buffer(104);
        assert_eq!(buffer.span(90, 10).unwrap(), (10, 0));
        assert_eq!(buffer.span(95, 10).unwrap(), (5, 5));
        assert!(matches!(buffer.span(99, 200), Err(BufferError::Overflow { .. })));
        assert!(buffer.span(100, 1).is_err());
    }

    #[test]
    fn test_buffers_over_one_region_serialise_appends() {
        let region = Arc::new(HeapRegion::new("shared", 1024 * 1024));
        let left = CircularBuffer::new(region.clone(), BufferOptions::default()).unwrap();
        let right = CircularBuffer::new(region.clone(), BufferOptions::default()).unwrap();

        std::thread::scope(|scope| {
            for (writer, buffer) in [(1usize, &left), (2, &right)] {
                scope.spawn(move || {
                    for i in 0..500 {
                        buffer.insert(&payload(writer * 1000 + i, 24)).unwrap();
                    }
                });
            }
        });

        let frames = left.frames_after(i64::MIN).unwrap();
        assert_eq!(frames.len(), 1000);
        assert!(frames.windows(2).all(|pair| pair[0].tick < pair[1].tick));
        let mut bodies: Vec<Vec<u8>> = frames.into_iter().map(|frame| frame.body).collect();
        let mut expected: Vec<Vec<u8>> = [1usize, 2]
            .iter()
            .flat_map(|writer| (0..500).map(move |i| payload(writer * 1000 + i, 24)))
            .collect();
        bodies.sort();
        expected.sort();
        assert_eq!(bodies, expected);
    }
}

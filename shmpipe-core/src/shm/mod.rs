// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory transport.
//!
//! Regions are byte arrays shared between processes; the circular buffer
//! lays frames over them.

mod circular_buffer;
mod frame;
mod mapped_file;
mod region;
mod registry;

pub use circular_buffer::{
    BufferOptions, CircularBuffer, StoredFrame, WriterLock, FOOTER_LEN, MIN_REGION_SIZE,
};
pub use frame::{Frame, FrameHeader, FRAME_HEADER_LEN};
pub use mapped_file::{MappedFileRegion, RING_FILE_EXTENSION};
pub use region::{HeapRegion, SharedMemoryRegion, SharedRegion};

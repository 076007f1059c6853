//! Custom error types for shmpipe.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for shmpipe.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum PipeError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Shared Memory / Buffer Errors
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    #[error("Circular buffer error: {0}")]
    Buffer(#[from] BufferError),

    // =========================================================================
    // Message Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Envelope integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Subscription did not stop within {waited:?}")]
    UnsubscribeTimeout { waited: Duration },

    #[error("No async runtime to run the subscription on: {reason}")]
    RuntimeUnavailable { reason: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors reject a configuration before any region is opened.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Queue size out of bounds: {size} bytes (min: {min}, max: {max})")]
    QueueSizeOutOfBounds { size: usize, min: usize, max: usize },
}

/// Shared memory errors - failures of the backing region itself.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Region {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Access out of bounds: offset {offset} + {length} > region size {size}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("Failed to lock region {name}: {reason}")]
    LockFailed { name: String, reason: String },
}

/// Structural errors of the circular buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Frame of {length} bytes exceeds the per-frame limit of {max} bytes. Either the buffer size must be increased or the data must be reduced")]
    Overflow { length: usize, max: usize },

    #[error("Cannot insert an empty payload")]
    EmptyPayload,

    #[error("Invalid buffer state: {reason}")]
    InvalidBufferState { reason: String },

    #[error("Timed out after {waited:?} waiting for the writer lock on {name}")]
    WriterLockTimeout { name: String, waited: Duration },

    #[error("Corrupt frame at offset {offset}: {reason}")]
    CorruptFrame { offset: usize, reason: String },

    #[error("Region access failed: {0}")]
    Region(#[from] SharedMemoryError),
}

/// Envelope integrity failures.
///
/// These are expected while a writer is mid-append or after wraparound has
/// overwritten part of a frame. Subscribers skip the frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Envelope checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Envelope truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid envelope length for {field}: {value}")]
    InvalidLength { field: &'static str, value: i32 },

    #[error("Envelope has {extra} bytes after the message")]
    TrailingBytes { extra: usize },
}

/// Value serializer failures.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("{format} encode failed: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    #[error("{format} decode failed: {message}")]
    Decode {
        format: &'static str,
        message: String,
    },
}

/// Result type alias using PipeError.
pub type PipeResult<T> = Result<T, PipeError>;

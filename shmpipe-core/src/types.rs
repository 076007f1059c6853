// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;
use crate::shm::SharedMemoryRegion;

/// Maximum queue name length.
const MAX_QUEUE_NAME_LEN: usize = 200;

/// Validated queue name.
/// Names the shared region, so it must be usable as a POSIX shm name and as a
/// file name: non-empty, alphanumeric with `-`, `_` and `.`, max 200 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create a new QueueName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_name",
                value: name,
                reason: "Queue name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_QUEUE_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_name",
                value: name.clone(),
                reason: format!(
                    "Queue name too long: {} chars (max {})",
                    name.len(),
                    MAX_QUEUE_NAME_LEN
                ),
            });
        }

        if name.starts_with('.')
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_name",
                value: name,
                reason: "Queue name must contain only ASCII alphanumerics, '-', '_' and '.', and not start with '.'".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self("shmpipe".to_string())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for QueueName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Validated total region size in bytes (ring area plus footer).
/// Must lie within the shared memory bounds and be a multiple of 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct QueueSize(usize);

impl QueueSize {
    pub const MIN: usize = SharedMemoryRegion::MIN_SIZE;
    pub const MAX: usize = SharedMemoryRegion::MAX_SIZE;

    /// Create a new QueueSize with bounds validation.
    pub fn new(bytes: usize) -> Result<Self, HardValidationError> {
        if !(Self::MIN..=Self::MAX).contains(&bytes) {
            return Err(HardValidationError::QueueSizeOutOfBounds {
                size: bytes,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        if bytes % 4 != 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_size",
                value: bytes.to_string(),
                reason: "Queue size must be a multiple of 4".to_string(),
            });
        }
        Ok(Self(bytes))
    }

    /// Get the size in bytes.
    pub fn bytes(&self) -> usize {
        self.0
    }
}

impl Default for QueueSize {
    fn default() -> Self {
        Self(1024 * 1024) // 1MB
    }
}

impl fmt::Display for QueueSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
            write!(f, "{}MB", bytes / (1024 * 1024))
        } else if bytes >= 1024 && bytes % 1024 == 0 {
            write!(f, "{}KB", bytes / 1024)
        } else {
            write!(f, "{}B", bytes)
        }
    }
}

impl TryFrom<usize> for QueueSize {
    type Error = HardValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueSize> for usize {
    fn from(size: QueueSize) -> Self {
        size.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_valid() {
        assert!(QueueName::new("orders").is_ok());
        assert!(QueueName::new("orders.v2_eu-west").is_ok());
    }

    #[test]
    fn test_queue_name_invalid() {
        assert!(QueueName::new("").is_err());
        assert!(QueueName::new("a/b").is_err());
        assert!(QueueName::new(".hidden").is_err());
        assert!(QueueName::new("x".repeat(201)).is_err());
    }

    #[test]
    fn test_queue_size_bounds() {
        assert!(QueueSize::new(4096).is_ok());
        assert!(QueueSize::new(100).is_err());
        assert!(QueueSize::new(4098).is_err());
        assert!(QueueSize::new(2 * 1024 * 1024 * 1024).is_err());
    }

    #[test]
    fn test_queue_size_display() {
        assert_eq!(QueueSize::new(4 * 1024 * 1024).unwrap().to_string(), "4MB");
        assert_eq!(QueueSize::new(8192).unwrap().to_string(), "8KB");
        assert_eq!(QueueSize::new(4100).unwrap().to_string(), "4100B");
    }
}

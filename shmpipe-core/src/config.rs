// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every field is optional. Any invalid field results in a
//! HardValidationError before a region is opened.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, PipeError, PipeResult};
use crate::serializer::SerializerKind;
use crate::shm::{BufferOptions, WriterLock};
use crate::types::{QueueName, QueueSize};

/// Where the region lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    /// POSIX shared memory object `/<queue_name>`.
    #[default]
    Shm,
    /// Memory-mapped file `<backing_dir>/<queue_name>.ring`.
    File,
}

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Only frames written after the subscription starts.
    #[default]
    Latest,
    /// Everything still reachable in the ring.
    Beginning,
}

/// Raw configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPipeConfig {
    #[serde(default = "default_queue_name")]
    queue_name: String,
    #[serde(default = "default_queue_size")]
    queue_size: usize,
    #[serde(default)]
    backing: Backing,
    #[serde(default = "default_backing_dir")]
    backing_dir: String,
    #[serde(default)]
    serializer: SerializerKind,
    #[serde(default = "default_polling_interval_ms")]
    polling_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    publish_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    subscribe_timeout_ms: u64,
    #[serde(default = "default_publish_node_count")]
    publish_node_count: usize,
    #[serde(default)]
    frame_margin: usize,
    #[serde(default)]
    writer_lock: WriterLock,
    #[serde(default)]
    start_position: StartPosition,
}

fn default_queue_name() -> String {
    QueueName::default().into()
}

fn default_queue_size() -> usize {
    QueueSize::default().bytes()
}

fn default_backing_dir() -> String {
    "/dev/shm/shmpipe".to_string()
}

fn default_polling_interval_ms() -> u64 {
    1
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_publish_node_count() -> usize {
    50
}

const MAX_POLLING_INTERVAL_MS: u64 = 60_000;

/// Validated pipe configuration.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub queue_name: QueueName,
    pub queue_size: QueueSize,
    pub backing: Backing,
    pub backing_dir: PathBuf,
    pub serializer: SerializerKind,
    pub polling_interval: Duration,
    pub publish_timeout: Duration,
    pub subscribe_timeout: Duration,
    /// Kept for configuration compatibility; one region per queue is used.
    pub publish_node_count: usize,
    pub frame_margin: usize,
    pub writer_lock: WriterLock,
    pub start_position: StartPosition,
}

impl PipeConfig {
    /// Defaults with the given queue name.
    pub fn new(queue_name: QueueName) -> Self {
        Self {
            queue_name,
            ..Self::default()
        }
    }

    /// Circular buffer tuning derived from this configuration.
    pub fn buffer_options(&self) -> BufferOptions {
        BufferOptions {
            frame_margin: self.frame_margin,
            writer_lock: self.writer_lock,
            lock_timeout: self.publish_timeout,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            queue_name: QueueName::default(),
            queue_size: QueueSize::default(),
            backing: Backing::default(),
            backing_dir: PathBuf::from(default_backing_dir()),
            serializer: SerializerKind::default(),
            polling_interval: Duration::from_millis(default_polling_interval_ms()),
            publish_timeout: Duration::from_millis(default_timeout_ms()),
            subscribe_timeout: Duration::from_millis(default_timeout_ms()),
            publish_node_count: default_publish_node_count(),
            frame_margin: 0,
            writer_lock: WriterLock::default(),
            start_position: StartPosition::default(),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> PipeResult<PipeConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PipeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PipeError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> PipeResult<PipeConfig> {
        // An empty document means "all defaults"
        let content = if content.trim().is_empty() { "{}" } else { content };

        let raw: RawPipeConfig =
            serde_yaml::from_str(content).map_err(|e| PipeError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawPipeConfig) -> PipeResult<PipeConfig> {
        let queue_name = QueueName::new(raw.queue_name)?;
        let queue_size = QueueSize::new(raw.queue_size)?;

        if raw.backing == Backing::File && raw.backing_dir.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "backing_dir",
                value: raw.backing_dir,
                reason: "File backing requires a directory".to_string(),
            }
            .into());
        }

        if !(1..=MAX_POLLING_INTERVAL_MS).contains(&raw.polling_interval_ms) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "polling_interval_ms",
                value: raw.polling_interval_ms.to_string(),
                reason: format!("Must be between 1 and {}", MAX_POLLING_INTERVAL_MS),
            }
            .into());
        }

        if raw.publish_timeout_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "publish_timeout_ms",
                value: "0".to_string(),
                reason: "Timeout must be positive".to_string(),
            }
            .into());
        }

        if raw.subscribe_timeout_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "subscribe_timeout_ms",
                value: "0".to_string(),
                reason: "Timeout must be positive".to_string(),
            }
            .into());
        }

        if raw.publish_node_count == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "publish_node_count",
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            }
            .into());
        }

        // The header plus one body byte must still fit below the margin
        let ring = queue_size.bytes() - crate::shm::FOOTER_LEN;
        if raw.frame_margin + crate::shm::FRAME_HEADER_LEN >= ring {
            return Err(HardValidationError::InvalidFieldValue {
                field: "frame_margin",
                value: raw.frame_margin.to_string(),
                reason: format!("Leaves no room for a frame in a {} byte ring", ring),
            }
            .into());
        }

        Ok(PipeConfig {
            queue_name,
            queue_size,
            backing: raw.backing,
            backing_dir: PathBuf::from(raw.backing_dir),
            serializer: raw.serializer,
            polling_interval: Duration::from_millis(raw.polling_interval_ms),
            publish_timeout: Duration::from_millis(raw.publish_timeout_ms),
            subscribe_timeout: Duration::from_millis(raw.subscribe_timeout_ms),
            publish_node_count: raw.publish_node_count,
            frame_margin: raw.frame_margin,
            writer_lock: raw.writer_lock,
            start_position: raw.start_position,
        })
    }
}

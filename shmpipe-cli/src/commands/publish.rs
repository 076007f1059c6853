// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe publish` command - Publish a message under a key.

use serde_json::Value;
use shmpipe_core::SharedMemoryPipe;

use super::{load_config, parse_value};

pub async fn execute(
    config_path: Option<&str>,
    key: &str,
    message: &str,
    count: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let pipe = SharedMemoryPipe::open(&config)?;
    let publisher = pipe.publisher::<Value, Value>();

    let key = parse_value(key);
    let message = parse_value(message);

    for _ in 0..count {
        let tick = publisher.publish(&key, &message)?;
        println!("✓ Published to {} at tick {}", config.queue_name, tick);
    }

    Ok(())
}

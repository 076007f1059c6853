// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe inspect` command - Dump reachable frames.
//!
//! Walks the ring the same way a subscriber does and shows each frame's
//! location, tick and whether its envelope passes the checksum.

use serde_json::Value;
use shmpipe_core::envelope::Envelope;
use shmpipe_core::{Serializer, SharedMemoryPipe};

use super::load_config;

/// Longest key preview shown per row.
const KEY_PREVIEW: usize = 24;

pub async fn execute(
    config_path: Option<&str>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let pipe = SharedMemoryPipe::open(&config)?;
    let buffer = pipe.buffer();

    let frames = buffer.frames_after(i64::MIN)?;

    println!("Queue:           {}", config.queue_name);
    println!("Region size:     {}", config.queue_size);
    println!("Ring capacity:   {} bytes", buffer.capacity());
    println!("Max frame:       {} bytes", buffer.max_frame_len());
    println!("Reachable:       {} frame(s)", frames.len());
    println!();

    if frames.is_empty() {
        println!("Ring is empty.");
        return Ok(());
    }

    println!(
        "{:<20} {:>10} {:>10} {:>8}  {:<6} {}",
        "TICK", "OFFSET", "BEFORE", "BYTES", "CRC", "KEY"
    );

    let skip = frames.len().saturating_sub(limit);
    for frame in frames.iter().skip(skip) {
        let (status, key) = match Envelope::decode(&frame.body) {
            Ok(envelope) => {
                let key = match pipe.serializer().deserialize::<Value>(envelope.key) {
                    Ok(key) => key.to_string(),
                    Err(_) => format!("<{} bytes>", envelope.key.len()),
                };
                ("ok", key)
            }
            Err(_) => ("torn", String::new()),
        };

        let key: String = key.chars().take(KEY_PREVIEW).collect();
        println!(
            "{:<20} {:>10} {:>10} {:>8}  {:<6} {}",
            frame.tick,
            frame.offset,
            frame.before_offset,
            frame.frame_len(),
            status,
            key
        );
    }

    if skip > 0 {
        println!();
        println!("({} older frame(s) not shown)", skip);
    }

    Ok(())
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe subscribe` command - Print messages for a key until Ctrl+C.

use serde_json::Value;
use shmpipe_core::{Handler, SharedMemoryPipe, StartPosition};

use super::{load_config, parse_value};

pub async fn execute(
    config_path: Option<&str>,
    key: &str,
    from_beginning: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if from_beginning {
        config.start_position = StartPosition::Beginning;
    }

    let pipe = SharedMemoryPipe::open(&config)?;
    let key = parse_value(key);

    tracing::info!(queue = %config.queue_name, key = %key, "Subscribing");
    println!("Listening on {} for key {} (Ctrl+C to stop)", config.queue_name, key);

    let handler = Handler::sync(|message: Value| println!("{}", message));
    let mut subscription = pipe.subscriber::<Value, Value>().subscribe(key, handler)?;

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe().await?;

    let stats = subscription.stats();
    println!();
    println!("Subscription Summary:");
    println!("  Frames seen:       {}", stats.frames_seen);
    println!("  Delivered:         {}", stats.delivered);
    println!("  Other keys:        {}", stats.filtered);
    println!("  Torn frames:       {}", stats.integrity_skipped);
    println!("  Decode failures:   {}", stats.decode_failures);
    println!("  Handler failures:  {}", stats.handler_failures);
    println!("  Poll errors:       {}", stats.poll_errors);

    Ok(())
}

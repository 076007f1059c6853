// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe validate` command - Validate configuration file.

use shmpipe_core::{Backing, ConfigLoader};

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Queue Settings:");
            println!("  Name:              {}", config.queue_name);
            println!("  Size:              {}", config.queue_size);
            match config.backing {
                Backing::Shm => println!("  Backing:           shm (/{})", config.queue_name),
                Backing::File => println!(
                    "  Backing:           file ({})",
                    config.backing_dir.display()
                ),
            }
            println!("  Serializer:        {:?}", config.serializer);
            println!("  Polling Interval:  {:?}", config.polling_interval);
            println!("  Publish Timeout:   {:?}", config.publish_timeout);
            println!("  Subscribe Timeout: {:?}", config.subscribe_timeout);
            println!("  Frame Margin:      {} bytes", config.frame_margin);
            println!("  Writer Lock:       {:?}", config.writer_lock);
            println!("  Start Position:    {:?}", config.start_position);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

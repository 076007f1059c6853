// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe remove` command - Remove a queue's backing storage.
//!
//! Processes that still have the region mapped keep working on their copy.

use shmpipe_core::shm::{MappedFileRegion, SharedMemoryRegion};
use shmpipe_core::Backing;

use super::load_config;

pub async fn execute(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let name = config.queue_name.as_str();

    match config.backing {
        Backing::Shm => {
            SharedMemoryRegion::unlink(name)?;
            println!("✓ Removed shared memory object /{}", name);
        }
        Backing::File => {
            MappedFileRegion::remove(&config.backing_dir, name)?;
            println!(
                "✓ Removed {}",
                MappedFileRegion::path_for(&config.backing_dir, name).display()
            );
        }
    }

    Ok(())
}

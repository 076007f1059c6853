// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmpipe CLI
//!
//! Command-line interface for publishing to, subscribing to and inspecting
//! shared memory queues.

use clap::{Parser, Subcommand};

mod commands;

/// shmpipe - cross-process publish/subscribe over shared memory
#[derive(Parser)]
#[command(name = "shmpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a message under a key
    Publish {
        /// Key (JSON, or a bare string)
        key: String,

        /// Message (JSON, or a bare string)
        message: String,

        /// Publish the message this many times
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Print messages published under a key until interrupted
    Subscribe {
        /// Key (JSON, or a bare string)
        key: String,

        /// Replay everything still in the ring first
        #[arg(short, long)]
        from_beginning: bool,
    },

    /// Dump the frames currently reachable in the ring
    Inspect {
        /// Show at most this many of the newest frames
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Remove the queue's shared memory object or ring file
    Remove,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = cli.config.as_deref();

    // Dispatch to command handlers
    match cli.command {
        Commands::Publish {
            key,
            message,
            count,
        } => commands::publish::execute(config, &key, &message, count).await,
        Commands::Subscribe {
            key,
            from_beginning,
        } => commands::subscribe::execute(config, &key, from_beginning).await,
        Commands::Inspect { limit } => commands::inspect::execute(config, limit).await,
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Remove => commands::remove::execute(config).await,
    }
}

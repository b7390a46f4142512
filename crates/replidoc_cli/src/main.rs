//! Replidoc CLI
//!
//! Command-line tools for the replidoc replication protocol.
//!
//! # Commands
//!
//! - `simulate` - Run an in-process master with several replicas
//! - `check-doc` - Validate a document JSON body
//! - `show-checkpoint` - Print a replica's persisted pull checkpoint

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Replidoc command-line replication tools.
#[derive(Parser)]
#[command(name = "replidoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica state directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process master with several replicas
    Simulate {
        /// Number of replicas
        #[arg(short, long, default_value = "2")]
        replicas: usize,

        /// Number of documents seeded on the master
        #[arg(short, long, default_value = "5")]
        seed: usize,

        /// Force a conflicting edit on one seeded document
        #[arg(short, long)]
        conflict: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a document JSON body
    CheckDoc {
        /// Path to a JSON file, or '-' for stdin
        file: PathBuf,
    },

    /// Print a replica's persisted pull checkpoint
    ShowCheckpoint {
        /// Replication identifier naming the checkpoint file
        #[arg(short, long, default_value = "replidoc")]
        identifier: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            replicas,
            seed,
            conflict,
            format,
        } => {
            commands::simulate::run(replicas, seed, conflict, &format)?;
        }
        Commands::CheckDoc { file } => {
            commands::check_doc::run(&file)?;
        }
        Commands::ShowCheckpoint { identifier, format } => {
            let path = cli
                .path
                .ok_or("State directory required for show-checkpoint")?;
            commands::show_checkpoint::run(&path, &identifier, &format)?;
        }
        Commands::Version => {
            println!("Replidoc CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Replidoc Protocol v{}", replidoc_protocol::VERSION);
        }
    }

    Ok(())
}

//! Arbor CLI
//!
//! Command-line tools for Arbor database maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display file sizes, the catalog and row counts
//! - `dump-wal` - Dump WAL records for debugging
//! - `verify` - Report what recovery would do, without modifying anything
//! - `checkpoint` - Recover, checkpoint and close

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Arbor command-line database tools.
#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
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
    /// Display file sizes, the catalog and row counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump WAL records for debugging
    DumpWal {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Report what recovery would do, without modifying any file
    Verify,

    /// Run recovery, write a checkpoint and close
    Checkpoint,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::DumpWal { limit, format } => {
            let path = cli.path.ok_or("Database path required for dump-wal")?;
            commands::dump_wal::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Database path required for checkpoint")?;
            commands::checkpoint::run(&path)?;
        }
        Commands::Version => {
            println!("Arbor CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Arbor Core v{}", arbor_core::VERSION);
        }
    }

    Ok(())
}

//! Verify command implementation.

use arbor_core::dir::DatabaseDir;
use arbor_core::page::DataFile;
use arbor_core::recovery::{self, ReplayLimits};
use arbor_core::{Config, RecoveryOutcome, VerifyReport};
use std::path::Path;
use tracing::debug;

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {:?}", path);
    println!();

    match verify(path) {
        Ok(report) => {
            print_report(&report);
            println!();
            println!("✓ Database verification passed");
            Ok(())
        }
        Err(e) => {
            println!("  ERROR: {}", e);
            println!();
            println!("✗ Database verification failed");
            Err("Verification failed".into())
        }
    }
}

/// Works out what opening the database would do, without modifying any
/// file or taking the directory lock.
pub fn verify(path: &Path) -> Result<VerifyReport, Box<dyn std::error::Error>> {
    let files = DatabaseDir::open_files_read_only(path)?
        .ok_or_else(|| format!("No database found at {:?}", path))?;
    let config = Config::default();
    debug!(path = %path.display(), "verifying without modifying files");
    let data = DataFile::new(Box::new(files.data));
    let report = recovery::verify(
        &data,
        &files.wal,
        &files.shadow,
        config.format_version.0,
        ReplayLimits {
            block_capacity: config.undo_block_capacity,
            memory_limit: config.max_undo_memory,
        },
    )?;
    Ok(report)
}

fn print_report(report: &VerifyReport) {
    match report.checkpoint_ts {
        Some(ts) => println!("  Checkpoint image: timestamp {}", ts),
        None => println!("  Checkpoint image: none"),
    }

    if let Some(scan) = &report.scan {
        println!(
            "  WAL: {} bytes, {} records, {} committed transactions",
            scan.file_size, scan.records, scan.transactions
        );
        if let Some(error) = &scan.tail_error {
            println!(
                "  Torn tail of {} bytes would be discarded ({})",
                scan.discarded_bytes(),
                error
            );
        }
    } else {
        println!("  WAL: empty");
    }

    match report.outcome {
        RecoveryOutcome::Clean => println!("  Recovery: nothing to do"),
        RecoveryOutcome::CheckpointApplied { pages } => {
            println!("  Recovery: would finish a checkpoint of {} pages", pages)
        }
        RecoveryOutcome::WalReplayed {
            transactions,
            records,
        } => println!(
            "  Recovery: would replay {} transactions ({} records)",
            transactions, records
        ),
    }
    println!("  Last commit after recovery: {}", report.last_commit_ts);
}

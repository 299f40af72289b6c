//! Checkpoint command implementation.

use arbor_core::{CheckpointStats, Config, Database, RecoveryOutcome};
use std::path::Path;

/// Runs the checkpoint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checkpointing database at {:?}", path);

    let (outcome, stats) = checkpoint(path)?;
    println!("  Recovery: {:?}", outcome);
    println!("  Checkpoint timestamp: {}", stats.checkpoint_ts);
    println!(
        "  Pages: {} total, {} written through the shadow file",
        stats.total_pages, stats.staged_pages
    );
    println!("  Snapshot: {} bytes", stats.snapshot_bytes);
    println!();
    println!("✓ Checkpoint complete");

    Ok(())
}

/// Opens the database, which runs recovery, checkpoints and closes it.
pub fn checkpoint(
    path: &Path,
) -> Result<(RecoveryOutcome, CheckpointStats), Box<dyn std::error::Error>> {
    let db = Database::open_with_config(path, Config::default().create_if_missing(false))?;
    let outcome = db.recovery_report().outcome;
    let stats = db.checkpoint()?;
    db.close()?;
    Ok((outcome, stats))
}

//! Inspect command implementation.

use arbor_core::dir::{DATA_FILE, SHADOW_FILE, WAL_FILE};
use arbor_core::{Config, Database};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Data file size in bytes.
    pub data_size: u64,
    /// WAL size in bytes.
    pub wal_size: u64,
    /// Shadow file size in bytes.
    pub shadow_size: u64,
    /// What recovery did when the database was opened.
    pub recovery: String,
    /// Last commit timestamp.
    pub last_commit_ts: u64,
    /// Catalog entries.
    pub entries: Vec<EntryInfo>,
}

/// One catalog entry.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Entry name.
    pub name: String,
    /// Entry kind.
    pub kind: String,
    /// Object ID.
    pub oid: u64,
    /// Live rows, for tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Column names and types.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Opens the database, which runs recovery, and collects its statistics.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.join(DATA_FILE).exists() {
        return Err(format!("No database found at {:?}", path).into());
    }

    let db = Database::open_with_config(path, Config::default().create_if_missing(false))?;
    let mut entries = Vec::new();
    for entry in db.catalog_entries()? {
        let rows = match entry.table_id() {
            Some(id) => Some(db.count(id)?),
            None => None,
        };
        entries.push(EntryInfo {
            name: entry.name().to_string(),
            kind: format!("{:?}", entry.kind()),
            oid: entry.oid(),
            rows,
            columns: entry
                .columns()
                .iter()
                .map(|c| format!("{} {:?}", c.name, c.ty))
                .collect(),
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        data_size: file_size(&path.join(DATA_FILE)),
        wal_size: file_size(&path.join(WAL_FILE)),
        shadow_size: file_size(&path.join(SHADOW_FILE)),
        recovery: format!("{:?}", db.recovery_report().outcome),
        last_commit_ts: db.last_commit_ts().as_u64(),
        entries,
    };
    db.close()?;
    Ok(result)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!("================");
    println!();
    println!("Files:");
    println!("  Data file:   {} bytes", result.data_size);
    println!("  WAL:         {} bytes", result.wal_size);
    println!("  Shadow file: {} bytes", result.shadow_size);
    println!();
    println!("Recovery: {}", result.recovery);
    println!("Last commit: {}", result.last_commit_ts);
    println!();
    println!("Catalog ({} entries):", result.entries.len());
    for entry in &result.entries {
        print!("  [{:>4}] {:10} {}", entry.oid, entry.kind, entry.name);
        if let Some(rows) = entry.rows {
            print!(" ({} rows)", rows);
        }
        println!();
        for column in &entry.columns {
            println!("         - {}", column);
        }
    }
}

//! Dump WAL command implementation.

use arbor_core::dir::WAL_FILE;
use arbor_core::wal::WalReader;
use arbor_core::WalRecord;
use arbor_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// WAL record representation for output.
#[derive(Debug, Serialize)]
pub struct WalRecordInfo {
    /// Offset in the WAL file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Table ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u64>,
    /// Sequence ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
    /// Record-specific details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What the dump found.
#[derive(Debug, Serialize)]
pub struct WalDump {
    /// WAL size in bytes.
    pub file_size: u64,
    /// Decoded records.
    pub records: Vec<WalRecordInfo>,
    /// The error that stopped decoding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the dump-wal command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dump = dump(path, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

/// Decodes up to `limit` records without modifying the file.
pub fn dump(path: &Path, limit: Option<usize>) -> Result<WalDump, Box<dyn std::error::Error>> {
    let wal_path = path.join(WAL_FILE);

    if !wal_path.exists() {
        return Err("WAL file not found".into());
    }

    let backend = FileBackend::open_read_only(&wal_path)?;
    let mut dump = WalDump {
        file_size: backend.size()?,
        records: Vec::new(),
        error: None,
    };
    let max_records = limit.unwrap_or(usize::MAX);

    for entry in WalReader::new(&backend)?.take(max_records) {
        match entry {
            Ok((offset, record)) => dump.records.push(describe(offset, &record)),
            Err(e) => {
                debug!(error = %e, "stopped decoding WAL");
                dump.error = Some(e.to_string());
                break;
            }
        }
    }

    Ok(dump)
}

fn describe(offset: u64, record: &WalRecord) -> WalRecordInfo {
    let mut info = WalRecordInfo {
        offset,
        record_type: format!("{:?}", record.record_type()),
        table_id: None,
        sequence_id: None,
        detail: None,
    };

    match record {
        WalRecord::BeginTransaction | WalRecord::Commit | WalRecord::Checkpoint => {}
        WalRecord::CreateCatalogEntry { entry } => {
            info.table_id = entry.table_id().map(|id| id.as_u64());
            info.detail = Some(format!("{:?} {}", entry.kind(), entry.name()));
        }
        WalRecord::DropCatalogEntry { oid, kind } => {
            info.detail = Some(format!("{:?} oid={}", kind, oid));
        }
        WalRecord::AlterCatalogEntry { info: alter } => {
            info.detail = Some(format!("{:?}", alter));
        }
        WalRecord::TableInsertion {
            table_id,
            kind,
            num_rows,
            columns,
        } => {
            info.table_id = Some(table_id.as_u64());
            info.detail = Some(format!(
                "{:?} rows={} columns={}",
                kind,
                num_rows,
                columns.len()
            ));
        }
        WalRecord::NodeDeletion {
            table_id,
            node_offset,
            pk,
        } => {
            info.table_id = Some(table_id.as_u64());
            info.detail = Some(format!("node={} pk={:?}", node_offset, pk));
        }
        WalRecord::NodeUpdate {
            table_id,
            column_id,
            node_offset,
            value,
        } => {
            info.table_id = Some(table_id.as_u64());
            info.detail = Some(format!(
                "node={} column={} value={:?}",
                node_offset,
                column_id.0,
                value
            ));
        }
        WalRecord::RelDeletion {
            table_id,
            src,
            dst,
            rel_id,
        } => {
            info.table_id = Some(table_id.as_u64());
            info.detail = Some(format!("rel={} {}->{}", rel_id, src, dst));
        }
        WalRecord::RelDetachDeletion {
            table_id,
            direction,
            node_offset,
        } => {
            info.table_id = Some(table_id.as_u64());
            info.detail = Some(format!("{:?} node={}", direction, node_offset));
        }
        WalRecord::RelUpdate {
            table_id,
            column_id,
            src,
            dst,
            rel_id,
            value,
        } => {
            info.table_id = Some(table_id.as_u64());
            info.detail = Some(format!(
                "rel={} {}->{} column={} value={:?}",
                rel_id,
                src,
                dst,
                column_id.0,
                value
            ));
        }
        WalRecord::SequenceUpdate {
            sequence_id,
            kcount,
        } => {
            info.sequence_id = Some(sequence_id.as_u64());
            info.detail = Some(format!("kcount={}", kcount));
        }
        WalRecord::LoadExtension { path } => {
            info.detail = Some(path.clone());
        }
    }

    info
}

fn print_text_output(dump: &WalDump) {
    println!("WAL Records ({} total, {} bytes)", dump.records.len(), dump.file_size);
    println!("================");
    println!();

    for record in &dump.records {
        print!("[{:08}] {:20}", record.offset, record.record_type);

        if let Some(table) = record.table_id {
            print!(" table={}", table);
        }
        if let Some(seq) = record.sequence_id {
            print!(" sequence={}", seq);
        }
        if let Some(ref detail) = record.detail {
            print!(" {}", detail);
        }

        println!();
    }

    if let Some(ref error) = dump.error {
        println!();
        println!("Stopped: {}", error);
    }
}

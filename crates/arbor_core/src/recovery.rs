//! Startup recovery.
//!
//! Recovery is the only code that reads the WAL and the shadow file left by
//! a previous process. It runs once, single-threaded, before the database
//! accepts transactions:
//!
//! 1. An empty WAL means a clean shutdown (or a crash between
//!    transactions): the stale shadow file is discarded and the checkpoint
//!    image is loaded.
//! 2. Otherwise the WAL is scanned without applying anything
//!    ([`dry_replay`]) to find the last committed offset and whether a
//!    checkpoint was logged.
//! 3. A logged checkpoint is finished by copying the shadow pages home;
//!    the WAL and shadow file are then cleared.
//! 4. Without one, the committed prefix of the WAL is replayed on top of
//!    the checkpoint image and the uncommitted tail is cut off.

use crate::checkpoint::Checkpointer;
use crate::error::{CoreError, CoreResult};
use crate::page::DataFile;
use crate::shadow::ShadowFile;
use crate::state::DatabaseState;
use crate::types::{TableId, TableKind, Timestamp, TransactionId, Visibility};
use crate::undo::UndoBuffer;
use crate::wal::{find_valid_record, WalReader, WalRecord};
use arbor_storage::StorageBackend;
use tracing::{debug, info, warn};

/// What a dry-run scan of the WAL found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalScan {
    /// Offset just past the last `Commit` (or `Checkpoint`) record.
    pub last_commit_offset: u64,
    /// Whether the log ends with a `Checkpoint` record.
    pub is_checkpoint: bool,
    /// Records decoded.
    pub records: u64,
    /// `Commit` records seen.
    pub transactions: u64,
    /// Size of the log file.
    pub file_size: u64,
    /// The tail error that was absorbed, if any.
    pub tail_error: Option<String>,
}

impl WalScan {
    /// Bytes after the last commit that recovery discards.
    #[must_use]
    pub fn discarded_bytes(&self) -> u64 {
        self.file_size.saturating_sub(self.last_commit_offset)
    }
}

/// Scans the WAL, validating every record, without applying anything.
///
/// A record the file ends inside (`TornWrite`) is what a crash mid-append
/// leaves, and it is the last record by position: the log ends before it.
/// A record that is garbled or does not decode ends the log only if no
/// valid record starts after the point where decoding stopped; otherwise
/// the log is corrupt in the middle and the scan fails.
///
/// # Errors
///
/// - `ChecksumMismatch` for a garbled record followed by valid records
/// - `WalCorruption` for an undecodable record followed by valid records
/// - I/O errors
pub fn dry_replay<S>(backend: &S) -> CoreResult<WalScan>
where
    S: StorageBackend + ?Sized,
{
    let mut reader = WalReader::new(backend)?;
    let mut scan = WalScan {
        file_size: reader.file_size(),
        ..WalScan::default()
    };

    loop {
        let offset = reader.offset();
        match reader.next_entry() {
            Ok(None) => break,
            Ok(Some(entry)) => {
                scan.records += 1;
                match entry.record {
                    WalRecord::Commit => {
                        scan.transactions += 1;
                        scan.last_commit_offset = entry.end_offset;
                    }
                    WalRecord::Checkpoint => {
                        scan.is_checkpoint = true;
                        scan.last_commit_offset = entry.end_offset;
                        break;
                    }
                    _ => {}
                }
            }
            Err(e) if !e.is_decode_failure() => return Err(e),
            Err(e) => {
                let next = match e {
                    CoreError::TornWrite { .. } => None,
                    _ => find_valid_record(backend, reader.offset())?,
                };
                if let Some(next) = next {
                    return Err(match e {
                        CoreError::ChecksumMismatch { .. } => e,
                        other => CoreError::wal_corruption(format!(
                            "undecodable record at offset {offset} ({other}) followed by a valid record at {next}"
                        )),
                    });
                }
                warn!(offset, error = %e, "discarding torn WAL tail");
                scan.tail_error = Some(format!("at offset {offset}: {e}"));
                break;
            }
        }
    }
    Ok(scan)
}

/// Outcome of recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing to do; the checkpoint image was loaded as is.
    Clean,
    /// An interrupted checkpoint was finished.
    CheckpointApplied {
        /// Shadow pages copied into the data file.
        pages: usize,
    },
    /// Committed transactions were replayed from the WAL.
    WalReplayed {
        /// Transactions replayed.
        transactions: u64,
        /// Records applied, framing records included.
        records: u64,
    },
}

/// What recovery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// The path taken.
    pub outcome: RecoveryOutcome,
    /// The dry-run scan, unless the WAL was empty.
    pub scan: Option<WalScan>,
    /// Commit timestamp of the recovered state.
    pub last_commit_ts: Timestamp,
}

/// Applies WAL records to a [`DatabaseState`] through the same operations
/// a live transaction uses, one recovery transaction per
/// `BeginTransaction`/`Commit` pair. Nothing is logged.
pub struct WalReplayer<'a> {
    state: &'a mut DatabaseState,
    block_capacity: usize,
    memory_limit: usize,
    active: Option<(TransactionId, UndoBuffer)>,
    next_txid: u64,
    transactions: u64,
    records: u64,
}

impl<'a> WalReplayer<'a> {
    /// Creates a replayer whose recovery transactions use undo buffers of
    /// the given geometry.
    pub fn new(state: &'a mut DatabaseState, block_capacity: usize, memory_limit: usize) -> Self {
        Self {
            state,
            block_capacity,
            memory_limit,
            active: None,
            next_txid: 1,
            transactions: 0,
            records: 0,
        }
    }

    /// Applies one record.
    ///
    /// # Errors
    ///
    /// Returns `ReplayLogic` for the record at `offset` if it cannot be
    /// applied; the active recovery transaction is rolled back first.
    pub fn replay(&mut self, offset: u64, record: &WalRecord) -> CoreResult<()> {
        debug!(offset, record = record.record_type().name(), "replaying WAL record");
        self.records += 1;
        if let Err(e) = self.apply(record) {
            self.abort();
            return Err(match e {
                CoreError::ReplayLogic { .. } => e,
                other => CoreError::replay_logic(offset, other.to_string()),
            });
        }
        Ok(())
    }

    fn apply(&mut self, record: &WalRecord) -> CoreResult<()> {
        match record {
            WalRecord::BeginTransaction => {
                // A commit that failed and could not be cut from the log
                // leaves its records open; the next transaction starts here.
                if let Some((txid, undo)) = self.active.take() {
                    warn!(txid = txid.as_u64(), "discarding unterminated transaction");
                    undo.rollback(self.state)?;
                }
                let txid = TransactionId::new(self.next_txid);
                self.next_txid += 1;
                self.active = Some((txid, UndoBuffer::new(self.block_capacity, self.memory_limit)));
                Ok(())
            }
            WalRecord::Commit => {
                let (_, undo) = self
                    .active
                    .take()
                    .ok_or_else(|| CoreError::invalid_operation("Commit without BeginTransaction"))?;
                let ts = self.state.last_commit_ts().next();
                undo.commit(ts, self.state)?;
                self.transactions += 1;
                Ok(())
            }
            WalRecord::Checkpoint => Err(CoreError::invalid_operation(
                "Checkpoint record in the middle of a replayed log",
            )),
            _ => {
                let (txid, undo) = self.active.as_ref().ok_or_else(|| {
                    CoreError::invalid_operation("data record outside a transaction")
                })?;
                apply_data_record(self.state, *txid, undo, record)
            }
        }
    }

    fn abort(&mut self) {
        if let Some((_, undo)) = self.active.take() {
            if let Err(e) = undo.rollback(self.state) {
                warn!(error = %e, "rollback of recovery transaction failed");
            }
        }
    }

    /// Ends replay, rolling back a transaction left open. Returns the
    /// number of transactions and records replayed.
    #[must_use]
    pub fn finish(mut self) -> (u64, u64) {
        self.abort();
        (self.transactions, self.records)
    }
}

fn apply_data_record(
    state: &mut DatabaseState,
    txid: TransactionId,
    undo: &UndoBuffer,
    record: &WalRecord,
) -> CoreResult<()> {
    match record {
        WalRecord::CreateCatalogEntry { entry } => state.create_entry(txid, undo, entry.clone()),
        WalRecord::DropCatalogEntry { oid, kind } => state.drop_by_oid(txid, undo, *oid, *kind),
        WalRecord::AlterCatalogEntry { info } => state.alter(txid, undo, info.clone()),
        WalRecord::TableInsertion {
            table_id,
            kind,
            num_rows,
            columns,
        } => state
            .insert_columns(txid, undo, *table_id, *kind, *num_rows, columns)
            .map(drop),
        WalRecord::NodeDeletion {
            table_id,
            node_offset,
            pk,
        } => {
            let stored = state
                .table_store(*table_id)
                .and_then(|t| t.primary_key_of(*node_offset));
            if stored != Some(pk) {
                return Err(CoreError::invalid_operation(format!(
                    "{table_id}: node {node_offset} does not have primary key {pk}"
                )));
            }
            state.delete_node(txid, undo, *table_id, *node_offset)
        }
        WalRecord::NodeUpdate {
            table_id,
            column_id,
            node_offset,
            value,
        } => state
            .update(txid, undo, *table_id, *column_id, *node_offset, value.clone())
            .map(drop),
        WalRecord::RelDeletion {
            table_id,
            src,
            dst,
            rel_id,
        } => {
            check_rel(state, txid, *table_id, *src, *dst, *rel_id)?;
            state.delete_rel(txid, undo, *table_id, *rel_id)
        }
        WalRecord::RelDetachDeletion {
            table_id,
            direction,
            node_offset,
        } => state
            .detach_rels(txid, undo, *table_id, *direction, *node_offset)
            .map(drop),
        WalRecord::RelUpdate {
            table_id,
            column_id,
            src,
            dst,
            rel_id,
            value,
        } => {
            check_rel(state, txid, *table_id, *src, *dst, *rel_id)?;
            state
                .update(txid, undo, *table_id, *column_id, *rel_id, value.clone())
                .map(drop)
        }
        WalRecord::SequenceUpdate {
            sequence_id,
            kcount,
        } => state
            .next_values(txid, undo, *sequence_id, *kcount)
            .map(drop),
        WalRecord::LoadExtension { path } => state.load_extension(txid, undo, path),
        WalRecord::BeginTransaction | WalRecord::Commit | WalRecord::Checkpoint => Err(
            CoreError::invalid_operation("framing record passed as data"),
        ),
    }
}

/// Checks that a logged rel still has the endpoints the record names.
fn check_rel(
    state: &DatabaseState,
    txid: TransactionId,
    table_id: TableId,
    src: u64,
    dst: u64,
    rel_id: u64,
) -> CoreResult<()> {
    let store = state
        .table_store(table_id)
        .filter(|t| t.kind() == TableKind::Rel)
        .ok_or_else(|| CoreError::invalid_operation(format!("{table_id} is not a rel table")))?;
    if !store.is_visible(rel_id, Visibility::Transaction(txid)) {
        return Err(CoreError::invalid_operation(format!(
            "{table_id}: rel {rel_id} does not exist"
        )));
    }
    if store.endpoints(rel_id) != Some((src, dst)) {
        return Err(CoreError::invalid_operation(format!(
            "{table_id}: rel {rel_id} is not ({src}, {dst})"
        )));
    }
    Ok(())
}

/// Replays the records of `backend` that lie before `end`.
fn replay_prefix<S>(
    backend: &S,
    end: u64,
    state: &mut DatabaseState,
    block_capacity: usize,
    memory_limit: usize,
) -> CoreResult<(u64, u64)>
where
    S: StorageBackend + ?Sized,
{
    let mut replayer = WalReplayer::new(state, block_capacity, memory_limit);
    let mut reader = WalReader::new(backend)?;
    while reader.offset() < end {
        let Some(entry) = reader.next_entry()? else {
            break;
        };
        replayer.replay(entry.offset, &entry.record)?;
    }
    Ok(replayer.finish())
}

/// Undo buffer geometry for recovery transactions.
#[derive(Debug, Clone, Copy)]
pub struct ReplayLimits {
    /// Capacity of one undo block.
    pub block_capacity: usize,
    /// Undo memory limit per recovery transaction.
    pub memory_limit: usize,
}

/// Runs recovery over the files of one database.
///
/// On success the WAL holds exactly the replayed committed prefix (or
/// nothing), the shadow file is an empty header, and the returned state is
/// what the last committed transaction left.
///
/// # Errors
///
/// Any error aborts startup: fatal WAL corruption, a damaged checkpoint
/// image or shadow file, `ReplayLogic`, or I/O failure.
pub fn recover(
    wal: &mut dyn StorageBackend,
    checkpointer: &mut Checkpointer,
    limits: ReplayLimits,
) -> CoreResult<(DatabaseState, RecoveryReport)> {
    if wal.size()? == 0 {
        checkpointer.discard_shadow()?;
        clear_wal(wal)?;
        let state = checkpointer.load_state()?;
        let report = RecoveryReport {
            outcome: RecoveryOutcome::Clean,
            scan: None,
            last_commit_ts: state.last_commit_ts(),
        };
        info!(last_commit_ts = report.last_commit_ts.as_u64(), "recovery: clean start");
        return Ok((state, report));
    }

    let scan = dry_replay(&*wal)?;
    let (state, outcome) = if scan.is_checkpoint {
        let pages = checkpointer.replay_shadow()?;
        clear_wal(wal)?;
        checkpointer.discard_shadow()?;
        (checkpointer.load_state()?, RecoveryOutcome::CheckpointApplied { pages })
    } else {
        checkpointer.discard_shadow()?;
        let mut state = checkpointer.load_state()?;
        let (transactions, records) = replay_prefix(
            &*wal,
            scan.last_commit_offset,
            &mut state,
            limits.block_capacity,
            limits.memory_limit,
        )?;
        if scan.file_size > scan.last_commit_offset {
            wal.truncate(scan.last_commit_offset)?;
            wal.sync()?;
        }
        (state, RecoveryOutcome::WalReplayed {
            transactions,
            records,
        })
    };

    let report = RecoveryReport {
        outcome,
        last_commit_ts: state.last_commit_ts(),
        scan: Some(scan),
    };
    info!(
        outcome = ?report.outcome,
        last_commit_ts = report.last_commit_ts.as_u64(),
        "recovery complete"
    );
    Ok((state, report))
}

fn clear_wal(wal: &mut dyn StorageBackend) -> CoreResult<()> {
    if wal.size()? > 0 {
        wal.truncate(0)?;
    }
    wal.sync()?;
    Ok(())
}

/// What [`verify`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// What opening the database would do.
    pub outcome: RecoveryOutcome,
    /// The dry-run scan, unless the WAL is empty.
    pub scan: Option<WalScan>,
    /// Timestamp of the checkpoint image, if there is one.
    pub checkpoint_ts: Option<Timestamp>,
    /// Commit timestamp recovery would reach.
    pub last_commit_ts: Timestamp,
}

/// Works out what recovery would do without modifying any file.
///
/// The checkpoint image is decoded, a logged checkpoint's shadow trailer is
/// validated, and otherwise the committed WAL prefix is replayed against an
/// in-memory copy of the image.
///
/// # Errors
///
/// Returns the error recovery itself would fail with.
pub fn verify(
    data: &DataFile,
    wal: &dyn StorageBackend,
    shadow: &dyn StorageBackend,
    supported_major: u16,
    limits: ReplayLimits,
) -> CoreResult<VerifyReport> {
    let checkpoint_ts = data.header(supported_major)?.map(|h| h.checkpoint_ts);
    let mut state = data.load_state(supported_major)?;

    if wal.size()? == 0 {
        return Ok(VerifyReport {
            outcome: RecoveryOutcome::Clean,
            scan: None,
            checkpoint_ts,
            last_commit_ts: state.last_commit_ts(),
        });
    }

    let scan = dry_replay(wal)?;
    let (outcome, last_commit_ts) = if scan.is_checkpoint {
        let records = ShadowFile::read_records(shadow)?;
        // The image the shadow pages describe is not readable without
        // applying them; the checkpoint covers every logged commit.
        (
            RecoveryOutcome::CheckpointApplied {
                pages: records.len(),
            },
            state.last_commit_ts(),
        )
    } else {
        let (transactions, records) = replay_prefix(
            wal,
            scan.last_commit_offset,
            &mut state,
            limits.block_capacity,
            limits.memory_limit,
        )?;
        (
            RecoveryOutcome::WalReplayed {
                transactions,
                records,
            },
            state.last_commit_ts(),
        )
    };
    Ok(VerifyReport {
        outcome,
        scan: Some(scan),
        checkpoint_ts,
        last_commit_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, ColumnDef, NodeTableDef};
    use crate::page::{BufferPool, PAGE_SIZE};
    use crate::types::{ColumnId, FileId};
    use crate::value::{LogicalType, Value};
    use crate::wal::{Wal, WalRecordType};
    use arbor_storage::InMemoryBackend;

    const LIMITS: ReplayLimits = ReplayLimits {
        block_capacity: 4096,
        memory_limit: 1 << 20,
    };

    fn person_table(id: u64) -> WalRecord {
        WalRecord::CreateCatalogEntry {
            entry: CatalogEntry::NodeTable(NodeTableDef {
                id: TableId::new(id),
                name: "person".to_string(),
                columns: vec![ColumnDef::new("id", LogicalType::Int64)],
                primary_key: ColumnId::new(0),
            }),
        }
    }

    fn insert(table: u64, keys: &[i64]) -> WalRecord {
        WalRecord::TableInsertion {
            table_id: TableId::new(table),
            kind: TableKind::Node,
            num_rows: keys.len() as u64,
            columns: vec![keys.iter().map(|&k| Value::Int64(k)).collect()],
        }
    }

    fn log(records: &[WalRecord]) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let wal = Wal::new(Box::new(backend.clone()), 1 << 16, true).unwrap();
        for record in records {
            wal.append(record).unwrap();
        }
        wal.flush().unwrap();
        backend
    }

    fn checkpointer() -> Checkpointer {
        Checkpointer::new(
            DataFile::new(Box::new(InMemoryBackend::new())),
            ShadowFile::new(Box::new(InMemoryBackend::new()), 64),
            BufferPool::new(8),
            (1, 0),
        )
    }

    fn rows(state: &DatabaseState, table: u64) -> u64 {
        state
            .table_store(TableId::new(table))
            .map_or(0, |t| t.count(Visibility::Committed))
    }

    #[test]
    fn uncommitted_insert_is_not_replayed() {
        let mut wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            insert(5, &[1, 2, 3]),
        ]);
        let scan = dry_replay(&wal).unwrap();
        assert_eq!(scan.last_commit_offset, 0);
        assert!(!scan.is_checkpoint);

        let (state, report) = recover(&mut wal, &mut checkpointer(), LIMITS).unwrap();
        assert_eq!(rows(&state, 5), 0);
        assert_eq!(
            report.outcome,
            RecoveryOutcome::WalReplayed {
                transactions: 0,
                records: 0
            }
        );
        assert_eq!(wal.size().unwrap(), 0);
    }

    #[test]
    fn committed_insert_is_replayed() {
        let mut wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            insert(5, &[1, 2, 3]),
            WalRecord::Commit,
        ]);
        let (state, report) = recover(&mut wal, &mut checkpointer(), LIMITS).unwrap();
        assert_eq!(rows(&state, 5), 3);
        assert_eq!(state.last_commit_ts(), Timestamp::new(1));
        assert!(matches!(
            report.outcome,
            RecoveryOutcome::WalReplayed { transactions: 1, .. }
        ));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            WalRecord::Commit,
            WalRecord::BeginTransaction,
            insert(5, &[7]),
        ]);
        let committed = dry_replay(&wal).unwrap().last_commit_offset;
        let mut data = wal.data();
        data.truncate(data.len() - 3);
        let mut wal = InMemoryBackend::with_data(data);

        let scan = dry_replay(&wal).unwrap();
        assert_eq!(scan.last_commit_offset, committed);
        assert!(scan.tail_error.is_some());

        recover(&mut wal, &mut checkpointer(), LIMITS).unwrap();
        assert_eq!(wal.size().unwrap(), committed);
    }

    fn blob_table(id: u64) -> WalRecord {
        WalRecord::CreateCatalogEntry {
            entry: CatalogEntry::NodeTable(NodeTableDef {
                id: TableId::new(id),
                name: "doc".to_string(),
                columns: vec![
                    ColumnDef::new("id", LogicalType::Int64),
                    ColumnDef::new("body", LogicalType::Blob),
                ],
                primary_key: ColumnId::new(0),
            }),
        }
    }

    /// A committed blob table, then an open transaction whose insertion
    /// carries a complete `Commit` frame inside its blob value. Returns the
    /// log and the offset of the insertion record.
    fn log_with_embedded_frame() -> (InMemoryBackend, u64) {
        let mut body = crate::checksum::frame(&[WalRecordType::Commit.as_byte()]);
        body.extend_from_slice(&[0xaa; 32]);
        let wal = log(&[
            WalRecord::BeginTransaction,
            blob_table(5),
            WalRecord::Commit,
            WalRecord::BeginTransaction,
            WalRecord::TableInsertion {
                table_id: TableId::new(5),
                kind: TableKind::Node,
                num_rows: 1,
                columns: vec![vec![Value::Int64(1)], vec![Value::Blob(body)]],
            },
        ]);
        let insertion = dry_replay(&wal).unwrap().last_commit_offset + 9;
        (wal, insertion)
    }

    #[test]
    fn torn_record_carrying_a_frame_is_absorbed() {
        let (wal, insertion) = log_with_embedded_frame();
        // The blob really does hold a record a byte-wise search would find.
        assert!(find_valid_record(&wal, insertion + 1).unwrap().is_some());

        let mut data = wal.data();
        data.truncate(data.len() - 3);
        let mut wal = InMemoryBackend::with_data(data);

        let scan = dry_replay(&wal).unwrap();
        assert_eq!(scan.records, 4);
        assert_eq!(scan.last_commit_offset, insertion - 9);
        assert!(scan.tail_error.as_deref().unwrap().contains("torn write"));

        let (state, _) = recover(&mut wal, &mut checkpointer(), LIMITS).unwrap();
        assert_eq!(rows(&state, 5), 0);
        assert_eq!(wal.size().unwrap(), insertion - 9);
        // Recovery succeeds again on the truncated log.
        recover(&mut wal, &mut checkpointer(), LIMITS).unwrap();
    }

    #[test]
    fn garbled_final_record_carrying_a_frame_is_absorbed() {
        let (wal, insertion) = log_with_embedded_frame();
        let mut data = wal.data();
        let last = data.len() - 1;
        data[last] ^= 0x10;
        wal.set_data(data);

        let scan = dry_replay(&wal).unwrap();
        assert_eq!(scan.records, 4);
        assert_eq!(scan.last_commit_offset, insertion - 9);
    }

    #[test]
    fn interior_checksum_failure_is_fatal() {
        let wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            WalRecord::Commit,
        ]);
        let mut data = wal.data();
        data[12] ^= 0x40;
        wal.set_data(data);
        assert!(matches!(
            dry_replay(&wal),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn interior_bad_tag_is_fatal() {
        let wal = log(&[WalRecord::BeginTransaction, WalRecord::Commit]);
        let mut data = wal.data();
        data[0] = 0xee;
        wal.set_data(data);
        assert!(matches!(
            dry_replay(&wal),
            Err(CoreError::WalCorruption { .. })
        ));
    }

    #[test]
    fn garbled_final_record_is_absorbed() {
        let wal = log(&[WalRecord::BeginTransaction, WalRecord::Commit]);
        let mut data = wal.data();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        wal.set_data(data);

        let scan = dry_replay(&wal).unwrap();
        assert_eq!(scan.last_commit_offset, 0);
        assert_eq!(scan.records, 1);
    }

    #[test]
    fn io_errors_are_not_absorbed() {
        assert!(!CoreError::Storage(arbor_storage::StorageError::ReadPastEnd {
            offset: 0,
            len: 1,
            size: 0
        })
        .is_decode_failure());
    }

    #[test]
    fn unterminated_transaction_before_a_commit_is_discarded() {
        let mut wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            WalRecord::Commit,
            WalRecord::BeginTransaction,
            insert(5, &[1, 2, 3]),
            WalRecord::BeginTransaction,
            insert(5, &[4]),
            WalRecord::Commit,
        ]);
        let (state, report) = recover(&mut wal, &mut checkpointer(), LIMITS).unwrap();
        assert_eq!(rows(&state, 5), 1);
        let store = state.table_store(TableId::new(5)).unwrap();
        assert!(store.lookup(&Value::Int64(4), Visibility::Committed).is_some());
        assert!(store.lookup(&Value::Int64(1), Visibility::Committed).is_none());
        assert_eq!(state.last_commit_ts(), Timestamp::new(2));
        assert!(matches!(
            report.outcome,
            RecoveryOutcome::WalReplayed { transactions: 2, .. }
        ));
    }

    #[test]
    fn replay_on_unknown_table_is_replay_logic() {
        let mut wal = log(&[
            WalRecord::BeginTransaction,
            insert(42, &[1]),
            WalRecord::Commit,
        ]);
        let result = recover(&mut wal, &mut checkpointer(), LIMITS);
        assert!(matches!(
            result,
            Err(CoreError::ReplayLogic { offset: 9, .. })
        ));
    }

    #[test]
    fn logged_checkpoint_applies_shadow_pages() {
        let data = InMemoryBackend::new();
        let shadow = InMemoryBackend::new();
        let wal_backend = InMemoryBackend::new();

        // Commit one transaction, then checkpoint but stop before applying.
        let mut source = log(&[
            WalRecord::BeginTransaction,
            person_table(1),
            insert(1, &[10, 20]),
            WalRecord::Commit,
        ]);
        let (state, _) = recover(&mut source, &mut checkpointer(), LIMITS).unwrap();
        let snapshot = state.encode_snapshot();
        let pages = crate::page::checkpoint_image(&snapshot, state.last_commit_ts(), (1, 0));
        let mut staged = ShadowFile::new(Box::new(shadow.clone()), 64);
        for (i, page) in pages.iter().enumerate() {
            let slot = staged.stage(FileId::DATA, i as u32).unwrap();
            staged.write_page(slot, page).unwrap();
        }
        staged.flush_all().unwrap();
        let wal = Wal::new(Box::new(wal_backend.clone()), 1024, true).unwrap();
        wal.append(&WalRecord::BeginTransaction).unwrap();
        wal.log_commit().unwrap();
        wal.log_and_flush_checkpoint().unwrap();

        let mut checkpointer = Checkpointer::new(
            DataFile::new(Box::new(data.clone())),
            ShadowFile::new(Box::new(shadow.clone()), 64),
            BufferPool::new(8),
            (1, 0),
        );
        let mut wal_file = wal_backend.clone();
        let (recovered, report) = recover(&mut wal_file, &mut checkpointer, LIMITS).unwrap();
        assert_eq!(
            report.outcome,
            RecoveryOutcome::CheckpointApplied { pages: pages.len() }
        );
        assert_eq!(rows(&recovered, 1), 2);
        assert_eq!(wal_backend.size().unwrap(), 0);
        assert_eq!(shadow.size().unwrap(), PAGE_SIZE as u64);
    }

    #[test]
    fn logged_checkpoint_without_shadow_is_fatal() {
        let mut wal = log(&[WalRecord::Checkpoint]);
        let result = recover(&mut wal, &mut checkpointer(), LIMITS);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn verify_leaves_files_untouched() {
        let wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            insert(5, &[1, 2]),
            WalRecord::Commit,
            WalRecord::BeginTransaction,
        ]);
        let before = wal.data();
        let data = DataFile::new(Box::new(InMemoryBackend::new()));
        let shadow = InMemoryBackend::new();

        let report = verify(&data, &wal, &shadow, 1, LIMITS).unwrap();
        assert!(matches!(
            report.outcome,
            RecoveryOutcome::WalReplayed { transactions: 1, .. }
        ));
        assert_eq!(report.last_commit_ts, Timestamp::new(1));
        assert_eq!(report.checkpoint_ts, None);
        assert_eq!(wal.data(), before);
    }

    #[test]
    fn node_deletion_checks_primary_key() {
        let mut wal = log(&[
            WalRecord::BeginTransaction,
            person_table(5),
            insert(5, &[1, 2]),
            WalRecord::NodeDeletion {
                table_id: TableId::new(5),
                node_offset: 0,
                pk: Value::Int64(2),
            },
            WalRecord::Commit,
        ]);
        assert!(matches!(
            recover(&mut wal, &mut checkpointer(), LIMITS),
            Err(CoreError::ReplayLogic { .. })
        ));
    }
}

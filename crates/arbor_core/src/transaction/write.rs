//! Write transactions.

use crate::catalog::{AlterInfo, CatalogSetId, ColumnDef};
use crate::error::{CoreError, CoreResult};
use crate::state::DatabaseState;
use crate::transaction::manager::{TransactionManager, WriterLease};
use crate::types::{ColumnId, Direction, SequenceId, TableId, Timestamp, TransactionId, Visibility};
use crate::undo::UndoBuffer;
use crate::value::Value;
use crate::wal::WalRecord;
use parking_lot::RwLockUpgradableReadGuard;
use tracing::{debug, error, warn};

/// A write transaction.
///
/// Mutations apply to the live state immediately as pending versions that
/// only this transaction sees. [`commit`](Self::commit) logs and publishes
/// them; [`rollback`](Self::rollback), or dropping the transaction, reverts
/// them.
///
/// # Example
///
/// ```rust,ignore
/// let mut txn = db.begin()?;
/// let person = txn.create_node_table("person", columns, "id")?;
/// txn.insert_nodes(person, &rows)?;
/// txn.commit()?;
/// ```
pub struct WriteTransaction<'a> {
    lease: Option<WriterLease<'a>>,
    txid: TransactionId,
    undo: Option<UndoBuffer>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(lease: WriterLease<'a>, txid: TransactionId, undo: UndoBuffer) -> Self {
        Self {
            lease: Some(lease),
            txid,
            undo: Some(undo),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.txid
    }

    /// Number of undo entries recorded so far.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.as_ref().map_or(0, UndoBuffer::len)
    }

    fn lease(&self) -> CoreResult<&WriterLease<'a>> {
        self.lease
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("transaction has finished"))
    }

    fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut DatabaseState, TransactionId, &UndoBuffer) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let manager = self.lease()?.manager();
        let undo = self
            .undo
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("transaction has finished"))?;
        let mut state = manager.state_lock().write();
        f(&mut state, self.txid, undo)
    }

    /// Runs `f` over the state as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once the transaction has finished.
    pub fn read<T>(&self, f: impl FnOnce(&DatabaseState, Visibility) -> T) -> CoreResult<T> {
        let manager = self.lease()?.manager();
        let state = manager.state();
        Ok(f(&state, Visibility::Transaction(self.txid)))
    }

    // ---- DDL ----------------------------------------------------------

    /// Creates a node table keyed by `primary_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the key column is missing.
    pub fn create_node_table(
        &mut self,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: &str,
    ) -> CoreResult<TableId> {
        self.mutate(|state, txid, undo| {
            state.create_node_table(txid, undo, name, columns, primary_key)
        })
    }

    /// Creates a rel table between two node tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or an endpoint table is
    /// missing.
    pub fn create_rel_table(
        &mut self,
        name: &str,
        src_table: &str,
        dst_table: &str,
        columns: Vec<ColumnDef>,
    ) -> CoreResult<TableId> {
        self.mutate(|state, txid, undo| {
            state.create_rel_table(txid, undo, name, src_table, dst_table, columns)
        })
    }

    /// Creates a sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or `increment` is zero.
    pub fn create_sequence(&mut self, name: &str, start: i64, increment: i64) -> CoreResult<SequenceId> {
        self.mutate(|state, txid, undo| state.create_sequence(txid, undo, name, start, increment))
    }

    /// Drops a table by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or still referenced.
    pub fn drop_table(&mut self, name: &str) -> CoreResult<()> {
        self.mutate(|state, txid, undo| state.drop_entry(txid, undo, CatalogSetId::Tables, name))
    }

    /// Drops a sequence by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence is missing.
    pub fn drop_sequence(&mut self, name: &str) -> CoreResult<()> {
        self.mutate(|state, txid, undo| {
            state.drop_entry(txid, undo, CatalogSetId::Sequences, name)
        })
    }

    /// Alters a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or the change does not fit.
    pub fn alter(&mut self, info: AlterInfo) -> CoreResult<()> {
        self.mutate(|state, txid, undo| state.alter(txid, undo, info))
    }

    /// Resolves a table name as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if no such table is visible.
    pub fn table_id(&self, name: &str) -> CoreResult<TableId> {
        self.read(|state, view| {
            state
                .table_by_name(name, view)?
                .table_id()
                .ok_or_else(|| CoreError::entry_not_found(name))
        })?
    }

    // ---- DML ----------------------------------------------------------

    /// Inserts node rows. Returns the offset of the first row.
    ///
    /// # Errors
    ///
    /// Returns an error if a row is malformed or its key is taken.
    pub fn insert_nodes(&mut self, table_id: TableId, rows: &[Vec<Value>]) -> CoreResult<u64> {
        self.mutate(|state, txid, undo| state.insert_rows(txid, undo, table_id, rows, None))
    }

    /// Inserts rels between `(src, dst)` node offsets, with one property
    /// row per rel. Returns the ID of the first rel.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint is not a live node or the shapes
    /// disagree.
    pub fn insert_rels(
        &mut self,
        table_id: TableId,
        endpoints: &[(u64, u64)],
        properties: &[Vec<Value>],
    ) -> CoreResult<u64> {
        if endpoints.len() != properties.len() {
            return Err(CoreError::invalid_operation(format!(
                "{} endpoints but {} property rows",
                endpoints.len(),
                properties.len()
            )));
        }
        self.mutate(|state, txid, undo| {
            state.insert_rows(txid, undo, table_id, properties, Some(endpoints))
        })
    }

    /// Deletes a node with no bound rels.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if rels still reference the node.
    pub fn delete_node(&mut self, table_id: TableId, node_offset: u64) -> CoreResult<()> {
        self.mutate(|state, txid, undo| state.delete_node(txid, undo, table_id, node_offset))
    }

    /// Deletes a node and every rel bound to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not live.
    pub fn detach_delete_node(&mut self, table_id: TableId, node_offset: u64) -> CoreResult<()> {
        self.mutate(|state, txid, undo| {
            state.detach_delete_node(txid, undo, table_id, node_offset)
        })
    }

    /// Deletes one rel.
    ///
    /// # Errors
    ///
    /// Returns an error if the rel is not live.
    pub fn delete_rel(&mut self, table_id: TableId, rel_id: u64) -> CoreResult<()> {
        self.mutate(|state, txid, undo| state.delete_rel(txid, undo, table_id, rel_id))
    }

    /// Deletes the rels bound to `node_offset` at one end. Returns how many
    /// went.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not a rel table.
    pub fn detach_rels(
        &mut self,
        table_id: TableId,
        direction: Direction,
        node_offset: u64,
    ) -> CoreResult<u64> {
        self.mutate(|state, txid, undo| {
            state.detach_rels(txid, undo, table_id, direction, node_offset)
        })
    }

    /// Sets a property value. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not live or the value does not fit.
    pub fn update(
        &mut self,
        table_id: TableId,
        column_id: ColumnId,
        row: u64,
        value: Value,
    ) -> CoreResult<Value> {
        self.mutate(|state, txid, undo| state.update(txid, undo, table_id, column_id, row, value))
    }

    /// Draws `count` values from a sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence is missing.
    pub fn next_values(&mut self, sequence_id: SequenceId, count: u64) -> CoreResult<Vec<i64>> {
        self.mutate(|state, txid, undo| state.next_values(txid, undo, sequence_id, count))
    }

    /// Records an extension load.
    ///
    /// # Errors
    ///
    /// Returns an error if the undo log is full.
    pub fn load_extension(&mut self, path: &str) -> CoreResult<()> {
        self.mutate(|state, txid, undo| state.load_extension(txid, undo, path))
    }

    // ---- reads --------------------------------------------------------

    /// Reads a row, including this transaction's own writes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once the transaction has finished.
    pub fn row(&self, table_id: TableId, row: u64) -> CoreResult<Option<Vec<Value>>> {
        self.read(|state, view| state.table_store(table_id).and_then(|t| t.row(row, view)))
    }

    /// Finds a node by primary key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once the transaction has finished.
    pub fn lookup(&self, table_id: TableId, key: &Value) -> CoreResult<Option<u64>> {
        self.read(|state, view| state.table_store(table_id).and_then(|t| t.lookup(key, view)))
    }

    /// Counts the rows this transaction sees.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once the transaction has finished.
    pub fn count(&self, table_id: TableId) -> CoreResult<u64> {
        self.read(|state, view| state.table_store(table_id).map_or(0, |t| t.count(view)))
    }

    // ---- completion ---------------------------------------------------

    /// Logs the transaction and publishes its changes.
    ///
    /// Returns the commit timestamp. A transaction that changed nothing
    /// writes no WAL records and returns the current last commit timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if logging fails. The transaction is then rolled
    /// back and its partial records are cut from the WAL; if they cannot be
    /// cut, the manager is poisoned. Once the `Commit` record is durable the
    /// commit succeeds.
    pub fn commit(mut self) -> CoreResult<Timestamp> {
        let (Some(lease), Some(undo)) = (self.lease.take(), self.undo.take()) else {
            return Err(CoreError::invalid_operation("transaction has finished"));
        };
        let manager = lease.manager();

        let ts = {
            let state = manager.state_lock().upgradable_read();
            if undo.is_empty() {
                return Ok(state.last_commit_ts());
            }
            let wal = manager.wal();
            let start = wal.size();
            let logged = undo
                .wal_records(&state)
                .and_then(|records| log_transaction(wal, &records));

            let mut state = RwLockUpgradableReadGuard::upgrade(state);
            if let Err(e) = logged {
                if let Err(undo_err) = undo.rollback(&mut state) {
                    warn!(txid = self.txid.as_u64(), error = %undo_err, "rollback after failed commit");
                }
                if let Err(cut) = wal.discard_from(start) {
                    warn!(error = %cut, "failed to discard records of a failed commit");
                    manager.poison("the WAL holds records of a failed commit");
                }
                return Err(e);
            }
            let ts = state.last_commit_ts().next();
            publish(manager, self.txid, undo, ts, &mut state);
            ts
        };

        debug!(txid = self.txid.as_u64(), commit_ts = ts.as_u64(), "transaction committed");
        drop(lease);
        manager.maybe_auto_checkpoint();
        Ok(ts)
    }

    /// Reverts every change the transaction made.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an undo entry no longer matches the
    /// state; every other entry is still reverted.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> CoreResult<()> {
        let Some(undo) = self.undo.take() else {
            return Ok(());
        };
        let Some(lease) = self.lease.as_ref() else {
            return Ok(());
        };
        let mut state = lease.manager().state_lock().write();
        undo.rollback(&mut state)
    }
}

/// Stamps a transaction whose `Commit` record is already durable.
///
/// The commit stands whatever happens here. If an entry cannot be stamped,
/// the live state no longer matches what recovery would rebuild, so the
/// manager is poisoned instead of failing the commit.
fn publish(
    manager: &TransactionManager,
    txid: TransactionId,
    undo: UndoBuffer,
    ts: Timestamp,
    state: &mut DatabaseState,
) {
    if let Err(e) = undo.commit(ts, state) {
        error!(
            txid = txid.as_u64(),
            commit_ts = ts.as_u64(),
            error = %e,
            "durable commit could not be published"
        );
        manager.poison("a durable commit could not be published in memory");
    }
}

fn log_transaction(wal: &crate::wal::Wal, records: &[WalRecord]) -> CoreResult<()> {
    wal.append(&WalRecord::BeginTransaction)?;
    for record in records {
        wal.append(record)?;
    }
    wal.log_commit()?;
    Ok(())
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.rollback_inner() {
            warn!(txid = self.txid.as_u64(), error = %e, "rollback on drop failed");
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("txid", &self.txid)
            .field("undo_entries", &self.undo_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, NodeTableDef};
    use crate::checkpoint::Checkpointer;
    use crate::config::Config;
    use crate::page::{BufferPool, DataFile};
    use crate::shadow::ShadowFile;
    use crate::undo::UndoEntry;
    use crate::value::LogicalType;
    use crate::wal::{Wal, WalReader, WalRecordType};
    use arbor_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Refuses writes while `failing` is set.
    struct Flaky {
        inner: InMemoryBackend,
        failing: Arc<AtomicBool>,
    }

    impl Flaky {
        fn check(&self) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    impl StorageBackend for Flaky {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.check()?;
            self.inner.append(data)
        }
        fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
            self.check()?;
            self.inner.write_at(offset, data)
        }
        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn sync(&mut self) -> StorageResult<()> {
            self.check()?;
            self.inner.sync()
        }
        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    fn manager_on(config: &Config, wal: Box<dyn StorageBackend>) -> TransactionManager {
        let checkpointer = Checkpointer::new(
            DataFile::new(Box::new(InMemoryBackend::new())),
            ShadowFile::new(Box::new(InMemoryBackend::new()), config.max_shadow_pages),
            BufferPool::new(config.buffer_pool_pages),
            config.format_version,
        );
        let wal = Wal::new(wal, config.wal_buffer_size, true).unwrap();
        TransactionManager::new(DatabaseState::new(), wal, checkpointer, config)
    }

    fn manager_with(config: &Config, wal: &InMemoryBackend) -> TransactionManager {
        manager_on(config, Box::new(wal.clone()))
    }

    fn person(txn: &mut WriteTransaction<'_>) -> TableId {
        txn.create_node_table(
            "person",
            vec![
                ColumnDef::new("id", LogicalType::Int64),
                ColumnDef::new("name", LogicalType::String),
            ],
            "id",
        )
        .unwrap()
    }

    fn row(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Int64(id), Value::String(name.to_string())]
    }

    fn record_types(wal: &InMemoryBackend) -> Vec<WalRecordType> {
        WalReader::new(wal)
            .unwrap()
            .map(|r| r.unwrap().1.record_type())
            .collect()
    }

    #[test]
    fn commit_logs_records_between_markers() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let mut txn = tm.begin().unwrap();
        let table = person(&mut txn);
        txn.insert_nodes(table, &[row(1, "ada"), row(2, "bob")]).unwrap();
        let ts = txn.commit().unwrap();

        assert_eq!(ts, Timestamp::new(1));
        assert_eq!(
            record_types(&wal),
            vec![
                WalRecordType::BeginTransaction,
                WalRecordType::CreateCatalogEntry,
                WalRecordType::TableInsertion,
                WalRecordType::Commit,
            ]
        );
        let state = tm.state();
        assert_eq!(state.table_store(table).unwrap().count(Visibility::Committed), 2);
    }

    #[test]
    fn timestamps_advance_per_commit() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let mut txn = tm.begin().unwrap();
        let seq = txn.create_sequence("ids", 10, 5).unwrap();
        assert_eq!(txn.commit().unwrap(), Timestamp::new(1));

        let mut txn = tm.begin().unwrap();
        assert_eq!(txn.next_values(seq, 2).unwrap(), vec![10, 15]);
        assert_eq!(txn.commit().unwrap(), Timestamp::new(2));
        assert_eq!(tm.last_commit_ts(), Timestamp::new(2));
    }

    #[test]
    fn empty_transaction_logs_nothing() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let txn = tm.begin().unwrap();
        assert_eq!(txn.commit().unwrap(), Timestamp::new(0));
        assert_eq!(wal.size().unwrap(), 0);
    }

    #[test]
    fn uncommitted_writes_are_private() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let mut txn = tm.begin().unwrap();
        let table = person(&mut txn);
        txn.insert_nodes(table, &[row(1, "ada")]).unwrap();

        assert_eq!(txn.count(table).unwrap(), 1);
        assert_eq!(txn.lookup(table, &Value::Int64(1)).unwrap(), Some(0));
        assert!(tm.state().table_by_name("person", Visibility::Committed).is_err());
        txn.rollback().unwrap();
    }

    #[test]
    fn rollback_restores_state() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let mut txn = tm.begin().unwrap();
        let table = person(&mut txn);
        txn.insert_nodes(table, &[row(1, "ada")]).unwrap();
        txn.commit().unwrap();
        let before = tm.state().encode_snapshot();
        let wal_size = wal.size().unwrap();

        let mut txn = tm.begin().unwrap();
        txn.insert_nodes(table, &[row(2, "bob")]).unwrap();
        txn.update(table, ColumnId::new(1), 0, Value::String("eve".into()))
            .unwrap();
        txn.delete_node(table, 0).unwrap();
        txn.rollback().unwrap();

        assert_eq!(tm.state().encode_snapshot(), before);
        assert_eq!(wal.size().unwrap(), wal_size);
    }

    #[test]
    fn drop_rolls_back() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        {
            let mut txn = tm.begin().unwrap();
            person(&mut txn);
        }
        assert!(tm.state().table_by_name("person", Visibility::Committed).is_err());
        let mut txn = tm.begin().unwrap();
        assert!(txn.table_id("person").is_err());
        person(&mut txn);
        txn.commit().unwrap();
    }

    #[test]
    fn failed_commit_rolls_back_and_cuts_the_log() {
        let wal = InMemoryBackend::new();
        let failing = Arc::new(AtomicBool::new(false));
        let flaky = Flaky {
            inner: wal.clone(),
            failing: Arc::clone(&failing),
        };
        let tm = manager_on(&Config::default(), Box::new(flaky));
        let mut txn = tm.begin().unwrap();
        person(&mut txn);
        txn.commit().unwrap();
        let size = wal.size().unwrap();

        failing.store(true, Ordering::SeqCst);
        let mut txn = tm.begin().unwrap();
        let table = txn.table_id("person").unwrap();
        txn.insert_nodes(table, &[row(7, "zed")]).unwrap();
        assert!(txn.commit().is_err());
        failing.store(false, Ordering::SeqCst);

        assert_eq!(tm.wal().size(), size);
        assert_eq!(tm.last_commit_ts(), Timestamp::new(1));
        assert_eq!(
            tm.state().table_store(table).unwrap().count(Visibility::Committed),
            0
        );
        // The writer lease was released.
        assert!(tm.try_begin_write().is_some());
    }

    /// Takes appends, refuses to sync or truncate.
    struct NoSync {
        inner: InMemoryBackend,
    }

    impl StorageBackend for NoSync {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }
        fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
            self.inner.write_at(offset, data)
        }
        fn flush(&mut self) -> StorageResult<()> {
            Ok(())
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn sync(&mut self) -> StorageResult<()> {
            Err(StorageError::Io(std::io::Error::other("sync failed")))
        }
        fn truncate(&mut self, _new_size: u64) -> StorageResult<()> {
            Err(StorageError::Io(std::io::Error::other("truncate failed")))
        }
    }

    #[test]
    fn uncut_failed_commit_poisons_the_manager() {
        let wal = InMemoryBackend::new();
        let tm = manager_on(&Config::default(), Box::new(NoSync { inner: wal.clone() }));
        let mut txn = tm.begin().unwrap();
        person(&mut txn);
        assert!(txn.commit().is_err());

        // The failed transaction's records are stuck in the log.
        assert_eq!(record_types(&wal)[0], WalRecordType::BeginTransaction);
        assert!(tm.is_poisoned());
        assert!(tm.begin().is_err());
        assert_eq!(tm.last_commit_ts(), Timestamp::new(0));
    }

    #[test]
    fn unpublishable_commit_still_commits_and_poisons() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let mut txn = tm.begin().unwrap();
        let txid = txn.id();
        let table = person(&mut txn);

        let stale = {
            let mut state = tm.state_lock().write();
            let ghost = CatalogEntry::NodeTable(NodeTableDef {
                id: TableId::new(99),
                name: "ghost".to_string(),
                columns: vec![ColumnDef::new("id", LogicalType::Int64)],
                primary_key: ColumnId::new(0),
            });
            let (_, handle) = state.catalog.create_entry(TransactionId::new(99), ghost).unwrap();
            state.catalog.rollback_version(handle).unwrap();
            handle
        };
        txn.undo
            .as_ref()
            .unwrap()
            .record(UndoEntry::CatalogChange {
                set: CatalogSetId::Tables,
                name: "ghost".to_string(),
                old: None,
                new: stale,
                alter: None,
            })
            .unwrap();
        txn.insert_nodes(table, &[row(1, "ada")]).unwrap();
        let undo = txn.undo.take().unwrap();
        drop(txn);

        {
            let mut state = tm.state_lock().write();
            publish(&tm, txid, undo, Timestamp::new(1), &mut state);
            // Entries after the stale one were still stamped.
            assert_eq!(state.last_commit_ts(), Timestamp::new(1));
            assert_eq!(
                state.table_store(table).unwrap().count(Visibility::Committed),
                1
            );
        }
        assert!(tm.is_poisoned());
        assert!(tm.begin().is_err());
        assert!(tm.checkpoint().is_err());
    }

    #[test]
    fn undo_limit_is_enforced() {
        let wal = InMemoryBackend::new();
        let config = Config::default().undo_block_capacity(256).max_undo_memory(1024);
        let tm = manager_with(&config, &wal);
        let mut txn = tm.begin().unwrap();
        let seq = txn.create_sequence("ids", 0, 1).unwrap();
        let mut result = Ok(Vec::new());
        for _ in 0..256 {
            result = txn.next_values(seq, 1);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(CoreError::AllocationExhausted { .. })));
        txn.rollback().unwrap();
        assert!(tm.state().catalog().committed_entries().is_empty());
    }

    #[test]
    fn rels_need_live_endpoints() {
        let wal = InMemoryBackend::new();
        let tm = manager_with(&Config::default(), &wal);
        let mut txn = tm.begin().unwrap();
        let people = person(&mut txn);
        let knows = txn
            .create_rel_table("knows", "person", "person", vec![])
            .unwrap();
        txn.insert_nodes(people, &[row(1, "ada"), row(2, "bob")]).unwrap();
        txn.insert_rels(knows, &[(0, 1)], &[vec![]]).unwrap();
        assert!(txn.insert_rels(knows, &[(0, 9)], &[vec![]]).is_err());
        assert!(txn.insert_rels(knows, &[(0, 1)], &[]).is_err());
        assert!(matches!(
            txn.delete_node(people, 0),
            Err(CoreError::ConstraintViolation { .. })
        ));
        txn.detach_delete_node(people, 0).unwrap();
        assert_eq!(txn.count(knows).unwrap(), 0);
        txn.commit().unwrap();

        let types = record_types(&wal);
        assert!(types.contains(&WalRecordType::RelDetachDeletion));
        assert!(types.contains(&WalRecordType::NodeDeletion));
    }
}

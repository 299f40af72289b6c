//! Database facade.

use crate::catalog::CatalogEntry;
use crate::checkpoint::{CheckpointStats, Checkpointer};
use crate::config::Config;
#[cfg(feature = "std")]
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::page::{BufferPool, DataFile};
use crate::recovery::{recover, RecoveryReport, ReplayLimits};
use crate::shadow::ShadowFile;
use crate::state::DatabaseState;
use crate::transaction::{TransactionManager, WriteTransaction, WriterLease};
use crate::types::{TableId, Timestamp, Visibility};
use crate::value::Value;
use crate::wal::Wal;
use arbor_storage::{InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
#[cfg(feature = "std")]
use std::path::Path;
use tracing::warn;

/// The main database handle.
///
/// Opening a database runs recovery before anything else, so a `Database`
/// always starts from the last committed state.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use arbor_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
///
/// db.transaction(|txn| {
///     let person = txn.create_node_table("person", columns, "id")?;
///     txn.insert_nodes(person, &rows)?;
///     Ok(())
/// })?;
///
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`:
///
/// ```rust,ignore
/// let db = Database::open_in_memory()?;
/// ```
pub struct Database {
    config: Config,
    /// Holds the directory lock. `None` for databases on caller-supplied
    /// backends.
    #[cfg(feature = "std")]
    dir: Option<DatabaseDir>,
    manager: TransactionManager,
    recovery: RecoveryReport,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database from a directory path.
    ///
    /// The method:
    /// - creates the directory if it doesn't exist
    /// - acquires an exclusive lock to prevent concurrent access
    /// - recovers from the WAL and the shadow file if present
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - another process has the database locked (`DatabaseLocked`)
    /// - the files are damaged beyond the torn tail recovery tolerates
    /// - I/O errors occur
    #[cfg(feature = "std")]
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open), plus `InvalidOperation` if
    /// `error_if_exists` is set and the database exists.
    #[cfg(feature = "std")]
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if config.error_if_exists && !dir.is_new_database() {
            return Err(CoreError::invalid_operation(format!(
                "database already exists: {}",
                path.display()
            )));
        }
        let files = dir.open_files()?;
        let mut db = Self::open_with_backends(
            config,
            Box::new(files.data),
            Box::new(files.wal),
            Box::new(files.shadow),
        )?;
        db.dir = Some(dir);
        Ok(db)
    }

    /// Opens a database on caller-supplied backends.
    ///
    /// This is how tests put a database on simulated disks.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery fails.
    pub fn open_with_backends(
        config: Config,
        data: Box<dyn StorageBackend>,
        mut wal: Box<dyn StorageBackend>,
        shadow: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let mut checkpointer = Checkpointer::new(
            DataFile::new(data),
            ShadowFile::new(shadow, config.max_shadow_pages),
            BufferPool::new(config.buffer_pool_pages),
            config.format_version,
        );
        let limits = ReplayLimits {
            block_capacity: config.undo_block_capacity,
            memory_limit: config.max_undo_memory,
        };
        let (state, recovery) = recover(wal.as_mut(), &mut checkpointer, limits)?;

        let wal = Wal::new(wal, config.wal_buffer_size, config.sync_on_commit)?;
        let manager = TransactionManager::new(state, wal, checkpointer, &config);
        Ok(Self {
            config,
            #[cfg(feature = "std")]
            dir: None,
            manager,
            recovery,
            is_open: RwLock::new(true),
        })
    }

    /// Opens an empty database held in memory.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature matches the other openers.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Directory the database lives in, if it was opened from a path.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// What recovery did when this database was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// The transaction manager.
    #[must_use]
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    // ---- transactions -------------------------------------------------

    /// Begins a write transaction, waiting for the writer lease.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close), or
    /// `InvalidOperation` if an interrupted checkpoint requires a reopen.
    pub fn begin(&self) -> CoreResult<WriteTransaction<'_>> {
        self.ensure_open()?;
        self.manager.begin()
    }

    /// Acquires the writer lease, waiting while another writer holds it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn begin_write(&self) -> CoreResult<WriterLease<'_>> {
        self.ensure_open()?;
        Ok(self.manager.begin_write())
    }

    /// Acquires the writer lease if no other writer holds it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn try_begin_write(&self) -> CoreResult<Option<WriterLease<'_>>> {
        self.ensure_open()?;
        Ok(self.manager.try_begin_write())
    }

    /// Runs `f` in a write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back if it
    /// returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or from beginning or committing.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Writes the committed state to the data file and empties the WAL.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close), or the
    /// checkpoint's error.
    pub fn checkpoint(&self) -> CoreResult<CheckpointStats> {
        self.ensure_open()?;
        self.manager.checkpoint()
    }

    // ---- reads --------------------------------------------------------

    /// Runs `f` over the committed state.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn read<T>(&self, f: impl FnOnce(&DatabaseState) -> T) -> CoreResult<T> {
        self.ensure_open()?;
        Ok(f(&self.manager.state()))
    }

    /// Resolves a committed table name.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if no such table is committed.
    pub fn table_id(&self, name: &str) -> CoreResult<TableId> {
        self.read(|state| {
            state
                .table_by_name(name, Visibility::Committed)?
                .table_id()
                .ok_or_else(|| CoreError::entry_not_found(name))
        })?
    }

    /// Committed catalog entries.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn catalog_entries(&self) -> CoreResult<Vec<CatalogEntry>> {
        self.read(|state| state.catalog().committed_entries())
    }

    /// Reads a committed row.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn row(&self, table_id: TableId, row: u64) -> CoreResult<Option<Vec<Value>>> {
        self.read(|state| {
            state
                .table_store(table_id)
                .and_then(|t| t.row(row, Visibility::Committed))
        })
    }

    /// Finds a committed node by primary key.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn lookup(&self, table_id: TableId, key: &Value) -> CoreResult<Option<u64>> {
        self.read(|state| {
            state
                .table_store(table_id)
                .and_then(|t| t.lookup(key, Visibility::Committed))
        })
    }

    /// Counts committed rows.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn count(&self, table_id: TableId) -> CoreResult<u64> {
        self.read(|state| {
            state
                .table_store(table_id)
                .map_or(0, |t| t.count(Visibility::Committed))
        })
    }

    /// Timestamp of the last committed transaction.
    #[must_use]
    pub fn last_commit_ts(&self) -> Timestamp {
        self.manager.last_commit_ts()
    }

    /// Current WAL size in bytes.
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.manager.wal().size()
    }

    // ---- lifecycle ----------------------------------------------------

    /// Closes the database, flushing the WAL.
    ///
    /// Further calls fail with `DatabaseClosed`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.manager.wal().flush()?;
        *is_open = false;
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("recovery", &self.recovery.outcome)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::recovery::RecoveryOutcome;
    use crate::value::LogicalType;
    use tempfile::tempdir;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", LogicalType::Int64),
            ColumnDef::new("name", LogicalType::String),
        ]
    }

    fn person(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Int64(id), Value::String(name.to_string())]
    }

    struct Backends {
        data: InMemoryBackend,
        wal: InMemoryBackend,
        shadow: InMemoryBackend,
    }

    impl Backends {
        fn new() -> Self {
            Self {
                data: InMemoryBackend::new(),
                wal: InMemoryBackend::new(),
                shadow: InMemoryBackend::new(),
            }
        }

        fn open(&self, config: Config) -> Database {
            Database::open_with_backends(
                config,
                Box::new(self.data.clone()),
                Box::new(self.wal.clone()),
                Box::new(self.shadow.clone()),
            )
            .unwrap()
        }
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
        assert_eq!(db.recovery_report().outcome, RecoveryOutcome::Clean);
        assert_eq!(db.last_commit_ts(), Timestamp::new(0));
    }

    #[test]
    fn transaction_helper_commits() {
        let db = Database::open_in_memory().unwrap();
        let table = db
            .transaction(|txn| {
                let table = txn.create_node_table("person", columns(), "id")?;
                txn.insert_nodes(table, &[person(1, "ada")])?;
                Ok(table)
            })
            .unwrap();

        assert_eq!(db.table_id("person").unwrap(), table);
        assert_eq!(db.lookup(table, &Value::Int64(1)).unwrap(), Some(0));
        assert_eq!(db.row(table, 0).unwrap(), Some(person(1, "ada")));
    }

    #[test]
    fn transaction_helper_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: CoreResult<()> = db.transaction(|txn| {
            txn.create_node_table("person", columns(), "id")?;
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert!(db.table_id("person").is_err());
        assert_eq!(db.wal_size(), 0);
    }

    #[test]
    fn committed_data_survives_reopen() {
        let files = Backends::new();
        {
            let db = files.open(Config::default());
            db.transaction(|txn| {
                let table = txn.create_node_table("person", columns(), "id")?;
                txn.insert_nodes(table, &[person(1, "ada"), person(2, "bob")])
            })
            .unwrap();
        }

        let db = files.open(Config::default());
        assert!(matches!(
            db.recovery_report().outcome,
            RecoveryOutcome::WalReplayed { transactions: 1, .. }
        ));
        let table = db.table_id("person").unwrap();
        assert_eq!(db.count(table).unwrap(), 2);
        assert_eq!(db.last_commit_ts(), Timestamp::new(1));
    }

    #[test]
    fn checkpointed_data_survives_reopen() {
        let files = Backends::new();
        {
            let db = files.open(Config::default());
            db.transaction(|txn| {
                let table = txn.create_node_table("person", columns(), "id")?;
                txn.insert_nodes(table, &[person(1, "ada")])
            })
            .unwrap();
            db.checkpoint().unwrap();
            assert_eq!(db.wal_size(), 0);
        }

        let db = files.open(Config::default());
        assert_eq!(db.recovery_report().outcome, RecoveryOutcome::Clean);
        let table = db.table_id("person").unwrap();
        assert_eq!(db.row(table, 0).unwrap(), Some(person(1, "ada")));
    }

    #[test]
    fn closed_database_refuses_work() {
        let db = Database::open_in_memory().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.checkpoint(), Err(CoreError::DatabaseClosed)));
        db.close().unwrap();
    }

    #[test]
    fn writer_exclusivity() {
        let db = Database::open_in_memory().unwrap();
        let lease = db.begin_write().unwrap();
        assert!(db.try_begin_write().unwrap().is_none());
        drop(lease);
        assert!(db.try_begin_write().unwrap().is_some());
    }

    #[test]
    fn open_from_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("graph");
        {
            let db = Database::open(&path).unwrap();
            assert_eq!(db.path(), Some(path.as_path()));
            db.transaction(|txn| txn.create_sequence("ids", 1, 1).map(|_| ()))
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.catalog_entries().unwrap().len(), 1);
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("graph");
        let _db = Database::open(&path).unwrap();
        assert!(matches!(
            Database::open(&path),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn error_if_exists() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("graph");
        drop(Database::open(&path).unwrap());
        let config = Config::default().error_if_exists(true);
        assert!(Database::open_with_config(&path, config).is_err());
    }
}

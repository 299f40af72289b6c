//! Transaction manager.

use crate::checkpoint::{CheckpointStats, Checkpointer};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::state::DatabaseState;
use crate::transaction::write::WriteTransaction;
use crate::types::{Timestamp, TransactionId};
use crate::undo::UndoBuffer;
use crate::wal::Wal;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

/// Proof of exclusive write access.
///
/// Obtained from [`TransactionManager::begin_write`]; the writer mutex is
/// released when the lease is dropped.
pub struct WriterLease<'a> {
    manager: &'a TransactionManager,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriterLease<'a> {
    /// The manager that granted the lease.
    pub fn manager(&self) -> &'a TransactionManager {
        self.manager
    }

    /// Starts a write transaction under this lease.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once the manager is poisoned; the
    /// database must be reopened.
    pub fn begin(self) -> CoreResult<WriteTransaction<'a>> {
        self.manager.check_poison()?;
        let txid = TransactionId::new(self.manager.next_txid.fetch_add(1, Ordering::SeqCst));
        let undo = UndoBuffer::new(self.manager.undo_block_capacity, self.manager.max_undo_memory);
        Ok(WriteTransaction::new(self, txid, undo))
    }
}

impl std::fmt::Debug for WriterLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLease").finish_non_exhaustive()
    }
}

/// Owns the live state and everything a commit or checkpoint touches.
///
/// ## Single-Writer Guarantee
///
/// Writers must hold a [`WriterLease`]. Readers take the state's read lock
/// and see committed versions only, so they never wait for a writer's
/// transaction, only for an individual mutation.
pub struct TransactionManager {
    state: RwLock<DatabaseState>,
    wal: Wal,
    checkpointer: Mutex<Checkpointer>,
    write_lock: Mutex<()>,
    next_txid: AtomicU64,
    /// Why writes are refused until the database is reopened.
    poison: Mutex<Option<String>>,
    undo_block_capacity: usize,
    max_undo_memory: usize,
    auto_checkpoint: bool,
    checkpoint_threshold: u64,
}

impl TransactionManager {
    /// Creates a manager over recovered state.
    pub fn new(state: DatabaseState, wal: Wal, checkpointer: Checkpointer, config: &Config) -> Self {
        Self {
            state: RwLock::new(state),
            wal,
            checkpointer: Mutex::new(checkpointer),
            write_lock: Mutex::new(()),
            next_txid: AtomicU64::new(1),
            poison: Mutex::new(None),
            undo_block_capacity: config.undo_block_capacity,
            max_undo_memory: config.max_undo_memory,
            auto_checkpoint: config.auto_checkpoint,
            checkpoint_threshold: config.checkpoint_threshold,
        }
    }

    /// Acquires the writer lease, blocking while another writer holds it.
    pub fn begin_write(&self) -> WriterLease<'_> {
        WriterLease {
            manager: self,
            _guard: self.write_lock.lock(),
        }
    }

    /// Acquires the writer lease if it is free.
    pub fn try_begin_write(&self) -> Option<WriterLease<'_>> {
        self.write_lock.try_lock().map(|guard| WriterLease {
            manager: self,
            _guard: guard,
        })
    }

    /// Acquires the writer lease and starts a transaction under it.
    ///
    /// # Errors
    ///
    /// See [`WriterLease::begin`].
    pub fn begin(&self) -> CoreResult<WriteTransaction<'_>> {
        self.begin_write().begin()
    }

    /// Read access to the live state.
    pub fn state(&self) -> RwLockReadGuard<'_, DatabaseState> {
        self.state.read()
    }

    pub(crate) fn state_lock(&self) -> &RwLock<DatabaseState> {
        &self.state
    }

    /// The WAL.
    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    /// Timestamp of the last committed transaction.
    #[must_use]
    pub fn last_commit_ts(&self) -> Timestamp {
        self.state.read().last_commit_ts()
    }

    /// Whether writes are blocked until the database is reopened.
    ///
    /// That happens when the files no longer match the live state: a
    /// checkpoint logged but not applied, a failed commit whose records
    /// could not be cut from the WAL, or a durable commit that could not be
    /// published in memory.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poison.lock().is_some()
    }

    /// Why the manager is poisoned, if it is.
    #[must_use]
    pub fn poison_reason(&self) -> Option<String> {
        self.poison.lock().clone()
    }

    /// Blocks new transactions and checkpoints. The first reason sticks.
    pub(crate) fn poison(&self, reason: &str) {
        let mut poison = self.poison.lock();
        if poison.is_none() {
            error!(reason, "refusing further writes until the database is reopened");
            *poison = Some(reason.to_string());
        }
    }

    fn check_poison(&self) -> CoreResult<()> {
        match &*self.poison.lock() {
            Some(reason) => Err(CoreError::invalid_operation(format!(
                "{reason}; reopen the database to recover"
            ))),
            None => Ok(()),
        }
    }

    /// Runs `f` with the paged files locked.
    pub fn with_checkpointer<T>(&self, f: impl FnOnce(&Checkpointer) -> T) -> T {
        f(&self.checkpointer.lock())
    }

    /// Checkpoints, waiting for the writer lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails; see
    /// [`Checkpointer::checkpoint`].
    pub fn checkpoint(&self) -> CoreResult<CheckpointStats> {
        let lease = self.begin_write();
        self.checkpoint_with(&lease)
    }

    /// Checkpoints under a lease the caller already holds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a lease from another manager or a
    /// poisoned manager, or the checkpoint's error.
    pub fn checkpoint_with(&self, lease: &WriterLease<'_>) -> CoreResult<CheckpointStats> {
        if !std::ptr::eq(lease.manager, self) {
            return Err(CoreError::invalid_operation(
                "writer lease belongs to another database",
            ));
        }
        // A poisoned state must not reach the data file.
        self.check_poison()?;
        let state = self.state.read();
        let mut checkpointer = self.checkpointer.lock();
        let result = checkpointer.checkpoint(&state, &self.wal);
        if checkpointer.is_incomplete() {
            self.poison("a checkpoint was logged but not applied");
        }
        result
    }

    /// Checkpoints if the WAL has outgrown the configured threshold and no
    /// writer is active. Failures are logged, not returned: the commit that
    /// triggered this has already succeeded.
    pub(crate) fn maybe_auto_checkpoint(&self) {
        if !self.auto_checkpoint
            || self.is_poisoned()
            || self.wal.size() <= self.checkpoint_threshold
        {
            return;
        }
        let Some(lease) = self.try_begin_write() else {
            return;
        };
        if let Err(e) = self.checkpoint_with(&lease) {
            warn!(error = %e, "automatic checkpoint failed");
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("last_commit_ts", &self.last_commit_ts())
            .field("wal", &self.wal)
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{BufferPool, DataFile};
    use crate::shadow::ShadowFile;
    use arbor_storage::InMemoryBackend;

    fn manager(config: &Config) -> TransactionManager {
        let checkpointer = Checkpointer::new(
            DataFile::new(Box::new(InMemoryBackend::new())),
            ShadowFile::new(Box::new(InMemoryBackend::new()), config.max_shadow_pages),
            BufferPool::new(config.buffer_pool_pages),
            config.format_version,
        );
        let wal = Wal::new(Box::new(InMemoryBackend::new()), 1024, true).unwrap();
        TransactionManager::new(DatabaseState::new(), wal, checkpointer, config)
    }

    #[test]
    fn only_one_writer_at_a_time() {
        let tm = manager(&Config::default());
        let lease = tm.begin_write();
        assert!(tm.try_begin_write().is_none());
        drop(lease);
        assert!(tm.try_begin_write().is_some());
    }

    #[test]
    fn transaction_holds_the_lease() {
        let tm = manager(&Config::default());
        let txn = tm.begin().unwrap();
        assert!(tm.try_begin_write().is_none());
        txn.rollback().unwrap();
        assert!(tm.try_begin_write().is_some());
    }

    #[test]
    fn transaction_ids_increase() {
        let tm = manager(&Config::default());
        let first = tm.begin().unwrap();
        let a = first.id();
        drop(first);
        let b = tm.begin().unwrap().id();
        assert!(b > a);
    }

    #[test]
    fn foreign_lease_is_refused() {
        let config = Config::default();
        let a = manager(&config);
        let b = manager(&config);
        let lease = b.begin_write();
        assert!(a.checkpoint_with(&lease).is_err());
    }

    #[test]
    fn checkpoint_empties_the_wal() {
        let tm = manager(&Config::default());
        let mut txn = tm.begin().unwrap();
        txn.create_sequence("ids", 1, 1).unwrap();
        txn.commit().unwrap();
        assert!(tm.wal().size() > 0);

        let stats = tm.checkpoint().unwrap();
        assert_eq!(stats.checkpoint_ts, Timestamp::new(1));
        assert_eq!(tm.wal().size(), 0);
    }

    #[test]
    fn poison_blocks_transactions_and_checkpoints() {
        let tm = manager(&Config::default());
        tm.poison("the WAL holds records of a failed commit");
        tm.poison("a later reason");
        assert!(tm.is_poisoned());
        assert_eq!(
            tm.poison_reason().as_deref(),
            Some("the WAL holds records of a failed commit")
        );
        let Err(err) = tm.begin() else {
            panic!("a poisoned manager began a transaction");
        };
        assert!(err.to_string().contains("reopen the database"));
        assert!(matches!(tm.checkpoint(), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn auto_checkpoint_runs_past_threshold() {
        let config = Config::default().checkpoint_threshold(1);
        let tm = manager(&config);
        let mut txn = tm.begin().unwrap();
        txn.create_sequence("ids", 1, 1).unwrap();
        txn.commit().unwrap();
        assert_eq!(tm.wal().size(), 0);
        assert!(tm.with_checkpointer(|c| c.data().size().unwrap()) > 0);
    }
}

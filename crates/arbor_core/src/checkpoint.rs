//! Checkpointing.
//!
//! A checkpoint writes the committed state as a fresh data file image:
//!
//! 1. serialize the state and cut it into pages;
//! 2. stage every page that differs from the data file in the shadow file;
//! 3. flush the shadow file;
//! 4. log and flush the WAL `Checkpoint` record (the commit point);
//! 5. copy the staged pages home;
//! 6. clear the WAL and the shadow file.
//!
//! Steps 5 and 6 are redone by recovery if they are interrupted.

use crate::error::{CoreError, CoreResult};
use crate::page::{checkpoint_image, BufferPool, DataFile, PageStore};
use crate::shadow::ShadowFile;
use crate::state::DatabaseState;
use crate::types::{FileId, PageIdx, Timestamp};
use crate::wal::Wal;
use tracing::{info, warn};

/// Outcome of a completed checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Commit timestamp the image reflects.
    pub checkpoint_ts: Timestamp,
    /// Pages in the new image, header included.
    pub total_pages: usize,
    /// Pages that differed and went through the shadow file.
    pub staged_pages: usize,
    /// Snapshot size in bytes.
    pub snapshot_bytes: usize,
}

/// Owns the paged files: the data file, the shadow file and the buffer
/// pool in front of the data file.
#[derive(Debug)]
pub struct Checkpointer {
    data: DataFile,
    shadow: ShadowFile,
    pool: BufferPool,
    format_version: (u16, u16),
    /// Set once a `Checkpoint` record is durable but the pages were not
    /// fully applied. Only recovery can finish the job.
    incomplete: bool,
}

impl Checkpointer {
    /// Creates a checkpointer over the given files.
    pub fn new(
        data: DataFile,
        shadow: ShadowFile,
        pool: BufferPool,
        format_version: (u16, u16),
    ) -> Self {
        Self {
            data,
            shadow,
            pool,
            format_version,
            incomplete: false,
        }
    }

    /// The data file.
    pub fn data(&self) -> &DataFile {
        &self.data
    }

    /// The shadow file.
    pub fn shadow(&self) -> &ShadowFile {
        &self.shadow
    }

    /// The buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Whether a checkpoint was logged but not applied.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// Loads the checkpointed state from the data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is damaged.
    pub fn load_state(&self) -> CoreResult<DatabaseState> {
        self.data.load_state(self.format_version.0)
    }

    /// Applies a shadow file left behind by an interrupted checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the shadow file is unreadable or the copy fails.
    pub fn replay_shadow(&mut self) -> CoreResult<usize> {
        ShadowFile::replay_shadow_page_records(self.shadow.backend(), &mut self.data, &self.pool)
    }

    /// Drops any staged pages and truncates the shadow file.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn discard_shadow(&mut self) -> CoreResult<()> {
        self.shadow.clear()
    }

    /// Writes `state` as the new checkpoint image and empties the WAL.
    ///
    /// The caller must hold the writer lease, so `state` has no pending
    /// versions.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. Before the `Checkpoint` record is
    /// durable the shadow file is discarded and nothing changes; after it,
    /// the checkpointer refuses further work until recovery runs.
    pub fn checkpoint(&mut self, state: &DatabaseState, wal: &Wal) -> CoreResult<CheckpointStats> {
        if self.incomplete {
            return Err(CoreError::invalid_operation(
                "an earlier checkpoint was not applied; reopen the database to finish it",
            ));
        }

        let snapshot = state.encode_snapshot();
        let checkpoint_ts = state.last_commit_ts();
        let pages = checkpoint_image(&snapshot, checkpoint_ts, self.format_version);

        let wal_end = wal.size();
        let staged = match self.stage_and_log(&pages, wal) {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(cleanup) = self.shadow.clear() {
                    warn!(error = %cleanup, "failed to discard shadow pages");
                }
                if let Err(cleanup) = wal.discard_from(wal_end) {
                    warn!(error = %cleanup, "failed to discard partial checkpoint record");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.apply_and_clear(wal) {
            self.incomplete = true;
            return Err(e);
        }

        let stats = CheckpointStats {
            checkpoint_ts,
            total_pages: pages.len(),
            staged_pages: staged,
            snapshot_bytes: snapshot.len(),
        };
        info!(
            checkpoint_ts = checkpoint_ts.as_u64(),
            staged_pages = stats.staged_pages,
            total_pages = stats.total_pages,
            "checkpoint complete"
        );
        Ok(stats)
    }

    fn stage_and_log(&mut self, pages: &[Vec<u8>], wal: &Wal) -> CoreResult<usize> {
        let mut staged = 0;
        for (idx, page) in pages.iter().enumerate() {
            let idx = PageIdx::try_from(idx)
                .map_err(|_| CoreError::invalid_operation("checkpoint image too large"))?;
            let current = self.pool.read_page(&self.data, FileId::DATA, idx)?;
            if current == *page {
                continue;
            }
            let slot = self.shadow.stage(FileId::DATA, idx)?;
            self.shadow.write_page(slot, page)?;
            staged += 1;
        }
        self.shadow.flush_all()?;
        wal.log_and_flush_checkpoint()?;
        Ok(staged)
    }

    fn apply_and_clear(&mut self, wal: &Wal) -> CoreResult<()> {
        self.shadow.apply(&mut self.data, &self.pool)?;
        wal.clear()?;
        self.shadow.clear()
    }

    /// Reads a page through the buffer pool.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn read_page(&self, page: PageIdx) -> CoreResult<Vec<u8>> {
        self.pool.read_page(&self.data, FileId::DATA, page)
    }

    /// Syncs the data file.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.data.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::page::PAGE_SIZE;
    use crate::types::TransactionId;
    use crate::undo::UndoBuffer;
    use crate::value::{LogicalType, Value};
    use arbor_storage::{InMemoryBackend, StorageBackend};

    struct Files {
        data: InMemoryBackend,
        shadow: InMemoryBackend,
        wal: InMemoryBackend,
    }

    fn setup() -> (Checkpointer, Wal, Files) {
        let files = Files {
            data: InMemoryBackend::new(),
            shadow: InMemoryBackend::new(),
            wal: InMemoryBackend::new(),
        };
        let checkpointer = Checkpointer::new(
            DataFile::new(Box::new(files.data.clone())),
            ShadowFile::new(Box::new(files.shadow.clone()), 64),
            BufferPool::new(8),
            (1, 0),
        );
        let wal = Wal::new(Box::new(files.wal.clone()), 1024, true).unwrap();
        (checkpointer, wal, files)
    }

    fn populated() -> DatabaseState {
        let mut state = DatabaseState::new();
        let undo = UndoBuffer::new(4096, 1 << 20);
        let txid = TransactionId::new(1);
        let table = state
            .create_node_table(
                txid,
                &undo,
                "person",
                vec![ColumnDef::new("id", LogicalType::Int64)],
                "id",
            )
            .unwrap();
        let rows: Vec<Vec<Value>> = (0..10).map(|i| vec![Value::Int64(i)]).collect();
        state.insert_rows(txid, &undo, table, &rows, None).unwrap();
        undo.commit(Timestamp::new(1), &mut state).unwrap();
        state
    }

    #[test]
    fn checkpoint_writes_image_and_clears_logs() {
        let (mut checkpointer, wal, files) = setup();
        wal.append(&crate::wal::WalRecord::BeginTransaction).unwrap();
        wal.flush().unwrap();

        let state = populated();
        let stats = checkpointer.checkpoint(&state, &wal).unwrap();
        assert_eq!(stats.checkpoint_ts, Timestamp::new(1));
        assert_eq!(stats.staged_pages, stats.total_pages);

        assert_eq!(files.wal.size().unwrap(), 0);
        assert_eq!(files.shadow.size().unwrap(), PAGE_SIZE as u64);
        let loaded = checkpointer.load_state().unwrap();
        assert_eq!(loaded.encode_snapshot(), state.encode_snapshot());
        assert!(files.data.size().unwrap() > 0);
    }

    #[test]
    fn unchanged_pages_are_not_staged() {
        let (mut checkpointer, wal, _files) = setup();
        let state = populated();
        checkpointer.checkpoint(&state, &wal).unwrap();
        let again = checkpointer.checkpoint(&state, &wal).unwrap();
        assert_eq!(again.staged_pages, 0);
    }

    #[test]
    fn empty_data_file_loads_empty_state() {
        let (checkpointer, _wal, _files) = setup();
        let state = checkpointer.load_state().unwrap();
        assert_eq!(state.last_commit_ts(), Timestamp::new(0));
        assert!(state.catalog().committed_entries().is_empty());
    }

    #[test]
    fn shadow_limit_leaves_data_untouched() {
        let files = Files {
            data: InMemoryBackend::new(),
            shadow: InMemoryBackend::new(),
            wal: InMemoryBackend::new(),
        };
        let mut checkpointer = Checkpointer::new(
            DataFile::new(Box::new(files.data.clone())),
            ShadowFile::new(Box::new(files.shadow.clone()), 1),
            BufferPool::new(8),
            (1, 0),
        );
        let wal = Wal::new(Box::new(files.wal.clone()), 1024, true).unwrap();

        let result = checkpointer.checkpoint(&populated(), &wal);
        assert!(matches!(result, Err(CoreError::AllocationExhausted { .. })));
        assert_eq!(files.data.size().unwrap(), 0);
        assert_eq!(files.wal.size().unwrap(), 0);
        assert!(!checkpointer.is_incomplete());
    }
}

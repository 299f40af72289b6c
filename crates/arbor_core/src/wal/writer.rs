//! WAL writer.

use crate::checksum::ChecksumWriter;
use crate::error::CoreResult;
use crate::wal::reader::WalReader;
use crate::wal::record::WalRecord;
use arbor_storage::StorageBackend;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

struct WalInner {
    backend: Box<dyn StorageBackend>,
    writer: ChecksumWriter,
    /// Bytes handed to the backend.
    written: u64,
    /// Bytes known to be synced.
    durable: u64,
}

impl WalInner {
    fn spill(&mut self) -> CoreResult<()> {
        if self.writer.pending_len() > 0 {
            let bytes = self.writer.take_pending();
            self.backend.append(&bytes)?;
            self.written += bytes.len() as u64;
        }
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.spill()?;
        self.backend.flush()?;
        self.backend.sync()?;
        self.durable = self.written;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.written + self.writer.pending_len() as u64
    }
}

/// The write-ahead log.
///
/// Record framing and the pending buffer sit behind one mutex, so records
/// from concurrent callers never interleave.
pub struct Wal {
    inner: Mutex<WalInner>,
    buffer_size: usize,
    sync_on_commit: bool,
}

impl Wal {
    /// Opens a WAL on `backend`, appending after any bytes it holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn new(
        backend: Box<dyn StorageBackend>,
        buffer_size: usize,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            inner: Mutex::new(WalInner {
                backend,
                writer: ChecksumWriter::new(),
                written: size,
                durable: size,
            }),
            buffer_size,
            sync_on_commit,
        })
    }

    /// Frames a record into the pending buffer, spilling the buffer to the
    /// backend once it reaches the configured size.
    ///
    /// Returns the logical offset of the record.
    ///
    /// # Errors
    ///
    /// Returns an error if spilling fails.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let mut inner = self.inner.lock();
        let offset = inner.size();
        inner.writer.write_entry(|s| s.write(record))?;
        if inner.writer.pending_len() >= self.buffer_size {
            inner.spill()?;
        }
        Ok(offset)
    }

    /// Writes pending bytes and syncs the backend.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn flush(&self) -> CoreResult<()> {
        self.inner.lock().sync()
    }

    /// Makes the current transaction durable.
    ///
    /// Outstanding data records are written first, then the `Commit` record
    /// follows them. With `sync_on_commit` off the bytes still reach the
    /// backend but are not synced.
    ///
    /// Returns the offset just past the `Commit` record.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; the transaction is then not durable.
    pub fn log_commit(&self) -> CoreResult<u64> {
        let mut inner = self.inner.lock();
        if self.sync_on_commit {
            inner.sync()?;
        } else {
            inner.spill()?;
        }
        inner.writer.write_entry(|s| s.write(&WalRecord::Commit))?;
        if self.sync_on_commit {
            inner.sync()?;
        } else {
            inner.spill()?;
            inner.backend.flush()?;
        }
        Ok(inner.written)
    }

    /// Appends the `Checkpoint` record and syncs.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; the checkpoint has then not
    /// happened.
    pub fn log_and_flush_checkpoint(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .writer
            .write_entry(|s| s.write(&WalRecord::Checkpoint))?;
        inner.sync()
    }

    /// Drops everything: pending bytes and the file contents.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn clear(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.writer.discard();
        inner.backend.truncate(0)?;
        inner.backend.sync()?;
        inner.written = 0;
        inner.durable = 0;
        Ok(())
    }

    /// Cuts the log back to `offset`, dropping records a failed commit
    /// left behind.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn discard_from(&self, offset: u64) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if offset >= inner.written {
            let keep = (offset - inner.written) as usize;
            let mut pending = inner.writer.take_pending();
            pending.truncate(keep);
            inner.writer.discard();
            if !pending.is_empty() {
                inner.backend.append(&pending)?;
                inner.written += pending.len() as u64;
            }
        } else {
            inner.writer.discard();
            inner.backend.truncate(offset)?;
            inner.written = offset;
            inner.durable = inner.durable.min(offset);
        }
        Ok(())
    }

    /// Logical size, including bytes not yet written.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.lock().size()
    }

    /// Bytes known to be synced.
    #[must_use]
    pub fn durable_size(&self) -> u64 {
        self.inner.lock().durable
    }

    /// Reads the records on the backend, holding the WAL lock until the
    /// reader is dropped. Pending bytes are written first.
    ///
    /// # Errors
    ///
    /// Returns an error if pending bytes cannot be written.
    pub fn iter(&self) -> CoreResult<WalReader<MappedMutexGuard<'_, dyn StorageBackend>>> {
        let mut inner = self.inner.lock();
        inner.spill()?;
        let backend = MutexGuard::map(inner, |inner| &mut *inner.backend);
        WalReader::new(backend)
    }

    /// Reads all records into memory.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        self.iter()?.collect()
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("size", &self.size())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for Arbor.
///
/// Storage backends are **opaque byte stores**. Arbor owns all file format
/// interpretation; backends do not understand WAL records, shadow pages or
/// checkpoint images.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `write_at` overwrites in place and may extend the storage, but never
///   leaves a gap
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, everything written so far survives a crash
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Writes `data` at `offset`, overwriting existing bytes.
    ///
    /// `offset` may equal the current size, in which case this behaves like
    /// `append`. Page files (data file, shadow file) use this to rewrite
    /// pages in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WriteGap`] if `offset` is past the end,
    /// or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to clear the WAL after a checkpoint and to cut torn tails.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

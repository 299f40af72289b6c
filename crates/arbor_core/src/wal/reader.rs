//! Streaming WAL reader.

use crate::checksum::{BufferedFileReader, ChecksumReader};
use crate::error::CoreResult;
use crate::serializer::{Deserializer, Reader};
use crate::wal::record::{WalRecord, WalRecordType};
use arbor_storage::StorageBackend;
use std::ops::Deref;

/// A decoded record and where it sits in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    /// Offset of the record's first byte.
    pub offset: u64,
    /// Offset just past the record's checksum.
    pub end_offset: u64,
    /// The record.
    pub record: WalRecord,
}

/// Reads WAL records one at a time with constant memory.
///
/// Every record is decoded inside a checksum entry, so a record whose bytes
/// were garbled fails with `ChecksumMismatch` once its trailer is reached,
/// and a record cut off by the end of the file fails with `TornWrite`.
/// Deciding whether such a failure is a tolerable tail is up to the caller
/// (see [`find_valid_record`]).
pub struct WalReader<B>
where
    B: Deref,
    B::Target: StorageBackend,
{
    de: Deserializer<ChecksumReader<BufferedFileReader<B>>>,
    failed: bool,
}

impl<B> WalReader<B>
where
    B: Deref,
    B::Target: StorageBackend,
{
    /// Creates a reader positioned at the start of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn new(backend: B) -> CoreResult<Self> {
        Self::at(backend, 0)
    }

    /// Creates a reader positioned at `offset`, which should be a record
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn at(backend: B, offset: u64) -> CoreResult<Self> {
        let file = BufferedFileReader::new(backend, offset)?;
        Ok(Self {
            de: Deserializer::new(ChecksumReader::new(file)),
            failed: false,
        })
    }

    /// Size of the log when the reader was created.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.de.reader().inner().total_size()
    }

    /// Offset of the next byte to read.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.de.reader().offset()
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.de.is_finished()
    }

    /// The backend being read.
    pub fn backend(&self) -> &B::Target {
        self.de.reader().inner().backend()
    }

    /// Decodes the next record, or returns `None` at the end of the log.
    ///
    /// # Errors
    ///
    /// - `TornWrite` if the log ends inside the record
    /// - `ChecksumMismatch` if the record's trailer does not match
    /// - `WalCorruption` / `InvalidFormat` if the bytes do not decode
    /// - I/O errors
    pub fn next_entry(&mut self) -> CoreResult<Option<WalEntry>> {
        if self.de.is_finished() {
            return Ok(None);
        }
        let offset = self.offset();
        self.de.reader_mut().start_entry();
        let record: WalRecord = self.de.read()?;
        self.de.reader_mut().finish_entry()?;
        Ok(Some(WalEntry {
            offset,
            end_offset: self.offset(),
            record,
        }))
    }
}

impl<B> Iterator for WalReader<B>
where
    B: Deref,
    B::Target: StorageBackend,
{
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(|e| Ok((e.offset, e.record))),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<B> std::fmt::Debug for WalReader<B>
where
    B: Deref,
    B::Target: StorageBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalReader")
            .field("offset", &self.offset())
            .field("file_size", &self.file_size())
            .finish_non_exhaustive()
    }
}

/// Bytes read at a time while looking for a record start.
const SCAN_CHUNK: usize = 64 * 1024;

/// Looks for a complete, checksum-valid record starting at or after
/// `from`. Returns its offset.
///
/// Callers pass the offset where decoding of a bad record stopped, so
/// bytes the bad record was already read to cover are never taken for a
/// record of their own. The tail is streamed in chunks and only offsets
/// holding a known record tag are decoded.
///
/// # Errors
///
/// Returns an error if the tail of the log cannot be read.
pub fn find_valid_record<S>(backend: &S, from: u64) -> CoreResult<Option<u64>>
where
    S: StorageBackend + ?Sized,
{
    let size = backend.size()?;
    let mut chunk_start = from;
    while chunk_start < size {
        let len = (size - chunk_start).min(SCAN_CHUNK as u64) as usize;
        let chunk = backend.read_at(chunk_start, len)?;
        for (i, &tag) in chunk.iter().enumerate() {
            if WalRecordType::from_byte(tag).is_none() {
                continue;
            }
            let candidate = chunk_start + i as u64;
            let mut reader = WalReader::at(backend, candidate)?;
            if matches!(reader.next_entry(), Ok(Some(_))) {
                return Ok(Some(candidate));
            }
        }
        chunk_start += len as u64;
    }
    Ok(None)
}

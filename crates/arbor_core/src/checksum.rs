//! Checksum framing for log entries.
//!
//! Every logical entry (a WAL record, the shadow file trailer) is written as
//!
//! ```text
//! | payload (N) | xxh3_64(payload) (8, little-endian) |
//! ```
//!
//! The frame carries no length: the reader learns the payload's extent by
//! decoding it. A torn entry therefore shows up as the file ending early
//! ([`CoreError::TornWrite`]), while garbled bytes show up as a trailer that
//! does not match ([`CoreError::ChecksumMismatch`]).

use crate::error::{CoreError, CoreResult};
use crate::serializer::{Reader, Serializer};
use arbor_storage::StorageBackend;
use std::ops::Deref;
use xxhash_rust::xxh3::xxh3_64;

/// Size of the checksum trailer.
pub const CHECKSUM_SIZE: usize = 8;

/// Read buffer size for streaming file reads.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes the entry checksum.
#[must_use]
pub fn checksum(data: &[u8]) -> u64 {
    xxh3_64(data)
}

/// Returns true if `stored` is the checksum of `payload`.
#[must_use]
pub fn verify(payload: &[u8], stored: u64) -> bool {
    checksum(payload) == stored
}

/// Frames a complete payload in one call.
#[must_use]
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + CHECKSUM_SIZE);
    out.extend_from_slice(payload);
    out.extend_from_slice(&checksum(payload).to_le_bytes());
    out
}

/// Write side of the framing layer.
///
/// Bytes written between [`start_entry`](Self::start_entry) and
/// [`finish_entry`](Self::finish_entry) go to a scratch buffer; finishing
/// the entry moves `payload ‖ checksum` to the pending output, which the
/// owner drains to its backend.
#[derive(Debug, Default)]
pub struct ChecksumWriter {
    scratch: Serializer,
    pending: Vec<u8>,
    in_entry: bool,
}

impl ChecksumWriter {
    /// Creates a writer with empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts capturing a new entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an entry is already open.
    pub fn start_entry(&mut self) -> CoreResult<()> {
        if self.in_entry {
            return Err(CoreError::invalid_operation("checksum entry already open"));
        }
        self.scratch.clear();
        self.in_entry = true;
        Ok(())
    }

    /// Serializer for the open entry's payload.
    pub fn serializer(&mut self) -> &mut Serializer {
        &mut self.scratch
    }

    /// Closes the open entry and appends its frame to the pending output.
    ///
    /// Returns the framed size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no entry is open.
    pub fn finish_entry(&mut self) -> CoreResult<usize> {
        if !self.in_entry {
            return Err(CoreError::invalid_operation("no checksum entry open"));
        }
        self.in_entry = false;
        let payload = self.scratch.as_bytes();
        self.pending.extend_from_slice(payload);
        self.pending
            .extend_from_slice(&checksum(payload).to_le_bytes());
        Ok(payload.len() + CHECKSUM_SIZE)
    }

    /// Writes one complete entry whose payload is produced by `f`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an entry is already open.
    pub fn write_entry(&mut self, f: impl FnOnce(&mut Serializer)) -> CoreResult<usize> {
        self.start_entry()?;
        f(&mut self.scratch);
        self.finish_entry()
    }

    /// Framed bytes not yet handed to the backend.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Number of pending framed bytes.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Takes the pending bytes, leaving the buffer empty.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    /// Drops pending bytes and any open entry.
    pub fn discard(&mut self) {
        self.pending.clear();
        self.scratch.clear();
        self.in_entry = false;
    }
}

/// Read side of the framing layer.
///
/// Reads pulled through this reader while an entry is open are captured;
/// [`finish_entry`](Self::finish_entry) reads the trailer (uncaptured) and
/// compares it with the checksum of the captured bytes.
#[derive(Debug)]
pub struct ChecksumReader<R> {
    inner: R,
    scratch: Vec<u8>,
    capturing: bool,
}

impl<R: Reader> ChecksumReader<R> {
    /// Wraps a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
            capturing: false,
        }
    }

    /// Starts capturing a new entry, discarding any unfinished capture.
    pub fn start_entry(&mut self) {
        self.scratch.clear();
        self.capturing = true;
    }

    /// Reads the trailer and verifies the captured payload.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if no entry is open
    /// - `TornWrite` if the trailer is cut off
    /// - `ChecksumMismatch` if the trailer disagrees with the payload
    pub fn finish_entry(&mut self) -> CoreResult<()> {
        if !self.capturing {
            return Err(CoreError::invalid_operation("no checksum entry open"));
        }
        self.capturing = false;

        let mut trailer = [0u8; CHECKSUM_SIZE];
        self.inner.read_exact(&mut trailer)?;
        let expected = u64::from_le_bytes(trailer);
        let actual = checksum(&self.scratch);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }

    /// Returns the wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Consumes the framing reader and returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Reader> Reader for ChecksumReader<R> {
    fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        self.inner.read_exact(buf)?;
        if self.capturing {
            self.scratch.extend_from_slice(buf);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    fn offset(&self) -> u64 {
        self.inner.offset()
    }

    fn ensure_available(&self, len: u64) -> CoreResult<()> {
        self.inner.ensure_available(len)
    }
}

/// Sequential reader over a storage backend.
///
/// Reads in 64 KiB chunks so a WAL of any size is scanned with constant
/// memory. Running out of bytes in the middle of a read is reported as
/// [`CoreError::TornWrite`]: for an append-only file that is exactly what a
/// crash mid-append leaves behind.
pub struct BufferedFileReader<B> {
    backend: B,
    total_size: u64,
    offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl<B> BufferedFileReader<B>
where
    B: Deref,
    B::Target: StorageBackend,
{
    /// Creates a reader starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: B, start_offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset,
            buffer: Vec::new(),
            buffer_pos: 0,
        })
    }

    /// Size of the file when the reader was created.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The backend being read.
    pub fn backend(&self) -> &B::Target {
        &self.backend
    }

    fn refill(&mut self) -> CoreResult<()> {
        let remaining = self.total_size - self.offset;
        let len = remaining.min(READ_BUFFER_SIZE as u64) as usize;
        self.buffer = self.backend.read_at(self.offset, len)?;
        self.buffer_pos = 0;
        Ok(())
    }
}

impl<B> Reader for BufferedFileReader<B>
where
    B: Deref,
    B::Target: StorageBackend,
{
    fn read_exact(&mut self, out: &mut [u8]) -> CoreResult<()> {
        self.ensure_available(out.len() as u64)?;

        let mut filled = 0;
        while filled < out.len() {
            if self.buffer_pos == self.buffer.len() {
                self.refill()?;
            }
            let n = (out.len() - filled).min(self.buffer.len() - self.buffer_pos);
            out[filled..filled + n]
                .copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
            self.buffer_pos += n;
            self.offset += n as u64;
            filled += n;
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.offset >= self.total_size
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn ensure_available(&self, len: u64) -> CoreResult<()> {
        if self.offset.saturating_add(len) > self.total_size {
            return Err(CoreError::TornWrite {
                offset: self.offset,
            });
        }
        Ok(())
    }
}

impl<B> std::fmt::Debug for BufferedFileReader<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedFileReader")
            .field("total_size", &self.total_size)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

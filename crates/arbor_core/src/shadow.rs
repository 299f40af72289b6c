//! Shadow paging.
//!
//! A checkpoint never writes data file pages directly. It stages new page
//! images in the shadow file, makes them durable, logs a `Checkpoint`
//! record, and only then copies them over the originals. A crash before the
//! `Checkpoint` record leaves the data file untouched; a crash after it is
//! finished by recovery, which redoes the copy.
//!
//! ## File Format
//!
//! ```text
//! page 0          | num_shadow_pages u64 | zero padding               |
//! pages 1..=n     | staged page images                                |
//! (n + 1) * 4096  | [u64 count][(u32 file, u32 page) ...][xxh3_64]    |
//! ```
//!
//! Record `i` of the trailer says where staged page `i + 1` belongs.

use crate::checksum::{ChecksumReader, ChecksumWriter};
use crate::error::{CoreError, CoreResult};
use crate::page::{page_offset, PageCache, PageStore, PAGE_SIZE};
use crate::serializer::{Decode, Deserializer, Encode, Reader, Serializer, SliceReader};
use crate::types::{FileId, PageIdx};
use arbor_storage::StorageBackend;
use std::collections::HashMap;
use tracing::debug;

/// Maps a staged page to its home.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPageRecord {
    /// File the page belongs to.
    pub file: FileId,
    /// Page index within that file.
    pub page: PageIdx,
}

impl Encode for ShadowPageRecord {
    fn encode(&self, s: &mut Serializer) {
        s.write_u32(self.file.0);
        s.write_u32(self.page);
    }
}

impl Decode for ShadowPageRecord {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        Ok(Self {
            file: FileId(d.read_u32()?),
            page: d.read_u32()?,
        })
    }
}

/// The shadow file of one checkpoint cycle.
pub struct ShadowFile {
    backend: Box<dyn StorageBackend>,
    records: Vec<ShadowPageRecord>,
    slots: HashMap<(FileId, PageIdx), u32>,
    max_pages: u32,
}

impl ShadowFile {
    /// Wraps a backend. Whatever the backend holds is ignored: recovery
    /// consumes or clears a leftover shadow file before this is created.
    pub fn new(backend: Box<dyn StorageBackend>, max_pages: u32) -> Self {
        Self {
            backend,
            records: Vec::new(),
            slots: HashMap::new(),
            max_pages,
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &dyn StorageBackend {
        &*self.backend
    }

    /// Number of pages staged in this cycle.
    #[must_use]
    pub fn num_pages(&self) -> usize {
        self.records.len()
    }

    /// The mappings staged so far, in slot order.
    #[must_use]
    pub fn records(&self) -> &[ShadowPageRecord] {
        &self.records
    }

    /// Returns the slot holding `(file, page)`, allocating a zeroed page if
    /// the page has not been staged in this cycle.
    ///
    /// # Errors
    ///
    /// - `AllocationExhausted` past `max_shadow_pages`
    /// - I/O errors
    pub fn stage(&mut self, file: FileId, page: PageIdx) -> CoreResult<u32> {
        if let Some(&idx) = self.slots.get(&(file, page)) {
            return Ok(idx);
        }
        let idx = u32::try_from(self.records.len()).unwrap_or(u32::MAX);
        if idx >= self.max_pages {
            return Err(CoreError::AllocationExhausted {
                what: "shadow file",
                limit: u64::from(self.max_pages),
            });
        }
        if self.backend.size()? < PAGE_SIZE as u64 {
            self.backend.truncate(0)?;
            self.backend.write_at(0, &[0u8; PAGE_SIZE])?;
        }
        self.backend.write_at(page_offset(idx + 1), &[0u8; PAGE_SIZE])?;
        self.records.push(ShadowPageRecord { file, page });
        self.slots.insert((file, page), idx);
        Ok(idx)
    }

    fn check_slot(&self, idx: u32) -> CoreResult<()> {
        if (idx as usize) < self.records.len() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "shadow slot {idx} was never staged"
            )))
        }
    }

    /// Writes the image of a staged page.
    ///
    /// # Errors
    ///
    /// Returns an error for an unstaged slot, a wrong-sized image or I/O
    /// failure.
    pub fn write_page(&mut self, idx: u32, bytes: &[u8]) -> CoreResult<()> {
        self.check_slot(idx)?;
        if bytes.len() != PAGE_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "page image is {} bytes, expected {PAGE_SIZE}",
                bytes.len()
            )));
        }
        self.backend.write_at(page_offset(idx + 1), bytes)?;
        Ok(())
    }

    /// Reads the image of a staged page.
    ///
    /// # Errors
    ///
    /// Returns an error for an unstaged slot or I/O failure.
    pub fn read_page(&self, idx: u32) -> CoreResult<Vec<u8>> {
        self.check_slot(idx)?;
        Ok(self.backend.read_at(page_offset(idx + 1), PAGE_SIZE)?)
    }

    /// Writes the header and the trailer, then syncs.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn flush_all(&mut self) -> CoreResult<()> {
        let count = self.records.len() as u64;
        let mut header = vec![0u8; PAGE_SIZE];
        header[..8].copy_from_slice(&count.to_le_bytes());
        self.backend.write_at(0, &header)?;

        let mut writer = ChecksumWriter::new();
        writer.write_entry(|s| s.write_vec(&self.records))?;
        let trailer = writer.take_pending();
        let trailer_at = page_offset(self.records.len() as u32 + 1);
        self.backend.write_at(trailer_at, &trailer)?;
        let end = trailer_at + trailer.len() as u64;
        if self.backend.size()? > end {
            self.backend.truncate(end)?;
        }
        self.backend.flush()?;
        self.backend.sync()?;
        debug!(pages = count, "shadow file flushed");
        Ok(())
    }

    /// Copies every staged page to its home and syncs the store. Resident
    /// cache frames are overwritten in place.
    ///
    /// Pure copy: running it again after a crash gives the same result.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn apply(&self, store: &mut dyn PageStore, cache: &dyn PageCache) -> CoreResult<usize> {
        copy_pages(&*self.backend, &self.records, store, cache)
    }

    /// Forgets every mapping and truncates the file to an empty header.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.records.clear();
        self.slots.clear();
        reset(&mut *self.backend)
    }

    /// Reads the mappings a flushed shadow file holds.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the header or trailer is missing or malformed
    /// - `TornWrite` / `ChecksumMismatch` if the trailer is damaged
    pub fn read_records(backend: &dyn StorageBackend) -> CoreResult<Vec<ShadowPageRecord>> {
        let size = backend.size()?;
        if size < PAGE_SIZE as u64 {
            return Err(CoreError::invalid_format("shadow file has no header page"));
        }
        let header = backend.read_at(0, 8)?;
        let mut count = [0u8; 8];
        count.copy_from_slice(&header);
        let count = u64::from_le_bytes(count);

        let trailer_at = u32::try_from(count)
            .ok()
            .and_then(|n| n.checked_add(1))
            .map(page_offset)
            .filter(|&at| at <= size)
            .ok_or_else(|| {
                CoreError::invalid_format(format!(
                    "shadow header claims {count} pages but the file is {size} bytes"
                ))
            })?;
        let trailer = backend.read_at(trailer_at, (size - trailer_at) as usize)?;

        let mut reader = ChecksumReader::new(SliceReader::new(&trailer));
        reader.start_entry();
        let records: Vec<ShadowPageRecord> = Deserializer::new(&mut reader).read_vec()?;
        reader.finish_entry()?;
        if records.len() as u64 != count {
            return Err(CoreError::invalid_format(format!(
                "shadow trailer lists {} pages, header says {count}",
                records.len()
            )));
        }
        Ok(records)
    }

    /// Applies a shadow file left on disk by a checkpoint whose
    /// `Checkpoint` record is durable. Used only by recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the shadow file is unreadable or the copy fails.
    pub fn replay_shadow_page_records(
        backend: &dyn StorageBackend,
        store: &mut dyn PageStore,
        cache: &dyn PageCache,
    ) -> CoreResult<usize> {
        let records = Self::read_records(backend)?;
        copy_pages(backend, &records, store, cache)
    }
}

/// Truncates a shadow backend to an empty header page and syncs it.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub fn reset(backend: &mut dyn StorageBackend) -> CoreResult<()> {
    backend.truncate(0)?;
    backend.write_at(0, &[0u8; PAGE_SIZE])?;
    backend.flush()?;
    backend.sync()?;
    Ok(())
}

fn copy_pages(
    backend: &dyn StorageBackend,
    records: &[ShadowPageRecord],
    store: &mut dyn PageStore,
    cache: &dyn PageCache,
) -> CoreResult<usize> {
    for (idx, record) in records.iter().enumerate() {
        let bytes = backend.read_at(page_offset(idx as u32 + 1), PAGE_SIZE)?;
        store.write_page(record.file, record.page, &bytes)?;
        cache.update_frame_if_resident(record.file, record.page, &bytes);
    }
    store.sync()?;
    Ok(records.len())
}

impl std::fmt::Debug for ShadowFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowFile")
            .field("pages", &self.records.len())
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{BufferPool, DataFile};
    use arbor_storage::InMemoryBackend;

    fn page_of(byte: u8) -> Vec<u8> {
        vec![byte; PAGE_SIZE]
    }

    fn shadow() -> (ShadowFile, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        (ShadowFile::new(Box::new(backend.clone()), 16), backend)
    }

    #[test]
    fn staging_a_page_twice_reuses_its_slot() {
        let (mut shadow, _) = shadow();
        let a = shadow.stage(FileId::DATA, 5).unwrap();
        let b = shadow.stage(FileId::DATA, 9).unwrap();
        assert_eq!(shadow.stage(FileId::DATA, 5).unwrap(), a);
        assert_ne!(a, b);
        assert_eq!(shadow.num_pages(), 2);
        assert_eq!(shadow.read_page(b).unwrap(), page_of(0));
    }

    #[test]
    fn staging_past_the_limit_fails() {
        let mut shadow = ShadowFile::new(Box::new(InMemoryBackend::new()), 2);
        shadow.stage(FileId::DATA, 0).unwrap();
        shadow.stage(FileId::DATA, 1).unwrap();
        assert!(matches!(
            shadow.stage(FileId::DATA, 2),
            Err(CoreError::AllocationExhausted { limit: 2, .. })
        ));
        assert!(shadow.stage(FileId::DATA, 1).is_ok());
    }

    #[test]
    fn apply_copies_pages_and_updates_resident_frames() {
        let (mut shadow, _) = shadow();
        let idx = shadow.stage(FileId::DATA, 1).unwrap();
        shadow.write_page(idx, &page_of(3)).unwrap();
        shadow.flush_all().unwrap();

        let mut data = DataFile::new(Box::new(InMemoryBackend::new()));
        let pool = BufferPool::new(8);
        pool.read_page(&data, FileId::DATA, 1).unwrap();

        assert_eq!(shadow.apply(&mut data, &pool).unwrap(), 1);
        assert_eq!(data.read_page(FileId::DATA, 1).unwrap(), page_of(3));
        assert_eq!(pool.read_page(&data, FileId::DATA, 1).unwrap(), page_of(3));
        assert!(!pool.is_resident(FileId::DATA, 0));
    }

    #[test]
    fn apply_is_idempotent() {
        let (mut shadow, _) = shadow();
        let idx = shadow.stage(FileId::DATA, 0).unwrap();
        shadow.write_page(idx, &page_of(8)).unwrap();
        shadow.flush_all().unwrap();

        let backend = InMemoryBackend::new();
        let mut data = DataFile::new(Box::new(backend.clone()));
        let pool = BufferPool::new(1);
        shadow.apply(&mut data, &pool).unwrap();
        let once = backend.data();
        shadow.apply(&mut data, &pool).unwrap();
        assert_eq!(backend.data(), once);
    }

    #[test]
    fn replay_reads_mappings_from_disk() {
        let (mut shadow, backend) = shadow();
        for (page, byte) in [(4, 1u8), (0, 2), (2, 3)] {
            let idx = shadow.stage(FileId::DATA, page).unwrap();
            shadow.write_page(idx, &page_of(byte)).unwrap();
        }
        shadow.flush_all().unwrap();

        let mut data = DataFile::new(Box::new(InMemoryBackend::new()));
        let pool = BufferPool::new(4);
        let applied = ShadowFile::replay_shadow_page_records(&backend, &mut data, &pool).unwrap();
        assert_eq!(applied, 3);
        assert_eq!(data.read_page(FileId::DATA, 4).unwrap(), page_of(1));
        assert_eq!(data.read_page(FileId::DATA, 0).unwrap(), page_of(2));
        assert_eq!(data.read_page(FileId::DATA, 3).unwrap(), page_of(0));
    }

    #[test]
    fn damaged_trailer_is_rejected() {
        let (mut shadow, backend) = shadow();
        shadow.stage(FileId::DATA, 0).unwrap();
        shadow.flush_all().unwrap();

        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        backend.set_data(bytes);
        assert!(matches!(
            ShadowFile::read_records(&backend),
            Err(CoreError::ChecksumMismatch { .. })
        ));

        backend.set_data(Vec::new());
        assert!(matches!(
            ShadowFile::read_records(&backend),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn restaging_after_flush_rewrites_the_trailer() {
        let (mut shadow, backend) = shadow();
        shadow.stage(FileId::DATA, 0).unwrap();
        shadow.flush_all().unwrap();
        shadow.stage(FileId::DATA, 1).unwrap();
        shadow.flush_all().unwrap();
        assert_eq!(ShadowFile::read_records(&backend).unwrap().len(), 2);
    }

    #[test]
    fn clear_leaves_an_empty_header() {
        let (mut shadow, backend) = shadow();
        shadow.stage(FileId::DATA, 0).unwrap();
        shadow.flush_all().unwrap();
        shadow.clear().unwrap();

        assert_eq!(shadow.num_pages(), 0);
        assert_eq!(backend.size().unwrap(), PAGE_SIZE as u64);
        assert_eq!(backend.data(), page_of(0));
    }
}

//! Page-oriented data file and buffer pool.
//!
//! The data file holds the checkpoint image:
//!
//! ```text
//! page 0    | magic "ARBR" | major u16 | minor u16 | snapshot_len u64 |
//!           | snapshot_checksum u64 | checkpoint_ts u64 | zero padding |
//! page 1..  | DatabaseState snapshot, zero padded to a page boundary   |
//! ```
//!
//! A zero-length data file is an empty database. Pages only ever change
//! through the shadow file, so the header and the snapshot it describes are
//! replaced together.

use crate::checksum::checksum;
use crate::error::{CoreError, CoreResult};
use crate::state::DatabaseState;
use crate::types::{FileId, PageIdx, Timestamp};
use arbor_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Size of every page in the data and shadow files.
pub const PAGE_SIZE: usize = 4096;

/// Magic bytes at the start of the data file.
pub const DATA_MAGIC: [u8; 4] = *b"ARBR";

const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 8 + 8;

/// Byte offset of page `page`.
#[must_use]
pub fn page_offset(page: PageIdx) -> u64 {
    u64::from(page) * PAGE_SIZE as u64
}

/// Number of pages needed to hold `len` bytes.
#[must_use]
pub fn pages_for(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Page-granular access to the files a checkpoint rewrites.
pub trait PageStore {
    /// Reads one page. Pages past the end of the file read as zeros.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or an unknown file.
    fn read_page(&self, file: FileId, page: PageIdx) -> CoreResult<Vec<u8>>;

    /// Overwrites one page, extending the file with zero pages if needed.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, an unknown file or a wrong-sized
    /// page.
    fn write_page(&mut self, file: FileId, page: PageIdx, bytes: &[u8]) -> CoreResult<()>;

    /// Makes every written page durable.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn sync(&mut self) -> CoreResult<()>;
}

/// Cached page frames that must stay coherent with the page store.
pub trait PageCache {
    /// Overwrites the cached frame for `(file, page)` if one is resident.
    /// Returns whether a frame was updated. Never does I/O.
    fn update_frame_if_resident(&self, file: FileId, page: PageIdx, bytes: &[u8]) -> bool;
}

/// Decoded data file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Length of the snapshot in bytes.
    pub snapshot_len: u64,
    /// xxh3 checksum of the snapshot bytes.
    pub snapshot_checksum: u64,
    /// Commit timestamp the snapshot reflects.
    pub checkpoint_ts: Timestamp,
}

impl DataHeader {
    /// Encodes the header as a full page.
    #[must_use]
    pub fn to_page(&self) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&DATA_MAGIC);
        page[4..6].copy_from_slice(&self.format_version.0.to_le_bytes());
        page[6..8].copy_from_slice(&self.format_version.1.to_le_bytes());
        page[8..16].copy_from_slice(&self.snapshot_len.to_le_bytes());
        page[16..24].copy_from_slice(&self.snapshot_checksum.to_le_bytes());
        page[24..32].copy_from_slice(&self.checkpoint_ts.as_u64().to_le_bytes());
        page
    }

    /// Decodes a header page.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on a bad magic or a newer major version than
    /// `supported_major`.
    pub fn from_page(page: &[u8], supported_major: u16) -> CoreResult<Self> {
        if page.len() < HEADER_LEN || page[0..4] != DATA_MAGIC {
            return Err(CoreError::invalid_format("invalid data file magic"));
        }
        let u16_at = |at: usize| u16::from_le_bytes([page[at], page[at + 1]]);
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&page[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        let format_version = (u16_at(4), u16_at(6));
        if format_version.0 > supported_major {
            return Err(CoreError::invalid_format(format!(
                "unsupported data file version {}.{}",
                format_version.0, format_version.1
            )));
        }
        Ok(Self {
            format_version,
            snapshot_len: u64_at(8),
            snapshot_checksum: u64_at(16),
            checkpoint_ts: Timestamp::new(u64_at(24)),
        })
    }
}

/// Builds the full page image of a checkpoint: the header page followed
/// by the snapshot pages.
#[must_use]
pub fn checkpoint_image(
    snapshot: &[u8],
    checkpoint_ts: Timestamp,
    format_version: (u16, u16),
) -> Vec<Vec<u8>> {
    let header = DataHeader {
        format_version,
        snapshot_len: snapshot.len() as u64,
        snapshot_checksum: checksum(snapshot),
        checkpoint_ts,
    };
    let mut pages = Vec::with_capacity(1 + pages_for(snapshot.len()));
    pages.push(header.to_page());
    for chunk in snapshot.chunks(PAGE_SIZE) {
        let mut page = vec![0u8; PAGE_SIZE];
        page[..chunk.len()].copy_from_slice(chunk);
        pages.push(page);
    }
    pages
}

/// The main data file.
pub struct DataFile {
    backend: Box<dyn StorageBackend>,
}

impl DataFile {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads the header, or `None` for an empty file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a damaged header.
    pub fn header(&self, supported_major: u16) -> CoreResult<Option<DataHeader>> {
        if self.backend.size()? == 0 {
            return Ok(None);
        }
        let page = self.read_page(FileId::DATA, 0)?;
        DataHeader::from_page(&page, supported_major).map(Some)
    }

    /// Reads and verifies the checkpointed snapshot bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the header is damaged or the file is short
    /// - `ChecksumMismatch` if the snapshot does not match its header
    pub fn read_snapshot(&self, supported_major: u16) -> CoreResult<Option<(DataHeader, Vec<u8>)>> {
        let Some(header) = self.header(supported_major)? else {
            return Ok(None);
        };
        let len = usize::try_from(header.snapshot_len)
            .map_err(|_| CoreError::invalid_format("snapshot length overflows"))?;
        let end = page_offset(1).saturating_add(header.snapshot_len);
        if end > self.backend.size()? {
            return Err(CoreError::invalid_format(format!(
                "data file is shorter than its snapshot ({} bytes)",
                header.snapshot_len
            )));
        }
        let bytes = self.backend.read_at(page_offset(1), len)?;
        let actual = checksum(&bytes);
        if actual != header.snapshot_checksum {
            return Err(CoreError::ChecksumMismatch {
                expected: header.snapshot_checksum,
                actual,
            });
        }
        Ok(Some((header, bytes)))
    }

    /// Loads the checkpointed state; an empty file yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is damaged.
    pub fn load_state(&self, supported_major: u16) -> CoreResult<DatabaseState> {
        match self.read_snapshot(supported_major)? {
            Some((header, bytes)) => {
                let state = DatabaseState::decode_snapshot(&bytes)?;
                debug!(
                    checkpoint_ts = header.checkpoint_ts.as_u64(),
                    bytes = bytes.len(),
                    "loaded checkpoint image"
                );
                Ok(state)
            }
            None => Ok(DatabaseState::new()),
        }
    }

    fn check_file(file: FileId) -> CoreResult<()> {
        if file == FileId::DATA {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "unknown paged file {}",
                file.0
            )))
        }
    }
}

impl PageStore for DataFile {
    fn read_page(&self, file: FileId, page: PageIdx) -> CoreResult<Vec<u8>> {
        Self::check_file(file)?;
        let offset = page_offset(page);
        let size = self.backend.size()?;
        let mut bytes = if offset >= size {
            Vec::new()
        } else {
            let len = (size - offset).min(PAGE_SIZE as u64) as usize;
            self.backend.read_at(offset, len)?
        };
        bytes.resize(PAGE_SIZE, 0);
        Ok(bytes)
    }

    fn write_page(&mut self, file: FileId, page: PageIdx, bytes: &[u8]) -> CoreResult<()> {
        Self::check_file(file)?;
        if bytes.len() != PAGE_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "page image is {} bytes, expected {PAGE_SIZE}",
                bytes.len()
            )));
        }
        let offset = page_offset(page);
        let size = self.backend.size()?;
        if offset > size {
            let gap = usize::try_from(offset - size)
                .map_err(|_| CoreError::invalid_operation("page index overflows"))?;
            self.backend.write_at(size, &vec![0u8; gap])?;
        }
        self.backend.write_at(offset, bytes)?;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile").finish_non_exhaustive()
    }
}

struct Frame {
    key: (FileId, PageIdx),
    data: Vec<u8>,
    recently_accessed: bool,
}

#[derive(Default)]
struct Frames {
    slots: Vec<Frame>,
    lookup: HashMap<(FileId, PageIdx), usize>,
    clock_hand: usize,
}

/// Fixed-size page cache with clock eviction.
///
/// Frames are read-only copies of store pages; every write goes through
/// the shadow file, whose `apply` keeps resident frames in step via
/// [`PageCache::update_frame_if_resident`].
pub struct BufferPool {
    capacity: usize,
    frames: Mutex<Frames>,
}

impl BufferPool {
    /// Creates a pool holding at most `capacity` pages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: Mutex::new(Frames::default()),
        }
    }

    /// Reads a page through the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the page has to be read and the read fails.
    pub fn read_page(
        &self,
        store: &dyn PageStore,
        file: FileId,
        page: PageIdx,
    ) -> CoreResult<Vec<u8>> {
        let key = (file, page);
        let mut frames = self.frames.lock();
        if let Some(&slot) = frames.lookup.get(&key) {
            let frame = &mut frames.slots[slot];
            frame.recently_accessed = true;
            return Ok(frame.data.clone());
        }

        let data = store.read_page(file, page)?;
        let frame = Frame {
            key,
            data: data.clone(),
            recently_accessed: true,
        };
        if frames.slots.len() < self.capacity {
            let slot = frames.slots.len();
            frames.slots.push(frame);
            frames.lookup.insert(key, slot);
        } else {
            let slot = Self::pick_victim(&mut frames);
            let evicted = std::mem::replace(&mut frames.slots[slot], frame).key;
            frames.lookup.remove(&evicted);
            frames.lookup.insert(key, slot);
        }
        Ok(data)
    }

    fn pick_victim(frames: &mut Frames) -> usize {
        loop {
            let hand = frames.clock_hand;
            frames.clock_hand = (hand + 1) % frames.slots.len();
            let frame = &mut frames.slots[hand];
            if frame.recently_accessed {
                frame.recently_accessed = false;
            } else {
                return hand;
            }
        }
    }

    /// Whether `(file, page)` currently has a frame.
    #[must_use]
    pub fn is_resident(&self, file: FileId, page: PageIdx) -> bool {
        self.frames.lock().lookup.contains_key(&(file, page))
    }

    /// Number of resident frames.
    #[must_use]
    pub fn resident_pages(&self) -> usize {
        self.frames.lock().slots.len()
    }

    /// Drops every frame.
    pub fn clear(&self) {
        *self.frames.lock() = Frames::default();
    }
}

impl PageCache for BufferPool {
    fn update_frame_if_resident(&self, file: FileId, page: PageIdx, bytes: &[u8]) -> bool {
        let mut frames = self.frames.lock();
        let Some(&slot) = frames.lookup.get(&(file, page)) else {
            return false;
        };
        let frame = &mut frames.slots[slot];
        frame.data.clear();
        frame.data.extend_from_slice(bytes);
        true
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("resident", &self.resident_pages())
            .finish()
    }
}

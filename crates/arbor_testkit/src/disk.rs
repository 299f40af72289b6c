//! Simulated disks that can crash.
//!
//! A [`CrashSwitch`] is a byte budget shared by every [`SimulatedDisk`]
//! handed to one database. Each byte written spends one unit and each
//! truncate spends one unit. The write that exhausts the budget is cut
//! short; from then on every mutating call fails, as if the process had
//! died. What the crash leaves in the underlying [`InMemoryBackend`]s
//! depends on the switch's [`CrashMode`]: every byte that landed, or only
//! what each file held at its last successful sync. Reopening a database on
//! those backends is a restart after the crash.
//!
//! Arming the same switch at every budget from zero to the total a
//! workload spends visits every crash point of that workload.

use arbor_core::{Config, CoreResult, Database};
use arbor_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// What a crash does to bytes that were written but never synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrashMode {
    /// Every byte written before the crash survives it, including the
    /// front of the write that was cut.
    #[default]
    KeepWrites,
    /// Each file goes back to what it held at its last successful sync, as
    /// after a power loss that drops the page cache.
    LoseUnsynced,
}

/// A file and its contents as of its last sync.
#[derive(Debug)]
struct SyncedFile {
    file: InMemoryBackend,
    image: Vec<u8>,
}

#[derive(Debug)]
struct SwitchState {
    budget: AtomicU64,
    spent: AtomicU64,
    crashed: AtomicBool,
    mode: CrashMode,
    files: Mutex<Vec<SyncedFile>>,
}

/// Shared crash trigger.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<SwitchState>,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashSwitch {
    /// Creates a disarmed switch whose crash keeps every written byte.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(CrashMode::KeepWrites)
    }

    /// Creates a disarmed switch with the given crash behavior.
    #[must_use]
    pub fn with_mode(mode: CrashMode) -> Self {
        Self {
            state: Arc::new(SwitchState {
                budget: AtomicU64::new(u64::MAX),
                spent: AtomicU64::new(0),
                crashed: AtomicBool::new(false),
                mode,
                files: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The crash behavior.
    #[must_use]
    pub fn mode(&self) -> CrashMode {
        self.state.mode
    }

    /// Crashes once `units` more units have been spent.
    pub fn arm(&self, units: u64) {
        let spent = self.state.spent.load(Ordering::SeqCst);
        self.state
            .budget
            .store(spent.saturating_add(units), Ordering::SeqCst);
    }

    /// Removes the crash point. A switch that already fired stays crashed.
    pub fn disarm(&self) {
        self.state.budget.store(u64::MAX, Ordering::SeqCst);
    }

    /// Whether the crash has happened.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Units spent so far.
    #[must_use]
    pub fn spent(&self) -> u64 {
        self.state.spent.load(Ordering::SeqCst)
    }

    /// Starts tracking `file`, taking its current contents as synced.
    fn register(&self, file: &InMemoryBackend) -> usize {
        let mut files = self.state.files.lock();
        files.push(SyncedFile {
            file: file.clone(),
            image: file.data(),
        });
        files.len() - 1
    }

    fn mark_synced(&self, slot: usize) {
        if let Some(synced) = self.state.files.lock().get_mut(slot) {
            synced.image = synced.file.data();
        }
    }

    /// Spends up to `units`. Returns how many may actually be carried out;
    /// fewer than asked means the crash fired.
    fn spend(&self, units: u64) -> u64 {
        if self.has_crashed() {
            return 0;
        }
        let spent = self.state.spent.load(Ordering::SeqCst);
        let budget = self.state.budget.load(Ordering::SeqCst);
        let allowed = units.min(budget.saturating_sub(spent));
        self.state.spent.fetch_add(allowed, Ordering::SeqCst);
        if allowed < units {
            self.state.crashed.store(true, Ordering::SeqCst);
            if self.state.mode == CrashMode::LoseUnsynced {
                for synced in self.state.files.lock().iter() {
                    synced.file.set_data(synced.image.clone());
                }
            }
        }
        allowed
    }

    /// Whether the front of a cut write still lands.
    fn keeps_partial_writes(&self) -> bool {
        self.state.mode == CrashMode::KeepWrites
    }
}

fn crashed(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
}

/// A storage backend that stops working when its [`CrashSwitch`] fires.
#[derive(Debug)]
pub struct SimulatedDisk {
    inner: InMemoryBackend,
    switch: CrashSwitch,
    slot: usize,
}

impl SimulatedDisk {
    /// Wraps `inner`, sharing its contents. What `inner` holds now counts
    /// as synced.
    #[must_use]
    pub fn new(inner: InMemoryBackend, switch: CrashSwitch) -> Self {
        let slot = switch.register(&inner);
        Self {
            inner,
            switch,
            slot,
        }
    }

    /// The crash switch.
    #[must_use]
    pub fn switch(&self) -> &CrashSwitch {
        &self.switch
    }
}

impl StorageBackend for SimulatedDisk {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let allowed = self.switch.spend(data.len() as u64) as usize;
        if allowed < data.len() {
            if allowed > 0 && self.switch.keeps_partial_writes() {
                self.inner.append(&data[..allowed])?;
            }
            return Err(crashed("append"));
        }
        self.inner.append(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let allowed = self.switch.spend(data.len() as u64) as usize;
        if allowed < data.len() {
            if allowed > 0 && self.switch.keeps_partial_writes() {
                self.inner.write_at(offset, &data[..allowed])?;
            }
            return Err(crashed("write"));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(crashed("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(crashed("sync"));
        }
        self.inner.sync()?;
        self.switch.mark_synced(self.slot);
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.switch.spend(1) == 0 {
            return Err(crashed("truncate"));
        }
        self.inner.truncate(new_size)
    }
}

/// The three files of one database, held in memory.
///
/// Clones share contents, so a database opened on one clone can be
/// "restarted" by opening another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    /// Data file.
    pub data: InMemoryBackend,
    /// WAL.
    pub wal: InMemoryBackend,
    /// Shadow file.
    pub shadow: InMemoryBackend,
}

impl MemoryFiles {
    /// Creates three empty files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a database on the files, running recovery.
    ///
    /// # Errors
    ///
    /// Returns the recovery error.
    pub fn open(&self, config: Config) -> CoreResult<Database> {
        Database::open_with_backends(
            config,
            Box::new(self.data.clone()),
            Box::new(self.wal.clone()),
            Box::new(self.shadow.clone()),
        )
    }

    /// Opens a database whose writes go through `switch`.
    ///
    /// # Errors
    ///
    /// Returns the recovery error.
    pub fn open_crashable(&self, config: Config, switch: &CrashSwitch) -> CoreResult<Database> {
        Database::open_with_backends(
            config,
            Box::new(SimulatedDisk::new(self.data.clone(), switch.clone())),
            Box::new(SimulatedDisk::new(self.wal.clone(), switch.clone())),
            Box::new(SimulatedDisk::new(self.shadow.clone(), switch.clone())),
        )
    }

    /// Independent copy of the current contents.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            data: InMemoryBackend::with_data(self.data.data()),
            wal: InMemoryBackend::with_data(self.wal.data()),
            shadow: InMemoryBackend::with_data(self.shadow.data()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_disk_behaves_normally() {
        let inner = InMemoryBackend::new();
        let mut disk = SimulatedDisk::new(inner.clone(), CrashSwitch::new());
        let offset = disk.append(b"test data").unwrap();
        disk.sync().unwrap();
        assert_eq!(disk.read_at(offset, 9).unwrap(), b"test data");
        assert_eq!(inner.data(), b"test data");
    }

    #[test]
    fn crash_leaves_a_partial_write() {
        let inner = InMemoryBackend::new();
        let switch = CrashSwitch::new();
        let mut disk = SimulatedDisk::new(inner.clone(), switch.clone());

        switch.arm(7);
        disk.append(&[1u8; 5]).unwrap();
        assert!(disk.append(&[2u8; 5]).is_err());
        assert!(switch.has_crashed());
        assert_eq!(inner.data(), vec![1, 1, 1, 1, 1, 2, 2]);

        assert!(disk.append(&[3u8]).is_err());
        assert!(disk.sync().is_err());
        assert!(disk.truncate(0).is_err());
        assert_eq!(inner.data().len(), 7);
    }

    #[test]
    fn lost_writes_revert_every_file_to_its_last_sync() {
        let a_file = InMemoryBackend::new();
        let b_file = InMemoryBackend::with_data(vec![9u8; 3]);
        let switch = CrashSwitch::with_mode(CrashMode::LoseUnsynced);
        let mut a = SimulatedDisk::new(a_file.clone(), switch.clone());
        let mut b = SimulatedDisk::new(b_file.clone(), switch.clone());

        a.append(&[1u8; 4]).unwrap();
        a.sync().unwrap();
        a.append(&[2u8; 4]).unwrap();
        b.truncate(0).unwrap();
        b.append(&[3u8; 2]).unwrap();

        switch.arm(2);
        assert!(a.append(&[4u8; 4]).is_err());
        assert!(switch.has_crashed());
        assert_eq!(a_file.data(), vec![1u8; 4]);
        assert_eq!(b_file.data(), vec![9u8; 3]);
        assert!(b.sync().is_err());
    }

    #[test]
    fn switch_is_shared_across_disks() {
        let switch = CrashSwitch::new();
        let mut a = SimulatedDisk::new(InMemoryBackend::new(), switch.clone());
        let mut b = SimulatedDisk::new(InMemoryBackend::new(), switch.clone());
        switch.arm(4);
        a.append(&[0u8; 3]).unwrap();
        assert!(b.append(&[0u8; 3]).is_err());
        assert!(a.append(&[0u8]).is_err());
        assert_eq!(switch.spent(), 4);
    }

    #[test]
    fn truncate_spends_one_unit() {
        let inner = InMemoryBackend::with_data(vec![0u8; 10]);
        let switch = CrashSwitch::new();
        let mut disk = SimulatedDisk::new(inner.clone(), switch.clone());
        switch.arm(1);
        disk.truncate(5).unwrap();
        assert!(disk.truncate(0).is_err());
        assert_eq!(inner.data().len(), 5);
    }

    #[test]
    fn exact_budget_does_not_crash() {
        let switch = CrashSwitch::new();
        let mut disk = SimulatedDisk::new(InMemoryBackend::new(), switch.clone());
        switch.arm(4);
        disk.append(&[0u8; 4]).unwrap();
        assert!(!switch.has_crashed());
        disk.sync().unwrap();
    }
}

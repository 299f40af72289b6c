//! Database directory management.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ data.db           # Checkpoint image
//! ├─ wal.log           # Write-ahead log
//! └─ shadow.pages      # Staged pages of an unfinished checkpoint
//! ```
//!
//! The LOCK file ensures only one process opens the database at a time.

use crate::error::{CoreError, CoreResult};
use arbor_storage::FileBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
/// Name of the data file.
pub const DATA_FILE: &str = "data.db";
/// Name of the WAL.
pub const WAL_FILE: &str = "wal.log";
/// Name of the shadow file.
pub const SHADOW_FILE: &str = "shadow.pages";

/// The three files a database is made of.
#[derive(Debug)]
pub struct DatabaseFiles {
    /// Checkpoint image.
    pub data: FileBackend,
    /// Write-ahead log.
    pub wal: FileBackend,
    /// Shadow pages.
    pub shadow: FileBackend,
}

/// Manages the database directory structure and file locking.
///
/// The `DatabaseDir` holds an exclusive lock on the directory for as long
/// as it lives.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory doesn't exist and `create_if_missing` is false
    /// - another process holds the lock (`DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the data file.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Returns the path to the shadow file.
    #[must_use]
    pub fn shadow_path(&self) -> PathBuf {
        self.path.join(SHADOW_FILE)
    }

    /// Checks if no database has been written here yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.data_path().exists() && !self.wal_path().exists()
    }

    /// Opens (creating if needed) the database files.
    ///
    /// A freshly created file is made durable by syncing the directory.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn open_files(&self) -> CoreResult<DatabaseFiles> {
        let created = !self.data_path().exists()
            || !self.wal_path().exists()
            || !self.shadow_path().exists();
        let files = DatabaseFiles {
            data: FileBackend::open(&self.data_path())?,
            wal: FileBackend::open(&self.wal_path())?,
            shadow: FileBackend::open(&self.shadow_path())?,
        };
        if created {
            self.sync_directory()?;
        }
        Ok(files)
    }

    /// Opens the database files without write access, for inspection.
    ///
    /// Returns `None` while any of the files is missing.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn open_files_read_only(path: &Path) -> CoreResult<Option<DatabaseFiles>> {
        let data = path.join(DATA_FILE);
        let wal = path.join(WAL_FILE);
        let shadow = path.join(SHADOW_FILE);
        if !data.exists() || !wal.exists() || !shadow.exists() {
            return Ok(None);
        }
        Ok(Some(DatabaseFiles {
            data: FileBackend::open_read_only(&data)?,
            wal: FileBackend::open_read_only(&wal)?,
            shadow: FileBackend::open_read_only(&shadow)?,
        }))
    }

    /// Syncs the directory so that file creation is durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals metadata; directories cannot be fsynced.
        Ok(())
    }
}

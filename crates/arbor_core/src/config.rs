//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Whether to fsync the WAL when a transaction commits (safer but slower).
    pub sync_on_commit: bool,

    /// Bytes of framed WAL records buffered in memory before they are
    /// written to the backend.
    pub wal_buffer_size: usize,

    /// Capacity in bytes of a single undo block.
    pub undo_block_capacity: usize,

    /// Maximum undo memory a single transaction may use.
    pub max_undo_memory: usize,

    /// Number of pages cached by the buffer pool.
    pub buffer_pool_pages: usize,

    /// Maximum number of pages the shadow file may stage in one checkpoint.
    pub max_shadow_pages: u32,

    /// Whether to checkpoint automatically after commits.
    pub auto_checkpoint: bool,

    /// WAL size in bytes that triggers an automatic checkpoint.
    pub checkpoint_threshold: u64,

    /// Format version to use for new databases.
    pub format_version: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
            wal_buffer_size: 64 * 1024,
            undo_block_capacity: 4 * 1024,
            max_undo_memory: 256 * 1024 * 1024,
            buffer_pool_pages: 256,
            max_shadow_pages: 1 << 20,
            auto_checkpoint: true,
            checkpoint_threshold: 16 * 1024 * 1024,
            format_version: (1, 0),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to sync WAL on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the in-memory WAL buffer size.
    #[must_use]
    pub const fn wal_buffer_size(mut self, bytes: usize) -> Self {
        self.wal_buffer_size = bytes;
        self
    }

    /// Sets the capacity of one undo block.
    #[must_use]
    pub const fn undo_block_capacity(mut self, bytes: usize) -> Self {
        self.undo_block_capacity = bytes;
        self
    }

    /// Sets the per-transaction undo memory limit.
    #[must_use]
    pub const fn max_undo_memory(mut self, bytes: usize) -> Self {
        self.max_undo_memory = bytes;
        self
    }

    /// Sets the buffer pool size in pages.
    #[must_use]
    pub const fn buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    /// Sets the shadow file page limit.
    #[must_use]
    pub const fn max_shadow_pages(mut self, pages: u32) -> Self {
        self.max_shadow_pages = pages;
        self
    }

    /// Enables or disables automatic checkpoints.
    #[must_use]
    pub const fn auto_checkpoint(mut self, value: bool) -> Self {
        self.auto_checkpoint = value;
        self
    }

    /// Sets the WAL size that triggers an automatic checkpoint.
    #[must_use]
    pub const fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.error_if_exists);
        assert!(config.sync_on_commit);
        assert!(config.auto_checkpoint);
        assert_eq!(config.format_version, (1, 0));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .auto_checkpoint(false)
            .max_undo_memory(1024)
            .checkpoint_threshold(4096);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert!(!config.auto_checkpoint);
        assert_eq!(config.max_undo_memory, 1024);
        assert_eq!(config.checkpoint_threshold, 4096);
    }
}

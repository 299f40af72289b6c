//! Error types for Arbor core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Arbor core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] arbor_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A framed entry failed checksum verification.
    #[error("checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        /// Checksum stored in the entry trailer.
        expected: u64,
        /// Checksum computed over the captured bytes.
        actual: u64,
    },

    /// The file ended in the middle of an entry.
    #[error("torn write: file ends inside an entry at offset {offset}")]
    TornWrite {
        /// Offset at which the read ran out of bytes.
        offset: u64,
    },

    /// A checksum-valid WAL record could not be applied during recovery.
    #[error("replay failed at WAL offset {offset}: {message}")]
    ReplayLogic {
        /// Offset of the record that failed.
        offset: u64,
        /// Description of the failure.
        message: String,
    },

    /// An undo buffer or the shadow file could not grow.
    #[error("allocation exhausted: {what} (limit {limit})")]
    AllocationExhausted {
        /// What ran out of room.
        what: &'static str,
        /// The configured limit that was hit.
        limit: u64,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A mutation would break a table constraint.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// Catalog entry not found.
    #[error("catalog entry not found: {name}")]
    EntryNotFound {
        /// Name that was looked up.
        name: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates an entry-not-found error.
    pub fn entry_not_found(name: impl Into<String>) -> Self {
        Self::EntryNotFound { name: name.into() }
    }

    /// Creates a replay error for the record at `offset`.
    pub fn replay_logic(offset: u64, message: impl Into<String>) -> Self {
        Self::ReplayLogic {
            offset,
            message: message.into(),
        }
    }

    /// Returns true for errors that mean "the bytes ran out or were garbled",
    /// as opposed to I/O failures.
    ///
    /// Recovery's dry-run scan absorbs these at the tail of the WAL.
    #[must_use]
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::TornWrite { .. }
                | Self::WalCorruption { .. }
                | Self::InvalidFormat { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_are_classified() {
        assert!(CoreError::TornWrite { offset: 3 }.is_decode_failure());
        assert!(CoreError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_decode_failure());
        assert!(CoreError::wal_corruption("bad tag").is_decode_failure());
        assert!(!CoreError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_decode_failure());
        assert!(!CoreError::replay_logic(0, "no table").is_decode_failure());
    }

    #[test]
    fn checksum_message_is_hex() {
        let err = CoreError::ChecksumMismatch {
            expected: 0xab,
            actual: 0xcd,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 00000000000000ab, got 00000000000000cd"
        );
    }
}

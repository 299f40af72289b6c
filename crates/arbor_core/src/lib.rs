//! # Arbor Core
//!
//! Transaction durability for the Arbor embedded graph database.
//!
//! This crate provides:
//! - a per-transaction undo log that drives commit and rollback
//! - a checksum-framed, logical write-ahead log
//! - shadow paging, which makes a checkpoint's page writes atomic
//! - checkpointing of the committed state into the data file
//! - startup recovery from the WAL and the shadow file
//!
//! ## Files
//!
//! A database is three files on [`StorageBackend`](arbor_storage::StorageBackend)s:
//! the data file holding the last checkpoint image, the WAL holding every
//! transaction committed since, and the shadow file holding the pages of a
//! checkpoint in flight.
//!
//! ## Example
//!
//! ```rust
//! use arbor_core::{ColumnDef, Database, LogicalType, Value};
//!
//! let db = Database::open_in_memory().unwrap();
//! let person = db
//!     .transaction(|txn| {
//!         let person = txn.create_node_table(
//!             "person",
//!             vec![ColumnDef::new("id", LogicalType::Int64)],
//!             "id",
//!         )?;
//!         txn.insert_nodes(person, &[vec![Value::Int64(7)]])?;
//!         Ok(person)
//!     })
//!     .unwrap();
//! assert_eq!(db.count(person).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod checkpoint;
pub mod checksum;
mod config;
mod database;
#[cfg(feature = "std")]
pub mod dir;
mod error;
pub mod page;
pub mod recovery;
pub mod serializer;
pub mod shadow;
pub mod state;
pub mod table;
pub mod transaction;
pub mod types;
pub mod undo;
mod value;
pub mod wal;

pub use catalog::{AlterInfo, CatalogEntry, CatalogEntryKind, CatalogSetId, ColumnDef};
pub use checkpoint::{CheckpointStats, Checkpointer};
pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use recovery::{RecoveryOutcome, RecoveryReport, VerifyReport, WalScan};
pub use state::DatabaseState;
pub use transaction::{TransactionManager, WriteTransaction, WriterLease};
pub use types::{
    ColumnId, Direction, FileId, PageIdx, SequenceId, TableId, TableKind, Timestamp,
    TransactionId, Visibility,
};
pub use value::{LogicalType, Value};
pub use wal::{Wal, WalRecord, WalRecordType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

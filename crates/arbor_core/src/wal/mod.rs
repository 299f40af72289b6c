//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! The WAL holds *logical* records: what a transaction did, not which pages
//! it touched. A commit appends the transaction's records between a
//! `BeginTransaction` and a `Commit`; recovery re-executes them against the
//! last checkpoint image.
//!
//! ## Record Format
//!
//! ```text
//! | tag (1) | fields (N) | xxh3_64 (8) |
//! ```
//!
//! The file has no header. Strings and byte arrays are `u64`-length
//! prefixed, vectors are `u64`-count prefixed, integers are little-endian.
//!
//! ## Recovery Policy
//!
//! The reader distinguishes **tolerated** from **fatal** conditions by
//! position:
//!
//! ### Tolerated (the log ends at the last good record)
//!
//! - **Torn record**: the file ends inside a record.
//! - **Garbled final record**: the last record fails its checksum or does
//!   not decode, and no valid record follows it.
//!
//! A crash mid-append leaves exactly this. The transaction whose `Commit`
//! was not fully written is discarded.
//!
//! ### Fatal (recovery aborts)
//!
//! - A record that fails its checksum or does not decode, followed by a
//!   complete checksum-valid record.
//! - I/O errors.
//!
//! These mean interior corruption, and opening anyway would silently drop
//! committed transactions.
//!
//! ## Invariants
//!
//! - The WAL is **append-only** between checkpoints.
//! - A transaction's data records are written before its `Commit`.
//! - A `Checkpoint` record, if present, is the last record.

mod reader;
mod record;
mod writer;

pub use reader::{find_valid_record, WalEntry, WalReader};
pub use record::{WalRecord, WalRecordType};
pub use writer::Wal;

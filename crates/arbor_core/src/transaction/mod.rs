//! Single-writer transactions.
//!
//! Arbor runs one write transaction at a time:
//! - **Exclusivity**: a [`WriterLease`] wraps the writer mutex guard; holding
//!   one is the proof that nobody else is mutating.
//! - **Atomicity**: every mutation is recorded in the transaction's undo
//!   buffer and reverted if the transaction does not commit.
//! - **Isolation**: readers see committed versions only.
//! - **Durability**: a commit returns once its records and `Commit` marker
//!   are in the WAL.

mod manager;
mod write;

pub use manager::{TransactionManager, WriterLease};
pub use write::WriteTransaction;

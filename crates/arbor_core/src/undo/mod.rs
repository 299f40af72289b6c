//! Per-transaction undo log.
//!
//! Every mutation a write transaction makes records one [`UndoEntry`]
//! describing how to take it back. The log is the single source for all
//! three transaction outcomes:
//!
//! - **commit** walks it forward to build the WAL records and to stamp new
//!   versions with the commit timestamp;
//! - **rollback** walks it in reverse and restores the pre-state;
//! - both consume the buffer, so a log cannot be applied twice.
//!
//! Entries are packed into fixed-capacity blocks whose combined size is
//! bounded by [`Config::max_undo_memory`](crate::Config::max_undo_memory).

mod buffer;
mod entry;

pub use buffer::UndoBuffer;
pub use entry::{DeleteOrigin, UndoEntry};

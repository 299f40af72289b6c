//! # Arbor Storage
//!
//! Storage backend trait and implementations for Arbor.
//!
//! Backends are **opaque byte stores**. The WAL, the shadow file and the
//! data file all sit on top of a [`StorageBackend`]; none of the file
//! formats are known here.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, write in place, flush)
//! - Must be `Send + Sync` for concurrent access
//! - `sync` is the only durability point; callers decide when to pay for it
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use arbor_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

//! # Arbor Testkit
//!
//! Test utilities for Arbor.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Simulated disks that crash after a byte budget
//! - A harness that crashes a workload at every write and checks recovery
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use arbor_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let (person, _) = scenarios::social_graph(db, 3).unwrap();
//!     assert_eq!(db.count(person).unwrap(), 3);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod disk;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::disk::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use disk::*;
pub use fixtures::*;
pub use generators::*;

//! Core type definitions for Arbor.

use crate::error::{CoreError, CoreResult};
use crate::serializer::{Decode, Deserializer, Encode, Reader, Serializer};
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// process. Recovery transactions draw from the same counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Commit timestamp.
///
/// Timestamps totally order committed transactions. `Timestamp(0)` is the
/// state of an empty database; the first commit is stamped `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a new timestamp.
    #[must_use]
    pub const fn new(ts: u64) -> Self {
        Self(ts)
    }

    /// Returns the raw timestamp value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next timestamp.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

/// Identifier of a node or rel table.
///
/// Table and sequence IDs are drawn from the catalog's single object-ID
/// counter, so they never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u64);

impl TableId {
    /// Creates a new table ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Identifier of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceId(pub u64);

impl SequenceId {
    /// Creates a new sequence ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Position of a property column within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId(pub u32);

impl ColumnId {
    /// Creates a new column ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the column position as an index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a paged file (the target of a shadow page record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    /// The main data file.
    pub const DATA: Self = Self(0);
}

/// Index of a page within a paged file.
pub type PageIdx = u32;

/// Whether a table stores nodes or relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// Node table: rows are nodes, one column is the primary key.
    Node,
    /// Rel table: rows are edges between two node tables.
    Rel,
}

impl TableKind {
    /// Converts to the on-disk byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Node => 0,
            Self::Rel => 1,
        }
    }

    /// Parses the on-disk byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Node),
            1 => Some(Self::Rel),
            _ => None,
        }
    }
}

/// Edge direction relative to a bound node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Edges whose source is the bound node.
    Forward,
    /// Edges whose destination is the bound node.
    Backward,
}

impl Direction {
    /// Converts to the on-disk byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Forward => 0,
            Self::Backward => 1,
        }
    }

    /// Parses the on-disk byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Forward),
            1 => Some(Self::Backward),
            _ => None,
        }
    }
}

/// Version stamp shared by catalog versions and row versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Written by a transaction that has not committed yet.
    Pending(TransactionId),
    /// Written by a transaction that committed at this timestamp.
    Committed(Timestamp),
}

impl Stamp {
    /// Returns true if a reader with `view` observes this version.
    #[must_use]
    pub fn visible_to(self, view: Visibility) -> bool {
        match (self, view) {
            (Self::Committed(_), _) => true,
            (Self::Pending(owner), Visibility::Transaction(txid)) => owner == txid,
            (Self::Pending(_), Visibility::Committed) => false,
        }
    }

    /// Returns true once the writing transaction has committed.
    #[must_use]
    pub fn is_committed(self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Which versions a read observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only committed versions (database-level reads).
    Committed,
    /// Committed versions plus the given transaction's own writes.
    Transaction(TransactionId),
}

impl Encode for TableId {
    fn encode(&self, s: &mut Serializer) {
        s.write_u64(self.0);
    }
}

impl Decode for TableId {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        Ok(Self(d.read_u64()?))
    }
}

impl Encode for SequenceId {
    fn encode(&self, s: &mut Serializer) {
        s.write_u64(self.0);
    }
}

impl Decode for SequenceId {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        Ok(Self(d.read_u64()?))
    }
}

impl Encode for ColumnId {
    fn encode(&self, s: &mut Serializer) {
        s.write_u32(self.0);
    }
}

impl Decode for ColumnId {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        Ok(Self(d.read_u32()?))
    }
}

impl Encode for TableKind {
    fn encode(&self, s: &mut Serializer) {
        s.write_u8(self.as_byte());
    }
}

impl Decode for TableKind {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        let byte = d.read_u8()?;
        Self::from_byte(byte)
            .ok_or_else(|| CoreError::invalid_format(format!("unknown table kind {byte}")))
    }
}

impl Encode for Direction {
    fn encode(&self, s: &mut Serializer) {
        s.write_u8(self.as_byte());
    }
}

impl Decode for Direction {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        let byte = d.read_u8()?;
        Self::from_byte(byte)
            .ok_or_else(|| CoreError::invalid_format(format!("unknown direction {byte}")))
    }
}

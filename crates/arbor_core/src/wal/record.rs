//! WAL record definitions.

use crate::catalog::{AlterInfo, CatalogEntry, CatalogEntryKind};
use crate::error::{CoreError, CoreResult};
use crate::serializer::{Decode, Deserializer, Encode, Reader, Serializer};
use crate::types::{ColumnId, Direction, SequenceId, TableId, TableKind};
use crate::value::Value;

/// WAL record type identifiers.
///
/// The tag is the first byte of every record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalRecordType {
    /// Transaction begin.
    BeginTransaction = 1,
    /// Transaction commit.
    Commit = 2,
    /// A catalog entry was created.
    CreateCatalogEntry = 3,
    /// A catalog entry was dropped.
    DropCatalogEntry = 4,
    /// A catalog entry was altered.
    AlterCatalogEntry = 5,
    /// Rows were inserted into a table.
    TableInsertion = 6,
    /// A node was deleted.
    NodeDeletion = 7,
    /// A node property was updated.
    NodeUpdate = 8,
    /// A rel was deleted.
    RelDeletion = 9,
    /// All rels bound to a node were deleted.
    RelDetachDeletion = 10,
    /// A rel property was updated.
    RelUpdate = 11,
    /// Values were drawn from a sequence.
    SequenceUpdate = 12,
    /// An extension was loaded.
    LoadExtension = 13,
    /// Checkpoint marker; always the last record in the file.
    Checkpoint = 14,
}

impl WalRecordType {
    /// Converts from a byte value.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::BeginTransaction),
            2 => Some(Self::Commit),
            3 => Some(Self::CreateCatalogEntry),
            4 => Some(Self::DropCatalogEntry),
            5 => Some(Self::AlterCatalogEntry),
            6 => Some(Self::TableInsertion),
            7 => Some(Self::NodeDeletion),
            8 => Some(Self::NodeUpdate),
            9 => Some(Self::RelDeletion),
            10 => Some(Self::RelDetachDeletion),
            11 => Some(Self::RelUpdate),
            12 => Some(Self::SequenceUpdate),
            13 => Some(Self::LoadExtension),
            14 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts to a byte value.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Upper-case name used by inspection tools.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BeginTransaction => "BEGIN_TRANSACTION",
            Self::Commit => "COMMIT",
            Self::CreateCatalogEntry => "CREATE_CATALOG_ENTRY",
            Self::DropCatalogEntry => "DROP_CATALOG_ENTRY",
            Self::AlterCatalogEntry => "ALTER_CATALOG_ENTRY",
            Self::TableInsertion => "TABLE_INSERTION",
            Self::NodeDeletion => "NODE_DELETION",
            Self::NodeUpdate => "NODE_UPDATE",
            Self::RelDeletion => "REL_DELETION",
            Self::RelDetachDeletion => "REL_DETACH_DELETION",
            Self::RelUpdate => "REL_UPDATE",
            Self::SequenceUpdate => "SEQUENCE_UPDATE",
            Self::LoadExtension => "LOAD_EXTENSION",
            Self::Checkpoint => "CHECKPOINT",
        }
    }
}

/// A logical WAL record.
///
/// Records describe operations, not pages: replay drives the same state
/// mutations that produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// Opens a transaction.
    BeginTransaction,

    /// Closes the most recent transaction; its records are now durable.
    Commit,

    /// A catalog entry was created.
    CreateCatalogEntry {
        /// Full image of the new entry.
        entry: CatalogEntry,
    },

    /// A catalog entry was dropped.
    DropCatalogEntry {
        /// Object ID of the dropped entry.
        oid: u64,
        /// Kind of the dropped entry.
        kind: CatalogEntryKind,
    },

    /// A table entry was altered.
    AlterCatalogEntry {
        /// What changed.
        info: AlterInfo,
    },

    /// Rows were appended to a table.
    TableInsertion {
        /// Target table.
        table_id: TableId,
        /// Node or rel table.
        kind: TableKind,
        /// Number of rows in every column batch.
        num_rows: u64,
        /// Column-major values. For rel tables, columns 0 and 1 hold the
        /// source and destination node offsets.
        columns: Vec<Vec<Value>>,
    },

    /// A node was deleted.
    NodeDeletion {
        /// Node table.
        table_id: TableId,
        /// Offset of the deleted node.
        node_offset: u64,
        /// Primary key of the deleted node.
        pk: Value,
    },

    /// A node property was set.
    NodeUpdate {
        /// Node table.
        table_id: TableId,
        /// Updated column.
        column_id: ColumnId,
        /// Offset of the node.
        node_offset: u64,
        /// New value.
        value: Value,
    },

    /// A rel was deleted.
    RelDeletion {
        /// Rel table.
        table_id: TableId,
        /// Source node offset.
        src: u64,
        /// Destination node offset.
        dst: u64,
        /// Rel offset within its table.
        rel_id: u64,
    },

    /// Every rel bound to a node in one direction was deleted.
    RelDetachDeletion {
        /// Rel table.
        table_id: TableId,
        /// Which endpoint the node is bound to.
        direction: Direction,
        /// Bound node offset.
        node_offset: u64,
    },

    /// A rel property was set.
    RelUpdate {
        /// Rel table.
        table_id: TableId,
        /// Updated column.
        column_id: ColumnId,
        /// Source node offset.
        src: u64,
        /// Destination node offset.
        dst: u64,
        /// Rel offset within its table.
        rel_id: u64,
        /// New value.
        value: Value,
    },

    /// `kcount` values were drawn from a sequence.
    SequenceUpdate {
        /// The sequence.
        sequence_id: SequenceId,
        /// Number of values drawn.
        kcount: u64,
    },

    /// An extension was loaded.
    LoadExtension {
        /// Extension path as given by the user.
        path: String,
    },

    /// Marks a completed checkpoint: every earlier record is already in
    /// the shadow file.
    Checkpoint,
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::BeginTransaction => WalRecordType::BeginTransaction,
            Self::Commit => WalRecordType::Commit,
            Self::CreateCatalogEntry { .. } => WalRecordType::CreateCatalogEntry,
            Self::DropCatalogEntry { .. } => WalRecordType::DropCatalogEntry,
            Self::AlterCatalogEntry { .. } => WalRecordType::AlterCatalogEntry,
            Self::TableInsertion { .. } => WalRecordType::TableInsertion,
            Self::NodeDeletion { .. } => WalRecordType::NodeDeletion,
            Self::NodeUpdate { .. } => WalRecordType::NodeUpdate,
            Self::RelDeletion { .. } => WalRecordType::RelDeletion,
            Self::RelDetachDeletion { .. } => WalRecordType::RelDetachDeletion,
            Self::RelUpdate { .. } => WalRecordType::RelUpdate,
            Self::SequenceUpdate { .. } => WalRecordType::SequenceUpdate,
            Self::LoadExtension { .. } => WalRecordType::LoadExtension,
            Self::Checkpoint => WalRecordType::Checkpoint,
        }
    }

    /// Returns the table a data record touches, if any.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        match self {
            Self::TableInsertion { table_id, .. }
            | Self::NodeDeletion { table_id, .. }
            | Self::NodeUpdate { table_id, .. }
            | Self::RelDeletion { table_id, .. }
            | Self::RelDetachDeletion { table_id, .. }
            | Self::RelUpdate { table_id, .. } => Some(*table_id),
            _ => None,
        }
    }
}

impl Encode for WalRecord {
    fn encode(&self, s: &mut Serializer) {
        s.write_u8(self.record_type().as_byte());
        match self {
            Self::BeginTransaction | Self::Commit | Self::Checkpoint => {}
            Self::CreateCatalogEntry { entry } => s.write(entry),
            Self::DropCatalogEntry { oid, kind } => {
                s.write_u64(*oid);
                s.write(kind);
            }
            Self::AlterCatalogEntry { info } => s.write(info),
            Self::TableInsertion {
                table_id,
                kind,
                num_rows,
                columns,
            } => {
                s.write(table_id);
                s.write(kind);
                s.write_u64(*num_rows);
                s.write_vec(columns);
            }
            Self::NodeDeletion {
                table_id,
                node_offset,
                pk,
            } => {
                s.write(table_id);
                s.write_u64(*node_offset);
                s.write(pk);
            }
            Self::NodeUpdate {
                table_id,
                column_id,
                node_offset,
                value,
            } => {
                s.write(table_id);
                s.write(column_id);
                s.write_u64(*node_offset);
                s.write(value);
            }
            Self::RelDeletion {
                table_id,
                src,
                dst,
                rel_id,
            } => {
                s.write(table_id);
                s.write_u64(*src);
                s.write_u64(*dst);
                s.write_u64(*rel_id);
            }
            Self::RelDetachDeletion {
                table_id,
                direction,
                node_offset,
            } => {
                s.write(table_id);
                s.write(direction);
                s.write_u64(*node_offset);
            }
            Self::RelUpdate {
                table_id,
                column_id,
                src,
                dst,
                rel_id,
                value,
            } => {
                s.write(table_id);
                s.write(column_id);
                s.write_u64(*src);
                s.write_u64(*dst);
                s.write_u64(*rel_id);
                s.write(value);
            }
            Self::SequenceUpdate {
                sequence_id,
                kcount,
            } => {
                s.write(sequence_id);
                s.write_u64(*kcount);
            }
            Self::LoadExtension { path } => s.write_str(path),
        }
    }
}

impl Decode for WalRecord {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        let tag = d.read_u8()?;
        let record_type = WalRecordType::from_byte(tag)
            .ok_or_else(|| CoreError::wal_corruption(format!("unknown record type {tag}")))?;

        let record = match record_type {
            WalRecordType::BeginTransaction => Self::BeginTransaction,
            WalRecordType::Commit => Self::Commit,
            WalRecordType::Checkpoint => Self::Checkpoint,
            WalRecordType::CreateCatalogEntry => Self::CreateCatalogEntry { entry: d.read()? },
            WalRecordType::DropCatalogEntry => Self::DropCatalogEntry {
                oid: d.read_u64()?,
                kind: d.read()?,
            },
            WalRecordType::AlterCatalogEntry => Self::AlterCatalogEntry { info: d.read()? },
            WalRecordType::TableInsertion => {
                let table_id = d.read()?;
                let kind = d.read()?;
                let num_rows = d.read_u64()?;
                let columns: Vec<Vec<Value>> = d.read_vec()?;
                if columns.iter().any(|c| c.len() as u64 != num_rows) {
                    return Err(CoreError::wal_corruption(
                        "table insertion column length disagrees with row count",
                    ));
                }
                Self::TableInsertion {
                    table_id,
                    kind,
                    num_rows,
                    columns,
                }
            }
            WalRecordType::NodeDeletion => Self::NodeDeletion {
                table_id: d.read()?,
                node_offset: d.read_u64()?,
                pk: d.read()?,
            },
            WalRecordType::NodeUpdate => Self::NodeUpdate {
                table_id: d.read()?,
                column_id: d.read()?,
                node_offset: d.read_u64()?,
                value: d.read()?,
            },
            WalRecordType::RelDeletion => Self::RelDeletion {
                table_id: d.read()?,
                src: d.read_u64()?,
                dst: d.read_u64()?,
                rel_id: d.read_u64()?,
            },
            WalRecordType::RelDetachDeletion => Self::RelDetachDeletion {
                table_id: d.read()?,
                direction: d.read()?,
                node_offset: d.read_u64()?,
            },
            WalRecordType::RelUpdate => Self::RelUpdate {
                table_id: d.read()?,
                column_id: d.read()?,
                src: d.read_u64()?,
                dst: d.read_u64()?,
                rel_id: d.read_u64()?,
                value: d.read()?,
            },
            WalRecordType::SequenceUpdate => Self::SequenceUpdate {
                sequence_id: d.read()?,
                kcount: d.read_u64()?,
            },
            WalRecordType::LoadExtension => Self::LoadExtension {
                path: d.read_string()?,
            },
        };
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, NodeTableDef};
    use crate::value::LogicalType;

    fn round_trip(record: &WalRecord) -> WalRecord {
        let mut s = Serializer::new();
        s.write(record);
        let bytes = s.into_bytes();
        let mut d = Deserializer::from_slice(&bytes);
        let decoded = WalRecord::decode(&mut d).unwrap();
        assert!(d.is_finished(), "trailing bytes after {:?}", record.record_type());
        decoded
    }

    #[test]
    fn record_type_byte_conversion() {
        for b in 1..=14u8 {
            let t = WalRecordType::from_byte(b).unwrap();
            assert_eq!(t.as_byte(), b);
        }
        assert!(WalRecordType::from_byte(0).is_none());
        assert!(WalRecordType::from_byte(15).is_none());
    }

    #[test]
    fn marker_records_are_one_byte() {
        for record in [WalRecord::BeginTransaction, WalRecord::Commit, WalRecord::Checkpoint] {
            let mut s = Serializer::new();
            s.write(&record);
            assert_eq!(s.as_bytes(), &[record.record_type().as_byte()]);
        }
    }

    #[test]
    fn table_insertion_layout() {
        let record = WalRecord::TableInsertion {
            table_id: TableId::new(5),
            kind: TableKind::Node,
            num_rows: 3,
            columns: vec![vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]],
        };
        assert_eq!(round_trip(&record), record);
        assert_eq!(record.table_id(), Some(TableId::new(5)));
    }

    #[test]
    fn create_entry_carries_full_image() {
        let record = WalRecord::CreateCatalogEntry {
            entry: CatalogEntry::NodeTable(NodeTableDef {
                id: TableId::new(1),
                name: "person".to_string(),
                columns: vec![ColumnDef::new("id", LogicalType::Int64)],
                primary_key: ColumnId::new(0),
            }),
        };
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn mismatched_column_length_is_corruption() {
        let record = WalRecord::TableInsertion {
            table_id: TableId::new(5),
            kind: TableKind::Node,
            num_rows: 2,
            columns: vec![vec![Value::Int64(1)]],
        };
        let mut s = Serializer::new();
        s.write(&record);
        let bytes = s.into_bytes();
        let result = WalRecord::decode(&mut Deserializer::from_slice(&bytes));
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let result = WalRecord::decode(&mut Deserializer::from_slice(&[0xee]));
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }
}

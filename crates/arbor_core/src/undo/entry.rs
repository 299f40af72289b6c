//! Undo entry definitions.

use crate::catalog::{AlterInfo, CatalogSetId, VersionHandle};
use crate::state::SequenceState;
use crate::types::{ColumnId, Direction, SequenceId, TableId};
use crate::value::Value;
use std::mem;

/// Why rows were deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOrigin {
    /// Deleted one by one.
    Explicit,
    /// Deleted because they were bound to a detached node.
    Detach {
        /// Which endpoint the node is bound to.
        direction: Direction,
        /// The node.
        node_offset: u64,
    },
}

/// One reversible mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    /// A catalog version was pushed onto a chain.
    CatalogChange {
        /// Owning set.
        set: CatalogSetId,
        /// Chain name.
        name: String,
        /// The version that was head before the change.
        old: Option<VersionHandle>,
        /// The version the change installed.
        new: VersionHandle,
        /// Present when the change is an alteration.
        alter: Option<AlterInfo>,
    },
    /// Values were drawn from a sequence.
    SequenceChange {
        /// The sequence.
        sequence_id: SequenceId,
        /// State before the draw.
        rollback: SequenceState,
        /// Number of values drawn.
        count: u64,
    },
    /// Rows were appended inside one node group.
    RowRangeInsert {
        /// Table.
        table_id: TableId,
        /// Node group.
        node_group: u64,
        /// First row within the group.
        start_row: u64,
        /// Number of rows.
        num_rows: u64,
    },
    /// Rows were marked deleted inside one node group.
    RowRangeDelete {
        /// Table.
        table_id: TableId,
        /// Node group.
        node_group: u64,
        /// First row within the group.
        start_row: u64,
        /// Number of rows.
        num_rows: u64,
        /// Why they were deleted.
        origin: DeleteOrigin,
    },
    /// A property was overwritten.
    ColumnValueUpdate {
        /// Table.
        table_id: TableId,
        /// Column.
        column_id: ColumnId,
        /// Row offset.
        row: u64,
        /// Value before the write.
        old: Value,
    },
    /// An extension was loaded.
    ExtensionLoad {
        /// Extension path.
        path: String,
    },
}

fn value_heap(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Blob(b) => b.len(),
        _ => 0,
    }
}

impl UndoEntry {
    /// Bytes this entry occupies in an undo block.
    #[must_use]
    pub fn footprint(&self) -> usize {
        let heap = match self {
            Self::CatalogChange { name, alter, .. } => {
                name.len()
                    + match alter {
                        Some(AlterInfo::AddColumn {
                            column, default, ..
                        }) => column.name.len() + value_heap(default),
                        Some(AlterInfo::RenameColumn { new_name, .. })
                        | Some(AlterInfo::RenameTable { new_name, .. }) => new_name.len(),
                        None => 0,
                    }
            }
            Self::ColumnValueUpdate { old, .. } => value_heap(old),
            Self::ExtensionLoad { path } => path.len(),
            Self::SequenceChange { .. }
            | Self::RowRangeInsert { .. }
            | Self::RowRangeDelete { .. } => 0,
        };
        mem::size_of::<Self>() + heap
    }
}

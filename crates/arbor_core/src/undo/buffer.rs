//! Block-allocated undo buffer.

use super::entry::{DeleteOrigin, UndoEntry};
use crate::catalog::CatalogEntryKind;
use crate::error::{CoreError, CoreResult};
use crate::state::DatabaseState;
use crate::table::join_offset;
use crate::types::{Direction, SequenceId, TableId, TableKind, Timestamp};
use crate::value::Value;
use crate::wal::WalRecord;
use parking_lot::Mutex;

#[derive(Debug)]
struct UndoBlock {
    capacity: usize,
    used: usize,
    entries: Vec<UndoEntry>,
}

/// Undo log of one write transaction.
///
/// Entries are appended through `&self`; a mutex guards the block list so
/// several workers feeding one transaction can record concurrently.
#[derive(Debug)]
pub struct UndoBuffer {
    blocks: Mutex<Vec<UndoBlock>>,
    block_capacity: usize,
    memory_limit: usize,
}

impl UndoBuffer {
    /// Creates an empty undo log.
    ///
    /// `block_capacity` is the size of a regular block; `memory_limit`
    /// bounds the sum of all block capacities.
    #[must_use]
    pub fn new(block_capacity: usize, memory_limit: usize) -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            block_capacity: block_capacity.max(1),
            memory_limit,
        }
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns `AllocationExhausted` if a new block would push the buffer
    /// past its memory limit. The transaction must then be rolled back.
    pub fn record(&self, entry: UndoEntry) -> CoreResult<()> {
        let size = entry.footprint();
        let mut blocks = self.blocks.lock();

        let fits = blocks
            .last()
            .is_some_and(|block| block.used + size <= block.capacity);
        if !fits {
            let mut capacity = self.block_capacity;
            while capacity < size {
                capacity = capacity.saturating_mul(2);
            }
            let allocated: usize = blocks.iter().map(|block| block.capacity).sum();
            if allocated.saturating_add(capacity) > self.memory_limit {
                return Err(CoreError::AllocationExhausted {
                    what: "undo buffer",
                    limit: self.memory_limit as u64,
                });
            }
            blocks.push(UndoBlock {
                capacity,
                used: 0,
                entries: Vec::new(),
            });
        }

        if let Some(block) = blocks.last_mut() {
            block.used += size;
            block.entries.push(entry);
        }
        Ok(())
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.lock().iter().map(|b| b.entries.len()).sum()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Bytes reserved by all blocks.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.blocks.lock().iter().map(|b| b.capacity).sum()
    }

    fn into_entries(self) -> impl DoubleEndedIterator<Item = UndoEntry> {
        self.blocks
            .into_inner()
            .into_iter()
            .flat_map(|block| block.entries)
    }

    /// Builds the WAL records that make this transaction durable.
    ///
    /// Inserted rows and updated values are read from `state`, so the
    /// records carry the values the transaction ends with. Consecutive
    /// detach deletions of the same node collapse into one record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an entry refers to state that no longer
    /// exists.
    pub fn wal_records(&self, state: &DatabaseState) -> CoreResult<Vec<WalRecord>> {
        let blocks = self.blocks.lock();
        let mut records = Vec::new();
        let mut last_detach: Option<(TableId, Direction, u64)> = None;

        for entry in blocks.iter().flat_map(|b| &b.entries) {
            if let UndoEntry::RowRangeDelete {
                table_id,
                origin:
                    DeleteOrigin::Detach {
                        direction,
                        node_offset,
                    },
                ..
            } = entry
            {
                let key = (*table_id, *direction, *node_offset);
                if last_detach != Some(key) {
                    records.push(WalRecord::RelDetachDeletion {
                        table_id: *table_id,
                        direction: *direction,
                        node_offset: *node_offset,
                    });
                    last_detach = Some(key);
                }
                continue;
            }
            last_detach = None;
            records_for(entry, state, &mut records)?;
        }
        Ok(records)
    }

    /// Publishes the transaction's changes with timestamp `ts`.
    ///
    /// Every entry is stamped and the commit timestamp advances even if an
    /// earlier entry fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a catalog version is stale.
    pub fn commit(self, ts: Timestamp, state: &mut DatabaseState) -> CoreResult<()> {
        let mut first_error = None;
        for entry in self.into_entries() {
            if let Err(e) = commit_entry(&entry, ts, state) {
                first_error.get_or_insert(e);
            }
        }
        state.last_commit_ts = ts;
        first_error.map_or(Ok(()), Err)
    }

    /// Reverts the transaction's changes, newest first.
    ///
    /// Every entry is reverted even if an earlier one fails; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an entry no longer matches the state.
    pub fn rollback(self, state: &mut DatabaseState) -> CoreResult<()> {
        let mut first_error = None;
        for entry in self.into_entries().rev() {
            if let Err(e) = rollback_entry(entry, state) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn missing_table(table_id: TableId) -> CoreError {
    CoreError::invalid_operation(format!("{table_id} has no storage"))
}

fn records_for(
    entry: &UndoEntry,
    state: &DatabaseState,
    records: &mut Vec<WalRecord>,
) -> CoreResult<()> {
    match entry {
        UndoEntry::CatalogChange {
            old, new, alter, ..
        } => {
            let version = state
                .catalog
                .version(*new)
                .ok_or_else(|| CoreError::invalid_operation("stale catalog version"))?;
            match (&version.entry, alter) {
                (Some(entry), None) => records.push(WalRecord::CreateCatalogEntry {
                    entry: entry.clone(),
                }),
                (None, None) => {
                    let dropped = old
                        .and_then(|h| state.catalog.version(h))
                        .and_then(|v| v.entry.as_ref())
                        .ok_or_else(|| CoreError::invalid_operation("drop of a missing entry"))?;
                    records.push(WalRecord::DropCatalogEntry {
                        oid: dropped.oid(),
                        kind: dropped.kind(),
                    });
                }
                (Some(_), Some(info)) => records.push(WalRecord::AlterCatalogEntry {
                    info: info.clone(),
                }),
                // The old name of a renamed table; the new name logs it.
                (None, Some(_)) => {}
            }
        }
        UndoEntry::SequenceChange {
            sequence_id, count, ..
        } => records.push(WalRecord::SequenceUpdate {
            sequence_id: *sequence_id,
            kcount: *count,
        }),
        UndoEntry::RowRangeInsert {
            table_id,
            node_group,
            start_row,
            num_rows,
        } => {
            let store = state.tables.get(table_id).ok_or_else(|| missing_table(*table_id))?;
            let start = join_offset(*node_group, *start_row);
            let kind = store.kind();
            let width = store.column_types().len() + if kind == TableKind::Rel { 2 } else { 0 };
            let mut columns = vec![Vec::with_capacity(*num_rows as usize); width];
            for row in start..start + num_rows {
                let values = store.raw_row(row).ok_or_else(|| missing_table(*table_id))?;
                let mut col = 0;
                if kind == TableKind::Rel {
                    let (src, dst) = store.endpoints(row).ok_or_else(|| missing_table(*table_id))?;
                    columns[0].push(Value::Int64(src as i64));
                    columns[1].push(Value::Int64(dst as i64));
                    col = 2;
                }
                for value in values {
                    columns[col].push(value);
                    col += 1;
                }
            }
            records.push(WalRecord::TableInsertion {
                table_id: *table_id,
                kind,
                num_rows: *num_rows,
                columns,
            });
        }
        UndoEntry::RowRangeDelete {
            table_id,
            node_group,
            start_row,
            num_rows,
            ..
        } => {
            let store = state.tables.get(table_id).ok_or_else(|| missing_table(*table_id))?;
            let start = join_offset(*node_group, *start_row);
            for row in start..start + num_rows {
                let record = match store.kind() {
                    TableKind::Node => WalRecord::NodeDeletion {
                        table_id: *table_id,
                        node_offset: row,
                        pk: store.primary_key_of(row).cloned().unwrap_or(Value::Null),
                    },
                    TableKind::Rel => {
                        let (src, dst) =
                            store.endpoints(row).ok_or_else(|| missing_table(*table_id))?;
                        WalRecord::RelDeletion {
                            table_id: *table_id,
                            src,
                            dst,
                            rel_id: row,
                        }
                    }
                };
                records.push(record);
            }
        }
        UndoEntry::ColumnValueUpdate {
            table_id,
            column_id,
            row,
            ..
        } => {
            let store = state.tables.get(table_id).ok_or_else(|| missing_table(*table_id))?;
            let value = store
                .cell(*column_id, *row)
                .cloned()
                .ok_or_else(|| missing_table(*table_id))?;
            let record = match store.kind() {
                TableKind::Node => WalRecord::NodeUpdate {
                    table_id: *table_id,
                    column_id: *column_id,
                    node_offset: *row,
                    value,
                },
                TableKind::Rel => {
                    let (src, dst) = store.endpoints(*row).ok_or_else(|| missing_table(*table_id))?;
                    WalRecord::RelUpdate {
                        table_id: *table_id,
                        column_id: *column_id,
                        src,
                        dst,
                        rel_id: *row,
                        value,
                    }
                }
            };
            records.push(record);
        }
        UndoEntry::ExtensionLoad { path } => {
            records.push(WalRecord::LoadExtension { path: path.clone() });
        }
    }
    Ok(())
}

fn release_storage(state: &mut DatabaseState, oid: u64, kind: CatalogEntryKind) {
    match kind {
        CatalogEntryKind::Sequence => {
            state.sequences.remove(&SequenceId::new(oid));
        }
        CatalogEntryKind::NodeTable | CatalogEntryKind::RelTable => {
            state.tables.remove(&TableId::new(oid));
        }
    }
}

fn commit_entry(entry: &UndoEntry, ts: Timestamp, state: &mut DatabaseState) -> CoreResult<()> {
    match entry {
        UndoEntry::CatalogChange {
            old, new, alter, ..
        } => {
            let is_drop = alter.is_none()
                && state
                    .catalog
                    .version(*new)
                    .is_some_and(|v| v.entry.is_none());
            let dropped = if is_drop {
                old.and_then(|h| state.catalog.version(h))
                    .and_then(|v| v.entry.as_ref())
                    .map(|e| (e.oid(), e.kind()))
            } else {
                None
            };
            state.catalog.commit_version(*new, ts)?;
            if let Some((oid, kind)) = dropped {
                release_storage(state, oid, kind);
            }
        }
        UndoEntry::RowRangeInsert {
            table_id,
            node_group,
            start_row,
            num_rows,
        } => {
            if let Some(store) = state.tables.get_mut(table_id) {
                store.commit_insert(join_offset(*node_group, *start_row), *num_rows, ts);
            }
        }
        UndoEntry::RowRangeDelete {
            table_id,
            node_group,
            start_row,
            num_rows,
            ..
        } => {
            if let Some(store) = state.tables.get_mut(table_id) {
                store.commit_delete(join_offset(*node_group, *start_row), *num_rows, ts);
            }
        }
        UndoEntry::ColumnValueUpdate {
            table_id,
            column_id,
            row,
            ..
        } => {
            if let Some(store) = state.tables.get_mut(table_id) {
                store.commit_update(*column_id, *row);
            }
        }
        UndoEntry::SequenceChange { .. } | UndoEntry::ExtensionLoad { .. } => {}
    }
    Ok(())
}

fn rollback_entry(entry: UndoEntry, state: &mut DatabaseState) -> CoreResult<()> {
    match entry {
        UndoEntry::CatalogChange { new, alter, .. } => {
            let live = state
                .catalog
                .version(new)
                .and_then(|v| v.entry.as_ref())
                .map(|e| (e.oid(), e.kind()));
            match (live, &alter) {
                (Some((oid, kind)), None) => release_storage(state, oid, kind),
                (Some(_), Some(crate::catalog::AlterInfo::AddColumn { table_id, .. })) => {
                    if let Some(store) = state.tables.get_mut(table_id) {
                        store.remove_last_column();
                    }
                }
                _ => {}
            }
            state.catalog.rollback_version(new)
        }
        UndoEntry::SequenceChange {
            sequence_id,
            rollback,
            ..
        } => {
            if let Some(seq) = state.sequences.get_mut(&sequence_id) {
                *seq = rollback;
            }
            Ok(())
        }
        UndoEntry::RowRangeInsert {
            table_id,
            node_group,
            start_row,
            num_rows,
        } => state
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| missing_table(table_id))?
            .rollback_insert(join_offset(node_group, start_row), num_rows),
        UndoEntry::RowRangeDelete {
            table_id,
            node_group,
            start_row,
            num_rows,
            ..
        } => {
            state
                .tables
                .get_mut(&table_id)
                .ok_or_else(|| missing_table(table_id))?
                .rollback_delete(join_offset(node_group, start_row), num_rows);
            Ok(())
        }
        UndoEntry::ColumnValueUpdate {
            table_id,
            column_id,
            row,
            old,
        } => {
            state
                .tables
                .get_mut(&table_id)
                .ok_or_else(|| missing_table(table_id))?
                .rollback_update(column_id, row, old);
            Ok(())
        }
        UndoEntry::ExtensionLoad { path } => {
            if let Some(pos) = state.extensions.iter().rposition(|p| *p == path) {
                state.extensions.remove(pos);
            }
            Ok(())
        }
    }
}

//! In-memory database state and the mutations transactions perform on it.
//!
//! Runtime transactions and WAL replay drive the same methods here, so a
//! replayed record has exactly the effect the original operation had. Every
//! mutating method takes the acting transaction and its [`UndoBuffer`]; on
//! error it leaves neither the state nor the undo log changed.

use crate::catalog::{
    AlterInfo, Catalog, CatalogEntry, CatalogEntryKind, CatalogSetId, ColumnDef, NodeTableDef,
    RelTableDef, SequenceDef,
};
use crate::error::{CoreError, CoreResult};
use crate::serializer::{Deserializer, Serializer};
use crate::table::{group_ranges, offset_runs, TableStore};
use crate::types::{
    ColumnId, Direction, SequenceId, TableId, TableKind, Timestamp, TransactionId, Visibility,
};
use crate::undo::{DeleteOrigin, UndoBuffer, UndoEntry};
use crate::value::Value;
use std::collections::BTreeMap;

/// Runtime state of a sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceState {
    /// Number of values drawn so far.
    pub counter: u64,
}

impl SequenceState {
    /// The `n`th value (0-based) of a sequence.
    #[must_use]
    pub fn nth(def: &SequenceDef, n: u64) -> i64 {
        def.start.wrapping_add(def.increment.wrapping_mul(n as i64))
    }

    /// Last value drawn, if any.
    #[must_use]
    pub fn current(&self, def: &SequenceDef) -> Option<i64> {
        self.counter.checked_sub(1).map(|n| Self::nth(def, n))
    }
}

/// Catalog, table data, sequences and loaded extensions.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    pub(crate) catalog: Catalog,
    pub(crate) tables: BTreeMap<TableId, TableStore>,
    pub(crate) sequences: BTreeMap<SequenceId, SequenceState>,
    pub(crate) extensions: Vec<String>,
    pub(crate) last_commit_ts: Timestamp,
}

impl DatabaseState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Storage of a table.
    #[must_use]
    pub fn table_store(&self, id: TableId) -> Option<&TableStore> {
        self.tables.get(&id)
    }

    /// Loaded extensions, in load order.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Timestamp of the last commit.
    #[must_use]
    pub fn last_commit_ts(&self) -> Timestamp {
        self.last_commit_ts
    }

    /// State of a sequence.
    #[must_use]
    pub fn sequence_state(&self, id: SequenceId) -> Option<SequenceState> {
        self.sequences.get(&id).copied()
    }

    /// Looks up a table entry by name.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if no such table is visible.
    pub fn table_by_name(&self, name: &str, view: Visibility) -> CoreResult<&CatalogEntry> {
        self.catalog
            .get(CatalogSetId::Tables, name, view)
            .ok_or_else(|| CoreError::entry_not_found(name))
    }

    fn live_table(&self, txid: TransactionId, id: TableId) -> CoreResult<(&CatalogEntry, &TableStore)> {
        let entry = self
            .catalog
            .table(id, Visibility::Transaction(txid))
            .ok_or_else(|| CoreError::invalid_operation(format!("no table {id}")))?;
        let store = self
            .tables
            .get(&id)
            .ok_or_else(|| CoreError::invalid_operation(format!("{id} has no storage")))?;
        Ok((entry, store))
    }

    fn store_mut(&mut self, id: TableId) -> CoreResult<&mut TableStore> {
        self.tables
            .get_mut(&id)
            .ok_or_else(|| CoreError::invalid_operation(format!("{id} has no storage")))
    }

    // ---- DDL ----------------------------------------------------------

    /// Creates a node table. Returns its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or `primary_key` is not a key
    /// column.
    pub fn create_node_table(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: &str,
    ) -> CoreResult<TableId> {
        let pk = columns
            .iter()
            .position(|c| c.name == primary_key)
            .ok_or_else(|| CoreError::invalid_operation(format!("no column {primary_key}")))?;
        let id = TableId::new(self.catalog.next_oid());
        self.create_entry(
            txid,
            undo,
            CatalogEntry::NodeTable(NodeTableDef {
                id,
                name: name.to_string(),
                columns,
                primary_key: ColumnId::new(pk as u32),
            }),
        )?;
        Ok(id)
    }

    /// Creates a rel table between two node tables. Returns its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or an endpoint table is not a
    /// visible node table.
    pub fn create_rel_table(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        name: &str,
        src_table: &str,
        dst_table: &str,
        columns: Vec<ColumnDef>,
    ) -> CoreResult<TableId> {
        let view = Visibility::Transaction(txid);
        let src = self.table_by_name(src_table, view)?.oid();
        let dst = self.table_by_name(dst_table, view)?.oid();
        let id = TableId::new(self.catalog.next_oid());
        self.create_entry(
            txid,
            undo,
            CatalogEntry::RelTable(RelTableDef {
                id,
                name: name.to_string(),
                src_table: TableId::new(src),
                dst_table: TableId::new(dst),
                columns,
            }),
        )?;
        Ok(id)
    }

    /// Creates a sequence. Returns its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or `increment` is zero.
    pub fn create_sequence(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        name: &str,
        start: i64,
        increment: i64,
    ) -> CoreResult<SequenceId> {
        let id = SequenceId::new(self.catalog.next_oid());
        self.create_entry(
            txid,
            undo,
            CatalogEntry::Sequence(SequenceDef {
                id,
                name: name.to_string(),
                start,
                increment,
            }),
        )?;
        Ok(id)
    }

    /// Installs a catalog entry with the ID it carries and allocates its
    /// storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is malformed, its name is taken, or its
    /// ID is already in use.
    pub fn create_entry(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        entry: CatalogEntry,
    ) -> CoreResult<()> {
        let view = Visibility::Transaction(txid);
        if self.catalog.get_by_oid(entry.oid(), view).is_some() {
            return Err(CoreError::constraint(format!(
                "object id {} is already in use",
                entry.oid()
            )));
        }
        let store = match &entry {
            CatalogEntry::NodeTable(def) => Some(TableStore::node(
                def.id,
                def.columns.iter().map(|c| c.ty).collect(),
                def.primary_key,
            )?),
            CatalogEntry::RelTable(def) => {
                for end in [def.src_table, def.dst_table] {
                    match self.catalog.table(end, view) {
                        Some(CatalogEntry::NodeTable(_)) => {}
                        _ => {
                            return Err(CoreError::invalid_operation(format!(
                                "{end} is not a node table"
                            )))
                        }
                    }
                }
                Some(TableStore::rel(def.id, def.columns.iter().map(|c| c.ty).collect()))
            }
            CatalogEntry::Sequence(def) => {
                if def.increment == 0 {
                    return Err(CoreError::invalid_operation(format!(
                        "sequence {} has zero increment",
                        def.name
                    )));
                }
                None
            }
        };
        if let Some(id) = entry.table_id() {
            if self.tables.contains_key(&id) {
                return Err(CoreError::constraint(format!("{id} already has storage")));
            }
        }

        let set = entry.set();
        let name = entry.name().to_string();
        let oid = entry.oid();
        let (old, new) = self.catalog.create_entry(txid, entry)?;
        if let Err(e) = undo.record(UndoEntry::CatalogChange {
            set,
            name,
            old,
            new,
            alter: None,
        }) {
            self.catalog.rollback_version(new)?;
            return Err(e);
        }
        match store {
            Some(store) => {
                self.tables.insert(store.id(), store);
            }
            None => {
                self.sequences
                    .insert(SequenceId::new(oid), SequenceState::default());
            }
        }
        Ok(())
    }

    /// Drops a catalog entry by name. Storage is released at commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is missing, or if it is a node table
    /// that a visible rel table still references.
    pub fn drop_entry(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        set: CatalogSetId,
        name: &str,
    ) -> CoreResult<()> {
        let view = Visibility::Transaction(txid);
        let entry = self
            .catalog
            .get(set, name, view)
            .ok_or_else(|| CoreError::entry_not_found(name))?;
        if let CatalogEntry::NodeTable(def) = entry {
            let referenced = self.catalog.entries(CatalogSetId::Tables, view).into_iter().any(
                |e| matches!(e, CatalogEntry::RelTable(rel) if rel.src_table == def.id || rel.dst_table == def.id),
            );
            if referenced {
                return Err(CoreError::constraint(format!(
                    "{name} is referenced by a rel table"
                )));
            }
        }

        let (old, new) = self.catalog.drop_entry(txid, set, name)?;
        if let Err(e) = undo.record(UndoEntry::CatalogChange {
            set,
            name: name.to_string(),
            old: Some(old),
            new,
            alter: None,
        }) {
            self.catalog.rollback_version(new)?;
            return Err(e);
        }
        Ok(())
    }

    /// Drops a catalog entry by object ID, checking its kind.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry of that kind has the ID.
    pub fn drop_by_oid(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        oid: u64,
        kind: CatalogEntryKind,
    ) -> CoreResult<()> {
        let entry = self
            .catalog
            .get_by_oid(oid, Visibility::Transaction(txid))
            .ok_or_else(|| CoreError::invalid_operation(format!("no catalog entry {oid}")))?;
        if entry.kind() != kind {
            return Err(CoreError::invalid_operation(format!(
                "catalog entry {oid} is a {:?}, not a {kind:?}",
                entry.kind()
            )));
        }
        let name = entry.name().to_string();
        self.drop_entry(txid, undo, kind.set(), &name)
    }

    /// Alters a table.
    ///
    /// Adding a column to a table that holds uncommitted rows is refused:
    /// those rows would be logged with the final column set ahead of the
    /// alteration.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or the alteration does not
    /// fit it.
    pub fn alter(&mut self, txid: TransactionId, undo: &UndoBuffer, info: AlterInfo) -> CoreResult<()> {
        let table_id = info.table_id();
        let (entry, store) = self.live_table(txid, table_id)?;
        let altered = entry.altered(&info)?;
        let old_name = entry.name().to_string();

        match &info {
            AlterInfo::AddColumn { column, default, .. } => {
                if store.has_pending_rows() {
                    return Err(CoreError::invalid_operation(format!(
                        "{table_id} has uncommitted rows"
                    )));
                }
                if !default.conforms_to(column.ty) {
                    return Err(CoreError::invalid_operation(format!(
                        "default {default} is not a {}",
                        column.ty
                    )));
                }
                self.replace_with_alter(txid, undo, altered, &info)?;
                let ty = column.ty;
                let default = default.clone();
                self.store_mut(table_id)?.add_column(ty, &default)
            }
            AlterInfo::RenameColumn { .. } => self.replace_with_alter(txid, undo, altered, &info),
            AlterInfo::RenameTable { new_name, .. } => {
                let set = CatalogSetId::Tables;
                if self
                    .catalog
                    .get(set, new_name, Visibility::Transaction(txid))
                    .is_some()
                {
                    return Err(CoreError::constraint(format!("{new_name} already exists")));
                }
                let (old, tomb) = self.catalog.drop_entry(txid, set, &old_name)?;
                if let Err(e) = undo.record(UndoEntry::CatalogChange {
                    set,
                    name: old_name,
                    old: Some(old),
                    new: tomb,
                    alter: Some(info.clone()),
                }) {
                    self.catalog.rollback_version(tomb)?;
                    return Err(e);
                }
                let (old, new) = self.catalog.create_entry(txid, altered)?;
                undo.record(UndoEntry::CatalogChange {
                    set,
                    name: new_name.clone(),
                    old,
                    new,
                    alter: Some(info.clone()),
                })
                .or_else(|e| {
                    self.catalog.rollback_version(new)?;
                    Err(e)
                })
            }
        }
    }

    fn replace_with_alter(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        altered: CatalogEntry,
        info: &AlterInfo,
    ) -> CoreResult<()> {
        let set = altered.set();
        let name = altered.name().to_string();
        let (old, new) = self.catalog.replace_entry(txid, altered)?;
        if let Err(e) = undo.record(UndoEntry::CatalogChange {
            set,
            name,
            old: Some(old),
            new,
            alter: Some(info.clone()),
        }) {
            self.catalog.rollback_version(new)?;
            return Err(e);
        }
        Ok(())
    }

    // ---- DML ----------------------------------------------------------

    /// Appends rows to a table. Returns the offset of the first row.
    ///
    /// `endpoints` carries `(src, dst)` node offsets for rel tables and must
    /// be `None` for node tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing, a row is malformed, a key
    /// is duplicated, or a rel endpoint is not a live node.
    pub fn insert_rows(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        rows: &[Vec<Value>],
        endpoints: Option<&[(u64, u64)]>,
    ) -> CoreResult<u64> {
        let view = Visibility::Transaction(txid);
        let (entry, _) = self.live_table(txid, table_id)?;
        if let (CatalogEntry::RelTable(def), Some(ends)) = (entry, endpoints) {
            let src = self.tables.get(&def.src_table);
            let dst = self.tables.get(&def.dst_table);
            for &(s, d) in ends {
                let live = src.is_some_and(|t| t.is_visible(s, view))
                    && dst.is_some_and(|t| t.is_visible(d, view));
                if !live {
                    return Err(CoreError::constraint(format!(
                        "{table_id}: dangling rel endpoint ({s}, {d})"
                    )));
                }
            }
        }

        let store = self.store_mut(table_id)?;
        let start = store.insert_rows(txid, rows, endpoints)?;
        let len = rows.len() as u64;
        for (node_group, start_row, num_rows) in group_ranges(start, len) {
            let recorded = undo.record(UndoEntry::RowRangeInsert {
                table_id,
                node_group,
                start_row,
                num_rows,
            });
            if let Err(e) = recorded {
                let from = crate::table::join_offset(node_group, start_row);
                store.rollback_insert(from, start + len - from)?;
                return Err(e);
            }
        }
        Ok(start)
    }

    /// Appends rows given column-major, as a `TableInsertion` record carries
    /// them.
    ///
    /// # Errors
    ///
    /// As [`insert_rows`](Self::insert_rows), plus shape errors.
    pub fn insert_columns(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        kind: TableKind,
        num_rows: u64,
        columns: &[Vec<Value>],
    ) -> CoreResult<u64> {
        let (entry, _) = self.live_table(txid, table_id)?;
        let actual = match entry {
            CatalogEntry::RelTable(_) => TableKind::Rel,
            _ => TableKind::Node,
        };
        if actual != kind {
            return Err(CoreError::invalid_operation(format!(
                "{table_id} is a {actual:?} table"
            )));
        }
        let n = num_rows as usize;
        if columns.iter().any(|c| c.len() != n) {
            return Err(CoreError::invalid_operation("column batches differ in length"));
        }
        let (ends, props) = match kind {
            TableKind::Node => (None, columns),
            TableKind::Rel => {
                if columns.len() < 2 {
                    return Err(CoreError::invalid_operation("rel batch without endpoints"));
                }
                let offset = |v: &Value| {
                    v.as_i64()
                        .and_then(|o| u64::try_from(o).ok())
                        .ok_or_else(|| CoreError::invalid_operation(format!("bad node offset {v}")))
                };
                let ends = columns[0]
                    .iter()
                    .zip(&columns[1])
                    .map(|(s, d)| Ok((offset(s)?, offset(d)?)))
                    .collect::<CoreResult<Vec<_>>>()?;
                (Some(ends), &columns[2..])
            }
        };
        let rows: Vec<Vec<Value>> = (0..n)
            .map(|row| props.iter().map(|c| c[row].clone()).collect())
            .collect();
        self.insert_rows(txid, undo, table_id, &rows, ends.as_deref())
    }

    fn record_deletes(
        &mut self,
        undo: &UndoBuffer,
        table_id: TableId,
        offsets: &[u64],
        origin: DeleteOrigin,
    ) -> CoreResult<()> {
        for (run_start, run_len) in offset_runs(offsets) {
            for (node_group, start_row, num_rows) in group_ranges(run_start, run_len) {
                let recorded = undo.record(UndoEntry::RowRangeDelete {
                    table_id,
                    node_group,
                    start_row,
                    num_rows,
                    origin,
                });
                if let Err(e) = recorded {
                    let from = crate::table::join_offset(node_group, start_row);
                    let store = self.store_mut(table_id)?;
                    for &offset in offsets.iter().filter(|&&o| o >= from) {
                        store.rollback_delete(offset, 1);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn rel_tables_bound_to(&self, node_table: TableId, view: Visibility) -> Vec<(TableId, Direction)> {
        let mut bound = Vec::new();
        for entry in self.catalog.entries(CatalogSetId::Tables, view) {
            if let CatalogEntry::RelTable(def) = entry {
                if def.src_table == node_table {
                    bound.push((def.id, Direction::Forward));
                }
                if def.dst_table == node_table {
                    bound.push((def.id, Direction::Backward));
                }
            }
        }
        bound
    }

    /// Deletes a node that has no live rels.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if rels are still bound to the node.
    pub fn delete_node(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        node_offset: u64,
    ) -> CoreResult<()> {
        let view = Visibility::Transaction(txid);
        let (entry, _) = self.live_table(txid, table_id)?;
        if !matches!(entry, CatalogEntry::NodeTable(_)) {
            return Err(CoreError::invalid_operation(format!("{table_id} is not a node table")));
        }
        for (rel, direction) in self.rel_tables_bound_to(table_id, view) {
            let bound = self
                .tables
                .get(&rel)
                .is_some_and(|t| !t.bound_rels(direction, node_offset, view).is_empty());
            if bound {
                return Err(CoreError::constraint(format!(
                    "node {node_offset} of {table_id} still has rels in {rel}"
                )));
            }
        }
        self.store_mut(table_id)?.delete_row(txid, node_offset)?;
        self.record_deletes(undo, table_id, &[node_offset], DeleteOrigin::Explicit)
    }

    /// Deletes a node together with every rel bound to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not live.
    pub fn detach_delete_node(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        node_offset: u64,
    ) -> CoreResult<()> {
        let view = Visibility::Transaction(txid);
        let (_, store) = self.live_table(txid, table_id)?;
        if !store.is_visible(node_offset, view) {
            return Err(CoreError::invalid_operation(format!(
                "{table_id}: row {node_offset} is not live"
            )));
        }
        for (rel, direction) in self.rel_tables_bound_to(table_id, view) {
            self.detach_rels(txid, undo, rel, direction, node_offset)?;
        }
        self.delete_node(txid, undo, table_id, node_offset)
    }

    /// Deletes one rel.
    ///
    /// # Errors
    ///
    /// Returns an error if the rel is not live.
    pub fn delete_rel(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        rel_id: u64,
    ) -> CoreResult<()> {
        let (entry, _) = self.live_table(txid, table_id)?;
        if !matches!(entry, CatalogEntry::RelTable(_)) {
            return Err(CoreError::invalid_operation(format!("{table_id} is not a rel table")));
        }
        self.store_mut(table_id)?.delete_row(txid, rel_id)?;
        self.record_deletes(undo, table_id, &[rel_id], DeleteOrigin::Explicit)
    }

    /// Deletes every live rel bound to `node_offset` at the given end.
    /// Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or not a rel table.
    pub fn detach_rels(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        direction: Direction,
        node_offset: u64,
    ) -> CoreResult<u64> {
        let view = Visibility::Transaction(txid);
        let (entry, store) = self.live_table(txid, table_id)?;
        if !matches!(entry, CatalogEntry::RelTable(_)) {
            return Err(CoreError::invalid_operation(format!("{table_id} is not a rel table")));
        }
        let rels = store.bound_rels(direction, node_offset, view);
        let store = self.store_mut(table_id)?;
        for &rel in &rels {
            store.delete_row(txid, rel)?;
        }
        self.record_deletes(
            undo,
            table_id,
            &rels,
            DeleteOrigin::Detach {
                direction,
                node_offset,
            },
        )?;
        Ok(rels.len() as u64)
    }

    /// Sets a property. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not live or the value does not fit
    /// the column.
    pub fn update(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        table_id: TableId,
        column_id: ColumnId,
        row: u64,
        value: Value,
    ) -> CoreResult<Value> {
        self.live_table(txid, table_id)?;
        let store = self.store_mut(table_id)?;
        let old = store.update(txid, column_id, row, value)?;
        if let Err(e) = undo.record(UndoEntry::ColumnValueUpdate {
            table_id,
            column_id,
            row,
            old: old.clone(),
        }) {
            store.rollback_update(column_id, row, old);
            return Err(e);
        }
        Ok(old)
    }

    /// Draws `count` values from a sequence. Returns them in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence is missing.
    pub fn next_values(
        &mut self,
        txid: TransactionId,
        undo: &UndoBuffer,
        sequence_id: SequenceId,
        count: u64,
    ) -> CoreResult<Vec<i64>> {
        let def = match self
            .catalog
            .get_by_oid(sequence_id.as_u64(), Visibility::Transaction(txid))
        {
            Some(CatalogEntry::Sequence(def)) => def.clone(),
            _ => {
                return Err(CoreError::invalid_operation(format!(
                    "no sequence {sequence_id}"
                )))
            }
        };
        let state = self
            .sequences
            .get_mut(&sequence_id)
            .ok_or_else(|| CoreError::invalid_operation(format!("{sequence_id} has no state")))?;
        let rollback = *state;
        undo.record(UndoEntry::SequenceChange {
            sequence_id,
            rollback,
            count,
        })?;
        state.counter += count;
        Ok((rollback.counter..state.counter)
            .map(|n| SequenceState::nth(&def, n))
            .collect())
    }

    /// Records an extension load.
    ///
    /// # Errors
    ///
    /// Returns an error if the undo log is full.
    pub fn load_extension(
        &mut self,
        _txid: TransactionId,
        undo: &UndoBuffer,
        path: &str,
    ) -> CoreResult<()> {
        undo.record(UndoEntry::ExtensionLoad {
            path: path.to_string(),
        })?;
        self.extensions.push(path.to_string());
        Ok(())
    }

    // ---- snapshot -----------------------------------------------------

    /// Serializes the committed state.
    ///
    /// Callers hold the writer lease, so nothing is pending.
    #[must_use]
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let mut s = Serializer::new();
        s.write_u64(self.catalog.next_oid());
        s.write_u64(self.last_commit_ts.as_u64());
        s.write_vec(&self.catalog.committed_entries());
        s.write_u64(self.tables.len() as u64);
        for table in self.tables.values() {
            table.encode_snapshot(&mut s);
        }
        s.write_u64(self.sequences.len() as u64);
        for (id, state) in &self.sequences {
            s.write(id);
            s.write_u64(state.counter);
        }
        s.write_vec(&self.extensions);
        s.into_bytes()
    }

    /// Rebuilds state from [`encode_snapshot`](Self::encode_snapshot) output.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the bytes are malformed or inconsistent.
    pub fn decode_snapshot(bytes: &[u8]) -> CoreResult<Self> {
        let mut d = Deserializer::from_slice(bytes);
        let next_oid = d.read_u64()?;
        let ts = Timestamp::new(d.read_u64()?);
        let entries: Vec<CatalogEntry> = d.read_vec()?;

        let mut tables = BTreeMap::new();
        for _ in 0..d.read_u64()? {
            let table = TableStore::decode_snapshot(&mut d, ts)?;
            tables.insert(table.id(), table);
        }
        let mut sequences = BTreeMap::new();
        for _ in 0..d.read_u64()? {
            let id: SequenceId = d.read()?;
            sequences.insert(id, SequenceState { counter: d.read_u64()? });
        }
        let extensions: Vec<String> = d.read_vec()?;
        if !d.is_finished() {
            return Err(CoreError::invalid_format("trailing bytes after snapshot"));
        }

        for entry in &entries {
            let has_storage = match entry {
                CatalogEntry::Sequence(def) => sequences.contains_key(&def.id),
                _ => entry.table_id().is_some_and(|id| tables.contains_key(&id)),
            };
            if !has_storage {
                return Err(CoreError::invalid_format(format!(
                    "catalog entry {} has no storage",
                    entry.name()
                )));
            }
        }

        Ok(Self {
            catalog: Catalog::from_committed(entries, next_oid, ts),
            tables,
            sequences,
            extensions,
            last_commit_ts: ts,
        })
    }
}

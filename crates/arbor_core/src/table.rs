//! In-memory columnar table storage with row versions.
//!
//! Rows are append-only and addressed by offset. Offsets are grouped into
//! node groups of [`NODE_GROUP_SIZE`] rows; undo entries name a node group
//! and a row range inside it. A row is never physically removed once
//! committed: a committed delete leaves a tombstone so later offsets keep
//! their meaning across checkpoints and WAL replay.
//!
//! Uncommitted property updates are written in place. The committed value is
//! parked in an override map until the writer commits or rolls back, so
//! committed readers never observe it.

use crate::error::{CoreError, CoreResult};
use crate::serializer::{Decode, Deserializer, Encode, Reader, Serializer};
use crate::types::{ColumnId, Direction, Stamp, TableId, TableKind, Timestamp, TransactionId, Visibility};
use crate::value::{LogicalType, Value};
use std::collections::HashMap;

/// Rows per node group.
pub const NODE_GROUP_SIZE: u64 = 2048;

/// Splits an offset into `(node_group, row_in_group)`.
#[must_use]
pub const fn split_offset(offset: u64) -> (u64, u64) {
    (offset / NODE_GROUP_SIZE, offset % NODE_GROUP_SIZE)
}

/// Inverse of [`split_offset`].
#[must_use]
pub const fn join_offset(node_group: u64, row: u64) -> u64 {
    node_group * NODE_GROUP_SIZE + row
}

/// Splits `[start, start + len)` at node group boundaries.
///
/// Yields `(node_group, start_row, num_rows)` triples.
pub fn group_ranges(start: u64, len: u64) -> impl Iterator<Item = (u64, u64, u64)> {
    let end = start + len;
    let mut cursor = start;
    std::iter::from_fn(move || {
        if cursor >= end {
            return None;
        }
        let (group, row) = split_offset(cursor);
        let n = (NODE_GROUP_SIZE - row).min(end - cursor);
        cursor += n;
        Some((group, row, n))
    })
}

/// Collapses sorted offsets into `(start, len)` runs.
#[must_use]
pub fn offset_runs(offsets: &[u64]) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &offset in offsets {
        match runs.last_mut() {
            Some((start, len)) if *start + *len == offset => *len += 1,
            _ => runs.push((offset, 1)),
        }
    }
    runs
}

/// Hashable form of a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyValue {
    Int(i64),
    Str(String),
}

impl KeyValue {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int64(v) => Some(Self::Int(*v)),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RowVersion {
    inserted: Stamp,
    deleted: Option<Stamp>,
}

impl RowVersion {
    fn visible_to(&self, view: Visibility) -> bool {
        self.inserted.visible_to(view) && !self.deleted.is_some_and(|d| d.visible_to(view))
    }
}

/// Storage for one node or rel table.
#[derive(Debug, Clone)]
pub struct TableStore {
    id: TableId,
    kind: TableKind,
    types: Vec<LogicalType>,
    columns: Vec<Vec<Value>>,
    src: Vec<u64>,
    dst: Vec<u64>,
    versions: Vec<RowVersion>,
    primary_key: Option<usize>,
    pk_index: HashMap<KeyValue, u64>,
    committed_overrides: HashMap<(usize, u64), Value>,
}

impl TableStore {
    /// Creates an empty node table.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary key column is missing or not a key
    /// type.
    pub fn node(id: TableId, types: Vec<LogicalType>, primary_key: ColumnId) -> CoreResult<Self> {
        let ty = types
            .get(primary_key.index())
            .ok_or_else(|| CoreError::invalid_operation(format!("no primary key column {}", primary_key.0)))?;
        if !ty.is_key_type() {
            return Err(CoreError::invalid_operation(format!(
                "{ty} cannot be a primary key"
            )));
        }
        Ok(Self::empty(id, TableKind::Node, types, Some(primary_key.index())))
    }

    /// Creates an empty rel table.
    #[must_use]
    pub fn rel(id: TableId, types: Vec<LogicalType>) -> Self {
        Self::empty(id, TableKind::Rel, types, None)
    }

    fn empty(id: TableId, kind: TableKind, types: Vec<LogicalType>, primary_key: Option<usize>) -> Self {
        let columns = vec![Vec::new(); types.len()];
        Self {
            id,
            kind,
            types,
            columns,
            src: Vec::new(),
            dst: Vec::new(),
            versions: Vec::new(),
            primary_key,
            pk_index: HashMap::new(),
            committed_overrides: HashMap::new(),
        }
    }

    /// Table ID.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Node or rel.
    #[must_use]
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Property column types.
    #[must_use]
    pub fn column_types(&self) -> &[LogicalType] {
        &self.types
    }

    /// Number of allocated rows, including tombstones and pending rows.
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        self.versions.len() as u64
    }

    /// Whether any row carries an uncommitted insert or delete.
    #[must_use]
    pub fn has_pending_rows(&self) -> bool {
        self.versions.iter().any(|v| {
            !v.inserted.is_committed() || v.deleted.is_some_and(|d| !d.is_committed())
        })
    }

    fn version(&self, row: u64) -> CoreResult<&RowVersion> {
        self.versions.get(row as usize).ok_or_else(|| {
            CoreError::invalid_operation(format!("{}: row {row} out of range", self.id))
        })
    }

    /// Whether `row` exists and is live for `view`.
    #[must_use]
    pub fn is_visible(&self, row: u64, view: Visibility) -> bool {
        self.versions
            .get(row as usize)
            .is_some_and(|v| v.visible_to(view))
    }

    fn check_row(&self, values: &[Value]) -> CoreResult<()> {
        if values.len() != self.types.len() {
            return Err(CoreError::invalid_operation(format!(
                "{}: expected {} values, got {}",
                self.id,
                self.types.len(),
                values.len()
            )));
        }
        for (value, ty) in values.iter().zip(&self.types) {
            if !value.conforms_to(*ty) {
                return Err(CoreError::invalid_operation(format!(
                    "{}: {value} is not a {ty}",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Appends rows for `txid`. Returns the offset of the first row.
    ///
    /// `rows` are row-major property values. `endpoints` must be given for
    /// rel tables (one `(src, dst)` per row) and omitted for node tables;
    /// endpoint liveness is checked by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error on arity or type mismatch, or a duplicate or null
    /// primary key. Nothing is appended on error.
    pub fn insert_rows(
        &mut self,
        txid: TransactionId,
        rows: &[Vec<Value>],
        endpoints: Option<&[(u64, u64)]>,
    ) -> CoreResult<u64> {
        match (self.kind, endpoints) {
            (TableKind::Rel, Some(ends)) if ends.len() == rows.len() => {}
            (TableKind::Node, None) => {}
            _ => {
                return Err(CoreError::invalid_operation(format!(
                    "{}: endpoints do not match table kind",
                    self.id
                )))
            }
        }
        for row in rows {
            self.check_row(row)?;
        }

        let mut keys = Vec::new();
        if let Some(pk) = self.primary_key {
            for row in rows {
                let key = KeyValue::from_value(&row[pk]).ok_or_else(|| {
                    CoreError::constraint(format!("{}: primary key cannot be null", self.id))
                })?;
                if self.pk_index.contains_key(&key) || keys.contains(&key) {
                    return Err(CoreError::constraint(format!(
                        "{}: duplicate primary key {}",
                        self.id, row[pk]
                    )));
                }
                keys.push(key);
            }
        }

        let start = self.num_rows();
        for (i, row) in rows.iter().enumerate() {
            for (column, value) in self.columns.iter_mut().zip(row) {
                column.push(value.clone());
            }
            if let Some(ends) = endpoints {
                self.src.push(ends[i].0);
                self.dst.push(ends[i].1);
            }
            self.versions.push(RowVersion {
                inserted: Stamp::Pending(txid),
                deleted: None,
            });
        }
        for (i, key) in keys.into_iter().enumerate() {
            self.pk_index.insert(key, start + i as u64);
        }
        Ok(start)
    }

    /// Marks a live row deleted by `txid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not live for `txid`.
    pub fn delete_row(&mut self, txid: TransactionId, row: u64) -> CoreResult<()> {
        if !self.is_visible(row, Visibility::Transaction(txid)) {
            return Err(CoreError::invalid_operation(format!(
                "{}: row {row} is not live",
                self.id
            )));
        }
        if let Some(pk) = self.primary_key {
            if let Some(key) = KeyValue::from_value(&self.columns[pk][row as usize]) {
                self.pk_index.remove(&key);
            }
        }
        self.versions[row as usize].deleted = Some(Stamp::Pending(txid));
        Ok(())
    }

    /// Sets a property of a live row. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not live, the column is missing, the
    /// value has the wrong type, or the column is the primary key.
    pub fn update(
        &mut self,
        txid: TransactionId,
        column: ColumnId,
        row: u64,
        value: Value,
    ) -> CoreResult<Value> {
        let col = column.index();
        let ty = *self.types.get(col).ok_or_else(|| {
            CoreError::invalid_operation(format!("{}: no column {}", self.id, column.0))
        })?;
        if self.primary_key == Some(col) {
            return Err(CoreError::invalid_operation(format!(
                "{}: primary key is not updatable",
                self.id
            )));
        }
        if !value.conforms_to(ty) {
            return Err(CoreError::invalid_operation(format!(
                "{}: {value} is not a {ty}",
                self.id
            )));
        }
        if !self.is_visible(row, Visibility::Transaction(txid)) {
            return Err(CoreError::invalid_operation(format!(
                "{}: row {row} is not live",
                self.id
            )));
        }
        let old = std::mem::replace(&mut self.columns[col][row as usize], value);
        if self.versions[row as usize].inserted.is_committed() {
            self.committed_overrides
                .entry((col, row))
                .or_insert_with(|| old.clone());
        }
        Ok(old)
    }

    /// Reverts an insert by truncating the rows it appended.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the range is not the uncommitted tail.
    pub fn rollback_insert(&mut self, start: u64, len: u64) -> CoreResult<()> {
        if start + len != self.num_rows() {
            return Err(CoreError::invalid_operation(format!(
                "{}: insert rollback of rows {start}..{} is not at the tail",
                self.id,
                start + len
            )));
        }
        if let Some(pk) = self.primary_key {
            for row in start..start + len {
                let live = self.versions[row as usize].deleted.is_none();
                if let Some(key) = KeyValue::from_value(&self.columns[pk][row as usize]) {
                    if live {
                        self.pk_index.remove(&key);
                    }
                }
            }
        }
        let keep = start as usize;
        for column in &mut self.columns {
            column.truncate(keep);
        }
        if self.kind == TableKind::Rel {
            self.src.truncate(keep);
            self.dst.truncate(keep);
        }
        self.versions.truncate(keep);
        Ok(())
    }

    /// Clears pending delete marks in a range.
    pub fn rollback_delete(&mut self, start: u64, len: u64) {
        for row in start..(start + len).min(self.num_rows()) {
            let version = &mut self.versions[row as usize];
            if version.deleted.is_some_and(|d| !d.is_committed()) {
                version.deleted = None;
                if let Some(pk) = self.primary_key {
                    if let Some(key) = KeyValue::from_value(&self.columns[pk][row as usize]) {
                        self.pk_index.insert(key, row);
                    }
                }
            }
        }
    }

    /// Restores a value overwritten by [`update`](Self::update).
    pub fn rollback_update(&mut self, column: ColumnId, row: u64, old: Value) {
        let col = column.index();
        if self.committed_overrides.get(&(col, row)) == Some(&old) {
            self.committed_overrides.remove(&(col, row));
        }
        if let Some(cell) = self.columns.get_mut(col).and_then(|c| c.get_mut(row as usize)) {
            *cell = old;
        }
    }

    /// Stamps inserted rows committed.
    pub fn commit_insert(&mut self, start: u64, len: u64, ts: Timestamp) {
        for version in self.range_mut(start, len) {
            version.inserted = Stamp::Committed(ts);
        }
    }

    /// Stamps deleted rows committed.
    pub fn commit_delete(&mut self, start: u64, len: u64, ts: Timestamp) {
        for version in self.range_mut(start, len) {
            if version.deleted.is_some() {
                version.deleted = Some(Stamp::Committed(ts));
            }
        }
    }

    /// Publishes an in-place update.
    pub fn commit_update(&mut self, column: ColumnId, row: u64) {
        self.committed_overrides.remove(&(column.index(), row));
    }

    fn range_mut(&mut self, start: u64, len: u64) -> impl Iterator<Item = &mut RowVersion> {
        let end = ((start + len) as usize).min(self.versions.len());
        let start = (start as usize).min(end);
        self.versions[start..end].iter_mut()
    }

    /// Latest value of one cell, including uncommitted writes.
    #[must_use]
    pub fn cell(&self, column: ColumnId, row: u64) -> Option<&Value> {
        self.columns.get(column.index())?.get(row as usize)
    }

    /// Value of one cell, as seen by `view`.
    #[must_use]
    pub fn value(&self, column: ColumnId, row: u64, view: Visibility) -> Option<&Value> {
        if view == Visibility::Committed {
            if let Some(old) = self.committed_overrides.get(&(column.index(), row)) {
                return Some(old);
            }
        }
        self.cell(column, row)
    }

    /// Raw property values of a row regardless of visibility.
    ///
    /// Used when logging rows that a transaction deleted.
    #[must_use]
    pub fn raw_row(&self, row: u64) -> Option<Vec<Value>> {
        let row = row as usize;
        if row >= self.versions.len() {
            return None;
        }
        Some(self.columns.iter().map(|c| c[row].clone()).collect())
    }

    /// Property values of a live row.
    #[must_use]
    pub fn row(&self, row: u64, view: Visibility) -> Option<Vec<Value>> {
        if !self.is_visible(row, view) {
            return None;
        }
        (0..self.types.len())
            .map(|col| self.value(ColumnId::new(col as u32), row, view).cloned())
            .collect()
    }

    /// `(src, dst)` of a rel row regardless of visibility.
    #[must_use]
    pub fn endpoints(&self, row: u64) -> Option<(u64, u64)> {
        let row = row as usize;
        Some((*self.src.get(row)?, *self.dst.get(row)?))
    }

    /// Offsets of live rows.
    pub fn live_rows(&self, view: Visibility) -> impl Iterator<Item = u64> + '_ {
        self.versions
            .iter()
            .enumerate()
            .filter(move |(_, v)| v.visible_to(view))
            .map(|(i, _)| i as u64)
    }

    /// Number of live rows.
    #[must_use]
    pub fn count(&self, view: Visibility) -> u64 {
        self.live_rows(view).count() as u64
    }

    /// Finds a live node by primary key.
    #[must_use]
    pub fn lookup(&self, key: &Value, view: Visibility) -> Option<u64> {
        let pk = self.primary_key?;
        if let Some(row) = KeyValue::from_value(key).and_then(|k| self.pk_index.get(&k)) {
            if self.is_visible(*row, view) {
                return Some(*row);
            }
        }
        // The index tracks the writer's view; committed readers may still
        // see a row the writer deleted.
        self.live_rows(view)
            .find(|&row| self.columns[pk][row as usize] == *key)
    }

    /// Primary key value of a row regardless of visibility.
    #[must_use]
    pub fn primary_key_of(&self, row: u64) -> Option<&Value> {
        self.columns.get(self.primary_key?)?.get(row as usize)
    }

    /// Live rels bound to `node` at the given end.
    #[must_use]
    pub fn bound_rels(&self, direction: Direction, node: u64, view: Visibility) -> Vec<u64> {
        let ends = match direction {
            Direction::Forward => &self.src,
            Direction::Backward => &self.dst,
        };
        self.live_rows(view)
            .filter(|&row| ends[row as usize] == node)
            .collect()
    }

    /// Appends a property column, filling existing rows with `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if `default` does not have type `ty`.
    pub fn add_column(&mut self, ty: LogicalType, default: &Value) -> CoreResult<()> {
        if !default.conforms_to(ty) {
            return Err(CoreError::invalid_operation(format!(
                "{}: default {default} is not a {ty}",
                self.id
            )));
        }
        self.types.push(ty);
        self.columns
            .push(vec![default.clone(); self.versions.len()]);
        Ok(())
    }

    /// Removes the last property column.
    pub fn remove_last_column(&mut self) {
        self.types.pop();
        self.columns.pop();
    }

    /// Rebuilds the primary key index from live-or-pending rows.
    fn rebuild_index(&mut self) {
        self.pk_index.clear();
        if let Some(pk) = self.primary_key {
            for (row, version) in self.versions.iter().enumerate() {
                if version.deleted.is_none() {
                    if let Some(key) = KeyValue::from_value(&self.columns[pk][row]) {
                        self.pk_index.insert(key, row as u64);
                    }
                }
            }
        }
    }

    /// Serializes the committed image. Must not hold pending changes.
    pub(crate) fn encode_snapshot(&self, s: &mut Serializer) {
        s.write(&self.id);
        s.write(&self.kind);
        s.write_vec(&self.types);
        s.write_option(self.primary_key.map(|pk| pk as u64).as_ref());
        s.write_u64(self.num_rows());
        for (row, version) in self.versions.iter().enumerate() {
            s.write_bool(version.deleted.is_some());
            if self.kind == TableKind::Rel {
                s.write_u64(self.src[row]);
                s.write_u64(self.dst[row]);
            }
        }
        for column in &self.columns {
            for value in column {
                s.write(value);
            }
        }
    }

    /// Inverse of [`encode_snapshot`](Self::encode_snapshot); every row is
    /// stamped `ts`.
    pub(crate) fn decode_snapshot<R: Reader>(
        d: &mut Deserializer<R>,
        ts: Timestamp,
    ) -> CoreResult<Self> {
        let id: TableId = d.read()?;
        let kind: TableKind = d.read()?;
        let types: Vec<LogicalType> = d.read_vec()?;
        let primary_key: Option<u64> = d.read_option()?;
        let mut table = Self::empty(id, kind, types, primary_key.map(|pk| pk as usize));
        if table.primary_key.is_some_and(|pk| pk >= table.types.len()) {
            return Err(CoreError::invalid_format(format!("{id}: bad primary key")));
        }

        let rows = d.read_u64()?;
        for _ in 0..rows {
            let deleted = d.read_bool()?;
            if kind == TableKind::Rel {
                table.src.push(d.read_u64()?);
                table.dst.push(d.read_u64()?);
            }
            table.versions.push(RowVersion {
                inserted: Stamp::Committed(ts),
                deleted: deleted.then_some(Stamp::Committed(ts)),
            });
        }
        for column in &mut table.columns {
            for _ in 0..rows {
                column.push(d.read()?);
            }
        }
        table.rebuild_index();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);

    fn person() -> TableStore {
        TableStore::node(
            TableId::new(5),
            vec![LogicalType::Int64, LogicalType::String],
            ColumnId::new(0),
        )
        .unwrap()
    }

    fn rows(ids: &[i64]) -> Vec<Vec<Value>> {
        ids.iter()
            .map(|&id| vec![Value::Int64(id), Value::from(format!("p{id}"))])
            .collect()
    }

    #[test]
    fn group_ranges_split_at_boundaries() {
        let ranges: Vec<_> = group_ranges(2040, 20).collect();
        assert_eq!(ranges, vec![(0, 2040, 8), (1, 0, 12)]);
        assert_eq!(join_offset(1, 0), NODE_GROUP_SIZE);
    }

    #[test]
    fn offset_runs_merge_consecutive_offsets() {
        assert_eq!(offset_runs(&[1, 2, 3, 7, 9, 10]), vec![(1, 3), (7, 1), (9, 2)]);
        assert!(offset_runs(&[]).is_empty());
    }

    #[test]
    fn pending_rows_are_private() {
        let mut table = person();
        let start = table.insert_rows(T1, &rows(&[1, 2]), None).unwrap();
        assert_eq!(start, 0);
        assert_eq!(table.count(Visibility::Transaction(T1)), 2);
        assert_eq!(table.count(Visibility::Committed), 0);
        assert_eq!(table.count(Visibility::Transaction(T2)), 0);

        table.commit_insert(0, 2, Timestamp::new(1));
        assert_eq!(table.count(Visibility::Committed), 2);
        assert!(!table.has_pending_rows());
    }

    #[test]
    fn duplicate_primary_key_rejected() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1]), None).unwrap();
        let err = table.insert_rows(T1, &rows(&[2, 1]), None).unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert_eq!(table.num_rows(), 1);

        let err = table.insert_rows(T1, &rows(&[3, 3]), None).unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    }

    #[test]
    fn wrong_arity_and_type_rejected() {
        let mut table = person();
        assert!(table.insert_rows(T1, &[vec![Value::Int64(1)]], None).is_err());
        let bad = vec![vec![Value::from("x"), Value::from("y")]];
        assert!(table.insert_rows(T1, &bad, None).is_err());
    }

    #[test]
    fn rollback_insert_truncates_tail() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1, 2]), None).unwrap();
        table.commit_insert(0, 2, Timestamp::new(1));
        table.insert_rows(T2, &rows(&[3]), None).unwrap();

        assert!(table.rollback_insert(0, 2).is_err());
        table.rollback_insert(2, 1).unwrap();
        assert_eq!(table.num_rows(), 2);

        // The key is free again.
        table.insert_rows(T2, &rows(&[3]), None).unwrap();
    }

    #[test]
    fn delete_then_rollback_restores_row_and_key() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1]), None).unwrap();
        table.commit_insert(0, 1, Timestamp::new(1));

        table.delete_row(T2, 0).unwrap();
        assert!(!table.is_visible(0, Visibility::Transaction(T2)));
        assert!(table.is_visible(0, Visibility::Committed));
        assert_eq!(table.lookup(&Value::Int64(1), Visibility::Committed), Some(0));
        assert!(table.delete_row(T2, 0).is_err());

        table.rollback_delete(0, 1);
        assert!(table.is_visible(0, Visibility::Transaction(T2)));
        assert!(table.insert_rows(T2, &rows(&[1]), None).is_err());
    }

    #[test]
    fn uncommitted_update_hidden_from_committed_view() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1]), None).unwrap();
        table.commit_insert(0, 1, Timestamp::new(1));

        let name = ColumnId::new(1);
        let old = table.update(T2, name, 0, Value::from("renamed")).unwrap();
        assert_eq!(old, Value::from("p1"));
        assert_eq!(table.value(name, 0, Visibility::Committed), Some(&Value::from("p1")));
        assert_eq!(
            table.value(name, 0, Visibility::Transaction(T2)),
            Some(&Value::from("renamed"))
        );

        table.rollback_update(name, 0, old);
        assert_eq!(
            table.value(name, 0, Visibility::Transaction(T2)),
            Some(&Value::from("p1"))
        );
    }

    #[test]
    fn primary_key_is_not_updatable() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1]), None).unwrap();
        assert!(table.update(T1, ColumnId::new(0), 0, Value::Int64(9)).is_err());
    }

    #[test]
    fn bound_rels_follow_direction() {
        let mut knows = TableStore::rel(TableId::new(6), vec![LogicalType::Int64]);
        let props = vec![vec![Value::Int64(2020)]; 3];
        knows
            .insert_rows(T1, &props, Some(&[(0, 1), (0, 2), (1, 0)]))
            .unwrap();
        let view = Visibility::Transaction(T1);
        assert_eq!(knows.bound_rels(Direction::Forward, 0, view), vec![0, 1]);
        assert_eq!(knows.bound_rels(Direction::Backward, 0, view), vec![2]);
        assert!(knows.insert_rows(T1, &props[..1], None).is_err());
    }

    #[test]
    fn snapshot_keeps_tombstones() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1, 2, 3]), None).unwrap();
        table.commit_insert(0, 3, Timestamp::new(1));
        table.delete_row(T2, 1).unwrap();
        table.commit_delete(1, 1, Timestamp::new(2));

        let mut s = Serializer::new();
        table.encode_snapshot(&mut s);
        let bytes = s.into_bytes();
        let mut d = Deserializer::from_slice(&bytes);
        let restored = TableStore::decode_snapshot(&mut d, Timestamp::new(2)).unwrap();

        assert_eq!(restored.num_rows(), 3);
        assert_eq!(restored.count(Visibility::Committed), 2);
        assert_eq!(restored.lookup(&Value::Int64(3), Visibility::Committed), Some(2));
        assert_eq!(restored.lookup(&Value::Int64(2), Visibility::Committed), None);
    }

    #[test]
    fn add_column_backfills_default() {
        let mut table = person();
        table.insert_rows(T1, &rows(&[1]), None).unwrap();
        table.add_column(LogicalType::Bool, &Value::Bool(false)).unwrap();
        assert_eq!(table.row(0, Visibility::Transaction(T1)).unwrap().len(), 3);
        table.remove_last_column();
        assert_eq!(table.column_types().len(), 2);
    }
}

//! Versioned catalog of tables and sequences.
//!
//! Every named entry owns a version chain. Versions live in an arena and are
//! addressed by [`VersionHandle`]; a chain link is a handle, never a
//! reference, so an undo entry can name "the version I created" and still be
//! resolved safely after other versions come and go.
//!
//! ```text
//! heads["person"] ──► v7 (Pending txn:3, live)
//!                       │ prev
//!                       ▼
//!                     v2 (Committed ts:5, live)
//! ```
//!
//! A drop installs a tombstone version (no entry). Rollback pops the head
//! version; commit stamps it and frees the committed version it supersedes,
//! since readers only ever observe the latest committed version.

use crate::error::{CoreError, CoreResult};
use crate::serializer::{Decode, Deserializer, Encode, Reader, Serializer};
use crate::types::{ColumnId, SequenceId, Stamp, TableId, Timestamp, TransactionId, Visibility};
use crate::value::{LogicalType, Value};
use std::collections::BTreeMap;

/// The catalog sets. Names are unique within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogSetId {
    /// Node and rel tables.
    Tables,
    /// Sequences.
    Sequences,
}

impl CatalogSetId {
    const fn index(self) -> usize {
        match self {
            Self::Tables => 0,
            Self::Sequences => 1,
        }
    }
}

/// Kind of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogEntryKind {
    /// A node table.
    NodeTable,
    /// A rel table.
    RelTable,
    /// A sequence.
    Sequence,
}

impl CatalogEntryKind {
    /// The set entries of this kind live in.
    #[must_use]
    pub const fn set(self) -> CatalogSetId {
        match self {
            Self::NodeTable | Self::RelTable => CatalogSetId::Tables,
            Self::Sequence => CatalogSetId::Sequences,
        }
    }
}

/// A property column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: LogicalType,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Definition of a node table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTableDef {
    /// Table ID.
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Property columns.
    pub columns: Vec<ColumnDef>,
    /// Primary key column.
    pub primary_key: ColumnId,
}

/// Definition of a rel table.
#[derive(Debug, Clone, PartialEq)]
pub struct RelTableDef {
    /// Table ID.
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Node table of the source endpoint.
    pub src_table: TableId,
    /// Node table of the destination endpoint.
    pub dst_table: TableId,
    /// Property columns.
    pub columns: Vec<ColumnDef>,
}

/// Definition of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDef {
    /// Sequence ID.
    pub id: SequenceId,
    /// Sequence name.
    pub name: String,
    /// First value returned.
    pub start: i64,
    /// Step between values.
    pub increment: i64,
}

/// A catalog object.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    /// Node table.
    NodeTable(NodeTableDef),
    /// Rel table.
    RelTable(RelTableDef),
    /// Sequence.
    Sequence(SequenceDef),
}

impl CatalogEntry {
    /// Entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NodeTable(def) => &def.name,
            Self::RelTable(def) => &def.name,
            Self::Sequence(def) => &def.name,
        }
    }

    /// Object ID (table or sequence ID).
    #[must_use]
    pub fn oid(&self) -> u64 {
        match self {
            Self::NodeTable(def) => def.id.as_u64(),
            Self::RelTable(def) => def.id.as_u64(),
            Self::Sequence(def) => def.id.as_u64(),
        }
    }

    /// Entry kind.
    #[must_use]
    pub fn kind(&self) -> CatalogEntryKind {
        match self {
            Self::NodeTable(_) => CatalogEntryKind::NodeTable,
            Self::RelTable(_) => CatalogEntryKind::RelTable,
            Self::Sequence(_) => CatalogEntryKind::Sequence,
        }
    }

    /// Set the entry belongs to.
    #[must_use]
    pub fn set(&self) -> CatalogSetId {
        self.kind().set()
    }

    /// Table ID, for table entries.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        match self {
            Self::NodeTable(def) => Some(def.id),
            Self::RelTable(def) => Some(def.id),
            Self::Sequence(_) => None,
        }
    }

    /// Property columns, empty for sequences.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        match self {
            Self::NodeTable(def) => &def.columns,
            Self::RelTable(def) => &def.columns,
            Self::Sequence(_) => &[],
        }
    }

    fn columns_mut(&mut self) -> Option<&mut Vec<ColumnDef>> {
        match self {
            Self::NodeTable(def) => Some(&mut def.columns),
            Self::RelTable(def) => Some(&mut def.columns),
            Self::Sequence(_) => None,
        }
    }

    fn set_name(&mut self, name: String) {
        match self {
            Self::NodeTable(def) => def.name = name,
            Self::RelTable(def) => def.name = name,
            Self::Sequence(def) => def.name = name,
        }
    }

    /// Returns a copy of this entry with `info` applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the alteration does not fit this entry (sequence,
    /// duplicate or missing column).
    pub fn altered(&self, info: &AlterInfo) -> CoreResult<Self> {
        let mut next = self.clone();
        match info {
            AlterInfo::AddColumn { column, .. } => {
                if self.columns().iter().any(|c| c.name == column.name) {
                    return Err(CoreError::constraint(format!(
                        "column {} already exists in {}",
                        column.name,
                        self.name()
                    )));
                }
                next.columns_mut()
                    .ok_or_else(|| CoreError::invalid_operation("sequences have no columns"))?
                    .push(column.clone());
            }
            AlterInfo::RenameColumn {
                column_id,
                new_name,
                ..
            } => {
                if self.columns().iter().any(|c| &c.name == new_name) {
                    return Err(CoreError::constraint(format!(
                        "column {new_name} already exists in {}",
                        self.name()
                    )));
                }
                let columns = next
                    .columns_mut()
                    .ok_or_else(|| CoreError::invalid_operation("sequences have no columns"))?;
                let column = columns.get_mut(column_id.index()).ok_or_else(|| {
                    CoreError::invalid_operation(format!("no column {}", column_id.0))
                })?;
                column.name = new_name.clone();
            }
            AlterInfo::RenameTable { new_name, .. } => next.set_name(new_name.clone()),
        }
        Ok(next)
    }
}

/// A schema change to an existing table.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterInfo {
    /// Appends a property column, filling existing rows with `default`.
    AddColumn {
        /// Altered table.
        table_id: TableId,
        /// New column.
        column: ColumnDef,
        /// Value for rows that already exist.
        default: Value,
    },
    /// Renames a property column.
    RenameColumn {
        /// Altered table.
        table_id: TableId,
        /// Renamed column.
        column_id: ColumnId,
        /// New column name.
        new_name: String,
    },
    /// Renames the table itself.
    RenameTable {
        /// Altered table.
        table_id: TableId,
        /// New table name.
        new_name: String,
    },
}

impl AlterInfo {
    /// The altered table.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        match self {
            Self::AddColumn { table_id, .. }
            | Self::RenameColumn { table_id, .. }
            | Self::RenameTable { table_id, .. } => *table_id,
        }
    }
}

/// Stable handle to a catalog version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionHandle(u32);

/// One version of a named catalog entry.
#[derive(Debug, Clone)]
pub struct CatalogVersion {
    /// Set the version belongs to.
    pub set: CatalogSetId,
    /// Chain key.
    pub name: String,
    /// The entry, or `None` for a tombstone left by a drop.
    pub entry: Option<CatalogEntry>,
    /// Who wrote this version.
    pub stamp: Stamp,
    prev: Option<VersionHandle>,
}

/// The catalog: version arena plus one head map per set.
#[derive(Debug, Clone)]
pub struct Catalog {
    versions: Vec<Option<CatalogVersion>>,
    free: Vec<u32>,
    heads: [BTreeMap<String, VersionHandle>; 2],
    next_oid: u64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            versions: Vec::new(),
            free: Vec::new(),
            heads: [BTreeMap::new(), BTreeMap::new()],
            next_oid: 1,
        }
    }

    /// Draws a fresh object ID.
    pub fn allocate_oid(&mut self) -> u64 {
        let oid = self.next_oid;
        self.next_oid += 1;
        oid
    }

    /// Next object ID that [`allocate_oid`](Self::allocate_oid) will return.
    #[must_use]
    pub fn next_oid(&self) -> u64 {
        self.next_oid
    }

    /// Resolves a handle.
    #[must_use]
    pub fn version(&self, handle: VersionHandle) -> Option<&CatalogVersion> {
        self.versions.get(handle.0 as usize).and_then(Option::as_ref)
    }

    fn version_mut(&mut self, handle: VersionHandle) -> CoreResult<&mut CatalogVersion> {
        self.versions
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| CoreError::invalid_operation(format!("stale catalog handle {}", handle.0)))
    }

    fn alloc(&mut self, version: CatalogVersion) -> VersionHandle {
        match self.free.pop() {
            Some(slot) => {
                self.versions[slot as usize] = Some(version);
                VersionHandle(slot)
            }
            None => {
                self.versions.push(Some(version));
                VersionHandle((self.versions.len() - 1) as u32)
            }
        }
    }

    fn release(&mut self, handle: VersionHandle) {
        if let Some(slot) = self.versions.get_mut(handle.0 as usize) {
            if slot.take().is_some() {
                self.free.push(handle.0);
            }
        }
    }

    /// First version of `name`'s chain visible to `view`.
    fn visible_version(
        &self,
        set: CatalogSetId,
        name: &str,
        view: Visibility,
    ) -> Option<&CatalogVersion> {
        let mut cursor = self.heads[set.index()].get(name).copied();
        while let Some(handle) = cursor {
            let version = self.version(handle)?;
            if version.stamp.visible_to(view) {
                return Some(version);
            }
            cursor = version.prev;
        }
        None
    }

    /// Looks up a live entry by name.
    #[must_use]
    pub fn get(&self, set: CatalogSetId, name: &str, view: Visibility) -> Option<&CatalogEntry> {
        self.visible_version(set, name, view)
            .and_then(|v| v.entry.as_ref())
    }

    /// Looks up a live entry by object ID.
    #[must_use]
    pub fn get_by_oid(&self, oid: u64, view: Visibility) -> Option<&CatalogEntry> {
        [CatalogSetId::Tables, CatalogSetId::Sequences]
            .into_iter()
            .flat_map(|set| self.entries(set, view))
            .find(|entry| entry.oid() == oid)
    }

    /// Looks up a table entry by ID.
    #[must_use]
    pub fn table(&self, id: TableId, view: Visibility) -> Option<&CatalogEntry> {
        self.entries(CatalogSetId::Tables, view)
            .into_iter()
            .find(|entry| entry.table_id() == Some(id))
    }

    /// All live entries of a set visible to `view`, in name order.
    #[must_use]
    pub fn entries(&self, set: CatalogSetId, view: Visibility) -> Vec<&CatalogEntry> {
        self.heads[set.index()]
            .keys()
            .filter_map(|name| self.get(set, name, view))
            .collect()
    }

    fn push_version(
        &mut self,
        txid: TransactionId,
        set: CatalogSetId,
        name: &str,
        entry: Option<CatalogEntry>,
    ) -> CoreResult<(Option<VersionHandle>, VersionHandle)> {
        let old = self.heads[set.index()].get(name).copied();
        if let Some(head) = old {
            if let Some(Stamp::Pending(owner)) = self.version(head).map(|v| v.stamp) {
                if owner != txid {
                    return Err(CoreError::invalid_operation(format!(
                        "{name} has uncommitted changes from {owner}"
                    )));
                }
            }
        }
        let handle = self.alloc(CatalogVersion {
            set,
            name: name.to_string(),
            entry,
            stamp: Stamp::Pending(txid),
            prev: old,
        });
        self.heads[set.index()].insert(name.to_string(), handle);
        Ok((old, handle))
    }

    /// Installs a new entry.
    ///
    /// The entry's object ID is taken as given (replay passes the ID from
    /// the log); the ID counter is advanced past it.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if a live entry with the same name is
    /// visible to `txid`.
    pub fn create_entry(
        &mut self,
        txid: TransactionId,
        entry: CatalogEntry,
    ) -> CoreResult<(Option<VersionHandle>, VersionHandle)> {
        let set = entry.set();
        let name = entry.name().to_string();
        if self.get(set, &name, Visibility::Transaction(txid)).is_some() {
            return Err(CoreError::constraint(format!("{name} already exists")));
        }
        self.next_oid = self.next_oid.max(entry.oid() + 1);
        self.push_version(txid, set, &name, Some(entry))
    }

    /// Installs a tombstone over a live entry.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if no live entry is visible to `txid`.
    pub fn drop_entry(
        &mut self,
        txid: TransactionId,
        set: CatalogSetId,
        name: &str,
    ) -> CoreResult<(VersionHandle, VersionHandle)> {
        if self.get(set, name, Visibility::Transaction(txid)).is_none() {
            return Err(CoreError::entry_not_found(name));
        }
        let (old, new) = self.push_version(txid, set, name, None)?;
        let old = old.ok_or_else(|| CoreError::entry_not_found(name))?;
        Ok((old, new))
    }

    /// Installs a new version of a live entry under the same name.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if no live entry is visible to `txid`.
    pub fn replace_entry(
        &mut self,
        txid: TransactionId,
        entry: CatalogEntry,
    ) -> CoreResult<(VersionHandle, VersionHandle)> {
        let set = entry.set();
        let name = entry.name().to_string();
        if self.get(set, &name, Visibility::Transaction(txid)).is_none() {
            return Err(CoreError::entry_not_found(name));
        }
        let (old, new) = self.push_version(txid, set, &name, Some(entry))?;
        let old = old.ok_or_else(|| CoreError::entry_not_found(&name))?;
        Ok((old, new))
    }

    /// Pops an uncommitted head version, restoring its predecessor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `handle` is stale, committed, or not
    /// the head of its chain (rollback out of LIFO order).
    pub fn rollback_version(&mut self, handle: VersionHandle) -> CoreResult<()> {
        let version = self
            .version(handle)
            .ok_or_else(|| CoreError::invalid_operation("rollback of stale catalog version"))?;
        if version.stamp.is_committed() {
            return Err(CoreError::invalid_operation(
                "rollback of committed catalog version",
            ));
        }
        let set = version.set;
        let name = version.name.clone();
        let prev = version.prev;

        let heads = &mut self.heads[set.index()];
        if heads.get(&name) != Some(&handle) {
            return Err(CoreError::invalid_operation(format!(
                "catalog rollback out of order for {name}"
            )));
        }
        match prev {
            Some(prev) => {
                heads.insert(name, prev);
            }
            None => {
                heads.remove(&name);
            }
        }
        self.release(handle);
        Ok(())
    }

    /// Stamps a version committed and frees the committed version it
    /// supersedes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `handle` is stale.
    pub fn commit_version(&mut self, handle: VersionHandle, ts: Timestamp) -> CoreResult<()> {
        let version = self.version_mut(handle)?;
        version.stamp = Stamp::Committed(ts);
        let prev = version.prev;
        if let Some(prev) = prev {
            if self.version(prev).is_some_and(|v| v.stamp.is_committed()) {
                self.release(prev);
                self.version_mut(handle)?.prev = None;
            }
        }
        // A committed tombstone with nothing under it is only worth keeping
        // while a newer version still chains to it.
        let version = self.version_mut(handle)?;
        if version.entry.is_none() && version.prev.is_none() {
            let set = version.set;
            let name = version.name.clone();
            if self.heads[set.index()].get(&name) == Some(&handle) {
                self.heads[set.index()].remove(&name);
                self.release(handle);
            }
        }
        Ok(())
    }

    /// Number of versions currently held in the arena.
    #[must_use]
    pub fn live_versions(&self) -> usize {
        self.versions.len() - self.free.len()
    }

    /// Rebuilds a catalog from checkpointed entries, all stamped `ts`.
    pub(crate) fn from_committed(entries: Vec<CatalogEntry>, next_oid: u64, ts: Timestamp) -> Self {
        let mut catalog = Self::new();
        catalog.next_oid = next_oid;
        for entry in entries {
            let set = entry.set();
            let name = entry.name().to_string();
            let handle = catalog.alloc(CatalogVersion {
                set,
                name: name.clone(),
                entry: Some(entry),
                stamp: Stamp::Committed(ts),
                prev: None,
            });
            catalog.heads[set.index()].insert(name, handle);
        }
        catalog
    }

    /// Committed entries of every set, for checkpointing.
    #[must_use]
    pub fn committed_entries(&self) -> Vec<CatalogEntry> {
        [CatalogSetId::Tables, CatalogSetId::Sequences]
            .into_iter()
            .flat_map(|set| self.entries(set, Visibility::Committed))
            .cloned()
            .collect()
    }
}

impl Encode for CatalogEntryKind {
    fn encode(&self, s: &mut Serializer) {
        s.write_u8(match self {
            Self::NodeTable => 1,
            Self::RelTable => 2,
            Self::Sequence => 3,
        });
    }
}

impl Decode for CatalogEntryKind {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        match d.read_u8()? {
            1 => Ok(Self::NodeTable),
            2 => Ok(Self::RelTable),
            3 => Ok(Self::Sequence),
            other => Err(CoreError::invalid_format(format!(
                "unknown catalog entry kind {other}"
            ))),
        }
    }
}

impl Encode for ColumnDef {
    fn encode(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write(&self.ty);
    }
}

impl Decode for ColumnDef {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        Ok(Self {
            name: d.read_string()?,
            ty: d.read()?,
        })
    }
}

impl Encode for CatalogEntry {
    fn encode(&self, s: &mut Serializer) {
        s.write(&self.kind());
        match self {
            Self::NodeTable(def) => {
                s.write(&def.id);
                s.write_str(&def.name);
                s.write_vec(&def.columns);
                s.write(&def.primary_key);
            }
            Self::RelTable(def) => {
                s.write(&def.id);
                s.write_str(&def.name);
                s.write(&def.src_table);
                s.write(&def.dst_table);
                s.write_vec(&def.columns);
            }
            Self::Sequence(def) => {
                s.write(&def.id);
                s.write_str(&def.name);
                s.write_i64(def.start);
                s.write_i64(def.increment);
            }
        }
    }
}

impl Decode for CatalogEntry {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        let kind: CatalogEntryKind = d.read()?;
        let entry = match kind {
            CatalogEntryKind::NodeTable => Self::NodeTable(NodeTableDef {
                id: d.read()?,
                name: d.read_string()?,
                columns: d.read_vec()?,
                primary_key: d.read()?,
            }),
            CatalogEntryKind::RelTable => Self::RelTable(RelTableDef {
                id: d.read()?,
                name: d.read_string()?,
                src_table: d.read()?,
                dst_table: d.read()?,
                columns: d.read_vec()?,
            }),
            CatalogEntryKind::Sequence => Self::Sequence(SequenceDef {
                id: d.read()?,
                name: d.read_string()?,
                start: d.read_i64()?,
                increment: d.read_i64()?,
            }),
        };
        Ok(entry)
    }
}

impl Encode for AlterInfo {
    fn encode(&self, s: &mut Serializer) {
        match self {
            Self::AddColumn {
                table_id,
                column,
                default,
            } => {
                s.write_u8(1);
                s.write(table_id);
                s.write(column);
                s.write(default);
            }
            Self::RenameColumn {
                table_id,
                column_id,
                new_name,
            } => {
                s.write_u8(2);
                s.write(table_id);
                s.write(column_id);
                s.write_str(new_name);
            }
            Self::RenameTable { table_id, new_name } => {
                s.write_u8(3);
                s.write(table_id);
                s.write_str(new_name);
            }
        }
    }
}

impl Decode for AlterInfo {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        match d.read_u8()? {
            1 => Ok(Self::AddColumn {
                table_id: d.read()?,
                column: d.read()?,
                default: d.read()?,
            }),
            2 => Ok(Self::RenameColumn {
                table_id: d.read()?,
                column_id: d.read()?,
                new_name: d.read_string()?,
            }),
            3 => Ok(Self::RenameTable {
                table_id: d.read()?,
                new_name: d.read_string()?,
            }),
            other => Err(CoreError::invalid_format(format!("unknown alter type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);

    fn sequence(id: u64, name: &str) -> CatalogEntry {
        CatalogEntry::Sequence(SequenceDef {
            id: SequenceId::new(id),
            name: name.to_string(),
            start: 1,
            increment: 1,
        })
    }

    fn person(id: u64) -> CatalogEntry {
        CatalogEntry::NodeTable(NodeTableDef {
            id: TableId::new(id),
            name: "person".to_string(),
            columns: vec![ColumnDef::new("id", LogicalType::Int64)],
            primary_key: ColumnId::new(0),
        })
    }

    #[test]
    fn pending_entry_is_private_until_commit() {
        let mut catalog = Catalog::new();
        let (old, new) = catalog.create_entry(T1, person(1)).unwrap();
        assert!(old.is_none());

        let set = CatalogSetId::Tables;
        assert!(catalog.get(set, "person", Visibility::Transaction(T1)).is_some());
        assert!(catalog.get(set, "person", Visibility::Committed).is_none());

        catalog.commit_version(new, Timestamp::new(1)).unwrap();
        assert!(catalog.get(set, "person", Visibility::Committed).is_some());
    }

    #[test]
    fn rollback_restores_previous_version() {
        let mut catalog = Catalog::new();
        let (_, v1) = catalog.create_entry(T1, person(1)).unwrap();
        catalog.commit_version(v1, Timestamp::new(1)).unwrap();

        let (old, tomb) = catalog.drop_entry(T2, CatalogSetId::Tables, "person").unwrap();
        assert_eq!(old, v1);
        assert!(catalog
            .get(CatalogSetId::Tables, "person", Visibility::Transaction(T2))
            .is_none());

        catalog.rollback_version(tomb).unwrap();
        assert_eq!(
            catalog.get(CatalogSetId::Tables, "person", Visibility::Transaction(T2)),
            Some(&person(1))
        );
        assert!(catalog.version(tomb).is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut catalog = Catalog::new();
        catalog.create_entry(T1, sequence(1, "s")).unwrap();
        let result = catalog.create_entry(T1, sequence(2, "s"));
        assert!(matches!(result, Err(CoreError::ConstraintViolation { .. })));
    }

    #[test]
    fn rollback_out_of_order_is_refused() {
        let mut catalog = Catalog::new();
        let (_, v1) = catalog.create_entry(T1, sequence(1, "s")).unwrap();
        let (_, _v2) = catalog.drop_entry(T1, CatalogSetId::Sequences, "s").unwrap();
        assert!(catalog.rollback_version(v1).is_err());
    }

    #[test]
    fn commit_frees_superseded_versions() {
        let mut catalog = Catalog::new();
        let (_, v1) = catalog.create_entry(T1, person(1)).unwrap();
        catalog.commit_version(v1, Timestamp::new(1)).unwrap();

        let info = AlterInfo::AddColumn {
            table_id: TableId::new(1),
            column: ColumnDef::new("age", LogicalType::Int64),
            default: Value::Null,
        };
        let altered = person(1).altered(&info).unwrap();
        let (_, v2) = catalog.replace_entry(T2, altered).unwrap();
        assert_eq!(catalog.live_versions(), 2);

        catalog.commit_version(v2, Timestamp::new(2)).unwrap();
        assert_eq!(catalog.live_versions(), 1);
        let entry = catalog
            .get(CatalogSetId::Tables, "person", Visibility::Committed)
            .unwrap();
        assert_eq!(entry.columns().len(), 2);
    }

    #[test]
    fn committed_drop_removes_chain() {
        let mut catalog = Catalog::new();
        let (_, v1) = catalog.create_entry(T1, sequence(1, "s")).unwrap();
        catalog.commit_version(v1, Timestamp::new(1)).unwrap();
        let (_, tomb) = catalog.drop_entry(T2, CatalogSetId::Sequences, "s").unwrap();
        catalog.commit_version(tomb, Timestamp::new(2)).unwrap();

        assert_eq!(catalog.live_versions(), 0);
        assert!(catalog.entries(CatalogSetId::Sequences, Visibility::Committed).is_empty());
    }

    #[test]
    fn drop_and_recreate_in_one_transaction() {
        let mut catalog = Catalog::new();
        let (_, v1) = catalog.create_entry(T1, sequence(1, "s")).unwrap();
        catalog.commit_version(v1, Timestamp::new(1)).unwrap();

        let (_, tomb) = catalog.drop_entry(T2, CatalogSetId::Sequences, "s").unwrap();
        let (_, v2) = catalog.create_entry(T2, sequence(2, "s")).unwrap();
        catalog.commit_version(tomb, Timestamp::new(2)).unwrap();
        catalog.commit_version(v2, Timestamp::new(2)).unwrap();

        assert_eq!(catalog.live_versions(), 1);
        let entry = catalog
            .get(CatalogSetId::Sequences, "s", Visibility::Committed)
            .unwrap();
        assert_eq!(entry.oid(), 2);
    }

    #[test]
    fn replayed_ids_advance_the_counter() {
        let mut catalog = Catalog::new();
        catalog.create_entry(T1, sequence(9, "s")).unwrap();
        assert_eq!(catalog.allocate_oid(), 10);
    }

    #[test]
    fn lookup_by_oid_covers_both_sets() {
        let mut catalog = Catalog::new();
        catalog.create_entry(T1, person(1)).unwrap();
        catalog.create_entry(T1, sequence(2, "s")).unwrap();
        let view = Visibility::Transaction(T1);
        assert_eq!(catalog.get_by_oid(2, view).map(CatalogEntry::name), Some("s"));
        assert_eq!(catalog.get_by_oid(1, view).map(CatalogEntry::name), Some("person"));
        assert!(catalog.get_by_oid(3, view).is_none());
    }

    #[test]
    fn rename_column_checks_collisions() {
        let entry = CatalogEntry::NodeTable(NodeTableDef {
            id: TableId::new(1),
            name: "person".to_string(),
            columns: vec![
                ColumnDef::new("id", LogicalType::Int64),
                ColumnDef::new("name", LogicalType::String),
            ],
            primary_key: ColumnId::new(0),
        });
        let clash = AlterInfo::RenameColumn {
            table_id: TableId::new(1),
            column_id: ColumnId::new(1),
            new_name: "id".to_string(),
        };
        assert!(entry.altered(&clash).is_err());
    }
}

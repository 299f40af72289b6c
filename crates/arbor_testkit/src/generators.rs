//! Property-based test generators using proptest.
//!
//! Operations pick their targets by index modulo the live rows at the time
//! they run, so any generated sequence applies cleanly to any state.

use crate::fixtures::scenarios;
use arbor_core::{
    CatalogEntry, CatalogSetId, ColumnDef, ColumnId, CoreError, CoreResult, Direction, LogicalType, SequenceId, TableId,
    TableKind, Value, WalRecord, WriteTransaction,
};
use proptest::prelude::*;

/// Strategy for valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for a value of type `ty`, `Null` included.
pub fn value_strategy(ty: LogicalType) -> BoxedStrategy<Value> {
    let typed = match ty {
        LogicalType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        LogicalType::Int64 => any::<i64>().prop_map(Value::Int64).boxed(),
        LogicalType::Double => (-1.0e9f64..1.0e9).prop_map(Value::Double).boxed(),
        LogicalType::String => "[ -~]{0,24}".prop_map(Value::String).boxed(),
        LogicalType::Blob => prop::collection::vec(any::<u8>(), 0..32)
            .prop_map(Value::Blob)
            .boxed(),
    };
    prop_oneof![1 => Just(Value::Null), 8 => typed].boxed()
}

/// Strategy for self-contained WAL records.
///
/// The records decode on their own; they are not meant to replay.
pub fn wal_record_strategy() -> impl Strategy<Value = WalRecord> {
    prop_oneof![
        Just(WalRecord::BeginTransaction),
        Just(WalRecord::Commit),
        (1u64..100, 1u64..1000).prop_map(|(id, kcount)| WalRecord::SequenceUpdate {
            sequence_id: SequenceId::new(id),
            kcount,
        }),
        "[a-z/]{1,20}".prop_map(|path| WalRecord::LoadExtension { path }),
        (1u64..100, 0u32..4, 0u64..1000, value_strategy(LogicalType::String)).prop_map(
            |(table, column, node_offset, value)| WalRecord::NodeUpdate {
                table_id: TableId::new(table),
                column_id: ColumnId::new(column),
                node_offset,
                value,
            }
        ),
        (1u64..100, prop::collection::vec(any::<i64>(), 1..8)).prop_map(|(table, keys)| {
            WalRecord::TableInsertion {
                table_id: TableId::new(table),
                kind: TableKind::Node,
                num_rows: keys.len() as u64,
                columns: vec![keys.into_iter().map(Value::Int64).collect()],
            }
        }),
        (1u64..100, any::<bool>(), 0u64..1000).prop_map(|(table, fwd, node_offset)| {
            WalRecord::RelDetachDeletion {
                table_id: TableId::new(table),
                direction: if fwd { Direction::Forward } else { Direction::Backward },
                node_offset,
            }
        }),
    ]
}

/// Tables the graph operations run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphSchema {
    /// `person` node table.
    pub person: TableId,
    /// `knows` rel table.
    pub knows: TableId,
    /// `ids` sequence.
    pub ids: SequenceId,
}

impl GraphSchema {
    /// Creates the schema inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tables already exist.
    pub fn create(txn: &mut WriteTransaction<'_>) -> CoreResult<Self> {
        let person = txn.create_node_table("person", scenarios::person_columns(), "id")?;
        let knows = txn.create_rel_table(
            "knows",
            "person",
            "person",
            vec![ColumnDef::new("since", LogicalType::Int64)],
        )?;
        let ids = txn.create_sequence("ids", 1, 1)?;
        Ok(Self { person, knows, ids })
    }

    /// Looks the schema up in a database where it was created earlier.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if part of it is missing.
    pub fn find(txn: &WriteTransaction<'_>) -> CoreResult<Self> {
        let ids = txn.read(|state, view| {
            match state.catalog().get(CatalogSetId::Sequences, "ids", view) {
                Some(CatalogEntry::Sequence(def)) => Some(def.id),
                _ => None,
            }
        })?;
        Ok(Self {
            person: txn.table_id("person")?,
            knows: txn.table_id("knows")?,
            ids: ids.ok_or_else(|| CoreError::entry_not_found("ids"))?,
        })
    }
}

/// A random graph mutation.
#[derive(Debug, Clone)]
pub enum GraphOperation {
    /// Insert `count` people.
    Insert {
        /// Number of people.
        count: usize,
    },
    /// Set the age of a person.
    SetAge {
        /// Target pick.
        pick: usize,
        /// New age.
        age: i64,
    },
    /// Delete a person, detaching rels if needed.
    Delete {
        /// Target pick.
        pick: usize,
    },
    /// Connect two people.
    Connect {
        /// Source pick.
        src: usize,
        /// Destination pick.
        dst: usize,
        /// `since` property.
        since: i64,
    },
    /// Delete a rel.
    Disconnect {
        /// Rel pick.
        pick: usize,
    },
    /// Draw values from the `ids` sequence.
    Draw {
        /// Number of values.
        count: u64,
    },
}

/// Strategy for generating graph operations.
pub fn graph_operation_strategy() -> impl Strategy<Value = GraphOperation> {
    prop_oneof![
        3 => (1usize..8).prop_map(|count| GraphOperation::Insert { count }),
        2 => (any::<usize>(), 0i64..120).prop_map(|(pick, age)| GraphOperation::SetAge { pick, age }),
        1 => any::<usize>().prop_map(|pick| GraphOperation::Delete { pick }),
        2 => (any::<usize>(), any::<usize>(), 1990i64..2030)
            .prop_map(|(src, dst, since)| GraphOperation::Connect { src, dst, since }),
        1 => any::<usize>().prop_map(|pick| GraphOperation::Disconnect { pick }),
        1 => (1u64..5).prop_map(|count| GraphOperation::Draw { count }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<GraphOperation>> {
    prop::collection::vec(graph_operation_strategy(), min_ops..max_ops)
}

fn live_rows(txn: &WriteTransaction<'_>, table: TableId) -> CoreResult<Vec<u64>> {
    txn.read(|state, view| {
        state
            .table_store(table)
            .map(|t| t.live_rows(view).collect::<Vec<_>>())
            .unwrap_or_default()
    })
}

/// Applies `op` inside `txn`. Operations with nothing to act on are
/// skipped.
///
/// # Errors
///
/// Returns the error of the underlying mutation.
pub fn apply_operation(
    txn: &mut WriteTransaction<'_>,
    schema: &GraphSchema,
    op: &GraphOperation,
) -> CoreResult<()> {
    match op {
        GraphOperation::Insert { count } => {
            // Keys are never reused: every row ever inserted has a distinct
            // offset.
            let first = txn.read(|state, _| {
                state.table_store(schema.person).map_or(0, |t| t.num_rows())
            })? as i64;
            let rows: Vec<_> = (first..first + *count as i64).map(scenarios::person).collect();
            txn.insert_nodes(schema.person, &rows)?;
        }
        GraphOperation::SetAge { pick, age } => {
            let people = live_rows(txn, schema.person)?;
            if let Some(&row) = people.get(pick % people.len().max(1)) {
                txn.update(schema.person, ColumnId::new(2), row, Value::Int64(*age))?;
            }
        }
        GraphOperation::Delete { pick } => {
            let people = live_rows(txn, schema.person)?;
            if let Some(&row) = people.get(pick % people.len().max(1)) {
                match txn.delete_node(schema.person, row) {
                    Err(CoreError::ConstraintViolation { .. }) => {
                        txn.detach_delete_node(schema.person, row)?;
                    }
                    other => other?,
                }
            }
        }
        GraphOperation::Connect { src, dst, since } => {
            let people = live_rows(txn, schema.person)?;
            if !people.is_empty() {
                let ends = (people[src % people.len()], people[dst % people.len()]);
                txn.insert_rels(schema.knows, &[ends], &[vec![Value::Int64(*since)]])?;
            }
        }
        GraphOperation::Disconnect { pick } => {
            let rels = live_rows(txn, schema.knows)?;
            if let Some(&rel) = rels.get(pick % rels.len().max(1)) {
                txn.delete_rel(schema.knows, rel)?;
            }
        }
        GraphOperation::Draw { count } => {
            txn.next_values(schema.ids, *count)?;
        }
    }
    Ok(())
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

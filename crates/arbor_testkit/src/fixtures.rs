//! Test fixtures and database helpers.

use crate::disk::MemoryFiles;
use arbor_core::{
    CatalogEntry, ColumnDef, Config, CoreResult, Database, DatabaseState, LogicalType, TableId,
    Timestamp, Value, Visibility,
};
use std::path::Path;
use tempfile::TempDir;

enum Backing {
    Memory(MemoryFiles),
    Directory(TempDir),
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    backing: Backing,
}

impl TestDatabase {
    /// Creates an in-memory test database that can be reopened.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates an in-memory test database with a custom configuration.
    pub fn memory_with(config: Config) -> Self {
        let files = MemoryFiles::new();
        Self {
            db: files.open(config).expect("open in-memory database"),
            backing: Backing::Memory(files),
        }
    }

    /// Creates a database in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("create temp directory");
        let db = Database::open(&temp_dir.path().join("db")).expect("open file database");
        Self {
            db,
            backing: Backing::Directory(temp_dir),
        }
    }

    /// Database directory, for file-based databases.
    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    /// The in-memory files, for in-memory databases.
    pub fn files(&self) -> Option<&MemoryFiles> {
        match &self.backing {
            Backing::Memory(files) => Some(files),
            Backing::Directory(_) => None,
        }
    }

    /// Closes the database and opens it again, running recovery.
    pub fn reopen(self) -> Self {
        let config = self.db.config().clone();
        let Self { db, backing } = self;
        drop(db);
        let db = match &backing {
            Backing::Memory(files) => files.open(config),
            Backing::Directory(dir) => {
                Database::open_with_config(&dir.path().join("db"), config)
            }
        }
        .expect("reopen database");
        Self { db, backing }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use arbor_testkit::with_temp_db;
///
/// with_temp_db(|db| {
///     assert!(db.is_open());
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a database in a temporary directory.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("file database has a path").to_path_buf();
    f(&test_db.db, &path)
}

/// Everything a committed state logically holds, independent of its
/// physical layout.
///
/// Two databases with equal digests answer every committed read the same.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDigest {
    /// Last commit timestamp.
    pub last_commit_ts: Timestamp,
    /// Committed catalog entries.
    pub entries: Vec<CatalogEntry>,
    /// Live rows per table, with endpoints for rels.
    pub rows: Vec<(TableId, Vec<(u64, Option<(u64, u64)>, Vec<Value>)>)>,
    /// Sequence counters.
    pub sequences: Vec<(u64, Option<i64>)>,
    /// Loaded extensions.
    pub extensions: Vec<String>,
}

impl StateDigest {
    /// Digests the committed view of `state`.
    #[must_use]
    pub fn of(state: &DatabaseState) -> Self {
        let entries = state.catalog().committed_entries();
        let mut rows = Vec::new();
        let mut sequences = Vec::new();
        for entry in &entries {
            match entry {
                CatalogEntry::Sequence(def) => {
                    let current = state.sequence_state(def.id).and_then(|s| s.current(def));
                    sequences.push((def.id.as_u64(), current));
                }
                _ => {
                    let Some(id) = entry.table_id() else { continue };
                    let Some(store) = state.table_store(id) else { continue };
                    let live = store
                        .live_rows(Visibility::Committed)
                        .map(|row| {
                            (
                                row,
                                store.endpoints(row),
                                store.row(row, Visibility::Committed).unwrap_or_default(),
                            )
                        })
                        .collect();
                    rows.push((id, live));
                }
            }
        }
        Self {
            last_commit_ts: state.last_commit_ts(),
            entries,
            rows,
            sequences,
            extensions: state.extensions().to_vec(),
        }
    }

    /// Digests an open database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` for a closed database.
    pub fn of_database(db: &Database) -> CoreResult<Self> {
        db.read(Self::of)
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Columns of the `person` table: `id INT64` (key), `name STRING`,
    /// `age INT64`.
    #[must_use]
    pub fn person_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", LogicalType::Int64),
            ColumnDef::new("name", LogicalType::String),
            ColumnDef::new("age", LogicalType::Int64),
        ]
    }

    /// A `person` row.
    #[must_use]
    pub fn person(id: i64) -> Vec<Value> {
        vec![
            Value::Int64(id),
            Value::String(format!("person-{id}")),
            Value::Int64(20 + id % 50),
        ]
    }

    /// Creates `person` and `knows` (person to person, with a `since`
    /// column) and inserts `count` people. Returns the two table IDs.
    ///
    /// # Errors
    ///
    /// Returns the first error the transaction hits.
    pub fn social_graph(db: &Database, count: i64) -> CoreResult<(TableId, TableId)> {
        db.transaction(|txn| {
            let people = txn.create_node_table("person", person_columns(), "id")?;
            let knows = txn.create_rel_table(
                "knows",
                "person",
                "person",
                vec![ColumnDef::new("since", LogicalType::Int64)],
            )?;
            let rows: Vec<_> = (0..count).map(person).collect();
            if !rows.is_empty() {
                txn.insert_nodes(people, &rows)?;
            }
            Ok((people, knows))
        })
    }

    /// Creates a database holding a social graph of `count` people, each
    /// knowing the next.
    pub fn populated_database(count: i64) -> TestDatabase {
        let db = TestDatabase::memory();
        let (_, knows) = social_graph(&db, count).expect("create social graph");
        if count > 1 {
            db.transaction(|txn| {
                let ends: Vec<_> = (0..count as u64 - 1).map(|i| (i, i + 1)).collect();
                let props: Vec<_> = (0..ends.len() as i64)
                    .map(|i| vec![Value::Int64(2000 + i)])
                    .collect();
                txn.insert_rels(knows, &ends, &props)
            })
            .expect("insert rels");
        }
        db
    }
}

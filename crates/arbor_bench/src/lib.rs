//! Benchmark utilities.

use arbor_core::{ColumnDef, CoreResult, LogicalType, TableId, Value, WriteTransaction};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a random string of the specified length.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate `count` rows for [`create_items`], keyed from `first`.
pub fn generate_rows(first: i64, count: usize, payload_len: usize) -> Vec<Vec<Value>> {
    (first..first + count as i64)
        .map(|key| vec![Value::Int64(key), Value::String(random_string(payload_len))])
        .collect()
}

/// Creates the `item` table: `id INT64` key and `payload STRING`.
///
/// # Errors
///
/// Returns an error if the table exists.
pub fn create_items(txn: &mut WriteTransaction<'_>) -> CoreResult<TableId> {
    txn.create_node_table(
        "item",
        vec![
            ColumnDef::new("id", LogicalType::Int64),
            ColumnDef::new("payload", LogicalType::String),
        ],
        "id",
    )
}

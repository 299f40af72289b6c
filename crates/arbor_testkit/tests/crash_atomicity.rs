//! Crashes at every write of a workload recover to a state before or after
//! it, never in between.

use arbor_core::{ColumnId, Config, Value};
use arbor_testkit::{
    apply_operation, scenarios, CrashMode, CrashRecoveryHarness, GraphOperation, GraphSchema,
};

fn assert_passed(harness: &CrashRecoveryHarness) {
    assert!(harness.all_passed(), "{}", harness.summary());
}

#[test]
fn mixed_transaction_is_atomic() {
    let mut harness = CrashRecoveryHarness::new();
    harness
        .check_atomicity(
            "mixed transaction",
            |db| scenarios::social_graph(db, 4).map(|_| ()),
            |db| {
                db.transaction(|txn| {
                    let person = txn.table_id("person")?;
                    let knows = txn.table_id("knows")?;
                    txn.insert_nodes(person, &[scenarios::person(4)])?;
                    txn.insert_rels(
                        knows,
                        &[(0, 4), (4, 1)],
                        &[vec![Value::Int64(2001)], vec![Value::Null]],
                    )?;
                    txn.update(person, ColumnId::new(1), 2, Value::String("renamed".into()))?;
                    txn.delete_node(person, 3)?;
                    let ids = txn.create_sequence("ids", 100, 5)?;
                    txn.next_values(ids, 3)?;
                    txn.load_extension("ext/graph_algo")
                })
            },
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn detach_delete_is_atomic() {
    let mut harness = CrashRecoveryHarness::new();
    harness
        .check_atomicity(
            "detach delete",
            |db| {
                let (_, knows) = scenarios::social_graph(db, 3)?;
                db.transaction(|txn| {
                    let props: Vec<_> = (1..=3).map(|i| vec![Value::Int64(i)]).collect();
                    txn.insert_rels(knows, &[(0, 1), (1, 2), (2, 1)], &props)
                })?;
                Ok(())
            },
            |db| {
                db.transaction(|txn| {
                    let person = txn.table_id("person")?;
                    txn.detach_delete_node(person, 1)
                })
            },
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn drop_table_is_atomic() {
    let mut harness = CrashRecoveryHarness::new();
    harness
        .check_atomicity(
            "drop rel table",
            |db| scenarios::social_graph(db, 2).map(|_| ()),
            |db| db.transaction(|txn| txn.drop_table("knows")),
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn generated_operations_are_atomic() {
    use GraphOperation::*;
    let ops = [
        Insert { count: 5 },
        Connect { src: 0, dst: 3, since: 2010 },
        Connect { src: 2, dst: 2, since: 2011 },
        SetAge { pick: 4, age: 77 },
        Delete { pick: 3 },
        Draw { count: 2 },
        Disconnect { pick: 0 },
    ];
    let mut harness = CrashRecoveryHarness::new();
    harness
        .check_atomicity(
            "generated operations",
            |db| db.transaction(|txn| GraphSchema::create(txn).map(|_| ())),
            |db| {
                db.transaction(|txn| {
                    let schema = GraphSchema::find(txn)?;
                    ops.iter().try_for_each(|op| apply_operation(txn, &schema, op))
                })
            },
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn checkpoint_never_changes_contents() {
    let mut harness =
        CrashRecoveryHarness::with_config(Config::default().auto_checkpoint(false)).with_stride(37);
    harness
        .check_invisible(
            "checkpoint",
            |db| {
                let (_, knows) = scenarios::social_graph(db, 30)?;
                db.transaction(|txn| {
                    let ends: Vec<_> = (0..29).map(|i| (i, i + 1)).collect();
                    let props: Vec<_> = (0..29).map(|i| vec![Value::Int64(i)]).collect();
                    txn.insert_rels(knows, &ends, &props)
                })?;
                Ok(())
            },
            |db| db.checkpoint().map(|_| ()),
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn second_checkpoint_never_changes_contents() {
    let mut harness =
        CrashRecoveryHarness::with_config(Config::default().auto_checkpoint(false)).with_stride(41);
    harness
        .check_invisible(
            "checkpoint over a checkpoint",
            |db| {
                scenarios::social_graph(db, 10)?;
                db.checkpoint()?;
                db.transaction(|txn| {
                    let person = txn.table_id("person")?;
                    txn.delete_node(person, 0)?;
                    txn.insert_nodes(person, &[scenarios::person(10)]).map(|_| ())
                })
            },
            |db| db.checkpoint().map(|_| ()),
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn commit_with_auto_checkpoint_is_atomic() {
    let config = Config::default().checkpoint_threshold(1);
    let mut harness = CrashRecoveryHarness::with_config(config).with_stride(13);
    harness
        .check_atomicity(
            "commit then auto checkpoint",
            |_| Ok(()),
            |db| scenarios::social_graph(db, 5).map(|_| ()),
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn commits_survive_losing_unsynced_writes() {
    let mut harness = CrashRecoveryHarness::with_config(Config::default().auto_checkpoint(false))
        .with_crash_mode(CrashMode::LoseUnsynced);
    harness
        .check_atomicity(
            "commit on a disk that drops unsynced writes",
            |db| scenarios::social_graph(db, 3).map(|_| ()),
            |db| {
                db.transaction(|txn| {
                    let person = txn.table_id("person")?;
                    txn.insert_nodes(person, &[scenarios::person(3)])?;
                    txn.update(person, ColumnId::new(2), 0, Value::Int64(64))
                        .map(|_| ())
                })
            },
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn checkpoint_survives_losing_unsynced_writes() {
    let mut harness = CrashRecoveryHarness::with_config(Config::default().auto_checkpoint(false))
        .with_stride(29)
        .with_crash_mode(CrashMode::LoseUnsynced);
    harness
        .check_invisible(
            "checkpoint on a disk that drops unsynced writes",
            |db| {
                scenarios::social_graph(db, 12)?;
                db.checkpoint()?;
                db.transaction(|txn| {
                    let person = txn.table_id("person")?;
                    txn.update(person, ColumnId::new(1), 4, Value::String("moved".into()))
                        .map(|_| ())
                })
            },
            |db| db.checkpoint().map(|_| ()),
        )
        .unwrap();
    assert_passed(&harness);
}

#[test]
fn auto_checkpoint_survives_losing_unsynced_writes() {
    let mut harness = CrashRecoveryHarness::with_config(Config::default().checkpoint_threshold(1))
        .with_stride(17)
        .with_crash_mode(CrashMode::LoseUnsynced);
    harness
        .check_atomicity(
            "commit then auto checkpoint, unsynced writes lost",
            |_| Ok(()),
            |db| scenarios::social_graph(db, 4).map(|_| ()),
        )
        .unwrap();
    assert_passed(&harness);
}

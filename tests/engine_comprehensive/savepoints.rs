//! Savepoint and transaction scenario tests

use crate::common::*;
use proptest::prelude::*;

#[test]
fn local_file_rollback_to_savepoint_scenario() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.file("test.db");
    e.execute(&conn, "CREATE TABLE items (value INTEGER)", &[]).unwrap();

    let txn = e.begin_with(&conn, TransactionBehavior::Deferred).unwrap();
    e.txn_execute(&txn, &conn, "INSERT INTO items VALUES (?)", &[Value::Integer(1)])
        .unwrap();
    e.savepoint(&txn, &conn, "sp1").unwrap();
    e.txn_execute(&txn, &conn, "INSERT INTO items VALUES (?)", &[Value::Integer(2)])
        .unwrap();
    e.rollback_to_savepoint(&txn, &conn, "sp1").unwrap();
    e.commit(&txn, &conn).unwrap();
    e.close(&conn).unwrap();

    // Read back through a fresh connection to the same file.
    let check = t.file("test.db");
    let r = e.query(&check, "SELECT value FROM items", &[]).unwrap();
    assert_eq!(r.rows, vec![vec![Value::Integer(1)]]);
}

#[test]
fn duplicate_name_at_same_depth() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.memory();
    let txn = e.begin(&conn).unwrap();

    e.savepoint(&txn, &conn, "a").unwrap();
    match e.savepoint(&txn, &conn, "a") {
        Err(Error::DuplicateName { name }) => assert_eq!(name, "a"),
        other => panic!("expected DuplicateName, got {:?}", other),
    }
    // The failed push changed nothing and did not poison.
    assert_eq!(e.savepoints(&txn, &conn).unwrap(), vec!["a".to_string()]);
    assert!(e.is_active(&txn).unwrap());
    e.rollback(&txn, &conn).unwrap();
}

#[test]
fn rollback_to_then_release_commits_only_the_later_write() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();
    let txn = e.begin(&conn).unwrap();

    e.savepoint(&txn, &conn, "a").unwrap();
    e.txn_execute(&txn, &conn, "INSERT INTO t VALUES (10)", &[]).unwrap();
    e.rollback_to_savepoint(&txn, &conn, "a").unwrap();
    assert_eq!(e.savepoints(&txn, &conn).unwrap(), vec!["a".to_string()]);

    e.txn_execute(&txn, &conn, "INSERT INTO t VALUES (20)", &[]).unwrap();
    e.release_savepoint(&txn, &conn, "a").unwrap();
    assert!(e.savepoints(&txn, &conn).unwrap().is_empty());
    e.commit(&txn, &conn).unwrap();

    assert_eq!(t.values(&conn), vec![20]);
}

#[test]
fn named_targets_pop_everything_above() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();
    let txn = e.begin(&conn).unwrap();

    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        e.savepoint(&txn, &conn, name).unwrap();
        e.txn_execute(&txn, &conn, "INSERT INTO t VALUES (?)", &[Value::Integer(i as i64)])
            .unwrap();
    }

    // Rolling back to "c" keeps "c" open, drops "d" and the write after "c".
    e.rollback_to_savepoint(&txn, &conn, "c").unwrap();
    assert_eq!(e.savepoints(&txn, &conn).unwrap(), vec!["a", "b", "c"]);

    // Releasing "b" folds "b" and "c" into "a".
    e.release_savepoint(&txn, &conn, "b").unwrap();
    assert_eq!(e.savepoints(&txn, &conn).unwrap(), vec!["a"]);

    // A popped name can be reused.
    e.savepoint(&txn, &conn, "c").unwrap();
    assert!(matches!(
        e.rollback_to_savepoint(&txn, &conn, "d"),
        Err(Error::SavepointNotFound { .. })
    ));
    e.commit(&txn, &conn).unwrap();
    assert_eq!(t.values(&conn), vec![0, 1]);
}

#[test]
fn nested_failure_poisons_until_resolved() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();
    let txn = e.begin(&conn).unwrap();
    e.txn_execute(&txn, &conn, "INSERT INTO t VALUES (1)", &[]).unwrap();
    e.savepoint(&txn, &conn, "inner").unwrap();

    let err = e
        .txn_execute(&txn, &conn, "INSERT INTO t VALUES (1)", &[])
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE constraint failed"));

    // Every further operation reports the distinct unusable error.
    assert!(e.txn_execute(&txn, &conn, "INSERT INTO t VALUES (2)", &[]).unwrap_err().is_unusable());
    assert!(e.txn_query(&txn, &conn, "SELECT 1", &[]).unwrap_err().is_unusable());
    assert!(e.release_savepoint(&txn, &conn, "inner").unwrap_err().is_unusable());
    assert!(e
        .declare(
            CursorContext::Transaction {
                txn: txn.clone(),
                conn: conn.clone(),
            },
            "SELECT 1",
            &[],
        )
        .unwrap_err()
        .is_unusable());
    assert!(!e.is_active(&txn).unwrap());

    // The first resolver cleans up; commit refuses and rolls back.
    assert!(e.commit(&txn, &conn).unwrap_err().is_unusable());
    assert_not_found(e.rollback(&txn, &conn));
    assert!(t.values(&conn).is_empty());
}

#[test]
fn injected_savepoint_failure_poisons() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();
    let txn = e.begin(&conn).unwrap();
    e.txn_execute(&txn, &conn, "INSERT INTO t VALUES (1)", &[]).unwrap();

    t.recorder.fail_on("RELEASE SAVEPOINT", "database is locked");
    e.savepoint(&txn, &conn, "sp").unwrap();
    assert_eq!(
        e.release_savepoint(&txn, &conn, "sp").unwrap_err().to_string(),
        "database is locked"
    );
    t.recorder.clear_failures();

    assert!(e.savepoint(&txn, &conn, "again").unwrap_err().is_unusable());
    e.rollback(&txn, &conn).unwrap();
    assert!(t.values(&conn).is_empty());
    assert!(e.is_autocommit(&conn).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn non_identifier_names_rejected_before_lookup(
        name in "[A-Za-z_][A-Za-z0-9_]{0,8}[ ;'\"()-][A-Za-z0-9 ]{0,4}"
    ) {
        let t = TestEngine::new();
        let conn = t.memory();
        let txn = t.engine.begin(&conn).unwrap();
        let is_invalid_input = matches!(
            t.engine.savepoint(&txn, &conn, &name),
            Err(Error::InvalidInput { .. })
        );
        prop_assert!(is_invalid_input);
        prop_assert!(t.engine.savepoints(&txn, &conn).unwrap().is_empty());
        t.engine.rollback(&txn, &conn).unwrap();
    }

    #[test]
    fn identifier_names_accepted(name in "[A-Za-z_][A-Za-z0-9_]{0,16}") {
        let t = TestEngine::new();
        let conn = t.memory();
        let txn = t.engine.begin(&conn).unwrap();
        t.engine.savepoint(&txn, &conn, &name).unwrap();
        prop_assert_eq!(t.engine.savepoints(&txn, &conn).unwrap(), vec![name.clone()]);
        t.engine.rollback_to_savepoint(&txn, &conn, &name).unwrap();
        t.engine.release_savepoint(&txn, &conn, &name).unwrap();
        t.engine.commit(&txn, &conn).unwrap();
    }
}

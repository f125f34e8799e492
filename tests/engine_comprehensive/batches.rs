//! Batch execution tests

use crate::common::*;

fn inserts(values: &[i64]) -> Vec<BatchStatement> {
    values
        .iter()
        .map(|v| BatchStatement::new("INSERT INTO t VALUES (?)", vec![Value::Integer(*v)]))
        .collect()
}

#[test]
fn sequential_batch_stops_at_first_failure() {
    let t = TestEngine::new();
    let conn = t.with_table();

    let ok = t.engine.execute_batch(&conn, &inserts(&[1, 2])).unwrap();
    assert_eq!(ok.iter().map(|r| r.rows_affected).collect::<Vec<_>>(), vec![1, 1]);

    // The duplicate fails; 3 stays applied, 4 never runs.
    let err = t
        .engine
        .execute_batch(&conn, &inserts(&[3, 1, 4]))
        .unwrap_err();
    assert!(err.to_string().contains("(index: "), "{}", err);
    assert_eq!(t.values(&conn), vec![1, 2, 3]);
}

#[test]
fn transactional_batch_is_all_or_nothing() {
    let t = TestEngine::new();
    let conn = t.with_table();

    assert!(t
        .engine
        .execute_transactional_batch(&conn, &inserts(&[1, 2, 2]))
        .is_err());
    assert!(t.values(&conn).is_empty());
    assert!(t.engine.is_autocommit(&conn).unwrap());

    let mut batch = inserts(&[5, 6]);
    batch.push("SELECT count(*) FROM t".into());
    let results = t.engine.execute_transactional_batch(&conn, &batch).unwrap();
    assert_eq!(results[2].scalar(), Some(&Value::Integer(2)));
    assert_eq!(t.values(&conn), vec![5, 6]);
}

#[test]
fn native_batches() {
    let t = TestEngine::new();
    let conn = t.with_table();

    t.engine
        .execute_batch_native(&conn, "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);")
        .unwrap();
    assert_eq!(t.values(&conn), vec![1, 2]);

    assert!(t
        .engine
        .execute_transactional_batch_native(&conn, "INSERT INTO t VALUES (3); INSERT INTO t VALUES (1);")
        .is_err());
    assert_eq!(t.values(&conn), vec![1, 2]);
    assert!(t.engine.is_autocommit(&conn).unwrap());

    t.engine
        .execute_transactional_batch_native(&conn, "INSERT INTO t VALUES (3); INSERT INTO t VALUES (4);")
        .unwrap();
    assert_eq!(t.values(&conn), vec![1, 2, 3, 4]);
}

#[test]
fn batches_refused_while_transaction_open() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();
    let txn = e.begin(&conn).unwrap();

    let refusals = [
        e.execute_batch(&conn, &inserts(&[1])).map(|_| ()),
        e.execute_transactional_batch(&conn, &inserts(&[1])).map(|_| ()),
        e.execute_batch_native(&conn, "INSERT INTO t VALUES (1)"),
        e.execute_transactional_batch_native(&conn, "INSERT INTO t VALUES (1)"),
    ];
    for r in refusals {
        assert!(matches!(r, Err(Error::TransactionActive { .. })), "{:?}", r);
    }

    e.rollback(&txn, &conn).unwrap();
    e.execute_transactional_batch(&conn, &inserts(&[1])).unwrap();
    // The batch released its reservation.
    let txn = e.begin(&conn).unwrap();
    e.commit(&txn, &conn).unwrap();
    assert_eq!(t.values(&conn), vec![1]);
}

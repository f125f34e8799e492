//! Ownership enforcement tests
//!
//! A transaction, statement or cursor driven through a connection other than
//! the one that created it is rejected with OwnershipViolation, and nothing
//! about the resource changes.

use crate::common::*;

#[test]
fn transaction_rejects_foreign_connection_without_mutation() {
    let t = TestEngine::new();
    let e = &t.engine;
    let owner = t.with_table();
    let intruder = t.with_table();

    let txn = e.begin(&owner).unwrap();
    e.txn_execute(&txn, &owner, "INSERT INTO t VALUES (1)", &[]).unwrap();
    e.savepoint(&txn, &owner, "outer").unwrap();

    assert_ownership(e.txn_execute(&txn, &intruder, "INSERT INTO t VALUES (2)", &[]));
    assert_ownership(e.txn_query(&txn, &intruder, "SELECT * FROM t", &[]));
    assert_ownership(e.savepoint(&txn, &intruder, "inner"));
    assert_ownership(e.release_savepoint(&txn, &intruder, "outer"));
    assert_ownership(e.rollback_to_savepoint(&txn, &intruder, "outer"));
    assert_ownership(e.savepoints(&txn, &intruder));
    assert_ownership(e.commit(&txn, &intruder));
    assert_ownership(e.rollback(&txn, &intruder));
    assert_ownership(e.declare(
        CursorContext::Transaction {
            txn: txn.clone(),
            conn: intruder.clone(),
        },
        "SELECT 1",
        &[],
    ));

    // State is exactly as the owner left it.
    assert!(e.is_active(&txn).unwrap());
    assert_eq!(e.savepoints(&txn, &owner).unwrap(), vec!["outer".to_string()]);
    assert!(t.values(&intruder).is_empty());

    // The intruder's own connection is untouched and can start its own.
    let other = e.begin(&intruder).unwrap();
    e.rollback(&other, &intruder).unwrap();

    e.commit(&txn, &owner).unwrap();
    assert_eq!(t.values(&owner), vec![1]);
}

#[test]
fn ownership_checked_before_unusable_state() {
    let t = TestEngine::new();
    let e = &t.engine;
    let owner = t.with_table();
    let intruder = t.memory();

    let txn = e.begin(&owner).unwrap();
    e.txn_execute(&txn, &owner, "INSERT INTO t VALUES (1)", &[]).unwrap();
    e.savepoint(&txn, &owner, "sp").unwrap();
    assert!(e.txn_execute(&txn, &owner, "INSERT INTO t VALUES (1)", &[]).is_err());
    assert!(!e.is_active(&txn).unwrap());

    // Poisoned, but a foreign caller still sees the ownership error first.
    assert_ownership(e.txn_execute(&txn, &intruder, "SELECT 1", &[]));
    assert_ownership(e.commit(&txn, &intruder));

    assert!(e.rollback(&txn, &owner).is_ok());
}

#[test]
fn statements_and_cursors_reject_foreign_connection() {
    let t = TestEngine::new();
    let e = &t.engine;
    let owner = t.memory();
    let other = t.memory();
    let stmt = e.prepare(&owner, "SELECT 1").unwrap();
    let cursor = e
        .declare(CursorContext::Connection(owner.clone()), "SELECT 1", &[])
        .unwrap();

    assert_ownership(e.stmt_execute(&stmt, &other, &[]));
    assert_ownership(e.stmt_reset(&stmt, &other));
    assert_ownership(e.stmt_parameter_count(&stmt, &other));
    assert_ownership(e.fetch(&cursor, &other, 1));

    e.close(&owner).unwrap();
    // The cascade removed them; there is nothing left to own.
    assert_not_found(e.stmt_execute(&stmt, &other, &[]));
    assert_not_found(e.fetch(&cursor, &other, 1));
}

//! Connection lifecycle, configuration and error surfacing tests

use crate::common::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn invalid_configs_rejected_before_open() {
    let t = TestEngine::new();
    let bad = [
        ConnectionConfig::default(),
        ConnectionConfig::local(":memory:").with_sync(true),
        ConnectionConfig::local(":memory:").with_remote_encryption_key("k"),
        ConnectionConfig::local(":memory:").with_connect_timeout_ms(0),
        ConnectionConfig::local(":memory:").with_pool_size(0),
    ];
    for config in bad {
        let r = t.engine.connect(config.clone());
        assert!(matches!(r, Err(Error::InvalidConfig { .. })), "{:?} -> {:?}", config, r);
    }
    assert_eq!(t.recorder.open_count(), 0);
    assert_eq!(t.engine.connection_count().unwrap(), 0);
}

#[test]
fn hung_open_times_out_and_leaves_nothing() {
    let t = TestEngine::new();
    let gate = t.recorder.gate(OPEN);
    let config = ConnectionConfig::local(":memory:").with_connect_timeout_ms(30);

    let (r, elapsed) = timed(|| t.engine.connect(config));
    match r {
        Err(Error::Timeout { operation, after }) => {
            assert_eq!(operation, "connect");
            assert_eq!(after, Duration::from_millis(30));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(elapsed < PROMPT);
    assert_eq!(t.engine.connection_count().unwrap(), 0);

    gate.open();
    t.recorder.remove_gate(OPEN);
    assert!(t.engine.ping(&t.memory()).unwrap());
}

#[test]
fn unique_violation_names_the_index() {
    let t = TestEngine::new();
    let conn = t.with_table();
    t.engine.execute(&conn, "INSERT INTO t VALUES (1)", &[]).unwrap();

    let err = t
        .engine
        .execute(&conn, "INSERT INTO t VALUES (1)", &[])
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("UNIQUE constraint failed: t.v"), "{}", message);
    assert!(message.contains("(index: sqlite_autoindex_t_1)"), "{}", message);
    assert!(!err.is_retryable());
}

#[test]
fn interrupt_aborts_long_statement() {
    let t = TestEngine::new();
    let conn = t.memory();
    let endless = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                   SELECT count(*) FROM n";

    let worker = {
        let (e, c) = (Arc::clone(&t.engine), conn.clone());
        thread::spawn(move || e.query(&c, endless, &[]))
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !worker.is_finished() {
        assert!(std::time::Instant::now() < deadline, "statement was never interrupted");
        t.engine.interrupt(&conn).unwrap();
        thread::sleep(Duration::from_millis(10));
    }
    match worker.join().unwrap() {
        Err(Error::Driver { message }) => assert!(message.contains("interrupt"), "{}", message),
        other => panic!("expected interrupted driver error, got {:?}", other),
    }

    // The connection survives the interrupt.
    assert!(t.engine.ping(&conn).unwrap());
}

#[test]
fn busy_timeout_bounds_lock_waits() {
    let t = TestEngine::new();
    let e = &t.engine;
    let holder = t.file("busy.db");
    e.execute(&holder, "CREATE TABLE t (v INTEGER)", &[]).unwrap();
    let waiter = t.file("busy.db");
    e.set_busy_timeout(&waiter, 50).unwrap();

    let txn = e.begin_with(&holder, TransactionBehavior::Immediate).unwrap();
    e.txn_execute(&txn, &holder, "INSERT INTO t VALUES (1)", &[]).unwrap();

    let (r, elapsed) = timed(|| e.execute(&waiter, "INSERT INTO t VALUES (2)", &[]));
    let err = r.unwrap_err();
    assert!(err.to_string().contains("locked"), "{}", err);
    assert!(matches!(err, Error::Driver { .. }));
    assert!(elapsed >= Duration::from_millis(40));
    assert!(elapsed < PROMPT);

    e.commit(&txn, &holder).unwrap();
    e.execute(&waiter, "INSERT INTO t VALUES (2)", &[]).unwrap();
    let r = e.query(&waiter, "SELECT count(*) FROM t", &[]).unwrap();
    assert_eq!(r.scalar(), Some(&Value::Integer(2)));
}

#[test]
fn reset_clears_session_state() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.memory();
    e.execute(&conn, "CREATE TABLE t (v)", &[]).unwrap();
    e.execute(&conn, "INSERT INTO t VALUES (1)", &[]).unwrap();

    e.reset(&conn).unwrap();
    assert!(e.is_autocommit(&conn).unwrap());
    // Data is untouched; only ephemeral state goes.
    let r = e.query(&conn, "SELECT count(*) FROM t", &[]).unwrap();
    assert_eq!(r.scalar(), Some(&Value::Integer(1)));
}

#[test]
fn metadata_tracks_writes_through_every_path() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();

    e.execute(&conn, "INSERT INTO t VALUES (1), (2)", &[]).unwrap();
    assert_eq!(e.changes(&conn).unwrap(), 2);

    let txn = e.begin(&conn).unwrap();
    assert_eq!(e.txn_execute(&txn, &conn, "UPDATE t SET v = v + 10", &[]).unwrap(), 2);
    assert!(!e.is_autocommit(&conn).unwrap());
    e.commit(&txn, &conn).unwrap();

    let stmt = e.prepare(&conn, "INSERT INTO t VALUES (?)").unwrap();
    assert_eq!(e.stmt_execute(&stmt, &conn, &[99.into()]).unwrap(), 1);
    assert_eq!(e.last_insert_rowid(&conn).unwrap(), 3);
    assert_eq!(e.total_changes(&conn).unwrap(), 5);
    assert_eq!(t.values(&conn), vec![11, 12, 99]);
}

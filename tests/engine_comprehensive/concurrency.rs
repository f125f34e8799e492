//! Concurrency tests
//!
//! A gate in the instrumented driver parks a session call mid-flight. While
//! it is parked, registries must stay available to everything else.

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn parked_call_does_not_block_unrelated_work() {
    let t = TestEngine::new();
    let e = Arc::clone(&t.engine);
    let slow = t.memory();
    let slow_stmt = e.prepare(&slow, "SELECT 1 AS one").unwrap();
    let gate = t.recorder.gate("SELECT 'slow'");

    let worker = {
        let (e, slow) = (Arc::clone(&e), slow.clone());
        thread::spawn(move || e.execute(&slow, "SELECT 'slow'", &[]))
    };
    assert!(gate.wait_entered(1, PROMPT));

    let (_, took) = timed(|| {
        // Every registry: connections, transactions, statements, cursors.
        let other = t.with_table();
        let txn = e.begin(&other).unwrap();
        e.txn_execute(&txn, &other, "INSERT INTO t VALUES (1)", &[]).unwrap();
        e.commit(&txn, &other).unwrap();

        let stmt = e.prepare(&other, "SELECT v FROM t").unwrap();
        assert_eq!(e.stmt_query(&stmt, &other, &[]).unwrap().rows.len(), 1);
        e.close_statement(&stmt).unwrap();

        let cursor = e
            .declare(CursorContext::Connection(other.clone()), "SELECT v FROM t", &[])
            .unwrap();
        assert_eq!(e.fetch(&cursor, &other, 10).unwrap().count, 1);
        e.close_cursor(&cursor).unwrap();
        e.close(&other).unwrap();

        // Metadata of the parked connection's statement needs no session.
        assert_eq!(e.stmt_column_name(&slow_stmt, &slow, 0).unwrap(), "one");
        assert_eq!(e.mode(&slow).unwrap(), ConnectionMode::Local);
    });
    assert!(took < PROMPT, "unrelated work took {:?}", took);
    assert!(!worker.is_finished());

    gate.open();
    let r = worker.join().unwrap().unwrap();
    assert_eq!(r.scalar(), Some(&Value::from("slow")));
}

#[test]
fn same_connection_calls_are_serialized() {
    let t = TestEngine::new();
    let e = Arc::clone(&t.engine);
    let conn = t.memory();
    let gate = t.recorder.gate("SELECT 'first'");

    let first = {
        let (e, conn) = (Arc::clone(&e), conn.clone());
        thread::spawn(move || e.query(&conn, "SELECT 'first'", &[]))
    };
    assert!(gate.wait_entered(1, PROMPT));

    let second = {
        let (e, conn) = (Arc::clone(&e), conn.clone());
        thread::spawn(move || e.query(&conn, "SELECT 'second'", &[]))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!second.is_finished());

    gate.open();
    assert!(first.join().unwrap().is_ok());
    assert!(second.join().unwrap().is_ok());
}

#[test]
fn independent_connections_run_in_parallel() {
    let t = TestEngine::new();
    let gate = t.recorder.gate("SELECT 'parked'");
    let conns: Vec<Handle> = (0..3).map(|_| t.memory()).collect();

    let workers: Vec<_> = conns
        .iter()
        .map(|c| {
            let (e, c) = (Arc::clone(&t.engine), c.clone());
            thread::spawn(move || e.query(&c, "SELECT 'parked'", &[]))
        })
        .collect();

    // All three are inside the driver at once.
    assert!(gate.wait_entered(3, PROMPT));
    gate.open();
    for w in workers {
        assert!(w.join().unwrap().is_ok());
    }
}

#[test]
fn racing_begins_admit_exactly_one() {
    let t = TestEngine::new();
    let conn = t.memory();
    let barrier = Arc::new(Barrier::new(8));

    let results: Vec<_> = (0..8)
        .map(|_| {
            let (e, c, b) = (Arc::clone(&t.engine), conn.clone(), Arc::clone(&barrier));
            thread::spawn(move || {
                b.wait();
                e.begin(&c)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let winners: Vec<&Handle> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for r in &results {
        if let Err(e) = r {
            assert!(matches!(e, Error::TransactionActive { .. }), "{:?}", e);
        }
    }
    t.engine.commit(winners[0], &conn).unwrap();
}

#[test]
fn concurrent_churn_leaves_nothing_behind() {
    let t = TestEngine::new();
    let barrier = Arc::new(Barrier::new(6));

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let (e, b) = (Arc::clone(&t.engine), Arc::clone(&barrier));
            thread::spawn(move || {
                b.wait();
                for _ in 0..10 {
                    let c = e.connect(ConnectionConfig::local(":memory:")).unwrap();
                    let s = e.prepare(&c, "SELECT ?").unwrap();
                    let r = e.stmt_query(&s, &c, &[Value::Integer(i)]).unwrap();
                    assert_eq!(r.scalar(), Some(&Value::Integer(i)));
                    let txn = e.begin(&c).unwrap();
                    let cur = e
                        .declare(
                            CursorContext::Transaction {
                                txn: txn.clone(),
                                conn: c.clone(),
                            },
                            "SELECT 1",
                            &[],
                        )
                        .unwrap();
                    assert_eq!(e.fetch(&cur, &c, 1).unwrap().count, 1);
                    e.close(&c).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(t.engine.resource_counts().unwrap(), (0, 0, 0, 0));
}

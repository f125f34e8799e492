//! Replication frame tests over emulated replicas

use crate::common::*;
use std::time::Duration;

#[test]
fn read_after_write_across_replicas() {
    let t = TestEngine::new();
    let e = &t.engine;
    let writer = t.replica("shared.db");
    let reader = t.replica("shared.db");
    assert_eq!(e.mode(&writer).unwrap(), ConnectionMode::Replica);

    e.execute(&writer, "CREATE TABLE t (v INTEGER UNIQUE)", &[]).unwrap();
    e.execute(&writer, "INSERT INTO t VALUES (?)", &[Value::Integer(7)]).unwrap();
    let written = e.max_write_frame(&writer).unwrap();
    assert_eq!(written, 2);

    assert!(e.current_frame(&reader).unwrap() < written);
    let applied = e.sync_until(&reader, written, PROMPT).unwrap();
    assert!(applied >= written);
    assert!(e.current_frame(&reader).unwrap() >= written);
    assert_eq!(t.values(&reader), vec![7]);

    // Reads add no frames.
    assert_eq!(e.max_write_frame(&reader).unwrap(), written);
}

#[test]
fn sync_until_unreachable_frame_times_out() {
    let t = TestEngine::new();
    let conn = t.replica("lag.db");
    let after = Duration::from_millis(40);

    let (r, elapsed) = timed(|| t.engine.sync_until(&conn, 1_000, after));
    match r {
        Err(Error::Timeout { operation, after: reported }) => {
            assert_eq!(operation, "sync_until");
            assert_eq!(reported, after);
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(elapsed < PROMPT);

    // The connection is still usable.
    assert!(t.engine.ping(&conn).unwrap());
}

#[test]
fn sync_pulls_remote_frames() {
    let t = TestEngine::new();
    let conn = t.replica("pull.db");
    let log = t.recorder.frame_log(&t.path("pull.db"));
    log.advance_primary(3);

    assert_eq!(t.engine.current_frame(&conn).unwrap(), 0);
    t.engine.sync(&conn).unwrap();
    assert_eq!(t.engine.current_frame(&conn).unwrap(), 3);
    assert_eq!(t.engine.flush(&conn).unwrap(), 3);
}

#[test]
fn frame_operations_unsupported_without_replica() {
    let t = TestEngine::new();
    let e = &t.engine;
    let local = t.memory();
    let remote = e
        .connect(ConnectionConfig::remote("libsql://primary.example", "token"))
        .unwrap();
    assert_eq!(e.mode(&remote).unwrap(), ConnectionMode::Remote);

    for conn in [&local, &remote] {
        for r in [
            e.current_frame(conn),
            e.flush(conn),
            e.max_write_frame(conn),
            e.sync_until(conn, 1, PROMPT),
        ] {
            assert!(matches!(r, Err(Error::UnsupportedOperation { .. })), "{:?}", r);
        }
        // Plain sync has nothing to do and succeeds.
        e.sync(conn).unwrap();
    }
}

#[test]
fn freeze_is_refused() {
    let t = TestEngine::new();
    let conn = t.replica("frozen.db");
    assert!(matches!(
        t.engine.freeze(&conn),
        Err(Error::UnsupportedOperation { .. })
    ));
    assert_not_found(t.engine.freeze(&Handle::from("conn-missing")));
    assert!(t.engine.ping(&conn).unwrap());
}

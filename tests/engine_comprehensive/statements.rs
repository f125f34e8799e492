//! Prepared statement tests

use crate::common::*;

#[test]
fn select_sum_reuses_one_compile() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.memory();

    let stmt = e.prepare(&conn, "SELECT ? + ?").unwrap();
    let r = e.stmt_query(&stmt, &conn, &[2.into(), 3.into()]).unwrap();
    assert_eq!(r.scalar(), Some(&Value::Integer(5)));
    let r = e.stmt_query(&stmt, &conn, &[10.into(), 20.into()]).unwrap();
    assert_eq!(r.scalar(), Some(&Value::Integer(30)));

    assert_eq!(t.recorder.compile_count_for("SELECT ? + ?"), 1);
}

#[test]
fn reset_reuse_matches_fresh_prepares() {
    let sql = "SELECT ? * 3, upper(?)";
    let inputs: Vec<(i64, &str)> = vec![(1, "a"), (7, "bc"), (-2, ""), (40, "xyz")];

    // One statement, reset between runs.
    let reused = TestEngine::new();
    let conn = reused.memory();
    let stmt = reused.engine.prepare(&conn, sql).unwrap();
    let mut reused_rows = Vec::new();
    for (n, s) in &inputs {
        let r = reused
            .engine
            .stmt_query(&stmt, &conn, &[Value::Integer(*n), Value::from(*s)])
            .unwrap();
        reused_rows.push(r.rows);
        reused.engine.stmt_reset(&stmt, &conn).unwrap();
    }

    // A fresh prepare, execute, close per input.
    let fresh = TestEngine::new();
    let conn2 = fresh.memory();
    let mut fresh_rows = Vec::new();
    for (n, s) in &inputs {
        let stmt = fresh.engine.prepare(&conn2, sql).unwrap();
        let r = fresh
            .engine
            .stmt_query(&stmt, &conn2, &[Value::Integer(*n), Value::from(*s)])
            .unwrap();
        fresh_rows.push(r.rows);
        fresh.engine.close_statement(&stmt).unwrap();
    }

    assert_eq!(reused_rows, fresh_rows);
    assert_eq!(reused.recorder.compile_count_for(sql), 1);
    assert_eq!(fresh.recorder.compile_count_for(sql), inputs.len());
}

#[test]
fn prepare_surfaces_syntax_errors() {
    let t = TestEngine::new();
    let conn = t.memory();
    match t.engine.prepare(&conn, "SELEKT 1") {
        Err(Error::Driver { message }) => assert!(message.contains("syntax error"), "{}", message),
        other => panic!("expected driver error, got {:?}", other),
    }
    assert_eq!(t.engine.resource_counts().unwrap().2, 0);
    assert_eq!(t.recorder.compile_count(), 0);
}

#[test]
fn introspection_reads_compiled_metadata() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.memory();
    e.execute(&conn, "CREATE TABLE users (id INTEGER, email TEXT)", &[]).unwrap();
    let stmt = e
        .prepare(&conn, "SELECT id, email FROM users WHERE id > :min AND email LIKE ?")
        .unwrap();

    assert_eq!(e.stmt_column_count(&stmt, &conn).unwrap(), 2);
    assert_eq!(e.stmt_column_name(&stmt, &conn, 0).unwrap(), "id");
    assert_eq!(e.stmt_column_name(&stmt, &conn, 1).unwrap(), "email");
    assert!(matches!(
        e.stmt_column_name(&stmt, &conn, 5),
        Err(Error::InvalidInput { .. })
    ));
    let columns = e.stmt_columns(&stmt, &conn).unwrap();
    assert_eq!(columns[1].decl_type.as_deref(), Some("TEXT"));

    assert_eq!(e.stmt_parameter_count(&stmt, &conn).unwrap(), 2);
    assert_eq!(e.stmt_parameter_name(&stmt, &conn, 1).unwrap().as_deref(), Some(":min"));
    assert_eq!(e.stmt_parameter_name(&stmt, &conn, 2).unwrap(), None);
    assert_eq!(
        e.stmt_sql(&stmt, &conn).unwrap(),
        "SELECT id, email FROM users WHERE id > :min AND email LIKE ?"
    );

    // Nothing ran: the table is still empty and no rows were touched.
    assert_eq!(e.changes(&conn).unwrap(), 0);
}

#[test]
fn statements_survive_transactions() {
    let t = TestEngine::new();
    let e = &t.engine;
    let conn = t.with_table();
    let insert = e.prepare(&conn, "INSERT INTO t VALUES (?)").unwrap();

    let txn = e.begin(&conn).unwrap();
    e.stmt_execute(&insert, &conn, &[1.into()]).unwrap();
    e.rollback(&txn, &conn).unwrap();

    e.stmt_execute(&insert, &conn, &[2.into()]).unwrap();
    assert_eq!(t.values(&conn), vec![2]);
    assert_eq!(t.recorder.compile_count_for("INSERT INTO t VALUES (?)"), 1);
}

//! Bundled SQLite driver
//!
//! Each session owns one `rusqlite::Connection` on a dedicated worker
//! thread. Async callers send jobs over a channel and await the reply, so
//! the scheduler never waits on SQLite. Only local databases (a file path
//! or `:memory:`) are served. Remote and replica shapes and at-rest
//! encryption need a network transport or cipher this build does not ship,
//! so they are refused with `UnsupportedOperation`.
//!
//! ## Statements
//!
//! A prepared statement is compiled once and pinned on the worker under a
//! numeric id until its [`PreparedStatement`] is dropped. Pinned statements
//! are never evicted, so a statement handle never recompiles from source
//! text. Ad-hoc `execute`/`query` calls go through the connection's LRU
//! statement cache, sized by `statement_cache_capacity`.

use crate::{
    Driver, Interrupter, PreparedStatement, Replicator, RowStream, Session,
    TransactionBehavior, VecRowStream,
};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection, InterruptHandle, Statement};
use sqlbridge_core::{
    Column, ConnectionConfig, ConnectionMode, EngineConfig, Error, QueryResult, Result, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

// ============================================================================
// Value conversion
// ============================================================================

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn driver_error(e: rusqlite::Error) -> Error {
    Error::driver(e.to_string())
}

fn changes(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT changes()", [], |r| r.get::<_, i64>(0))
        .map(|n| n as u64)
}

fn run_execute(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> rusqlite::Result<u64> {
    if stmt.column_count() > 0 {
        // Row-returning statement run for its side effects: count the rows.
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql)))?;
        let mut n = 0u64;
        while rows.next()?.is_some() {
            n += 1;
        }
        return Ok(n);
    }
    stmt.execute(params_from_iter(params.iter().map(to_sql)))
        .map(|n| n as u64)
}

fn run_query(
    conn: &Connection,
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
) -> rusqlite::Result<QueryResult> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut out = Vec::new();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql)))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_sql(row.get_ref(i)?));
        }
        out.push(values);
    }
    drop(rows);

    if width == 0 {
        return Ok(QueryResult::affected(changes(conn)?));
    }
    Ok(QueryResult::with_rows(columns, out))
}

fn begin_sql(behavior: TransactionBehavior) -> &'static str {
    match behavior {
        TransactionBehavior::Deferred => "BEGIN DEFERRED",
        TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
        TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        TransactionBehavior::ReadOnly => "BEGIN DEFERRED; PRAGMA query_only = ON",
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Statements pinned on a worker, keyed by id
type Statements<'c> = HashMap<u64, Statement<'c>>;

type Job = Box<dyn for<'c> FnOnce(&'c Connection, &mut Statements<'c>) + Send>;

enum Command {
    Run(Job),
    Close(oneshot::Sender<rusqlite::Result<()>>),
}

fn job<F>(f: F) -> Job
where
    F: for<'c> FnOnce(&'c Connection, &mut Statements<'c>) + Send + 'static,
{
    Box::new(f)
}

fn session_closed() -> Error {
    Error::driver("session is closed")
}

fn worker_lost() -> Error {
    Error::Internal {
        context: "sqlite worker stopped".to_string(),
    }
}

fn finalized() -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_MISUSE),
        Some("statement was finalized".to_string()),
    )
}

fn pinned<'s, 'c>(statements: &'s mut Statements<'c>, id: u64) -> rusqlite::Result<&'s mut Statement<'c>> {
    statements.get_mut(&id).ok_or_else(finalized)
}

struct OpenOptions {
    path: String,
    busy_timeout_ms: Option<u64>,
    cache_capacity: usize,
}

fn open_connection(options: &OpenOptions) -> rusqlite::Result<Connection> {
    let conn = if options.path == MEMORY_PATH {
        Connection::open_in_memory()?
    } else {
        Connection::open(&options.path)?
    };
    conn.set_prepared_statement_cache_capacity(options.cache_capacity);
    if let Some(ms) = options.busy_timeout_ms {
        conn.busy_timeout(Duration::from_millis(ms))?;
    }
    Ok(conn)
}

/// Runs jobs until a close arrives or every sender is gone.
///
/// Pinned statements borrow `conn`, so they are dropped here before the
/// caller closes the connection.
fn serve(
    conn: &Connection,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<oneshot::Sender<rusqlite::Result<()>>> {
    let mut statements: Statements<'_> = HashMap::new();
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Run(job) => job(conn, &mut statements),
            Command::Close(reply) => return Some(reply),
        }
    }
    None
}

fn worker_main(
    options: OpenOptions,
    mut commands: mpsc::UnboundedReceiver<Command>,
    ready: oneshot::Sender<rusqlite::Result<InterruptHandle>>,
) {
    let conn = match open_connection(&options) {
        Ok(conn) => conn,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(conn.get_interrupt_handle())).is_err() {
        return;
    }

    let reply = serve(&conn, &mut commands);
    drop(commands);
    let closed = conn.close().map_err(|(_, e)| e);
    match reply {
        Some(reply) => {
            let _ = reply.send(closed);
        }
        None => {
            if let Err(e) = closed {
                error!(target: "sqlbridge::driver", path = %options.path, error = %e, "Connection close failed");
            }
        }
    }
}

/// Sending side of a session's worker; cheap to clone
#[derive(Clone)]
struct Worker {
    commands: mpsc::UnboundedSender<Command>,
}

impl Worker {
    async fn start(options: OpenOptions) -> Result<(Self, InterruptHandle)> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (ready, opened) = oneshot::channel();
        std::thread::Builder::new()
            .name("sqlbridge-sqlite".to_string())
            .spawn(move || worker_main(options, receiver, ready))
            .map_err(|e| Error::Internal {
                context: format!("sqlite worker spawn: {}", e),
            })?;
        let interrupt = opened.await.map_err(|_| worker_lost())?.map_err(driver_error)?;
        Ok((Self { commands }, interrupt))
    }

    /// Run `f` on the worker and wait for its result.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c Connection, &mut Statements<'c>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let work = job(move |conn, statements| {
            let _ = reply.send(f(conn, statements));
        });
        self.commands
            .send(Command::Run(work))
            .map_err(|_| session_closed())?;
        result.await.map_err(|_| worker_lost())?.map_err(driver_error)
    }

    /// Finalize a pinned statement without waiting.
    fn release(&self, id: u64) {
        let _ = self.commands.send(Command::Run(job(move |_, statements| {
            statements.remove(&id);
        })));
    }

    async fn close(&self) -> Result<()> {
        let (reply, closed) = oneshot::channel();
        self.commands
            .send(Command::Close(reply))
            .map_err(|_| session_closed())?;
        closed.await.map_err(|_| worker_lost())?.map_err(driver_error)
    }
}

// ============================================================================
// SqliteDriver
// ============================================================================

/// Driver backed by the bundled SQLite library
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    statement_cache_capacity: usize,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::from_engine_config(&EngineConfig::default())
    }
}

impl SqliteDriver {
    /// Driver with the default statement cache size
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver sized by `config.statement_cache_capacity`
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            statement_cache_capacity: config.statement_cache_capacity,
        }
    }

    /// Override the statement cache size
    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Size of each session's ad-hoc statement cache
    pub fn statement_cache_capacity(&self) -> usize {
        self.statement_cache_capacity
    }

    async fn open_session(&self, config: &ConnectionConfig) -> Result<SqliteSession> {
        let mode = config.mode()?;
        if mode != ConnectionMode::Local {
            return Err(Error::unsupported(
                format!("connect ({})", mode),
                "the bundled sqlite driver has no network transport",
            ));
        }
        if config.encryption_key.is_some() {
            return Err(Error::unsupported(
                "encryption_key",
                "the bundled sqlite build has no cipher",
            ));
        }
        let path = config
            .local_path
            .clone()
            .ok_or_else(|| Error::invalid_config("local_path is required"))?;

        let (worker, interrupt) = Worker::start(OpenOptions {
            path,
            busy_timeout_ms: config.busy_timeout_ms,
            cache_capacity: self.statement_cache_capacity,
        })
        .await?;

        debug!(target: "sqlbridge::driver", path = ?config.local_path, "Opened sqlite session");

        Ok(SqliteSession {
            worker,
            interrupter: Arc::new(SqliteInterrupter(interrupt)),
            busy_timeout_ms: config.busy_timeout_ms,
            read_only: false,
            closed: false,
            next_statement: 0,
        })
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn configure(&mut self, config: &EngineConfig) {
        self.statement_cache_capacity = config.statement_cache_capacity;
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        Ok(Box::new(self.open_session(config).await?))
    }
}

// ============================================================================
// SqliteSession
// ============================================================================

struct SqliteInterrupter(InterruptHandle);

impl Interrupter for SqliteInterrupter {
    fn interrupt(&self) {
        self.0.interrupt();
    }
}

struct SqliteSession {
    worker: Worker,
    interrupter: Arc<SqliteInterrupter>,
    busy_timeout_ms: Option<u64>,
    read_only: bool,
    closed: bool,
    next_statement: u64,
}

impl SqliteSession {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(session_closed());
        }
        Ok(())
    }

    async fn finish(&mut self, sql: &'static str) -> Result<()> {
        self.check_open()?;
        let read_only = std::mem::take(&mut self.read_only);
        self.worker
            .call(move |c, _| {
                let outcome = c.execute_batch(sql);
                if read_only {
                    c.execute_batch("PRAGMA query_only = OFF")?;
                }
                outcome
            })
            .await
    }

    async fn prepare_pinned(&mut self, sql: &str) -> Result<SqliteStatement> {
        self.check_open()?;
        self.next_statement += 1;
        let id = self.next_statement;
        let owned = sql.to_string();
        let (columns, param_names) = self
            .worker
            .call(move |c, statements| {
                let stmt = c.prepare(&owned)?;
                let columns = stmt
                    .columns()
                    .into_iter()
                    .map(|col| Column {
                        name: col.name().to_string(),
                        decl_type: col.decl_type().map(String::from),
                    })
                    .collect::<Vec<_>>();
                let param_names = (1..=stmt.parameter_count())
                    .map(|i| stmt.parameter_name(i).map(String::from))
                    .collect::<Vec<_>>();
                statements.insert(id, stmt);
                Ok((columns, param_names))
            })
            .await?;

        Ok(SqliteStatement {
            worker: self.worker.clone(),
            id,
            sql: sql.to_string(),
            columns,
            param_names,
        })
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn ping(&mut self) -> Result<()> {
        self.check_open()?;
        self.worker
            .call(|c, _| c.query_row("SELECT 1", [], |_| Ok(())))
            .await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_open()?;
        let sql = sql.to_string();
        let params = params.to_vec();
        self.worker
            .call(move |c, _| {
                let mut stmt = c.prepare_cached(&sql)?;
                run_execute(&mut stmt, &params)
            })
            .await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.check_open()?;
        let sql = sql.to_string();
        let params = params.to_vec();
        self.worker
            .call(move |c, _| {
                let mut stmt = c.prepare_cached(&sql)?;
                run_query(c, &mut stmt, &params)
            })
            .await
    }

    async fn query_stream(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        // rusqlite rows borrow the connection, so the stream is filled up front.
        let result = self.query(sql, params).await?;
        Ok(Box::new(VecRowStream::new(result)))
    }

    async fn begin(&mut self, behavior: TransactionBehavior) -> Result<()> {
        self.check_open()?;
        self.worker
            .call(move |c, _| c.execute_batch(begin_sql(behavior)))
            .await?;
        self.read_only = behavior == TransactionBehavior::ReadOnly;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Ok(Box::new(self.prepare_pinned(sql).await?))
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.check_open()?;
        let sql = sql.to_string();
        self.worker.call(move |c, _| c.execute_batch(&sql)).await
    }

    async fn reset(&mut self) -> Result<()> {
        self.check_open()?;
        let busy = self.busy_timeout_ms.unwrap_or(0);
        self.read_only = false;
        self.worker
            .call(move |c, _| {
                if !c.is_autocommit() {
                    c.execute_batch("ROLLBACK")?;
                }
                c.execute_batch("PRAGMA query_only = OFF")?;
                c.busy_timeout(Duration::from_millis(busy))
            })
            .await
    }

    async fn set_busy_timeout(&mut self, ms: u64) -> Result<()> {
        self.check_open()?;
        self.worker
            .call(move |c, _| c.busy_timeout(Duration::from_millis(ms)))
            .await?;
        self.busy_timeout_ms = Some(ms);
        Ok(())
    }

    async fn last_insert_rowid(&mut self) -> Result<i64> {
        self.check_open()?;
        self.worker.call(|c, _| Ok(c.last_insert_rowid())).await
    }

    async fn changes(&mut self) -> Result<u64> {
        self.check_open()?;
        self.worker.call(|c, _| changes(c)).await
    }

    async fn total_changes(&mut self) -> Result<u64> {
        self.check_open()?;
        self.worker
            .call(|c, _| {
                c.query_row("SELECT total_changes()", [], |r| r.get::<_, i64>(0))
                    .map(|n| n as u64)
            })
            .await
    }

    async fn is_autocommit(&mut self) -> Result<bool> {
        self.check_open()?;
        self.worker.call(|c, _| Ok(c.is_autocommit())).await
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        self.interrupter.clone()
    }

    fn replicator(&self) -> Option<Arc<dyn Replicator>> {
        None
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Pinned statements are finalized by the worker before the
        // connection closes; statement handles outliving this see a closed
        // session.
        self.worker.close().await
    }
}

// ============================================================================
// SqliteStatement
// ============================================================================

/// A statement pinned on its session's worker
struct SqliteStatement {
    worker: Worker,
    id: u64,
    sql: String,
    columns: Vec<Column>,
    param_names: Vec<Option<String>>,
}

impl SqliteStatement {
    #[cfg(test)]
    async fn run_count(&self) -> Result<i32> {
        let id = self.id;
        self.worker
            .call(move |_, statements| {
                Ok(pinned(statements, id)?.get_status(rusqlite::StatementStatus::Run))
            })
            .await
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        self.worker.release(self.id);
    }
}

#[async_trait]
impl PreparedStatement for SqliteStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn reset(&mut self) -> Result<()> {
        let id = self.id;
        self.worker
            .call(move |_, statements| {
                pinned(statements, id)?.clear_bindings();
                Ok(())
            })
            .await
    }

    async fn execute(&mut self, params: &[Value]) -> Result<u64> {
        let (id, params) = (self.id, params.to_vec());
        self.worker
            .call(move |_, statements| run_execute(pinned(statements, id)?, &params))
            .await
    }

    async fn query(&mut self, params: &[Value]) -> Result<QueryResult> {
        let (id, params) = (self.id, params.to_vec());
        self.worker
            .call(move |c, statements| run_query(c, pinned(statements, id)?, &params))
            .await
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn parameter_count(&self) -> usize {
        self.param_names.len()
    }

    fn parameter_name(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.param_names.get(i))
            .and_then(|n| n.as_deref())
    }
}

//! Cursor manager
//!
//! A cursor is declared against a connection or a transaction. In buffered
//! mode every row is materialized at declare time and handed out from a
//! monotonic position; in streaming mode rows are pulled from the driver's
//! [`RowStream`] in batches. Both obey the same contract:
//!
//! - `fetch` returns at most `max_rows` rows and advances by that many
//! - past the end, `fetch` returns `count == 0` (never an error)
//! - once exhausted, rows and stream are dropped but the record stays, so
//!   repeated fetches keep returning `count == 0` until `close_cursor`

use crate::connection::run_query;
use crate::engine::Engine;
use sqlbridge_core::{CursorMode, Error, Handle, ResourceKind, Result, Value};
use sqlbridge_driver::RowStream;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Where a cursor's query runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorContext {
    /// Directly on a connection
    Connection(Handle),
    /// Inside a transaction, presented through its owning connection
    Transaction {
        /// Transaction handle
        txn: Handle,
        /// Connection the transaction belongs to
        conn: Handle,
    },
}

impl CursorContext {
    /// Connection the cursor will belong to
    pub fn connection(&self) -> &Handle {
        match self {
            CursorContext::Connection(conn) => conn,
            CursorContext::Transaction { conn, .. } => conn,
        }
    }
}

/// One batch returned by [`Engine::fetch`]
#[derive(Debug, Clone, PartialEq)]
pub struct Fetch {
    /// Column names captured at declare time
    pub columns: Vec<String>,
    /// Rows in this batch
    pub rows: Vec<Vec<Value>>,
    /// `rows.len()`; zero once the cursor is exhausted
    pub count: usize,
}

enum CursorState {
    Buffered {
        rows: Vec<Vec<Value>>,
        position: usize,
    },
    Streaming(Box<dyn RowStream>),
    Exhausted,
}

impl CursorState {
    async fn next(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>> {
        let (batch, done) = match self {
            CursorState::Buffered { rows, position } => {
                let end = position.saturating_add(max_rows).min(rows.len());
                let batch = rows[*position..end].to_vec();
                *position = end;
                (batch, end == rows.len())
            }
            CursorState::Streaming(stream) => {
                let batch = stream.next_batch(max_rows).await?;
                let done = batch.is_empty();
                (batch, done)
            }
            CursorState::Exhausted => (Vec::new(), false),
        };
        if done {
            *self = CursorState::Exhausted;
        }
        Ok(batch)
    }
}

pub(crate) struct CursorRecord {
    pub(crate) owner: Handle,
    columns: Vec<String>,
    state: Mutex<CursorState>,
    closed: AtomicBool,
}

impl CursorRecord {
    pub(crate) fn retire(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_live(&self, handle: &Handle) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::not_found(ResourceKind::Cursor, handle));
        }
        Ok(())
    }
}

impl Engine {
    /// Run `sql` and open a cursor over its rows.
    ///
    /// Transaction contexts are ownership-checked, and a failure inside a
    /// transaction counts toward poisoning like any other statement.
    pub fn declare(&self, context: CursorContext, sql: &str, params: &[Value]) -> Result<Handle> {
        let conn = context.connection().clone();
        let (txn, connection) = match &context {
            CursorContext::Connection(conn) => (None, self.connection(conn)?),
            CursorContext::Transaction { txn, conn } => {
                let (record, connection) = self.usable_transaction(txn, conn)?;
                (Some((txn.clone(), record)), connection)
            }
        };

        let mode = self.config.cursor_mode;
        let (ch, sql, params) = (conn.clone(), sql.to_string(), params.to_vec());
        let (columns, state) = self.bridge.run("declare", async move {
            let mut session = connection.session(&ch).await?;
            if let Some((handle, record)) = &txn {
                record.ensure_usable(handle)?;
            }
            let outcome = match mode {
                CursorMode::Buffered => run_query(&mut **session, &sql, &params)
                    .await
                    .map(|r| {
                        let state = CursorState::Buffered {
                            rows: r.rows,
                            position: 0,
                        };
                        (r.columns, state)
                    }),
                CursorMode::Streaming => session.query_stream(&sql, &params).await.map(|s| {
                    let columns = s.columns().to_vec();
                    (columns, CursorState::Streaming(s))
                }),
            };
            match &txn {
                Some((handle, record)) => record.observe(handle, outcome),
                None => outcome,
            }
        })?;

        let cursor = self.cursors.insert(CursorRecord {
            owner: conn.clone(),
            columns,
            state: Mutex::new(state),
            closed: AtomicBool::new(false),
        })?;
        if !self.connections.contains(&conn)? {
            self.cursors.remove(&cursor)?;
            return Err(Error::not_found(ResourceKind::Connection, &conn));
        }
        debug!(target: "sqlbridge::cursor", cursor = %cursor, conn = %conn, mode = ?mode, "Declared");
        Ok(cursor)
    }

    /// Next batch of at most `max_rows` rows.
    ///
    /// Past the end this returns `count == 0`, and keeps doing so.
    pub fn fetch(&self, cursor: &Handle, conn: &Handle, max_rows: usize) -> Result<Fetch> {
        let record = self.cursors.require(cursor)?;
        if &record.owner != conn {
            return Err(Error::OwnershipViolation {
                kind: ResourceKind::Cursor,
                handle: cursor.clone(),
                presented: conn.clone(),
            });
        }
        record.check_live(cursor)?;
        self.connection(conn)?;

        let handle = cursor.clone();
        let (columns, rows) = self.bridge.run("fetch", async move {
            let mut state = record.state.lock().await;
            record.check_live(&handle)?;
            let rows = if max_rows == 0 {
                Vec::new()
            } else {
                state.next(max_rows).await?
            };
            Ok((record.columns.clone(), rows))
        })?;

        let count = rows.len();
        if count == 0 && max_rows > 0 {
            debug!(target: "sqlbridge::cursor", cursor = %cursor, "Exhausted");
        }
        Ok(Fetch {
            columns,
            rows,
            count,
        })
    }

    /// Release the cursor's rows or stream.
    pub fn close_cursor(&self, cursor: &Handle) -> Result<()> {
        let record = self
            .cursors
            .remove(cursor)?
            .ok_or_else(|| Error::not_found(ResourceKind::Cursor, cursor))?;
        record.retire();
        debug!(target: "sqlbridge::cursor", cursor = %cursor, "Closed");
        Ok(())
    }
}

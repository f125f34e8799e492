//! Connection manager
//!
//! A [`ConnectionRecord`] owns one live session behind its own async mutex,
//! so independent connections run fully in parallel while work on a single
//! connection is serialized. Registry locks are only taken to look the
//! record up; the session lock is only taken inside bridged futures.
//!
//! Closing a connection:
//! 1. removes it from the registry and flags it closed (in-flight holders of
//!    the record see the flag once they reach the session),
//! 2. drains every transaction, statement and cursor it owns,
//! 3. rolls back an open transaction and releases the session.

use crate::constraint;
use crate::engine::Engine;
use sqlbridge_core::{
    should_use_query, ConnectionConfig, ConnectionMode, Error, Handle, QueryResult, ResourceKind,
    Result, Value,
};
use sqlbridge_driver::{Interrupter, Replicator, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ============================================================================
// Connection Record
// ============================================================================

pub(crate) struct ConnectionRecord {
    pub(crate) mode: ConnectionMode,
    pub(crate) config: ConnectionConfig,
    session: Mutex<Box<dyn Session>>,
    closed: AtomicBool,
    /// Set while a transaction handle is live on this connection.
    pub(crate) in_transaction: AtomicBool,
    pub(crate) interrupter: Arc<dyn Interrupter>,
    pub(crate) replicator: Option<Arc<dyn Replicator>>,
}

impl ConnectionRecord {
    fn new(mode: ConnectionMode, config: ConnectionConfig, session: Box<dyn Session>) -> Self {
        Self {
            mode,
            config,
            interrupter: session.interrupter(),
            replicator: session.replicator(),
            session: Mutex::new(session),
            closed: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for the session; `NotFound` if the connection closed meanwhile.
    pub(crate) async fn session(&self, handle: &Handle) -> Result<MutexGuard<'_, Box<dyn Session>>> {
        let guard = self.session.lock().await;
        if self.is_closed() {
            return Err(Error::not_found(ResourceKind::Connection, handle));
        }
        Ok(guard)
    }
}

/// Resources released by closing one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CloseSummary {
    pub(crate) transactions_rolled_back: usize,
    pub(crate) statements_released: usize,
    pub(crate) cursors_released: usize,
}

// ============================================================================
// Routed execution
// ============================================================================

/// Run `sql` on the row-returning path when it yields rows, otherwise on the
/// execute path. Driver errors are enriched with constraint details.
pub(crate) async fn run_routed(
    session: &mut dyn Session,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult> {
    let outcome = if should_use_query(sql) {
        session.query(sql, params).await
    } else {
        session.execute(sql, params).await.map(QueryResult::affected)
    };
    match outcome {
        Ok(r) => Ok(r),
        Err(e) => Err(constraint::enrich(session, e).await),
    }
}

/// Row-returning path with constraint enrichment.
pub(crate) async fn run_query(
    session: &mut dyn Session,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult> {
    match session.query(sql, params).await {
        Ok(r) => Ok(r),
        Err(e) => Err(constraint::enrich(session, e).await),
    }
}

// ============================================================================
// Engine: connection operations
// ============================================================================

impl Engine {
    /// Live connection record; `NotFound` if unknown or closed.
    pub(crate) fn connection(&self, handle: &Handle) -> Result<Arc<ConnectionRecord>> {
        let record = self.connections.require(handle)?;
        if record.is_closed() {
            return Err(Error::not_found(ResourceKind::Connection, handle));
        }
        Ok(record)
    }

    /// Validate `config`, open a session within the connect timeout and
    /// register it.
    ///
    /// Invalid configurations are rejected before the driver is called. A
    /// failed connect registers nothing.
    pub fn connect(&self, config: ConnectionConfig) -> Result<Handle> {
        self.ensure_running()?;
        let mode = config.validate()?;

        let driver = Arc::clone(&self.driver);
        let open_config = config.clone();
        let session = self
            .bridge
            .run_with_timeout("connect", config.connect_timeout(), async move {
                let mut session = driver.open(&open_config).await?;
                if mode != ConnectionMode::Local {
                    session.ping().await?;
                }
                Ok(session)
            })?;

        let record = Arc::new(ConnectionRecord::new(mode, config, session));
        let handle = self.connections.insert_arc(Arc::clone(&record))?;

        if self.is_shut_down() {
            // Lost a race with shutdown: undo the registration.
            if let Err(e) = self.close_connection(&handle) {
                warn!(target: "sqlbridge::conn", conn = %handle, error = %e, "Close after losing the shutdown race failed");
            }
            return Err(Error::invalid_state("engine is shut down"));
        }

        info!(target: "sqlbridge::conn", conn = %handle, mode = %mode, "Connected");
        Ok(handle)
    }

    /// Round-trip a trivial statement on the session
    pub fn ping(&self, conn: &Handle) -> Result<bool> {
        let record = self.connection(conn)?;
        let handle = conn.clone();
        self.bridge.run("ping", async move {
            let mut session = record.session(&handle).await?;
            session.ping().await?;
            Ok(true)
        })
    }

    /// Close the connection, cascading through everything it owns.
    ///
    /// Later operations on the connection, or on any transaction, statement
    /// or cursor it owned, return `NotFound`.
    pub fn close(&self, conn: &Handle) -> Result<()> {
        self.close_connection(conn).map(|_| ())
    }

    pub(crate) fn close_connection(&self, conn: &Handle) -> Result<CloseSummary> {
        let record = self
            .connections
            .remove(conn)?
            .ok_or_else(|| Error::not_found(ResourceKind::Connection, conn))?;
        record.closed.store(true, Ordering::SeqCst);

        let mut first_error = None;
        let mut summary = CloseSummary::default();

        match self.transactions.drain_where(|_, t| &t.owner == conn) {
            Ok(txns) => {
                for (_, t) in &txns {
                    t.retire();
                }
                summary.transactions_rolled_back = txns.len();
            }
            Err(e) => first_error = Some(e),
        }
        match self.statements.drain_where(|_, s| &s.owner == conn) {
            Ok(stmts) => {
                for (_, s) in &stmts {
                    s.retire();
                }
                summary.statements_released = stmts.len();
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        match self.cursors.drain_where(|_, c| &c.owner == conn) {
            Ok(cursors) => {
                for (_, c) in &cursors {
                    c.retire();
                }
                summary.cursors_released = cursors.len();
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }

        let had_txn =
            record.in_transaction.swap(false, Ordering::SeqCst) || summary.transactions_rolled_back > 0;
        let handle = conn.clone();
        let closed = self.bridge.run("close", async move {
            let mut session = record.session.lock().await;
            if had_txn {
                if let Err(e) = session.rollback().await {
                    warn!(target: "sqlbridge::conn", conn = %handle, error = %e, "Rollback during close failed");
                }
            }
            session.close().await
        });

        info!(
            target: "sqlbridge::conn",
            conn = %conn,
            transactions = summary.transactions_rolled_back,
            statements = summary.statements_released,
            cursors = summary.cursors_released,
            "Closed"
        );

        if let Err(e) = closed {
            warn!(target: "sqlbridge::conn", conn = %conn, error = %e, "Session close failed");
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Run one statement on the connection.
    ///
    /// Statements that return rows (`SELECT`, `... RETURNING`) come back with
    /// columns and rows; others report the rows they changed.
    pub fn execute(&self, conn: &Handle, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let record = self.connection(conn)?;
        let (handle, sql, params) = (conn.clone(), sql.to_string(), params.to_vec());
        self.bridge.run("execute", async move {
            let mut session = record.session(&handle).await?;
            run_routed(&mut **session, &sql, &params).await
        })
    }

    /// Run one statement on the row-returning path.
    pub fn query(&self, conn: &Handle, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let record = self.connection(conn)?;
        let (handle, sql, params) = (conn.clone(), sql.to_string(), params.to_vec());
        self.bridge.run("query", async move {
            let mut session = record.session(&handle).await?;
            run_query(&mut **session, &sql, &params).await
        })
    }

    /// Ask the session to abort its current statement.
    ///
    /// Does not wait for the session lock; the interrupted call returns a
    /// driver error to its own caller.
    pub fn interrupt(&self, conn: &Handle) -> Result<()> {
        let record = self.connection(conn)?;
        record.interrupter.interrupt();
        debug!(target: "sqlbridge::conn", conn = %conn, "Interrupt signalled");
        Ok(())
    }

    /// Clear ephemeral session state without closing.
    ///
    /// # Errors
    ///
    /// `InvalidState` while a transaction handle is live on the connection.
    pub fn reset(&self, conn: &Handle) -> Result<()> {
        let record = self.connection(conn)?;
        if record.in_transaction.load(Ordering::SeqCst) {
            return Err(Error::invalid_state(format!(
                "connection {} has an active transaction",
                conn
            )));
        }
        let handle = conn.clone();
        self.bridge.run("reset", async move {
            let mut session = record.session(&handle).await?;
            session.reset().await
        })?;
        debug!(target: "sqlbridge::conn", conn = %conn, "Reset");
        Ok(())
    }

    /// Set how long statements wait on a locked database
    pub fn set_busy_timeout(&self, conn: &Handle, ms: u64) -> Result<()> {
        let record = self.connection(conn)?;
        let handle = conn.clone();
        self.bridge.run("set_busy_timeout", async move {
            let mut session = record.session(&handle).await?;
            session.set_busy_timeout(ms).await
        })
    }

    /// Rowid of the most recent successful insert
    pub fn last_insert_rowid(&self, conn: &Handle) -> Result<i64> {
        let record = self.connection(conn)?;
        let handle = conn.clone();
        self.bridge.run("last_insert_rowid", async move {
            let mut session = record.session(&handle).await?;
            session.last_insert_rowid().await
        })
    }

    /// Rows changed by the most recent statement
    pub fn changes(&self, conn: &Handle) -> Result<u64> {
        let record = self.connection(conn)?;
        let handle = conn.clone();
        self.bridge.run("changes", async move {
            let mut session = record.session(&handle).await?;
            session.changes().await
        })
    }

    /// Rows changed since the connection opened
    pub fn total_changes(&self, conn: &Handle) -> Result<u64> {
        let record = self.connection(conn)?;
        let handle = conn.clone();
        self.bridge.run("total_changes", async move {
            let mut session = record.session(&handle).await?;
            session.total_changes().await
        })
    }

    /// True when the session has no open transaction
    pub fn is_autocommit(&self, conn: &Handle) -> Result<bool> {
        let record = self.connection(conn)?;
        let handle = conn.clone();
        self.bridge.run("is_autocommit", async move {
            let mut session = record.session(&handle).await?;
            session.is_autocommit().await
        })
    }

    /// Topology of the connection
    pub fn mode(&self, conn: &Handle) -> Result<ConnectionMode> {
        Ok(self.connection(conn)?.mode)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> Result<usize> {
        self.connections.len()
    }
}

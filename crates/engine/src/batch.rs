//! Batch execution
//!
//! Sequential batches run statement by statement and stop at the first
//! failure, keeping whatever already succeeded. Transactional batches wrap
//! the same loop in one transaction and roll everything back on failure.
//! The native variants hand a multi-statement SQL string to the driver.
//!
//! Batches hold the connection's session for their whole run and are refused
//! while a transaction handle is live on the connection.

use crate::connection::{run_routed, ConnectionRecord};
use crate::constraint;
use crate::engine::Engine;
use sqlbridge_core::{Error, Handle, QueryResult, Result, Value};
use sqlbridge_driver::{Session, TransactionBehavior};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// One statement of a batch with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    /// SQL text
    pub sql: String,
    /// Positional parameters
    pub params: Vec<Value>,
}

impl BatchStatement {
    /// Statement with parameters
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<&str> for BatchStatement {
    fn from(sql: &str) -> Self {
        Self::new(sql, Vec::new())
    }
}

async fn run_all(session: &mut dyn Session, statements: &[BatchStatement]) -> Result<Vec<QueryResult>> {
    let mut results = Vec::with_capacity(statements.len());
    for stmt in statements {
        results.push(run_routed(session, &stmt.sql, &stmt.params).await?);
    }
    Ok(results)
}

/// Clears the connection's transaction reservation on drop.
struct Reservation(Arc<ConnectionRecord>);

impl Drop for Reservation {
    fn drop(&mut self) {
        self.0.in_transaction.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    fn batch_connection(&self, conn: &Handle) -> Result<Arc<ConnectionRecord>> {
        let connection = self.connection(conn)?;
        if connection.in_transaction.load(Ordering::SeqCst) {
            return Err(Error::TransactionActive {
                connection: conn.clone(),
            });
        }
        Ok(connection)
    }

    /// Take the connection's transaction slot for the length of a batch.
    fn reserve(&self, conn: &Handle) -> Result<Reservation> {
        let connection = self.connection(conn)?;
        connection
            .in_transaction
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::TransactionActive {
                connection: conn.clone(),
            })?;
        Ok(Reservation(connection))
    }

    /// Run `statements` in order, stopping at the first failure.
    ///
    /// Not atomic: statements before the failing one stay applied.
    pub fn execute_batch(&self, conn: &Handle, statements: &[BatchStatement]) -> Result<Vec<QueryResult>> {
        let connection = self.batch_connection(conn)?;
        let (handle, statements) = (conn.clone(), statements.to_vec());
        let results = self.bridge.run("execute_batch", async move {
            let mut session = connection.session(&handle).await?;
            run_all(&mut **session, &statements).await
        })?;
        debug!(target: "sqlbridge::conn", conn = %conn, statements = results.len(), "Batch executed");
        Ok(results)
    }

    /// Run `statements` in one transaction; any failure rolls back all of them.
    pub fn execute_transactional_batch(
        &self,
        conn: &Handle,
        statements: &[BatchStatement],
    ) -> Result<Vec<QueryResult>> {
        let reservation = self.reserve(conn)?;
        let connection = Arc::clone(&reservation.0);
        let (handle, statements) = (conn.clone(), statements.to_vec());
        let outcome = self.bridge.run("execute_transactional_batch", async move {
            let mut session = connection.session(&handle).await?;
            session.begin(TransactionBehavior::Deferred).await?;
            let results = match run_all(&mut **session, &statements).await {
                Ok(results) => results,
                Err(e) => {
                    if let Err(rb) = session.rollback().await {
                        warn!(target: "sqlbridge::conn", conn = %handle, error = %rb, "Batch rollback failed");
                    }
                    return Err(e);
                }
            };
            if let Err(e) = session.commit().await {
                if !session.is_autocommit().await.unwrap_or(true) {
                    if let Err(rb) = session.rollback().await {
                        warn!(target: "sqlbridge::conn", conn = %handle, error = %rb, "Rollback after failed batch commit failed");
                    }
                }
                return Err(e);
            }
            Ok(results)
        });
        drop(reservation);
        outcome
    }

    /// Hand a multi-statement SQL string to the driver.
    pub fn execute_batch_native(&self, conn: &Handle, sql: &str) -> Result<()> {
        let connection = self.batch_connection(conn)?;
        let (handle, sql) = (conn.clone(), sql.to_string());
        self.bridge.run("execute_batch_native", async move {
            let mut session = connection.session(&handle).await?;
            match session.execute_batch(&sql).await {
                Ok(()) => Ok(()),
                Err(e) => Err(constraint::enrich(&mut **session, e).await),
            }
        })
    }

    /// As [`execute_batch_native`](Self::execute_batch_native), atomically.
    pub fn execute_transactional_batch_native(&self, conn: &Handle, sql: &str) -> Result<()> {
        let reservation = self.reserve(conn)?;
        let connection = Arc::clone(&reservation.0);
        let (handle, sql) = (conn.clone(), sql.to_string());
        let outcome = self.bridge.run("execute_transactional_batch_native", async move {
            let mut session = connection.session(&handle).await?;
            session.execute_transactional_batch(&sql).await
        });
        drop(reservation);
        outcome
    }
}

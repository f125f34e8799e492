//! Transaction manager with savepoints
//!
//! A transaction record stores its owning connection's handle, never a
//! reference to the connection itself. Every operation checks ownership
//! before it looks at transaction state, so a mismatched caller is rejected
//! without mutating anything.
//!
//! ## Poisoning
//!
//! A driver failure while at least one savepoint is open, or a failure of a
//! savepoint-control statement, leaves the transaction unusable. Further
//! work returns [`Error::TransactionUnusable`]; `commit` rolls back and
//! returns the same error; `rollback` succeeds. Both discard the record.

use crate::connection::{run_query, ConnectionRecord};
use crate::constraint;
use crate::engine::Engine;
use sqlbridge_core::{
    validate_savepoint_name, Error, Handle, QueryResult, ResourceKind, Result, SafeMutex, Value,
};
use sqlbridge_driver::{Session, TransactionBehavior};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Transaction Record
// ============================================================================

#[derive(Debug, Default)]
struct TxnState {
    savepoints: Vec<String>,
    poisoned: Option<String>,
}

pub(crate) struct TransactionRecord {
    pub(crate) owner: Handle,
    pub(crate) behavior: TransactionBehavior,
    state: SafeMutex<TxnState>,
    finished: AtomicBool,
}

impl TransactionRecord {
    pub(crate) fn new(owner: Handle, behavior: TransactionBehavior) -> Self {
        Self {
            owner,
            behavior,
            state: SafeMutex::new(TxnState::default()),
            finished: AtomicBool::new(false),
        }
    }

    /// Mark the record dead; holders of the `Arc` see `NotFound`.
    pub(crate) fn retire(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Still registered and not poisoned.
    pub(crate) fn ensure_usable(&self, handle: &Handle) -> Result<()> {
        if self.is_finished() {
            return Err(Error::not_found(ResourceKind::Transaction, handle));
        }
        let state = self.state.acquire("transaction state")?;
        match &state.poisoned {
            Some(reason) => Err(Error::TransactionUnusable {
                handle: handle.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn poison(&self, handle: &Handle, reason: &Error) -> Result<()> {
        let mut state = self.state.acquire("transaction poison")?;
        if state.poisoned.is_none() {
            warn!(target: "sqlbridge::txn", txn = %handle, error = %reason, "Transaction poisoned");
            state.poisoned = Some(reason.to_string());
        }
        Ok(())
    }

    /// Record the outcome of a statement run inside the transaction.
    pub(crate) fn observe<T>(&self, handle: &Handle, outcome: Result<T>) -> Result<T> {
        if let Err(e @ Error::Driver { .. }) = &outcome {
            let nested = !self.state.acquire("transaction state")?.savepoints.is_empty();
            if nested {
                self.poison(handle, e)?;
            }
        }
        outcome
    }

    fn poisoned(&self) -> Result<Option<String>> {
        Ok(self.state.acquire("transaction state")?.poisoned.clone())
    }
}

/// Run a savepoint-control statement; any failure poisons the transaction.
async fn savepoint_control(
    txn: &TransactionRecord,
    handle: &Handle,
    session: &mut dyn Session,
    sql: String,
) -> Result<()> {
    if let Err(e) = session.execute(&sql, &[]).await {
        txn.poison(handle, &e)?;
        return Err(e);
    }
    Ok(())
}

// ============================================================================
// Engine: transaction operations
// ============================================================================

impl Engine {
    /// Look up a transaction and check that `conn` created it.
    ///
    /// Ownership is checked before any transaction state is read.
    pub(crate) fn owned_transaction(
        &self,
        txn: &Handle,
        conn: &Handle,
    ) -> Result<(Arc<TransactionRecord>, Arc<ConnectionRecord>)> {
        let record = self.transactions.require(txn)?;
        if &record.owner != conn {
            return Err(Error::OwnershipViolation {
                kind: ResourceKind::Transaction,
                handle: txn.clone(),
                presented: conn.clone(),
            });
        }
        let connection = self.connection(conn)?;
        if record.is_finished() {
            return Err(Error::not_found(ResourceKind::Transaction, txn));
        }
        Ok((record, connection))
    }

    pub(crate) fn usable_transaction(
        &self,
        txn: &Handle,
        conn: &Handle,
    ) -> Result<(Arc<TransactionRecord>, Arc<ConnectionRecord>)> {
        let (record, connection) = self.owned_transaction(txn, conn)?;
        record.ensure_usable(txn)?;
        Ok((record, connection))
    }

    fn retire_transaction(&self, txn: &Handle, connection: &ConnectionRecord) -> Result<()> {
        connection.in_transaction.store(false, Ordering::SeqCst);
        self.transactions.remove(txn)?;
        Ok(())
    }

    /// Begin a deferred transaction on `conn`.
    pub fn begin(&self, conn: &Handle) -> Result<Handle> {
        self.begin_with(conn, TransactionBehavior::Deferred)
    }

    /// Begin a transaction with the given locking behavior.
    ///
    /// # Errors
    ///
    /// `TransactionActive` if `conn` already owns a live transaction.
    pub fn begin_with(&self, conn: &Handle, behavior: TransactionBehavior) -> Result<Handle> {
        let connection = self.connection(conn)?;
        if connection
            .in_transaction
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::TransactionActive {
                connection: conn.clone(),
            });
        }

        let (record, handle) = (Arc::clone(&connection), conn.clone());
        let started = self.bridge.run("begin", async move {
            let mut session = record.session(&handle).await?;
            session.begin(behavior).await
        });
        if let Err(e) = started {
            connection.in_transaction.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let txn = match self.transactions.insert(TransactionRecord::new(conn.clone(), behavior)) {
            Ok(txn) => txn,
            Err(e) => {
                let (record, handle) = (Arc::clone(&connection), conn.clone());
                let undone = self.bridge.run("begin", async move {
                    record.session(&handle).await?.rollback().await
                });
                if let Err(rb) = undone {
                    warn!(target: "sqlbridge::txn", conn = %conn, error = %rb, "Rollback after failed registration failed");
                }
                connection.in_transaction.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        // A concurrent close may have drained before the insert.
        if connection.is_closed() {
            self.transactions.remove(&txn)?;
            return Err(Error::not_found(ResourceKind::Connection, conn));
        }

        debug!(target: "sqlbridge::txn", txn = %txn, conn = %conn, behavior = %behavior, "Began");
        Ok(txn)
    }

    /// Run a statement inside the transaction, returning rows affected.
    pub fn txn_execute(&self, txn: &Handle, conn: &Handle, sql: &str, params: &[Value]) -> Result<u64> {
        let (record, connection) = self.usable_transaction(txn, conn)?;
        let (txn, conn, sql, params) = (txn.clone(), conn.clone(), sql.to_string(), params.to_vec());
        self.bridge.run("txn_execute", async move {
            let mut session = connection.session(&conn).await?;
            record.ensure_usable(&txn)?;
            let outcome = match session.execute(&sql, &params).await {
                Ok(n) => Ok(n),
                Err(e) => Err(constraint::enrich(&mut **session, e).await),
            };
            record.observe(&txn, outcome)
        })
    }

    /// Run a row-returning statement inside the transaction.
    pub fn txn_query(
        &self,
        txn: &Handle,
        conn: &Handle,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let (record, connection) = self.usable_transaction(txn, conn)?;
        let (txn, conn, sql, params) = (txn.clone(), conn.clone(), sql.to_string(), params.to_vec());
        self.bridge.run("txn_query", async move {
            let mut session = connection.session(&conn).await?;
            record.ensure_usable(&txn)?;
            let outcome = run_query(&mut **session, &sql, &params).await;
            record.observe(&txn, outcome)
        })
    }

    /// Open a savepoint named `name` on top of the stack.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a name that is not an identifier, `DuplicateName`
    /// if `name` is already on the stack.
    pub fn savepoint(&self, txn: &Handle, conn: &Handle, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        let (record, connection) = self.usable_transaction(txn, conn)?;
        let (txn, conn, name) = (txn.clone(), conn.clone(), name.to_string());
        self.bridge.run("savepoint", async move {
            let mut session = connection.session(&conn).await?;
            record.ensure_usable(&txn)?;
            if record.state.acquire("savepoint")?.savepoints.contains(&name) {
                return Err(Error::DuplicateName { name });
            }
            savepoint_control(&record, &txn, &mut **session, format!("SAVEPOINT \"{}\"", name)).await?;
            record.state.acquire("savepoint")?.savepoints.push(name.clone());
            debug!(target: "sqlbridge::txn", txn = %txn, savepoint = %name, "Savepoint");
            Ok(())
        })
    }

    /// Release `name`, folding its changes into the enclosing scope and
    /// popping it and everything above it.
    pub fn release_savepoint(&self, txn: &Handle, conn: &Handle, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        let (record, connection) = self.usable_transaction(txn, conn)?;
        let (txn, conn, name) = (txn.clone(), conn.clone(), name.to_string());
        self.bridge.run("release_savepoint", async move {
            let mut session = connection.session(&conn).await?;
            record.ensure_usable(&txn)?;
            let pos = record
                .state
                .acquire("release savepoint")?
                .savepoints
                .iter()
                .rposition(|s| *s == name)
                .ok_or_else(|| Error::SavepointNotFound { name: name.clone() })?;
            savepoint_control(&record, &txn, &mut **session, format!("RELEASE SAVEPOINT \"{}\"", name))
                .await?;
            record.state.acquire("release savepoint")?.savepoints.truncate(pos);
            debug!(target: "sqlbridge::txn", txn = %txn, savepoint = %name, "Released");
            Ok(())
        })
    }

    /// Undo everything since `name` was opened; `name` stays open, anything
    /// above it is popped.
    pub fn rollback_to_savepoint(&self, txn: &Handle, conn: &Handle, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        let (record, connection) = self.usable_transaction(txn, conn)?;
        let (txn, conn, name) = (txn.clone(), conn.clone(), name.to_string());
        self.bridge.run("rollback_to_savepoint", async move {
            let mut session = connection.session(&conn).await?;
            record.ensure_usable(&txn)?;
            let pos = record
                .state
                .acquire("rollback to savepoint")?
                .savepoints
                .iter()
                .rposition(|s| *s == name)
                .ok_or_else(|| Error::SavepointNotFound { name: name.clone() })?;
            savepoint_control(
                &record,
                &txn,
                &mut **session,
                format!("ROLLBACK TO SAVEPOINT \"{}\"", name),
            )
            .await?;
            record
                .state
                .acquire("rollback to savepoint")?
                .savepoints
                .truncate(pos + 1);
            debug!(target: "sqlbridge::txn", txn = %txn, savepoint = %name, "Rolled back to");
            Ok(())
        })
    }

    /// Open savepoints, outermost first
    pub fn savepoints(&self, txn: &Handle, conn: &Handle) -> Result<Vec<String>> {
        let (record, _) = self.owned_transaction(txn, conn)?;
        let names = record.state.acquire("savepoints")?.savepoints.clone();
        Ok(names)
    }

    /// Commit and discard the transaction.
    ///
    /// The registry entry is removed whatever the outcome. A poisoned
    /// transaction is rolled back and reported as `TransactionUnusable`; a
    /// failed commit is rolled back and its error returned.
    pub fn commit(&self, txn: &Handle, conn: &Handle) -> Result<()> {
        let (record, connection) = self.owned_transaction(txn, conn)?;
        let (th, ch, conn_record) = (txn.clone(), conn.clone(), Arc::clone(&connection));
        let outcome = self.bridge.run("commit", async move {
            let mut session = conn_record.session(&ch).await?;
            if record.finished.swap(true, Ordering::SeqCst) {
                return Err(Error::not_found(ResourceKind::Transaction, &th));
            }
            if let Some(reason) = record.poisoned()? {
                if let Err(e) = session.rollback().await {
                    warn!(target: "sqlbridge::txn", txn = %th, error = %e, "Rollback of poisoned transaction failed");
                }
                return Err(Error::TransactionUnusable { handle: th, reason });
            }
            if let Err(e) = session.commit().await {
                if !session.is_autocommit().await.unwrap_or(true) {
                    if let Err(rb) = session.rollback().await {
                        warn!(target: "sqlbridge::txn", txn = %th, error = %rb, "Rollback after failed commit failed");
                    }
                }
                return Err(e);
            }
            Ok(())
        });

        if !matches!(&outcome, Err(Error::NotFound { .. })) {
            self.retire_transaction(txn, &connection)?;
        }
        match &outcome {
            Ok(()) => info!(target: "sqlbridge::txn", txn = %txn, conn = %conn, "Committed"),
            Err(e) => warn!(target: "sqlbridge::txn", txn = %txn, error = %e, "Commit failed"),
        }
        outcome
    }

    /// Roll back and discard the transaction.
    ///
    /// Succeeds for poisoned transactions. The registry entry is removed
    /// whatever the outcome.
    pub fn rollback(&self, txn: &Handle, conn: &Handle) -> Result<()> {
        let (record, connection) = self.owned_transaction(txn, conn)?;
        let (th, ch, conn_record) = (txn.clone(), conn.clone(), Arc::clone(&connection));
        let outcome = self.bridge.run("rollback", async move {
            let mut session = conn_record.session(&ch).await?;
            if record.finished.swap(true, Ordering::SeqCst) {
                return Err(Error::not_found(ResourceKind::Transaction, &th));
            }
            match session.rollback().await {
                Ok(()) => Ok(()),
                Err(e) if record.poisoned()?.is_some() => {
                    debug!(target: "sqlbridge::txn", txn = %th, error = %e, "Rollback of poisoned transaction failed");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        });

        if !matches!(&outcome, Err(Error::NotFound { .. })) {
            self.retire_transaction(txn, &connection)?;
        }
        debug!(target: "sqlbridge::txn", txn = %txn, ok = outcome.is_ok(), "Rolled back");
        outcome
    }

    /// True while the transaction is registered and not poisoned.
    ///
    /// # Errors
    ///
    /// `NotFound` for handles that were never issued or already resolved.
    pub fn is_active(&self, txn: &Handle) -> Result<bool> {
        let record = self.transactions.require(txn)?;
        if record.is_finished() {
            return Err(Error::not_found(ResourceKind::Transaction, txn));
        }
        Ok(record.poisoned()?.is_none())
    }

    /// Locking behavior the transaction was begun with
    pub fn transaction_behavior(&self, txn: &Handle) -> Result<TransactionBehavior> {
        Ok(self.transactions.require(txn)?.behavior)
    }
}

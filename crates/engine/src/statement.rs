//! Statement cache
//!
//! `prepare` compiles once; every later execute or query resets the compiled
//! statement (clearing bindings, keeping the plan) and runs it again. Column
//! and parameter metadata are captured at prepare time so introspection
//! never touches the session.
//!
//! Lock order is always session, then statement.

use crate::constraint;
use crate::engine::Engine;
use sqlbridge_core::{Column, Error, Handle, QueryResult, ResourceKind, Result, Value};
use sqlbridge_driver::PreparedStatement;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub(crate) struct StatementRecord {
    pub(crate) owner: Handle,
    sql: String,
    columns: Vec<Column>,
    parameter_names: Vec<Option<String>>,
    inner: Mutex<Box<dyn PreparedStatement>>,
    closed: AtomicBool,
}

impl StatementRecord {
    fn new(owner: Handle, inner: Box<dyn PreparedStatement>) -> Self {
        let parameter_names = (1..=inner.parameter_count())
            .map(|i| inner.parameter_name(i).map(String::from))
            .collect();
        Self {
            owner,
            sql: inner.sql().to_string(),
            columns: inner.columns().to_vec(),
            parameter_names,
            inner: Mutex::new(inner),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn retire(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_live(&self, handle: &Handle) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::not_found(ResourceKind::Statement, handle));
        }
        Ok(())
    }
}

enum Run {
    Execute,
    Query,
}

impl Engine {
    fn owned_statement(&self, stmt: &Handle, conn: &Handle) -> Result<Arc<StatementRecord>> {
        let record = self.statements.require(stmt)?;
        if &record.owner != conn {
            return Err(Error::OwnershipViolation {
                kind: ResourceKind::Statement,
                handle: stmt.clone(),
                presented: conn.clone(),
            });
        }
        record.check_live(stmt)?;
        Ok(record)
    }

    /// Compile `sql` on `conn`. Syntax errors surface here.
    pub fn prepare(&self, conn: &Handle, sql: &str) -> Result<Handle> {
        let connection = self.connection(conn)?;
        let (handle, owned) = (conn.clone(), sql.to_string());
        let compiled = self.bridge.run("prepare", async move {
            let mut session = connection.session(&handle).await?;
            session.prepare(&owned).await
        })?;

        let stmt = self.statements.insert(StatementRecord::new(conn.clone(), compiled))?;
        if !self.connections.contains(conn)? {
            self.statements.remove(&stmt)?;
            return Err(Error::not_found(ResourceKind::Connection, conn));
        }
        debug!(target: "sqlbridge::stmt", stmt = %stmt, conn = %conn, sql, "Prepared");
        Ok(stmt)
    }

    fn run_statement(
        &self,
        label: &'static str,
        stmt: &Handle,
        conn: &Handle,
        params: &[Value],
        run: Run,
    ) -> Result<QueryResult> {
        let record = self.owned_statement(stmt, conn)?;
        let connection = self.connection(conn)?;
        let (sh, ch, params) = (stmt.clone(), conn.clone(), params.to_vec());
        self.bridge.run(label, async move {
            let mut session = connection.session(&ch).await?;
            let mut inner = record.inner.lock().await;
            record.check_live(&sh)?;
            inner.reset().await?;
            let outcome = match run {
                Run::Execute => inner.execute(&params).await.map(QueryResult::affected),
                Run::Query => inner.query(&params).await,
            };
            drop(inner);
            match outcome {
                Ok(r) => Ok(r),
                Err(e) => Err(constraint::enrich(&mut **session, e).await),
            }
        })
    }

    /// Bind `params` and run the statement, returning rows affected.
    pub fn stmt_execute(&self, stmt: &Handle, conn: &Handle, params: &[Value]) -> Result<u64> {
        self.run_statement("stmt_execute", stmt, conn, params, Run::Execute)
            .map(|r| r.rows_affected)
    }

    /// Bind `params` and run the statement, returning its rows.
    pub fn stmt_query(&self, stmt: &Handle, conn: &Handle, params: &[Value]) -> Result<QueryResult> {
        self.run_statement("stmt_query", stmt, conn, params, Run::Query)
    }

    /// Clear bindings, keeping the compiled plan.
    pub fn stmt_reset(&self, stmt: &Handle, conn: &Handle) -> Result<()> {
        let record = self.owned_statement(stmt, conn)?;
        let connection = self.connection(conn)?;
        let (sh, ch) = (stmt.clone(), conn.clone());
        self.bridge.run("stmt_reset", async move {
            let _session = connection.session(&ch).await?;
            let mut inner = record.inner.lock().await;
            record.check_live(&sh)?;
            inner.reset().await
        })
    }

    /// Number of result columns
    pub fn stmt_column_count(&self, stmt: &Handle, conn: &Handle) -> Result<usize> {
        Ok(self.owned_statement(stmt, conn)?.columns.len())
    }

    /// Name of result column `index` (0-based)
    pub fn stmt_column_name(&self, stmt: &Handle, conn: &Handle, index: usize) -> Result<String> {
        let record = self.owned_statement(stmt, conn)?;
        record
            .columns
            .get(index)
            .map(|c| c.name.clone())
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "column index {} out of range (statement has {} columns)",
                    index,
                    record.columns.len()
                ))
            })
    }

    /// Result columns with declared types
    pub fn stmt_columns(&self, stmt: &Handle, conn: &Handle) -> Result<Vec<Column>> {
        Ok(self.owned_statement(stmt, conn)?.columns.clone())
    }

    /// Number of bind parameters
    pub fn stmt_parameter_count(&self, stmt: &Handle, conn: &Handle) -> Result<usize> {
        Ok(self.owned_statement(stmt, conn)?.parameter_names.len())
    }

    /// Name of parameter `index` (1-based); `None` for positional `?`.
    pub fn stmt_parameter_name(
        &self,
        stmt: &Handle,
        conn: &Handle,
        index: usize,
    ) -> Result<Option<String>> {
        let record = self.owned_statement(stmt, conn)?;
        if index == 0 || index > record.parameter_names.len() {
            return Err(Error::invalid_input(format!(
                "parameter index {} out of range 1..={}",
                index,
                record.parameter_names.len()
            )));
        }
        Ok(record.parameter_names[index - 1].clone())
    }

    /// SQL text the statement was prepared from
    pub fn stmt_sql(&self, stmt: &Handle, conn: &Handle) -> Result<String> {
        Ok(self.owned_statement(stmt, conn)?.sql.clone())
    }

    /// Evict the statement.
    pub fn close_statement(&self, stmt: &Handle) -> Result<()> {
        let record = self
            .statements
            .remove(stmt)?
            .ok_or_else(|| Error::not_found(ResourceKind::Statement, stmt))?;
        record.retire();
        debug!(target: "sqlbridge::stmt", stmt = %stmt, "Closed");
        Ok(())
    }
}

//! Instrumented driver wrapper

use super::recorder::{Recorder, OPEN};
use super::replica::{EmulatedReplicator, FrameLog};
use crate::sqlite::{SqliteDriver, MEMORY_PATH};
use crate::{
    Driver, Interrupter, PreparedStatement, Replicator, RowStream, Session,
    TransactionBehavior,
};
use async_trait::async_trait;
use sqlbridge_core::{
    detect_query_type, Column, ConnectionConfig, ConnectionMode, EngineConfig, QueryResult,
    QueryType, Result, Value,
};
use std::sync::Arc;

fn is_write(sql: &str) -> bool {
    matches!(
        detect_query_type(sql),
        QueryType::Insert
            | QueryType::Update
            | QueryType::Delete
            | QueryType::Create
            | QueryType::Drop
            | QueryType::Alter
    )
}

fn batch_writes(sql: &str) -> bool {
    sql.split(';').any(is_write)
}

/// Wraps a driver, reporting through a shared [`Recorder`]
///
/// Replica configs open the inner driver on the local path and get an
/// [`EmulatedReplicator`]; remote configs open a private in-memory database.
pub struct InstrumentedDriver {
    inner: Box<dyn Driver>,
    recorder: Arc<Recorder>,
}

impl InstrumentedDriver {
    /// Wrap `inner`
    pub fn new<D: Driver>(inner: D) -> Self {
        Self {
            inner: Box::new(inner),
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Wrap the bundled SQLite driver
    pub fn sqlite() -> Self {
        Self::new(SqliteDriver::new())
    }

    /// The recorder shared by every session this driver opens
    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }
}

#[async_trait]
impl Driver for InstrumentedDriver {
    fn name(&self) -> &'static str {
        "instrumented"
    }

    fn configure(&mut self, config: &EngineConfig) {
        self.inner.configure(config);
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        self.recorder.intercept(OPEN).await?;

        let mut local = ConnectionConfig {
            busy_timeout_ms: config.busy_timeout_ms,
            ..ConnectionConfig::default()
        };
        let mut replica = None;
        match config.mode()? {
            ConnectionMode::Local => local = config.clone(),
            ConnectionMode::Remote => local.local_path = Some(MEMORY_PATH.to_string()),
            ConnectionMode::Replica => {
                let path = config.local_path.clone().unwrap_or_default();
                let log = self.recorder.frame_log(&path);
                if config.sync_enabled {
                    log.sync();
                }
                local.local_path = Some(path);
                replica = Some(log);
            }
        }

        let inner = self.inner.open(&local).await?;
        self.recorder.record_open();
        Ok(Box::new(InstrumentedSession {
            inner,
            recorder: Arc::clone(&self.recorder),
            replica,
        }))
    }
}

struct InstrumentedSession {
    inner: Box<dyn Session>,
    recorder: Arc<Recorder>,
    replica: Option<Arc<FrameLog>>,
}

impl InstrumentedSession {
    fn after_write(&self, wrote: bool) {
        if wrote {
            if let Some(log) = &self.replica {
                log.record_write();
            }
        }
    }
}

#[async_trait]
impl Session for InstrumentedSession {
    async fn ping(&mut self) -> Result<()> {
        self.recorder.intercept("SELECT 1").await?;
        self.inner.ping().await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.recorder.intercept(sql).await?;
        let n = self.inner.execute(sql, params).await?;
        self.after_write(is_write(sql));
        Ok(n)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.recorder.intercept(sql).await?;
        let r = self.inner.query(sql, params).await?;
        self.after_write(is_write(sql));
        Ok(r)
    }

    async fn query_stream(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        self.recorder.intercept(sql).await?;
        self.inner.query_stream(sql, params).await
    }

    async fn begin(&mut self, behavior: TransactionBehavior) -> Result<()> {
        self.recorder.intercept("BEGIN").await?;
        self.inner.begin(behavior).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.recorder.intercept("COMMIT").await?;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.recorder.intercept("ROLLBACK").await?;
        self.inner.rollback().await
    }

    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.recorder.intercept(sql).await?;
        let inner = self.inner.prepare(sql).await?;
        self.recorder.record_compile(sql);
        Ok(Box::new(InstrumentedStatement {
            inner,
            recorder: Arc::clone(&self.recorder),
            replica: self.replica.clone(),
        }))
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.recorder.intercept(sql).await?;
        self.inner.execute_batch(sql).await?;
        self.after_write(batch_writes(sql));
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.inner.reset().await
    }

    async fn set_busy_timeout(&mut self, ms: u64) -> Result<()> {
        self.inner.set_busy_timeout(ms).await
    }

    async fn last_insert_rowid(&mut self) -> Result<i64> {
        self.inner.last_insert_rowid().await
    }

    async fn changes(&mut self) -> Result<u64> {
        self.inner.changes().await
    }

    async fn total_changes(&mut self) -> Result<u64> {
        self.inner.total_changes().await
    }

    async fn is_autocommit(&mut self) -> Result<bool> {
        self.inner.is_autocommit().await
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        self.inner.interrupter()
    }

    fn replicator(&self) -> Option<Arc<dyn Replicator>> {
        self.replica
            .as_ref()
            .map(|log| Arc::new(EmulatedReplicator::new(Arc::clone(log))) as Arc<dyn Replicator>)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

struct InstrumentedStatement {
    inner: Box<dyn PreparedStatement>,
    recorder: Arc<Recorder>,
    replica: Option<Arc<FrameLog>>,
}

#[async_trait]
impl PreparedStatement for InstrumentedStatement {
    fn sql(&self) -> &str {
        self.inner.sql()
    }

    async fn reset(&mut self) -> Result<()> {
        self.inner.reset().await
    }

    async fn execute(&mut self, params: &[Value]) -> Result<u64> {
        self.recorder.intercept(self.inner.sql()).await?;
        let n = self.inner.execute(params).await?;
        if is_write(self.inner.sql()) {
            if let Some(log) = &self.replica {
                log.record_write();
            }
        }
        Ok(n)
    }

    async fn query(&mut self, params: &[Value]) -> Result<QueryResult> {
        self.recorder.intercept(self.inner.sql()).await?;
        self.inner.query(params).await
    }

    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn parameter_name(&self, index: usize) -> Option<&str> {
        self.inner.parameter_name(index)
    }
}

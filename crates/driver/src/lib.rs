//! Asynchronous database session seam
//!
//! The engine never talks to a database directly. It consumes the traits in
//! this crate, which model an opaque asynchronous client:
//!
//! - [`Driver`]: opens a [`Session`] from a validated `ConnectionConfig`
//! - [`Session`]: one live connection (execute, query, transactions, prepare)
//! - [`PreparedStatement`]: a compiled statement that can be reset and rerun
//! - [`RowStream`]: rows pulled in batches for streaming cursors
//! - [`Replicator`]: frame tracking for replica sessions
//! - [`Interrupter`]: aborts the running statement without the session lock
//!
//! [`sqlite::SqliteDriver`] is the bundled implementation. The [`testing`]
//! module wraps any driver with compile counting, slow-call gates, injected
//! failures and emulated replicas.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sqlite;
pub mod testing;

use async_trait::async_trait;
use sqlbridge_core::{Column, ConnectionConfig, EngineConfig, Error, QueryResult, Result, Value};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

pub use sqlite::SqliteDriver;

// ============================================================================
// Transaction Behavior
// ============================================================================

/// Locking behavior requested at `BEGIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionBehavior {
    /// Locks are taken on first access
    #[default]
    Deferred,
    /// A write lock is taken immediately
    Immediate,
    /// An exclusive lock is taken immediately
    Exclusive,
    /// Writes are rejected for the life of the transaction
    ReadOnly,
}

impl TransactionBehavior {
    /// Lowercase name, as accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "deferred",
            TransactionBehavior::Immediate => "immediate",
            TransactionBehavior::Exclusive => "exclusive",
            TransactionBehavior::ReadOnly => "read_only",
        }
    }
}

impl fmt::Display for TransactionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deferred" => Ok(TransactionBehavior::Deferred),
            "immediate" => Ok(TransactionBehavior::Immediate),
            "exclusive" => Ok(TransactionBehavior::Exclusive),
            "read_only" => Ok(TransactionBehavior::ReadOnly),
            other => Err(Error::invalid_input(format!(
                "unknown transaction behavior '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Opens sessions
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Apply engine-wide settings before the first session opens.
    ///
    /// Drivers without tunables keep the default, which ignores `config`.
    fn configure(&mut self, config: &EngineConfig) {
        let _ = config;
    }

    /// Open a session for an already validated configuration.
    ///
    /// Shapes the driver cannot serve return `UnsupportedOperation`.
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>>;
}

/// One live database connection
///
/// Callers serialize access (`&mut self`); a session is never driven by two
/// tasks at once.
#[async_trait]
pub trait Session: Send {
    /// Round-trip a trivial statement
    async fn ping(&mut self) -> Result<()>;

    /// Run a statement, returning the number of changed rows
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a statement and materialize its rows
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Run a statement and hand back its rows as a stream
    async fn query_stream(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>>;

    /// Start a transaction
    async fn begin(&mut self, behavior: TransactionBehavior) -> Result<()>;

    /// Commit the open transaction
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction
    async fn rollback(&mut self) -> Result<()>;

    /// Compile a statement; syntax errors surface here
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Run several `;`-separated statements through the native batch path
    async fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Run a native batch atomically
    async fn execute_transactional_batch(&mut self, sql: &str) -> Result<()> {
        self.begin(TransactionBehavior::Deferred).await?;
        match self.execute_batch(sql).await {
            Ok(()) => self.commit().await,
            Err(e) => {
                if let Err(rb) = self.rollback().await {
                    warn!(target: "sqlbridge::driver", error = %rb, "Batch rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Clear ephemeral session state without closing
    async fn reset(&mut self) -> Result<()>;

    /// How long statements wait on a locked database
    async fn set_busy_timeout(&mut self, ms: u64) -> Result<()>;

    /// Rowid of the most recent successful insert
    async fn last_insert_rowid(&mut self) -> Result<i64>;

    /// Rows changed by the most recent statement
    async fn changes(&mut self) -> Result<u64>;

    /// Rows changed since the session opened
    async fn total_changes(&mut self) -> Result<u64>;

    /// True when no transaction is open
    async fn is_autocommit(&mut self) -> Result<bool>;

    /// Handle that aborts the running statement
    fn interrupter(&self) -> Arc<dyn Interrupter>;

    /// Frame tracker, for replica sessions only
    fn replicator(&self) -> Option<Arc<dyn Replicator>>;

    /// Release the session
    async fn close(&mut self) -> Result<()>;
}

/// A compiled statement
///
/// Metadata accessors read the compiled object and never execute it.
#[async_trait]
pub trait PreparedStatement: Send {
    /// Source text
    fn sql(&self) -> &str;

    /// Clear bindings, keeping the compiled plan
    async fn reset(&mut self) -> Result<()>;

    /// Bind and run, returning changed rows
    async fn execute(&mut self, params: &[Value]) -> Result<u64>;

    /// Bind and run, materializing rows
    async fn query(&mut self, params: &[Value]) -> Result<QueryResult>;

    /// Result columns, with declared types
    fn columns(&self) -> &[Column];

    /// Number of bindable parameters
    fn parameter_count(&self) -> usize;

    /// Name of parameter `index` (1-based); `None` for positional ones
    fn parameter_name(&self, index: usize) -> Option<&str>;
}

/// Rows pulled in batches
#[async_trait]
pub trait RowStream: Send {
    /// Result column names
    fn columns(&self) -> &[String];

    /// Up to `max` further rows; an empty batch means the stream is done
    async fn next_batch(&mut self, max: usize) -> Result<Vec<Vec<Value>>>;
}

/// Aborts whatever statement the session is running
pub trait Interrupter: Send + Sync {
    /// Signal the abort; returns immediately
    fn interrupt(&self);
}

/// Replication frame tracking for a replica session
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Frame the local copy has applied
    async fn current_frame(&self) -> Result<u64>;

    /// Pull everything the primary has; returns the frame reached
    async fn sync(&self) -> Result<u64>;

    /// Pull until at least `frame` is applied
    async fn sync_until(&self, frame: u64) -> Result<u64>;

    /// Push pending local writes; returns the frame reached
    async fn flush(&self) -> Result<u64>;

    /// Highest frame produced by writes through sessions sharing this replica
    async fn max_write_frame(&self) -> Result<u64>;
}

// ============================================================================
// VecRowStream
// ============================================================================

/// [`RowStream`] over rows already in memory
#[derive(Debug, Default)]
pub struct VecRowStream {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

impl VecRowStream {
    /// Stream the rows of a materialized result
    pub fn new(result: QueryResult) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows.into(),
        }
    }
}

#[async_trait]
impl RowStream for VecRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max: usize) -> Result<Vec<Vec<Value>>> {
        let n = max.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }
}

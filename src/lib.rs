//! sqlbridge - handle-based synchronous access to asynchronous SQL sessions
//!
//! sqlbridge sits between a synchronous caller (an ORM or a connection pool)
//! and an asynchronous database client. Callers get opaque [`Handle`]s for
//! connections, transactions, prepared statements and cursors; the
//! [`Engine`] owns the registries behind them and blocks each call on a
//! shared runtime until the session work is done.
//!
//! # Quick Start
//!
//! ```no_run
//! use sqlbridge::{ConnectionConfig, Engine, EngineConfig, SqliteDriver, Value};
//!
//! # fn main() -> sqlbridge::Result<()> {
//! let engine = Engine::new(SqliteDriver::new(), EngineConfig::default())?;
//! let conn = engine.connect(ConnectionConfig::local("app.db"))?;
//!
//! engine.execute(&conn, "CREATE TABLE IF NOT EXISTS t (v INTEGER)", &[])?;
//! let txn = engine.begin(&conn)?;
//! engine.txn_execute(&txn, &conn, "INSERT INTO t VALUES (?)", &[Value::Integer(1)])?;
//! engine.commit(&txn, &conn)?;
//!
//! engine.close(&conn)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - `sqlbridge-core`: handles, values, errors, safe locking, registries, config
//! - `sqlbridge-driver`: the async session seam and the bundled SQLite driver
//! - `sqlbridge-engine`: the bridge and every handle-based operation
//!
//! Registries and locks are never exposed; everything goes through [`Engine`].

pub use sqlbridge_core::{
    detect_query_type, should_use_query, validate_savepoint_name, Column, ConnectionConfig,
    ConnectionMode, CursorMode, EngineConfig, Error, Handle, QueryResult, QueryType, ResourceKind,
    Result, Value, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_SYNC_TIMEOUT_MS,
};
pub use sqlbridge_driver::{
    Driver, Interrupter, PreparedStatement, Replicator, RowStream, Session, SqliteDriver,
    TransactionBehavior, VecRowStream,
};
pub use sqlbridge_engine::{
    AsyncBridge, BatchStatement, CursorContext, Engine, Fetch, ShutdownReport,
};

/// Test doubles for drivers: compile counting, gates, failures, replicas
pub mod testing {
    pub use sqlbridge_driver::testing::*;
}

//! Engine state object
//!
//! [`Engine`] owns everything that would otherwise be process-global: the
//! four handle registries, the driver and the async bridge. It starts empty
//! and is torn down by [`Engine::shutdown`], which closes every connection
//! through the normal cascade.
//!
//! Operations are grouped by component in sibling modules, each adding an
//! `impl Engine` block:
//!
//! | Module | Operations |
//! |--------|------------|
//! | `connection` | connect, ping, close, execute, query, interrupt, reset, metadata |
//! | `transaction` | begin, transaction execute/query, savepoints, commit, rollback |
//! | `statement` | prepare, statement execute/query/reset, introspection |
//! | `cursor` | declare, fetch, close |
//! | `replication` | frames, sync, sync_until, flush, freeze |
//! | `batch` | sequential, transactional and native batches |

use crate::bridge::AsyncBridge;
use crate::connection::{CloseSummary, ConnectionRecord};
use crate::cursor::CursorRecord;
use crate::statement::StatementRecord;
use crate::transaction::TransactionRecord;
use sqlbridge_core::{EngineConfig, Error, Registry, ResourceKind, Result};
use sqlbridge_driver::Driver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// What [`Engine::shutdown`] released
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections closed
    pub connections_closed: usize,
    /// Open transactions rolled back by the cascade
    pub transactions_rolled_back: usize,
    /// Prepared statements evicted
    pub statements_released: usize,
    /// Cursors released
    pub cursors_released: usize,
    /// Connections whose close reported an error (they are gone regardless)
    pub errors: usize,
}

impl ShutdownReport {
    fn absorb(&mut self, summary: &CloseSummary) {
        self.connections_closed += 1;
        self.transactions_rolled_back += summary.transactions_rolled_back;
        self.statements_released += summary.statements_released;
        self.cursors_released += summary.cursors_released;
    }
}

/// Handle-based synchronous surface over asynchronous sessions
///
/// Every method blocks the calling thread until its session work is done.
/// `Engine` is `Send + Sync`; share it with an `Arc`.
///
/// # Example
///
/// ```text
/// use sqlbridge::{ConnectionConfig, Engine, EngineConfig, SqliteDriver, Value};
///
/// let engine = Engine::new(SqliteDriver::new(), EngineConfig::default())?;
/// let conn = engine.connect(ConnectionConfig::local("app.db"))?;
/// let txn = engine.begin(&conn)?;
/// engine.txn_execute(&txn, &conn, "INSERT INTO t VALUES (?)", &[Value::Integer(1)])?;
/// engine.commit(&txn, &conn)?;
/// engine.close(&conn)?;
/// ```
pub struct Engine {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) bridge: AsyncBridge,
    pub(crate) config: EngineConfig,
    pub(crate) connections: Registry<ConnectionRecord>,
    pub(crate) transactions: Registry<TransactionRecord>,
    pub(crate) statements: Registry<StatementRecord>,
    pub(crate) cursors: Registry<CursorRecord>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an empty engine with a private bridge sized by
    /// `config.worker_threads`.
    pub fn new<D: Driver>(driver: D, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let bridge = AsyncBridge::new(config.worker_threads)?;
        Self::with_bridge(driver, config, bridge)
    }

    /// Create an empty engine on an existing bridge (e.g.
    /// [`AsyncBridge::shared`]).
    ///
    /// The driver is configured from `config` before it is shared.
    pub fn with_bridge<D: Driver>(
        mut driver: D,
        config: EngineConfig,
        bridge: AsyncBridge,
    ) -> Result<Self> {
        config.validate()?;
        driver.configure(&config);
        info!(
            target: "sqlbridge::engine",
            driver = driver.name(),
            cursor_mode = ?config.cursor_mode,
            "Engine started"
        );
        Ok(Self {
            driver: Arc::new(driver),
            bridge,
            config,
            connections: Registry::new(ResourceKind::Connection),
            transactions: Registry::new(ResourceKind::Transaction),
            statements: Registry::new(ResourceKind::Statement),
            cursors: Registry::new(ResourceKind::Cursor),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The bridge this engine blocks on
    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// True once [`shutdown`](Self::shutdown) has started
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::invalid_state("engine is shut down"));
        }
        Ok(())
    }

    /// Close every connection and refuse new ones.
    ///
    /// Each connection goes through the same cascade as
    /// [`close`](Self::close). Calling this again returns an empty report.
    pub fn shutdown(&self) -> Result<ShutdownReport> {
        let mut report = ShutdownReport::default();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(report);
        }

        for handle in self.connections.handles()? {
            match self.close_connection(&handle) {
                Ok(summary) => report.absorb(&summary),
                // Closed concurrently by a caller.
                Err(Error::NotFound { .. }) => {}
                Err(e) => {
                    warn!(target: "sqlbridge::engine", conn = %handle, error = %e, "Close failed during shutdown");
                    report.connections_closed += 1;
                    report.errors += 1;
                }
            }
        }

        info!(
            target: "sqlbridge::engine",
            connections = report.connections_closed,
            transactions = report.transactions_rolled_back,
            statements = report.statements_released,
            cursors = report.cursors_released,
            "Engine shut down"
        );
        Ok(report)
    }

    /// Live entries per registry: (connections, transactions, statements, cursors)
    pub fn resource_counts(&self) -> Result<(usize, usize, usize, usize)> {
        Ok((
            self.connections.len()?,
            self.transactions.len()?,
            self.statements.len()?,
            self.cursors.len()?,
        ))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Blocking is impossible inside a runtime; sessions then close on drop.
        if !self.is_shut_down() && tokio::runtime::Handle::try_current().is_err() {
            let _ = self.shutdown();
        }
    }
}

//! Shared test utilities for integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub use sqlbridge::testing::{Gate, InstrumentedDriver, Recorder, OPEN};
pub use sqlbridge::{
    BatchStatement, ConnectionConfig, ConnectionMode, CursorContext, CursorMode, Engine,
    EngineConfig, Error, Handle, QueryResult, ResourceKind, TransactionBehavior, Value,
};

/// Upper bound for anything that should finish "promptly".
pub const PROMPT: Duration = Duration::from_secs(2);

/// Print engine logs when `SQLBRIDGE_TEST_LOG` is set.
pub fn init_tracing() {
    if std::env::var_os("SQLBRIDGE_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }
}

// ============================================================================
// TestEngine
// ============================================================================

/// Engine over an instrumented SQLite driver plus a scratch directory.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub recorder: Arc<Recorder>,
    pub dir: TempDir,
}

impl TestEngine {
    /// Buffered cursors, default settings.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Streaming cursors.
    pub fn streaming() -> Self {
        Self::with_config(EngineConfig::default().with_cursor_mode(CursorMode::Streaming))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let driver = InstrumentedDriver::sqlite();
        let recorder = driver.recorder();
        let engine = Engine::new(driver, config).expect("engine");
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        TestEngine {
            engine: Arc::new(engine),
            recorder,
            dir,
        }
    }

    /// Path of `name` inside the scratch directory.
    pub fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    /// Private in-memory database.
    pub fn memory(&self) -> Handle {
        self.engine
            .connect(ConnectionConfig::local(":memory:"))
            .expect("connect memory")
    }

    /// File database in the scratch directory.
    pub fn file(&self, name: &str) -> Handle {
        self.engine
            .connect(ConnectionConfig::local(self.path(name)))
            .expect("connect file")
    }

    /// Emulated replica of `name` in the scratch directory.
    pub fn replica(&self, name: &str) -> Handle {
        self.engine
            .connect(ConnectionConfig::replica(
                self.path(name),
                "libsql://primary.example",
                "token",
            ))
            .expect("connect replica")
    }

    /// Memory connection with `t (v INTEGER UNIQUE)`.
    pub fn with_table(&self) -> Handle {
        let conn = self.memory();
        self.engine
            .execute(&conn, "CREATE TABLE t (v INTEGER UNIQUE)", &[])
            .expect("create table");
        conn
    }

    /// Values of `t.v`, ascending.
    pub fn values(&self, conn: &Handle) -> Vec<i64> {
        self.engine
            .query(conn, "SELECT v FROM t ORDER BY v", &[])
            .expect("select")
            .rows
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_integer())
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Run `f` and return its result with the time it took.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

pub fn assert_not_found<T: std::fmt::Debug>(r: sqlbridge::Result<T>) {
    match r {
        Err(Error::NotFound { .. }) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }
}

pub fn assert_ownership<T: std::fmt::Debug>(r: sqlbridge::Result<T>) {
    match r {
        Err(Error::OwnershipViolation { .. }) => {}
        other => panic!("expected OwnershipViolation, got {:?}", other),
    }
}

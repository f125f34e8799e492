//! Shared observation and control point for instrumented sessions

use super::replica::FrameLog;
use parking_lot::Mutex;
use sqlbridge_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Key intercepted when a session is opened, usable with
/// [`Recorder::gate`] and [`Recorder::fail_on`].
pub const OPEN: &str = "<open>";

// ============================================================================
// Gate
// ============================================================================

/// Holds calls for one SQL text until opened
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
    entered: AtomicUsize,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open,
            entered: AtomicUsize::new(0),
        }
    }

    /// Release every waiting and future call
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    /// Calls that have reached the gate so far
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Block the calling thread until `n` calls have reached the gate.
    ///
    /// Returns false if `timeout` elapses first.
    pub fn wait_entered(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.entered() < n {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    pub(crate) async fn pass(&self) {
        let mut rx = self.open.subscribe();
        self.entered.fetch_add(1, Ordering::SeqCst);
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Clone)]
struct Failure {
    needle: String,
    message: String,
}

/// Counters and controls shared by an [`InstrumentedDriver`](super::InstrumentedDriver)
/// and every session it opens
#[derive(Debug, Default)]
pub struct Recorder {
    compiles: Mutex<HashMap<String, usize>>,
    opens: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    failures: Mutex<Vec<Failure>>,
    replicas: Mutex<HashMap<String, Arc<FrameLog>>>,
}

impl Recorder {
    /// Successful compiles across all SQL texts
    pub fn compile_count(&self) -> usize {
        self.compiles.lock().values().sum()
    }

    /// Successful compiles of exactly `sql`
    pub fn compile_count_for(&self, sql: &str) -> usize {
        self.compiles.lock().get(sql).copied().unwrap_or(0)
    }

    /// Sessions opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Install (or fetch) the gate for `sql`
    pub fn gate(&self, sql: &str) -> Arc<Gate> {
        Arc::clone(
            self.gates
                .lock()
                .entry(sql.to_string())
                .or_insert_with(|| Arc::new(Gate::new())),
        )
    }

    /// Remove the gate for `sql`, opening it
    pub fn remove_gate(&self, sql: &str) {
        if let Some(gate) = self.gates.lock().remove(sql) {
            gate.open();
        }
    }

    /// Fail every call whose SQL contains `needle`
    pub fn fail_on(&self, needle: &str, message: &str) {
        self.failures.lock().push(Failure {
            needle: needle.to_string(),
            message: message.to_string(),
        });
    }

    /// Drop all injected failures
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Frame log shared by replica sessions on `path`
    pub fn frame_log(&self, path: &str) -> Arc<FrameLog> {
        Arc::clone(
            self.replicas
                .lock()
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(FrameLog::default())),
        )
    }

    pub(crate) fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_compile(&self, sql: &str) {
        *self.compiles.lock().entry(sql.to_string()).or_insert(0) += 1;
    }

    /// Apply injected failures and gates for `sql`.
    pub(crate) async fn intercept(&self, sql: &str) -> Result<()> {
        let failure = self
            .failures
            .lock()
            .iter()
            .find(|f| sql.contains(&f.needle))
            .cloned();
        if let Some(f) = failure {
            return Err(Error::driver(f.message));
        }

        let gate = self.gates.lock().get(sql).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(())
    }
}

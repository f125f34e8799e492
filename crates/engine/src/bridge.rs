//! Async bridge
//!
//! Synchronous entry points run session work on one shared multi-threaded
//! tokio runtime and block the calling thread until it finishes. Futures are
//! spawned rather than driven in place so that a panic inside one is caught
//! at its `JoinHandle` and reported as [`Error::Internal`].
//!
//! Blocking on the runtime from inside an async context would deadlock or
//! panic, so both entry points check for one first and return
//! [`Error::InvalidState`] instead.

use once_cell::sync::OnceCell;
use sqlbridge_core::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{error, warn};

/// Worker threads of the process-wide bridge.
pub const DEFAULT_WORKER_THREADS: usize = 4;

static SHARED: OnceCell<AsyncBridge> = OnceCell::new();

/// Owns a runtime and releases it without blocking when the last owner
/// goes away on an async thread.
struct OwnedRuntime(Option<Runtime>);

impl OwnedRuntime {
    fn get(&self) -> Result<&Runtime> {
        self.0.as_ref().ok_or_else(|| Error::Internal {
            context: "bridge runtime released".to_string(),
        })
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                // A blocking drop panics inside an async context.
                runtime.shutdown_background();
            }
        }
    }
}

/// Handle to the shared scheduler; cheap to clone
#[derive(Clone)]
pub struct AsyncBridge {
    runtime: Arc<OwnedRuntime>,
}

impl std::fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBridge").finish_non_exhaustive()
    }
}

impl AsyncBridge {
    /// Build a private bridge with `worker_threads` workers.
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("sqlbridge-worker")
            .enable_time()
            .build()
            .map_err(|e| Error::Internal {
                context: format!("bridge runtime: {}", e),
            })?;
        Ok(Self {
            runtime: Arc::new(OwnedRuntime(Some(runtime))),
        })
    }

    /// The process-wide bridge, created on first use.
    pub fn shared() -> Result<Self> {
        SHARED
            .get_or_try_init(|| Self::new(DEFAULT_WORKER_THREADS))
            .cloned()
    }

    fn ensure_blocking_allowed(label: &str) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::invalid_state(format!(
                "{} called from inside an async context",
                label
            )));
        }
        Ok(())
    }

    /// Run `fut` on the runtime and wait for it.
    ///
    /// # Errors
    ///
    /// Whatever `fut` returns; `Internal` if it panicked; `InvalidState` if
    /// called from async code.
    pub fn run<F, T>(&self, label: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        Self::ensure_blocking_allowed(label)?;
        let runtime = self.runtime.get()?;
        let handle = runtime.spawn(fut);
        match runtime.block_on(handle) {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(target: "sqlbridge::bridge", label, "Task panicked");
                Err(Error::Internal {
                    context: label.to_string(),
                })
            }
            Err(_) => Err(Error::Internal {
                context: format!("{} (cancelled)", label),
            }),
        }
    }

    /// As [`run`](Self::run), bounded by `after`.
    ///
    /// # Errors
    ///
    /// `Timeout { operation: label, after }` when the bound elapses.
    pub fn run_with_timeout<F, T>(&self, label: &str, after: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let operation = label.to_string();
        self.run(label, async move {
            match tokio::time::timeout(after, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target: "sqlbridge::bridge",
                        operation = %operation,
                        after_ms = after.as_millis() as u64,
                        "Operation timed out"
                    );
                    Err(Error::Timeout { operation, after })
                }
            }
        })
    }
}

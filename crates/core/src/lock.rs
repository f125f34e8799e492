//! Safe locking utility
//!
//! [`SafeMutex`] wraps `std::sync::Mutex` and converts poisoning (a prior
//! critical section panicked while holding the lock) into
//! [`Error::LockFailure`] carrying the caller's context label. The host
//! process never sees the panic a second time.
//!
//! Components with nothing to report on poison use `parking_lot` directly.

use crate::error::{Error, Result};
use std::sync::{Mutex, MutexGuard, TryLockError};
use tracing::warn;

/// Mutex whose acquisition returns a typed error instead of panicking
#[derive(Debug, Default)]
pub struct SafeMutex<T> {
    inner: Mutex<T>,
}

impl<T> SafeMutex<T> {
    /// Create a new lock around `value`
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock
    ///
    /// `context` names the operation and resource, e.g.
    /// `"registry insert (cursor)"`. It is carried in the error and logged.
    ///
    /// # Errors
    ///
    /// [`Error::LockFailure`] if the lock is poisoned.
    pub fn acquire(&self, context: &str) -> Result<MutexGuard<'_, T>> {
        self.inner.lock().map_err(|_| {
            warn!(target: "sqlbridge::lock", context, "Lock poisoned");
            Error::LockFailure {
                context: context.to_string(),
            }
        })
    }

    /// Acquire the lock without blocking
    ///
    /// Returns `Ok(None)` when another thread holds it.
    pub fn try_acquire(&self, context: &str) -> Result<Option<MutexGuard<'_, T>>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => {
                warn!(target: "sqlbridge::lock", context, "Lock poisoned");
                Err(Error::LockFailure {
                    context: context.to_string(),
                })
            }
        }
    }

    /// True if a previous holder panicked
    pub fn is_poisoned(&self) -> bool {
        self.inner.is_poisoned()
    }

    /// Consume the lock, returning the protected value
    pub fn into_inner(self, context: &str) -> Result<T> {
        self.inner.into_inner().map_err(|_| Error::LockFailure {
            context: context.to_string(),
        })
    }
}

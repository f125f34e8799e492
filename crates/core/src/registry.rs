//! Handle registry
//!
//! A [`Registry`] maps [`Handle`]s to shared resource records. One instance
//! exists per resource kind (connections, transactions, statements, cursors),
//! all with the same behavior.
//!
//! ## Lock discipline
//!
//! The internal lock guards only the map structure. Every method takes the
//! lock, does its bookkeeping, clones an `Arc` out and drops the guard before
//! returning. The guard is never handed to callers, so no caller can hold it
//! across an `.await` or a blocking bridge call.

use crate::error::{Error, ResourceKind, Result};
use crate::handle::Handle;
use crate::lock::SafeMutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Concurrent map from [`Handle`] to `Arc<T>`
#[derive(Debug)]
pub struct Registry<T> {
    kind: ResourceKind,
    entries: SafeMutex<HashMap<Handle, Arc<T>>>,
}

impl<T> Registry<T> {
    /// Create an empty registry for `kind`
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: SafeMutex::new(HashMap::new()),
        }
    }

    /// Which resource kind this registry holds
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn lock(&self, op: &str) -> Result<std::sync::MutexGuard<'_, HashMap<Handle, Arc<T>>>> {
        self.entries
            .acquire(&format!("registry {} ({})", op, self.kind))
    }

    /// Store `value` under a freshly generated handle
    pub fn insert(&self, value: T) -> Result<Handle> {
        self.insert_arc(Arc::new(value))
    }

    /// Store an already shared value under a freshly generated handle
    pub fn insert_arc(&self, value: Arc<T>) -> Result<Handle> {
        let mut map = self.lock("insert")?;
        let mut handle = Handle::generate();
        while map.contains_key(&handle) {
            handle = Handle::generate();
        }
        map.insert(handle.clone(), value);
        Ok(handle)
    }

    /// Look up `handle`, returning a shared reference
    pub fn get(&self, handle: &Handle) -> Result<Option<Arc<T>>> {
        Ok(self.lock("get")?.get(handle).cloned())
    }

    /// Look up `handle`, mapping absence to [`Error::NotFound`]
    pub fn require(&self, handle: &Handle) -> Result<Arc<T>> {
        self.get(handle)?
            .ok_or_else(|| Error::not_found(self.kind, handle))
    }

    /// Remove `handle`, returning its value if it was present
    pub fn remove(&self, handle: &Handle) -> Result<Option<Arc<T>>> {
        Ok(self.lock("remove")?.remove(handle))
    }

    /// True if `handle` is registered
    pub fn contains(&self, handle: &Handle) -> Result<bool> {
        Ok(self.lock("contains")?.contains_key(handle))
    }

    /// Remove every entry for which `pred` holds, returning them
    ///
    /// `pred` runs under the registry lock and must not block.
    pub fn drain_where<F>(&self, mut pred: F) -> Result<Vec<(Handle, Arc<T>)>>
    where
        F: FnMut(&Handle, &T) -> bool,
    {
        let mut map = self.lock("drain")?;
        let doomed: Vec<Handle> = map
            .iter()
            .filter(|(h, v)| pred(h, v))
            .map(|(h, _)| h.clone())
            .collect();
        Ok(doomed
            .into_iter()
            .filter_map(|h| map.remove(&h).map(|v| (h, v)))
            .collect())
    }

    /// Handles currently registered
    pub fn handles(&self) -> Result<Vec<Handle>> {
        Ok(self.lock("list")?.keys().cloned().collect())
    }

    /// Number of entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock("len")?.len())
    }

    /// True if the registry holds no entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

//! Emulated replication frames
//!
//! A [`FrameLog`] stands in for the replication log of one replica file.
//! Writes through any session on that file append a frame at the primary;
//! the local copy only catches up on `sync`/`sync_until`.

use crate::Replicator;
use async_trait::async_trait;
use sqlbridge_core::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(5);

/// Frame counters for one emulated replica
#[derive(Debug, Default)]
pub struct FrameLog {
    applied: AtomicU64,
    primary: AtomicU64,
    max_write: AtomicU64,
}

impl FrameLog {
    /// Frames applied to the local copy
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Frames present at the primary
    pub fn primary(&self) -> u64 {
        self.primary.load(Ordering::SeqCst)
    }

    /// Simulate writers elsewhere adding `frames` at the primary
    pub fn advance_primary(&self, frames: u64) -> u64 {
        self.primary.fetch_add(frames, Ordering::SeqCst) + frames
    }

    pub(crate) fn record_write(&self) -> u64 {
        let frame = self.advance_primary(1);
        self.max_write.fetch_max(frame, Ordering::SeqCst);
        frame
    }

    pub(crate) fn sync(&self) -> u64 {
        let target = self.primary();
        self.applied.fetch_max(target, Ordering::SeqCst);
        self.applied()
    }
}

/// [`Replicator`] over a shared [`FrameLog`]
#[derive(Debug, Clone)]
pub struct EmulatedReplicator {
    log: Arc<FrameLog>,
}

impl EmulatedReplicator {
    /// Replicator reporting from `log`
    pub fn new(log: Arc<FrameLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Replicator for EmulatedReplicator {
    async fn current_frame(&self) -> Result<u64> {
        Ok(self.log.applied())
    }

    async fn sync(&self) -> Result<u64> {
        Ok(self.log.sync())
    }

    async fn sync_until(&self, frame: u64) -> Result<u64> {
        // Waits for the primary to reach `frame`; callers bound this.
        while self.log.primary() < frame {
            tokio::time::sleep(POLL).await;
        }
        self.log.applied.fetch_max(frame, Ordering::SeqCst);
        Ok(self.log.applied())
    }

    async fn flush(&self) -> Result<u64> {
        Ok(self.log.primary())
    }

    async fn max_write_frame(&self) -> Result<u64> {
        Ok(self.log.max_write.load(Ordering::SeqCst))
    }
}

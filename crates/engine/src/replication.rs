//! Replication frame tracker
//!
//! Frame operations only make sense on replica connections. Everywhere else
//! they return `UnsupportedOperation` rather than a made-up frame number.
//! Network-bound calls (`sync`, `sync_until`, `flush`) are bounded and
//! surface `Timeout` when the bound elapses.
//!
//! The replicator is reached without the session lock, so a long sync does
//! not queue behind statements on the same connection.

use crate::engine::Engine;
use sqlbridge_core::{Error, Handle, Result};
use sqlbridge_driver::Replicator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

impl Engine {
    fn replicator(&self, conn: &Handle, operation: &str) -> Result<(Arc<dyn Replicator>, Duration)> {
        let connection = self.connection(conn)?;
        match &connection.replicator {
            Some(r) => Ok((Arc::clone(r), connection.config.sync_timeout())),
            None => Err(Error::unsupported(
                operation,
                format!("{} connections have no replication log", connection.mode),
            )),
        }
    }

    /// Frame the local replica has applied
    pub fn current_frame(&self, conn: &Handle) -> Result<u64> {
        let (replicator, _) = self.replicator(conn, "current_frame")?;
        self.bridge
            .run("current_frame", async move { replicator.current_frame().await })
    }

    /// Pull from the primary until at least `frame` is applied.
    ///
    /// # Errors
    ///
    /// `Timeout { operation: "sync_until", .. }` if `timeout` elapses first.
    pub fn sync_until(&self, conn: &Handle, frame: u64, timeout: Duration) -> Result<u64> {
        let (replicator, _) = self.replicator(conn, "sync_until")?;
        let applied = self.bridge.run_with_timeout("sync_until", timeout, async move {
            replicator.sync_until(frame).await
        })?;
        debug!(target: "sqlbridge::repl", conn = %conn, frame, applied, "Synced until");
        Ok(applied)
    }

    /// Push pending local writes; returns the frame the primary reached.
    pub fn flush(&self, conn: &Handle) -> Result<u64> {
        let (replicator, timeout) = self.replicator(conn, "flush")?;
        self.bridge
            .run_with_timeout("flush", timeout, async move { replicator.flush().await })
    }

    /// Highest frame produced by writes through the shared replica session
    pub fn max_write_frame(&self, conn: &Handle) -> Result<u64> {
        let (replicator, _) = self.replicator(conn, "max_write_frame")?;
        self.bridge
            .run("max_write_frame", async move { replicator.max_write_frame().await })
    }

    /// Pull everything the primary has, bounded by the connection's sync
    /// timeout. Does nothing on local and remote connections.
    pub fn sync(&self, conn: &Handle) -> Result<()> {
        let connection = self.connection(conn)?;
        let Some(replicator) = connection.replicator.clone() else {
            return Ok(());
        };
        let frame = self.bridge.run_with_timeout(
            "sync",
            connection.config.sync_timeout(),
            async move { replicator.sync().await },
        )?;
        info!(target: "sqlbridge::repl", conn = %conn, frame, "Synced");
        Ok(())
    }

    /// Converting a replica to a standalone database is not offered.
    ///
    /// Every handle derived from the connection shares its session; swapping
    /// the session underneath them would leave their state meaningless.
    pub fn freeze(&self, conn: &Handle) -> Result<()> {
        self.connection(conn)?;
        Err(Error::unsupported(
            "freeze",
            "replica session is shared by handles derived from this connection",
        ))
    }
}

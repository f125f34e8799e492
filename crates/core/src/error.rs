//! Error types for sqlbridge
//!
//! Every public operation returns [`Result<T>`]. No operation terminates the
//! process on any input: adversarial handles, ownership mismatches and
//! internal synchronization faults all surface as variants of [`Error`].
//! We use `thiserror` for automatic `Display` and `Error` implementations.

use crate::handle::Handle;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sqlbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which registry a handle was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Connection registry
    Connection,
    /// Transaction registry
    Transaction,
    /// Prepared-statement registry
    Statement,
    /// Cursor registry
    Cursor,
}

impl ResourceKind {
    /// Lowercase name used in messages and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Connection => "connection",
            ResourceKind::Transaction => "transaction",
            ResourceKind::Statement => "statement",
            ResourceKind::Cursor => "cursor",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for the handle-based surface.
///
/// # Categories
///
/// | Category | Variants |
/// |----------|----------|
/// | Lookup | `NotFound` |
/// | Ownership | `OwnershipViolation` |
/// | Naming | `DuplicateName`, `SavepointNotFound` |
/// | Transaction state | `TransactionUnusable`, `TransactionActive` |
/// | Recovered faults | `LockFailure`, `Internal` |
/// | Boundaries | `Timeout`, `UnsupportedOperation` |
/// | Input | `InvalidConfig`, `InvalidInput`, `InvalidState` |
/// | Passthrough | `Driver` |
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The handle was never issued, or its resource (or owning connection)
    /// has been closed.
    #[error("{kind} not found: {handle}")]
    NotFound {
        /// Registry that was consulted
        kind: ResourceKind,
        /// Handle presented by the caller
        handle: Handle,
    },

    /// A resource was driven through a connection that did not create it.
    #[error("{kind} {handle} does not belong to connection {presented}")]
    OwnershipViolation {
        /// Kind of resource
        kind: ResourceKind,
        /// Resource handle
        handle: Handle,
        /// Connection handle presented by the caller
        presented: Handle,
    },

    /// A savepoint with this name is already on the active stack.
    #[error("savepoint already exists: {name}")]
    DuplicateName {
        /// Savepoint name
        name: String,
    },

    /// Release or rollback-to named a savepoint that is not on the stack.
    #[error("savepoint not found: {name}")]
    SavepointNotFound {
        /// Savepoint name
        name: String,
    },

    /// The transaction was poisoned by a failed nested operation and only
    /// accepts commit/rollback (which discard it).
    #[error("transaction {handle} is unusable: {reason}")]
    TransactionUnusable {
        /// Transaction handle
        handle: Handle,
        /// The failure that poisoned it
        reason: String,
    },

    /// The connection already owns a live transaction.
    #[error("connection {connection} already has an active transaction")]
    TransactionActive {
        /// Connection handle
        connection: Handle,
    },

    /// A lock was found in an inconsistent state (a prior critical section
    /// panicked). Recovered, never escalated.
    #[error("lock failure in {context}")]
    LockFailure {
        /// Operation and resource label supplied at the acquire site
        context: String,
    },

    /// A network-bound operation did not finish within its bound.
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        /// Operation label
        operation: String,
        /// The bound that elapsed
        after: Duration,
    },

    /// The feature is explicitly infeasible for this connection or build.
    #[error("unsupported operation {operation}: {reason}")]
    UnsupportedOperation {
        /// Operation label
        operation: String,
        /// Why it cannot be offered
        reason: String,
    },

    /// Error reported by the underlying database client, message preserved.
    #[error("{message}")]
    Driver {
        /// Driver message, verbatim (or enriched with constraint details)
        message: String,
    },

    /// Rejected configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// Rejected argument.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What was wrong
        reason: String,
    },

    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What was wrong
        reason: String,
    },

    /// A task panicked; the panic was caught and contained.
    #[error("internal error in {context}")]
    Internal {
        /// Where it happened
        context: String,
    },
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(kind: ResourceKind, handle: &Handle) -> Self {
        Error::NotFound {
            kind,
            handle: handle.clone(),
        }
    }

    /// Shorthand for [`Error::Driver`].
    pub fn driver(message: impl Into<String>) -> Self {
        Error::Driver {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::UnsupportedOperation`].
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidInput`].
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidConfig`].
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidState`].
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Error::InvalidState {
            reason: reason.into(),
        }
    }

    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for [`Error::OwnershipViolation`].
    pub fn is_ownership_violation(&self) -> bool {
        matches!(self, Error::OwnershipViolation { .. })
    }

    /// True for [`Error::TransactionUnusable`].
    pub fn is_unusable(&self) -> bool {
        matches!(self, Error::TransactionUnusable { .. })
    }

    /// Errors a pooling layer may retry: timeouts and recovered lock faults.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::LockFailure { .. })
    }
}

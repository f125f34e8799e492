//! Core types for sqlbridge
//!
//! This crate defines the foundational types shared by the driver seam and
//! the engine:
//! - Handle: opaque identifier for a registry entry
//! - Value / QueryResult / Column: parameter and row data
//! - Error: the error taxonomy of the handle-based surface
//! - SafeMutex: locking that turns poisoning into `LockFailure`
//! - Registry: concurrent Handle -> record map, one per resource kind
//! - ConnectionConfig / EngineConfig: validated configuration records
//! - sql: statement classification and savepoint name validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handle;
pub mod lock;
pub mod registry;
pub mod sql;
pub mod value;

pub use config::{
    ConnectionConfig, ConnectionMode, CursorMode, EngineConfig, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_SYNC_TIMEOUT_MS,
};
pub use error::{Error, ResourceKind, Result};
pub use handle::Handle;
pub use lock::SafeMutex;
pub use registry::Registry;
pub use sql::{detect_query_type, should_use_query, validate_savepoint_name, QueryType};
pub use value::{Column, QueryResult, Value};

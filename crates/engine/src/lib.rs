//! Resource registries and concurrency bridge for sqlbridge
//!
//! This crate turns asynchronous driver sessions into a synchronous,
//! handle-based surface:
//! - AsyncBridge: one shared runtime that synchronous calls block on
//! - Engine: explicit state object owning the four registries
//! - Connection manager: connect, close cascade, routed execution
//! - Transaction manager: begin/commit/rollback with a savepoint stack
//! - Statement cache: compile once, reset and rerun
//! - Cursor manager: buffered or streaming row delivery
//! - Replication frame tracker: replica-only frame operations
//! - Batches: sequential, transactional and native
//!
//! The engine is the only component that holds registry and session locks;
//! callers only ever see handles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod bridge;
mod connection;
mod constraint;
pub mod cursor;
pub mod engine;
mod replication;
mod statement;
mod transaction;

pub use batch::BatchStatement;
pub use bridge::{AsyncBridge, DEFAULT_WORKER_THREADS};
pub use cursor::{CursorContext, Fetch};
pub use engine::{Engine, ShutdownReport};
pub use sqlbridge_driver::TransactionBehavior;

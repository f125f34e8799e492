//! Test doubles for the driver seam
//!
//! [`InstrumentedDriver`] wraps any [`Driver`](crate::Driver) and reports what
//! happens underneath it through a shared [`Recorder`]:
//!
//! - **Compile counting**: every successful `prepare` is recorded per SQL text
//! - **Gates**: a chosen SQL text blocks inside the async call until the test
//!   opens the gate, simulating a slow network round-trip
//! - **Failure injection**: statements containing a substring fail with a
//!   driver error
//! - **Replica emulation**: replica configs open the inner driver locally and
//!   attach a [`FrameLog`] shared by every session on the same path
//!
//! # Example
//!
//! ```ignore
//! use sqlbridge_driver::testing::InstrumentedDriver;
//!
//! let driver = InstrumentedDriver::sqlite();
//! let recorder = driver.recorder();
//! let gate = recorder.gate("SELECT 'slow'");
//! // ... run the slow statement on one thread, other work on another ...
//! gate.open();
//! assert_eq!(recorder.compile_count(), 1);
//! ```

mod instrumented;
mod recorder;
mod replica;

pub use instrumented::InstrumentedDriver;
pub use recorder::{Gate, Recorder, OPEN};
pub use replica::{EmulatedReplicator, FrameLog};

//! # Courier Testing
//!
//! Testing utilities for Courier.
//!
//! This crate provides:
//! - [`ManualScheduler`]: a deterministic executor stepped one tick at a time
//! - [`MockTransport`]: scripted or hand-resolved transport replies with a call log
//! - [`EventLog`]: records every event a chain emits
//!
//! ## Example
//!
//! ```
//! use courier_core::transport::{Response, Transport};
//! use courier_testing::{ManualScheduler, MockTransport};
//! use courier_core::scheduler::Scheduler;
//! use serde_json::json;
//!
//! let scheduler = ManualScheduler::new();
//! let transport = MockTransport::new();
//! let reply = transport.request(Default::default());
//!
//! scheduler
//!     .spawn(Box::pin(async move {
//!         let _ = reply.await;
//!     }))
//!     .unwrap();
//! scheduler.run_until_idle();
//!
//! assert!(transport.resolve_next(Ok(Response::ok(json!({"ok": true})))));
//! scheduler.run_until_idle();
//! assert_eq!(scheduler.ready(), 0);
//! ```

/// Deterministic executor.
pub mod scheduler;

/// Scripted transport.
pub mod transport;

/// Chain event recorder.
pub mod recorder;

pub use recorder::{Event, EventLog};
pub use scheduler::ManualScheduler;
pub use transport::{MockTransport, Reply};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

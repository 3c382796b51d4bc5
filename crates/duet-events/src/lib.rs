//! Event recording for Duet hook handlers
//!
//! Every handler invocation produces one [`EventRecord`], written to two
//! independent sinks:
//! - [`EventStore`]: a `hook_events` table in an embedded Turso database
//! - [`EventLog`]: daily append-only JSONL files
//!
//! [`CorrelationTracker`] links the before/after records of one tool call
//! across handler processes, and [`validator`] checks offline that the two
//! sinks agree.

mod correlation;
mod error;
mod log;
mod record;
mod recorder;
mod store;
pub mod validator;

pub use correlation::CorrelationTracker;
pub use error::{Result, StoreError};
pub use log::EventLog;
pub use record::{EventFilter, EventRecord, AFTER_HOOK, BEFORE_HOOK, SCHEMA_VERSION};
pub use recorder::EventRecorder;
pub use store::EventStore;
pub use validator::{validate, ValidationReport, Violation, ViolationKind};

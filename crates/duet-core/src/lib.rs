//! # duet-core
//!
//! Core types for the Duet pair-programming governance engine.
//!
//! Duet runs as a set of short-lived hook handlers invoked by a coding-agent
//! host. Every handler shares the vocabulary defined here:
//!
//! - Workflow modes (discussion vs implementation) and the causes that move between them
//! - The host's hook payloads, decoded into a typed [`ToolCall`]
//! - The structured [`HookOutput`] the host consumes on stdout
//! - Repository configuration and the on-disk state layout
//! - Canonical UTC timestamps

mod error;
mod types;

pub mod config;
pub mod fail_open;
pub mod time;

pub use config::{DuetConfig, EventsConfig, HandoffConfig, ModeConfig, StateLayout};
pub use error::{DuetError, Result};
pub use types::*;

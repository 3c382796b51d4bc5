//! Mode discipline for Duet
//!
//! This crate owns the two-mode collaboration gate:
//! - [`ModeStore`] persists the active [`WorkflowMode`](duet_core::WorkflowMode)
//! - [`decide`] turns a tool call into an allow/deny [`PermissionDecision`]
//! - [`evaluate_prompt`] spots trigger phrases and emergency-stop keywords
//! - [`SubagentFlag`] marks a delegated sub-task in progress

pub mod command;
pub mod decision;
mod mode_store;
pub mod prompt;
mod subagent;

pub use command::{CommandAnalysis, CommandClassifier, Danger};
pub use decision::{decide, DecisionContext, PermissionDecision};
pub use mode_store::{ModeState, ModeStore, ModeTransition, HISTORY_LIMIT};
pub use prompt::{evaluate_prompt, PromptOutcome};
pub use subagent::{SubagentFlag, SubagentMarker};

//! Permission decisions for tool attempts
//!
//! [`decide`] is a pure function of the tool call, the active mode, the mode
//! configuration and a small [`DecisionContext`]. Everything that touches the
//! filesystem (reading the mode, checking the sub-agent flag) happens in the
//! caller.
//!
//! Rules, in order:
//! 1. `duet mode set <x>` from the agent may only target discussion
//! 2. inside a sub-agent, everything is allowed except writes into the state
//!    directory
//! 3. implementation mode allows everything except mutating the mode file
//! 4. discussion mode denies blocked tools and non-read-only shell commands
//!
//! Dangerous shell operations are reported as validation issues in every case.

use duet_core::{
    HookEvent, HookOutput, HookSpecificOutput, ModeConfig, Permission, StateLayout, ToolCall,
    ValidationIssue, WorkflowMode,
};
use std::path::{Component, Path, PathBuf};

use crate::command::{CommandAnalysis, CommandClassifier};

/// Facts about the environment the caller gathered for [`decide`]
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub project_root: PathBuf,
    /// Working directory of the agent, for resolving relative paths
    pub cwd: Option<PathBuf>,
    pub layout: StateLayout,
    /// Whether a delegated sub-task is running
    pub in_subagent: bool,
}

impl DecisionContext {
    pub fn new(project_root: impl Into<PathBuf>, layout: StateLayout) -> Self {
        Self {
            project_root: project_root.into(),
            cwd: None,
            layout,
            in_subagent: false,
        }
    }

    fn base(&self) -> &Path {
        self.cwd.as_deref().unwrap_or(&self.project_root)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        normalize(&self.base().join(path))
    }

    /// Ways a shell command might spell `path`
    fn spellings(&self, path: &Path) -> Vec<String> {
        let absolute = normalize(path);
        let mut spellings = vec![absolute.display().to_string()];
        for base in [Some(self.project_root.as_path()), self.cwd.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Ok(relative) = absolute.strip_prefix(normalize(base)) {
                let relative = relative.display().to_string();
                if !relative.is_empty() {
                    spellings.push(relative);
                }
            }
        }
        spellings
    }

    fn mentions(&self, command: &str, path: &Path) -> bool {
        self.spellings(path)
            .iter()
            .any(|s| CommandClassifier::references(command, s))
    }
}

/// Allow/deny verdict for one tool attempt, with the reasons behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub permission: Permission,
    pub continue_: bool,
    pub reason: String,
    pub validation_issues: Vec<ValidationIssue>,
    pub suppress_output: bool,
}

impl PermissionDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Allow,
            continue_: true,
            reason: reason.into(),
            validation_issues: Vec::new(),
            suppress_output: true,
        }
    }

    /// Block the tool and stop the agent; `reason` becomes the stop reason
    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            permission: Permission::Deny,
            continue_: false,
            validation_issues: vec![ValidationIssue::new(reason.clone())],
            reason,
            suppress_output: false,
        }
    }

    /// Fallback when the decision itself could not be made
    pub fn safe_deny() -> Self {
        Self::deny("Permission check failed; the tool call was blocked as a precaution")
    }

    pub fn is_allowed(&self) -> bool {
        self.permission == Permission::Allow
    }

    pub fn with_issue(mut self, message: impl Into<String>) -> Self {
        self.validation_issues.push(ValidationIssue::new(message));
        self.suppress_output = false;
        self
    }

    /// Render in the host's pre-tool-use output shape
    pub fn into_hook_output(self) -> HookOutput {
        let stop_reason = (!self.continue_).then(|| self.reason.clone());
        let mut specific = HookSpecificOutput::new(HookEvent::PreToolUse);
        specific.permission_decision = Some(self.permission);
        specific.permission_decision_reason = Some(self.reason);
        specific.validation_issues = Some(self.validation_issues);

        HookOutput {
            continue_: self.continue_,
            stop_reason,
            suppress_output: self.suppress_output,
            hook_specific_output: Some(specific),
        }
    }
}

/// Decide whether `call` may run
pub fn decide(
    call: &ToolCall,
    mode: WorkflowMode,
    config: &ModeConfig,
    ctx: &DecisionContext,
) -> PermissionDecision {
    let analysis = call
        .command()
        .map(|cmd| CommandClassifier::new(&config.extra_read_only_commands).analyze(cmd));

    let decision = match &analysis {
        Some(analysis) => match self_authorization(analysis) {
            Some(denial) => denial,
            None => decide_by_mode(call, mode, config, ctx, Some(analysis)),
        },
        None => decide_by_mode(call, mode, config, ctx, None),
    };

    match analysis {
        Some(analysis) => analysis.dangers.iter().fold(decision, |d, danger| {
            d.with_issue(format!("Dangerous operation: {}", danger))
        }),
        None => decision,
    }
}

fn self_authorization(analysis: &CommandAnalysis) -> Option<PermissionDecision> {
    analysis
        .mode_commands
        .iter()
        .find(|target| {
            target.parse::<WorkflowMode>().ok() != Some(WorkflowMode::Discussion)
        })
        .map(|target| {
            PermissionDecision::deny(format!(
                "Agents may only switch back to discussion mode (requested '{}'); \
                 implementation mode must be approved by the user",
                target
            ))
        })
}

fn decide_by_mode(
    call: &ToolCall,
    mode: WorkflowMode,
    config: &ModeConfig,
    ctx: &DecisionContext,
    analysis: Option<&CommandAnalysis>,
) -> PermissionDecision {
    if ctx.in_subagent {
        return decide_subagent(call, ctx, analysis);
    }

    match mode {
        WorkflowMode::Implementation => decide_implementation(call, ctx, analysis),
        WorkflowMode::Discussion => decide_discussion(call, config, analysis),
    }
}

fn decide_subagent(
    call: &ToolCall,
    ctx: &DecisionContext,
    analysis: Option<&CommandAnalysis>,
) -> PermissionDecision {
    let state_root = normalize(ctx.layout.root());

    if let Some(target) = call.write_target() {
        if ctx.resolve(target).starts_with(&state_root) {
            return PermissionDecision::deny(format!(
                "Sub-agents may not write inside the Duet state directory ({})",
                state_root.display()
            ));
        }
    }

    if let (Some(command), Some(analysis)) = (call.command(), analysis) {
        if !analysis.is_read_only() && ctx.mentions(command, &state_root) {
            return PermissionDecision::deny(format!(
                "Sub-agents may not modify the Duet state directory ({})",
                state_root.display()
            ));
        }
    }

    PermissionDecision::allow("Sub-agent context")
}

fn decide_implementation(
    call: &ToolCall,
    ctx: &DecisionContext,
    analysis: Option<&CommandAnalysis>,
) -> PermissionDecision {
    let mode_file = normalize(&ctx.layout.mode_file());

    if let Some(target) = call.write_target() {
        if ctx.resolve(target) == mode_file {
            return PermissionDecision::deny(
                "The mode file may only be changed with `duet mode set discussion`",
            );
        }
    }

    if let (Some(command), Some(analysis)) = (call.command(), analysis) {
        if !analysis.is_read_only() && ctx.mentions(command, &mode_file) {
            return PermissionDecision::deny(
                "Shell commands may not modify the mode file; use `duet mode set discussion`",
            );
        }
    }

    PermissionDecision::allow("Implementation mode")
}

fn decide_discussion(
    call: &ToolCall,
    config: &ModeConfig,
    analysis: Option<&CommandAnalysis>,
) -> PermissionDecision {
    let name = call.name();
    if config.blocked_tools.iter().any(|t| t == name) {
        return PermissionDecision::deny(format!(
            "Discussion mode: {} is blocked. Agree on a plan first; the user approves \
             implementation with a trigger phrase",
            name
        ));
    }

    if let Some(analysis) = analysis {
        if !analysis.is_read_only() {
            let denial = PermissionDecision::deny(
                "Discussion mode: only read-only shell commands are allowed",
            );
            return analysis
                .mutating_segments
                .iter()
                .fold(denial, |d, segment| {
                    d.with_issue(format!("Not read-only: {}", segment))
                });
        }
    }

    PermissionDecision::allow("Discussion mode: read-only tool")
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

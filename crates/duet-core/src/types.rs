//! Core type definitions for Duet hook handling

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::{DuetError, Result};

/// Collaboration mode gating which tools the agent may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Talk, read and plan; no file mutation
    #[default]
    Discussion,
    /// Tools unlocked to carry out an agreed plan
    Implementation,
}

impl std::fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discussion => write!(f, "discussion"),
            Self::Implementation => write!(f, "implementation"),
        }
    }
}

impl std::str::FromStr for WorkflowMode {
    type Err = DuetError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discussion" | "discuss" => Ok(Self::Discussion),
            "implementation" | "implement" | "impl" => Ok(Self::Implementation),
            _ => Err(DuetError::InvalidMode(s.to_string())),
        }
    }
}

/// What caused a mode transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeTrigger {
    /// A configured trigger phrase appeared in user input
    Phrase { phrase: String },
    /// Operator ran the set-mode command
    Manual,
    /// An emergency-stop keyword appeared in user input
    Emergency { keyword: String },
    /// Initialization at session start
    SessionStart,
    /// Explicit reset of the store
    Reset,
}

impl std::fmt::Display for ModeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phrase { phrase } => write!(f, "phrase '{}'", phrase),
            Self::Manual => write!(f, "manual"),
            Self::Emergency { keyword } => write!(f, "emergency stop '{}'", keyword),
            Self::SessionStart => write!(f, "session start"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Lifecycle points at which the host invokes a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    SubagentStop,
}

impl HookEvent {
    /// Name used in event records (`pre_tool_use`, ...)
    pub fn handler_name(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::UserPromptSubmit => "user_prompt_submit",
            Self::SubagentStop => "subagent_stop",
        }
    }

    /// Name the host expects back in `hookEventName`
    pub fn host_name(&self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::SubagentStop => "SubagentStop",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.handler_name())
    }
}

/// Raw payload the host writes to a handler's stdin
///
/// Every field is optional on the wire; missing fields are treated as
/// empty/unknown rather than as errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    /// Host's id for one tool invocation, shared by its before and after calls
    #[serde(default)]
    pub tool_use_id: Option<String>,
    /// Correlation id supplied explicitly by the host, if any
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl HookInput {
    /// Parse a stdin payload. Blank input decodes to an empty payload.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| DuetError::Protocol(e.to_string()))
    }

    /// Typed view of the tool call, if this payload carries one
    pub fn tool_call(&self) -> Option<ToolCall> {
        let name = self.tool_name.as_deref()?;
        let input = self.tool_input.clone().unwrap_or(Value::Null);
        Some(ToolCall::from_parts(name, input))
    }
}

/// Payload of the Write tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteInput {
    pub file_path: PathBuf,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditInput {
    pub file_path: PathBuf,
    #[serde(default)]
    pub old_string: String,
    #[serde(default)]
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiEditInput {
    pub file_path: PathBuf,
    #[serde(default)]
    pub edits: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookEditInput {
    pub notebook_path: PathBuf,
    #[serde(default)]
    pub new_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BashInput {
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadInput {
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchInput {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsInput {
    pub path: PathBuf,
}

/// Sub-task delegation payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub subagent_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
}

/// A tool invocation, keyed by tool name
///
/// Known tools decode into their own variant; anything else (or a known tool
/// whose input does not match the expected shape) keeps its raw payload in
/// [`ToolCall::Other`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Write(WriteInput),
    Edit(EditInput),
    MultiEdit(MultiEditInput),
    NotebookEdit(NotebookEditInput),
    Bash(BashInput),
    Read(ReadInput),
    Grep(SearchInput),
    Glob(SearchInput),
    Ls(LsInput),
    Task(TaskInput),
    TodoWrite(Value),
    WebFetch(Value),
    WebSearch(Value),
    Other { name: String, input: Value },
}

fn decode<T: DeserializeOwned>(input: &Value) -> Option<T> {
    serde_json::from_value(input.clone()).ok()
}

impl ToolCall {
    /// Build a typed call from the host's `tool_name` / `tool_input` pair
    pub fn from_parts(name: &str, input: Value) -> Self {
        let typed = match name {
            "Write" => decode(&input).map(Self::Write),
            "Edit" => decode(&input).map(Self::Edit),
            "MultiEdit" => decode(&input).map(Self::MultiEdit),
            "NotebookEdit" => decode(&input).map(Self::NotebookEdit),
            "Bash" => decode(&input).map(Self::Bash),
            "Read" => decode(&input).map(Self::Read),
            "Grep" => decode(&input).map(Self::Grep),
            "Glob" => decode(&input).map(Self::Glob),
            "LS" => decode(&input).map(Self::Ls),
            "Task" => decode(&input).map(Self::Task),
            "TodoWrite" => Some(Self::TodoWrite(input.clone())),
            "WebFetch" => Some(Self::WebFetch(input.clone())),
            "WebSearch" => Some(Self::WebSearch(input.clone())),
            _ => None,
        };

        typed.unwrap_or_else(|| Self::Other {
            name: name.to_string(),
            input,
        })
    }

    /// Tool name as the host spells it
    pub fn name(&self) -> &str {
        match self {
            Self::Write(_) => "Write",
            Self::Edit(_) => "Edit",
            Self::MultiEdit(_) => "MultiEdit",
            Self::NotebookEdit(_) => "NotebookEdit",
            Self::Bash(_) => "Bash",
            Self::Read(_) => "Read",
            Self::Grep(_) => "Grep",
            Self::Glob(_) => "Glob",
            Self::Ls(_) => "LS",
            Self::Task(_) => "Task",
            Self::TodoWrite(_) => "TodoWrite",
            Self::WebFetch(_) => "WebFetch",
            Self::WebSearch(_) => "WebSearch",
            Self::Other { name, .. } => name,
        }
    }

    /// File a mutating tool writes to
    pub fn write_target(&self) -> Option<&Path> {
        match self {
            Self::Write(input) => Some(&input.file_path),
            Self::Edit(input) => Some(&input.file_path),
            Self::MultiEdit(input) => Some(&input.file_path),
            Self::NotebookEdit(input) => Some(&input.notebook_path),
            _ => None,
        }
    }

    /// Whether this is one of the built-in file-writing tools
    pub fn is_file_write(&self) -> bool {
        self.write_target().is_some()
    }

    /// Shell command, for `Bash`
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Bash(input) => Some(&input.command),
            _ => None,
        }
    }
}

/// Allow / deny verdict for a tool attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Deny,
}

/// One problem found while checking a tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub message: String,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Event-specific section of a handler's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    #[serde(
        rename = "validation_issues",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub validation_issues: Option<Vec<ValidationIssue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl HookSpecificOutput {
    pub fn new(event: HookEvent) -> Self {
        Self {
            hook_event_name: event.host_name().to_string(),
            permission_decision: None,
            permission_decision_reason: None,
            validation_issues: None,
            additional_context: None,
        }
    }
}

/// The single JSON object a handler may print to stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(rename = "continue")]
    pub continue_: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suppress_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    /// Plain "carry on" output with no event-specific payload
    pub fn proceed() -> Self {
        Self {
            continue_: true,
            stop_reason: None,
            suppress_output: false,
            hook_specific_output: None,
        }
    }

    /// Carry on, injecting context text into the conversation
    pub fn with_context(event: HookEvent, context: impl Into<String>) -> Self {
        let mut specific = HookSpecificOutput::new(event);
        specific.additional_context = Some(context.into());
        Self {
            hook_specific_output: Some(specific),
            ..Self::proceed()
        }
    }
}

/// One recorded mode change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub from: WorkflowMode,
    pub to: WorkflowMode,
    pub trigger: ModeTrigger,
    #[serde(with = "crate::time::canonical")]
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!(
            "Implementation".parse::<WorkflowMode>().unwrap(),
            WorkflowMode::Implementation
        );
        assert_eq!(
            "discuss".parse::<WorkflowMode>().unwrap(),
            WorkflowMode::Discussion
        );
        assert!("coding".parse::<WorkflowMode>().is_err());
        assert_eq!(WorkflowMode::default().to_string(), "discussion");
    }

    #[test]
    fn test_trigger_serialization() {
        let trigger = ModeTrigger::Phrase {
            phrase: "make it so".to_string(),
        };
        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value, json!({"kind": "phrase", "phrase": "make it so"}));

        let manual: ModeTrigger = serde_json::from_value(json!({"kind": "manual"})).unwrap();
        assert_eq!(manual, ModeTrigger::Manual);
    }

    #[test]
    fn test_tool_call_known_variants() {
        let call = ToolCall::from_parts(
            "Edit",
            json!({"file_path": "/repo/src/lib.rs", "old_string": "a", "new_string": "b"}),
        );
        assert!(matches!(call, ToolCall::Edit(_)));
        assert_eq!(call.name(), "Edit");
        assert_eq!(call.write_target(), Some(Path::new("/repo/src/lib.rs")));

        let bash = ToolCall::from_parts("Bash", json!({"command": "ls -la"}));
        assert_eq!(bash.command(), Some("ls -la"));
        assert!(!bash.is_file_write());
    }

    #[test]
    fn test_tool_call_malformed_known_tool_keeps_raw_payload() {
        let call = ToolCall::from_parts("Write", json!({"content": "no path"}));
        match call {
            ToolCall::Other { name, input } => {
                assert_eq!(name, "Write");
                assert_eq!(input, json!({"content": "no path"}));
            }
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_call_unknown_tool() {
        let call = ToolCall::from_parts("mcp__db__query", json!({"sql": "select 1"}));
        assert_eq!(call.name(), "mcp__db__query");
        assert!(matches!(call, ToolCall::Other { .. }));
    }

    #[test]
    fn test_hook_input_missing_fields_default() {
        let input = HookInput::parse(r#"{"session_id": "s-1"}"#).unwrap();
        assert_eq!(input.session_id, "s-1");
        assert!(input.tool_call().is_none());

        let empty = HookInput::parse("  ").unwrap();
        assert_eq!(empty, HookInput::default());

        assert!(HookInput::parse("{not json").is_err());
    }

    #[test]
    fn test_hook_output_shape() {
        let mut specific = HookSpecificOutput::new(HookEvent::PreToolUse);
        specific.permission_decision = Some(Permission::Deny);
        specific.validation_issues = Some(vec![ValidationIssue::new("blocked")]);
        let output = HookOutput {
            continue_: false,
            stop_reason: Some("blocked".to_string()),
            suppress_output: false,
            hook_specific_output: Some(specific),
        };

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value,
            json!({
                "continue": false,
                "stopReason": "blocked",
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "validation_issues": [{"message": "blocked"}]
                }
            })
        );
    }
}

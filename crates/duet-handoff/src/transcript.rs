//! Conversation transcripts
//!
//! The host writes transcripts as JSONL, one entry per line:
//!
//! ```json
//! {"type": "assistant", "message": {"role": "assistant", "content": [
//!     {"type": "tool_use", "name": "Edit", "input": {"file_path": "src/lib.rs"}}
//! ]}}
//! ```
//!
//! `content` is either a plain string or a list of blocks (`text`,
//! `tool_use`, `tool_result`, ...). Lines that are not valid JSON are skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Tools whose first use marks the start of the task-relevant transcript
pub const FILE_MUTATING_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One conversation turn as handed to a sub-agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Value,
}

/// One parsed transcript line
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    /// Entry `type` (`user`, `assistant`, `summary`, `system`, ...)
    pub entry_type: String,
    /// Message role, when the entry is a conversation message
    pub role: Option<Role>,
    pub content: Value,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default)]
    entry_type: String,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Value,
}

impl TranscriptEntry {
    /// Build a message entry (mostly for tests and programmatic callers)
    pub fn message(role: Role, content: Value) -> Self {
        let entry_type = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            entry_type: entry_type.to_string(),
            role: Some(role),
            content,
        }
    }

    fn from_raw(raw: RawEntry) -> Self {
        let (role, content) = match raw.message {
            Some(message) => {
                let role = message
                    .role
                    .as_deref()
                    .and_then(Role::parse)
                    .or_else(|| Role::parse(&raw.entry_type));
                (role, message.content)
            }
            None => (None, Value::Null),
        };
        Self {
            entry_type: raw.entry_type,
            role,
            content,
        }
    }

    fn blocks(&self) -> &[Value] {
        self.content.as_array().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of the tools this entry invokes
    pub fn tool_uses(&self) -> impl Iterator<Item = &str> {
        self.blocks()
            .iter()
            .filter(|b| block_type(b) == Some("tool_use"))
            .filter_map(|b| b.get("name").and_then(Value::as_str))
    }

    /// Assistant entry invoking a file-mutating tool
    pub fn is_file_mutation(&self) -> bool {
        self.role == Some(Role::Assistant)
            && self
                .tool_uses()
                .any(|name| FILE_MUTATING_TOOLS.contains(&name))
    }

    /// User entry that only carries tool results back to the assistant
    pub fn is_tool_result_only(&self) -> bool {
        let blocks = self.blocks();
        !blocks.is_empty()
            && blocks
                .iter()
                .all(|b| block_type(b) == Some("tool_result"))
    }
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

/// Parse JSONL text, skipping blank and malformed lines
pub fn parse_transcript(text: &str) -> Vec<TranscriptEntry> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<RawEntry>(line) {
            Ok(raw) => Some(TranscriptEntry::from_raw(raw)),
            Err(e) => {
                debug!("Skipping transcript line {}: {}", idx + 1, e);
                None
            }
        })
        .collect()
}

pub async fn read_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_transcript(&text))
}

/// Drop everything before the first file-mutating tool invocation
///
/// A transcript with no such invocation was pure discussion and yields an
/// empty slice.
pub fn prune_to_first_edit(entries: &[TranscriptEntry]) -> &[TranscriptEntry] {
    match entries.iter().position(TranscriptEntry::is_file_mutation) {
        Some(start) => &entries[start..],
        None => &[],
    }
}

/// Reduce entries to user/assistant turns, dropping tool-result turns
pub fn normalize(entries: &[TranscriptEntry]) -> Vec<Turn> {
    entries
        .iter()
        .filter(|e| !e.is_tool_result_only())
        .filter_map(|e| {
            e.role.map(|role| Turn {
                role,
                content: e.content.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{"type":"summary","summary":"earlier work"}
{"type":"user","message":{"role":"user","content":"add logging"}}
not json at all
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Reading first"},{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"src/lib.rs"}}]}}
{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"fn main() {}"}]}}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t2","name":"Edit","input":{"file_path":"src/lib.rs"}}]}}
{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t2","content":"ok"}]}}
{"type":"assistant","message":{"role":"assistant","content":"done"}}
"#;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let entries = parse_transcript(SAMPLE);
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0].entry_type, "summary");
        assert_eq!(entries[0].role, None);
        assert_eq!(entries[1].role, Some(Role::User));
    }

    #[test]
    fn test_prune_starts_at_first_edit() {
        let entries = parse_transcript(SAMPLE);
        let pruned = prune_to_first_edit(&entries);
        assert_eq!(pruned.len(), 3);
        assert!(pruned[0].is_file_mutation());
    }

    #[test]
    fn test_prune_without_edit_is_empty() {
        let entries = vec![
            TranscriptEntry::message(Role::User, json!("hi")),
            TranscriptEntry::message(
                Role::Assistant,
                json!([{"type": "tool_use", "name": "Read", "input": {}}]),
            ),
        ];
        assert!(prune_to_first_edit(&entries).is_empty());
    }

    #[test]
    fn test_user_turn_naming_a_tool_is_not_a_mutation() {
        let entry = TranscriptEntry::message(
            Role::User,
            json!([{"type": "tool_use", "name": "Write", "input": {}}]),
        );
        assert!(!entry.is_file_mutation());
    }

    #[test]
    fn test_normalize_drops_tool_results() {
        let entries = parse_transcript(SAMPLE);
        let turns = normalize(prune_to_first_edit(&entries));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::Assistant);
        assert_eq!(turns[1].content, json!("done"));
    }
}

//! Configuration management for Duet
//!
//! This module provides the repository-level configuration consumed by every
//! handler (trigger phrases, tool classification rules, handoff sizing) and
//! the on-disk layout of the engine's persisted state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{DuetError, Result};

/// Directory under the project root holding Duet's config and state
pub const DUET_DIR: &str = ".duet";

/// Repository-level Duet configuration
///
/// Loaded from `.duet/config.toml` in the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuetConfig {
    /// State directory, relative to the project root unless absolute
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Mode discipline rules
    #[serde(default)]
    pub mode: ModeConfig,

    /// Transcript handoff sizing and polling
    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Event recording
    #[serde(default)]
    pub events: EventsConfig,
}

/// Mode discipline rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Phrases that move discussion -> implementation (case-insensitive)
    #[serde(default = "default_trigger_phrases")]
    pub trigger_phrases: Vec<String>,

    /// Keywords that force discussion mode (case-sensitive)
    #[serde(default = "default_emergency_keywords")]
    pub emergency_keywords: Vec<String>,

    /// Tools denied in discussion mode
    #[serde(default = "default_blocked_tools")]
    pub blocked_tools: Vec<String>,

    /// Programs treated as read-only on top of the built-in list
    #[serde(default)]
    pub extra_read_only_commands: Vec<String>,

    /// Remind the agent to return to discussion after file edits
    #[serde(default = "default_true")]
    pub implementation_reminder: bool,
}

/// Transcript handoff sizing and polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Maximum tokens per chunk
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// First poll interval for the readiness poller
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,

    /// Poll interval ceiling
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,

    /// Hard deadline for a consumer waiting on a handoff
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
}

/// Event recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Record handler invocations at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value providers
fn default_state_dir() -> PathBuf {
    PathBuf::from(DUET_DIR).join("state")
}

fn default_trigger_phrases() -> Vec<String> {
    vec![
        "make it so".to_string(),
        "run that".to_string(),
        "go ahead".to_string(),
        "yert".to_string(),
    ]
}

fn default_emergency_keywords() -> Vec<String> {
    vec!["STOP".to_string(), "SILENCE".to_string()]
}

fn default_blocked_tools() -> Vec<String> {
    vec![
        "Edit".to_string(),
        "Write".to_string(),
        "MultiEdit".to_string(),
        "NotebookEdit".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_token_budget() -> usize {
    18_000
}

fn default_poll_initial_ms() -> u64 {
    25
}

fn default_poll_max_ms() -> u64 {
    1_000
}

fn default_await_timeout_ms() -> u64 {
    30_000
}

impl DuetConfig {
    /// Load configuration from `.duet/config.toml` or use defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let config_path = Self::config_path(project_root);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| DuetError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.duet/config.toml`
    pub fn write_default(project_root: &Path) -> Result<PathBuf> {
        let config_path = Self::config_path(project_root);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| DuetError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Location of the config file for a project
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(DUET_DIR).join("config.toml")
    }

    /// Resolve the state layout for a project
    pub fn layout(&self, project_root: &Path) -> StateLayout {
        if self.state_dir.is_absolute() {
            StateLayout::new(&self.state_dir)
        } else {
            StateLayout::new(project_root.join(&self.state_dir))
        }
    }
}

impl Default for DuetConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            mode: ModeConfig::default(),
            handoff: HandoffConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            trigger_phrases: default_trigger_phrases(),
            emergency_keywords: default_emergency_keywords(),
            blocked_tools: default_blocked_tools(),
            extra_read_only_commands: Vec::new(),
            implementation_reminder: true,
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
            await_timeout_ms: default_await_timeout_ms(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Where each piece of persisted state lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The state directory itself (sub-agents may never write here)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mode store file
    pub fn mode_file(&self) -> PathBuf {
        self.root.join("mode.json")
    }

    /// Query-store database
    pub fn events_db(&self) -> PathBuf {
        self.root.join("events.db")
    }

    /// Directory of daily append-only event logs
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Pending before/after correlation entries
    pub fn correlations_dir(&self) -> PathBuf {
        self.root.join("correlations")
    }

    /// Parent of per-sub-agent handoff directories
    pub fn handoff_root(&self) -> PathBuf {
        self.root.join("handoff")
    }

    /// Flag file present while a delegated sub-task runs
    pub fn subagent_flag(&self) -> PathBuf {
        self.root.join("in_subagent_context.flag")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DuetConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, DuetConfig::default());
        assert!(config
            .mode
            .trigger_phrases
            .contains(&"make it so".to_string()));
        assert_eq!(config.handoff.token_budget, 18_000);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(DUET_DIR)).unwrap();
        std::fs::write(
            DuetConfig::config_path(dir.path()),
            "[mode]\ntrigger_phrases = [\"ship it\"]\n\n[handoff]\ntoken_budget = 500\n",
        )
        .unwrap();

        let config = DuetConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.mode.trigger_phrases, vec!["ship it".to_string()]);
        assert_eq!(config.mode.blocked_tools.len(), 4);
        assert_eq!(config.handoff.token_budget, 500);
        assert_eq!(config.handoff.poll_max_ms, 1_000);
        assert!(config.events.enabled);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(DUET_DIR)).unwrap();
        std::fs::write(DuetConfig::config_path(dir.path()), "mode = 3").unwrap();

        let err = DuetConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, DuetError::Config(_)));
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = DuetConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());

        let config = DuetConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, DuetConfig::default());
    }

    #[test]
    fn test_layout_paths() {
        let config = DuetConfig::default();
        let layout = config.layout(Path::new("/work/repo"));
        assert_eq!(layout.root(), Path::new("/work/repo/.duet/state"));
        assert_eq!(
            layout.mode_file(),
            PathBuf::from("/work/repo/.duet/state/mode.json")
        );
        assert_eq!(
            layout.handoff_root(),
            PathBuf::from("/work/repo/.duet/state/handoff")
        );
    }
}

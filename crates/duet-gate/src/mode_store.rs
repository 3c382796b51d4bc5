//! Persistent workflow mode
//!
//! The mode lives in a single JSON file under the state directory. Every
//! handler process reads it, and only [`ModeStore::set_mode`] and friends
//! write it. Writes go to a sibling `*.tmp` file first and are renamed into
//! place, so a concurrent reader sees either the old or the new state.

use chrono::{DateTime, Utc};
use duet_core::{time, DuetError, ModeTrigger, Result, StateLayout, TransitionEntry, WorkflowMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Transitions kept in `history`, oldest dropped first
pub const HISTORY_LIMIT: usize = 50;

/// Contents of the mode file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeState {
    pub mode: WorkflowMode,
    #[serde(with = "duet_core::time::canonical")]
    pub last_changed: DateTime<Utc>,
    #[serde(default)]
    pub previous_mode: Option<WorkflowMode>,
    pub trigger: ModeTrigger,
    #[serde(default)]
    pub history: Vec<TransitionEntry>,
}

impl ModeState {
    /// Fresh discussion-mode state
    pub fn initial(trigger: ModeTrigger) -> Self {
        Self {
            mode: WorkflowMode::Discussion,
            last_changed: time::now(),
            previous_mode: None,
            trigger,
            history: Vec::new(),
        }
    }

    /// Apply a transition, recording it in the bounded history
    fn advance(&self, to: WorkflowMode, trigger: ModeTrigger, at: DateTime<Utc>) -> Self {
        let mut history = self.history.clone();
        history.push(TransitionEntry {
            from: self.mode,
            to,
            trigger: trigger.clone(),
            at,
        });
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }

        Self {
            mode: to,
            last_changed: at,
            previous_mode: Some(self.mode),
            trigger,
            history,
        }
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::initial(ModeTrigger::SessionStart)
    }
}

/// Outcome of a requested mode change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeTransition {
    pub success: bool,
    pub old_mode: WorkflowMode,
    pub new_mode: WorkflowMode,
    #[serde(with = "duet_core::time::canonical")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModeTransition {
    /// Mode in force after the attempt
    pub fn effective_mode(&self) -> WorkflowMode {
        if self.success {
            self.new_mode
        } else {
            self.old_mode
        }
    }
}

/// File-backed store for the active workflow mode
#[derive(Debug, Clone)]
pub struct ModeStore {
    path: PathBuf,
}

impl ModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_layout(layout: &StateLayout) -> Self {
        Self::new(layout.mode_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored state; `Ok(None)` when no state has been written yet
    pub fn load(&self) -> Result<Option<ModeState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&content).map_err(|e| {
            DuetError::ModeStore(format!("Corrupt mode file {}: {}", self.path.display(), e))
        })?;
        Ok(Some(state))
    }

    /// Read the stored state, falling back to discussion on any error
    pub fn load_or_default(&self) -> ModeState {
        match self.load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("No mode file at {}, assuming discussion", self.path.display());
                ModeState::default()
            }
            Err(e) => {
                warn!("Failed to read mode state, assuming discussion: {}", e);
                ModeState::default()
            }
        }
    }

    /// Active mode (discussion when unreadable)
    pub fn current_mode(&self) -> WorkflowMode {
        self.load_or_default().mode
    }

    /// Change the active mode
    ///
    /// Only storage failures make this fail; the previous mode then stays in
    /// force and the error is reported in the returned transition.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn set_mode(&self, new_mode: WorkflowMode, trigger: ModeTrigger) -> ModeTransition {
        let current = self.load_or_default();
        let timestamp = time::now();
        let next = current.advance(new_mode, trigger, timestamp);

        match self.persist(&next) {
            Ok(()) => {
                info!("Mode {} -> {}", current.mode, new_mode);
                ModeTransition {
                    success: true,
                    old_mode: current.mode,
                    new_mode,
                    timestamp,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Failed to persist mode change: {}", e);
                ModeTransition {
                    success: false,
                    old_mode: current.mode,
                    new_mode,
                    timestamp,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Session start: force discussion mode
    pub fn initialize(&self) -> ModeTransition {
        self.set_mode(WorkflowMode::Discussion, ModeTrigger::SessionStart)
    }

    /// Replace the stored state with a fresh discussion state, dropping history
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn reset(&self) -> ModeTransition {
        let old_mode = self.current_mode();
        let mut fresh = ModeState::initial(ModeTrigger::Reset);
        fresh.previous_mode = Some(old_mode);
        let timestamp = fresh.last_changed;

        let error = self.persist(&fresh).err().map(|e| {
            warn!("Failed to reset mode state: {}", e);
            e.to_string()
        });

        ModeTransition {
            success: error.is_none(),
            old_mode,
            new_mode: WorkflowMode::Discussion,
            timestamp,
            error,
        }
    }

    /// Atomic replace-on-write
    fn persist(&self, state: &ModeState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

//! Sub-agent context flag
//!
//! A marker file that exists while a delegated sub-task is running. The
//! delegating handler sets it on `Task`, the sub-agent stop handler clears it.

use chrono::{DateTime, Utc};
use duet_core::{time, Result, StateLayout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Contents of the flag file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentMarker {
    pub subagent_type: String,
    #[serde(with = "duet_core::time::canonical")]
    pub set_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubagentFlag {
    path: PathBuf,
}

impl SubagentFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_layout(layout: &StateLayout) -> Self {
        Self::new(layout.subagent_flag())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self, subagent_type: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let marker = SubagentMarker {
            subagent_type: subagent_type.to_string(),
            set_at: time::now(),
        };
        fs::write(&self.path, serde_json::to_string(&marker)?)?;
        debug!("Sub-agent context set for {}", subagent_type);
        Ok(())
    }

    /// Remove the flag; a missing flag is not an error
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Sub-agent context cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    /// Marker details, when the flag is present and readable
    pub fn marker(&self) -> Option<SubagentMarker> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

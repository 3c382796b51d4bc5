//! Project discovery: root directory, configuration and state layout

use duet_core::fail_open::fail_safe;
use duet_core::{DuetConfig, StateLayout};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variables naming the project root, in priority order
const ROOT_ENV_VARS: &[&str] = &["DUET_PROJECT_DIR", "CLAUDE_PROJECT_DIR"];

#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: DuetConfig,
    pub layout: StateLayout,
}

impl Project {
    /// Resolve the project from `--project-dir`, the environment, or the cwd
    ///
    /// An unreadable config file falls back to defaults with a warning.
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        let root = explicit
            .or_else(|| {
                ROOT_ENV_VARS
                    .iter()
                    .filter_map(|var| env::var_os(var))
                    .find(|value| !value.is_empty())
                    .map(PathBuf::from)
            })
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::at(root)
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let config = fail_safe(
            "config_load",
            DuetConfig::load_or_default(&root),
            DuetConfig::default(),
        );
        let layout = config.layout(&root);
        debug!("Project root {:?}, state in {:?}", root, layout.root());
        Self {
            root,
            config,
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

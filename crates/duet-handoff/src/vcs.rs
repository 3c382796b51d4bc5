//! Version-control context for handoff manifests
//!
//! Purely informational: any failure yields `None` rather than an error.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait VcsContext: Send + Sync {
    /// Current branch name
    async fn branch(&self) -> Option<String>;

    /// Current commit id
    async fn commit(&self) -> Option<String>;
}

/// Longest a single `git` invocation may take
const GIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Context read from the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout: GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn rev_parse(&self, args: &[&str]) -> Option<String> {
        let run = Command::new("git")
            .arg("rev-parse")
            .args(args)
            .current_dir(&self.repo_root)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("git unavailable: {}", e);
                return None;
            }
            Err(_) => {
                debug!("git rev-parse {:?} timed out after {:?}", args, self.timeout);
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                "git rev-parse {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

#[async_trait]
impl VcsContext for GitCli {
    async fn branch(&self) -> Option<String> {
        self.rev_parse(&["--abbrev-ref", "HEAD"]).await
    }

    async fn commit(&self) -> Option<String> {
        self.rev_parse(&["HEAD"]).await
    }
}

/// No version control
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVcs;

#[async_trait]
impl VcsContext for NoVcs {
    async fn branch(&self) -> Option<String> {
        None
    }

    async fn commit(&self) -> Option<String> {
        None
    }
}

//! Before/after correlation across handler processes
//!
//! The before handler mints an id and parks it in a pending file keyed by
//! the host's `tool_use_id`; the after handler (a different process) picks
//! it up and removes the file. An id supplied by the host always wins.

use chrono::{DateTime, Utc};
use duet_core::time;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingCorrelation {
    correlation_id: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(with = "duet_core::time::canonical")]
    created_at: DateTime<Utc>,
}

/// Pending-correlation files under one directory
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    dir: PathBuf,
}

impl CorrelationTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh correlation id for handlers outside a before/after pair
    pub fn mint() -> String {
        Uuid::new_v4().to_string()
    }

    /// Before side: choose the id and remember it for the after side
    pub async fn begin(
        &self,
        tool_use_id: Option<&str>,
        explicit: Option<&str>,
        tool_name: Option<&str>,
    ) -> Result<String> {
        let correlation_id = explicit
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(Self::mint);

        if let Some(path) = tool_use_id.and_then(|id| self.pending_path(id)) {
            fs::create_dir_all(&self.dir).await?;
            let pending = PendingCorrelation {
                correlation_id: correlation_id.clone(),
                tool_name: tool_name.map(str::to_string),
                created_at: time::now(),
            };
            fs::write(&path, serde_json::to_vec(&pending)?).await?;
            debug!("Pending correlation {} at {:?}", correlation_id, path);
        }

        Ok(correlation_id)
    }

    /// After side: recover (and consume) the id parked by the before side
    ///
    /// Falls back to the explicit id, then to a fresh one when nothing was
    /// parked; the validator will then report the pair as orphaned.
    pub async fn finish(&self, tool_use_id: Option<&str>, explicit: Option<&str>) -> Result<String> {
        let parked = match tool_use_id.and_then(|id| self.pending_path(id)) {
            Some(path) => self.take(&path).await?,
            None => None,
        };

        if let Some(explicit) = explicit.filter(|id| !id.is_empty()) {
            return Ok(explicit.to_string());
        }

        Ok(match parked {
            Some(pending) => pending.correlation_id,
            None => {
                warn!(
                    "No pending correlation for tool_use_id {:?}; minting a new id",
                    tool_use_id
                );
                Self::mint()
            }
        })
    }

    /// Drop the pending entry of a denied call (no after side will come)
    pub async fn discard(&self, tool_use_id: Option<&str>) -> Result<()> {
        if let Some(path) = tool_use_id.and_then(|id| self.pending_path(id)) {
            self.take(&path).await?;
        }
        Ok(())
    }

    /// Remove pending entries older than `max_age`; returns how many went
    pub async fn prune(&self, max_age: chrono::Duration) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let cutoff = time::now() - max_age;
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stale = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<PendingCorrelation>(&bytes)
                    .map(|p| p.created_at < cutoff)
                    .unwrap_or(true),
                Err(_) => false,
            };
            if stale && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Pruned {} stale pending correlations", removed);
        }
        Ok(removed)
    }

    async fn take(&self, path: &Path) -> Result<Option<PendingCorrelation>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let _ = fs::remove_file(path).await;
        Ok(serde_json::from_slice(&bytes).ok())
    }

    /// Pending file for a tool_use_id; `None` when the id is unusable
    fn pending_path(&self, tool_use_id: &str) -> Option<PathBuf> {
        let safe: String = tool_use_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if safe.is_empty() {
            None
        } else {
            Some(self.dir.join(format!("{}.json", safe)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_before_and_after_share_id() {
        let dir = tempdir().unwrap();
        let tracker = CorrelationTracker::new(dir.path().join("correlations"));

        let before = tracker
            .begin(Some("toolu_01"), None, Some("Write"))
            .await
            .unwrap();
        let after = tracker.finish(Some("toolu_01"), None).await.unwrap();
        assert_eq!(before, after);

        // Consumed: a second after gets a different id
        let again = tracker.finish(Some("toolu_01"), None).await.unwrap();
        assert_ne!(again, before);
    }

    #[tokio::test]
    async fn test_explicit_id_takes_precedence() {
        let dir = tempdir().unwrap();
        let tracker = CorrelationTracker::new(dir.path());

        let before = tracker
            .begin(Some("toolu_02"), Some("host-corr"), None)
            .await
            .unwrap();
        assert_eq!(before, "host-corr");

        let after = tracker
            .finish(Some("toolu_02"), Some("host-corr"))
            .await
            .unwrap();
        assert_eq!(after, "host-corr");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_discard_removes_pending() {
        let dir = tempdir().unwrap();
        let tracker = CorrelationTracker::new(dir.path());

        let before = tracker.begin(Some("toolu_03"), None, None).await.unwrap();
        tracker.discard(Some("toolu_03")).await.unwrap();
        let after = tracker.finish(Some("toolu_03"), None).await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_without_tool_use_id_nothing_is_parked() {
        let dir = tempdir().unwrap();
        let tracker = CorrelationTracker::new(dir.path().join("correlations"));

        tracker.begin(None, None, None).await.unwrap();
        tracker.begin(Some("../.."), None, None).await.unwrap();
        assert!(!tracker.dir().exists());
    }

    #[tokio::test]
    async fn test_prune_removes_stale_entries() {
        let dir = tempdir().unwrap();
        let tracker = CorrelationTracker::new(dir.path());
        tracker.begin(Some("toolu_04"), None, None).await.unwrap();

        assert_eq!(tracker.prune(chrono::Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(tracker.prune(chrono::Duration::seconds(-1)).await.unwrap(), 1);
    }
}

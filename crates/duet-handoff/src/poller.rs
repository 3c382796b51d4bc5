//! Consumer side of a handoff
//!
//! The producer runs in another process, so readiness is judged from the
//! filesystem alone: at least one chunk plus the manifest, every file
//! non-empty, and an identical set of sizes on two consecutive polls.

use duet_core::HandoffConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::chunker::TranscriptChunk;
use crate::error::{HandoffError, Result};
use crate::producer::{chunk_index, validate_subagent_type, HandoffManifest, MANIFEST_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(25),
            max_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl PollConfig {
    pub fn from_config(config: &HandoffConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.poll_initial_ms.max(1)),
            max_interval: Duration::from_millis(config.poll_max_ms.max(config.poll_initial_ms)),
            timeout: Duration::from_millis(config.await_timeout_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// File name -> size for the chunk files and manifest
type Snapshot = BTreeMap<String, u64>;

/// Wait until the handoff for `subagent_type` is complete and stable
///
/// Returns the chunk paths in sequence order. Fails with
/// [`HandoffError::NotFound`] at once when the directory does not exist and
/// with [`HandoffError::Timeout`] when the files never settle.
#[instrument(skip(config))]
pub async fn await_handoff(handoff_root: &Path, subagent_type: &str, config: &PollConfig) -> Result<Vec<PathBuf>> {
    validate_subagent_type(subagent_type)?;
    let dir = handoff_root.join(subagent_type);
    if !dir.is_dir() {
        return Err(HandoffError::NotFound(dir));
    }

    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut interval = config.initial_interval;
    let mut previous: Option<Snapshot> = None;

    loop {
        let snapshot = snapshot(&dir).await?;
        if is_ready(&snapshot) {
            if previous.as_ref() == Some(&snapshot) {
                debug!(
                    "Handoff stable after {:?} ({} files)",
                    started.elapsed(),
                    snapshot.len()
                );
                return Ok(chunk_paths(&dir, &snapshot));
            }
            previous = Some(snapshot);
        } else {
            previous = None;
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(HandoffError::Timeout {
                dir,
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = (interval * 2).min(config.max_interval);
    }
}

async fn snapshot(dir: &Path) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        // Removed between polls: not ready
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshot),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != MANIFEST_FILE && chunk_index(&name).is_none() {
            continue;
        }
        match entry.metadata().await {
            Ok(meta) => {
                snapshot.insert(name, meta.len());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(snapshot)
}

fn is_ready(snapshot: &Snapshot) -> bool {
    snapshot.contains_key(MANIFEST_FILE)
        && snapshot.keys().any(|name| chunk_index(name).is_some())
        && snapshot.values().all(|size| *size > 0)
}

fn chunk_paths(dir: &Path, snapshot: &Snapshot) -> Vec<PathBuf> {
    let mut indexed: Vec<(usize, &String)> = snapshot
        .keys()
        .filter_map(|name| chunk_index(name).map(|i| (i, name)))
        .collect();
    indexed.sort();
    indexed.into_iter().map(|(_, name)| dir.join(name)).collect()
}

/// A handoff read back by the consumer
#[derive(Debug, Clone)]
pub struct LoadedHandoff {
    pub manifest: HandoffManifest,
    pub chunks: Vec<TranscriptChunk>,
}

impl LoadedHandoff {
    pub fn turn_count(&self) -> usize {
        self.chunks.iter().map(|c| c.turns.len()).sum()
    }
}

/// Read the manifest and chunks returned by [`await_handoff`]
pub async fn load_handoff(chunk_paths: &[PathBuf]) -> Result<LoadedHandoff> {
    let dir = chunk_paths
        .first()
        .and_then(|p| p.parent())
        .ok_or_else(|| HandoffError::Inconsistent("no chunk files".to_string()))?;

    let manifest: HandoffManifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE)).await?)?;
    if manifest.chunk_count != chunk_paths.len() {
        return Err(HandoffError::Inconsistent(format!(
            "manifest lists {} chunks, found {}",
            manifest.chunk_count,
            chunk_paths.len()
        )));
    }

    let mut chunks = Vec::with_capacity(chunk_paths.len());
    for (position, path) in chunk_paths.iter().enumerate() {
        let chunk: TranscriptChunk = serde_json::from_slice(&fs::read(path).await?)?;
        if chunk.index != position + 1 {
            return Err(HandoffError::Inconsistent(format!(
                "{:?} has index {}, expected {}",
                path,
                chunk.index,
                position + 1
            )));
        }
        chunks.push(chunk);
    }

    Ok(LoadedHandoff { manifest, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fast() -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            timeout: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let started = std::time::Instant::now();
        let err = await_handoff(dir.path(), "logging", &PollConfig::default().with_timeout(Duration::from_millis(500)))
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::NotFound(_)));
        assert_eq!(err.exit_code(), 3);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_stable_files_are_returned_in_order() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("review");
        std::fs::create_dir_all(&target).unwrap();
        for name in ["chunk_010.json", "chunk_002.json", "chunk_001.json"] {
            std::fs::write(target.join(name), "{}").unwrap();
        }
        std::fs::write(target.join(MANIFEST_FILE), "{}").unwrap();
        std::fs::write(target.join("chunk_003.json.tmp"), "").unwrap();

        let paths = await_handoff(dir.path(), "review", &fast()).await.unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chunk_001.json", "chunk_002.json", "chunk_010.json"]);
    }

    #[tokio::test]
    async fn test_missing_manifest_times_out() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("review");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("chunk_001.json"), "{}").unwrap();

        let err = await_handoff(dir.path(), "review", &fast()).await.unwrap_err();
        assert!(matches!(err, HandoffError::Timeout { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_empty_file_is_not_ready() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("review");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("chunk_001.json"), "").unwrap();
        std::fs::write(target.join(MANIFEST_FILE), "{}").unwrap();

        let err = await_handoff(dir.path(), "review", &fast()).await.unwrap_err();
        assert!(matches!(err, HandoffError::Timeout { .. }));
    }

    /// Append to `path` every 5ms for `writes` times on its own thread
    fn grow(path: PathBuf, writes: usize, done: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            for _ in 0..writes {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .unwrap();
                file.write_all(b"{\"role\":\"user\"}\n").unwrap();
                drop(file);
                std::thread::sleep(Duration::from_millis(5));
            }
            done.store(true, Ordering::SeqCst);
        })
    }

    fn slow() -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(40),
            max_interval: Duration::from_millis(40),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_growing_chunk_is_awaited_until_writes_stop() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("review");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join(MANIFEST_FILE), "{}").unwrap();
        let chunk = target.join("chunk_001.json");
        std::fs::write(&chunk, "[").unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = grow(chunk.clone(), 30, done.clone());

        let paths = await_handoff(dir.path(), "review", &slow()).await.unwrap();
        assert!(done.load(Ordering::SeqCst), "returned while the chunk was still growing");
        assert_eq!(paths, vec![chunk.clone()]);

        writer.join().unwrap();
        let line_len = "{\"role\":\"user\"}\n".len() as u64;
        assert_eq!(std::fs::metadata(&chunk).unwrap().len(), 1 + 30 * line_len);
    }

    #[tokio::test]
    async fn test_chunk_growing_past_deadline_times_out() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("review");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join(MANIFEST_FILE), "{}").unwrap();
        let chunk = target.join("chunk_001.json");
        std::fs::write(&chunk, "[").unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = grow(chunk, 120, done.clone());

        let config = slow().with_timeout(Duration::from_millis(250));
        let err = await_handoff(dir.path(), "review", &config).await.unwrap_err();
        assert!(matches!(err, HandoffError::Timeout { .. }));
        assert!(!done.load(Ordering::SeqCst));

        writer.join().unwrap();
    }

    #[test]
    fn test_from_config() {
        let config = HandoffConfig::default();
        let poll = PollConfig::from_config(&config);
        assert_eq!(poll, PollConfig::default());
    }

    #[tokio::test]
    async fn test_load_requires_chunks() {
        let err = load_handoff(&[]).await.unwrap_err();
        assert!(matches!(err, HandoffError::Inconsistent(_)));
    }
}

//! Producer side of a handoff
//!
//! Layout written under `<handoff-root>/<subagent-type>/`:
//! - `chunk_001.json` .. `chunk_NNN.json`, one [`TranscriptChunk`] each
//! - `manifest.json`, written last
//!
//! Every file goes through a `.tmp` sibling and a rename, so a consumer
//! never sees a partially written file under its final name.

use chrono::{DateTime, Utc};
use duet_core::time;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::chunker::{chunk_turns, TranscriptChunk};
use crate::error::{HandoffError, Result};
use crate::tokens::{HeuristicCounter, TokenCounter};
use crate::transcript::{self, TranscriptEntry};
use crate::vcs::VcsContext;

pub const MANIFEST_FILE: &str = "manifest.json";

const CHUNK_PREFIX: &str = "chunk_";

/// Where the delegation happened and what it asked for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffContext {
    pub project_root: PathBuf,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub vcs_branch: Option<String>,
    #[serde(default)]
    pub vcs_commit: Option<String>,
}

impl HandoffContext {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    /// Fill the branch and commit from `vcs`
    pub async fn with_vcs(mut self, vcs: &dyn VcsContext) -> Self {
        self.vcs_branch = vcs.branch().await;
        self.vcs_commit = vcs.commit().await;
        self
    }
}

/// Index of a prepared handoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffManifest {
    pub subagent_type: String,
    pub chunk_count: usize,
    pub token_budget: usize,
    pub total_tokens: usize,
    #[serde(with = "duet_core::time::canonical")]
    pub created_at: DateTime<Utc>,
    pub context: HandoffContext,
    /// Chunk file names in order
    #[serde(default)]
    pub chunk_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HandoffRequest {
    pub subagent_type: String,
    pub token_budget: usize,
    pub context: HandoffContext,
}

/// Result of [`HandoffProducer::prepare`]
///
/// A transcript with no file edits produces no files: `chunk_files` is
/// empty and there is no manifest.
#[derive(Debug, Clone)]
pub struct PreparedHandoff {
    pub dir: PathBuf,
    pub chunk_files: Vec<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub manifest: Option<HandoffManifest>,
}

impl PreparedHandoff {
    pub fn chunk_count(&self) -> usize {
        self.chunk_files.len()
    }
}

pub struct HandoffProducer {
    root: PathBuf,
    counter: Box<dyn TokenCounter>,
}

impl HandoffProducer {
    /// Producer writing under `handoff_root` with the default token counter
    pub fn new(handoff_root: impl Into<PathBuf>) -> Self {
        Self::with_counter(handoff_root, Box::new(HeuristicCounter))
    }

    pub fn with_counter(handoff_root: impl Into<PathBuf>, counter: Box<dyn TokenCounter>) -> Self {
        Self {
            root: handoff_root.into(),
            counter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a JSONL transcript and prepare its handoff
    pub async fn prepare(&self, transcript_path: &Path, request: HandoffRequest) -> Result<PreparedHandoff> {
        let entries = transcript::read_transcript(transcript_path).await?;
        debug!(
            "Read {} transcript entries from {:?}",
            entries.len(),
            transcript_path
        );
        self.prepare_entries(&entries, request).await
    }

    #[instrument(skip(self, entries, request), fields(subagent = %request.subagent_type))]
    pub async fn prepare_entries(
        &self,
        entries: &[TranscriptEntry],
        request: HandoffRequest,
    ) -> Result<PreparedHandoff> {
        validate_subagent_type(&request.subagent_type)?;
        if request.token_budget == 0 {
            return Err(HandoffError::Inconsistent(
                "token budget must be positive".to_string(),
            ));
        }

        let dir = self.root.join(&request.subagent_type);
        let turns = transcript::normalize(transcript::prune_to_first_edit(entries));

        if turns.is_empty() {
            // Nothing to hand off; a leftover handoff must not be mistaken for this one
            if dir.exists() {
                fs::remove_dir_all(&dir).await?;
            }
            info!("No file edits in transcript; nothing handed off");
            return Ok(PreparedHandoff {
                dir,
                chunk_files: Vec::new(),
                manifest_path: None,
                manifest: None,
            });
        }

        let chunks = chunk_turns(turns, request.token_budget, self.counter.as_ref());

        fs::create_dir_all(&dir).await?;
        clear_stale(&dir).await?;

        let mut chunk_files = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let path = dir.join(chunk_file_name(chunk.index));
            write_atomic(&path, &serde_json::to_vec_pretty(chunk)?).await?;
            chunk_files.push(path);
        }

        let manifest = HandoffManifest {
            subagent_type: request.subagent_type,
            chunk_count: chunks.len(),
            token_budget: request.token_budget,
            total_tokens: chunks.iter().map(|c: &TranscriptChunk| c.token_count).sum(),
            created_at: time::now(),
            context: request.context,
            chunk_files: chunk_files
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?).await?;

        info!(
            "Prepared handoff: {} chunks, {} tokens in {:?}",
            manifest.chunk_count, manifest.total_tokens, dir
        );

        Ok(PreparedHandoff {
            dir,
            chunk_files,
            manifest_path: Some(manifest_path),
            manifest: Some(manifest),
        })
    }
}

/// `chunk_001.json` for index 1
pub(crate) fn chunk_file_name(index: usize) -> String {
    format!("{}{:03}.json", CHUNK_PREFIX, index)
}

/// Sequence number of a chunk file name, `None` for anything else
pub(crate) fn chunk_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Sub-agent types become directory names: one plain path component only
pub(crate) fn validate_subagent_type(subagent_type: &str) -> Result<()> {
    let valid = !subagent_type.is_empty()
        && !subagent_type.starts_with('.')
        && subagent_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(HandoffError::InvalidSubagent(subagent_type.to_string()))
    }
}

async fn clear_stale(dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(CHUNK_PREFIX) || name == MANIFEST_FILE || name.ends_with(".tmp") {
            debug!("Removing stale handoff file {}", name);
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

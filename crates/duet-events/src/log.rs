//! Append-only sink: one JSONL file per UTC day

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;
use crate::record::{EventFilter, EventRecord};

const FILE_PREFIX: &str = "events-";
const FILE_SUFFIX: &str = ".jsonl";

/// Daily event log files under one directory
#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a record belongs in, by the UTC date of its timestamp
    pub fn file_for(&self, record: &EventRecord) -> PathBuf {
        self.dir.join(format!(
            "{}{}{}",
            FILE_PREFIX,
            record.timestamp.format("%Y-%m-%d"),
            FILE_SUFFIX
        ))
    }

    pub async fn append(&self, record: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        fs::create_dir_all(&self.dir).await?;
        let path = self.file_for(record);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // Single write so concurrent appenders never interleave within a line
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended {} to {:?}", record.id, path);
        Ok(())
    }

    /// Log files, oldest day first
    pub async fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every readable record, in storage order (by day, then line)
    pub async fn read_all(&self) -> Result<Vec<EventRecord>> {
        let mut records = Vec::new();

        for path in self.files().await? {
            let content = fs::read_to_string(&path).await?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EventRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        debug!("Skipping {:?} line {}: {}", path, lineno + 1, e);
                    }
                }
            }
        }

        Ok(records)
    }

    /// Records matching `filter`, in storage order
    pub async fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let matching = self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r));

        Ok(if filter.limit > 0 {
            matching.take(filter.limit).collect()
        } else {
            matching.collect()
        })
    }

    /// Latest logical timestamp for a session, scanning the log
    pub async fn latest_logical_ts(&self, session_id: &str) -> Result<Option<i64>> {
        Ok(self
            .read_all()
            .await?
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.logical_ts)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AFTER_HOOK, BEFORE_HOOK};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("logs"));

        let first = EventRecord::new("s-1", "c-1", BEFORE_HOOK).with_tool("Bash");
        let second = EventRecord::new("s-1", "c-1", AFTER_HOOK).with_tool("Bash");
        log.append(&first).await.unwrap();
        log.append(&second).await.unwrap();

        let files = log.files().await.unwrap();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("events-") && name.ends_with(".jsonl"));

        assert_eq!(log.read_all().await.unwrap(), vec![first, second.clone()]);
        assert_eq!(
            log.latest_logical_ts("s-1").await.unwrap(),
            Some(second.logical_ts)
        );
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path());

        let record = EventRecord::new("s-1", "c-1", "session_start");
        log.append(&record).await.unwrap();
        let path = log.file_for(&record);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{ truncated\n");
        std::fs::write(&path, content).unwrap();

        assert_eq!(log.read_all().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_query_applies_limit() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path());
        for i in 0..3 {
            log.append(&EventRecord::new("s-1", format!("c-{}", i), "session_start"))
                .await
                .unwrap();
        }

        let filter = EventFilter {
            limit: 2,
            ..EventFilter::session("s-1")
        };
        let found = log.query(&filter).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].correlation_id, "c-0");
    }

    #[tokio::test]
    async fn test_missing_dir_reads_empty() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nope"));
        assert!(log.read_all().await.unwrap().is_empty());
    }
}

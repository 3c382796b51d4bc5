//! Integration tests for the handoff protocol
//!
//! Runs producer and consumer against one directory tree:
//! - transcript file -> chunk files + manifest
//! - readiness polling while the producer is still writing
//! - reading the handoff back and checking it against the manifest

use duet_handoff::{
    await_handoff, load_handoff, HandoffContext, HandoffError, HandoffProducer, HandoffRequest,
    NoVcs, PollConfig, Role,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const TRANSCRIPT: &str = r#"{"type":"user","message":{"role":"user","content":"let's talk about logging"}}
{"type":"assistant","message":{"role":"assistant","content":"Sure. Where should it go?"}}
{"type":"user","message":{"role":"user","content":"make it so"}}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Adding it now"},{"type":"tool_use","id":"toolu_1","name":"Write","input":{"file_path":"src/log.rs","content":"pub fn init() {}"}}]}}
{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"File written"}]}}
{"type":"assistant","message":{"role":"assistant","content":"Logging is wired up."}}
{"type":"user","message":{"role":"user","content":"now hand the tests to a sub-agent"}}
"#;

fn write_transcript(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("transcript.jsonl");
    std::fs::write(&path, TRANSCRIPT).expect("Failed to write transcript");
    path
}

fn fast_poll() -> PollConfig {
    PollConfig {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(50),
        timeout: Duration::from_secs(5),
    }
}

async fn request(root: &Path, subagent: &str, budget: usize) -> HandoffRequest {
    let mut context = HandoffContext::new(root).with_vcs(&NoVcs).await;
    context.session_id = Some("session-1".to_string());
    context.description = Some("write tests".to_string());
    HandoffRequest {
        subagent_type: subagent.to_string(),
        token_budget: budget,
        context,
    }
}

#[tokio::test]
async fn test_prepare_then_await_and_load() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let transcript = write_transcript(dir.path());
    let handoff_root = dir.path().join("handoff");

    let producer = HandoffProducer::new(&handoff_root);
    let prepared = producer
        .prepare(&transcript, request(dir.path(), "test-writer", 18_000).await)
        .await
        .unwrap();
    assert_eq!(prepared.chunk_count(), 1);

    let paths = await_handoff(&handoff_root, "test-writer", &fast_poll())
        .await
        .unwrap();
    assert_eq!(paths, prepared.chunk_files);

    let loaded = load_handoff(&paths).await.unwrap();
    assert_eq!(loaded.manifest.subagent_type, "test-writer");
    assert_eq!(loaded.manifest.context.session_id.as_deref(), Some("session-1"));
    assert_eq!(loaded.manifest.context.vcs_branch, None);

    // Pruned to the Write; the tool result is gone
    assert_eq!(loaded.turn_count(), 3);
    let first = &loaded.chunks[0].turns[0];
    assert_eq!(first.role, Role::Assistant);
}

#[tokio::test]
async fn test_small_budget_round_trips_every_turn() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let transcript = write_transcript(dir.path());
    let handoff_root = dir.path().join("handoff");

    let prepared = HandoffProducer::new(&handoff_root)
        .prepare(&transcript, request(dir.path(), "review", 10).await)
        .await
        .unwrap();
    assert_eq!(prepared.chunk_count(), 3);

    let paths = await_handoff(&handoff_root, "review", &fast_poll())
        .await
        .unwrap();
    let loaded = load_handoff(&paths).await.unwrap();
    assert_eq!(loaded.manifest.chunk_count, 3);
    assert_eq!(loaded.turn_count(), 3);
    assert_eq!(
        loaded.manifest.total_tokens,
        loaded.chunks.iter().map(|c| c.token_count).sum::<usize>()
    );
}

#[tokio::test]
async fn test_consumer_waits_for_late_manifest() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let handoff_root = dir.path().join("handoff");
    let target = handoff_root.join("slow");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("chunk_001.json"), "{\"index\":1}").unwrap();

    let writer_dir = target.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::fs::write(writer_dir.join("manifest.json"), "{}")
            .await
            .unwrap();
    });

    let started = std::time::Instant::now();
    let paths = await_handoff(&handoff_root, "slow", &fast_poll())
        .await
        .unwrap();
    writer.await.unwrap();

    assert_eq!(paths.len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_missing_handoff_fails_fast() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = PollConfig::default().with_timeout(Duration::from_millis(500));

    let started = std::time::Instant::now();
    let err = await_handoff(&dir.path().join("handoff"), "logging", &config)
        .await
        .unwrap_err();

    assert!(matches!(err, HandoffError::NotFound(_)));
    assert!(started.elapsed() < Duration::from_millis(500));
}

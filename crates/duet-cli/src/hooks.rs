//! Hook handlers
//!
//! One process per host event. Each handler reads the host payload, does
//! its work against the state directory and returns at most one JSON object
//! for stdout. Only the permission decision fails closed; everything else
//! degrades with a warning.

use duet_core::fail_open::fail_open;
use duet_core::{HookEvent, HookInput, HookOutput, TaskInput, ToolCall, WorkflowMode};
use duet_events::{CorrelationTracker, EventRecord, EventRecorder, AFTER_HOOK, BEFORE_HOOK};
use duet_gate::{decide, evaluate_prompt, DecisionContext, ModeStore, PermissionDecision, SubagentFlag};
use duet_handoff::{GitCli, HandoffContext, HandoffProducer, HandoffRequest};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::project::Project;

/// Sub-agent type assumed when a `Task` call names none
const DEFAULT_SUBAGENT: &str = "general-purpose";

/// Pending correlations older than this are dropped at session start
const CORRELATION_MAX_AGE_HOURS: i64 = 24;

const IMPLEMENTATION_REMINDER: &str = "You are in IMPLEMENTATION mode. When the agreed change \
     is complete, return to discussion with `duet mode set discussion`.";

/// Output for a payload that could not be read at all
pub fn fallback_output(event: HookEvent) -> Option<HookOutput> {
    match event {
        HookEvent::PreToolUse => Some(PermissionDecision::safe_deny().into_hook_output()),
        _ => None,
    }
}

/// Run the handler for `event` on the raw stdin payload
pub async fn handle(event: HookEvent, raw: &str, project: &Project) -> Option<HookOutput> {
    let started = Instant::now();
    let input = match HookInput::parse(raw) {
        Ok(input) => input,
        Err(e) => {
            warn!("Malformed {} payload: {}", event, e);
            return fallback_output(event);
        }
    };

    let recorder = if project.config.events.enabled {
        Some(EventRecorder::open(&project.layout).await)
    } else {
        None
    };

    let handler = Handler {
        project,
        input: &input,
        recorder: recorder.as_ref(),
        started,
    };

    match event {
        HookEvent::SessionStart => handler.session_start().await,
        HookEvent::SessionEnd => handler.session_end().await,
        HookEvent::PreToolUse => Some(handler.pre_tool_use().await),
        HookEvent::PostToolUse => handler.post_tool_use().await,
        HookEvent::UserPromptSubmit => handler.user_prompt_submit().await,
        HookEvent::SubagentStop => handler.subagent_stop().await,
    }
}

struct Handler<'a> {
    project: &'a Project,
    input: &'a HookInput,
    recorder: Option<&'a EventRecorder>,
    started: Instant,
}

impl Handler<'_> {
    fn session_id(&self) -> &str {
        if self.input.session_id.is_empty() {
            "unknown"
        } else {
            &self.input.session_id
        }
    }

    fn tool_use_id(&self) -> Option<&str> {
        self.input.tool_use_id.as_deref()
    }

    fn explicit_correlation(&self) -> Option<&str> {
        self.input.correlation_id.as_deref()
    }

    fn mode_store(&self) -> ModeStore {
        ModeStore::from_layout(&self.project.layout)
    }

    fn subagent_flag(&self) -> SubagentFlag {
        SubagentFlag::from_layout(&self.project.layout)
    }

    fn clear_subagent_flag(&self) {
        if let Err(e) = self.subagent_flag().clear() {
            warn!("Failed to clear sub-agent flag (fail-open): {}", e);
        }
    }

    fn record_for(&self, correlation_id: &str, hook_name: &str) -> EventRecord {
        let record = EventRecord::new(self.session_id(), correlation_id, hook_name)
            .with_duration_ms(self.started.elapsed().as_millis() as u64);
        match &self.input.tool_name {
            Some(tool) => record.with_tool(tool.as_str()),
            None => record,
        }
    }

    /// Record for a handler outside a before/after pair
    async fn record_standalone(&self, event: HookEvent, success: bool, payload: Value) {
        let Some(recorder) = self.recorder else {
            return;
        };
        let correlation_id = self
            .explicit_correlation()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(CorrelationTracker::mint);
        let record = self
            .record_for(&correlation_id, event.handler_name())
            .with_outcome(success, false)
            .with_payload(payload);
        recorder.record(&record).await;
    }

    async fn session_start(&self) -> Option<HookOutput> {
        let transition = self.mode_store().initialize();
        self.clear_subagent_flag();

        if let Some(recorder) = self.recorder {
            let max_age = chrono::Duration::hours(CORRELATION_MAX_AGE_HOURS);
            fail_open("correlation_prune", || recorder.correlations().prune(max_age)).await;
        }

        self.record_standalone(
            HookEvent::SessionStart,
            transition.success,
            json!({ "mode": transition.effective_mode(), "error": transition.error }),
        )
        .await;

        let approval = self
            .project
            .config
            .mode
            .trigger_phrases
            .first()
            .map(|phrase| format!(" (for example \"{}\")", phrase))
            .unwrap_or_default();
        Some(HookOutput::with_context(
            HookEvent::SessionStart,
            format!(
                "Duet is active in {} mode. Discuss the approach and agree on a plan before \
                 changing files; implementation starts once the user approves it{}.",
                transition.effective_mode().to_string().to_uppercase(),
                approval
            ),
        ))
    }

    async fn session_end(&self) -> Option<HookOutput> {
        let mode = self.mode_store().current_mode();
        self.record_standalone(HookEvent::SessionEnd, true, json!({ "mode": mode }))
            .await;
        None
    }

    async fn pre_tool_use(&self) -> HookOutput {
        let Some(call) = self.input.tool_call() else {
            warn!("pre-tool-use payload without tool_name; denying");
            return PermissionDecision::safe_deny().into_hook_output();
        };

        let mode = self.mode_store().current_mode();
        let flag = self.subagent_flag();
        let ctx = DecisionContext {
            project_root: self.project.root.clone(),
            cwd: self.input.cwd.clone(),
            layout: self.project.layout.clone(),
            in_subagent: flag.is_set(),
        };
        let decision = decide(&call, mode, &self.project.config.mode, &ctx);
        let denied = !decision.is_allowed();
        debug!(
            "{} in {} mode: {:?} ({})",
            call.name(),
            mode,
            decision.permission,
            decision.reason
        );

        if !denied {
            if let ToolCall::Task(task) = &call {
                self.begin_delegation(task, &flag).await;
            }
        }

        if let Some(recorder) = self.recorder {
            let correlations = recorder.correlations();
            let correlation_id = fail_open("correlation_begin", || {
                correlations.begin(self.tool_use_id(), self.explicit_correlation(), Some(call.name()))
            })
            .await
            .unwrap_or_else(CorrelationTracker::mint);
            if denied {
                fail_open("correlation_discard", || correlations.discard(self.tool_use_id())).await;
            }

            let record = self
                .record_for(&correlation_id, BEFORE_HOOK)
                .with_tool(call.name())
                .with_outcome(true, denied)
                .with_payload(json!({
                    "mode": mode,
                    "permission": decision.permission,
                    "reason": decision.reason,
                    "validation_issues": decision.validation_issues,
                    "in_subagent": ctx.in_subagent,
                }));
            recorder.record(&record).await;
        }

        decision.into_hook_output()
    }

    /// Mark the sub-agent context and hand the transcript over
    ///
    /// A handoff that cannot be prepared is logged; the sub-agent's own
    /// `duet handoff await` then fails with a not-found status.
    async fn begin_delegation(&self, task: &TaskInput, flag: &SubagentFlag) {
        let subagent_type = if task.subagent_type.is_empty() {
            DEFAULT_SUBAGENT
        } else {
            task.subagent_type.as_str()
        };

        if let Err(e) = flag.set(subagent_type) {
            warn!("Failed to set sub-agent flag (fail-open): {}", e);
        }

        let Some(transcript) = self.input.transcript_path.as_deref() else {
            debug!("No transcript_path; skipping handoff for {}", subagent_type);
            return;
        };

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let context = HandoffContext {
            project_root: self.project.root.clone(),
            cwd: self.input.cwd.clone(),
            session_id: non_empty(&self.input.session_id),
            description: non_empty(&task.description),
            prompt: non_empty(&task.prompt),
            vcs_branch: None,
            vcs_commit: None,
        }
        .with_vcs(&GitCli::new(&self.project.root))
        .await;

        let request = HandoffRequest {
            subagent_type: subagent_type.to_string(),
            token_budget: self.project.config.handoff.token_budget,
            context,
        };
        let producer = HandoffProducer::new(self.project.layout.handoff_root());
        match producer.prepare(transcript, request).await {
            Ok(prepared) => info!(
                "Handoff for {}: {} chunks in {:?}",
                subagent_type,
                prepared.chunk_count(),
                prepared.dir
            ),
            Err(e) => warn!("Handoff for {} not prepared: {}", subagent_type, e),
        }
    }

    async fn post_tool_use(&self) -> Option<HookOutput> {
        let call = self.input.tool_call();

        if matches!(call, Some(ToolCall::Task(_))) {
            self.clear_subagent_flag();
        }

        if let Some(recorder) = self.recorder {
            let correlation_id = fail_open("correlation_finish", || {
                recorder
                    .correlations()
                    .finish(self.tool_use_id(), self.explicit_correlation())
            })
            .await
            .unwrap_or_else(CorrelationTracker::mint);

            let success = tool_succeeded(self.input.tool_response.as_ref());
            let record = self
                .record_for(&correlation_id, AFTER_HOOK)
                .with_outcome(success, false)
                .with_payload(json!({ "tool_use_id": self.tool_use_id() }));
            recorder.record(&record).await;
        }

        let wrote_file = call.as_ref().is_some_and(ToolCall::is_file_write);
        if wrote_file
            && self.project.config.mode.implementation_reminder
            && self.mode_store().current_mode() == WorkflowMode::Implementation
        {
            return Some(HookOutput::with_context(
                HookEvent::PostToolUse,
                IMPLEMENTATION_REMINDER,
            ));
        }
        None
    }

    async fn user_prompt_submit(&self) -> Option<HookOutput> {
        let prompt = self.input.prompt.as_deref().unwrap_or_default();
        let store = self.mode_store();
        let mode = store.current_mode();
        let outcome = evaluate_prompt(prompt, mode, &self.project.config.mode);

        let Some((new_mode, trigger)) = outcome.transition() else {
            self.record_standalone(HookEvent::UserPromptSubmit, true, json!({ "mode": mode }))
                .await;
            return None;
        };

        let transition = store.set_mode(new_mode, trigger.clone());
        self.record_standalone(
            HookEvent::UserPromptSubmit,
            transition.success,
            json!({
                "old_mode": transition.old_mode,
                "new_mode": transition.effective_mode(),
                "trigger": trigger,
                "error": transition.error,
            }),
        )
        .await;

        let context = if transition.success {
            outcome.notice()
        } else {
            Some(format!(
                "Mode change to {} failed ({}); still in {} mode.",
                new_mode,
                transition.error.as_deref().unwrap_or("unknown error"),
                transition.old_mode
            ))
        };
        context.map(|text| HookOutput::with_context(HookEvent::UserPromptSubmit, text))
    }

    async fn subagent_stop(&self) -> Option<HookOutput> {
        let marker = self.subagent_flag().marker();
        self.clear_subagent_flag();
        self.record_standalone(
            HookEvent::SubagentStop,
            true,
            json!({ "subagent_type": marker.map(|m| m.subagent_type) }),
        )
        .await;
        None
    }
}

/// Whether the host reported the tool call as successful
fn tool_succeeded(response: Option<&Value>) -> bool {
    let Some(response) = response else {
        return true;
    };
    let flag = |key: &str| response.get(key).and_then(Value::as_bool);
    flag("success") != Some(false)
        && flag("is_error") != Some(true)
        && response.get("error").map_or(true, Value::is_null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_core::Permission;
    use duet_events::validator::validate_sinks;
    use duet_events::{EventFilter, EventLog, EventStore};
    use tempfile::{tempdir, TempDir};

    fn project() -> (Project, TempDir) {
        let dir = tempdir().unwrap();
        (Project::at(dir.path()), dir)
    }

    fn permission(output: &HookOutput) -> Option<Permission> {
        output
            .hook_specific_output
            .as_ref()
            .and_then(|s| s.permission_decision)
    }

    fn context(output: &HookOutput) -> String {
        output
            .hook_specific_output
            .as_ref()
            .and_then(|s| s.additional_context.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_discussion_denies_write() {
        let (project, _dir) = project();
        let payload = json!({
            "session_id": "s-1",
            "tool_name": "Write",
            "tool_use_id": "toolu_w",
            "tool_input": {"file_path": "src/main.rs", "content": "fn main() {}"}
        });

        let output = handle(HookEvent::PreToolUse, &payload.to_string(), &project)
            .await
            .unwrap();
        assert_eq!(permission(&output), Some(Permission::Deny));
        assert!(!output.continue_);
        assert!(output.stop_reason.is_some());

        let recorder = EventRecorder::open(&project.layout).await;
        let records = recorder.query(&EventFilter::session("s-1")).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].denied);
        assert!(!project.layout.correlations_dir().join("toolu_w.json").exists());
    }

    #[tokio::test]
    async fn test_malformed_payloads() {
        let (project, _dir) = project();

        let output = handle(HookEvent::PreToolUse, "{not json", &project)
            .await
            .unwrap();
        assert_eq!(permission(&output), Some(Permission::Deny));

        assert!(handle(HookEvent::PostToolUse, "{not json", &project)
            .await
            .is_none());
        assert!(handle(HookEvent::UserPromptSubmit, "[1, 2", &project)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_trigger_then_emergency_stop() {
        let (project, _dir) = project();
        let store = ModeStore::from_layout(&project.layout);

        let approve = json!({"session_id": "s-2", "prompt": "Looks good, make it so"});
        let output = handle(HookEvent::UserPromptSubmit, &approve.to_string(), &project)
            .await
            .unwrap();
        assert!(context(&output).contains("IMPLEMENTATION"));
        assert_eq!(store.current_mode(), WorkflowMode::Implementation);

        let stop = json!({"session_id": "s-2", "prompt": "STOP, that is the wrong file"});
        let output = handle(HookEvent::UserPromptSubmit, &stop.to_string(), &project)
            .await
            .unwrap();
        assert!(context(&output).contains("EMERGENCY STOP"));
        assert_eq!(store.current_mode(), WorkflowMode::Discussion);
    }

    #[tokio::test]
    async fn test_plain_prompt_changes_nothing() {
        let (project, _dir) = project();
        let prompt = json!({"session_id": "s-3", "prompt": "what does this function do?"});
        assert!(handle(HookEvent::UserPromptSubmit, &prompt.to_string(), &project)
            .await
            .is_none());
        assert_eq!(
            ModeStore::from_layout(&project.layout).current_mode(),
            WorkflowMode::Discussion
        );
    }

    #[tokio::test]
    async fn test_allowed_pair_validates_and_reminds() {
        let (project, _dir) = project();
        ModeStore::from_layout(&project.layout)
            .set_mode(WorkflowMode::Implementation, duet_core::ModeTrigger::Manual);

        let before = json!({
            "session_id": "s-4",
            "tool_name": "Edit",
            "tool_use_id": "toolu_e",
            "tool_input": {"file_path": "src/lib.rs", "old_string": "a", "new_string": "b"}
        });
        let output = handle(HookEvent::PreToolUse, &before.to_string(), &project)
            .await
            .unwrap();
        assert_eq!(permission(&output), Some(Permission::Allow));

        let after = json!({
            "session_id": "s-4",
            "tool_name": "Edit",
            "tool_use_id": "toolu_e",
            "tool_input": {"file_path": "src/lib.rs", "old_string": "a", "new_string": "b"},
            "tool_response": {"success": true}
        });
        let output = handle(HookEvent::PostToolUse, &after.to_string(), &project)
            .await
            .unwrap();
        assert!(context(&output).contains("duet mode set discussion"));

        let store = EventStore::open(project.layout.events_db()).await.unwrap();
        let log = EventLog::new(project.layout.log_dir());
        let report = validate_sinks(&store, &log, Some("s-4")).await.unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.store_records, 2);
    }

    #[tokio::test]
    async fn test_task_delegation_prepares_handoff() {
        let (project, dir) = project();
        let transcript = dir.path().join("transcript.jsonl");
        std::fs::write(
            &transcript,
            concat!(
                r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Edit","input":{"file_path":"a.rs"}}]}}"#,
                "\n",
                r#"{"type":"assistant","message":{"role":"assistant","content":"edited"}}"#,
                "\n"
            ),
        )
        .unwrap();

        let task = json!({
            "session_id": "s-5",
            "tool_name": "Task",
            "tool_use_id": "toolu_t",
            "transcript_path": transcript,
            "tool_input": {"subagent_type": "test-writer", "description": "tests", "prompt": "write tests"}
        });
        let output = handle(HookEvent::PreToolUse, &task.to_string(), &project)
            .await
            .unwrap();
        assert_eq!(permission(&output), Some(Permission::Allow));

        let flag = SubagentFlag::from_layout(&project.layout);
        assert_eq!(flag.marker().unwrap().subagent_type, "test-writer");
        let handoff = project.layout.handoff_root().join("test-writer");
        assert!(handoff.join("manifest.json").exists());
        assert!(handoff.join("chunk_001.json").exists());

        let stop = json!({"session_id": "s-5"});
        handle(HookEvent::SubagentStop, &stop.to_string(), &project).await;
        assert!(!flag.is_set());
    }

    #[tokio::test]
    async fn test_session_start_resets_state() {
        let (project, _dir) = project();
        ModeStore::from_layout(&project.layout)
            .set_mode(WorkflowMode::Implementation, duet_core::ModeTrigger::Manual);
        SubagentFlag::from_layout(&project.layout)
            .set("stale")
            .unwrap();

        let output = handle(HookEvent::SessionStart, r#"{"session_id": "s-6"}"#, &project)
            .await
            .unwrap();
        assert!(context(&output).contains("DISCUSSION"));
        assert_eq!(
            ModeStore::from_layout(&project.layout).current_mode(),
            WorkflowMode::Discussion
        );
        assert!(!SubagentFlag::from_layout(&project.layout).is_set());
    }

    #[test]
    fn test_tool_succeeded() {
        assert!(tool_succeeded(None));
        assert!(tool_succeeded(Some(&json!({"success": true}))));
        assert!(tool_succeeded(Some(&json!({"error": null}))));
        assert!(!tool_succeeded(Some(&json!({"success": false}))));
        assert!(!tool_succeeded(Some(&json!({"is_error": true}))));
        assert!(!tool_succeeded(Some(&json!({"error": "boom"}))));
    }
}

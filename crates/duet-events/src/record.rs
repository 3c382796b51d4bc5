//! Event record and query filter

use chrono::{DateTime, Utc};
use duet_core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Version of the record layout written to both sinks
pub const SCHEMA_VERSION: u32 = 1;

/// Handler name of the "before" side of a tool call
pub const BEFORE_HOOK: &str = "pre_tool_use";

/// Handler name of the "after" side of a tool call
pub const AFTER_HOOK: &str = "post_tool_use";

/// One handler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub session_id: String,
    pub correlation_id: String,
    pub hook_name: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Microseconds since the epoch, non-decreasing per session
    pub logical_ts: i64,
    #[serde(with = "duet_core::time::canonical")]
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Set on a before-record whose tool call was refused
    #[serde(default)]
    pub denied: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub payload: Value,
    pub schema_version: u32,
}

impl EventRecord {
    /// New successful record stamped with the current time
    pub fn new(
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
        hook_name: impl Into<String>,
    ) -> Self {
        let timestamp = time::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
            hook_name: hook_name.into(),
            tool_name: None,
            logical_ts: time::to_micros(&timestamp),
            timestamp,
            success: true,
            denied: false,
            duration_ms: 0,
            payload: Value::Null,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_outcome(mut self, success: bool, denied: bool) -> Self {
        self.success = success;
        self.denied = denied;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Move the logical timestamp forward to at least `floor`
    pub(crate) fn clamped_to(&self, floor: Option<i64>) -> Self {
        let mut record = self.clone();
        if let Some(floor) = floor {
            if record.logical_ts < floor {
                record.logical_ts = floor;
                if let Some(ts) = time::from_micros(floor) {
                    record.timestamp = ts;
                }
            }
        }
        record
    }

    pub fn is_before(&self) -> bool {
        self.hook_name == BEFORE_HOOK
    }

    pub fn is_after(&self) -> bool {
        self.hook_name == AFTER_HOOK
    }
}

/// Selection criteria for [`EventRecorder::query`](crate::EventRecorder::query)
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub hook_name: Option<String>,
    pub tool_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of results (0 = no limit)
    pub limit: usize,
}

impl EventFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// In-memory equivalent of the store's WHERE clause (limit not applied)
    pub fn matches(&self, record: &EventRecord) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }

        eq(&self.session_id, &record.session_id)
            && eq(&self.correlation_id, &record.correlation_id)
            && eq(&self.hook_name, &record.hook_name)
            && self
                .tool_name
                .as_deref()
                .map_or(true, |t| record.tool_name.as_deref() == Some(t))
            && self
                .since
                .map_or(true, |s| record.logical_ts >= time::to_micros(&s))
            && self
                .until
                .map_or(true, |u| record.logical_ts <= time::to_micros(&u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_record_defaults() {
        let record = EventRecord::new("s-1", "c-1", BEFORE_HOOK).with_tool("Write");
        assert!(record.is_before());
        assert!(record.success);
        assert!(!record.denied);
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.logical_ts, time::to_micros(&record.timestamp));
    }

    #[test]
    fn test_clamp_only_moves_forward() {
        let record = EventRecord::new("s-1", "c-1", AFTER_HOOK);
        let later = record.logical_ts + 10;

        let clamped = record.clamped_to(Some(later));
        assert_eq!(clamped.logical_ts, later);
        assert_eq!(time::to_micros(&clamped.timestamp), later);

        let untouched = record.clamped_to(Some(record.logical_ts - 10));
        assert_eq!(untouched.logical_ts, record.logical_ts);
        assert_eq!(record.clamped_to(None), record);
    }

    #[test]
    fn test_filter_matches() {
        let record = EventRecord::new("s-1", "c-1", BEFORE_HOOK).with_tool("Bash");

        assert!(EventFilter::default().matches(&record));
        assert!(EventFilter::session("s-1").matches(&record));
        assert!(!EventFilter::session("s-2").matches(&record));

        let by_tool = EventFilter {
            tool_name: Some("Write".to_string()),
            ..EventFilter::default()
        };
        assert!(!by_tool.matches(&record));

        let window = EventFilter {
            since: Some(record.timestamp - Duration::seconds(1)),
            until: Some(record.timestamp + Duration::seconds(1)),
            ..EventFilter::default()
        };
        assert!(window.matches(&record));

        let future = EventFilter {
            since: Some(record.timestamp + Duration::seconds(1)),
            ..EventFilter::default()
        };
        assert!(!future.matches(&record));
    }

    #[test]
    fn test_log_line_shape() {
        let record = EventRecord::new("s-1", "c-1", "session_start");
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "session_id",
            "correlation_id",
            "hook_name",
            "timestamp",
            "schema_version",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }
}

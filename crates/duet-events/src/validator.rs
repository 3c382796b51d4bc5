//! Offline consistency checks over both sinks
//!
//! [`validate`] is a pure function over the records read from each sink. It
//! never mutates anything and reports every problem it finds rather than
//! stopping at the first.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::Result;
use crate::log::EventLog;
use crate::record::{EventFilter, EventRecord};
use crate::store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A non-denied before-record with no after-record
    OrphanedBefore,
    /// An after-record with no before-record
    OrphanedAfter,
    /// One correlation id used for two different tools
    CorrelationSpansTools,
    /// The sinks hold different numbers of records for a session
    CountMismatch,
    /// Present in the store, absent from the log
    MissingInLog,
    /// Present in the log, absent from the store
    MissingInStore,
    /// Same record, different values in the two sinks
    FieldMismatch,
    /// Logical timestamps go backwards within a session
    TimestampRegression,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OrphanedBefore => "orphaned_before",
            Self::OrphanedAfter => "orphaned_after",
            Self::CorrelationSpansTools => "correlation_spans_tools",
            Self::CountMismatch => "count_mismatch",
            Self::MissingInLog => "missing_in_log",
            Self::MissingInStore => "missing_in_store",
            Self::FieldMismatch => "field_mismatch",
            Self::TimestampRegression => "timestamp_regression",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub correlation_ids: Vec<String>,
    pub detail: String,
}

impl Violation {
    fn new(kind: ViolationKind, correlation_ids: Vec<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            correlation_ids,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.detail)?;
        if !self.correlation_ids.is_empty() {
            write!(f, " ({})", self.correlation_ids.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub store_records: usize,
    pub log_records: usize,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

/// Check both sinks, optionally limited to one session
pub async fn validate_sinks(
    store: &EventStore,
    log: &EventLog,
    session_id: Option<&str>,
) -> Result<ValidationReport> {
    let filter = EventFilter {
        session_id: session_id.map(str::to_string),
        ..EventFilter::default()
    };
    let store_records = store.query(&filter).await?;
    let log_records = log.query(&filter).await?;
    Ok(validate(&store_records, &log_records))
}

/// Check records read from the store and the log, each in storage order
pub fn validate(store: &[EventRecord], log: &[EventRecord]) -> ValidationReport {
    let mut violations = Vec::new();

    check_pairing(store, log, &mut violations);
    check_sink_agreement(store, log, &mut violations);
    check_ordering("store", store, &mut violations);
    check_ordering("log", log, &mut violations);

    ValidationReport {
        store_records: store.len(),
        log_records: log.len(),
        violations,
    }
}

/// Before/after pairing and tool consistency, over the union of both sinks
fn check_pairing(store: &[EventRecord], log: &[EventRecord], out: &mut Vec<Violation>) {
    let mut seen = BTreeSet::new();
    let mut groups: BTreeMap<&str, Vec<&EventRecord>> = BTreeMap::new();
    for record in store.iter().chain(log.iter()) {
        if seen.insert(record.id.as_str()) {
            groups
                .entry(record.correlation_id.as_str())
                .or_default()
                .push(record);
        }
    }

    for (correlation_id, records) in groups {
        let befores: Vec<_> = records.iter().filter(|r| r.is_before()).collect();
        let afters: Vec<_> = records.iter().filter(|r| r.is_after()).collect();

        if !befores.is_empty() && afters.is_empty() && !befores.iter().any(|r| r.denied) {
            out.push(Violation::new(
                ViolationKind::OrphanedBefore,
                vec![correlation_id.to_string()],
                format!(
                    "before-record for {} has no matching after-record",
                    befores[0].tool_name.as_deref().unwrap_or("unknown tool")
                ),
            ));
        }

        if !afters.is_empty() && befores.is_empty() {
            out.push(Violation::new(
                ViolationKind::OrphanedAfter,
                vec![correlation_id.to_string()],
                format!(
                    "after-record for {} has no matching before-record",
                    afters[0].tool_name.as_deref().unwrap_or("unknown tool")
                ),
            ));
        }

        let tools: BTreeSet<&str> = records
            .iter()
            .filter_map(|r| r.tool_name.as_deref())
            .collect();
        if tools.len() > 1 {
            out.push(Violation::new(
                ViolationKind::CorrelationSpansTools,
                vec![correlation_id.to_string()],
                format!(
                    "correlation id used for {}",
                    tools.into_iter().collect::<Vec<_>>().join(" and ")
                ),
            ));
        }
    }
}

fn by_session(records: &[EventRecord]) -> BTreeMap<&str, Vec<&EventRecord>> {
    let mut sessions: BTreeMap<&str, Vec<&EventRecord>> = BTreeMap::new();
    for record in records {
        sessions
            .entry(record.session_id.as_str())
            .or_default()
            .push(record);
    }
    sessions
}

/// Per session: same count, same membership, same values
fn check_sink_agreement(store: &[EventRecord], log: &[EventRecord], out: &mut Vec<Violation>) {
    let store_sessions = by_session(store);
    let log_sessions = by_session(log);
    let sessions: BTreeSet<&str> = store_sessions
        .keys()
        .chain(log_sessions.keys())
        .copied()
        .collect();

    for session in sessions {
        let in_store = store_sessions.get(session).cloned().unwrap_or_default();
        let in_log = log_sessions.get(session).cloned().unwrap_or_default();

        if in_store.len() != in_log.len() {
            out.push(Violation::new(
                ViolationKind::CountMismatch,
                Vec::new(),
                format!(
                    "session {}: store has {} records, log has {}",
                    session,
                    in_store.len(),
                    in_log.len()
                ),
            ));
        }

        let store_by_id: HashMap<&str, &EventRecord> =
            in_store.iter().map(|r| (r.id.as_str(), *r)).collect();
        let log_by_id: HashMap<&str, &EventRecord> =
            in_log.iter().map(|r| (r.id.as_str(), *r)).collect();

        let missing_in_log = correlation_ids_missing(&in_store, &log_by_id);
        if !missing_in_log.is_empty() {
            out.push(Violation::new(
                ViolationKind::MissingInLog,
                missing_in_log,
                format!("session {}: records in store but not in log", session),
            ));
        }

        let missing_in_store = correlation_ids_missing(&in_log, &store_by_id);
        if !missing_in_store.is_empty() {
            out.push(Violation::new(
                ViolationKind::MissingInStore,
                missing_in_store,
                format!("session {}: records in log but not in store", session),
            ));
        }

        for record in &in_store {
            if let Some(other) = log_by_id.get(record.id.as_str()) {
                let fields = differing_fields(record, other);
                if !fields.is_empty() {
                    out.push(Violation::new(
                        ViolationKind::FieldMismatch,
                        vec![record.correlation_id.clone()],
                        format!("record {} differs in {}", record.id, fields.join(", ")),
                    ));
                }
            }
        }
    }
}

fn correlation_ids_missing(
    records: &[&EventRecord],
    other: &HashMap<&str, &EventRecord>,
) -> Vec<String> {
    let mut ids: Vec<String> = records
        .iter()
        .filter(|r| !other.contains_key(r.id.as_str()))
        .map(|r| r.correlation_id.clone())
        .collect();
    ids.dedup();
    ids
}

fn differing_fields(a: &EventRecord, b: &EventRecord) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if a.session_id != b.session_id {
        fields.push("session_id");
    }
    if a.correlation_id != b.correlation_id {
        fields.push("correlation_id");
    }
    if a.hook_name != b.hook_name {
        fields.push("hook_name");
    }
    if a.tool_name != b.tool_name {
        fields.push("tool_name");
    }
    if a.logical_ts != b.logical_ts {
        fields.push("logical_ts");
    }
    if a.success != b.success {
        fields.push("success");
    }
    if a.denied != b.denied {
        fields.push("denied");
    }
    if a.duration_ms != b.duration_ms {
        fields.push("duration_ms");
    }
    if a.payload != b.payload {
        fields.push("payload");
    }
    if a.schema_version != b.schema_version {
        fields.push("schema_version");
    }
    fields
}

fn check_ordering(sink: &str, records: &[EventRecord], out: &mut Vec<Violation>) {
    let mut latest: HashMap<&str, &EventRecord> = HashMap::new();

    for record in records {
        if let Some(previous) = latest.get(record.session_id.as_str()) {
            if record.logical_ts < previous.logical_ts {
                out.push(Violation::new(
                    ViolationKind::TimestampRegression,
                    vec![
                        previous.correlation_id.clone(),
                        record.correlation_id.clone(),
                    ],
                    format!(
                        "{}: session {} goes back from {} to {}",
                        sink, record.session_id, previous.logical_ts, record.logical_ts
                    ),
                ));
            }
        }
        latest.insert(record.session_id.as_str(), record);
    }
}

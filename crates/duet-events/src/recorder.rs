//! Dual-sink event recorder
//!
//! Recording is infrastructure: it must never take a handler down. Every
//! failure is logged at warn and reported only through the `bool` returned
//! by [`EventRecorder::record`].

use duet_core::fail_open::{fail_open, fail_open_with_retries};
use duet_core::StateLayout;
use tracing::{debug, warn};

use crate::correlation::CorrelationTracker;
use crate::log::EventLog;
use crate::record::{EventFilter, EventRecord};
use crate::store::EventStore;

/// Attempts at a store write before giving up (the database may be locked)
const STORE_RETRIES: usize = 3;

pub struct EventRecorder {
    store: Option<EventStore>,
    log: EventLog,
    correlations: CorrelationTracker,
}

impl EventRecorder {
    /// Open both sinks under the state directory
    ///
    /// A store that cannot be opened is logged and left out; records then
    /// reach the log only, and [`record`](Self::record) reports failure.
    pub async fn open(layout: &StateLayout) -> Self {
        let db_path = layout.events_db();
        let store = fail_open("event_store_open", || EventStore::open(&db_path)).await;

        Self {
            store,
            log: EventLog::new(layout.log_dir()),
            correlations: CorrelationTracker::new(layout.correlations_dir()),
        }
    }

    pub fn correlations(&self) -> &CorrelationTracker {
        &self.correlations
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn store(&self) -> Option<&EventStore> {
        self.store.as_ref()
    }

    /// Write `record` to the table, then the log
    ///
    /// The logical timestamp is raised to the session's latest recorded
    /// value first, so both sinks see the same non-decreasing sequence.
    /// Returns `true` only when both writes succeeded.
    pub async fn record(&self, record: &EventRecord) -> bool {
        let floor = self.latest_logical_ts(&record.session_id).await;
        let record = record.clamped_to(floor);

        let stored = match &self.store {
            Some(store) => {
                fail_open_with_retries("event_store_insert", || store.insert(&record), STORE_RETRIES)
                    .await
                    .is_some()
            }
            None => {
                warn!("Event store unavailable; {} not stored", record.id);
                false
            }
        };

        let logged = fail_open("event_log_append", || self.log.append(&record))
            .await
            .is_some();

        debug!(
            "Recorded {} ({}) stored={} logged={}",
            record.hook_name, record.correlation_id, stored, logged
        );
        stored && logged
    }

    /// Records matching `filter`, in insertion order
    ///
    /// Served from the store; falls back to scanning the log when the store
    /// is unavailable.
    pub async fn query(&self, filter: &EventFilter) -> Vec<EventRecord> {
        if let Some(store) = &self.store {
            if let Some(records) = fail_open("event_store_query", || store.query(filter)).await {
                return records;
            }
        }

        fail_open("event_log_query", || self.log.query(filter))
            .await
            .unwrap_or_default()
    }

    async fn latest_logical_ts(&self, session_id: &str) -> Option<i64> {
        if let Some(store) = &self.store {
            if let Some(latest) =
                fail_open("event_store_latest", || store.latest_logical_ts(session_id)).await
            {
                return latest;
            }
        }

        fail_open("event_log_latest", || self.log.latest_logical_ts(session_id))
            .await
            .flatten()
    }
}

//! Query sink: the `hook_events` table
//!
//! Architecture:
//!   - Database file: `<state>/events.db`
//!   - WAL mode so a reader (`duet events query`) never blocks a handler
//!   - Insertion order is the `seq` rowid alias; queries return rows in it

use duet_core::time;
use std::path::Path;
use turso::{params, Builder, Connection};

use crate::error::{Result, StoreError};
use crate::record::{EventFilter, EventRecord};

const SELECT_COLUMNS: &str = "SELECT id, session_id, correlation_id, hook_name, tool_name, \
     logical_ts, created_at, success, denied, duration_ms, payload, schema_version \
     FROM hook_events";

/// Connection to the event database
pub struct EventStore {
    conn: Connection,
    path: String,
}

impl EventStore {
    /// Open (creating if needed) the database at `path` and ensure the schema
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // PRAGMA statements may return rows, so use query()
        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;

        let store = EventStore {
            conn,
            path: path_str,
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create the table and indexes; idempotent
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS hook_events (
                seq INTEGER PRIMARY KEY,
                id TEXT NOT NULL,
                hook_name TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                tool_name TEXT,
                success INTEGER NOT NULL,
                denied INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                payload TEXT,
                logical_ts INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                schema_version INTEGER NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_hook_events_id ON hook_events(id)",
            "CREATE INDEX IF NOT EXISTS idx_hook_events_session ON hook_events(session_id, logical_ts)",
            "CREATE INDEX IF NOT EXISTS idx_hook_events_correlation ON hook_events(correlation_id)",
        ];

        for stmt in statements {
            self.conn.execute(stmt, params![]).await?;
        }

        Ok(())
    }

    pub async fn insert(&self, record: &EventRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;

        let query = r#"
            INSERT INTO hook_events (
                id, hook_name, correlation_id, session_id, tool_name,
                success, denied, duration_ms, payload, logical_ts,
                created_at, schema_version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        self.conn
            .execute(
                query,
                params![
                    record.id.clone(),
                    record.hook_name.clone(),
                    record.correlation_id.clone(),
                    record.session_id.clone(),
                    record.tool_name.clone(),
                    record.success as i64,
                    record.denied as i64,
                    record.duration_ms as i64,
                    payload,
                    record.logical_ts,
                    time::format(&record.timestamp),
                    record.schema_version as i64,
                ],
            )
            .await?;

        Ok(())
    }

    /// Latest logical timestamp recorded for a session
    pub async fn latest_logical_ts(&self, session_id: &str) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(logical_ts) FROM hook_events WHERE session_id = ?",
                params![session_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let latest: Option<i64> = row.get(0)?;
                Ok(latest)
            }
            None => Ok(None),
        }
    }

    /// Records matching `filter`, in insertion order
    pub async fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let mut conditions = Vec::new();
        let mut params_vec: Vec<turso::Value> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            conditions.push("session_id = ?");
            params_vec.push(session_id.clone().into());
        }

        if let Some(correlation_id) = &filter.correlation_id {
            conditions.push("correlation_id = ?");
            params_vec.push(correlation_id.clone().into());
        }

        if let Some(hook_name) = &filter.hook_name {
            conditions.push("hook_name = ?");
            params_vec.push(hook_name.clone().into());
        }

        if let Some(tool_name) = &filter.tool_name {
            conditions.push("tool_name = ?");
            params_vec.push(tool_name.clone().into());
        }

        if let Some(since) = &filter.since {
            conditions.push("logical_ts >= ?");
            params_vec.push(time::to_micros(since).into());
        }

        if let Some(until) = &filter.until {
            conditions.push("logical_ts <= ?");
            params_vec.push(time::to_micros(until).into());
        }

        let mut query = String::from(SELECT_COLUMNS);
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY seq ASC");

        if filter.limit > 0 {
            query.push_str(" LIMIT ?");
            params_vec.push((filter.limit as i64).into());
        }

        let mut rows = self.conn.query(&query, params_vec).await?;
        let mut records = Vec::new();

        while let Some(row) = rows.next().await? {
            records.push(parse_event_row(&row)?);
        }

        Ok(records)
    }

    pub async fn count(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM hook_events", params![])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }
}

fn parse_event_row(row: &turso::Row) -> Result<EventRecord> {
    let created_at: String = row.get(6)?;
    let payload: Option<String> = row.get(10)?;
    let success: i64 = row.get(7)?;
    let denied: i64 = row.get(8)?;
    let duration_ms: i64 = row.get(9)?;
    let schema_version: i64 = row.get(11)?;

    Ok(EventRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        correlation_id: row.get(2)?,
        hook_name: row.get(3)?,
        tool_name: row.get(4)?,
        logical_ts: row.get(5)?,
        timestamp: time::parse(&created_at)
            .ok_or_else(|| StoreError::CorruptRow(format!("bad created_at: {}", created_at)))?,
        success: success != 0,
        denied: denied != 0,
        duration_ms: duration_ms.max(0) as u64,
        payload: match payload {
            Some(p) if !p.is_empty() => serde_json::from_str(&p)?,
            _ => serde_json::Value::Null,
        },
        schema_version: schema_version.max(0) as u32,
    })
}

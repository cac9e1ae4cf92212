use super::SqliteStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEventRow {
    pub event_id: String,
    pub event_type: String,
    pub severity: String,
    pub address: Option<String>,
    pub ts: String,
    pub details_json: Option<String>,
}

impl SqliteStore {
    pub fn record_heartbeat(&self, component: &str, status: &str) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO system_heartbeat(component, ts, status) VALUES (?1, datetime('now'), ?2)",
                params![component, status],
            )
        })
        .context("failed to record heartbeat")?;
        Ok(())
    }

    pub fn insert_pipeline_event(
        &self,
        event_type: &str,
        severity: &str,
        address: Option<&str>,
        ts: DateTime<Utc>,
        details_json: Option<&str>,
    ) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO pipeline_events(event_id, type, severity, address, ts, details_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    event_type,
                    severity,
                    address,
                    ts.to_rfc3339(),
                    details_json,
                ],
            )
        })
        .context("failed to insert pipeline event")?;
        Ok(())
    }

    pub fn pipeline_event_count_by_type(&self, event_type: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM pipeline_events WHERE type = ?1",
                params![event_type],
                |row| row.get(0),
            )
            .context("failed to count pipeline events by type")?;
        Ok(count.max(0) as u64)
    }

    pub fn recent_pipeline_events(&self, limit: u32) -> Result<Vec<PipelineEventRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT event_id, type, severity, address, ts, details_json
                 FROM pipeline_events
                 ORDER BY ts DESC, rowid DESC
                 LIMIT ?1",
            )
            .context("failed to prepare recent pipeline events query")?;
        let rows = stmt
            .query_map(params![i64::from(limit)], |row| {
                Ok(PipelineEventRow {
                    event_id: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    address: row.get(3)?,
                    ts: row.get(4)?,
                    details_json: row.get(5)?,
                })
            })
            .context("failed to query recent pipeline events")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read recent pipeline events")
    }
}

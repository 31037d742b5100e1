//! Durable orchestration history.
//!
//! Every instance owns an append-only list of [`HistoryEvent`]s keyed by
//! sequence number, plus a status row used for scheduling and operator
//! queries. The orchestration runtime replays the event list on every pass.

use std::sync::MutexGuard;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    runtime::history::{HistoryEvent, InstanceRecord, InstanceStatus},
    storage::db::Db,
};

/// Persistence backend for instance status and event histories.
pub trait HistoryStore: Send + Sync {
    fn create_instance(&self, record: &InstanceRecord) -> Result<()>;
    fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>>;
    fn list_instances(&self) -> Result<Vec<InstanceRecord>>;
    fn update_status(&self, instance_id: &str, status: &InstanceStatus) -> Result<()>;

    /// Appends `event` at `sequence`, which must equal the current history length.
    fn append_event(&self, instance_id: &str, sequence: usize, event: &HistoryEvent)
    -> Result<()>;
    fn load_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>>;

    /// Removes the instance and its history.
    fn purge(&self, instance_id: &str) -> Result<()>;
}

/// SQLite-backed history store sharing the orchestration [`Db`].
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Db,
}

impl SqliteHistoryStore {
    pub fn initialize(db: Db) -> Result<Self> {
        Ok(Self { db })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock_conn()
            .map_err(|err| anyhow!("history db mutex poisoned: {err}"))
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<InstanceRecord> {
        let dns_names_json: String = row.get(2)?;
        let dns_names: Vec<String> = serde_json::from_str(&dns_names_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
        })?;
        let status_str: String = row.get(3)?;
        let resume_at: Option<String> = row.get(4)?;
        let failure_reason: Option<String> = row.get(5)?;
        let status = match status_str.as_str() {
            "pending" => InstanceStatus::Pending,
            "running" => InstanceStatus::Running,
            "suspended" => {
                let raw = resume_at.ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(
                        4,
                        "resume_at".to_string(),
                        rusqlite::types::Type::Null,
                    )
                })?;
                InstanceStatus::Suspended {
                    resume_at: parse_timestamp(&raw, 4)?,
                }
            }
            "completed" => InstanceStatus::Completed,
            "failed" => InstanceStatus::Failed {
                reason: failure_reason.unwrap_or_default(),
            },
            other => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("unknown instance status {other}"),
                    )),
                ));
            }
        };
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;
        Ok(InstanceRecord {
            instance_id: row.get(0)?,
            certificate_name: row.get(1)?,
            dns_names,
            status,
            created_at: parse_timestamp(&created_at, 6)?,
            updated_at: parse_timestamp(&updated_at, 7)?,
        })
    }
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn event_type(event: &HistoryEvent) -> Result<String> {
    let value = serde_json::to_value(event).context("failed to serialize history event")?;
    value
        .get("type")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| anyhow!("history event is missing its type tag"))
}

impl HistoryStore for SqliteHistoryStore {
    fn create_instance(&self, record: &InstanceRecord) -> Result<()> {
        let conn = self.lock_conn()?;
        let dns_names = serde_json::to_string(&record.dns_names)?;
        conn.execute(
            r#"
            INSERT INTO orchestration_instances (
                instance_id, certificate_name, dns_names, status, resume_at, failure_reason,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.instance_id,
                record.certificate_name,
                dns_names,
                record.status.as_str(),
                record.status.resume_at().map(|t| t.to_rfc3339()),
                record.status.failure_reason(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("failed to insert instance {}", record.instance_id))?;
        Ok(())
    }

    fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT instance_id, certificate_name, dns_names, status, resume_at, failure_reason,
                   created_at, updated_at
            FROM orchestration_instances
            WHERE instance_id = ?1
            "#,
        )?;
        let record = stmt
            .query_row(params![instance_id], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT instance_id, certificate_name, dns_names, status, resume_at, failure_reason,
                   created_at, updated_at
            FROM orchestration_instances
            ORDER BY created_at ASC, instance_id ASC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    fn update_status(&self, instance_id: &str, status: &InstanceStatus) -> Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE orchestration_instances
            SET status = ?2, resume_at = ?3, failure_reason = ?4, updated_at = ?5
            WHERE instance_id = ?1
            "#,
            params![
                instance_id,
                status.as_str(),
                status.resume_at().map(|t| t.to_rfc3339()),
                status.failure_reason(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("instance not found: {instance_id}"));
        }
        Ok(())
    }

    fn append_event(
        &self,
        instance_id: &str,
        sequence: usize,
        event: &HistoryEvent,
    ) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .context("failed to start history transaction")?;

        let next: i64 = tx.query_row(
            "SELECT COUNT(*) FROM history_events WHERE instance_id = ?1",
            params![instance_id],
            |row| row.get(0),
        )?;
        if next as usize != sequence {
            return Err(anyhow!(
                "history for {instance_id} has {next} events; refusing to write sequence {sequence}"
            ));
        }

        let event_json = serde_json::to_string(event).context("failed to serialize history event")?;
        tx.execute(
            r#"
            INSERT INTO history_events (instance_id, sequence, event_type, event_json, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                instance_id,
                sequence as i64,
                event_type(event)?,
                event_json,
                event.timestamp().to_rfc3339(),
            ],
        )
        .with_context(|| format!("failed to append event {sequence} for {instance_id}"))?;
        tx.commit()?;
        Ok(())
    }

    fn load_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT sequence, event_json
            FROM history_events
            WHERE instance_id = ?1
            ORDER BY sequence ASC
            "#,
        )?;
        let mut rows = stmt.query(params![instance_id])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let sequence: i64 = row.get(0)?;
            let raw: String = row.get(1)?;
            let event: HistoryEvent = serde_json::from_str(&raw).with_context(|| {
                format!("corrupt history event {sequence} for {instance_id}")
            })?;
            events.push(event);
        }
        Ok(events)
    }

    fn purge(&self, instance_id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM history_events WHERE instance_id = ?1",
            params![instance_id],
        )?;
        conn.execute(
            "DELETE FROM orchestration_instances WHERE instance_id = ?1",
            params![instance_id],
        )?;
        Ok(())
    }
}

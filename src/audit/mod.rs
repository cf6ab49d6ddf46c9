//! Append-only audit log: every heartbeat received and every alert sent.
//!
//! Heartbeat rows are appended inside the ingestion transaction (see
//! `Storage::apply_heartbeat`); this module appends alert rows and serves the
//! read side for diagnosis. The core never updates or deletes audit rows —
//! retention/rotation is an external concern.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::MonitorError;
use crate::registry::model::{AlertEventRow, HeartbeatEventRow};

pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one delivered alert.
    pub async fn record_alert(
        &self,
        agent_name: &str,
        kind: &str,
        occurrence: i64,
        title: &str,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        sqlx::query(
            "INSERT INTO alert_log (id, agent_name, kind, occurrence, title, body, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(agent_name)
        .bind(kind)
        .bind(occurrence)
        .bind(title)
        .bind(body)
        .bind(sent_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest-first heartbeat audit rows, optionally scoped to one agent.
    pub async fn recent_heartbeats(
        &self,
        agent_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HeartbeatEventRow>, MonitorError> {
        if let Some(name) = agent_name {
            Ok(sqlx::query_as(
                "SELECT * FROM heartbeat_log WHERE agent_name = ?
                 ORDER BY received_at DESC LIMIT ?",
            )
            .bind(name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        } else {
            Ok(
                sqlx::query_as("SELECT * FROM heartbeat_log ORDER BY received_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?,
            )
        }
    }

    /// Newest-first delivered alerts.
    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<AlertEventRow>, MonitorError> {
        Ok(
            sqlx::query_as("SELECT * FROM alert_log ORDER BY sent_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

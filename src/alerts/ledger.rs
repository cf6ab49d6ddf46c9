//! SQLite persistence for the alert dedup ledger.
//!
//! One row per (agent, kind), overwritten in place. Episode *closing* lives
//! in the heartbeat transaction (`Storage::apply_heartbeat`); everything else
//! about the ledger is here.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::MonitorError;
use crate::registry::model::{AlertKind, AlertRecordRow};

pub async fn get_record(
    pool: &SqlitePool,
    agent_name: &str,
    kind: AlertKind,
) -> Result<Option<AlertRecordRow>, MonitorError> {
    Ok(
        sqlx::query_as("SELECT * FROM alert_records WHERE agent_name = ? AND kind = ?")
            .bind(agent_name)
            .bind(kind.as_str())
            .fetch_optional(pool)
            .await?,
    )
}

/// Open a fresh episode for (agent, kind) and return its occurrence number.
///
/// First episode ever starts at 1; reopening after a close continues the
/// monotonic count. `last_sent_at` resets to NULL so the first successful
/// send within the episode stamps it.
pub async fn open_episode(
    pool: &SqlitePool,
    agent_name: &str,
    kind: AlertKind,
) -> Result<i64, MonitorError> {
    sqlx::query(
        "INSERT INTO alert_records (agent_name, kind, occurrence, open, last_sent_at)
         VALUES (?, ?, 1, 1, NULL)
         ON CONFLICT(agent_name, kind) DO UPDATE SET
           occurrence = alert_records.occurrence + 1,
           open = 1,
           last_sent_at = NULL",
    )
    .bind(agent_name)
    .bind(kind.as_str())
    .execute(pool)
    .await?;

    let row: (i64,) =
        sqlx::query_as("SELECT occurrence FROM alert_records WHERE agent_name = ? AND kind = ?")
            .bind(agent_name)
            .bind(kind.as_str())
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Stamp a successful send. Never called on notifier failure — the NULL (or
/// stale) `last_sent_at` is what makes the next evaluation retry.
pub async fn mark_sent(
    pool: &SqlitePool,
    agent_name: &str,
    kind: AlertKind,
    sent_at: DateTime<Utc>,
) -> Result<(), MonitorError> {
    sqlx::query("UPDATE alert_records SET last_sent_at = ? WHERE agent_name = ? AND kind = ?")
        .bind(sent_at.to_rfc3339())
        .bind(agent_name)
        .bind(kind.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

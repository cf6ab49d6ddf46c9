//! SQLite persistence for the agent registry and audit tables.
//!
//! The `agents` table is the single source of truth for liveness state; the
//! watchdog recomputes everything from it on every tick, so a process restart
//! loses nothing. All per-agent mutations run inside a transaction so an
//! interrupted write commits or rolls back as a unit.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, SqlitePool,
};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::registry::model::{AgentRow, AgentStatus, ReportedStatus};

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("vigild.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        // A single writer connection serializes access so concurrent write
        // transactions wait on the pool rather than deadlocking on SQLite's
        // read-to-write lock upgrade (which returns SQLITE_BUSY immediately,
        // before the busy_timeout handler can help).
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    /// Shared with the alert ledger and audit log.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        let stmts = [
            "CREATE TABLE IF NOT EXISTS agents (
                 name TEXT PRIMARY KEY,
                 last_heartbeat TEXT,
                 expected_interval_hours INTEGER NOT NULL DEFAULT 24,
                 status TEXT NOT NULL DEFAULT 'unknown',
                 last_message TEXT NOT NULL DEFAULT '',
                 created_at TEXT NOT NULL
             )",
            "CREATE TABLE IF NOT EXISTS heartbeat_log (
                 id TEXT PRIMARY KEY,
                 agent_name TEXT NOT NULL,
                 status TEXT NOT NULL,
                 message TEXT NOT NULL,
                 received_at TEXT NOT NULL
             )",
            "CREATE INDEX IF NOT EXISTS idx_heartbeat_log_agent
                 ON heartbeat_log (agent_name, received_at)",
            "CREATE TABLE IF NOT EXISTS alert_records (
                 agent_name TEXT NOT NULL,
                 kind TEXT NOT NULL,
                 occurrence INTEGER NOT NULL,
                 open INTEGER NOT NULL DEFAULT 1,
                 last_sent_at TEXT,
                 PRIMARY KEY (agent_name, kind)
             )",
            "CREATE TABLE IF NOT EXISTS alert_log (
                 id TEXT PRIMARY KEY,
                 agent_name TEXT NOT NULL,
                 kind TEXT NOT NULL,
                 occurrence INTEGER NOT NULL,
                 title TEXT NOT NULL,
                 body TEXT NOT NULL,
                 sent_at TEXT NOT NULL
             )",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("failed to initialize database schema")?;
        }
        Ok(())
    }

    // ─── Agents ──────────────────────────────────────────────────────────────

    pub async fn get_agent(&self, name: &str) -> Result<Option<AgentRow>, MonitorError> {
        Ok(sqlx::query_as("SELECT * FROM agents WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// All agent rows, most recently reporting first.
    pub async fn list_agents(&self) -> Result<Vec<AgentRow>, MonitorError> {
        Ok(
            sqlx::query_as("SELECT * FROM agents ORDER BY last_heartbeat DESC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Apply one accepted heartbeat atomically and return the prior status.
    ///
    /// In a single transaction: fetch-or-create the agent row, stamp
    /// `last_heartbeat`/`expected_interval_hours`/`last_message`/`status`,
    /// append the audit row, and close any alert episode the heartbeat ends
    /// (`timeout` on any heartbeat, `error` on a success report). Callers
    /// must hold the agent's lock for the duration of the call.
    pub async fn apply_heartbeat(
        &self,
        name: &str,
        reported: ReportedStatus,
        message: &str,
        expected_interval_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<AgentStatus, MonitorError> {
        let now_str = now.to_rfc3339();
        let new_status = AgentStatus::on_heartbeat(reported);

        let mut tx = self.pool.begin().await?;

        let prior: Option<(String,)> = sqlx::query_as("SELECT status FROM agents WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        let previous = prior
            .map(|(s,)| AgentStatus::parse(&s))
            .unwrap_or(AgentStatus::Unknown);

        // `created_at` survives upserts; the name is the immutable key.
        sqlx::query(
            "INSERT INTO agents (name, last_heartbeat, expected_interval_hours, status, last_message, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
               last_heartbeat = excluded.last_heartbeat,
               expected_interval_hours = excluded.expected_interval_hours,
               status = excluded.status,
               last_message = excluded.last_message",
        )
        .bind(name)
        .bind(&now_str)
        .bind(expected_interval_hours)
        .bind(new_status.as_str())
        .bind(message)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO heartbeat_log (id, agent_name, status, message, received_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(reported.as_str())
        .bind(message)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?;

        // Any heartbeat ends a timeout episode; only a success report ends an
        // error episode. Closing keeps the row so the next episode starts at
        // occurrence + 1 and alerts immediately.
        sqlx::query("UPDATE alert_records SET open = 0 WHERE agent_name = ? AND kind = 'timeout'")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if reported == ReportedStatus::Success {
            sqlx::query("UPDATE alert_records SET open = 0 WHERE agent_name = ? AND kind = 'error'")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(previous)
    }

    /// Transition an agent to `timed_out` unless it is already there.
    ///
    /// Conditional UPDATE so a heartbeat racing the scan never has its fresh
    /// status clobbered by a stale overdue decision for the same row state.
    /// Returns `true` when the transition happened.
    pub async fn mark_timed_out(&self, name: &str) -> Result<bool, MonitorError> {
        let result = sqlx::query(
            "UPDATE agents SET status = 'timed_out' WHERE name = ? AND status != 'timed_out'",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

//! Data model for the agent registry: agent rows, heartbeat statuses, and
//! the per-(agent, kind) alert dedup ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

// ─── Statuses ─────────────────────────────────────────────────────────────────

/// Lifecycle status of a monitored agent.
///
/// `unknown → healthy ⇄ errored`, with `healthy`/`errored → timed_out` set by
/// the watchdog and any fresh heartbeat clearing `timed_out` back to the
/// status implied by its own report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered but no heartbeat received yet.
    Unknown,
    Healthy,
    Errored,
    /// Overdue past its declared interval, set by the watchdog.
    TimedOut,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Unknown => "unknown",
            AgentStatus::Healthy => "healthy",
            AgentStatus::Errored => "errored",
            AgentStatus::TimedOut => "timed_out",
        }
    }

    /// Parse a stored status string. Unrecognized values decode as `Unknown`.
    pub fn parse(s: &str) -> AgentStatus {
        match s {
            "healthy" => AgentStatus::Healthy,
            "errored" => AgentStatus::Errored,
            "timed_out" => AgentStatus::TimedOut,
            _ => AgentStatus::Unknown,
        }
    }

    /// The status a fresh heartbeat puts the agent in, regardless of what it
    /// was before.
    pub fn on_heartbeat(reported: ReportedStatus) -> AgentStatus {
        match reported {
            ReportedStatus::Success => AgentStatus::Healthy,
            ReportedStatus::Error => AgentStatus::Errored,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome an agent reports in a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Success,
    Error,
}

impl ReportedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedStatus::Success => "success",
            ReportedStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ReportedStatus {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ReportedStatus::Success),
            "error" => Ok(ReportedStatus::Error),
            other => Err(MonitorError::validation(format!(
                "status must be 'success' or 'error', got '{other}'"
            ))),
        }
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// One monitored agent. `name` is the unique, immutable key.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AgentRow {
    pub name: String,
    /// RFC-3339; NULL until the first heartbeat is accepted.
    pub last_heartbeat: Option<String>,
    /// Declared by the agent itself; the latest heartbeat wins.
    pub expected_interval_hours: i64,
    pub status: String,
    pub last_message: String,
    pub created_at: String,
}

impl AgentRow {
    pub fn status(&self) -> AgentStatus {
        AgentStatus::parse(&self.status)
    }

    /// Parsed `last_heartbeat`. `None` when absent or unparseable — the
    /// watchdog skips such agents rather than guessing.
    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Append-only heartbeat audit row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct HeartbeatEventRow {
    pub id: String,
    pub agent_name: String,
    pub status: String,
    pub message: String,
    pub received_at: String,
}

/// Append-only record of an alert that was actually delivered.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AlertEventRow {
    pub id: String,
    pub agent_name: String,
    pub kind: String,
    pub occurrence: i64,
    pub title: String,
    pub body: String,
    pub sent_at: String,
}

// ─── Alert dedup ledger ───────────────────────────────────────────────────────

/// Which abnormal condition an alert concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Error,
    Timeout,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Error => "error",
            AlertKind::Timeout => "timeout",
        }
    }
}

/// Dedup ledger row — one per (agent, kind), overwritten in place.
///
/// `occurrence` counts episodes and only ever grows; closing an episode keeps
/// the row so the next episode starts at `occurrence + 1` and alerts
/// immediately.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRecordRow {
    pub agent_name: String,
    pub kind: String,
    pub occurrence: i64,
    pub open: bool,
    /// NULL until a send succeeds within the current episode. A failed send
    /// leaves it untouched so the alert retries on the next evaluation.
    pub last_sent_at: Option<String>,
}

impl AlertRecordRow {
    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_sent_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

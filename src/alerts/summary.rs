//! Daily health summary — status counts across the whole fleet.
//!
//! A distinct, lower-priority alert kind with no episode or dedup semantics:
//! at most one message per invocation. Generated on demand for `GET /summary`
//! and on a 24 h background loop when enabled.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::alerts::dispatcher::AlertDispatcher;
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::registry::model::AgentStatus;
use crate::storage::Storage;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fleet-wide status counts plus one line per agent.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub date: String,
    pub total: usize,
    pub healthy: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub unknown: usize,
    pub agents: Vec<ReportLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportLine {
    pub name: String,
    pub status: AgentStatus,
    pub last_heartbeat: Option<String>,
}

/// Build the report from the latest committed agent rows.
pub async fn generate(storage: &Storage, clock: &dyn Clock) -> Result<Report, MonitorError> {
    let rows = storage.list_agents().await?;

    let mut report = Report {
        date: clock.now().format("%Y-%m-%d").to_string(),
        total: rows.len(),
        healthy: 0,
        errored: 0,
        timed_out: 0,
        unknown: 0,
        agents: Vec::with_capacity(rows.len()),
    };

    for row in rows {
        let status = row.status();
        match status {
            AgentStatus::Healthy => report.healthy += 1,
            AgentStatus::Errored => report.errored += 1,
            AgentStatus::TimedOut => report.timed_out += 1,
            AgentStatus::Unknown => report.unknown += 1,
        }
        report.agents.push(ReportLine {
            name: row.name,
            status,
            last_heartbeat: row.last_heartbeat,
        });
    }

    Ok(report)
}

/// Render the report as a notification title + body.
pub fn format(report: &Report) -> (String, String) {
    let mut body = format!(
        "*Total Agents:* {}\n*Healthy:* {} ✅\n*Errors:* {} 🚨\n*Timed Out:* {} ⏰",
        report.total, report.healthy, report.errored, report.timed_out,
    );
    if !report.agents.is_empty() {
        body.push_str("\n\n*Agent Status:*");
        for line in &report.agents {
            let emoji = match line.status {
                AgentStatus::Healthy => "✅",
                AgentStatus::Errored => "🚨",
                AgentStatus::TimedOut => "⏰",
                AgentStatus::Unknown => "❔",
            };
            body.push_str(&format!("\n{emoji} {}", line.name));
        }
    }
    ("📊 Daily Agent Health Summary".to_string(), body)
}

/// Spawn the 24 h summary loop. Skips the immediate first tick — the daemon
/// doesn't summarize on startup.
pub fn spawn_daily(
    dispatcher: Arc<AlertDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SUMMARY_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match dispatcher.send_summary().await {
                        Ok(report) => info!(
                            total = report.total,
                            healthy = report.healthy,
                            errored = report.errored,
                            timed_out = report.timed_out,
                            "daily summary sent"
                        ),
                        Err(e) => warn!(error = %e, "daily summary failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("summary loop stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::model::ReportedStatus;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn counts_follow_latest_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap());

        storage
            .apply_heartbeat("a", ReportedStatus::Success, "", 24, clock.now())
            .await
            .unwrap();
        storage
            .apply_heartbeat("b", ReportedStatus::Error, "boom", 24, clock.now())
            .await
            .unwrap();
        storage
            .apply_heartbeat("c", ReportedStatus::Success, "", 1, clock.now())
            .await
            .unwrap();
        storage.mark_timed_out("c").await.unwrap();

        let report = generate(&storage, &clock).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.errored, 1);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.date, "2026-08-01");

        let (title, body) = format(&report);
        assert!(title.contains("Summary"));
        assert!(body.contains("*Total Agents:* 3"));
        assert!(body.contains("🚨 b"));
    }
}

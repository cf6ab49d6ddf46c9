//! Alert dispatcher — episode tracking, deduplication, and escalation.
//!
//! An *episode* is the continuous span during which an agent is in one
//! abnormal condition (`errored`-since-last-success or
//! `timed_out`-since-last-heartbeat). The dispatcher sends one alert at
//! episode start and re-alerts only after `repeat_interval` while the episode
//! persists, so a sustained outage neither floods the operator nor goes
//! quiet after a single message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::alerts::ledger;
use crate::alerts::notifier::Notifier;
use crate::alerts::summary::{self, Report};
use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::registry::model::AlertKind;
use crate::storage::Storage;

/// Context carried into an alert message.
pub struct AlertContext {
    /// Free-text from the most recent heartbeat (already truncated).
    pub message: String,
    /// When the agent last reported, if ever.
    pub last_heartbeat: Option<DateTime<Utc>>,
}

enum Evaluation {
    /// No open episode — start one and alert immediately.
    NewEpisode,
    /// Open episode whose previous send failed — retry now.
    Retry(i64),
    /// Open episode past the repeat interval — escalation re-alert.
    Repeat(i64),
    /// Open episode inside the repeat window — stay quiet.
    Suppressed,
}

pub struct AlertDispatcher {
    storage: Arc<Storage>,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    recipient: String,
    repeat_interval: chrono::Duration,
}

impl AlertDispatcher {
    pub fn new(
        storage: Arc<Storage>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        recipient: String,
        repeat_interval: chrono::Duration,
    ) -> Self {
        let audit = AuditLog::new(storage.pool());
        Self {
            storage,
            audit,
            notifier,
            clock,
            recipient,
            repeat_interval,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Decide whether an alert for (agent, kind) should go out now, and send
    /// it if so. Returns whether a notification was actually delivered.
    ///
    /// A notifier failure is not an error from the caller's point of view:
    /// the ledger keeps the episode open with no send stamped, so the very
    /// next qualifying evaluation (next scan tick or next error heartbeat)
    /// retries. Ledger/store failures do propagate.
    pub async fn maybe_alert(
        &self,
        agent_name: &str,
        kind: AlertKind,
        context: &AlertContext,
    ) -> Result<bool, MonitorError> {
        let now = self.clock.now();
        let record = ledger::get_record(&self.storage.pool(), agent_name, kind).await?;

        let evaluation = match &record {
            None => Evaluation::NewEpisode,
            Some(r) if !r.open => Evaluation::NewEpisode,
            Some(r) => match r.last_sent_at() {
                None => Evaluation::Retry(r.occurrence),
                Some(sent) if now - sent >= self.repeat_interval => Evaluation::Repeat(r.occurrence),
                Some(_) => Evaluation::Suppressed,
            },
        };

        let occurrence = match evaluation {
            Evaluation::Suppressed => {
                debug!(agent = agent_name, kind = kind.as_str(), "alert suppressed (within repeat interval)");
                return Ok(false);
            }
            Evaluation::NewEpisode => {
                ledger::open_episode(&self.storage.pool(), agent_name, kind).await?
            }
            Evaluation::Retry(occ) | Evaluation::Repeat(occ) => occ,
        };

        let (title, body) = self.format_alert(agent_name, kind, context, now);
        match self.notifier.send(&self.recipient, &title, &body).await {
            Ok(()) => {
                ledger::mark_sent(&self.storage.pool(), agent_name, kind, now).await?;
                self.audit
                    .record_alert(agent_name, kind.as_str(), occurrence, &title, &body, now)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                // Un-sent: last_sent_at stays as-is, so the next evaluation retries.
                warn!(agent = agent_name, kind = kind.as_str(), error = %e, "alert send failed — will retry");
                Ok(false)
            }
        }
    }

    fn format_alert(
        &self,
        agent_name: &str,
        kind: AlertKind,
        context: &AlertContext,
        now: DateTime<Utc>,
    ) -> (String, String) {
        match kind {
            AlertKind::Error => (
                "🚨 Agent Failure Alert".to_string(),
                format!(
                    "*Agent:* {agent_name}\n*Time:* {}\n*Error Message:*\n```{}```\n_Check the agent's logs for the full traceback._",
                    now.format("%Y-%m-%d %H:%M:%S UTC"),
                    context.message,
                ),
            ),
            AlertKind::Timeout => {
                let (last_seen, hours_overdue) = match context.last_heartbeat {
                    Some(hb) => (hb.to_rfc3339(), (now - hb).num_hours()),
                    None => ("never".to_string(), 0),
                };
                (
                    "⏰ Agent Timeout Warning".to_string(),
                    format!(
                        "*Agent:* {agent_name}\n*Hours Overdue:* {hours_overdue}h\n*Last Heartbeat:* {last_seen}\n_Agent may be stuck or crashed. Check its logs._",
                    ),
                )
            }
        }
    }

    // ─── Daily summary ───────────────────────────────────────────────────────

    /// Aggregate current status counts across all agents. Read-only; no
    /// episode or dedup semantics.
    pub async fn summarize(&self) -> Result<Report, MonitorError> {
        summary::generate(&self.storage, self.clock.as_ref()).await
    }

    /// Generate and deliver the summary — at most one send per invocation.
    pub async fn send_summary(&self) -> Result<Report, MonitorError> {
        let report = self.summarize().await?;
        let (title, body) = summary::format(&report);
        self.notifier.send(&self.recipient, &title, &body).await?;
        self.audit
            .record_alert("", "summary", 0, &title, &body, self.clock.now())
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::NotifierError;
    use crate::clock::ManualClock;
    use crate::registry::model::ReportedStatus;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every send; can be flipped into failure mode.
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, _: &str, title: &str, body: &str) -> Result<(), NotifierError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifierError::Rejected("test outage".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    async fn setup(
        dir: &tempfile::TempDir,
    ) -> (
        Arc<Storage>,
        Arc<RecordingNotifier>,
        Arc<ManualClock>,
        AlertDispatcher,
    ) {
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
        ));
        let dispatcher = AlertDispatcher::new(
            storage.clone(),
            notifier.clone(),
            clock.clone(),
            "U0TESTOPS".to_string(),
            Duration::hours(6),
        );
        (storage, notifier, clock, dispatcher)
    }

    fn ctx(message: &str) -> AlertContext {
        AlertContext {
            message: message.to_string(),
            last_heartbeat: None,
        }
    }

    #[tokio::test]
    async fn first_alert_of_episode_sends_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (_, notifier, _, dispatcher) = setup(&dir).await;

        let sent = dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap();
        assert!(sent);
        assert_eq!(notifier.sent_count(), 1);
        let (title, body) = notifier.sent.lock().unwrap()[0].clone();
        assert!(title.contains("Failure"));
        assert!(body.contains("boom"));
    }

    #[tokio::test]
    async fn repeat_within_interval_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let (_, notifier, clock, dispatcher) = setup(&dir).await;

        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());
        clock.advance(Duration::minutes(5));
        assert!(!dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());
        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn re_alerts_after_repeat_interval_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let (_, notifier, clock, dispatcher) = setup(&dir).await;

        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());
        clock.advance(Duration::hours(6));
        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("still boom"))
            .await
            .unwrap());
        assert_eq!(notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn failed_send_retries_on_next_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let (_, notifier, clock, dispatcher) = setup(&dir).await;

        notifier.set_failing(true);
        assert!(!dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());
        assert_eq!(notifier.sent_count(), 0);

        // Transport recovers; no repeat interval has elapsed, but the alert
        // was never delivered so the next evaluation must send it.
        notifier.set_failing(false);
        clock.advance(Duration::minutes(1));
        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());
        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn closed_episode_reopens_with_fresh_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, notifier, clock, dispatcher) = setup(&dir).await;

        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());

        // A success heartbeat closes the error episode.
        storage
            .apply_heartbeat("etl", ReportedStatus::Success, "recovered", 24, clock.now())
            .await
            .unwrap();

        // Next failure starts episode 2 and alerts immediately, well inside
        // what would have been the repeat window.
        clock.advance(Duration::minutes(10));
        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom again"))
            .await
            .unwrap());
        assert_eq!(notifier.sent_count(), 2);

        let record = ledger::get_record(&storage.pool(), "etl", AlertKind::Error)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.occurrence, 2);
        assert!(record.open);
    }

    #[tokio::test]
    async fn kinds_track_independent_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let (_, notifier, _, dispatcher) = setup(&dir).await;

        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap());
        assert!(dispatcher
            .maybe_alert("etl", AlertKind::Timeout, &ctx(""))
            .await
            .unwrap());
        assert_eq!(notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn delivered_alerts_land_in_the_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, _, dispatcher) = setup(&dir).await;

        dispatcher
            .maybe_alert("etl", AlertKind::Error, &ctx("boom"))
            .await
            .unwrap();
        let alerts = dispatcher.audit().recent_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].agent_name, "etl");
        assert_eq!(alerts[0].kind, "error");
        assert_eq!(alerts[0].occurrence, 1);
    }
}

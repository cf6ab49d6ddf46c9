//! Integration tests for the watchdog: overdue detection, timeout episodes,
//! escalation, and recovery — all on a manually advanced clock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use vigild::alerts::notifier::{Notifier, NotifierError};
use vigild::clock::ManualClock;
use vigild::config::MonitorConfig;
use vigild::registry::model::AgentStatus;
use vigild::watchdog::{ScanAction, Watchdog};
use vigild::AppContext;

struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, _: &str, title: &str, body: &str) -> Result<(), NotifierError> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

async fn make_test_ctx(
    dir: &TempDir,
) -> (
    Arc<AppContext>,
    Arc<Watchdog>,
    Arc<RecordingNotifier>,
    Arc<ManualClock>,
) {
    let config = MonitorConfig::new(
        None,
        Some(dir.path().to_path_buf()),
        Some("error".to_string()),
        None,
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
    ));
    let ctx = AppContext::init(config, notifier.clone(), clock.clone())
        .await
        .unwrap();
    let watchdog = Arc::new(Watchdog::new(
        ctx.registry.clone(),
        ctx.dispatcher.clone(),
        clock.clone(),
        std::time::Duration::from_secs(60),
    ));
    (ctx, watchdog, notifier, clock)
}

fn status_of(agents: &[vigild::registry::model::AgentRow], name: &str) -> AgentStatus {
    agents
        .iter()
        .find(|a| a.name == name)
        .expect("agent missing from snapshot")
        .status()
}

#[tokio::test]
async fn overdue_agent_times_out_with_exactly_one_alert() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, clock) = make_test_ctx(&dir).await;

    // Scenario: agent A reports success with a 1 h interval, then goes silent
    // for two hours.
    ctx.ingest.ingest("agent-a", "success", "", 1).await.unwrap();

    clock.advance(Duration::hours(2));
    let outcomes = watchdog.scan().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0].action,
        ScanAction::TimedOut { alert_sent: true }
    ));
    assert_eq!(notifier.sent_count(), 1);
    assert!(notifier.titles()[0].contains("Timeout"));

    let agents = ctx.registry.status_snapshot().await.unwrap();
    assert_eq!(status_of(&agents, "agent-a"), AgentStatus::TimedOut);

    // Repeated scans during the same outage stay quiet.
    clock.advance(Duration::minutes(5));
    let outcomes = watchdog.scan().await;
    assert!(matches!(
        outcomes[0].action,
        ScanAction::StillOverdue { alert_sent: false }
    ));
    assert_eq!(notifier.sent_count(), 1);
}

#[tokio::test]
async fn ongoing_outage_re_alerts_after_the_repeat_interval() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, clock) = make_test_ctx(&dir).await;

    ctx.ingest.ingest("agent-a", "success", "", 1).await.unwrap();
    clock.advance(Duration::hours(2));
    watchdog.scan().await;
    assert_eq!(notifier.sent_count(), 1);

    // Six hours later (default repeat interval) the operator hears again.
    clock.advance(Duration::hours(6));
    let outcomes = watchdog.scan().await;
    assert!(matches!(
        outcomes[0].action,
        ScanAction::StillOverdue { alert_sent: true }
    ));
    assert_eq!(notifier.sent_count(), 2);
}

#[tokio::test]
async fn late_heartbeat_recovers_and_ends_the_timeout_episode() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, clock) = make_test_ctx(&dir).await;

    ctx.ingest.ingest("agent-a", "success", "", 1).await.unwrap();
    clock.advance(Duration::hours(2));
    watchdog.scan().await;
    assert_eq!(notifier.sent_count(), 1);

    // The agent finally reports back.
    let outcome = ctx.ingest.ingest("agent-a", "success", "", 1).await.unwrap();
    assert_eq!(outcome.previous, AgentStatus::TimedOut);
    assert_eq!(outcome.current, AgentStatus::Healthy);

    let outcomes = watchdog.scan().await;
    assert!(matches!(outcomes[0].action, ScanAction::Current));
    assert_eq!(notifier.sent_count(), 1);

    // Going silent again is a NEW episode — it alerts immediately even though
    // the repeat interval from the first outage has not elapsed.
    clock.advance(Duration::hours(2));
    let outcomes = watchdog.scan().await;
    assert!(matches!(
        outcomes[0].action,
        ScanAction::TimedOut { alert_sent: true }
    ));
    assert_eq!(notifier.sent_count(), 2);
}

#[tokio::test]
async fn heartbeat_after_timeout_keeps_its_own_reported_status() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, clock) = make_test_ctx(&dir).await;

    ctx.ingest.ingest("agent-a", "success", "", 1).await.unwrap();
    clock.advance(Duration::hours(2));
    watchdog.scan().await;

    // The late heartbeat reports an error: timed_out clears to errored, the
    // timeout episode ends, and an error alert fires.
    let outcome = ctx
        .ingest
        .ingest("agent-a", "error", "crashed on resume", 1)
        .await
        .unwrap();
    assert_eq!(outcome.previous, AgentStatus::TimedOut);
    assert_eq!(outcome.current, AgentStatus::Errored);
    assert!(outcome.alert_sent);

    let titles = notifier.titles();
    assert_eq!(titles.len(), 2);
    assert!(titles[0].contains("Timeout"));
    assert!(titles[1].contains("Failure"));
}

#[tokio::test]
async fn agents_that_never_reported_are_skipped() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, _) = make_test_ctx(&dir).await;

    // Registered row with no heartbeat yet — overdue-ness is undefined.
    sqlx::query(
        "INSERT INTO agents (name, last_heartbeat, expected_interval_hours, status, last_message, created_at)
         VALUES ('pre-registered', NULL, 24, 'unknown', '', ?)",
    )
    .bind(Utc::now().to_rfc3339())
    .execute(&ctx.storage.pool())
    .await
    .unwrap();

    let outcomes = watchdog.scan().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].action, ScanAction::Skipped));
    assert_eq!(notifier.sent_count(), 0);
}

#[tokio::test]
async fn agents_on_schedule_are_left_alone() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, clock) = make_test_ctx(&dir).await;

    ctx.ingest.ingest("agent-a", "success", "", 24).await.unwrap();
    clock.advance(Duration::hours(2));

    let outcomes = watchdog.scan().await;
    assert!(matches!(outcomes[0].action, ScanAction::Current));
    assert_eq!(notifier.sent_count(), 0);

    let agents = ctx.registry.status_snapshot().await.unwrap();
    assert_eq!(status_of(&agents, "agent-a"), AgentStatus::Healthy);
}

#[tokio::test]
async fn a_scan_with_no_agents_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let (_, watchdog, notifier, _) = make_test_ctx(&dir).await;

    let outcomes = watchdog.scan().await;
    assert!(outcomes.is_empty());
    assert_eq!(notifier.sent_count(), 0);
}

#[tokio::test]
async fn interval_changes_take_effect_on_the_next_scan() {
    let dir = TempDir::new().unwrap();
    let (ctx, watchdog, notifier, clock) = make_test_ctx(&dir).await;

    ctx.ingest.ingest("agent-a", "success", "", 1).await.unwrap();

    // The agent widens its own interval on the next report; two silent hours
    // are now within budget.
    clock.advance(Duration::minutes(30));
    ctx.ingest.ingest("agent-a", "success", "", 6).await.unwrap();

    clock.advance(Duration::hours(2));
    let outcomes = watchdog.scan().await;
    assert!(matches!(outcomes[0].action, ScanAction::Current));
    assert_eq!(notifier.sent_count(), 0);
}

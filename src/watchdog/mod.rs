//! Watchdog scanner — detects agents overdue past their declared interval.
//!
//! Runs on a fixed tick. Stateless across ticks: every scan recomputes
//! overdue-ness from persisted timestamps, so a restarted process picks up
//! exactly where the previous one left off.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::alerts::dispatcher::{AlertContext, AlertDispatcher};
use crate::clock::Clock;
use crate::registry::model::{AgentStatus, AlertKind};
use crate::registry::AgentRegistry;

/// What one scan tick decided for one agent.
#[derive(Debug)]
pub struct ScanOutcome {
    pub agent_name: String,
    pub action: ScanAction,
}

#[derive(Debug)]
pub enum ScanAction {
    /// Reporting on schedule — nothing to do.
    Current,
    /// Never reported — overdue-ness is undefined until the first heartbeat.
    Skipped,
    /// Newly overdue: transitioned to `timed_out` this tick.
    TimedOut { alert_sent: bool },
    /// Already `timed_out`; the dispatcher was consulted for escalation.
    StillOverdue { alert_sent: bool },
    /// This agent's processing failed; the rest of the tick continued.
    Failed(String),
}

pub struct Watchdog {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
    tick: std::time::Duration,
}

impl Watchdog {
    pub fn new(
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        tick: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
            tick,
        }
    }

    /// Spawn the scan loop. One scan fully completes before the next tick is
    /// processed; the loop exits on the shutdown signal.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(tick_secs = self.tick.as_secs(), "watchdog started");
            let mut ticker = interval(self.tick);
            ticker.tick().await; // skip immediate first tick — don't scan on startup
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcomes = self.scan().await;
                        let timed_out = outcomes
                            .iter()
                            .filter(|o| matches!(o.action, ScanAction::TimedOut { .. }))
                            .count();
                        if timed_out > 0 {
                            info!(scanned = outcomes.len(), timed_out, "scan complete");
                        } else {
                            debug!(scanned = outcomes.len(), "scan complete");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("watchdog stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Scan every known agent once. Failures are isolated per agent — one
    /// broken row never aborts the rest of the tick.
    pub async fn scan(&self) -> Vec<ScanOutcome> {
        let agents = match self.registry.status_snapshot().await {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "scan aborted: could not list agents");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(agents.len());
        for agent in agents {
            let name = agent.name.clone();
            let action = match self.scan_agent(&name).await {
                Ok(action) => action,
                Err(e) => {
                    warn!(agent = %name, error = %e, "agent scan failed");
                    ScanAction::Failed(e.to_string())
                }
            };
            outcomes.push(ScanOutcome {
                agent_name: name,
                action,
            });
        }
        outcomes
    }

    async fn scan_agent(&self, name: &str) -> Result<ScanAction, crate::error::MonitorError> {
        let lock = self.registry.agent_lock(name);
        let guard = lock.lock().await;

        // Re-read under the lock — the snapshot may be stale by now.
        let Some(agent) = self.registry.storage().get_agent(name).await? else {
            return Ok(ScanAction::Skipped);
        };
        let Some(last_heartbeat) = agent.last_heartbeat_at() else {
            return Ok(ScanAction::Skipped);
        };

        let now = self.clock.now();
        let overdue =
            now - last_heartbeat >= chrono::Duration::hours(agent.expected_interval_hours);
        if !overdue {
            return Ok(ScanAction::Current);
        }

        let transitioned = if agent.status() != AgentStatus::TimedOut {
            self.registry.storage().mark_timed_out(name).await?
        } else {
            false
        };
        drop(guard);

        // Dispatch outside the lock: the dedup ledger decides whether this
        // tick's consult turns into a send (episode start, retry after a
        // failed send, or escalation after the repeat interval).
        let context = AlertContext {
            message: agent.last_message.clone(),
            last_heartbeat: Some(last_heartbeat),
        };
        let alert_sent = self
            .dispatcher
            .maybe_alert(name, AlertKind::Timeout, &context)
            .await?;

        if transitioned {
            info!(agent = name, "agent timed out");
            Ok(ScanAction::TimedOut { alert_sent })
        } else {
            Ok(ScanAction::StillOverdue { alert_sent })
        }
    }
}

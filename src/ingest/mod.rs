//! Heartbeat ingestion — validate a report, apply it to the registry, and
//! originate the one alert ingestion is responsible for (an error report).
//!
//! The request layer hands in already-authorized values; everything here is
//! semantic validation and the atomic read-modify-write on the agent's row.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::alerts::dispatcher::{AlertContext, AlertDispatcher};
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::registry::model::{AgentStatus, AlertKind, ReportedStatus};
use crate::registry::AgentRegistry;

/// Free-text messages are bounded; anything longer is cut at a char boundary.
pub const MAX_MESSAGE_LEN: usize = 2048;
/// Agent names are keys — keep them short enough to index and display.
pub const MAX_NAME_LEN: usize = 128;

/// What one accepted heartbeat did to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub agent_name: String,
    pub previous: AgentStatus,
    pub current: AgentStatus,
    /// True when the heartbeat reported an error and an alert was requested.
    pub alert_requested: bool,
    /// True when that alert was actually delivered (dedup may suppress it).
    pub alert_sent: bool,
}

pub struct IngestProcessor {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
}

impl IngestProcessor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
        }
    }

    /// Apply one heartbeat report.
    ///
    /// Validation failures reject the report outright; store failures surface
    /// loudly so the caller can return a transport error — a heartbeat is
    /// never silently dropped. The agent's lock is held only for the
    /// read-modify-write, never across the notifier call.
    pub async fn ingest(
        &self,
        agent_name: &str,
        reported_status: &str,
        message: &str,
        expected_interval_hours: i64,
    ) -> Result<Outcome, MonitorError> {
        let name = agent_name.trim();
        if name.is_empty() {
            return Err(MonitorError::validation("agent_name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(MonitorError::validation(format!(
                "agent_name exceeds {MAX_NAME_LEN} chars"
            )));
        }
        let reported = ReportedStatus::from_str(reported_status)?;
        if expected_interval_hours <= 0 {
            return Err(MonitorError::validation(
                "expected_interval_hours must be positive",
            ));
        }
        let message = truncate_message(message);

        let lock = self.registry.agent_lock(name);
        let guard = lock.lock().await;
        let now = self.clock.now();
        let previous = self
            .registry
            .storage()
            .apply_heartbeat(name, reported, &message, expected_interval_hours, now)
            .await?;
        drop(guard);

        let current = AgentStatus::on_heartbeat(reported);
        debug!(agent = name, %previous, %current, "heartbeat applied");

        let mut outcome = Outcome {
            agent_name: name.to_string(),
            previous,
            current,
            alert_requested: false,
            alert_sent: false,
        };

        if current == AgentStatus::Errored {
            outcome.alert_requested = true;
            let context = AlertContext {
                message,
                last_heartbeat: Some(now),
            };
            // The heartbeat is already committed; a ledger failure here must
            // not retroactively fail the accepted report.
            match self
                .dispatcher
                .maybe_alert(name, AlertKind::Error, &context)
                .await
            {
                Ok(sent) => outcome.alert_sent = sent,
                Err(e) => warn!(agent = name, error = %e, "error alert dispatch failed"),
            }
        }

        Ok(outcome)
    }
}

/// Truncate to `MAX_MESSAGE_LEN`, respecting char boundaries.
fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

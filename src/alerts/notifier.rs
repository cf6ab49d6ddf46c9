//! Outbound notification boundary.
//!
//! The dispatcher only knows `send(recipient, title, body)`; which channel
//! implements it is a deployment decision. The shipped implementation posts
//! Slack Block Kit messages; without credentials the daemon falls back to a
//! log-only notifier so alerts are never dropped on the floor.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

const SLACK_API_BASE: &str = "https://slack.com/api";
const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The transport reached the service but the service refused the message.
    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message to a human. A returned error means the alert was
    /// NOT delivered and the caller must treat it as un-sent.
    async fn send(&self, recipient: &str, title: &str, body: &str) -> Result<(), NotifierError>;
}

// ─── Slack ────────────────────────────────────────────────────────────────────

/// Posts alerts to Slack as Block Kit messages.
///
/// A recipient starting with `U` is treated as a user id: a DM conversation
/// is opened first and the message posted there. Anything else is used as a
/// channel id directly.
pub struct SlackNotifier {
    client: reqwest::Client,
    bot_token: String,
}

impl SlackNotifier {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
        }
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value, NotifierError> {
        let resp: Value = self
            .client
            .post(format!("{SLACK_API_BASE}/{method}"))
            .bearer_auth(&self.bot_token)
            .timeout(SEND_TIMEOUT)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        if resp["ok"].as_bool() != Some(true) {
            let err = resp["error"].as_str().unwrap_or("unknown error");
            return Err(NotifierError::Rejected(format!("{method}: {err}")));
        }
        Ok(resp)
    }

    async fn open_dm(&self, user_id: &str) -> Result<String, NotifierError> {
        let resp = self
            .call("conversations.open", json!({ "users": user_id }))
            .await?;
        resp["channel"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                NotifierError::Rejected("conversations.open returned no channel id".to_string())
            })
    }

    fn blocks(title: &str, body: &str) -> Value {
        json!([
            {
                "type": "header",
                "text": { "type": "plain_text", "text": title, "emoji": true }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": body }
            }
        ])
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, recipient: &str, title: &str, body: &str) -> Result<(), NotifierError> {
        let channel = if recipient.starts_with('U') {
            self.open_dm(recipient).await?
        } else {
            recipient.to_string()
        };

        self.call(
            "chat.postMessage",
            json!({
                "channel": channel,
                "blocks": Self::blocks(title, body),
                // Fallback text for clients that don't render blocks.
                "text": title,
            }),
        )
        .await?;
        Ok(())
    }
}

// ─── Log-only fallback ────────────────────────────────────────────────────────

/// Used when no Slack token is configured: alerts land in the daemon log at
/// WARN instead of reaching a human. Always reports success.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, title: &str, body: &str) -> Result<(), NotifierError> {
        warn!(recipient, title, body, "alert (log-only notifier)");
        Ok(())
    }
}

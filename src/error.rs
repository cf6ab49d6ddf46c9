//! Error taxonomy for the monitoring core.
//!
//! Three failure classes, matched on by callers:
//! - [`MonitorError::Validation`] — malformed heartbeat input; rejected, not
//!   retried, surfaced to the caller as a 400.
//! - [`MonitorError::Store`] — persistence unavailable; ingestion fails
//!   loudly, the watchdog isolates the failing agent and continues.
//! - [`MonitorError::Notifier`] — alert transport failed; the alert is
//!   considered un-sent and retried on the next qualifying evaluation.

use crate::alerts::notifier::NotifierError;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Malformed heartbeat input. Never retried.
    #[error("invalid heartbeat: {0}")]
    Validation(String),

    /// The durable store rejected or could not serve a query.
    #[error("store unavailable: {0}")]
    Store(#[from] sqlx::Error),

    /// The outbound notification transport failed.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

impl MonitorError {
    /// Shorthand for a validation failure with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        MonitorError::Validation(msg.into())
    }
}

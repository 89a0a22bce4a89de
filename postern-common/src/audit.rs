//! Audit logging for the forwarding lifecycle
//!
//! Every message that passes through a run produces a trail of structured
//! events, emitted through `tracing` so they land wherever the subscriber
//! sends them.
//!
//! ## Audit Events
//!
//! - `MessageFetched`: Raw message retrieved from the source mailbox
//! - `DeliveryAttempt`: One attempt to hand an intent to the relay
//! - `DeliverySuccess`: The relay confirmed an intent
//! - `DeliveryFailure`: An intent gave up (permanent error or retries exhausted)
//! - `MessageAcknowledged`: The source copy was removed from the mailbox
//!
//! ## PII Redaction
//!
//! Addresses can be redacted based on [`AuditConfig`]. The local part is
//! replaced and the domain kept, so logs stay useful for routing questions.

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for message lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact original sender addresses from audit logs
    #[serde(default)]
    pub redact_sender: bool,

    /// Redact destination addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        if let Some((_, domain)) = email.rsplit_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Redact multiple email addresses
#[must_use]
pub fn redact_emails(emails: &[String], redact: bool) -> Vec<String> {
    emails.iter().map(|e| redact_email(e, redact)).collect()
}

/// Emits audit events according to an [`AuditConfig`].
///
/// Constructed once from configuration and handed to whoever needs to
/// audit; there is no process-wide audit state.
#[derive(Debug, Clone, Default)]
pub struct Auditor {
    config: AuditConfig,
}

impl Auditor {
    #[must_use]
    pub const fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Logged once the raw message has been read from the mailbox.
    pub fn message_fetched(&self, message_id: &str, from: &[String], to: &[String], size: usize) {
        if !self.config.enabled {
            return;
        }

        let from = redact_emails(from, self.config.redact_sender);
        let to = redact_emails(to, self.config.redact_recipients);

        tracing::event!(
            tracing::Level::INFO,
            event = "MessageFetched",
            message_id = %message_id,
            from = ?from,
            to = ?to,
            size = size,
            "Audit: Message fetched from source mailbox"
        );
    }

    /// Logged for each attempt to hand an intent to the relay.
    ///
    /// `attempt` is 1-based.
    pub fn delivery_attempt(&self, message_id: &str, destination: &str, attempt: u32) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            tracing::Level::INFO,
            event = "DeliveryAttempt",
            message_id = %message_id,
            destination = %redact_email(destination, self.config.redact_recipients),
            delivery_attempt = attempt,
            "Audit: Delivery attempt"
        );
    }

    pub fn delivery_success(
        &self,
        message_id: &str,
        destination: &str,
        attempt: u32,
        duration_ms: u128,
    ) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            tracing::Level::INFO,
            event = "DeliverySuccess",
            message_id = %message_id,
            destination = %redact_email(destination, self.config.redact_recipients),
            delivery_attempt = attempt,
            duration_ms = duration_ms,
            "Audit: Delivery confirmed by relay"
        );
    }

    /// Logged when an intent stops trying, either on a permanent error or
    /// once its retries are exhausted.
    pub fn delivery_failure(&self, message_id: &str, destination: &str, error: &str, attempt: u32) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            tracing::Level::WARN,
            event = "DeliveryFailure",
            message_id = %message_id,
            destination = %redact_email(destination, self.config.redact_recipients),
            error = %error,
            delivery_attempt = attempt,
            "Audit: Delivery failed"
        );
    }

    pub fn message_acknowledged(&self, message_id: &str, expunged: bool) {
        if !self.config.enabled {
            return;
        }

        tracing::event!(
            tracing::Level::INFO,
            event = "MessageAcknowledged",
            message_id = %message_id,
            expunged = expunged,
            "Audit: Source copy removed from mailbox"
        );
    }
}

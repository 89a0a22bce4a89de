//! Typed error handling for the relay pipeline.
//!
//! This module provides structured error types that distinguish between:
//! - Connection failures - fatal to a run, nothing is processed
//! - Permanent delivery failures (5xx relay replies) - don't retry
//! - Temporary delivery failures (4xx replies, dropped connections) - retry with backoff
//! - Per-message failures that are recorded and never abort a run

use thiserror::Error;

use crate::{message::MessageId, types::MessageState};

/// Failure to open a connection to either side of the run.
///
/// Authentication failures, unreachable hosts and failed TLS or capability
/// negotiation all end up here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Source mailbox connection failed: {0}")]
    Mailbox(String),

    #[error("Relay connection failed: {0}")]
    Relay(String),
}

/// Top-level delivery error type for a single relay send.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried (e.g., 5xx SMTP codes).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff (e.g., 4xx SMTP codes).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// Internal error, such as an illegal state transition.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermanentError {
    /// Destination address is invalid or rejected by the relay.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Envelope sender is invalid or rejected by the relay.
    #[error("Invalid sender: {0}")]
    InvalidSender(String),

    /// Message was rejected by the relay (e.g., policy violation, size).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The relay refused our credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// Temporary errors that should be retried with exponential backoff.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemporaryError {
    /// Failed to establish a connection to the relay.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The relay dropped the connection mid-transaction.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Relay returned a temporary failure code.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// The relay did not answer in time.
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SystemError {
    /// A state machine was asked to make a transition it does not allow.
    #[error("Illegal transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SystemError {
    pub(crate) fn transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Returns `true` if the relay connection can no longer be trusted and
    /// must be re-established before the next attempt.
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Temporary(
                TemporaryError::ConnectionFailed(_)
                    | TemporaryError::ConnectionLost(_)
                    | TemporaryError::Timeout(_)
            )
        )
    }
}

/// Re-opening a relay connection mid-run is a transient failure of the
/// attempt that needed it, never a fatal one.
impl From<ConnectionError> for DeliveryError {
    fn from(error: ConnectionError) -> Self {
        Self::Temporary(TemporaryError::ConnectionFailed(error.to_string()))
    }
}

/// Errors reported by the source mailbox transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Listing messages failed: {0}")]
    List(String),

    #[error("Fetching message {id} failed: {reason}")]
    Fetch { id: MessageId, reason: String },

    #[error("Flagging message {id} as deleted failed: {reason}")]
    Store { id: MessageId, reason: String },

    #[error("Expunge failed: {0}")]
    Expunge(String),

    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

/// The fetched content is not a structured mail document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed message: {0}")]
pub struct MalformedMessage(pub String);

/// A routing rule could not be built from configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("At least one destination address is required")]
    NoDestinations,

    #[error("Invalid destination address {0:?}")]
    InvalidDestination(String),

    #[error("Invalid sender address {0:?}")]
    InvalidSender(String),
}

/// Why a single message did not complete cleanly.
///
/// Recorded in the message outcome; never propagated out of a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("{0}")]
    Fetch(MailboxError),

    #[error(transparent)]
    Malformed(#[from] MalformedMessage),

    #[error("Delivery to {destination} failed: {error}")]
    Delivery {
        destination: String,
        error: DeliveryError,
    },

    /// Delivered everywhere, but the source copy could not be removed.
    #[error("Acknowledge failed: {0}")]
    Acknowledge(MailboxError),

    #[error("Interrupted in state {0:?} before completion")]
    Interrupted(MessageState),

    #[error(transparent)]
    System(#[from] SystemError),
}

impl MessageError {
    /// Short, stable name of the failure kind, used in log lines.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "FetchError",
            Self::Malformed(_) => "MalformedMessageError",
            Self::Delivery {
                error: DeliveryError::Permanent(_),
                ..
            } => "PermanentDeliveryError",
            Self::Delivery {
                error: DeliveryError::Temporary(_),
                ..
            } => "TransientDeliveryError",
            Self::Delivery {
                error: DeliveryError::System(_),
                ..
            }
            | Self::System(_) => "SystemError",
            Self::Acknowledge(_) => "AcknowledgeError",
            Self::Interrupted(_) => "Interrupted",
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_delivery_error_is_temporary() {
        let error = DeliveryError::Temporary(TemporaryError::ConnectionLost(
            "connection reset by peer".to_string(),
        ));
        assert!(error.is_temporary());
        assert!(!error.is_permanent());
        assert!(!error.is_system());
        assert!(error.should_reconnect());
    }

    #[test]
    fn test_delivery_error_is_permanent() {
        let error = DeliveryError::Permanent(PermanentError::InvalidRecipient(
            "abc@bar.com".to_string(),
        ));
        assert!(!error.is_temporary());
        assert!(error.is_permanent());
        assert!(!error.should_reconnect());
    }

    #[test]
    fn test_temporary_reply_keeps_connection() {
        let error = DeliveryError::Temporary(TemporaryError::SmtpTemporary(
            "451 try again later".to_string(),
        ));
        assert!(error.is_temporary());
        assert!(!error.should_reconnect());
    }

    #[test]
    fn test_connection_error_becomes_temporary() {
        let error: DeliveryError = ConnectionError::Relay("refused".to_string()).into();
        assert!(error.is_temporary());
        assert!(error.should_reconnect());
    }

    #[test]
    fn test_error_display() {
        let error = DeliveryError::Temporary(TemporaryError::SmtpTemporary(
            "421 Service not available".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Temporary failure: Temporary SMTP error: 421 Service not available"
        );

        let error = DeliveryError::Permanent(PermanentError::InvalidRecipient(
            "user@example.com".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Permanent failure: Invalid recipient: user@example.com"
        );
    }

    #[test]
    fn test_message_error_kinds() {
        let permanent = MessageError::Delivery {
            destination: "abc@bar.com".to_string(),
            error: PermanentError::MessageRejected("550 no".to_string()).into(),
        };
        assert_eq!(permanent.kind(), "PermanentDeliveryError");

        let transient = MessageError::Delivery {
            destination: "abc@bar.com".to_string(),
            error: TemporaryError::Timeout("DATA".to_string()).into(),
        };
        assert_eq!(transient.kind(), "TransientDeliveryError");

        let malformed: MessageError = MalformedMessage("no header".to_string()).into();
        assert_eq!(malformed.kind(), "MalformedMessageError");
        assert_eq!(malformed.to_string(), "Malformed message: no header");

        let ack = MessageError::Acknowledge(MailboxError::Expunge("NO".to_string()));
        assert_eq!(ack.kind(), "AcknowledgeError");
    }
}

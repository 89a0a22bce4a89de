//! Wire adapters for the two ends of a relay run.
//!
//! [`ImapConnector`] opens the source mailbox over implicit TLS and
//! [`SmtpRelayConnector`] opens authenticated submission sessions on the
//! relay. Both implement the connector traits from `postern_delivery`, so
//! the pipeline never sees a protocol detail.

pub mod imap;
pub mod smtp;

use std::{fmt, future::Future, time::Duration};

pub use imap::{ImapConnector, ImapMailbox, ImapSettings, ImapStream};
pub use smtp::{RelaySecurity, SmtpRelayConnector, SmtpSettings};

/// Run `operation`, giving up after `limit`. Both failure modes collapse to
/// a reason string for the caller's error type.
pub(crate) async fn bounded<T, E: fmt::Display>(
    limit: Duration,
    operation: impl Future<Output = Result<T, E>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no response within {limit:?}")),
    }
}

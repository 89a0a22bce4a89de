//! Relay sends and the per-intent retry loop

use std::{sync::Arc, time::Instant};

use postern_common::{
    audit::Auditor,
    outgoing,
    tracing::{debug, warn},
};

use crate::{
    error::{ConnectionError, DeliveryError, SystemError},
    planner::DeliveryIntent,
    policy::RetryPolicy,
    shutdown::ShutdownWatch,
    transport::{Relay, RelayConnector},
};

/// A worker's relay connection, re-established on demand after it has been
/// dropped as suspect.
pub struct RelayHandle {
    connector: Arc<dyn RelayConnector>,
    connection: Option<Box<dyn Relay>>,
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayHandle {
    /// Connect eagerly so an unusable relay is found before any message is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns the connector's [`ConnectionError`].
    pub async fn open(connector: Arc<dyn RelayConnector>) -> Result<Self, ConnectionError> {
        let connection = connector.connect().await?;
        outgoing!(level = DEBUG, "Relay connection established");

        Ok(Self {
            connector,
            connection: Some(connection),
        })
    }

    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send through the current connection, reconnecting first if it was
    /// dropped. Any transient failure drops the connection.
    ///
    /// # Errors
    ///
    /// Returns the relay's [`DeliveryError`]; a failed reconnect is a
    /// temporary error.
    pub async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        content: &[u8],
    ) -> Result<(), DeliveryError> {
        let relay = match self.connection.take() {
            Some(relay) => relay,
            None => {
                outgoing!(level = DEBUG, "Reconnecting to relay");
                self.connector.connect().await?
            }
        };
        let relay = self.connection.insert(relay);

        let result = relay.send(envelope_from, envelope_to, content).await;

        if let Err(error) = &result
            && error.is_temporary()
        {
            self.discard(error.should_reconnect()).await;
        }

        result
    }

    /// Drop the current connection. A connection that still answers is
    /// closed politely first.
    async fn discard(&mut self, broken: bool) {
        let Some(relay) = self.connection.take() else {
            return;
        };

        if !broken && let Err(e) = relay.disconnect().await {
            debug!(error = %e, "Ignoring error while dropping suspect relay connection");
        }
    }

    /// Drop the connection without talking to the relay, for when a send
    /// was abandoned halfway.
    pub fn abandon(&mut self) {
        self.connection = None;
    }

    pub async fn close(mut self) {
        if let Some(relay) = self.connection.take() {
            match relay.disconnect().await {
                Ok(()) => outgoing!(level = DEBUG, "Relay connection closed"),
                Err(e) => warn!(error = %e, "Failed to close relay connection cleanly"),
            }
        }
    }
}

/// How an intent left the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentResult {
    Confirmed,
    Failed(DeliveryError),
    Interrupted,
}

/// Drive one intent to `Confirmed` or `Failed`.
///
/// Transient failures are retried with backoff until the policy runs out;
/// permanent ones end the intent immediately.
///
/// # Errors
///
/// Returns [`SystemError`] if the intent is asked for an illegal transition.
pub async fn deliver_intent(
    intent: &mut DeliveryIntent,
    relay: &mut RelayHandle,
    envelope_from: &str,
    retry: &RetryPolicy,
    auditor: &Auditor,
    shutdown: &mut ShutdownWatch,
) -> Result<IntentResult, SystemError> {
    let message_id = intent.source_id().to_string();
    let destination = intent.destination().to_string();

    loop {
        if shutdown.is_triggered() {
            return Ok(IntentResult::Interrupted);
        }

        intent.mark_sent()?;
        let attempt = intent.attempt_count().saturating_add(1);
        auditor.delivery_attempt(&message_id, &destination, attempt);
        outgoing!(
            id = message_id,
            "Relaying to {} (attempt {}/{})",
            destination,
            attempt,
            retry.max_attempts()
        );

        let started = Instant::now();
        let sent = tokio::select! {
            biased;
            () = shutdown.triggered() => None,
            result = relay.send(envelope_from, &destination, intent.content()) => Some(result),
        };

        let Some(result) = sent else {
            relay.abandon();
            return Ok(IntentResult::Interrupted);
        };

        match result {
            Ok(()) => {
                intent.record_attempt(None);
                intent.confirm()?;
                auditor.delivery_success(
                    &message_id,
                    &destination,
                    attempt,
                    started.elapsed().as_millis(),
                );
                outgoing!(level = DEBUG, id = message_id, "Relay accepted for {}", destination);
                return Ok(IntentResult::Confirmed);
            }
            Err(error) => {
                intent.record_attempt(Some(error.to_string()));

                if error.is_temporary() && retry.should_retry(intent.attempt_count()) {
                    intent.requeue()?;
                    let delay = retry.backoff_delay(attempt);
                    warn!(
                        message_id = %message_id,
                        destination = %destination,
                        attempt = attempt,
                        remaining = retry.remaining_attempts(intent.attempt_count()),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Transient relay failure, will retry"
                    );

                    tokio::select! {
                        biased;
                        () = shutdown.triggered() => return Ok(IntentResult::Interrupted),
                        () = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }

                intent.fail(error.to_string())?;
                auditor.delivery_failure(&message_id, &destination, &error.to_string(), attempt);
                return Ok(IntentResult::Failed(error));
            }
        }
    }
}

//! Relay over authenticated SMTP submission.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    address::Envelope,
    transport::smtp::{Error as SmtpError, PoolConfig, authentication::Credentials},
};
use postern_common::{Secret, outgoing};
use postern_delivery::{
    ConnectionError, DeliveryError, PermanentError, TemporaryError,
    transport::{Relay, RelayConnector},
};
use serde::{Deserialize, Serialize};

mod defaults {
    pub const fn port() -> u16 {
        587
    }

    pub const fn timeout_secs() -> u64 {
        60
    }
}

/// How the relay connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelaySecurity {
    /// Plain connection upgraded with STARTTLS, which is required.
    #[default]
    StartTls,
    /// TLS from the first byte.
    Tls,
    /// No encryption at all. Only for relays on a trusted local network.
    Plain,
}

/// Where and as whom to submit relayed mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Skips authentication when empty.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Secret,
    /// Envelope sender and rewritten `Sender` header of every relayed copy.
    pub sender: String,
    #[serde(default)]
    pub security: RelaySecurity,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl SmtpSettings {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpRelayConnector {
    settings: SmtpSettings,
}

impl SmtpRelayConnector {
    pub const fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub const fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SmtpError> {
        let settings = &self.settings;
        let builder = match settings.security {
            RelaySecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            }
            RelaySecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?,
            RelaySecurity::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
        };

        // One pooled connection per relay session keeps a worker on a
        // single SMTP conversation.
        let mut builder = builder
            .port(settings.port)
            .timeout(Some(settings.timeout()))
            .pool_config(PoolConfig::new().max_size(1));

        if !settings.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.user.clone(),
                settings.password.expose().to_string(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl RelayConnector for SmtpRelayConnector {
    async fn connect(&self) -> Result<Box<dyn Relay>, ConnectionError> {
        let settings = &self.settings;
        outgoing!(
            level = DEBUG,
            "Connecting to relay {}:{} ({:?})",
            settings.host,
            settings.port,
            settings.security
        );

        let refused = |reason: String| {
            ConnectionError::Relay(format!("{}:{}: {reason}", settings.host, settings.port))
        };

        let transport = self.transport().map_err(|e| refused(e.to_string()))?;

        // Opens the connection, negotiates TLS and authenticates.
        match transport.test_connection().await {
            Ok(true) => Ok(Box::new(SmtpRelay { transport })),
            Ok(false) => Err(refused(String::from("relay did not answer NOOP"))),
            Err(e) => Err(refused(e.to_string())),
        }
    }
}

pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpRelay").finish_non_exhaustive()
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        content: &[u8],
    ) -> Result<(), DeliveryError> {
        let envelope = envelope(envelope_from, envelope_to)?;

        let response = self
            .transport
            .send_raw(&envelope, content)
            .await
            .map_err(|e| classify(&e))?;

        outgoing!(
            level = DEBUG,
            "Relay accepted {} bytes for {}: {}",
            content.len(),
            envelope_to,
            response.message().collect::<Vec<_>>().join(" ")
        );

        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), DeliveryError> {
        drop(self.transport);
        Ok(())
    }
}

/// A single-recipient SMTP envelope. Addresses the relay could never
/// accept are permanent failures without a round trip.
fn envelope(from: &str, to: &str) -> Result<Envelope, DeliveryError> {
    let sender = from
        .parse::<Address>()
        .map_err(|e| PermanentError::InvalidSender(format!("{from}: {e}")))?;
    let recipient = to
        .parse::<Address>()
        .map_err(|e| PermanentError::InvalidRecipient(format!("{to}: {e}")))?;

    Envelope::new(Some(sender), vec![recipient])
        .map_err(|e| PermanentError::MessageRejected(e.to_string()).into())
}

/// Map a lettre failure onto the retry taxonomy: 5xx replies are final,
/// 4xx replies and transport trouble are worth another attempt.
fn classify(error: &SmtpError) -> DeliveryError {
    let reason = error.to_string();

    if error.is_permanent() {
        match error.status().map(u16::from) {
            Some(530 | 534 | 535) => PermanentError::AuthenticationFailed(reason).into(),
            Some(550 | 551 | 553) => PermanentError::InvalidRecipient(reason).into(),
            _ => PermanentError::MessageRejected(reason).into(),
        }
    } else if error.is_transient() {
        TemporaryError::SmtpTemporary(reason).into()
    } else if error.is_timeout() {
        TemporaryError::Timeout(reason).into()
    } else {
        TemporaryError::ConnectionLost(reason).into()
    }
}

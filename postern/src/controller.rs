use std::sync::Arc;

use postern_common::{Signal, internal, tracing::warn};
use postern_delivery::{
    ConnectionError, RoutingRule, RunCoordinator, RunSummary,
    transport::{MailboxConnector, RelayConnector},
};
use postern_transport::{ImapConnector, SmtpRelayConnector};
use tokio::sync::broadcast;

use crate::config::Config;

/// One configured relay run.
#[derive(Debug)]
pub struct Postern {
    config: Config,
}

/// Wait for Ctrl-C or SIGTERM and cancel the run.
async fn shutdown(sender: broadcast::Sender<Signal>) -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = WARN, "CTRL+C entered, abandoning messages in flight");
        }
        _ = terminate.recv() => {
            internal!(level = WARN, "Terminate signal received, abandoning messages in flight");
        }
    }

    // Nobody listening means the run already finished.
    let _ = sender.send(Signal::Shutdown);
    Ok(())
}

impl Postern {
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Drain the configured mailbox once through the configured relay.
    ///
    /// # Errors
    ///
    /// Fails if the routing rule is invalid or either side cannot be
    /// connected to. Per-message failures are in the summary.
    pub async fn run(self) -> anyhow::Result<RunSummary> {
        let rule = self.config.routing_rule()?;
        let mailbox = ImapConnector::new(self.config.source.clone());
        let relay = Arc::new(SmtpRelayConnector::new(self.config.relay.clone()));

        internal!(
            level = INFO,
            "Relaying {} of {} on {} via {}",
            self.config.source.folder,
            self.config.source.user,
            self.config.source.host,
            self.config.relay.host
        );

        Ok(self.relay(&mailbox, relay, &rule).await?)
    }

    /// Run against explicit endpoints, cancelling on Ctrl-C or SIGTERM.
    pub async fn relay(
        &self,
        mailbox: &dyn MailboxConnector,
        relay: Arc<dyn RelayConnector>,
        rule: &RoutingRule,
    ) -> Result<RunSummary, ConnectionError> {
        let coordinator = RunCoordinator::new(self.config.run_settings());

        let signals = tokio::spawn(shutdown(coordinator.shutdown_handle()));
        let result = coordinator.run_once(mailbox, relay, rule).await;

        if signals.is_finished() {
            match signals.await {
                Ok(Err(e)) => warn!(error = %e, "Signal handler failed"),
                Ok(Ok(())) | Err(_) => {}
            }
        } else {
            signals.abort();
        }

        result
    }
}

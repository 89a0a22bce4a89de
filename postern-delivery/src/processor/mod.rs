//! Run orchestration

pub mod delivery;
pub mod process;
pub mod scan;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use postern_common::{
    Signal,
    audit::{AuditConfig, Auditor},
    incoming, internal,
    tracing::{error, info, warn},
};
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinSet,
};

use crate::{
    error::{ConnectionError, MessageError},
    message::MessageId,
    pipeline::RelayPipeline,
    planner::RoutingRule,
    policy::RetryPolicy,
    processor::delivery::RelayHandle,
    shutdown::ShutdownWatch,
    transport::{Mailbox, MailboxConnector, RelayConnector},
    types::{ExpungePolicy, RunSummary},
};

/// Immutable settings of a run, built once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Upper bound on messages in flight, and on relay connections
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub expunge: ExpungePolicy,
    /// Stop starting messages after this long and abandon the ones in flight
    pub run_timeout: Option<Duration>,
    pub audit: AuditConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry: RetryPolicy::default(),
            expunge: ExpungePolicy::default(),
            run_timeout: None,
            audit: AuditConfig::default(),
        }
    }
}

/// Drains the source mailbox once.
///
/// ## Delivery guarantee
///
/// Delivery is at-least-once. A message is only removed from the source
/// after the relay confirmed every destination, so a crash, a cancelled run
/// or a failed delete can lead to the same message being relayed again on
/// the next run. Nothing here deduplicates across runs.
///
/// ## Shutdown
///
/// Sending [`Signal::Shutdown`] through [`RunCoordinator::shutdown_handle`]
/// (or hitting the run timeout) is honoured from the moment the coordinator
/// exists. Before any message is started it ends the run with nothing
/// processed. Afterwards it stops workers from picking up new messages, and
/// messages in flight are abandoned before deletion unless they already
/// reached `Completed`, and are reported as interrupted.
#[derive(Debug)]
pub struct RunCoordinator {
    settings: RunSettings,
    shutdown: broadcast::Sender<Signal>,
    /// Subscribed at construction so a signal sent before the run starts
    /// is not lost; taken by the first run.
    pending: std::sync::Mutex<Option<broadcast::Receiver<Signal>>>,
}

impl RunCoordinator {
    pub fn new(settings: RunSettings) -> Self {
        let (shutdown, receiver) = broadcast::channel(16);
        Self {
            settings,
            shutdown,
            pending: std::sync::Mutex::new(Some(receiver)),
        }
    }

    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// A sender that cancels the run in progress.
    pub fn shutdown_handle(&self) -> broadcast::Sender<Signal> {
        self.shutdown.clone()
    }

    fn watch(&self) -> ShutdownWatch {
        let pending = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        ShutdownWatch::new(pending.unwrap_or_else(|| self.shutdown.subscribe()))
    }

    /// Process every message present in the source mailbox when the run
    /// starts.
    ///
    /// # Errors
    ///
    /// Only connection-level failures are errors: the mailbox or a relay
    /// connection could not be opened, or the folder could not be listed.
    /// In that case no message was touched. Per-message failures are in the
    /// returned summary.
    pub async fn run_once(
        &self,
        mailbox_connector: &dyn MailboxConnector,
        relay_connector: Arc<dyn RelayConnector>,
        rule: &RoutingRule,
    ) -> Result<RunSummary, ConnectionError> {
        let mut watch = self.watch();

        let timeout = self.settings.run_timeout.map(|limit| {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(
                    timeout_secs = limit.as_secs(),
                    "Run timeout reached, abandoning the run"
                );
                let _ = shutdown.send(Signal::Shutdown);
            })
        });

        let result = self
            .run(mailbox_connector, relay_connector, rule, &mut watch)
            .await;

        if let Some(timeout) = timeout {
            timeout.abort();
        }

        if let Ok(summary) = &result {
            info!("Run complete: {summary}");
        }
        result
    }

    async fn run(
        &self,
        mailbox_connector: &dyn MailboxConnector,
        relay_connector: Arc<dyn RelayConnector>,
        rule: &RoutingRule,
        watch: &mut ShutdownWatch,
    ) -> Result<RunSummary, ConnectionError> {
        let Some(connected) = unless_shutdown(watch, mailbox_connector.connect()).await else {
            return Ok(cancelled("connecting to the source mailbox"));
        };
        let mut mailbox = connected?;
        incoming!(level = DEBUG, "Connected to source mailbox");

        // A listing cut short leaves the session unusable, so it is dropped
        // rather than logged out.
        let Some(listed) = unless_shutdown(watch, scan::snapshot(mailbox.as_mut())).await else {
            return Ok(cancelled("listing the source mailbox"));
        };
        let ids = match listed {
            Ok(ids) => ids,
            Err(e) => {
                close_mailbox(mailbox).await;
                return Err(e);
            }
        };

        let workers = self.settings.concurrency.min(ids.len()).max(1);
        let mut relays = Vec::with_capacity(workers);
        for _ in 0..workers {
            let opened = unless_shutdown(watch, RelayHandle::open(Arc::clone(&relay_connector))).await;
            match opened {
                Some(Ok(relay)) => relays.push(relay),
                Some(Err(e)) => {
                    close_all(relays, mailbox).await;
                    return Err(e);
                }
                None => {
                    close_all(relays, mailbox).await;
                    return Ok(cancelled("connecting to the relay"));
                }
            }
        }

        let mut summary = RunSummary::default();

        if ids.is_empty() {
            internal!(level = INFO, "No messages in source mailbox");
            close_all(relays, mailbox).await;
            return Ok(summary);
        }

        if watch.is_triggered() {
            close_all(relays, mailbox).await;
            return Ok(cancelled("starting workers"));
        }

        info!(
            messages = ids.len(),
            workers = workers,
            "Relaying {} message(s) to {}",
            ids.len(),
            rule.destinations().join(", ")
        );

        let mailbox = Arc::new(Mutex::new(mailbox));
        self.dispatch(ids, rule, relays, &mailbox, watch, &mut summary)
            .await;

        match Arc::try_unwrap(mailbox) {
            Ok(mailbox) => {
                let mut mailbox = mailbox.into_inner();
                if self.settings.expunge == ExpungePolicy::PerRun {
                    expunge_run(mailbox.as_mut(), &mut summary).await;
                }
                close_mailbox(mailbox).await;
            }
            Err(_) => error!("Source mailbox still in use after all workers finished"),
        }

        Ok(summary)
    }

    /// Fan the snapshot out to one worker per relay connection and collect
    /// every outcome.
    async fn dispatch(
        &self,
        ids: Vec<MessageId>,
        rule: &RoutingRule,
        relays: Vec<RelayHandle>,
        mailbox: &Arc<Mutex<Box<dyn Mailbox>>>,
        watch: &mut ShutdownWatch,
        summary: &mut RunSummary,
    ) {
        let total = ids.len();
        let pipeline = RelayPipeline::new(
            rule.clone(),
            self.settings.retry.clone(),
            Auditor::new(self.settings.audit.clone()),
            self.settings.expunge,
        );
        let queue = Arc::new(Mutex::new(VecDeque::from(ids)));

        let mut join_set = JoinSet::new();
        for (worker, relay) in relays.into_iter().enumerate() {
            join_set.spawn(process::run_worker(
                worker,
                pipeline.clone(),
                Arc::clone(&queue),
                Arc::clone(mailbox),
                relay,
                ShutdownWatch::new(self.shutdown.subscribe()),
            ));
        }

        // A signal that landed while the workers were subscribing only
        // reached the run's own watch.
        if watch.is_triggered() {
            let _ = self.shutdown.send(Signal::Shutdown);
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((outcomes, relay)) => {
                    for outcome in outcomes {
                        summary.record(outcome);
                    }
                    relay.close().await;
                }
                Err(e) => error!(error = %e, "Relay worker terminated abnormally"),
            }
        }

        let untouched = queue.lock().await.len();
        if untouched > 0 {
            warn!(
                "{untouched} of {total} message(s) not started and left in source for the next run"
            );
        }
    }
}

/// Run `operation` unless shutdown is signalled first.
async fn unless_shutdown<F: Future>(watch: &mut ShutdownWatch, operation: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = watch.triggered() => None,
        output = operation => Some(output),
    }
}

fn cancelled(stage: &str) -> RunSummary {
    warn!("Run cancelled while {stage}, no message was touched");
    RunSummary::default()
}

async fn close_all(relays: Vec<RelayHandle>, mailbox: Box<dyn Mailbox>) {
    for relay in relays {
        relay.close().await;
    }
    close_mailbox(mailbox).await;
}

/// Issue the single end-of-run expunge. If it fails, nothing flagged this
/// run can be counted as deleted.
async fn expunge_run(mailbox: &mut dyn Mailbox, summary: &mut RunSummary) {
    if !summary.outcomes.iter().any(|o| o.deleted_from_source) {
        return;
    }

    incoming!(level = DEBUG, "Expunging messages flagged this run");
    if let Err(e) = mailbox.expunge().await {
        error!(error = %e, "End of run expunge failed, flagged messages remain in source");
        for outcome in summary.outcomes.iter_mut().filter(|o| o.deleted_from_source) {
            outcome.deleted_from_source = false;
            outcome.error = Some(MessageError::Acknowledge(e.clone()));
        }
    }
}

async fn close_mailbox(mailbox: Box<dyn Mailbox>) {
    match mailbox.disconnect().await {
        Ok(()) => incoming!(level = DEBUG, "Source mailbox connection closed"),
        Err(e) => warn!(error = %e, "Failed to close source mailbox connection cleanly"),
    }
}

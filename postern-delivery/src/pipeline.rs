//! Per-message relay pipeline
//!
//! A message moves `Queued → Fetched → Planned → Delivering` and ends either
//! `Completed` (every intent confirmed) or `PartiallyFailed`. Deleting the
//! source copy is only reachable from `Completed`.

use std::sync::Arc;

use postern_common::{audit::Auditor, incoming, internal};
use tokio::sync::Mutex;

use crate::{
    error::{MessageError, SystemError},
    message::{MessageId, SourceMessage},
    planner::{self, DeliveryIntent, RoutingRule},
    policy::RetryPolicy,
    processor::delivery::{self, IntentResult, RelayHandle},
    shutdown::ShutdownWatch,
    transport::Mailbox,
    types::{ExpungePolicy, IntentStatus, MessageOutcome, MessageState},
};

/// Mutable progress of one message through the pipeline.
#[derive(Debug)]
pub struct MessageRecord {
    id: MessageId,
    state: MessageState,
    from: Vec<String>,
    to: Vec<String>,
    destinations: Vec<String>,
    intents: Vec<DeliveryIntent>,
    error: Option<MessageError>,
    deleted: bool,
}

impl MessageRecord {
    pub const fn new(id: MessageId, destinations: Vec<String>) -> Self {
        Self {
            id,
            state: MessageState::Queued,
            from: Vec::new(),
            to: Vec::new(),
            destinations,
            intents: Vec::new(),
            error: None,
            deleted: false,
        }
    }

    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    pub const fn state(&self) -> MessageState {
        self.state
    }

    pub fn intents(&self) -> &[DeliveryIntent] {
        &self.intents
    }

    /// # Errors
    ///
    /// Returns [`SystemError::InvalidTransition`] if `next` is not reachable
    /// from the current state.
    pub fn advance(&mut self, next: MessageState) -> Result<(), SystemError> {
        if !self.state.can_transition_to(next) {
            return Err(SystemError::transition(self.state, next));
        }
        self.state = next;
        Ok(())
    }

    fn attach(&mut self, message: &SourceMessage) {
        self.from = message.original_from().to_vec();
        self.to = message.original_to().to_vec();
    }

    fn all_confirmed(&self) -> bool {
        !self.intents.is_empty()
            && self
                .intents
                .iter()
                .all(|intent| intent.status() == &IntentStatus::Confirmed)
    }

    /// Leave `Delivering` for `Completed` if every intent is confirmed, or
    /// for `PartiallyFailed` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidTransition`] outside `Delivering`.
    pub fn settle(&mut self) -> Result<(), SystemError> {
        if self.all_confirmed() {
            self.advance(MessageState::Completed)
        } else {
            self.advance(MessageState::PartiallyFailed)
        }
    }

    /// Whether the source copy may be deleted.
    pub fn may_acknowledge(&self) -> bool {
        self.state == MessageState::Completed && self.all_confirmed()
    }

    /// Record that the source copy was removed.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Internal`] unless the message is `Completed`
    /// with every intent confirmed.
    pub fn acknowledged(&mut self) -> Result<(), SystemError> {
        if !self.may_acknowledge() {
            return Err(SystemError::Internal(format!(
                "message {} acknowledged in state {:?}",
                self.id, self.state
            )));
        }
        self.deleted = true;
        Ok(())
    }

    /// Record a failure. A message that has not reached a terminal state
    /// becomes `PartiallyFailed`; the first error recorded wins.
    pub fn fail(&mut self, error: MessageError) {
        if !self.state.is_terminal() {
            self.state = MessageState::PartiallyFailed;
        }
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Abandon the message where it stands. It is never deleted afterwards.
    pub fn interrupt(&mut self) {
        self.error = Some(MessageError::Interrupted(self.state));
    }

    pub fn into_outcome(self) -> MessageOutcome {
        let all_intents_confirmed = self.all_confirmed();
        let failed_destinations = self
            .intents
            .iter()
            .filter(|intent| matches!(intent.status(), IntentStatus::Failed(_)))
            .map(|intent| intent.destination().to_string())
            .collect();

        MessageOutcome {
            source_id: self.id,
            state: self.state,
            all_intents_confirmed,
            deleted_from_source: self.deleted,
            from: self.from,
            to: self.to,
            destinations: self.destinations,
            failed_destinations,
            error: self.error,
        }
    }
}

/// Everything a worker needs to take one message from fetch to
/// acknowledgement. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RelayPipeline {
    rule: Arc<RoutingRule>,
    retry: RetryPolicy,
    auditor: Auditor,
    expunge: ExpungePolicy,
}

impl RelayPipeline {
    pub fn new(
        rule: RoutingRule,
        retry: RetryPolicy,
        auditor: Auditor,
        expunge: ExpungePolicy,
    ) -> Self {
        Self {
            rule: Arc::new(rule),
            retry,
            auditor,
            expunge,
        }
    }

    pub fn rule(&self) -> &RoutingRule {
        &self.rule
    }

    /// Process one message. Never fails: every problem ends up in the
    /// returned outcome.
    ///
    /// Shutdown is honoured between stages and while talking to the relay;
    /// mailbox commands are never cut short.
    pub async fn process(
        &self,
        id: MessageId,
        mailbox: &Mutex<Box<dyn Mailbox>>,
        relay: &mut RelayHandle,
        shutdown: &mut ShutdownWatch,
    ) -> MessageOutcome {
        let mut record = MessageRecord::new(id, self.rule.destinations().to_vec());

        match self.drive(&mut record, mailbox, relay, shutdown).await {
            Ok(()) => {}
            Err(MessageError::Interrupted(_)) => record.interrupt(),
            Err(error) => record.fail(error),
        }

        record.into_outcome()
    }

    async fn drive(
        &self,
        record: &mut MessageRecord,
        mailbox: &Mutex<Box<dyn Mailbox>>,
        relay: &mut RelayHandle,
        shutdown: &mut ShutdownWatch,
    ) -> Result<(), MessageError> {
        if shutdown.is_triggered() {
            return Err(MessageError::Interrupted(record.state()));
        }

        let raw = {
            let mut mailbox = mailbox.lock().await;
            incoming!(id = record.id(), "Fetching message");
            mailbox
                .fetch_raw(record.id())
                .await
                .map_err(MessageError::Fetch)?
        };
        record.advance(MessageState::Fetched)?;

        let size = raw.len();
        let message = SourceMessage::parse(record.id().clone(), raw)?;
        record.attach(&message);
        self.auditor.message_fetched(
            record.id().as_str(),
            message.original_from(),
            message.original_to(),
            size,
        );

        record.intents = planner::plan(&message, &self.rule)?;
        record.advance(MessageState::Planned)?;
        record.advance(MessageState::Delivering)?;

        let mut first_failure = None;
        for intent in &mut record.intents {
            match delivery::deliver_intent(
                intent,
                relay,
                self.rule.sender(),
                &self.retry,
                &self.auditor,
                shutdown,
            )
            .await?
            {
                IntentResult::Confirmed => {}
                IntentResult::Failed(error) => {
                    first_failure.get_or_insert_with(|| MessageError::Delivery {
                        destination: intent.destination().to_string(),
                        error,
                    });
                }
                IntentResult::Interrupted => {
                    return Err(MessageError::Interrupted(MessageState::Delivering));
                }
            }
        }

        record.settle()?;
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        self.acknowledge(record, mailbox).await
    }

    /// Flag the source copy deleted and, per message, expunge it.
    async fn acknowledge(
        &self,
        record: &mut MessageRecord,
        mailbox: &Mutex<Box<dyn Mailbox>>,
    ) -> Result<(), MessageError> {
        if !record.may_acknowledge() {
            return Err(SystemError::Internal(format!(
                "message {} is not ready to acknowledge in state {:?}",
                record.id(),
                record.state()
            ))
            .into());
        }

        let expunge = self.expunge == ExpungePolicy::PerMessage;
        {
            let mut mailbox = mailbox.lock().await;
            incoming!(id = record.id(), "Flagging message as deleted");
            mailbox
                .mark_deleted(record.id())
                .await
                .map_err(MessageError::Acknowledge)?;

            if expunge {
                mailbox.expunge().await.map_err(MessageError::Acknowledge)?;
            }
        }

        record.acknowledged()?;
        self.auditor.message_acknowledged(record.id().as_str(), expunge);
        internal!(id = record.id(), "Message removed from source");

        Ok(())
    }
}

//! Delivery planning
//!
//! Turns a fetched message and a routing rule into one delivery intent per
//! destination, each carrying its own rewritten copy of the content.

use std::{sync::Arc, time::SystemTime};

use crate::{
    error::{MalformedMessage, RuleError, SystemError},
    headers,
    message::{MessageId, SourceMessage},
    types::{DeliveryAttempt, IntentStatus},
};

/// Where every message of a run goes, and who it is relayed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    destinations: Vec<String>,
    sender: String,
}

impl RoutingRule {
    /// # Errors
    ///
    /// Fails if `destinations` is empty or any address is not a plausible
    /// mailbox address.
    pub fn new(destinations: Vec<String>, sender: impl Into<String>) -> Result<Self, RuleError> {
        let sender = sender.into();

        if destinations.is_empty() {
            return Err(RuleError::NoDestinations);
        }

        if let Some(bad) = destinations.iter().find(|d| !is_plausible_address(d)) {
            return Err(RuleError::InvalidDestination(bad.clone()));
        }

        if !is_plausible_address(&sender) {
            return Err(RuleError::InvalidSender(sender));
        }

        Ok(Self {
            destinations,
            sender,
        })
    }

    #[must_use]
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }
}

/// `local@domain` with both sides present and nothing that could break out
/// of a header line.
fn is_plausible_address(address: &str) -> bool {
    if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }

    address
        .rsplit_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
}

/// A planned, trackable unit of delivery work for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryIntent {
    source_id: MessageId,
    destination: String,
    content: Arc<[u8]>,
    status: IntentStatus,
    attempts: Vec<DeliveryAttempt>,
}

impl DeliveryIntent {
    #[must_use]
    pub const fn source_id(&self) -> &MessageId {
        &self.source_id
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Rewritten content to hand to the relay.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[must_use]
    pub const fn status(&self) -> &IntentStatus {
        &self.status
    }

    #[must_use]
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        &self.attempts
    }

    /// Number of attempts recorded so far.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Record the result of an attempt.
    pub fn record_attempt(&mut self, error: Option<String>) {
        let attempt = self.attempt_count().saturating_add(1);
        self.attempts.push(DeliveryAttempt {
            attempt,
            timestamp: SystemTime::now(),
            error,
        });
    }

    fn transition(&mut self, next: IntentStatus) -> Result<(), SystemError> {
        if !self.status.can_transition_to(&next) {
            return Err(SystemError::transition(&self.status, &next));
        }
        self.status = next;
        Ok(())
    }

    /// `Pending → Sent`, taken just before the relay is called.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidTransition`] if the intent is not pending.
    pub fn mark_sent(&mut self) -> Result<(), SystemError> {
        self.transition(IntentStatus::Sent)
    }

    /// `Sent → Confirmed`, once the relay accepted the message.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidTransition`] if the intent was not sent.
    pub fn confirm(&mut self) -> Result<(), SystemError> {
        self.transition(IntentStatus::Confirmed)
    }

    /// `Sent → Pending`, ahead of a retry.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidTransition`] if the intent was not sent.
    pub fn requeue(&mut self) -> Result<(), SystemError> {
        self.transition(IntentStatus::Pending)
    }

    /// Give up on this destination.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidTransition`] if the intent already
    /// reached a terminal status.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), SystemError> {
        self.transition(IntentStatus::Failed(reason.into()))
    }
}

/// Plan one `Pending` intent per destination of `rule`, in rule order.
///
/// The order carries no meaning for delivery; intents are independent.
///
/// # Errors
///
/// Returns [`MalformedMessage`] if the message cannot be rewritten.
pub fn plan(
    message: &SourceMessage,
    rule: &RoutingRule,
) -> Result<Vec<DeliveryIntent>, MalformedMessage> {
    rule.destinations()
        .iter()
        .map(|destination| {
            let content = headers::rewrite(message, destination, rule.sender())?;
            Ok(DeliveryIntent {
                source_id: message.id().clone(),
                destination: destination.clone(),
                content: Arc::from(content),
                status: IntentStatus::Pending,
                attempts: Vec::new(),
            })
        })
        .collect()
}

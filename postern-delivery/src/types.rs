//! Type definitions for the relay pipeline

use std::{
    fmt::{self, Display, Formatter},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::{error::MessageError, message::MessageId};

/// Lifecycle of a single delivery intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentStatus {
    /// Planned, not yet handed to the relay
    Pending,
    /// Handed to the relay, reply not yet interpreted
    Sent,
    /// The relay accepted the message
    Confirmed,
    /// Gave up on this destination
    Failed(String),
}

impl IntentStatus {
    /// Whether moving to `next` is allowed.
    ///
    /// `Sent → Pending` is the requeue taken before a retry.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Sent, Self::Failed(_))
                | (Self::Pending, Self::Sent)
                | (Self::Sent, Self::Confirmed | Self::Pending)
        )
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed(_))
    }
}

/// One attempt at handing an intent to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    pub timestamp: SystemTime,
    /// `None` when the relay accepted the message
    pub error: Option<String>,
}

/// Lifecycle of a source message within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Id known from the snapshot, not yet fetched
    Queued,
    Fetched,
    Planned,
    Delivering,
    /// Every intent confirmed
    Completed,
    /// At least one intent failed, or the message never got that far
    PartiallyFailed,
}

impl MessageState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Fetched)
                | (Self::Fetched, Self::Planned)
                | (Self::Planned, Self::Delivering)
                | (Self::Delivering, Self::Completed)
                | (
                    Self::Queued | Self::Fetched | Self::Planned | Self::Delivering,
                    Self::PartiallyFailed
                )
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed)
    }
}

impl Display for MessageState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// When flagged messages are expunged from the source mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpungePolicy {
    /// Expunge straight after each message is flagged deleted
    #[default]
    PerMessage,
    /// Flag as the run goes, expunge once after every worker has finished
    PerRun,
}

/// Final, immutable result of processing one source message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    pub source_id: MessageId,
    /// Terminal state, or the state an interrupted message was abandoned in
    pub state: MessageState,
    pub all_intents_confirmed: bool,
    pub deleted_from_source: bool,
    /// Original `From` addresses, empty if the message was never fetched
    pub from: Vec<String>,
    /// Original `To` addresses, empty if the message was never fetched
    pub to: Vec<String>,
    pub destinations: Vec<String>,
    /// Destinations whose intent ended `Failed`
    pub failed_destinations: Vec<String>,
    pub error: Option<MessageError>,
}

impl MessageOutcome {
    /// Whether the message was abandoned by cancellation.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.error, Some(MessageError::Interrupted(_)))
    }
}

/// Counters for one run, plus every message outcome in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub completed: usize,
    pub partially_failed: usize,
    /// Abandoned by cancellation, always retained in the source
    pub interrupted: usize,
    pub outcomes: Vec<MessageOutcome>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: MessageOutcome) {
        if outcome.is_interrupted() {
            self.interrupted += 1;
        } else {
            self.processed += 1;
            match outcome.state {
                MessageState::Completed => self.completed += 1,
                _ => self.partially_failed += 1,
            }
        }
        self.outcomes.push(outcome);
    }

    /// Whether any message ended `PartiallyFailed`.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.partially_failed > 0
    }

    /// Outcome recorded for `id`, if it was processed.
    #[must_use]
    pub fn outcome(&self, id: &MessageId) -> Option<&MessageOutcome> {
        self.outcomes.iter().find(|o| &o.source_id == id)
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} completed={} partially_failed={} interrupted={}",
            self.processed, self.completed, self.partially_failed, self.interrupted
        )
    }
}

//! Relay pipeline: moves every message of a source mailbox to a fixed set
//! of destinations through an authenticated relay
//!
//! This crate provides functionality to:
//! - Parse fetched messages and rewrite their `To` and `Sender` headers
//! - Plan one delivery intent per destination
//! - Deliver intents with retries and exponential backoff
//! - Remove a source message only once every destination confirmed it
//! - Drain a mailbox with a bounded pool of workers

mod error;
pub mod headers;
mod message;
mod pipeline;
mod planner;
pub mod policy;
mod processor;
mod shutdown;
pub mod transport;
mod types;

// Re-export error types
pub use error::{
    ConnectionError, DeliveryError, MailboxError, MalformedMessage, MessageError, PermanentError,
    RuleError, SystemError, TemporaryError,
};
// Re-export the message model
pub use message::{MessageId, SourceMessage};
pub use pipeline::{MessageRecord, RelayPipeline};
pub use planner::{DeliveryIntent, RoutingRule, plan};
pub use policy::RetryPolicy;
// Re-export core types
pub use processor::{
    RunCoordinator, RunSettings,
    delivery::{IntentResult, RelayHandle, deliver_intent},
    process::report,
};
pub use shutdown::ShutdownWatch;
pub use types::{
    DeliveryAttempt, ExpungePolicy, IntentStatus, MessageOutcome, MessageState, RunSummary,
};

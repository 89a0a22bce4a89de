//! Worker loop and per-message reporting

use std::{collections::VecDeque, sync::Arc};

use postern_common::{
    internal,
    tracing::{error, info, warn},
};
use tokio::sync::Mutex;

use crate::{
    error::MessageError,
    message::MessageId,
    pipeline::RelayPipeline,
    processor::delivery::RelayHandle,
    shutdown::ShutdownWatch,
    transport::Mailbox,
    types::{MessageOutcome, MessageState},
};

/// Pull ids off the shared queue until it is empty or shutdown is
/// signalled, processing each one to an outcome.
///
/// Hands the relay connection back so the coordinator can close it.
pub async fn run_worker(
    worker: usize,
    pipeline: RelayPipeline,
    queue: Arc<Mutex<VecDeque<MessageId>>>,
    mailbox: Arc<Mutex<Box<dyn Mailbox>>>,
    mut relay: RelayHandle,
    mut shutdown: ShutdownWatch,
) -> (Vec<MessageOutcome>, RelayHandle) {
    let mut outcomes = Vec::new();

    loop {
        if shutdown.is_triggered() {
            internal!(level = DEBUG, "Worker {} stopping on shutdown", worker);
            break;
        }

        let Some(id) = queue.lock().await.pop_front() else {
            break;
        };

        internal!(id = id, "Picked up by worker {}", worker);
        let outcome = pipeline.process(id, &mailbox, &mut relay, &mut shutdown).await;
        report(&outcome);
        outcomes.push(outcome);
    }

    (outcomes, relay)
}

/// Emit the user-facing line for one message.
pub fn report(outcome: &MessageOutcome) {
    let from = outcome.from.join(", ");
    let to = outcome.to.join(", ");
    let destinations = outcome.destinations.join(", ");

    match (outcome.state, &outcome.error) {
        (state, Some(MessageError::Interrupted(_))) => {
            warn!(
                message_id = %outcome.source_id,
                "Message {} interrupted while {state}, left in source",
                outcome.source_id
            );
        }
        (MessageState::Completed, None) => {
            info!(
                message_id = %outcome.source_id,
                "Email from {from} to {to} copied to {destinations} and deleted"
            );
        }
        (MessageState::Completed, Some(err)) => {
            warn!(
                message_id = %outcome.source_id,
                kind = err.kind(),
                "Email from {from} to {to} copied to {destinations} but not deleted: {err}"
            );
        }
        (_, err) => {
            let kind = err.as_ref().map_or("PartiallyFailed", MessageError::kind);
            let reason = err
                .as_ref()
                .map_or_else(|| "not every destination confirmed".to_string(), ToString::to_string);
            error!(
                message_id = %outcome.source_id,
                kind = kind,
                failed = ?outcome.failed_destinations,
                "Message {} failed with {kind}: {reason}",
                outcome.source_id
            );
        }
    }
}

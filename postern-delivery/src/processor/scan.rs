//! Snapshot of the source folder at the start of a run

use postern_common::incoming;

use crate::{error::ConnectionError, message::MessageId, transport::Mailbox};

/// List the messages to process this run, in ascending id order with
/// duplicates removed.
///
/// The folder is read once; messages arriving later wait for the next run.
///
/// # Errors
///
/// A listing failure is reported as [`ConnectionError::Mailbox`]: without a
/// snapshot there is nothing the run can do.
pub async fn snapshot(mailbox: &mut dyn Mailbox) -> Result<Vec<MessageId>, ConnectionError> {
    let mut ids = mailbox
        .list_message_ids()
        .await
        .map_err(|e| ConnectionError::Mailbox(e.to_string()))?;

    ids.sort_unstable_by(|a, b| natural_order(a.as_str(), b.as_str()));
    ids.dedup();

    incoming!(level = DEBUG, "Source folder holds {} message(s)", ids.len());
    Ok(ids)
}

/// Numeric ids compare as numbers, anything else falls back to text.
fn natural_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

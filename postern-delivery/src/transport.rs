//! Seams to the two protocol endpoints of a run.
//!
//! The pipeline only ever talks to a source mailbox and a relay through
//! these traits; the wire protocols live behind them.

use async_trait::async_trait;

use crate::{
    error::{ConnectionError, DeliveryError, MailboxError},
    message::MessageId,
};

/// Opens authenticated sessions on the source mailbox.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConnectionError::Mailbox`] if the mailbox is unreachable,
    /// refuses the credentials or the folder cannot be selected.
    async fn connect(&self) -> Result<Box<dyn Mailbox>, ConnectionError>;
}

/// An open session on the source mailbox with its folder selected.
///
/// One operation is in flight at a time; callers sharing a session
/// serialise access themselves.
#[async_trait]
pub trait Mailbox: Send {
    /// Ids of every message currently in the folder.
    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError>;

    /// Full raw RFC 822 content of a message, without marking it seen.
    async fn fetch_raw(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError>;

    /// Flag a message for deletion.
    async fn mark_deleted(&mut self, id: &MessageId) -> Result<(), MailboxError>;

    /// Permanently remove every message flagged for deletion.
    async fn expunge(&mut self) -> Result<(), MailboxError>;

    async fn disconnect(self: Box<Self>) -> Result<(), MailboxError>;
}

/// Opens authenticated sessions on the relay.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConnectionError::Relay`] if the relay is unreachable or
    /// refuses the connection.
    async fn connect(&self) -> Result<Box<dyn Relay>, ConnectionError>;
}

/// An open session on the relay.
#[async_trait]
pub trait Relay: Send {
    /// Submit `content` for `envelope_to`, with `envelope_from` as the
    /// envelope sender. `Ok` means the relay accepted responsibility for it.
    async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        content: &[u8],
    ) -> Result<(), DeliveryError>;

    async fn disconnect(self: Box<Self>) -> Result<(), DeliveryError>;
}

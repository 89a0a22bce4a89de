//! Source mailbox over IMAP with implicit TLS.
//!
//! Messages are addressed by UID so that ids stay valid while other
//! messages are expunged during the run. Content is fetched with
//! `BODY.PEEK[]`, which leaves the `\Seen` flag alone.

use std::{fmt, time::Duration};

use async_imap::{Client, Session, types::Fetch};
use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use postern_common::{Secret, incoming};
use postern_delivery::{
    ConnectionError, MailboxError, MessageId,
    transport::{Mailbox, MailboxConnector},
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::bounded;

/// A byte stream an IMAP session can run over.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send + 'static {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send + 'static {}

mod defaults {
    pub const fn port() -> u16 {
        993
    }

    pub fn folder() -> String {
        String::from("INBOX")
    }

    pub const fn timeout_secs() -> u64 {
        60
    }
}

/// Where and as whom to read the source mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImapSettings {
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    pub user: String,
    pub password: Secret,
    #[serde(default = "defaults::folder")]
    pub folder: String,
    /// Applies to connecting and to every command afterwards.
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl ImapSettings {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ImapConnector {
    settings: ImapSettings,
}

impl ImapConnector {
    pub const fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }

    pub const fn settings(&self) -> &ImapSettings {
        &self.settings
    }

    async fn open(&self) -> Result<ImapMailbox, String> {
        let settings = &self.settings;

        let tcp = TcpStream::connect((settings.host.as_str(), settings.port))
            .await
            .map_err(|e| {
                format!(
                    "TCP connection to {}:{} failed: {e}",
                    settings.host, settings.port
                )
            })?;

        let tls = TlsConnector::new()
            .connect(&settings.host, tcp)
            .await
            .map_err(|e| format!("TLS handshake failed: {e}"))?;

        ImapMailbox::login(tls, settings).await
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn Mailbox>, ConnectionError> {
        incoming!(
            level = DEBUG,
            "Connecting to {}:{} as {}",
            self.settings.host,
            self.settings.port,
            self.settings.user
        );

        let limit = self.settings.timeout();
        let mailbox = match tokio::time::timeout(limit, self.open()).await {
            Ok(Ok(mailbox)) => mailbox,
            Ok(Err(reason)) => return Err(ConnectionError::Mailbox(reason)),
            Err(_) => {
                return Err(ConnectionError::Mailbox(format!(
                    "{}:{} did not complete login within {limit:?}",
                    self.settings.host, self.settings.port
                )));
            }
        };

        incoming!(level = DEBUG, "Selected folder {}", self.settings.folder);

        Ok(Box::new(mailbox))
    }
}

/// A logged-in session with the source folder selected.
pub struct ImapMailbox<T: ImapStream = TlsStream<TcpStream>> {
    session: Session<T>,
    timeout: Duration,
}

impl<T: ImapStream> ImapMailbox<T> {
    /// Log in over an established stream and select the configured folder.
    ///
    /// No timeout applies here; [`ImapConnector`] bounds the whole of
    /// connecting and logging in.
    pub async fn login(stream: T, settings: &ImapSettings) -> Result<Self, String> {
        let mut session = Client::new(stream)
            .login(&settings.user, settings.password.expose())
            .await
            .map_err(|(e, _)| format!("Login as {} failed: {e}", settings.user))?;

        session
            .select(&settings.folder)
            .await
            .map_err(|e| format!("SELECT {} failed: {e}", settings.folder))?;

        Ok(Self {
            session,
            timeout: settings.timeout(),
        })
    }
}

impl<T: ImapStream> fmt::Debug for ImapMailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Message ids handed out by this adapter are UIDs.
fn uid(id: &MessageId) -> Result<u32, String> {
    id.as_str()
        .parse()
        .map_err(|_| format!("{id:?} is not an IMAP UID"))
}

#[async_trait]
impl<T: ImapStream> Mailbox for ImapMailbox<T> {
    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        let session = &mut self.session;
        let uids = bounded(self.timeout, session.uid_search("ALL"))
            .await
            .map_err(MailboxError::List)?;

        Ok(uids.into_iter().map(MessageId::from).collect())
    }

    async fn fetch_raw(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError> {
        let fail = |reason| MailboxError::Fetch {
            id: id.clone(),
            reason,
        };
        let uid = uid(id).map_err(fail)?;

        let session = &mut self.session;
        let fetches: Vec<Fetch> = bounded(self.timeout, async move {
            session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await?
                .try_collect()
                .await
        })
        .await
        .map_err(fail)?;

        fetches
            .iter()
            .find_map(Fetch::body)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| fail(String::from("no such message")))
    }

    async fn mark_deleted(&mut self, id: &MessageId) -> Result<(), MailboxError> {
        let fail = |reason| MailboxError::Store {
            id: id.clone(),
            reason,
        };
        let uid = uid(id).map_err(fail)?;

        let session = &mut self.session;
        bounded(self.timeout, async move {
            session
                .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .map_err(fail)?;

        Ok(())
    }

    async fn expunge(&mut self) -> Result<(), MailboxError> {
        let session = &mut self.session;
        let expunged = bounded(self.timeout, async move {
            session.expunge().await?.try_collect::<Vec<_>>().await
        })
        .await
        .map_err(MailboxError::Expunge)?;

        incoming!(level = DEBUG, "Expunged {} message(s)", expunged.len());
        Ok(())
    }

    async fn disconnect(mut self: Box<Self>) -> Result<(), MailboxError> {
        bounded(self.timeout, self.session.logout())
            .await
            .map_err(MailboxError::Disconnect)
    }
}

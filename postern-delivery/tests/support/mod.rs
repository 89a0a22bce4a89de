//! Scripted in-memory mailbox and relay for exercising whole runs
//!
//! Both doubles keep their state behind an `Arc<Mutex<_>>` shared between
//! the connector handed to the coordinator and the test, so a test can
//! script failures up front and inspect what happened afterwards.
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use postern_delivery::{
    ConnectionError, DeliveryError, MailboxError, MessageId, PermanentError, RetryPolicy,
    RoutingRule, TemporaryError,
    transport::{Mailbox, MailboxConnector, Relay, RelayConnector},
};

/// Build a CRLF message with the given `From` and `To` headers.
pub fn message(from: &str, to: &str, subject: &str) -> String {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMessage-ID: <{subject}@test>\r\n\r\nHello from {from}\r\n"
    )
}

pub fn rule(destinations: &[&str]) -> RoutingRule {
    RoutingRule::new(
        destinations.iter().map(ToString::to_string).collect(),
        "me@gmail.com",
    )
    .unwrap()
}

/// Retry policy with millisecond backoff and no jitter.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter_factor: 0.0,
    }
}

#[derive(Debug, Default)]
pub struct MailboxState {
    pub messages: BTreeMap<u32, Vec<u8>>,
    pub flagged: BTreeSet<u32>,
    pub expunge_calls: usize,
    pub fetched: Vec<u32>,
    pub connects: usize,
    pub disconnects: usize,

    /// Login takes this long before the session is handed out
    pub connect_delay: Option<Duration>,
    pub refuse_connect: bool,
    pub fail_list: bool,
    pub fail_fetch: HashSet<u32>,
    pub fail_store: bool,
    pub fail_expunge: bool,
}

/// Source mailbox keyed by numeric UID.
#[derive(Debug, Clone, Default)]
pub struct ScriptedMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl ScriptedMailbox {
    pub fn with_messages<S: AsRef<[u8]>>(messages: &[(u32, S)]) -> Self {
        let mailbox = Self::default();
        mailbox.state().messages = messages
            .iter()
            .map(|(uid, raw)| (*uid, raw.as_ref().to_vec()))
            .collect();
        mailbox
    }

    pub fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }

    /// UIDs still present (flagged or not).
    pub fn remaining(&self) -> Vec<u32> {
        self.state().messages.keys().copied().collect()
    }
}

#[async_trait]
impl MailboxConnector for ScriptedMailbox {
    async fn connect(&self) -> Result<Box<dyn Mailbox>, ConnectionError> {
        let delay = self.state().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.refuse_connect {
            return Err(ConnectionError::Mailbox(
                "LOGIN failed: authentication failed".to_string(),
            ));
        }
        state.connects += 1;

        Ok(Box::new(MailboxSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MailboxSession {
    state: Arc<Mutex<MailboxState>>,
}

fn uid(id: &MessageId) -> u32 {
    id.as_str().parse().unwrap()
}

#[async_trait]
impl Mailbox for MailboxSession {
    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(MailboxError::List("SEARCH failed".to_string()));
        }
        Ok(state.messages.keys().copied().map(MessageId::from).collect())
    }

    async fn fetch_raw(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError> {
        let mut state = self.state.lock().unwrap();
        let uid = uid(id);
        state.fetched.push(uid);

        if state.fail_fetch.contains(&uid) {
            return Err(MailboxError::Fetch {
                id: id.clone(),
                reason: "FETCH failed".to_string(),
            });
        }

        state
            .messages
            .get(&uid)
            .cloned()
            .ok_or_else(|| MailboxError::Fetch {
                id: id.clone(),
                reason: "no such message".to_string(),
            })
    }

    async fn mark_deleted(&mut self, id: &MessageId) -> Result<(), MailboxError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_store {
            return Err(MailboxError::Store {
                id: id.clone(),
                reason: "STORE failed".to_string(),
            });
        }
        state.flagged.insert(uid(id));
        Ok(())
    }

    async fn expunge(&mut self) -> Result<(), MailboxError> {
        let mut state = self.state.lock().unwrap();
        state.expunge_calls += 1;
        if state.fail_expunge {
            return Err(MailboxError::Expunge("EXPUNGE failed".to_string()));
        }

        let flagged = std::mem::take(&mut state.flagged);
        for uid in flagged {
            state.messages.remove(&uid);
        }
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), MailboxError> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

/// How the relay answers one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    /// 5xx style rejection
    Reject,
    /// 4xx style deferral, connection stays up
    Defer,
    /// Connection dropped mid-transaction
    Drop,
    /// Never answers
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub envelope_from: String,
    pub envelope_to: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RelayState {
    /// Messages the relay accepted
    pub accepted: Vec<Sent>,
    /// Every send, whatever the reply
    pub attempts: Vec<String>,
    pub connects: usize,
    pub disconnects: usize,

    pub refuse_connect: bool,
    /// Replies per destination, consumed in order; `Accept` once exhausted
    pub scripts: HashMap<String, VecDeque<Reply>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedRelay {
    state: Arc<Mutex<RelayState>>,
}

impl ScriptedRelay {
    pub fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap()
    }

    #[must_use]
    pub fn script(self, destination: &str, replies: &[Reply]) -> Self {
        self.state()
            .scripts
            .insert(destination.to_string(), replies.iter().copied().collect());
        self
    }

    pub fn accepted_for(&self, destination: &str) -> Vec<Sent> {
        self.state()
            .accepted
            .iter()
            .filter(|sent| sent.envelope_to == destination)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RelayConnector for ScriptedRelay {
    async fn connect(&self) -> Result<Box<dyn Relay>, ConnectionError> {
        let mut state = self.state();
        if state.refuse_connect {
            return Err(ConnectionError::Relay(
                "535 authentication credentials invalid".to_string(),
            ));
        }
        state.connects += 1;

        Ok(Box::new(RelaySession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct RelaySession {
    state: Arc<Mutex<RelayState>>,
}

#[async_trait]
impl Relay for RelaySession {
    async fn send(
        &mut self,
        envelope_from: &str,
        envelope_to: &str,
        content: &[u8],
    ) -> Result<(), DeliveryError> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(envelope_to.to_string());
            let reply = state
                .scripts
                .get_mut(envelope_to)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Reply::Accept);

            if reply == Reply::Accept {
                state.accepted.push(Sent {
                    envelope_from: envelope_from.to_string(),
                    envelope_to: envelope_to.to_string(),
                    content: content.to_vec(),
                });
            }
            reply
        };

        match reply {
            Reply::Accept => Ok(()),
            Reply::Reject => Err(PermanentError::InvalidRecipient(format!(
                "550 5.1.1 <{envelope_to}>: user unknown"
            ))
            .into()),
            Reply::Defer => {
                Err(TemporaryError::SmtpTemporary("451 4.3.0 try again later".to_string()).into())
            }
            Reply::Drop => {
                Err(TemporaryError::ConnectionLost("connection reset by peer".to_string()).into())
            }
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(self: Box<Self>) -> Result<(), DeliveryError> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

//! Fetched source messages

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use mailparse::{MailAddr, MailHeaderMap};
use serde::{Deserialize, Serialize};

use crate::{error::MalformedMessage, headers::HeaderBlock};

/// Opaque identifier the source mailbox assigns to a message.
///
/// Unique and stable for the duration of a run, nothing more is assumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u32> for MessageId {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

/// A message as fetched from the source mailbox.
///
/// Read-only once built: rewriting produces new content and never touches
/// `raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    id: MessageId,
    raw: Arc<[u8]>,
    original_from: Vec<String>,
    original_to: Vec<String>,
}

impl SourceMessage {
    /// Parse raw RFC 822 content fetched for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessage`] if the header block is not structurally
    /// valid.
    pub fn parse(id: MessageId, raw: impl Into<Arc<[u8]>>) -> Result<Self, MalformedMessage> {
        let raw = raw.into();

        HeaderBlock::parse(&raw)?;
        let (headers, _) = mailparse::parse_headers(&raw)
            .map_err(|e| MalformedMessage(format!("unparseable header block: {e}")))?;

        let original_from = addresses(&headers.get_all_headers("From"));
        let original_to = addresses(&headers.get_all_headers("To"));

        Ok(Self {
            id,
            raw,
            original_from,
            original_to,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Addresses from every `From` header, in order.
    #[must_use]
    pub fn original_from(&self) -> &[String] {
        &self.original_from
    }

    /// Addresses from every `To` header, in order.
    #[must_use]
    pub fn original_to(&self) -> &[String] {
        &self.original_to
    }
}

/// Flatten address headers into bare addresses, keeping the raw header
/// value when it does not parse as an address list.
fn addresses(headers: &[&mailparse::MailHeader<'_>]) -> Vec<String> {
    let mut out = Vec::new();

    for header in headers {
        match mailparse::addrparse_header(header) {
            Ok(list) => {
                for addr in list.iter() {
                    match addr {
                        MailAddr::Single(single) => out.push(single.addr.clone()),
                        MailAddr::Group(group) => {
                            out.extend(group.addrs.iter().map(|single| single.addr.clone()));
                        }
                    }
                }
            }
            Err(_) => {
                let value = header.get_value();
                let value = value.trim();
                if !value.is_empty() {
                    out.push(value.to_string());
                }
            }
        }
    }

    out
}

//! Header rewriting
//!
//! Rewrites only the fields a relay needs to change and leaves every other
//! byte of the message alone, including folding and the body. Parsing is
//! deliberately shallow: a field is its name plus every continuation line
//! that follows it.

use std::borrow::Cow;

use crate::{error::MalformedMessage, message::SourceMessage};

/// Line terminator convention of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Crlf,
    Lf,
}

impl LineEnding {
    /// Detect the convention from the first line terminator. Content with no
    /// terminator at all is treated as CRLF, the wire convention.
    fn detect(raw: &[u8]) -> Self {
        match raw.iter().position(|&b| b == b'\n') {
            Some(idx) if idx > 0 && raw[idx - 1] == b'\r' => Self::Crlf,
            Some(_) => Self::Lf,
            None => Self::Crlf,
        }
    }

    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Crlf => b"\r\n",
            Self::Lf => b"\n",
        }
    }
}

#[derive(Debug, Clone)]
struct Field<'a> {
    name: Cow<'a, str>,
    raw: Cow<'a, [u8]>,
}

/// The header block of a message, split into fields, plus everything after
/// it (the blank separator line and the body) kept verbatim.
#[derive(Debug, Clone)]
pub struct HeaderBlock<'a> {
    fields: Vec<Field<'a>>,
    rest: &'a [u8],
    line_ending: LineEnding,
}

impl<'a> HeaderBlock<'a> {
    /// Split `raw` into header fields.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessage`] when the content is empty, starts with a
    /// continuation line, or has a header line without a valid field name
    /// followed by `:`.
    pub fn parse(raw: &'a [u8]) -> Result<Self, MalformedMessage> {
        if raw.is_empty() {
            return Err(MalformedMessage("empty message".to_string()));
        }

        let line_ending = LineEnding::detect(raw);
        let mut fields: Vec<Field<'a>> = Vec::new();
        let mut field_start = 0;
        let mut pos = 0;
        let mut rest: &'a [u8] = &[];

        while pos < raw.len() {
            let end = raw[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(raw.len(), |idx| pos + idx + 1);
            let content = trim_line_ending(&raw[pos..end]);

            if content.is_empty() {
                rest = &raw[pos..];
                break;
            }

            if matches!(content[0], b' ' | b'\t') {
                let Some(last) = fields.last_mut() else {
                    return Err(MalformedMessage(
                        "header block starts with a continuation line".to_string(),
                    ));
                };
                last.raw = Cow::Borrowed(&raw[field_start..end]);
            } else {
                let name = field_name(content)?;
                field_start = pos;
                fields.push(Field {
                    name: Cow::Borrowed(name),
                    raw: Cow::Borrowed(&raw[pos..end]),
                });
            }

            pos = end;
        }

        // A header block cut off at EOF without a terminator still needs one
        // before anything can be appended after it.
        if let Some(last) = fields.last_mut()
            && !last.raw.ends_with(b"\n")
        {
            let mut owned = last.raw.to_vec();
            owned.extend_from_slice(line_ending.as_bytes());
            last.raw = Cow::Owned(owned);
        }

        Ok(Self {
            fields,
            rest,
            line_ending,
        })
    }

    #[must_use]
    pub const fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Field names in order, as they appear in the message.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_ref())
    }

    /// Set `name` to `value`.
    ///
    /// Names match case-insensitively. The first existing occurrence is
    /// replaced in place and any later ones are dropped; a missing field is
    /// appended to the end of the header block.
    pub fn upsert(&mut self, name: &str, value: &str) {
        let mut raw = Vec::with_capacity(name.len() + value.len() + 4);
        raw.extend_from_slice(name.as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(self.line_ending.as_bytes());

        let field = Field {
            name: Cow::Owned(name.to_string()),
            raw: Cow::Owned(raw),
        };

        let Some(first) = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
        else {
            self.fields.push(field);
            return;
        };

        self.fields[first] = field;

        let mut idx = 0;
        self.fields.retain(|f| {
            let keep = idx <= first || !f.name.eq_ignore_ascii_case(name);
            idx += 1;
            keep
        });
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = self.fields.iter().map(|f| f.raw.len()).sum::<usize>() + self.rest.len();
        let mut out = Vec::with_capacity(size);
        for field in &self.fields {
            out.extend_from_slice(&field.raw);
        }
        out.extend_from_slice(self.rest);
        out
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line)
}

/// Field name of a header line: printable US-ASCII up to the `:`, with
/// obsolete whitespace before the colon tolerated.
fn field_name(line: &[u8]) -> Result<&str, MalformedMessage> {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return Err(MalformedMessage(
            "header line without ':' delimiter".to_string(),
        ));
    };

    let name = line[..colon].trim_ascii_end();
    if name.is_empty() || !name.iter().all(|&b| (33..=126).contains(&b)) {
        return Err(MalformedMessage(format!(
            "invalid header field name {:?}",
            String::from_utf8_lossy(&line[..colon])
        )));
    }

    std::str::from_utf8(name)
        .map_err(|_| MalformedMessage("invalid header field name".to_string()))
}

/// Produce the content to relay to `destination`: `To` set to the
/// destination and `Sender` set to `sender`, everything else untouched.
///
/// # Errors
///
/// Returns [`MalformedMessage`] if the message's header block cannot be
/// split into fields.
pub fn rewrite(
    message: &SourceMessage,
    destination: &str,
    sender: &str,
) -> Result<Vec<u8>, MalformedMessage> {
    rewrite_raw(message.raw(), destination, sender)
}

/// [`rewrite`] on raw content.
///
/// # Errors
///
/// Returns [`MalformedMessage`] if the header block cannot be split into
/// fields.
pub fn rewrite_raw(
    raw: &[u8],
    destination: &str,
    sender: &str,
) -> Result<Vec<u8>, MalformedMessage> {
    let mut headers = HeaderBlock::parse(raw)?;
    headers.upsert("To", destination);
    headers.upsert("Sender", sender);
    Ok(headers.to_bytes())
}

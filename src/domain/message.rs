use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::mail::decoders::{self, ParsedBody};

/// Proxy-assigned message token. The client never orders by it; it is only echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Uid {
    Number(u64),
    Text(String),
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uid::Number(n) => n.fmt(f),
            Uid::Text(s) => s.fmt(f),
        }
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid::Number(value)
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Uid::Text(value.to_string())
    }
}

/// Mailboxes are identified by their address.
pub type MailboxId = String;

/// Stable key of a message across the store and the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub mailbox: MailboxId,
    pub uid: Uid,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mailbox, self.uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub addr: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHeader {
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub date: Option<DateTime<Utc>>,
}

impl MessageHeader {
    pub fn local_date(&self) -> Option<DateTime<Local>> {
        self.date.map(|d| d.with_timezone(&Local))
    }
}

/// Whether the full message has been downloaded yet.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    HeaderOnly,
    WithBody(ParsedBody),
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    mailbox: MailboxId,
    uid: Uid,
    header: MessageHeader,
    body: Body,
    unread: bool,
}

impl MessageRecord {
    /// Builds a header-only record from raw RFC822 header bytes.
    pub fn parse_header(
        mailbox: impl Into<MailboxId>,
        uid: Uid,
        raw_header: &[u8],
        unread: bool,
    ) -> Result<Self> {
        Ok(Self {
            mailbox: mailbox.into(),
            uid,
            header: decoders::parse_header(raw_header)?,
            body: Body::HeaderOnly,
            unread,
        })
    }

    /// Attaches the full message. A second call is ignored.
    pub fn parse_body(&mut self, raw_message: Vec<u8>) -> Result<()> {
        if let Body::WithBody(_) = self.body {
            log::debug!("body of {} already attached, ignoring", self.key());
            return Ok(());
        }
        self.body = Body::WithBody(ParsedBody::new(raw_message)?);
        Ok(())
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            mailbox: self.mailbox.clone(),
            uid: self.uid.clone(),
        }
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn has_body(&self) -> bool {
        matches!(self.body, Body::WithBody(_))
    }

    pub fn is_unread(&self) -> bool {
        self.unread
    }

    /// Returns true if the record was unread before the call.
    pub fn mark_read(&mut self) -> bool {
        std::mem::replace(&mut self.unread, false)
    }

    /// Plain-text rendition of the body with unified line endings.
    pub fn body_text(&self) -> Result<String> {
        match &self.body {
            Body::HeaderOnly => Err(Error::Parse(format!("body of {} not fetched", self.key()))),
            Body::WithBody(body) => body.text(),
        }
    }
}

impl PartialEq for MessageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.mailbox == other.mailbox && self.uid == other.uid
    }
}

impl Eq for MessageRecord {}

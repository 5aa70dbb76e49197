//! Email model and the remote message shape it is built from

use super::CategoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message on the provider (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a stored email (database primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmailId(pub i64);

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as listed by the mailbox, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: MessageId,
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Provider label IDs (e.g., "INBOX", "Label_12")
    pub label_ids: Vec<String>,
    pub received_at: DateTime<Utc>,
    /// Unsubscribe link found in the headers or body, if any
    pub unsubscribe_link: Option<String>,
}

impl RemoteMessage {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            sender: String::new(),
            subject: String::new(),
            body: String::new(),
            label_ids: Vec::new(),
            received_at: Utc::now(),
            unsubscribe_link: None,
        }
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn label_ids<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_ids = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn unsubscribe_link(mut self, link: Option<String>) -> Self {
        self.unsubscribe_link = link;
        self
    }
}

/// A stored email, unique by (account_id, remote_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: EmailId,
    pub account_id: i64,
    /// Weak reference to a category; `None` means uncategorized
    pub category_id: Option<CategoryId>,
    pub remote_id: MessageId,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub ai_summary: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_archived: bool,
    pub unsubscribe_link: Option<String>,
}

impl Email {
    /// Create a builder for a new email (id will be assigned by the store)
    pub fn builder(account_id: i64, remote_id: impl Into<MessageId>) -> EmailBuilder {
        EmailBuilder::new(account_id, remote_id.into())
    }

    /// Build an email row from a remote message
    pub fn from_remote(
        account_id: i64,
        message: RemoteMessage,
        category_id: Option<CategoryId>,
    ) -> Self {
        Self::builder(account_id, message.id)
            .category_id(category_id)
            .sender(message.sender)
            .subject(message.subject)
            .body(message.body)
            .received_at(message.received_at)
            .unsubscribe_link(message.unsubscribe_link)
            .build()
    }
}

/// Builder for constructing Email instances
pub struct EmailBuilder {
    account_id: i64,
    remote_id: MessageId,
    category_id: Option<CategoryId>,
    sender: String,
    subject: String,
    body: String,
    ai_summary: Option<String>,
    received_at: DateTime<Utc>,
    is_archived: bool,
    unsubscribe_link: Option<String>,
}

impl EmailBuilder {
    fn new(account_id: i64, remote_id: MessageId) -> Self {
        Self {
            account_id,
            remote_id,
            category_id: None,
            sender: String::new(),
            subject: String::new(),
            body: String::new(),
            ai_summary: None,
            received_at: Utc::now(),
            is_archived: false,
            unsubscribe_link: None,
        }
    }

    pub fn category_id(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn ai_summary(mut self, summary: Option<String>) -> Self {
        self.ai_summary = summary;
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn archived(mut self, is_archived: bool) -> Self {
        self.is_archived = is_archived;
        self
    }

    pub fn unsubscribe_link(mut self, link: Option<String>) -> Self {
        self.unsubscribe_link = link;
        self
    }

    pub fn build(self) -> Email {
        Email {
            id: EmailId(0),
            account_id: self.account_id,
            category_id: self.category_id,
            remote_id: self.remote_id,
            sender: self.sender,
            subject: self.subject,
            body: self.body,
            ai_summary: self.ai_summary,
            received_at: self.received_at,
            is_archived: self.is_archived,
            unsubscribe_link: self.unsubscribe_link,
        }
    }
}

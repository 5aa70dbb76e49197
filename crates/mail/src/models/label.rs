//! Provider labels and the system-label table used for classification

use serde::{Deserialize, Serialize};

/// Unique identifier for a label (Gmail label ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Well-known Gmail system labels
    pub const INBOX: &'static str = "INBOX";
    pub const SENT: &'static str = "SENT";
    pub const DRAFTS: &'static str = "DRAFT";
    pub const TRASH: &'static str = "TRASH";
    pub const SPAM: &'static str = "SPAM";
    pub const STARRED: &'static str = "STARRED";
    pub const IMPORTANT: &'static str = "IMPORTANT";
    pub const UNREAD: &'static str = "UNREAD";
    pub const CHAT: &'static str = "CHAT";
}

impl From<String> for LabelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A label as it exists on the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Label ID (e.g., "INBOX", "Label_123")
    pub id: LabelId,
    /// Display name
    pub name: String,
    /// Whether the provider owns this label
    pub is_system: bool,
}

impl Label {
    /// Create a user label
    pub fn new(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_system: false,
        }
    }

    /// Create a system label
    pub fn system(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_system: true,
        }
    }
}

/// Provider-specific label knowledge, held as data
///
/// - `system` lists built-in and auto-category labels that never become a
///   category on their own.
/// - `display_names` maps selected system labels to category names. Order
///   is priority: the first entry present on a message wins.
/// - `protected` lists names whose remote label must survive category
///   deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelTable {
    pub system: Vec<String>,
    pub display_names: Vec<(String, String)>,
    pub protected: Vec<String>,
}

impl LabelTable {
    /// The Gmail label table
    pub fn gmail() -> Self {
        let system = [
            LabelId::INBOX,
            LabelId::SENT,
            LabelId::DRAFTS,
            LabelId::SPAM,
            LabelId::TRASH,
            LabelId::UNREAD,
            LabelId::STARRED,
            LabelId::IMPORTANT,
            LabelId::CHAT,
            "CATEGORY_PERSONAL",
            "CATEGORY_SOCIAL",
            "CATEGORY_PROMOTIONS",
            "CATEGORY_UPDATES",
            "CATEGORY_FORUMS",
        ];

        let display_names = [
            (LabelId::SENT, "Sent"),
            (LabelId::DRAFTS, "Drafts"),
            (LabelId::SPAM, "Spam"),
            (LabelId::TRASH, "Trash"),
            (LabelId::STARRED, "Starred"),
            (LabelId::IMPORTANT, "Important"),
            (LabelId::INBOX, "Inbox"),
        ];

        let protected = [
            "Inbox", "Sent", "Drafts", "Spam", "Trash", "Important", "Starred", "All Mail",
            "Chats", "YELLOW_STAR", "BLUE_STAR", "RED_STAR", "ORANGE_STAR", "GREEN_STAR",
            "PURPLE_STAR",
        ];

        let mut protected: Vec<String> = protected.iter().map(|s| s.to_string()).collect();
        protected.extend(system.iter().map(|s| s.to_string()));

        Self {
            system: system.iter().map(|s| s.to_string()).collect(),
            display_names: display_names
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            protected,
        }
    }

    /// Whether a label is a provider built-in or auto-category label
    pub fn is_system(&self, label: &str) -> bool {
        self.system.iter().any(|s| s == label)
    }

    /// Whether the remote label with this name must not be deleted
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.iter().any(|p| p == name)
    }

    /// Category name for a system label, if it has one
    pub fn display_name(&self, label: &str) -> Option<&str> {
        self.display_names
            .iter()
            .find(|(id, _)| id == label)
            .map(|(_, name)| name.as_str())
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::gmail()
    }
}

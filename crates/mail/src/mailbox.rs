//! Remote mailbox contracts
//!
//! The sync engine talks to the provider only through these traits.
//! Every call takes an access token obtained from a [`CredentialProvider`],
//! so one reader instance serves any number of accounts.

use std::collections::HashMap;

use anyhow::Result;

use crate::models::{Account, Checkpoint, Label, MessageId, RemoteMessage};
use crate::sync::CancelToken;

/// Messages added or relabeled since a checkpoint
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Changed messages, each remote id at most once
    pub messages: Vec<RemoteMessage>,
    /// Cursor to persist once the messages are stored
    pub checkpoint: Checkpoint,
}

/// Read access to a remote mailbox
pub trait MailboxReader: Send + Sync {
    /// List every message in the mailbox, following pagination to the end
    fn list_all(&self, access_token: &str, cancel: &CancelToken) -> Result<Vec<RemoteMessage>>;

    /// The mailbox's current change cursor
    fn current_checkpoint(&self, access_token: &str) -> Result<Checkpoint>;

    /// Every message added or relabeled since `checkpoint`
    ///
    /// # Errors
    /// Fails with [`CheckpointExpiredError`](crate::error::CheckpointExpiredError)
    /// when the provider no longer accepts the checkpoint.
    fn list_changes_since(
        &self,
        access_token: &str,
        checkpoint: &Checkpoint,
        cancel: &CancelToken,
    ) -> Result<ChangeSet>;

    /// Map label ids to display names
    ///
    /// Ids the provider does not know are left out of the result.
    fn resolve_label_names(
        &self,
        access_token: &str,
        label_ids: &[String],
    ) -> Result<HashMap<String, String>>;
}

/// Label mutations on the remote mailbox
pub trait RemoteLabelManager: Send + Sync {
    /// List every label, system and user
    fn list_labels(&self, access_token: &str) -> Result<Vec<Label>>;

    /// Create a user label, returning the existing one if the name is taken
    fn create_label(&self, access_token: &str, name: &str) -> Result<Label>;

    /// Delete a user label by name
    ///
    /// A missing label is not an error. System labels are refused.
    fn delete_label(&self, access_token: &str, name: &str) -> Result<()>;

    /// Add and remove label ids on one message
    fn modify_message_labels(
        &self,
        access_token: &str,
        message_id: &MessageId,
        add: &[&str],
        remove: &[&str],
    ) -> Result<()>;
}

/// Produces a usable access token for an account
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self, account: &Account) -> Result<String>;
}

/// Uses the stored access token as-is
///
/// For providers without refresh, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredCredential;

impl CredentialProvider for StoredCredential {
    fn access_token(&self, account: &Account) -> Result<String> {
        Ok(account.credential.access_token.clone())
    }
}

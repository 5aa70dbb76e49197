//! Full and incremental sync
//!
//! An account with no checkpoint gets a full sync: its stored emails are
//! cleared and the whole mailbox is listed and stored. An account with a
//! checkpoint gets an incremental sync over the provider's change feed.
//! In both modes the checkpoint is written last, after every email of the
//! run is stored, so a failed or cancelled run is simply repeated.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{debug, info, warn};

use super::{AccountLocks, CancelToken};
use crate::category::CategoryResolver;
use crate::classify::LabelClassifier;
use crate::error::{CheckpointExpiredError, NotFoundError};
use crate::mailbox::{CredentialProvider, MailboxReader};
use crate::models::{Account, CategoryId, Checkpoint, Email, RemoteMessage};
use crate::storage::MailStore;

/// Which path a refresh took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Statistics from a sync operation
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub mode: SyncMode,
    /// Messages returned by the mailbox
    pub messages_fetched: usize,
    /// New emails stored
    pub inserted: usize,
    /// Existing emails whose category was reassigned
    pub updated: usize,
    /// Messages stored without a category
    pub uncategorized: usize,
    /// Per-message failures that were logged and tolerated
    pub errors: usize,
    pub duration_ms: u64,
    /// Checkpoint persisted by this run
    pub checkpoint: Option<Checkpoint>,
}

impl SyncStats {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            messages_fetched: 0,
            inserted: 0,
            updated: 0,
            uncategorized: 0,
            errors: 0,
            duration_ms: 0,
            checkpoint: None,
        }
    }
}

/// Drives refreshes of accounts against a remote mailbox
pub struct SyncEngine {
    store: Arc<dyn MailStore>,
    reader: Arc<dyn MailboxReader>,
    credentials: Arc<dyn CredentialProvider>,
    classifier: LabelClassifier,
    locks: AccountLocks,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MailStore>,
        reader: Arc<dyn MailboxReader>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            store,
            reader,
            credentials,
            classifier: LabelClassifier::default(),
            locks: AccountLocks::new(),
        }
    }

    /// Use a classifier with a non-default label table
    pub fn with_classifier(mut self, classifier: LabelClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &LabelClassifier {
        &self.classifier
    }

    /// Per-account locks shared with other account-wide operations
    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Bring an account's stored emails up to date with its mailbox
    ///
    /// Runs for the same account are serialized; different accounts run
    /// independently.
    ///
    /// # Errors
    /// - [`NotFoundError`] if the account does not exist.
    /// - [`CheckpointExpiredError`] if the provider rejected the stored
    ///   checkpoint. The checkpoint has been cleared, so the next refresh
    ///   runs a full sync.
    /// - [`CancelledError`](crate::error::CancelledError) if `cancel` fired.
    /// - Any provider or storage failure; the stored checkpoint is unchanged.
    pub fn refresh(&self, account_id: i64, cancel: &CancelToken) -> Result<SyncStats> {
        let lock = self.locks.lock_for(account_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| NotFoundError(format!("account {}", account_id)))?;

        cancel.check()?;
        let access_token = self.credentials.access_token(&account)?;

        let start = Instant::now();
        let result = match &account.last_sync_checkpoint {
            None => self.full_sync(&account, &access_token, cancel),
            Some(checkpoint) => self.incremental_sync(&account, &access_token, checkpoint, cancel),
        };

        match result {
            Ok(mut stats) => {
                stats.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "{:?} sync of {} done: {} fetched, {} inserted, {} updated, {} uncategorized, {} errors in {}ms",
                    stats.mode,
                    account.email,
                    stats.messages_fetched,
                    stats.inserted,
                    stats.updated,
                    stats.uncategorized,
                    stats.errors,
                    stats.duration_ms
                );
                Ok(stats)
            }
            Err(e) if e.downcast_ref::<CheckpointExpiredError>().is_some() => {
                warn!(
                    "Checkpoint of {} expired; clearing it so the next refresh runs a full sync",
                    account.email
                );
                self.store.clear_checkpoint(account.id)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn full_sync(
        &self,
        account: &Account,
        access_token: &str,
        cancel: &CancelToken,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::new(SyncMode::Full);

        let cleared = self.store.delete_all_for_account(account.id)?;
        debug!("Cleared {} stored emails of {}", cleared, account.email);

        // Taken before listing so changes made during the listing are
        // replayed by the next incremental sync
        cancel.check()?;
        let checkpoint = self.reader.current_checkpoint(access_token)?;

        cancel.check()?;
        let messages = self.reader.list_all(access_token, cancel)?;
        stats.messages_fetched = messages.len();

        let label_names = self.label_names(access_token, &messages);
        let mut categories = HashMap::new();

        let rows: Vec<Email> = messages
            .into_iter()
            .map(|message| {
                let category =
                    self.assign_category(account.id, &message, &label_names, &mut categories, &mut stats);
                Email::from_remote(account.id, message, category)
            })
            .collect();

        stats.inserted = self.store.bulk_insert(rows)?;

        cancel.check()?;
        self.store.update_checkpoint(account.id, &checkpoint)?;
        stats.checkpoint = Some(checkpoint);

        Ok(stats)
    }

    fn incremental_sync(
        &self,
        account: &Account,
        access_token: &str,
        checkpoint: &Checkpoint,
        cancel: &CancelToken,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::new(SyncMode::Incremental);

        cancel.check()?;
        let changes = self
            .reader
            .list_changes_since(access_token, checkpoint, cancel)?;
        stats.messages_fetched = changes.messages.len();

        let label_names = self.label_names(access_token, &changes.messages);
        let mut categories = HashMap::new();
        let mut staged: Vec<Email> = Vec::new();

        for message in changes.messages {
            let category =
                self.assign_category(account.id, &message, &label_names, &mut categories, &mut stats);

            if self.store.exists_by_remote_id(account.id, &message.id)? {
                // Category follows the current labels, even when that means none
                self.store
                    .update_category_by_remote_id(account.id, &message.id, category)?;
                stats.updated += 1;
            } else {
                staged.push(Email::from_remote(account.id, message, category));
            }
        }

        stats.inserted = self.store.bulk_insert(staged)?;

        cancel.check()?;
        self.store.update_checkpoint(account.id, &changes.checkpoint)?;
        debug!(
            "Advanced checkpoint of {} from {} to {}",
            account.email, checkpoint, changes.checkpoint
        );
        stats.checkpoint = Some(changes.checkpoint);

        Ok(stats)
    }

    /// Resolve every label id on `messages` in one call
    ///
    /// On failure the map is empty and raw ids stand in for names.
    fn label_names(&self, access_token: &str, messages: &[RemoteMessage]) -> HashMap<String, String> {
        let ids: Vec<String> = messages
            .iter()
            .flat_map(|m| m.label_ids.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if ids.is_empty() {
            return HashMap::new();
        }

        match self.reader.resolve_label_names(access_token, &ids) {
            Ok(names) => names,
            Err(e) => {
                warn!("Label name lookup failed, using label ids as names: {:#}", e);
                HashMap::new()
            }
        }
    }

    /// Classify a message and resolve its category
    ///
    /// Never fails: a message without a usable category is stored
    /// uncategorized.
    fn assign_category(
        &self,
        account_id: i64,
        message: &RemoteMessage,
        label_names: &HashMap<String, String>,
        resolved: &mut HashMap<String, CategoryId>,
        stats: &mut SyncStats,
    ) -> Option<CategoryId> {
        let labels: Vec<&str> = message
            .label_ids
            .iter()
            .map(|id| label_names.get(id).unwrap_or(id).as_str())
            .collect();

        let Some(name) = self.classifier.classify(&labels) else {
            debug!("No category for {} (labels {:?})", message.id.as_str(), labels);
            stats.uncategorized += 1;
            return None;
        };

        if let Some(id) = resolved.get(&name) {
            return Some(*id);
        }

        match CategoryResolver::new(self.store.as_ref()).resolve(account_id, &name) {
            Ok(id) => {
                debug!("{} -> category '{}'", message.id.as_str(), name);
                resolved.insert(name, id);
                Some(id)
            }
            Err(e) => {
                warn!(
                    "Could not resolve category '{}' for {}: {:#}",
                    name,
                    message.id.as_str(),
                    e
                );
                stats.errors += 1;
                stats.uncategorized += 1;
                None
            }
        }
    }
}

//! MailService facade
//!
//! The public entry point for hosts (the CLI today, an HTTP layer
//! elsewhere). It wires storage, the sync engine, remote label management,
//! the language model and the unsubscriber together and converts internal
//! errors to [`MailError`].

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};

use crate::category::CategoryResolver;
use crate::classify::LabelClassifier;
use crate::error::MailError;
use crate::llm::LanguageModel;
use crate::mailbox::{CredentialProvider, MailboxReader, RemoteLabelManager};
use crate::models::{
    Account, Category, CategoryId, Email, EmailId, LabelId, LabelTable, OAuthCredential,
    PageRequest, PaginatedResult,
};
use crate::storage::MailStore;
use crate::sync::{CancelToken, SyncEngine, SyncStats};
use crate::unsubscribe::{UnsubscribeErrorKind, UnsubscribeResult, Unsubscriber, usable_link};

/// High-level mail operations over one store
pub struct MailService {
    store: Arc<dyn MailStore>,
    credentials: Arc<dyn CredentialProvider>,
    engine: SyncEngine,
    labels: Option<Arc<dyn RemoteLabelManager>>,
    model: Option<Arc<dyn LanguageModel>>,
    unsubscriber: Option<Unsubscriber>,
    label_table: LabelTable,
}

impl MailService {
    pub fn new(
        store: Arc<dyn MailStore>,
        reader: Arc<dyn MailboxReader>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let engine = SyncEngine::new(store.clone(), reader, credentials.clone());
        Self {
            store,
            credentials,
            engine,
            labels: None,
            model: None,
            unsubscriber: None,
            label_table: LabelTable::default(),
        }
    }

    /// Mirror category changes to provider labels
    pub fn with_label_manager(mut self, labels: Arc<dyn RemoteLabelManager>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Enable summaries and AI categorization
    pub fn with_language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_unsubscriber(mut self, unsubscriber: Unsubscriber) -> Self {
        self.unsubscriber = Some(unsubscriber);
        self
    }

    /// Replace the system-label table used for classification and
    /// protected-label checks
    pub fn with_label_table(mut self, table: LabelTable) -> Self {
        self.engine = self.engine.with_classifier(LabelClassifier::new(table.clone()));
        self.label_table = table;
        self
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Register a mailbox, or store fresh tokens for a known one
    pub fn add_account(
        &self,
        email: &str,
        credential: OAuthCredential,
    ) -> Result<Account, MailError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(MailError::InvalidArgument {
                message: "email address is empty".to_string(),
            });
        }

        if let Some(mut existing) = self.store.get_account_by_email(email)? {
            self.store.update_credential(existing.id, &credential)?;
            existing.credential = credential;
            info!("Updated credentials of {}", email);
            return Ok(existing);
        }

        let account = self.store.create_account(Account::new(email, credential))?;
        info!("Added account {} ({})", account.email, account.id);
        Ok(account)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, MailError> {
        Ok(self.store.list_accounts()?)
    }

    pub fn get_account(&self, account_id: i64) -> Result<Account, MailError> {
        self.require_account(account_id)
    }

    /// Delete an account with all its emails and categories
    pub fn delete_account(&self, account_id: i64) -> Result<(), MailError> {
        let account = self.require_account(account_id)?;

        let lock = self.engine.locks().lock_for(account_id);
        {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.store.delete_account(account_id)?;
        }
        self.engine.locks().remove(account_id);

        info!("Deleted account {}", account.email);
        Ok(())
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Bring an account's stored emails up to date
    ///
    /// A [`MailError::CheckpointExpired`] result means the checkpoint was
    /// cleared; calling again runs a full sync.
    pub fn refresh(&self, account_id: i64) -> Result<SyncStats, MailError> {
        self.refresh_with_cancel(account_id, &CancelToken::new())
    }

    pub fn refresh_with_cancel(
        &self,
        account_id: i64,
        cancel: &CancelToken,
    ) -> Result<SyncStats, MailError> {
        Ok(self.engine.refresh(account_id, cancel)?)
    }

    // ========================================================================
    // Emails
    // ========================================================================

    /// One page of an account's emails, newest first
    pub fn get_paginated_emails(
        &self,
        account_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<PaginatedResult<Email>, MailError> {
        self.require_account(account_id)?;
        let request = PageRequest::new(page, page_size);
        let (items, total) = self.store.get_page(account_id, request)?;
        Ok(PaginatedResult::new(items, total, request))
    }

    /// One page of an account's emails in a category, newest first
    pub fn get_paginated_emails_by_category(
        &self,
        account_id: i64,
        category_id: CategoryId,
        page: u32,
        page_size: u32,
    ) -> Result<PaginatedResult<Email>, MailError> {
        self.require_account(account_id)?;
        self.require_category(account_id, category_id)?;
        let request = PageRequest::new(page, page_size);
        let (items, total) = self
            .store
            .get_page_by_category(account_id, category_id, request)?;
        Ok(PaginatedResult::new(items, total, request))
    }

    pub fn get_email(&self, email_id: EmailId) -> Result<Email, MailError> {
        self.store
            .get_email(email_id)?
            .ok_or_else(|| MailError::not_found(format!("email {}", email_id)))
    }

    /// Summarize an email with the language model and store the summary
    pub fn summarize_email(&self, email_id: EmailId) -> Result<String, MailError> {
        let model = self.model()?;
        let email = self.get_email(email_id)?;

        let summary = model.summarize(&email)?;
        self.store.update_summary(email_id, &summary)?;
        Ok(summary)
    }

    /// Let the language model pick the email's category among the
    /// account's categories
    ///
    /// The best match is assigned; `None` clears the category.
    pub fn categorize_email(&self, email_id: EmailId) -> Result<Option<CategoryId>, MailError> {
        let model = self.model()?;
        let email = self.get_email(email_id)?;
        let candidates = self.store.list_categories(email.account_id)?;

        let chosen = model.categorize(&email, &candidates)?.into_iter().next();
        self.store
            .update_category_by_remote_id(email.account_id, &email.remote_id, chosen)?;
        Ok(chosen)
    }

    /// Remove the email from the provider inbox and flag it archived
    pub fn archive_email(&self, email_id: EmailId) -> Result<(), MailError> {
        let labels = self.label_manager()?;
        let email = self.get_email(email_id)?;
        let account = self.require_account(email.account_id)?;
        let token = self.credentials.access_token(&account)?;

        labels.modify_message_labels(&token, &email.remote_id, &[], &[LabelId::INBOX])?;
        self.store.set_archived(email_id, true)?;
        Ok(())
    }

    // ========================================================================
    // Categories
    // ========================================================================

    /// Categories of an account, by name
    pub fn list_categories(&self, account_id: i64) -> Result<Vec<Category>, MailError> {
        self.require_account(account_id)?;
        Ok(self.store.list_categories(account_id)?)
    }

    /// Create a category and its provider label
    pub fn create_category(
        &self,
        account_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Category, MailError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MailError::InvalidArgument {
                message: "category name is empty".to_string(),
            });
        }

        let account = self.require_account(account_id)?;
        if self.store.find_category_by_name(account_id, name)?.is_some() {
            return Err(MailError::AlreadyExists {
                resource: format!("category '{}'", name),
            });
        }

        if let Some(labels) = &self.labels {
            let token = self.credentials.access_token(&account)?;
            labels.create_label(&token, name)?;
        }

        let mut category = Category::new(account_id, name);
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            category = category.with_description(description);
        }
        Ok(self.store.create_category(category)?)
    }

    /// Delete a category, its provider label, and its email assignments
    ///
    /// Protected labels stay on the provider. A failed remote delete is
    /// logged and the local delete still happens.
    pub fn delete_category(&self, account_id: i64, category_id: CategoryId) -> Result<(), MailError> {
        let account = self.require_account(account_id)?;
        let category = self.require_category(account_id, category_id)?;

        if let Some(labels) = &self.labels {
            if self.label_table.is_protected(&category.name) {
                info!("Keeping protected label '{}' on the provider", category.name);
            } else {
                let removed = self
                    .credentials
                    .access_token(&account)
                    .and_then(|token| labels.delete_label(&token, &category.name));
                if let Err(e) = removed {
                    warn!("Failed to delete label '{}': {:#}", category.name, e);
                }
            }
        }

        self.store.delete_category(category_id)?;
        Ok(())
    }

    /// Classify label names and resolve the result to a category id
    pub fn resolve_category_for_labels<S: AsRef<str>>(
        &self,
        account_id: i64,
        label_names: &[S],
    ) -> Result<Option<CategoryId>, MailError> {
        self.require_account(account_id)?;
        let Some(name) = self.engine.classifier().classify(label_names) else {
            return Ok(None);
        };
        let id = CategoryResolver::new(self.store.as_ref()).resolve(account_id, &name)?;
        Ok(Some(id))
    }

    // ========================================================================
    // Unsubscribe
    // ========================================================================

    /// Try to unsubscribe from the list an email came from
    ///
    /// Never fails; every problem is reported in the result.
    pub fn unsubscribe(&self, email_id: EmailId) -> UnsubscribeResult {
        match self.unsubscribe_target(email_id) {
            Ok(email) => match &self.unsubscriber {
                Some(unsubscriber) => unsubscriber.unsubscribe(&email),
                None => unsubscribe_unavailable(),
            },
            Err(rejected) => rejected,
        }
    }

    /// Unsubscribe from several emails, one at a time
    pub fn bulk_unsubscribe(&self, email_ids: &[EmailId]) -> BTreeMap<EmailId, UnsubscribeResult> {
        let mut results = BTreeMap::new();
        let mut pending = Vec::new();

        for &id in email_ids {
            match self.unsubscribe_target(id) {
                Ok(email) => pending.push(email),
                Err(rejected) => {
                    results.insert(id, rejected);
                }
            }
        }

        match &self.unsubscriber {
            Some(unsubscriber) => results.extend(unsubscriber.bulk_unsubscribe(&pending)),
            None => results.extend(pending.iter().map(|e| (e.id, unsubscribe_unavailable()))),
        }
        results
    }

    /// Load an email worth sending to the unsubscriber
    fn unsubscribe_target(&self, email_id: EmailId) -> Result<Email, UnsubscribeResult> {
        let email = match self.store.get_email(email_id) {
            Ok(Some(email)) => email,
            Ok(None) => {
                return Err(UnsubscribeResult::failed(
                    UnsubscribeErrorKind::EmailNotFound,
                    format!("Email {} not found", email_id),
                ));
            }
            Err(e) => {
                return Err(UnsubscribeResult::failed(
                    UnsubscribeErrorKind::EmailNotFound,
                    format!("Failed to load email {}: {:#}", email_id, e),
                ));
            }
        };
        usable_link(&email)?;
        Ok(email)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_account(&self, account_id: i64) -> Result<Account, MailError> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| MailError::not_found(format!("account {}", account_id)))
    }

    /// A category that belongs to the given account
    fn require_category(
        &self,
        account_id: i64,
        category_id: CategoryId,
    ) -> Result<Category, MailError> {
        self.store
            .get_category(category_id)?
            .filter(|c| c.account_id == account_id)
            .ok_or_else(|| MailError::not_found(format!("category {}", category_id)))
    }

    fn model(&self) -> Result<&Arc<dyn LanguageModel>, MailError> {
        self.model
            .as_ref()
            .ok_or_else(|| MailError::not_configured("language model"))
    }

    fn label_manager(&self) -> Result<&Arc<dyn RemoteLabelManager>, MailError> {
        self.labels
            .as_ref()
            .ok_or_else(|| MailError::not_configured("remote label manager"))
    }
}

fn unsubscribe_unavailable() -> UnsubscribeResult {
    UnsubscribeResult::failed(
        UnsubscribeErrorKind::AiAnalysisError,
        "No language model configured for page analysis",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PageAnalysis;
    use crate::mailbox::{ChangeSet, StoredCredential};
    use crate::models::{Checkpoint, Label, MessageId, RemoteMessage};
    use crate::storage::{AccountStore, CategoryStore, EmailStore, InMemoryMailStore};
    use anyhow::{Result, bail};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct EmptyMailbox;

    impl MailboxReader for EmptyMailbox {
        fn list_all(&self, _token: &str, _cancel: &CancelToken) -> Result<Vec<RemoteMessage>> {
            Ok(Vec::new())
        }

        fn current_checkpoint(&self, _token: &str) -> Result<Checkpoint> {
            Ok(Checkpoint::new("1"))
        }

        fn list_changes_since(
            &self,
            _token: &str,
            checkpoint: &Checkpoint,
            _cancel: &CancelToken,
        ) -> Result<ChangeSet> {
            Ok(ChangeSet {
                messages: Vec::new(),
                checkpoint: checkpoint.clone(),
            })
        }

        fn resolve_label_names(
            &self,
            _token: &str,
            _ids: &[String],
        ) -> Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }
    }

    #[derive(Default)]
    struct RecordingLabels {
        calls: Mutex<Vec<String>>,
        fail_deletes: bool,
    }

    impl RemoteLabelManager for RecordingLabels {
        fn list_labels(&self, _token: &str) -> Result<Vec<Label>> {
            Ok(Vec::new())
        }

        fn create_label(&self, _token: &str, name: &str) -> Result<Label> {
            self.calls.lock().unwrap().push(format!("create {}", name));
            Ok(Label::new(format!("Label_{}", name), name))
        }

        fn delete_label(&self, _token: &str, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", name));
            if self.fail_deletes {
                bail!("label service unavailable");
            }
            Ok(())
        }

        fn modify_message_labels(
            &self,
            _token: &str,
            message_id: &MessageId,
            add: &[&str],
            remove: &[&str],
        ) -> Result<()> {
            self.calls.lock().unwrap().push(format!(
                "modify {} +{:?} -{:?}",
                message_id.as_str(),
                add,
                remove
            ));
            Ok(())
        }
    }

    struct CannedModel;

    impl LanguageModel for CannedModel {
        fn summarize(&self, email: &Email) -> Result<String> {
            Ok(format!("About {}", email.subject))
        }

        fn categorize(&self, _email: &Email, candidates: &[Category]) -> Result<Vec<CategoryId>> {
            Ok(candidates.iter().rev().map(|c| c.id).collect())
        }

        fn analyze_unsubscribe_page(&self, _html: &str, _url: &str) -> Result<PageAnalysis> {
            bail!("not used")
        }
    }

    struct Fixture {
        service: MailService,
        store: Arc<InMemoryMailStore>,
        labels: Arc<RecordingLabels>,
        account: Account,
    }

    fn fixture_with(labels: RecordingLabels) -> Fixture {
        let store = Arc::new(InMemoryMailStore::new());
        let labels = Arc::new(labels);
        let service = MailService::new(store.clone(), Arc::new(EmptyMailbox), Arc::new(StoredCredential))
            .with_label_manager(labels.clone())
            .with_language_model(Arc::new(CannedModel));
        let account = service
            .add_account("me@example.com", OAuthCredential::new("token"))
            .unwrap();
        Fixture {
            service,
            store,
            labels,
            account,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingLabels::default())
    }

    fn store_email(f: &Fixture, remote_id: &str) -> Email {
        f.store
            .bulk_insert(vec![
                Email::builder(f.account.id, remote_id)
                    .subject("Lunch")
                    .build(),
            ])
            .unwrap();
        f.store.get_page(f.account.id, PageRequest::default()).unwrap().0[0].clone()
    }

    #[test]
    fn test_add_account_twice_updates_credential() {
        let f = fixture();
        let again = f
            .service
            .add_account("me@example.com", OAuthCredential::new("newer"))
            .unwrap();

        assert_eq!(again.id, f.account.id);
        assert_eq!(f.service.list_accounts().unwrap().len(), 1);
        assert_eq!(
            f.service.get_account(f.account.id).unwrap().credential.access_token,
            "newer"
        );
    }

    #[test]
    fn test_pagination_of_missing_account_is_not_found() {
        let f = fixture();
        let err = f.service.get_paginated_emails(999, 1, 20).unwrap_err();
        assert!(matches!(err, MailError::NotFound { .. }));
    }

    #[test]
    fn test_create_category_creates_label_then_row() {
        let f = fixture();
        let category = f
            .service
            .create_category(f.account.id, " Receipts ", Some("Purchases"))
            .unwrap();

        assert_eq!(category.name, "Receipts");
        assert_eq!(category.description.as_deref(), Some("Purchases"));
        assert_eq!(*f.labels.calls.lock().unwrap(), vec!["create Receipts"]);

        let err = f
            .service
            .create_category(f.account.id, "Receipts", None)
            .unwrap_err();
        assert!(matches!(err, MailError::AlreadyExists { .. }));
    }

    #[test]
    fn test_delete_category_checks_ownership() {
        let f = fixture();
        let other = f
            .service
            .add_account("other@example.com", OAuthCredential::new("t"))
            .unwrap();
        let category = f.service.create_category(f.account.id, "Work", None).unwrap();

        let err = f.service.delete_category(other.id, category.id).unwrap_err();
        assert!(matches!(err, MailError::NotFound { .. }));
        assert_eq!(f.service.list_categories(f.account.id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_category_keeps_protected_label() {
        let f = fixture();
        let category = f.service.create_category(f.account.id, "Starred", None).unwrap();
        f.service.delete_category(f.account.id, category.id).unwrap();

        assert_eq!(*f.labels.calls.lock().unwrap(), vec!["create Starred"]);
        assert!(f.service.list_categories(f.account.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_category_survives_remote_failure() {
        let f = fixture_with(RecordingLabels {
            fail_deletes: true,
            ..RecordingLabels::default()
        });
        let category = f.service.create_category(f.account.id, "Work", None).unwrap();
        let email = store_email(&f, "m1");
        f.store
            .update_category_by_remote_id(f.account.id, &email.remote_id, Some(category.id))
            .unwrap();

        f.service.delete_category(f.account.id, category.id).unwrap();

        assert!(f.service.list_categories(f.account.id).unwrap().is_empty());
        assert_eq!(f.service.get_email(email.id).unwrap().category_id, None);
    }

    #[test]
    fn test_resolve_category_for_labels() {
        let f = fixture();
        let id = f
            .service
            .resolve_category_for_labels(f.account.id, &["INBOX", "Project-X"])
            .unwrap()
            .unwrap();
        let again = f
            .service
            .resolve_category_for_labels(f.account.id, &["Project-X"])
            .unwrap();

        assert_eq!(again, Some(id));
        let none: [&str; 0] = [];
        assert_eq!(f.service.resolve_category_for_labels(f.account.id, &none).unwrap(), None);
    }

    #[test]
    fn test_summarize_and_categorize() {
        let f = fixture();
        let work = f.service.create_category(f.account.id, "Work", None).unwrap();
        f.service.create_category(f.account.id, "Home", None).unwrap();
        let email = store_email(&f, "m1");

        assert_eq!(f.service.summarize_email(email.id).unwrap(), "About Lunch");
        assert_eq!(
            f.service.get_email(email.id).unwrap().ai_summary.as_deref(),
            Some("About Lunch")
        );

        // Categories list by name (Home, Work); the canned model answers in reverse
        assert_eq!(f.service.categorize_email(email.id).unwrap(), Some(work.id));
        assert_eq!(f.service.get_email(email.id).unwrap().category_id, Some(work.id));
    }

    #[test]
    fn test_archive_removes_inbox_label() {
        let f = fixture();
        let email = store_email(&f, "m1");

        f.service.archive_email(email.id).unwrap();

        assert!(f.service.get_email(email.id).unwrap().is_archived);
        assert_eq!(
            *f.labels.calls.lock().unwrap(),
            vec![r#"modify m1 +[] -["INBOX"]"#]
        );
    }

    #[test]
    fn test_missing_model_is_not_configured() {
        let store = Arc::new(InMemoryMailStore::new());
        let service = MailService::new(store, Arc::new(EmptyMailbox), Arc::new(StoredCredential));
        let err = service.summarize_email(EmailId(1)).unwrap_err();
        assert!(matches!(err, MailError::NotConfigured { .. }));
    }

    #[test]
    fn test_unsubscribe_results_are_structured() {
        let f = fixture();
        let email = store_email(&f, "m1");

        let result = f.service.unsubscribe(email.id);
        assert_eq!(result.error, Some(UnsubscribeErrorKind::NoLink));

        let results = f.service.bulk_unsubscribe(&[email.id, EmailId(404)]);
        assert_eq!(results[&email.id].error, Some(UnsubscribeErrorKind::NoLink));
        assert_eq!(results[&EmailId(404)].error, Some(UnsubscribeErrorKind::EmailNotFound));
    }

    #[test]
    fn test_delete_account_cascades() {
        let f = fixture();
        f.service.create_category(f.account.id, "Work", None).unwrap();
        let email = store_email(&f, "m1");

        f.service.delete_account(f.account.id).unwrap();

        assert!(matches!(
            f.service.get_email(email.id).unwrap_err(),
            MailError::NotFound { .. }
        ));
        assert!(matches!(
            f.service.refresh(f.account.id).unwrap_err(),
            MailError::NotFound { .. }
        ));
    }
}

//! In-memory storage implementation
//!
//! Used for tests and short-lived tools. Enforces the same uniqueness and
//! cascade rules as the SQLite store.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{AccountStore, CategoryStore, EmailStore};
use crate::error::{DuplicateCategoryError, NotFoundError};
use crate::models::{
    Account, Category, CategoryId, Checkpoint, Email, EmailId, MessageId, OAuthCredential,
    PageRequest,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<i64, Account>,
    categories: HashMap<CategoryId, Category>,
    emails: HashMap<EmailId, Email>,
    /// Natural key index: (account_id, remote_id) -> email id
    email_keys: HashMap<(i64, MessageId), EmailId>,
    next_account_id: i64,
    next_category_id: i64,
    next_email_id: i64,
}

/// In-memory implementation of the mail store contracts
///
/// All tables sit behind one RwLock so multi-table operations (cascades,
/// uniqueness checks) are atomic.
pub struct InMemoryMailStore {
    tables: RwLock<Tables>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Total number of stored emails across all accounts
    pub fn email_count(&self) -> usize {
        self.tables.read().unwrap().emails.len()
    }

    /// Total number of stored categories across all accounts
    pub fn category_count(&self) -> usize {
        self.tables.read().unwrap().categories.len()
    }

    fn with_account<F>(&self, id: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Account),
    {
        let mut tables = self.tables.write().unwrap();
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| NotFoundError(format!("account {}", id)))?;
        f(account);
        Ok(())
    }

    fn with_email<F>(&self, id: EmailId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Email),
    {
        let mut tables = self.tables.write().unwrap();
        let email = tables
            .emails
            .get_mut(&id)
            .ok_or_else(|| NotFoundError(format!("email {}", id)))?;
        f(email);
        Ok(())
    }

    fn page_where<P>(&self, page: PageRequest, predicate: P) -> (Vec<Email>, usize)
    where
        P: Fn(&Email) -> bool,
    {
        let tables = self.tables.read().unwrap();
        let mut matching: Vec<&Email> = tables.emails.values().filter(|e| predicate(e)).collect();
        let total = matching.len();

        // Newest first, id as tie-breaker for a stable order
        matching.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let items = matching
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .cloned()
            .collect();

        (items, total)
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for InMemoryMailStore {
    fn create_account(&self, mut account: Account) -> Result<Account> {
        let mut tables = self.tables.write().unwrap();
        if tables.accounts.values().any(|a| a.email == account.email) {
            anyhow::bail!("Account {} already exists", account.email);
        }
        tables.next_account_id += 1;
        account.id = tables.next_account_id;
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.tables.read().unwrap().accounts.get(&id).cloned())
    }

    fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.accounts.values().find(|a| a.email == email).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let tables = self.tables.read().unwrap();
        let mut accounts: Vec<Account> = tables.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    fn update_credential(&self, id: i64, credential: &OAuthCredential) -> Result<()> {
        self.with_account(id, |a| a.credential = credential.clone())
    }

    fn update_checkpoint(&self, id: i64, checkpoint: &Checkpoint) -> Result<()> {
        self.with_account(id, |a| a.last_sync_checkpoint = Some(checkpoint.clone()))
    }

    fn clear_checkpoint(&self, id: i64) -> Result<()> {
        self.with_account(id, |a| a.last_sync_checkpoint = None)
    }

    fn delete_account(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.accounts.remove(&id);
        tables.categories.retain(|_, c| c.account_id != id);
        tables.emails.retain(|_, e| e.account_id != id);
        tables.email_keys.retain(|(account_id, _), _| *account_id != id);
        Ok(())
    }
}

impl CategoryStore for InMemoryMailStore {
    fn find_category_by_name(&self, account_id: i64, name: &str) -> Result<Option<Category>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .categories
            .values()
            .find(|c| c.account_id == account_id && c.name == name)
            .cloned())
    }

    fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        Ok(self.tables.read().unwrap().categories.get(&id).cloned())
    }

    fn list_categories(&self, account_id: i64) -> Result<Vec<Category>> {
        let tables = self.tables.read().unwrap();
        let mut categories: Vec<Category> = tables
            .categories
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    fn create_category(&self, mut category: Category) -> Result<Category> {
        let mut tables = self.tables.write().unwrap();
        if tables
            .categories
            .values()
            .any(|c| c.account_id == category.account_id && c.name == category.name)
        {
            return Err(DuplicateCategoryError {
                account_id: category.account_id,
                name: category.name,
            }
            .into());
        }
        tables.next_category_id += 1;
        category.id = CategoryId(tables.next_category_id);
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    fn delete_category(&self, id: CategoryId) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.categories.remove(&id);
        for email in tables.emails.values_mut() {
            if email.category_id == Some(id) {
                email.category_id = None;
            }
        }
        Ok(())
    }
}

impl EmailStore for InMemoryMailStore {
    fn exists_by_remote_id(&self, account_id: i64, remote_id: &MessageId) -> Result<bool> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .email_keys
            .contains_key(&(account_id, remote_id.clone())))
    }

    fn bulk_insert(&self, emails: Vec<Email>) -> Result<usize> {
        let mut tables = self.tables.write().unwrap();
        let mut inserted = 0;

        for mut email in emails {
            let key = (email.account_id, email.remote_id.clone());
            if tables.email_keys.contains_key(&key) {
                continue;
            }
            tables.next_email_id += 1;
            email.id = EmailId(tables.next_email_id);
            tables.email_keys.insert(key, email.id);
            tables.emails.insert(email.id, email);
            inserted += 1;
        }

        Ok(inserted)
    }

    fn update_category_by_remote_id(
        &self,
        account_id: i64,
        remote_id: &MessageId,
        category_id: Option<CategoryId>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let Some(id) = tables
            .email_keys
            .get(&(account_id, remote_id.clone()))
            .copied()
        else {
            return Ok(false);
        };
        match tables.emails.get_mut(&id) {
            Some(email) => {
                email.category_id = category_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_all_for_account(&self, account_id: i64) -> Result<usize> {
        let mut tables = self.tables.write().unwrap();
        let before = tables.emails.len();
        tables.emails.retain(|_, e| e.account_id != account_id);
        tables.email_keys.retain(|(id, _), _| *id != account_id);
        Ok(before - tables.emails.len())
    }

    fn get_email(&self, id: EmailId) -> Result<Option<Email>> {
        Ok(self.tables.read().unwrap().emails.get(&id).cloned())
    }

    fn get_page(&self, account_id: i64, page: PageRequest) -> Result<(Vec<Email>, usize)> {
        Ok(self.page_where(page, |e| e.account_id == account_id))
    }

    fn get_page_by_category(
        &self,
        account_id: i64,
        category_id: CategoryId,
        page: PageRequest,
    ) -> Result<(Vec<Email>, usize)> {
        Ok(self.page_where(page, |e| {
            e.account_id == account_id && e.category_id == Some(category_id)
        }))
    }

    fn update_summary(&self, id: EmailId, summary: &str) -> Result<()> {
        self.with_email(id, |e| e.ai_summary = Some(summary.to_string()))
    }

    fn set_archived(&self, id: EmailId, archived: bool) -> Result<()> {
        self.with_email(id, |e| e.is_archived = archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OAuthCredential;
    use chrono::{Duration, Utc};

    fn make_email(account_id: i64, remote_id: &str, age_hours: i64) -> Email {
        Email::builder(account_id, remote_id)
            .sender("test@example.com")
            .subject(format!("Subject {}", remote_id))
            .received_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    fn make_account(store: &InMemoryMailStore, email: &str) -> Account {
        store
            .create_account(Account::new(email, OAuthCredential::new("tok")))
            .unwrap()
    }

    #[test]
    fn test_bulk_insert_skips_duplicates() {
        let store = InMemoryMailStore::new();
        let account = make_account(&store, "a@example.com");

        let inserted = store
            .bulk_insert(vec![make_email(account.id, "m1", 1), make_email(account.id, "m2", 2)])
            .unwrap();
        assert_eq!(inserted, 2);

        let inserted = store
            .bulk_insert(vec![make_email(account.id, "m1", 1), make_email(account.id, "m3", 3)])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.email_count(), 3);
    }

    #[test]
    fn test_same_remote_id_in_different_accounts() {
        let store = InMemoryMailStore::new();
        let a = make_account(&store, "a@example.com");
        let b = make_account(&store, "b@example.com");

        store.bulk_insert(vec![make_email(a.id, "m1", 1)]).unwrap();
        store.bulk_insert(vec![make_email(b.id, "m1", 1)]).unwrap();

        assert!(store.exists_by_remote_id(a.id, &MessageId::new("m1")).unwrap());
        assert!(store.exists_by_remote_id(b.id, &MessageId::new("m1")).unwrap());
        assert_eq!(store.email_count(), 2);
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let store = InMemoryMailStore::new();
        let account = make_account(&store, "a@example.com");

        store.create_category(Category::new(account.id, "Work")).unwrap();
        let err = store
            .create_category(Category::new(account.id, "Work"))
            .unwrap_err();
        assert!(err.downcast_ref::<DuplicateCategoryError>().is_some());
    }

    #[test]
    fn test_delete_category_uncategorizes_emails() {
        let store = InMemoryMailStore::new();
        let account = make_account(&store, "a@example.com");
        let work = store.create_category(Category::new(account.id, "Work")).unwrap();

        let email = Email::builder(account.id, "m1").category_id(Some(work.id)).build();
        store.bulk_insert(vec![email]).unwrap();

        store.delete_category(work.id).unwrap();

        let (emails, total) = store.get_page(account.id, PageRequest::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(emails[0].category_id, None);
    }

    #[test]
    fn test_pagination_newest_first() {
        let store = InMemoryMailStore::new();
        let account = make_account(&store, "a@example.com");
        let emails = (0..5).map(|i| make_email(account.id, &format!("m{}", i), i)).collect();
        store.bulk_insert(emails).unwrap();

        let (page, total) = store.get_page(account.id, PageRequest::new(1, 2)).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].remote_id.as_str(), "m0");
        assert_eq!(page[1].remote_id.as_str(), "m1");

        let (page, _) = store.get_page(account.id, PageRequest::new(3, 2)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].remote_id.as_str(), "m4");
    }

    #[test]
    fn test_delete_account_cascades() {
        let store = InMemoryMailStore::new();
        let account = make_account(&store, "a@example.com");
        store.create_category(Category::new(account.id, "Work")).unwrap();
        store.bulk_insert(vec![make_email(account.id, "m1", 1)]).unwrap();

        store.delete_account(account.id).unwrap();

        assert!(store.get_account(account.id).unwrap().is_none());
        assert_eq!(store.email_count(), 0);
        assert_eq!(store.category_count(), 0);
        assert!(!store.exists_by_remote_id(account.id, &MessageId::new("m1")).unwrap());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let store = InMemoryMailStore::new();
        let account = make_account(&store, "a@example.com");

        store.update_checkpoint(account.id, &Checkpoint::new("100")).unwrap();
        let loaded = store.get_account(account.id).unwrap().unwrap();
        assert_eq!(loaded.last_sync_checkpoint, Some(Checkpoint::new("100")));

        store.clear_checkpoint(account.id).unwrap();
        let loaded = store.get_account(account.id).unwrap().unwrap();
        assert!(loaded.last_sync_checkpoint.is_none());
    }
}

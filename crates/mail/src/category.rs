//! Category resolution
//!
//! Turns a category name into a durable category id, creating the category
//! on first use. Concurrent resolutions of the same new name converge on
//! one row: the store's uniqueness rule rejects the second insert and the
//! loser re-reads the winner's row.

use anyhow::{Context, Result};
use log::debug;

use crate::error::DuplicateCategoryError;
use crate::models::{Category, CategoryId};
use crate::storage::MailStore;

/// Get-or-create over category names scoped to an account
pub struct CategoryResolver<'a> {
    store: &'a dyn MailStore,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(store: &'a dyn MailStore) -> Self {
        Self { store }
    }

    /// Resolve a category name to its id, creating the category if absent
    pub fn resolve(&self, account_id: i64, name: &str) -> Result<CategoryId> {
        if let Some(existing) = self.store.find_category_by_name(account_id, name)? {
            return Ok(existing.id);
        }

        match self.store.create_category(Category::new(account_id, name)) {
            Ok(created) => {
                debug!("Created category '{}' ({}) for account {}", name, created.id, account_id);
                Ok(created.id)
            }
            Err(e) if e.downcast_ref::<DuplicateCategoryError>().is_some() => {
                // Lost a race with another resolver; the winner's row is there now
                self.store
                    .find_category_by_name(account_id, name)?
                    .map(|c| c.id)
                    .with_context(|| format!("Category '{}' vanished after a duplicate insert", name))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, OAuthCredential};
    use crate::storage::{AccountStore, CategoryStore, InMemoryMailStore, SqliteMailStore};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequential_resolves_return_same_id() {
        let store = InMemoryMailStore::new();
        let account = store
            .create_account(Account::new("a@example.com", OAuthCredential::new("t")))
            .unwrap();
        let resolver = CategoryResolver::new(&store);

        let first = resolver.resolve(account.id, "Work").unwrap();
        let second = resolver.resolve(account.id, "Work").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_categories(account.id).unwrap().len(), 1);
    }

    #[test]
    fn test_names_are_scoped_per_account() {
        let store = InMemoryMailStore::new();
        let a = store
            .create_account(Account::new("a@example.com", OAuthCredential::new("t")))
            .unwrap();
        let b = store
            .create_account(Account::new("b@example.com", OAuthCredential::new("t")))
            .unwrap();
        let resolver = CategoryResolver::new(&store);

        assert_ne!(
            resolver.resolve(a.id, "Work").unwrap(),
            resolver.resolve(b.id, "Work").unwrap()
        );
    }

    fn concurrent_resolves_converge(store: Arc<dyn MailStore>, account_id: i64) {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    CategoryResolver::new(store.as_ref())
                        .resolve(account_id, "Newsletters")
                        .unwrap()
                })
            })
            .collect();

        let ids: HashSet<CategoryId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.list_categories(account_id).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_resolves_converge_in_memory() {
        let store = Arc::new(InMemoryMailStore::new());
        let account = store
            .create_account(Account::new("a@example.com", OAuthCredential::new("t")))
            .unwrap();
        concurrent_resolves_converge(store, account.id);
    }

    #[test]
    fn test_concurrent_resolves_converge_sqlite() {
        let store = Arc::new(SqliteMailStore::in_memory().unwrap());
        let account = store
            .create_account(Account::new("a@example.com", OAuthCredential::new("t")))
            .unwrap();
        concurrent_resolves_converge(store, account.id);
    }
}

//! Storage trait definitions

use crate::models::{
    Account, Category, CategoryId, Checkpoint, Email, EmailId, MessageId, OAuthCredential,
    PageRequest,
};
use anyhow::Result;

/// Account persistence
pub trait AccountStore: Send + Sync {
    /// Insert a new account, returning it with its assigned ID
    fn create_account(&self, account: Account) -> Result<Account>;

    /// Get an account by ID
    fn get_account(&self, id: i64) -> Result<Option<Account>>;

    /// Get an account by email address
    fn get_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// List all accounts, oldest first
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Replace the stored OAuth credential
    fn update_credential(&self, id: i64, credential: &OAuthCredential) -> Result<()>;

    /// Persist the change cursor of a completed sync
    fn update_checkpoint(&self, id: i64, checkpoint: &Checkpoint) -> Result<()>;

    /// Forget the change cursor so the next refresh runs a full sync
    fn clear_checkpoint(&self, id: i64) -> Result<()>;

    /// Delete an account together with its emails and categories
    fn delete_account(&self, id: i64) -> Result<()>;
}

/// Category persistence, unique by (account_id, name)
pub trait CategoryStore: Send + Sync {
    /// Find a category by exact name within an account
    fn find_category_by_name(&self, account_id: i64, name: &str) -> Result<Option<Category>>;

    /// Get a category by ID
    fn get_category(&self, id: CategoryId) -> Result<Option<Category>>;

    /// List an account's categories ordered by name
    fn list_categories(&self, account_id: i64) -> Result<Vec<Category>>;

    /// Insert a category, returning it with its assigned ID
    ///
    /// # Errors
    /// Fails with [`DuplicateCategoryError`](crate::error::DuplicateCategoryError)
    /// when the (account_id, name) pair is taken.
    fn create_category(&self, category: Category) -> Result<Category>;

    /// Delete a category; emails referencing it become uncategorized
    fn delete_category(&self, id: CategoryId) -> Result<()>;
}

/// Email persistence, unique by (account_id, remote_id)
pub trait EmailStore: Send + Sync {
    /// Check if an email with this provider ID is stored for the account
    fn exists_by_remote_id(&self, account_id: i64, remote_id: &MessageId) -> Result<bool>;

    /// Insert emails, skipping any whose (account_id, remote_id) is already stored
    ///
    /// Returns the number of rows inserted.
    fn bulk_insert(&self, emails: Vec<Email>) -> Result<usize>;

    /// Reassign the category of a stored email without touching other fields
    ///
    /// Returns false when no such email exists.
    fn update_category_by_remote_id(
        &self,
        account_id: i64,
        remote_id: &MessageId,
        category_id: Option<CategoryId>,
    ) -> Result<bool>;

    /// Delete every email of an account, returning how many were removed
    fn delete_all_for_account(&self, account_id: i64) -> Result<usize>;

    /// Get an email by ID
    fn get_email(&self, id: EmailId) -> Result<Option<Email>>;

    /// Page through an account's emails, newest first, with the total count
    fn get_page(&self, account_id: i64, page: PageRequest) -> Result<(Vec<Email>, usize)>;

    /// Page through an account's emails in one category, newest first
    fn get_page_by_category(
        &self,
        account_id: i64,
        category_id: CategoryId,
        page: PageRequest,
    ) -> Result<(Vec<Email>, usize)>;

    /// Store an AI-generated summary
    fn update_summary(&self, id: EmailId, summary: &str) -> Result<()>;

    /// Set the archived-in-provider flag
    fn set_archived(&self, id: EmailId, archived: bool) -> Result<()>;
}

/// A store implementing every persistence contract
pub trait MailStore: AccountStore + CategoryStore + EmailStore {}

impl<T: AccountStore + CategoryStore + EmailStore> MailStore for T {}

//! Mail crate - Business logic for personal email management
//!
//! This crate provides:
//! - Domain models (Account, Category, Email, labels, pagination)
//! - Label classification and category resolution
//! - Gmail API client and OAuth token refresh
//! - Storage contracts with in-memory and SQLite implementations
//! - Full and incremental sync driven by provider checkpoints
//! - Gemini-backed summaries, categorization and page analysis
//! - Unsubscribe link handling and automated unsubscription
//! - The `MailService` facade used by hosts

pub mod category;
pub mod classify;
pub mod config;
pub mod error;
pub mod gmail;
pub mod llm;
pub mod mailbox;
pub mod models;
pub mod service;
pub mod storage;
pub mod sync;
pub mod unsubscribe;

pub use category::CategoryResolver;
pub use classify::LabelClassifier;
pub use config::{AppConfig, GmailCredentials, SyncConfig, UnsubscribeConfig};
pub use error::{
    CancelledError, CheckpointExpiredError, DuplicateCategoryError, MailError, NotFoundError,
};
pub use gmail::{GmailAuth, GmailClient};
pub use llm::{GeminiClient, LanguageModel, PageAction, PageAnalysis};
pub use mailbox::{
    ChangeSet, CredentialProvider, MailboxReader, RemoteLabelManager, StoredCredential,
};
pub use models::{
    Account, Category, CategoryId, Checkpoint, Email, EmailId, Label, LabelId, LabelTable,
    MessageId, OAuthCredential, PageRequest, PaginatedResult, RemoteMessage,
};
pub use service::MailService;
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{AccountLocks, CancelToken, SyncEngine, SyncMode, SyncStats};
pub use unsubscribe::{
    HttpPageDriver, PageDriver, UnsubscribeErrorKind, UnsubscribeResult, Unsubscriber,
};

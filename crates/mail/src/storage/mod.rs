//! Storage traits and implementations
//!
//! Accounts, categories and emails are persisted behind [`AccountStore`],
//! [`CategoryStore`] and [`EmailStore`]. The in-memory store backs tests;
//! SQLite is the durable store.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{AccountStore, CategoryStore, EmailStore, MailStore};

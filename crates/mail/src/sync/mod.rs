//! Sync engine for fetching and storing mail
//!
//! Provides idempotent sync operations that can be safely retried.

mod cancel;
mod engine;

pub use cancel::{AccountLocks, CancelToken};
pub use engine::{SyncEngine, SyncMode, SyncStats};

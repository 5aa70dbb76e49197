//! Account model representing an authenticated mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque change cursor issued by the mail provider
///
/// For Gmail this is the mailbox `historyId`. The value is never
/// interpreted locally, only handed back to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint(pub String);

impl Checkpoint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Checkpoint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Checkpoint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// OAuth credential owned by a single account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Expiry as unix seconds
    pub expires_at: Option<i64>,
}

impl OAuthCredential {
    /// Seconds before expiry at which a token is treated as stale
    pub const EXPIRY_BUFFER_SECS: i64 = 300;

    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the access token can still be used (with a 5 minute buffer)
    ///
    /// A credential without an expiry is assumed valid.
    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > Utc::now().timestamp() + Self::EXPIRY_BUFFER_SECS,
            None => true,
        }
    }
}

/// A registered mailbox account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique integer identifier (database primary key)
    pub id: i64,
    /// Email address (unique)
    pub email: String,
    /// Display name from the provider profile
    pub display_name: Option<String>,
    /// OAuth credential, never shared between accounts
    pub credential: OAuthCredential,
    /// Change cursor from the last completed sync
    ///
    /// Absent until the first full sync has stored every email.
    pub last_sync_checkpoint: Option<Checkpoint>,
    /// When the account was added
    pub added_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account (id will be assigned by the store)
    pub fn new(email: impl Into<String>, credential: OAuthCredential) -> Self {
        Self {
            id: 0,
            email: email.into(),
            display_name: None,
            credential,
            last_sync_checkpoint: None,
            added_at: Utc::now(),
        }
    }

    /// Create an account with a known ID (loaded from the store)
    pub fn with_id(id: i64, email: impl Into<String>, credential: OAuthCredential) -> Self {
        Self {
            id,
            ..Self::new(email, credential)
        }
    }

    /// Set display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the sync checkpoint
    pub fn with_checkpoint(mut self, checkpoint: impl Into<Checkpoint>) -> Self {
        self.last_sync_checkpoint = Some(checkpoint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_new() {
        let account = Account::new("test@example.com", OAuthCredential::new("tok"));
        assert_eq!(account.id, 0);
        assert_eq!(account.email, "test@example.com");
        assert!(account.display_name.is_none());
        assert!(account.last_sync_checkpoint.is_none());
    }

    #[test]
    fn test_account_with_id() {
        let account = Account::with_id(42, "test@example.com", OAuthCredential::new("tok"))
            .with_checkpoint("100");
        assert_eq!(account.id, 42);
        assert_eq!(account.last_sync_checkpoint, Some(Checkpoint::new("100")));
    }

    #[test]
    fn test_credential_freshness() {
        let now = Utc::now().timestamp();
        assert!(OAuthCredential::new("a").is_fresh());
        assert!(OAuthCredential::new("a").with_expires_at(now + 3600).is_fresh());
        // Inside the 5 minute buffer counts as stale
        assert!(!OAuthCredential::new("a").with_expires_at(now + 60).is_fresh());
        assert!(!OAuthCredential::new("a").with_expires_at(now - 10).is_fresh());
    }

    #[test]
    fn test_serialization() {
        let account = Account::with_id(1, "a@b.com", OAuthCredential::new("t").with_refresh_token("r"))
            .with_checkpoint("55");
        let json = serde_json::to_string(&account).unwrap();
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(account, back);
    }
}

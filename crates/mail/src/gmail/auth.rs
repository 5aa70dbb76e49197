//! Gmail OAuth2 token refresh
//!
//! Accounts arrive with an access token and (usually) a refresh token from
//! the login flow. Before each use the access token is checked against its
//! expiry; a stale one is exchanged for a new one and the new credential is
//! written back to the account store.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::config::GmailCredentials;
use crate::mailbox::CredentialProvider;
use crate::models::{Account, OAuthCredential};
use crate::storage::MailStore;

/// Token refresh and persistence for Gmail accounts
pub struct GmailAuth {
    credentials: GmailCredentials,
    token_url: String,
    store: Arc<dyn MailStore>,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: String,
}

impl GmailAuth {
    /// Google OAuth2 token endpoint
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Create a new GmailAuth instance
    ///
    /// Refreshed credentials are persisted to `store`.
    pub fn new(credentials: GmailCredentials, store: Arc<dyn MailStore>) -> Self {
        Self {
            credentials,
            token_url: Self::TOKEN_URL.to_string(),
            store,
        }
    }

    /// Use another token endpoint (test servers)
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Exchange a refresh token for a new credential
    ///
    /// The refresh token is carried over when Google does not return a new one.
    pub fn refresh_credential(&self, refresh_token: &str) -> Result<OAuthCredential> {
        let mut response = ureq::post(&self.token_url)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")?;

        let mut credential = OAuthCredential::new(token.access_token)
            .with_refresh_token(token.refresh_token.unwrap_or_else(|| refresh_token.to_string()));
        if let Some(expires_in) = token.expires_in {
            credential = credential.with_expires_at(chrono::Utc::now().timestamp() + expires_in as i64);
        }

        Ok(credential)
    }
}

impl CredentialProvider for GmailAuth {
    fn access_token(&self, account: &Account) -> Result<String> {
        if account.credential.is_fresh() {
            return Ok(account.credential.access_token.clone());
        }

        let refresh_token = account
            .credential
            .refresh_token
            .as_deref()
            .with_context(|| format!("Access token for {} expired and no refresh token is stored", account.email))?;

        let credential = self.refresh_credential(refresh_token)?;
        self.store
            .update_credential(account.id, &credential)
            .context("Failed to persist refreshed credential")?;
        info!("Refreshed access token for {}", account.email);

        Ok(credential.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccountStore, InMemoryMailStore};
    use mockito::Server;

    fn credentials() -> GmailCredentials {
        GmailCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_fresh_token_is_used_without_refresh() {
        let store = Arc::new(InMemoryMailStore::new());
        let auth = GmailAuth::new(credentials(), store.clone())
            .with_token_url("http://127.0.0.1:1/unreachable");
        let account = Account::with_id(
            1,
            "a@example.com",
            OAuthCredential::new("fresh")
                .with_expires_at(chrono::Utc::now().timestamp() + 3600),
        );

        assert_eq!(auth.access_token(&account).unwrap(), "fresh");
    }

    #[test]
    fn test_expired_token_is_refreshed_and_persisted() {
        let mut server = Server::new();
        let token = server
            .mock("POST", "/token")
            .with_body(r#"{"access_token":"new-token","expires_in":3600,"token_type":"Bearer"}"#)
            .create();

        let store = Arc::new(InMemoryMailStore::new());
        let account = store
            .create_account(Account::new(
                "a@example.com",
                OAuthCredential::new("old")
                    .with_refresh_token("refresh")
                    .with_expires_at(0),
            ))
            .unwrap();

        let auth = GmailAuth::new(credentials(), store.clone())
            .with_token_url(format!("{}/token", server.url()));

        assert_eq!(auth.access_token(&account).unwrap(), "new-token");
        token.assert();

        let stored = store.get_account(account.id).unwrap().unwrap();
        assert_eq!(stored.credential.access_token, "new-token");
        assert_eq!(stored.credential.refresh_token.as_deref(), Some("refresh"));
        assert!(stored.credential.is_fresh());
    }

    #[test]
    fn test_expired_without_refresh_token_fails() {
        let store = Arc::new(InMemoryMailStore::new());
        let auth = GmailAuth::new(credentials(), store);
        let account = Account::with_id(
            1,
            "a@example.com",
            OAuthCredential::new("old").with_expires_at(0),
        );

        let err = auth.access_token(&account).unwrap_err();
        assert!(err.to_string().contains("no refresh token"));
    }
}

//! Settings and OAuth client configuration
//!
//! The Gmail OAuth client is taken from the first of: credentials baked in
//! at build time, `google-credentials.json` in the config directory (the
//! Google Cloud Console download), or the `GMAIL_CLIENT_ID` and
//! `GMAIL_CLIENT_SECRET` environment variables.
//!
//! Application settings live in `mailsort.json` in the config directory.
//! Every field is optional; a few can be overridden from the environment.

use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::LabelTable;

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Application settings filename in the config directory
const APP_CONFIG_FILE: &str = "mailsort.json";

const CLIENT_ID_ENV: &str = "GMAIL_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "GMAIL_CLIENT_SECRET";

/// OAuth client used to refresh Gmail access tokens
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Where the OAuth client came from
#[derive(Debug, Clone, PartialEq, Eq)]
enum CredentialSource {
    Embedded,
    File(PathBuf),
    Environment,
}

/// Console download; desktop clients use `installed`, web clients `web`
#[derive(Deserialize)]
struct ConsoleCredentialFile {
    installed: Option<ConsoleClient>,
    web: Option<ConsoleClient>,
}

#[derive(Deserialize)]
struct ConsoleClient {
    client_id: String,
    client_secret: String,
}

impl ConsoleCredentialFile {
    fn into_credentials(self) -> Result<GmailCredentials> {
        let client = self
            .installed
            .or(self.web)
            .context("Credentials file has neither an 'installed' nor a 'web' client")?;
        GmailCredentials::from_pair(client.client_id, client.client_secret)
            .context("Credentials file has an empty client_id or client_secret")
    }
}

impl GmailCredentials {
    /// Locate the OAuth client for this installation
    pub fn load() -> Result<Self> {
        let file = config::config_path(CREDENTIALS_FILE);
        let (credentials, source) =
            Self::resolve(file.as_deref(), |key| std::env::var(key).ok())?;
        debug!("Gmail OAuth client loaded from {:?}", source);
        Ok(credentials)
    }

    /// Read a Google Cloud Console credentials file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file::<ConsoleCredentialFile>(path)?.into_credentials()
    }

    /// Parse the contents of a Google Cloud Console credentials file
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<ConsoleCredentialFile>(json)
            .context("Failed to parse credentials JSON")?
            .into_credentials()
    }

    fn resolve(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, CredentialSource)> {
        if let Some(credentials) = Self::embedded() {
            return Ok((credentials, CredentialSource::Embedded));
        }

        if let Some(path) = file.filter(|p| p.exists()) {
            let credentials = Self::from_file(path)?;
            return Ok((credentials, CredentialSource::File(path.to_path_buf())));
        }

        match (env(CLIENT_ID_ENV), env(CLIENT_SECRET_ENV)) {
            (Some(id), Some(secret)) => Self::from_pair(id, secret)
                .map(|c| (c, CredentialSource::Environment))
                .with_context(|| format!("{} or {} is empty", CLIENT_ID_ENV, CLIENT_SECRET_ENV)),
            _ => bail!(
                "No Gmail OAuth client: add {} to the config directory or set {} and {}",
                CREDENTIALS_FILE,
                CLIENT_ID_ENV,
                CLIENT_SECRET_ENV
            ),
        }
    }

    /// Set with `GOOGLE_CLIENT_ID` and `GOOGLE_CLIENT_SECRET` at build time
    fn embedded() -> Option<Self> {
        Self::from_pair(option_env!("GOOGLE_CLIENT_ID")?, option_env!("GOOGLE_CLIENT_SECRET")?)
    }

    fn from_pair(client_id: impl Into<String>, client_secret: impl Into<String>) -> Option<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return None;
        }
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

/// Sync tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Messages per list page (1..=500)
    pub page_size: usize,
    /// Attempts per message fetch
    pub fetch_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            fetch_retries: 3,
        }
    }
}

/// Unsubscribe pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsubscribeConfig {
    /// Pause between emails in a bulk run
    pub request_delay_ms: u64,
    /// Pause between actions on one page
    pub action_delay_ms: u64,
    /// Page load timeout
    pub page_timeout_secs: u64,
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 2000,
            action_delay_ms: 500,
            page_timeout_secs: 30,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file; defaults to `mailsort.db` in the data directory
    pub database_path: Option<PathBuf>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub sync: SyncConfig,
    pub unsubscribe: UnsubscribeConfig,
    /// Replaces the built-in Gmail label table
    pub labels: Option<LabelTable>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            sync: SyncConfig::default(),
            unsubscribe: UnsubscribeConfig::default(),
            labels: None,
        }
    }
}

impl AppConfig {
    /// Load `mailsort.json` if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config: Self = config::load_json_or_default(APP_CONFIG_FILE)?;
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Write the default settings to `mailsort.json` unless it exists
    ///
    /// Returns the path written, or `None` if a file was already there.
    pub fn write_default() -> Result<Option<PathBuf>> {
        if config::config_exists(APP_CONFIG_FILE) {
            return Ok(None);
        }
        config::save_json(APP_CONFIG_FILE, &Self::default()).map(Some)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = config::load_json_file(path)?;
        Ok(config.normalized())
    }

    /// Apply `MAILSORT_DB` and `GEMINI_API_KEY` from `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MAILSORT_DB").filter(|v| !v.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()) {
            self.gemini_api_key = Some(key);
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.sync.page_size = self.sync.page_size.clamp(1, 500);
        self.sync.fetch_retries = self.sync.fetch_retries.max(1);
        self
    }

    /// Resolved database path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::data_dir()
                .map(|dir| dir.join("mailsort.db"))
                .context("Could not determine data directory"),
        }
    }

    /// The label table in effect
    pub fn label_table(&self) -> LabelTable {
        self.labels.clone().unwrap_or_default()
    }
}

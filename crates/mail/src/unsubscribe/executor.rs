//! Automated unsubscription
//!
//! Loads an email's unsubscribe link through a [`PageDriver`], asks the
//! language model how to operate the page, and runs the returned plan step
//! by step. Every outcome, including internal failures, comes back as an
//! [`UnsubscribeResult`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use log::{debug, info, warn};
use serde::Serialize;

use super::link::is_valid_unsubscribe_link;
use crate::config::UnsubscribeConfig;
use crate::llm::{ActionKind, LanguageModel, PageAction};
use crate::models::{Email, EmailId};

/// Page text that confirms an unsubscription
const SUCCESS_PHRASES: [&str; 6] = [
    "successfully unsubscribed",
    "you have been unsubscribed",
    "removed from our mailing list",
    "unsubscribe successful",
    "email preferences updated",
    "subscription cancelled",
];

/// Elements styled as a success notice
const SUCCESS_SELECTORS: &str = ".success, .confirmation, #success, #confirmation, .alert-success";

/// Candidates for the click fallback
const CLICKABLE: &str = "button, input[type='button'], input[type='submit'], a";
const CLICK_FALLBACK_TEXT: [&str; 3] = ["unsubscribe", "remove", "opt"];

const SUBMIT_BUTTONS: &str = "input[type='submit'], button[type='submit']";

const DEFAULT_WAIT: Duration = Duration::from_secs(2);

/// Opens pages for the executor
pub trait PageDriver: Send + Sync {
    /// Load `url`, failing if it cannot be reached within `timeout`
    fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn PageSession>>;
}

/// A loaded page
pub trait PageSession {
    /// Current HTML
    fn html(&mut self) -> Result<String>;

    /// Visible text of the body
    fn body_text(&mut self) -> Result<String>;

    /// Number of elements matching a CSS selector
    fn count(&mut self, selector: &str) -> Result<usize>;

    fn click(&mut self, selector: &str) -> Result<()>;

    /// Click the first element matching `selector` whose text contains one
    /// of `needles` (case-insensitive); false when none does
    fn click_text(&mut self, selector: &str, needles: &[&str]) -> Result<bool>;

    fn fill(&mut self, selector: &str, value: &str) -> Result<()>;

    fn select(&mut self, selector: &str, value: &str) -> Result<()>;
}

/// Why an unsubscribe attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeErrorKind {
    NoLink,
    InvalidLink,
    NavigationError,
    AiAnalysisError,
    InvalidPage,
    ActionExecutionError,
    AuthRequired,
    EmailNotFound,
}

impl UnsubscribeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLink => "no_link",
            Self::InvalidLink => "invalid_link",
            Self::NavigationError => "navigation_error",
            Self::AiAnalysisError => "ai_analysis_error",
            Self::InvalidPage => "invalid_page",
            Self::ActionExecutionError => "action_execution_error",
            Self::AuthRequired => "auth_required",
            Self::EmailNotFound => "email_not_found",
        }
    }
}

impl std::fmt::Display for UnsubscribeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one unsubscribe attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsubscribeResult {
    pub success: bool,
    /// The page showed a success phrase or success element afterwards
    pub verified: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UnsubscribeErrorKind>,
}

impl UnsubscribeResult {
    pub fn succeeded(message: impl Into<String>, verified: bool) -> Self {
        Self {
            success: true,
            verified,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(kind: UnsubscribeErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            verified: false,
            message: message.into(),
            error: Some(kind),
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.error == Some(UnsubscribeErrorKind::AuthRequired)
    }
}

/// Runs unsubscribe plans against live pages
pub struct Unsubscriber {
    driver: Arc<dyn PageDriver>,
    model: Arc<dyn LanguageModel>,
    config: UnsubscribeConfig,
}

impl Unsubscriber {
    pub fn new(driver: Arc<dyn PageDriver>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            driver,
            model,
            config: UnsubscribeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UnsubscribeConfig) -> Self {
        self.config = config;
        self
    }

    /// Attempt to unsubscribe from the list an email came from
    pub fn unsubscribe(&self, email: &Email) -> UnsubscribeResult {
        let link = match usable_link(email) {
            Ok(link) => link,
            Err(rejected) => return rejected,
        };

        let result = self.run(link, &email.sender);
        match &result.error {
            None => info!("Unsubscribed from {} ({})", email.sender, link),
            Some(kind) => warn!("Unsubscribe from {} failed ({}): {}", email.sender, kind, result.message),
        }
        result
    }

    /// Unsubscribe from several emails, one at a time
    ///
    /// Consecutive attempts are spaced by the configured request delay.
    /// One email's failure never affects the others.
    pub fn bulk_unsubscribe(&self, emails: &[Email]) -> BTreeMap<EmailId, UnsubscribeResult> {
        let mut results = BTreeMap::new();
        for (i, email) in emails.iter().enumerate() {
            if i > 0 {
                thread::sleep(Duration::from_millis(self.config.request_delay_ms));
            }
            results.insert(email.id, self.unsubscribe(email));
        }
        results
    }

    fn run(&self, link: &str, sender: &str) -> UnsubscribeResult {
        let timeout = Duration::from_secs(self.config.page_timeout_secs);

        let mut page = match self.driver.open(link, timeout) {
            Ok(page) => page,
            Err(e) => {
                return UnsubscribeResult::failed(
                    UnsubscribeErrorKind::NavigationError,
                    format!("Failed to navigate to page: {:#}", e),
                );
            }
        };

        let html = match page.html() {
            Ok(html) => html,
            Err(e) => {
                return UnsubscribeResult::failed(
                    UnsubscribeErrorKind::NavigationError,
                    format!("Failed to get page content: {:#}", e),
                );
            }
        };

        let analysis = match self.model.analyze_unsubscribe_page(&html, link) {
            Ok(analysis) => analysis,
            Err(e) => {
                return UnsubscribeResult::failed(
                    UnsubscribeErrorKind::AiAnalysisError,
                    format!("Failed to analyze page with AI: {:#}", e),
                );
            }
        };
        debug!("Page analysis for {}: {}", link, analysis.reasoning);

        if analysis.requires_auth {
            return UnsubscribeResult::failed(
                UnsubscribeErrorKind::AuthRequired,
                "Page requires authentication to unsubscribe",
            );
        }

        if !analysis.is_unsubscribe_page {
            return UnsubscribeResult::failed(
                UnsubscribeErrorKind::InvalidPage,
                "Page does not appear to be a valid unsubscribe page",
            );
        }

        for (i, action) in analysis.actions.iter().enumerate() {
            if i > 0 {
                thread::sleep(Duration::from_millis(self.config.action_delay_ms));
            }
            if let Err(e) = self.execute_action(page.as_mut(), action) {
                return UnsubscribeResult::failed(
                    UnsubscribeErrorKind::ActionExecutionError,
                    format!(
                        "Failed to execute action {} ({:?}): {:#}",
                        i + 1,
                        action.action,
                        e
                    ),
                );
            }
        }

        if verify_success(page.as_mut()) {
            UnsubscribeResult::succeeded(format!("Successfully unsubscribed from {}", sender), true)
        } else {
            // Completed plans count as success even without confirmation
            UnsubscribeResult::succeeded(
                format!("Unsubscribe actions completed for {} (verification unclear)", sender),
                false,
            )
        }
    }

    fn execute_action(&self, page: &mut dyn PageSession, action: &PageAction) -> Result<()> {
        let selector = action.selector.as_str();
        match action.action {
            ActionKind::Click => {
                if page.count(selector).unwrap_or(0) > 0 {
                    return page.click(selector);
                }
                if page.click_text(CLICKABLE, &CLICK_FALLBACK_TEXT)? {
                    debug!("Clicked fallback element for missing selector {}", selector);
                    return Ok(());
                }
                bail!("element not found: {}", selector)
            }
            ActionKind::Fill => {
                if page.count(selector).unwrap_or(0) == 0 {
                    bail!("input element not found: {}", selector);
                }
                page.fill(selector, &action.value)
            }
            ActionKind::Select => page.select(selector, &action.value),
            ActionKind::Wait => {
                let max = Duration::from_secs(self.config.page_timeout_secs);
                thread::sleep(parse_wait(&action.value).min(max));
                Ok(())
            }
            ActionKind::Submit => {
                if !selector.is_empty() {
                    if page.count(selector).unwrap_or(0) == 0 {
                        bail!("form not found: {}", selector);
                    }
                    return page.click(selector);
                }
                if page.count(SUBMIT_BUTTONS).unwrap_or(0) > 0 {
                    return page.click(SUBMIT_BUTTONS);
                }
                bail!("no submit button found")
            }
            ActionKind::Unknown => bail!("unknown action"),
        }
    }
}

/// The email's unsubscribe link, or the result rejecting it
///
/// Makes no network calls.
pub fn usable_link(email: &Email) -> Result<&str, UnsubscribeResult> {
    let Some(link) = email.unsubscribe_link.as_deref().filter(|l| !l.is_empty()) else {
        return Err(UnsubscribeResult::failed(
            UnsubscribeErrorKind::NoLink,
            "No unsubscribe link found in email",
        ));
    };

    if !is_valid_unsubscribe_link(link) {
        return Err(UnsubscribeResult::failed(
            UnsubscribeErrorKind::InvalidLink,
            "Invalid or suspicious unsubscribe link",
        ));
    }

    Ok(link)
}

/// Look for a success phrase in the page text or a success-styled element
fn verify_success(page: &mut dyn PageSession) -> bool {
    if let Ok(text) = page.body_text() {
        let lower = text.to_lowercase();
        if SUCCESS_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            return true;
        }
    }
    page.count(SUCCESS_SELECTORS).unwrap_or(0) > 0
}

/// Parse a wait duration such as `500ms`, `2s`, `1.5s`, `1m` or `3`
///
/// Anything else waits two seconds.
pub fn parse_wait(value: &str) -> Duration {
    let value = value.trim();
    let parsed = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok())
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<f64>()
            .ok()
            .and_then(|m| Duration::try_from_secs_f64(m * 60.0).ok())
    } else {
        value.parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok())
    };
    parsed.unwrap_or(DEFAULT_WAIT)
}

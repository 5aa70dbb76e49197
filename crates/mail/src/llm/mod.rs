//! Language-model contract
//!
//! Summaries, categorization and unsubscribe-page analysis are delegated to
//! a generative model behind [`LanguageModel`]. [`GeminiClient`] is the
//! production implementation.

mod gemini;

pub use gemini::GeminiClient;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{Category, CategoryId, Email};

/// Generative-model operations used by the mail service
pub trait LanguageModel: Send + Sync {
    /// One or two sentence summary of an email
    fn summarize(&self, email: &Email) -> Result<String>;

    /// Pick the candidate categories an email belongs to
    ///
    /// Returns ids drawn from `candidates` only, best match first. Empty
    /// when nothing fits.
    fn categorize(&self, email: &Email, candidates: &[Category]) -> Result<Vec<CategoryId>>;

    /// Decide whether a page is an unsubscribe page and how to operate it
    fn analyze_unsubscribe_page(&self, html: &str, url: &str) -> Result<PageAnalysis>;
}

/// What to do on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Fill,
    Select,
    Wait,
    Submit,
    #[serde(other)]
    Unknown,
}

/// One step of an unsubscribe plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAction {
    pub action: ActionKind,
    /// CSS selector (or a description the model could not turn into one)
    #[serde(default)]
    pub selector: String,
    /// Text to fill, option to select, or wait duration
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub reasoning: String,
}

impl PageAction {
    pub fn new(action: ActionKind, selector: impl Into<String>) -> Self {
        Self {
            action,
            selector: selector.into(),
            value: String::new(),
            reasoning: String::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }
}

/// The model's reading of an unsubscribe page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageAnalysis {
    pub is_unsubscribe_page: bool,
    pub requires_auth: bool,
    /// Steps to run in order
    pub actions: Vec<PageAction>,
    pub success_indicators: Vec<String>,
    pub error_indicators: Vec<String>,
    pub reasoning: String,
}

impl PageAnalysis {
    /// Parse the JSON object embedded in free-form model output
    ///
    /// The object is taken from the first `{` to the last `}`. Output that
    /// does not parse yields a "not an unsubscribe page" analysis carrying
    /// the reason.
    pub fn from_model_output(text: &str) -> Self {
        let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
            return Self::unparseable("Failed to parse AI response as JSON".to_string());
        };
        if end < start {
            return Self::unparseable("Failed to parse AI response as JSON".to_string());
        }

        match serde_json::from_str(&text[start..=end]) {
            Ok(analysis) => analysis,
            Err(e) => Self::unparseable(format!("Failed to parse AI response: {}", e)),
        }
    }

    fn unparseable(reasoning: String) -> Self {
        Self {
            reasoning,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json() {
        let output = r##"Here is the analysis:
```json
{
  "is_unsubscribe_page": true,
  "requires_auth": false,
  "actions": [
    {"action": "fill", "selector": "#email", "value": "me@example.com"},
    {"action": "click", "selector": "button.unsubscribe", "reasoning": "confirm"}
  ],
  "reasoning": "Form with a single confirm button"
}
```"##;

        let analysis = PageAnalysis::from_model_output(output);
        assert!(analysis.is_unsubscribe_page);
        assert!(!analysis.requires_auth);
        assert_eq!(analysis.actions.len(), 2);
        assert_eq!(analysis.actions[0].action, ActionKind::Fill);
        assert_eq!(analysis.actions[0].value, "me@example.com");
        assert_eq!(analysis.actions[1].selector, "button.unsubscribe");
    }

    #[test]
    fn test_unknown_action_kind() {
        let analysis = PageAnalysis::from_model_output(
            r#"{"is_unsubscribe_page": true, "actions": [{"action": "hover", "selector": "a"}]}"#,
        );
        assert_eq!(analysis.actions[0].action, ActionKind::Unknown);
    }

    #[test]
    fn test_garbage_degrades_to_not_unsubscribe_page() {
        let analysis = PageAnalysis::from_model_output("I could not analyze this page.");
        assert!(!analysis.is_unsubscribe_page);
        assert!(analysis.actions.is_empty());
        assert!(analysis.reasoning.contains("Failed to parse"));

        let analysis = PageAnalysis::from_model_output("{ not json }");
        assert!(!analysis.is_unsubscribe_page);
        assert!(analysis.reasoning.starts_with("Failed to parse AI response:"));
    }
}

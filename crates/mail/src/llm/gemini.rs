//! Gemini `generateContent` client
//!
//! Uses synchronous HTTP (ureq), like the Gmail client.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{LanguageModel, PageAnalysis};
use crate::models::{Category, CategoryId, Email};

/// Client for the Gemini generative language API
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

impl GeminiClient {
    const BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the client at another endpoint (test servers, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send one prompt and return the generated text
    fn generate(&self, prompt: &str) -> Result<Option<String>> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let mut response = ureq::post(&url)
            .header("x-goog-api-key", &self.api_key)
            .send_json(&request)
            .context("Failed to send generateContent request")?;

        let generated: GenerateResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse generateContent response")?;

        Ok(generated.first_text().map(|t| t.trim().to_string()))
    }
}

impl LanguageModel for GeminiClient {
    fn summarize(&self, email: &Email) -> Result<String> {
        let prompt = format!(
            "Summarize this email in 1-2 sentences. Be concise and focus on the key action \
             items or main points.\n\nSubject: {}\nFrom: {}\nBody: {}\n\nSummary:",
            email.subject, email.sender, email.body
        );

        self.generate(&prompt)?
            .filter(|s| !s.is_empty())
            .context("Model returned no summary")
    }

    fn categorize(&self, email: &Email, candidates: &[Category]) -> Result<Vec<CategoryId>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listing: String = candidates
            .iter()
            .map(|c| format!("- {}: {}\n", c.name, c.description.as_deref().unwrap_or_default()))
            .collect();

        let prompt = format!(
            "Given the following email and categories, determine which categories this email \
             belongs to.\n\nEmail:\nSubject: {}\nFrom: {}\nBody: {}\n\nAvailable Categories:\n{}\n\
             Instructions:\n\
             - Return only the category names that match, best match first, separated by commas\n\
             - If no categories match, return \"NONE\"\n\
             - Be strict - only categorize if there's a clear match with the category description\n\n\
             Categories:",
            email.subject, email.sender, email.body, listing
        );

        let Some(answer) = self.generate(&prompt)? else {
            return Ok(Vec::new());
        };
        debug!("Categorization answer: {}", answer);

        Ok(match_category_names(&answer, candidates))
    }

    fn analyze_unsubscribe_page(&self, html: &str, url: &str) -> Result<PageAnalysis> {
        let prompt = format!(
            r#"Analyze this webpage to determine if it's an unsubscribe page and how to interact with it.

URL: {url}

Page Content (HTML):
{html}

Instructions:
1. Determine if this is an unsubscribe page
2. Identify if authentication/login is required
3. Provide step-by-step actions to unsubscribe (use CSS selectors when possible)
4. Identify success and error indicators
5. Provide reasoning for your analysis

Return your analysis as JSON with this structure:
{{
  "is_unsubscribe_page": true/false,
  "requires_auth": true/false,
  "actions": [
    {{
      "action": "fill|click|select|wait|submit",
      "selector": "CSS selector",
      "value": "text to fill, option to select, or wait duration such as 2s",
      "reasoning": "why this action is needed"
    }}
  ],
  "success_indicators": ["text or selectors that indicate success"],
  "error_indicators": ["text or selectors that indicate errors"],
  "reasoning": "detailed explanation of the page analysis"
}}

JSON:"#
        );

        let text = self
            .generate(&prompt)?
            .context("Model returned no page analysis")?;
        Ok(PageAnalysis::from_model_output(&text))
    }
}

/// Map a comma-separated model answer to candidate ids, in answer order
///
/// Names match case-insensitively; unknown names and duplicates are dropped.
fn match_category_names(answer: &str, candidates: &[Category]) -> Vec<CategoryId> {
    if answer.trim().eq_ignore_ascii_case("NONE") {
        return Vec::new();
    }

    let mut ids = Vec::new();
    for name in answer.split(',').map(str::trim) {
        if let Some(category) = candidates.iter().find(|c| c.name.eq_ignore_ascii_case(name))
            && !ids.contains(&category.id)
        {
            ids.push(category.id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn reply(text: &str) -> String {
        serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        })
        .to_string()
    }

    fn category(id: i64, name: &str) -> Category {
        let mut c = Category::new(1, name);
        c.id = CategoryId(id);
        c
    }

    fn email() -> Email {
        Email::builder(1, "m1")
            .sender("boss@example.com")
            .subject("Quarterly report")
            .body("Please review the attached report by Friday.")
            .build()
    }

    #[test]
    fn test_match_category_names() {
        let candidates = vec![category(1, "Work"), category(2, "Travel")];
        assert_eq!(
            match_category_names("travel, Work, Unknown, work", &candidates),
            vec![CategoryId(2), CategoryId(1)]
        );
        assert!(match_category_names("NONE", &candidates).is_empty());
    }

    #[test]
    fn test_summarize() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_header("x-goog-api-key", "key")
            .with_body(reply("  Review the report by Friday.\n"))
            .create();

        let client = GeminiClient::new("key", "gemini-test").with_base_url(server.url());
        let summary = client.summarize(&email()).unwrap();

        assert_eq!(summary, "Review the report by Friday.");
        mock.assert();
    }

    #[test]
    fn test_categorize_skips_call_without_candidates() {
        let mut server = Server::new();
        let mock = server.mock("POST", mockito::Matcher::Any).expect(0).create();

        let client = GeminiClient::new("key", "gemini-test").with_base_url(server.url());
        assert!(client.categorize(&email(), &[]).unwrap().is_empty());
        mock.assert();
    }

    #[test]
    fn test_categorize() {
        let mut server = Server::new();
        server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_body(reply("Work"))
            .create();

        let client = GeminiClient::new("key", "gemini-test").with_base_url(server.url());
        let ids = client
            .categorize(&email(), &[category(1, "Work"), category(2, "Travel")])
            .unwrap();
        assert_eq!(ids, vec![CategoryId(1)]);
    }

    #[test]
    fn test_analyze_page() {
        let mut server = Server::new();
        server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_body(reply(
                r##"{"is_unsubscribe_page": true, "requires_auth": false, "actions": [{"action": "click", "selector": "#confirm"}]}"##,
            ))
            .create();

        let client = GeminiClient::new("key", "gemini-test").with_base_url(server.url());
        let analysis = client
            .analyze_unsubscribe_page("<button id=confirm>Unsubscribe</button>", "https://x.example/unsubscribe")
            .unwrap();
        assert!(analysis.is_unsubscribe_page);
        assert_eq!(analysis.actions.len(), 1);
    }

    #[test]
    fn test_http_error_is_error() {
        let mut server = Server::new();
        server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_status(500)
            .create();

        let client = GeminiClient::new("key", "gemini-test").with_base_url(server.url());
        assert!(client.summarize(&email()).is_err());
    }
}

//! Fetch-only page driver
//!
//! Loads pages over plain HTTP. Plans made only of waits succeed, which
//! covers one-click pages that unsubscribe on load. Element interaction
//! needs a scripted browser behind [`PageDriver`] and fails here.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;

use super::executor::{PageDriver, PageSession};

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid script regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// [`PageDriver`] backed by a single GET request
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpPageDriver;

impl HttpPageDriver {
    pub fn new() -> Self {
        Self
    }
}

impl PageDriver for HttpPageDriver {
    fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn PageSession>> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        let mut response = agent
            .get(url)
            .header("User-Agent", "mailsort/0.1")
            .call()
            .with_context(|| format!("Failed to load {}", url))?;

        let html = response
            .body_mut()
            .read_to_string()
            .context("Failed to read page body")?;

        Ok(Box::new(StaticPage { html }))
    }
}

/// A page loaded once and never changed
struct StaticPage {
    html: String,
}

impl PageSession for StaticPage {
    fn html(&mut self) -> Result<String> {
        Ok(self.html.clone())
    }

    fn body_text(&mut self) -> Result<String> {
        Ok(html_to_text(&self.html))
    }

    fn count(&mut self, _selector: &str) -> Result<usize> {
        Ok(0)
    }

    fn click(&mut self, selector: &str) -> Result<()> {
        bail!("cannot click {} without a browser", selector)
    }

    fn click_text(&mut self, _selector: &str, _needles: &[&str]) -> Result<bool> {
        Ok(false)
    }

    fn fill(&mut self, selector: &str, _value: &str) -> Result<()> {
        bail!("cannot fill {} without a browser", selector)
    }

    fn select(&mut self, selector: &str, _value: &str) -> Result<()> {
        bail!("cannot select in {} without a browser", selector)
    }
}

/// Visible text of an HTML document, whitespace collapsed
fn html_to_text(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let text = TAG.replace_all(&without_code, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><style>p { color: red }</style></head>\
                    <body><h1>Done</h1>\n<p>You have been   unsubscribed.</p>\
                    <script>track()</script></body></html>";
        assert_eq!(html_to_text(html), "Done You have been unsubscribed.");
    }

    #[test]
    fn test_open_reads_page() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/unsubscribe")
            .with_body("<p>Unsubscribe successful</p>")
            .create();

        let mut page = HttpPageDriver::new()
            .open(&format!("{}/unsubscribe", server.url()), Duration::from_secs(5))
            .unwrap();

        assert_eq!(page.body_text().unwrap(), "Unsubscribe successful");
        assert_eq!(page.count("#anything").unwrap(), 0);
        assert!(page.click("#confirm").is_err());
        mock.assert();
    }

    #[test]
    fn test_open_fails_on_http_error() {
        let mut server = Server::new();
        server.mock("GET", "/gone").with_status(404).create();

        let result = HttpPageDriver::new().open(&format!("{}/gone", server.url()), Duration::from_secs(5));
        assert!(result.is_err());
    }
}

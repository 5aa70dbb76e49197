//! Unsubscribe link extraction and validation

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Substrings that mark a URL as an unsubscribe target
const LINK_KEYWORDS: [&str; 6] = [
    "unsubscribe",
    "opt-out",
    "remove",
    "list-unsubscribe",
    "email-preferences",
    "subscription",
];

/// Angle-bracketed entries of a List-Unsubscribe header (RFC 2369)
static HEADER_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]+)>").expect("valid header entry regex"));

/// Body hyperlink patterns, tried in order
static BODY_LINKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["unsubscribe", "opt-out", "remove", "email-preferences", "subscription"]
        .iter()
        .map(|keyword| {
            Regex::new(&format!(r#"href=["']([^"']*{}[^"']*)["']"#, regex::escape(keyword)))
                .expect("valid body link regex")
        })
        .collect()
});

/// Whether a link may be followed for automated unsubscription
///
/// It must be an absolute https URL with a host and mention one of the
/// unsubscribe keywords.
pub fn is_valid_unsubscribe_link(link: &str) -> bool {
    let Ok(url) = Url::parse(link) else {
        return false;
    };
    if url.scheme() != "https" || url.host_str().is_none() {
        return false;
    }
    let lower = link.to_lowercase();
    LINK_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Find the unsubscribe link of a message
///
/// The https entry of the List-Unsubscribe header wins. Otherwise body
/// hyperlinks are matched keyword by keyword and the first https (or
/// protocol-relative) target is returned.
pub fn extract_unsubscribe_link(list_unsubscribe: Option<&str>, body: &str) -> Option<String> {
    if let Some(header) = list_unsubscribe
        && let Some(link) = HEADER_ENTRY
            .captures_iter(header)
            .map(|c| c[1].trim().to_string())
            .find(|link| link.starts_with("https://"))
    {
        return Some(link);
    }

    for pattern in BODY_LINKS.iter() {
        for captures in pattern.captures_iter(body) {
            let link = captures[1].trim();
            if link.starts_with("https://") {
                return Some(link.to_string());
            }
            if link.starts_with("//") {
                return Some(format!("https:{}", link));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(is_valid_unsubscribe_link("https://example.com/unsubscribe?id=1"));
        assert!(is_valid_unsubscribe_link("https://example.com/Email-Preferences"));
        assert!(!is_valid_unsubscribe_link("http://example.com/unsubscribe"));
        assert!(!is_valid_unsubscribe_link("https://example.com/promo"));
        assert!(!is_valid_unsubscribe_link(""));
        assert!(!is_valid_unsubscribe_link("mailto:unsubscribe@example.com"));
    }

    #[test]
    fn test_header_beats_body() {
        let body = r#"<a href="https://example.com/body/unsubscribe">x</a>"#;
        assert_eq!(
            extract_unsubscribe_link(Some("<https://example.com/header/unsub>"), body),
            Some("https://example.com/header/unsub".to_string())
        );
    }

    #[test]
    fn test_mailto_header_falls_back_to_body() {
        let body = r#"<a href='https://example.com/opt-out?u=9'>Opt out</a>"#;
        assert_eq!(
            extract_unsubscribe_link(Some("<mailto:leave@example.com>"), body),
            Some("https://example.com/opt-out?u=9".to_string())
        );
    }

    #[test]
    fn test_insecure_body_links_are_skipped() {
        let body = r#"
            <a href="http://example.com/unsubscribe">insecure</a>
            <a href="//cdn.example.com/remove/me">relative</a>
        "#;
        assert_eq!(
            extract_unsubscribe_link(None, body),
            Some("https://cdn.example.com/remove/me".to_string())
        );
    }

    #[test]
    fn test_keyword_order_decides() {
        let body = r#"
            <a href="https://example.com/subscription/manage">manage</a>
            <a href="https://example.com/unsubscribe/now">leave</a>
        "#;
        assert_eq!(
            extract_unsubscribe_link(None, body),
            Some("https://example.com/unsubscribe/now".to_string())
        );
    }

    #[test]
    fn test_no_link() {
        assert_eq!(extract_unsubscribe_link(None, "Plain text, no links"), None);
    }
}

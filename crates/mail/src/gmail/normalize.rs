//! Gmail API response normalization
//!
//! Converts Gmail API messages to [`RemoteMessage`]s.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{TimeZone, Utc};

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{MessageId, RemoteMessage};
use crate::unsubscribe::extract_unsubscribe_link;

/// Normalize a Gmail API message to a RemoteMessage
///
/// The body is the plain-text part when present, else the HTML part, else
/// the snippet. The unsubscribe link is looked up in the List-Unsubscribe
/// header and then in the HTML (or text) body.
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<RemoteMessage> {
    let id = MessageId::new(&gmail_msg.id);

    let payload = gmail_msg
        .payload
        .as_ref()
        .context("Message has no payload")?;

    let sender = extract_header(payload, "From").unwrap_or_default();
    let subject = extract_header(payload, "Subject").unwrap_or_default();

    // Parse internal date (milliseconds since epoch)
    let internal_date: i64 = gmail_msg.internal_date.parse().unwrap_or(0);
    let received_at = Utc
        .timestamp_millis_opt(internal_date)
        .single()
        .unwrap_or_else(Utc::now);

    let body_text = extract_body(payload, "text/plain");
    let body_html = extract_body(payload, "text/html");

    let unsubscribe_link = extract_unsubscribe_link(
        extract_header(payload, "List-Unsubscribe").as_deref(),
        body_html.as_deref().or(body_text.as_deref()).unwrap_or_default(),
    );

    let body = body_text
        .or(body_html)
        .unwrap_or_else(|| decode_html_entities(&gmail_msg.snippet));

    Ok(RemoteMessage::new(id)
        .sender(sender)
        .subject(subject)
        .body(body)
        .label_ids(gmail_msg.label_ids.unwrap_or_default())
        .received_at(received_at)
        .unsubscribe_link(unsubscribe_link))
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Extract the first body of the given MIME type
fn extract_body(payload: &MessagePayload, mime: &str) -> Option<String> {
    // Single-part message
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && payload
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with(mime))
    {
        return decode_base64_body(data);
    }

    payload
        .parts
        .as_ref()
        .and_then(|parts| find_in_parts(parts, mime))
}

/// Recursively search message parts for content of a MIME type
fn find_in_parts(parts: &[MessagePart], mime: &str) -> Option<String> {
    for part in parts {
        if part
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with(mime))
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_in_parts(nested, mime)
        {
            return Some(text);
        }
    }

    None
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data)
            && let Ok(s) = String::from_utf8(decoded)
        {
            return Some(s);
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

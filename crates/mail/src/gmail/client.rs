//! Gmail API HTTP client
//!
//! Implements [`MailboxReader`] and [`RemoteLabelManager`] over the Gmail
//! REST API. Uses synchronous HTTP (ureq) to be executor-agnostic. The
//! client holds no credentials; every call takes an access token.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use rayon::prelude::*;

use super::api::{
    CreateLabelRequest, GmailLabel, GmailMessage, HistoryResponse, ListLabelsResponse,
    ListMessagesResponse, MessageRef, ModifyMessageRequest, ProfileResponse,
};
use super::normalize_message;
use crate::error::{CancelledError, CheckpointExpiredError};
use crate::mailbox::{ChangeSet, MailboxReader, RemoteLabelManager};
use crate::models::{Checkpoint, Label, MessageId, RemoteMessage};
use crate::sync::CancelToken;

/// Gmail API client
pub struct GmailClient {
    base_url: String,
    page_size: usize,
    fetch_retries: u32,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the list endpoint accepts
    pub const MAX_PAGE_SIZE: usize = 500;

    /// Create a client for the public Gmail API
    pub fn new() -> Self {
        Self {
            base_url: Self::BASE_URL.to_string(),
            page_size: Self::MAX_PAGE_SIZE,
            fetch_retries: 3,
        }
    }

    /// Point the client at another endpoint (test servers, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Messages per list page, clamped to 1..=500
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, Self::MAX_PAGE_SIZE);
        self
    }

    /// Attempts per message fetch (at least one)
    pub fn with_fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = retries.max(1);
        self
    }

    /// List one page of message IDs
    pub fn list_messages(
        &self,
        access_token: &str,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            self.base_url, self.page_size
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &bearer(access_token))
            .call()
            .context("Failed to send list messages request")?;

        let list: ListMessagesResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")?;

        Ok(list)
    }

    /// List ALL message IDs, following page tokens until exhausted
    pub fn list_message_ids(
        &self,
        access_token: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<MessageRef>> {
        let mut all_messages: Vec<MessageRef> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            cancel.check()?;
            let response = self.list_messages(access_token, page_token.as_deref())?;

            if let Some(messages) = response.messages {
                all_messages.extend(messages);
            }

            debug!(
                "Listed {} message ids (estimate {:?})",
                all_messages.len(),
                response.result_size_estimate
            );

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_messages)
    }

    /// Get full message details by ID
    pub fn get_message(&self, access_token: &str, id: &MessageId) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            id.as_str()
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &bearer(access_token))
            .call()
            .context("Failed to send get message request")?;

        let message: GmailMessage = response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")?;

        Ok(message)
    }

    /// Get a message with exponential backoff retry
    fn get_message_with_retry(&self, access_token: &str, id: &MessageId) -> Result<GmailMessage> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;

        loop {
            match self.get_message(access_token, id) {
                Ok(msg) => return Ok(msg),
                Err(e) if attempt >= self.fetch_retries => return Err(e),
                Err(e) => {
                    debug!("Fetch of {} failed (attempt {}): {:#}", id.as_str(), attempt, e);
                    // Add jitter to delay
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch and normalize messages in parallel
    ///
    /// A message that cannot be fetched or normalized is logged and left
    /// out; the rest are returned in input order.
    pub fn fetch_messages(
        &self,
        access_token: &str,
        ids: &[MessageId],
        cancel: &CancelToken,
    ) -> Result<Vec<RemoteMessage>> {
        let results: Vec<Result<RemoteMessage>> = ids
            .par_iter()
            .map(|id| {
                cancel.check()?;
                let message = self.get_message_with_retry(access_token, id)?;
                normalize_message(message)
            })
            .collect();

        cancel.check()?;

        let mut messages = Vec::with_capacity(results.len());
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(message) => messages.push(message),
                Err(e) if e.downcast_ref::<CancelledError>().is_some() => return Err(e),
                Err(e) => warn!("Skipping message {}: {:#}", id.as_str(), e),
            }
        }

        Ok(messages)
    }

    /// List one page of history since a given historyId
    ///
    /// # Errors
    /// Returns [`CheckpointExpiredError`] if the history ID is too old (404)
    /// or rejected as invalid (400)
    pub fn list_history(
        &self,
        access_token: &str,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}\
             &historyTypes=messageAdded&historyTypes=labelAdded&historyTypes=labelRemoved",
            self.base_url,
            urlencoding::encode(start_history_id)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = ureq::get(&url)
            .header("Authorization", &bearer(access_token))
            .call();

        match response {
            Ok(mut resp) => {
                let history: HistoryResponse = resp
                    .body_mut()
                    .read_json()
                    .context("Failed to parse history response")?;
                Ok(history)
            }
            Err(ureq::Error::StatusCode(400 | 404)) => Err(CheckpointExpiredError.into()),
            Err(e) => Err(anyhow::anyhow!("Failed to fetch history: {}", e)),
        }
    }

    /// Get the mailbox profile (address and current historyId)
    pub fn get_profile(&self, access_token: &str) -> Result<ProfileResponse> {
        let url = format!("{}/users/me/profile", self.base_url);

        let mut response = ureq::get(&url)
            .header("Authorization", &bearer(access_token))
            .call()
            .context("Failed to send profile request")?;

        let profile: ProfileResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse profile response")?;

        Ok(profile)
    }

    /// List all labels as returned by the API
    pub fn list_gmail_labels(&self, access_token: &str) -> Result<Vec<GmailLabel>> {
        let url = format!("{}/users/me/labels", self.base_url);

        let mut response = ureq::get(&url)
            .header("Authorization", &bearer(access_token))
            .call()
            .context("Failed to send list labels request")?;

        let labels: ListLabelsResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse labels response")?;

        Ok(labels.labels.unwrap_or_default())
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxReader for GmailClient {
    fn list_all(&self, access_token: &str, cancel: &CancelToken) -> Result<Vec<RemoteMessage>> {
        let ids: Vec<MessageId> = self
            .list_message_ids(access_token, cancel)?
            .into_iter()
            .map(|r| MessageId::new(r.id))
            .collect();

        debug!("Fetching {} messages", ids.len());
        self.fetch_messages(access_token, &ids, cancel)
    }

    fn current_checkpoint(&self, access_token: &str) -> Result<Checkpoint> {
        let profile = self.get_profile(access_token)?;
        Ok(Checkpoint::new(profile.history_id))
    }

    fn list_changes_since(
        &self,
        access_token: &str,
        checkpoint: &Checkpoint,
        cancel: &CancelToken,
    ) -> Result<ChangeSet> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut ids: Vec<MessageId> = Vec::new();
        let mut latest_history_id: Option<String> = None;
        let mut page_token: Option<String> = None;

        loop {
            cancel.check()?;
            let response =
                self.list_history(access_token, checkpoint.as_str(), page_token.as_deref())?;

            // The same message shows up once per change kind; keep the first
            for record in response.history.iter().flatten() {
                for id in record.message_ids() {
                    if seen.insert(id.to_string()) {
                        ids.push(MessageId::new(id));
                    }
                }
            }

            if response.history_id.is_some() {
                latest_history_id = response.history_id;
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let messages = self.fetch_messages(access_token, &ids, cancel)?;

        Ok(ChangeSet {
            messages,
            checkpoint: latest_history_id
                .map(Checkpoint::new)
                .unwrap_or_else(|| checkpoint.clone()),
        })
    }

    fn resolve_label_names(
        &self,
        access_token: &str,
        label_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let wanted: HashSet<&str> = label_ids.iter().map(String::as_str).collect();
        let names = self
            .list_gmail_labels(access_token)?
            .into_iter()
            .filter(|label| wanted.contains(label.id.as_str()))
            .map(|label| (label.id, label.name))
            .collect();
        Ok(names)
    }
}

impl RemoteLabelManager for GmailClient {
    fn list_labels(&self, access_token: &str) -> Result<Vec<Label>> {
        Ok(self
            .list_gmail_labels(access_token)?
            .into_iter()
            .map(|label| {
                if label.is_system() {
                    Label::system(label.id, label.name)
                } else {
                    Label::new(label.id, label.name)
                }
            })
            .collect())
    }

    fn create_label(&self, access_token: &str, name: &str) -> Result<Label> {
        if let Some(existing) = self
            .list_labels(access_token)?
            .into_iter()
            .find(|label| label.name == name)
        {
            debug!("Label '{}' already exists", name);
            return Ok(existing);
        }

        let url = format!("{}/users/me/labels", self.base_url);
        let request = CreateLabelRequest {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };

        let mut response = ureq::post(&url)
            .header("Authorization", &bearer(access_token))
            .send_json(&request)
            .with_context(|| format!("Failed to create label '{}'", name))?;

        let created: GmailLabel = response
            .body_mut()
            .read_json()
            .context("Failed to parse create label response")?;

        Ok(Label::new(created.id, created.name))
    }

    fn delete_label(&self, access_token: &str, name: &str) -> Result<()> {
        let Some(label) = self
            .list_gmail_labels(access_token)?
            .into_iter()
            .find(|label| label.name == name)
        else {
            debug!("Label '{}' not found, nothing to delete", name);
            return Ok(());
        };

        if label.is_system() {
            anyhow::bail!("Cannot delete system label '{}'", name);
        }

        let url = format!(
            "{}/users/me/labels/{}",
            self.base_url,
            urlencoding::encode(&label.id)
        );

        ureq::delete(&url)
            .header("Authorization", &bearer(access_token))
            .call()
            .with_context(|| format!("Failed to delete label '{}'", name))?;

        Ok(())
    }

    fn modify_message_labels(
        &self,
        access_token: &str,
        message_id: &MessageId,
        add: &[&str],
        remove: &[&str],
    ) -> Result<()> {
        let url = format!(
            "{}/users/me/messages/{}/modify",
            self.base_url,
            message_id.as_str()
        );

        let request = ModifyMessageRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };

        ureq::post(&url)
            .header("Authorization", &bearer(access_token))
            .send_json(&request)
            .with_context(|| format!("Failed to modify labels of {}", message_id.as_str()))?;

        Ok(())
    }
}

fn bearer(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;
    use mockito::{Matcher, Server};

    fn message_json(id: &str, labels: &[&str], body: &str) -> String {
        serde_json::json!({
            "id": id,
            "threadId": format!("t-{}", id),
            "labelIds": labels,
            "snippet": "",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/plain",
                "headers": [
                    {"name": "From", "value": "sender@example.com"},
                    {"name": "Subject", "value": format!("Subject {}", id)}
                ],
                "body": {"size": body.len(), "data": BASE64_URL_SAFE_NO_PAD.encode(body)}
            }
        })
        .to_string()
    }

    fn client(server: &Server) -> GmailClient {
        GmailClient::new()
            .with_base_url(server.url())
            .with_fetch_retries(1)
    }

    #[test]
    fn test_list_all_follows_pagination() {
        let mut server = Server::new();
        // First page has no pageToken parameter
        let page1 = server
            .mock("GET", "/users/me/messages")
            .match_query(Matcher::Regex("^maxResults=500$".into()))
            .with_status(200)
            .with_body(r#"{"messages":[{"id":"m1","threadId":"t1"}],"nextPageToken":"p2"}"#)
            .create();
        let page2 = server
            .mock("GET", "/users/me/messages")
            .match_query(Matcher::Regex("pageToken=p2".into()))
            .with_status(200)
            .with_body(r#"{"messages":[{"id":"m2","threadId":"t2"}]}"#)
            .create();
        let m1 = server
            .mock("GET", "/users/me/messages/m1")
            .match_query(Matcher::Any)
            .with_body(message_json("m1", &["INBOX"], "one"))
            .create();
        let m2 = server
            .mock("GET", "/users/me/messages/m2")
            .match_query(Matcher::Any)
            .with_body(message_json("m2", &["Label_1"], "two"))
            .create();

        let messages = client(&server)
            .list_all("token", &CancelToken::new())
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_str(), "m1");
        assert_eq!(messages[0].body, "one");
        assert_eq!(messages[1].label_ids, vec!["Label_1"]);
        page1.assert();
        page2.assert();
        m1.assert();
        m2.assert();
    }

    #[test]
    fn test_failed_fetch_is_skipped() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/messages")
            .match_query(Matcher::Any)
            .with_body(r#"{"messages":[{"id":"m1","threadId":"t1"},{"id":"gone","threadId":"t2"}]}"#)
            .create();
        server
            .mock("GET", "/users/me/messages/m1")
            .match_query(Matcher::Any)
            .with_body(message_json("m1", &["INBOX"], "one"))
            .create();
        server
            .mock("GET", "/users/me/messages/gone")
            .match_query(Matcher::Any)
            .with_status(404)
            .create();

        let messages = client(&server)
            .list_all("token", &CancelToken::new())
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id.as_str(), "m1");
    }

    #[test]
    fn test_list_changes_dedups_and_returns_new_checkpoint() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/history")
            .match_query(Matcher::Regex("startHistoryId=100".into()))
            .with_body(
                r#"{
                    "history": [
                        {"id": "101", "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                        {"id": "102", "labelsAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                        {"id": "103", "labelsRemoved": [{"message": {"id": "m2", "threadId": "t2"}}]}
                    ],
                    "historyId": "150"
                }"#,
            )
            .create();
        let m1 = server
            .mock("GET", "/users/me/messages/m1")
            .match_query(Matcher::Any)
            .with_body(message_json("m1", &["Label_1"], "one"))
            .expect(1)
            .create();
        server
            .mock("GET", "/users/me/messages/m2")
            .match_query(Matcher::Any)
            .with_body(message_json("m2", &["Label_1", "STARRED"], "two"))
            .create();

        let changes = client(&server)
            .list_changes_since("token", &Checkpoint::new("100"), &CancelToken::new())
            .unwrap();

        assert_eq!(changes.checkpoint, Checkpoint::new("150"));
        let ids: Vec<&str> = changes.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        m1.assert();
    }

    #[test]
    fn test_expired_history_is_checkpoint_expired() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/history")
            .match_query(Matcher::Any)
            .with_status(404)
            .create();

        let err = client(&server)
            .list_changes_since("token", &Checkpoint::new("1"), &CancelToken::new())
            .unwrap_err();
        assert!(err.downcast_ref::<CheckpointExpiredError>().is_some());
    }

    #[test]
    fn test_invalid_history_id_is_checkpoint_expired() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/history")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"Invalid startHistoryId"}}"#)
            .create();

        let err = client(&server)
            .list_changes_since("token", &Checkpoint::new("not-a-history-id"), &CancelToken::new())
            .unwrap_err();
        assert!(err.downcast_ref::<CheckpointExpiredError>().is_some());
    }

    #[test]
    fn test_current_checkpoint_reads_profile() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/profile")
            .match_header("authorization", "Bearer token")
            .with_body(r#"{"emailAddress":"me@example.com","historyId":"4242"}"#)
            .create();

        let checkpoint = client(&server).current_checkpoint("token").unwrap();
        assert_eq!(checkpoint, Checkpoint::new("4242"));
    }

    #[test]
    fn test_resolve_label_names() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/labels")
            .with_body(
                r#"{"labels":[
                    {"id":"INBOX","name":"INBOX","type":"system"},
                    {"id":"Label_1","name":"Work","type":"user"},
                    {"id":"Label_2","name":"Travel","type":"user"}
                ]}"#,
            )
            .create();

        let names = client(&server)
            .resolve_label_names("token", &["Label_1".to_string(), "INBOX".to_string()])
            .unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names["Label_1"], "Work");
        assert_eq!(names["INBOX"], "INBOX");
    }

    #[test]
    fn test_delete_label_refuses_system_labels() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/labels")
            .with_body(r#"{"labels":[{"id":"INBOX","name":"INBOX","type":"system"}]}"#)
            .create();
        let delete = server
            .mock("DELETE", Matcher::Any)
            .expect(0)
            .create();

        let err = client(&server).delete_label("token", "INBOX").unwrap_err();
        assert!(err.to_string().contains("system label"));
        delete.assert();
    }

    #[test]
    fn test_create_label_is_noop_when_present() {
        let mut server = Server::new();
        server
            .mock("GET", "/users/me/labels")
            .with_body(r#"{"labels":[{"id":"Label_1","name":"Work","type":"user"}]}"#)
            .create();
        let create = server.mock("POST", "/users/me/labels").expect(0).create();

        let label = client(&server).create_label("token", "Work").unwrap();
        assert_eq!(label.id.as_str(), "Label_1");
        create.assert();
    }
}

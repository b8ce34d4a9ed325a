//! Gmail REST adapter.
//!
//! Lists message ids with `users.messages.list` and fetches each message
//! with `format=full`, normalizing it into a [`Document`]. Authentication is
//! handled elsewhere: the adapter takes an already-issued OAuth access token.
//!
//! # Ordering
//!
//! Gmail lists newest first. Without a cursor the stream keeps that order
//! ([`SourceOrder::ProviderNative`]) and lists lazily, page by page. With a
//! cursor the query is narrowed with `after:` and the full id list is
//! reversed so documents come oldest first ([`SourceOrder::Ascending`]).

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GmailConfig;
use crate::error::SourceError;
use crate::models::Document;
use crate::normalize;
use crate::source::{DocumentSource, DocumentStream, ListRequest, SourceOrder};

/// Messages fetched per yielded page.
const FETCH_PAGE: usize = 50;

/// Environment variable consulted before the token file.
pub const TOKEN_ENV: &str = "GMAIL_ACCESS_TOKEN";

struct GmailClient {
    http: reqwest::Client,
    api_base: String,
    user: String,
    token: String,
}

pub struct GmailSource {
    client: Arc<GmailClient>,
    page_size: u32,
}

impl GmailSource {
    pub fn new(config: &GmailConfig, token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client: Arc::new(GmailClient {
                http,
                api_base: config.api_base.trim_end_matches('/').to_string(),
                user: config.user.clone(),
                token,
            }),
            page_size: config.page_size.clamp(1, 500),
        })
    }

    /// Build a source using [`load_access_token`].
    pub fn from_config(config: &GmailConfig) -> Result<Self> {
        let token = load_access_token(&config.token_path)?;
        Self::new(config, token)
    }
}

/// Mailbox identity returned by `users.getProfile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmailProfile {
    pub email: String,
    pub messages_total: u64,
}

impl GmailSource {
    /// Fetch the mailbox profile. Cheap way to confirm the token works.
    pub async fn profile(&self) -> Result<GmailProfile, SourceError> {
        let url = format!(
            "{}/gmail/v1/users/{}/profile",
            self.client.api_base, self.client.user
        );
        let json = self.client.get_json(&url, &[]).await?;
        Ok(GmailProfile {
            email: json
                .get("emailAddress")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            messages_total: json
                .get("messagesTotal")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
    }
}

/// Read the access token from `GMAIL_ACCESS_TOKEN` or the token file.
///
/// The file is the JSON written by the OAuth flow; either `access_token`
/// or `token` is accepted.
pub fn load_access_token(token_path: &Path) -> Result<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }

    let content = std::fs::read_to_string(token_path).with_context(|| {
        format!(
            "No Gmail credentials: set {} or write a token file at {}",
            TOKEN_ENV,
            token_path.display()
        )
    })?;
    let json: Value = serde_json::from_str(&content)
        .with_context(|| format!("Token file is not valid JSON: {}", token_path.display()))?;

    match json
        .get("access_token")
        .or_else(|| json.get("token"))
        .and_then(|t| t.as_str())
    {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => bail!(
            "Token file {} has no access_token field",
            token_path.display()
        ),
    }
}

impl GmailClient {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("Gmail request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SourceError::Transient(format!("Gmail response unreadable: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<(Vec<String>, Option<String>), SourceError> {
        let url = format!("{}/gmail/v1/users/{}/messages", self.api_base, self.user);
        let mut params = vec![("maxResults", max_results.to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let json = self.get_json(&url, &params).await?;
        let ids = json
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|msgs| {
                msgs.iter()
                    .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let next = json
            .get("nextPageToken")
            .and_then(|t| t.as_str())
            .map(str::to_string);
        Ok((ids, next))
    }

    /// Fetch one message. `Ok(None)` when it vanished after listing.
    async fn get_message(&self, id: &str) -> Result<Option<Document>, SourceError> {
        let url = format!(
            "{}/gmail/v1/users/{}/messages/{}",
            self.api_base, self.user, id
        );
        match self.get_json(&url, &[("format", "full".to_string())]).await {
            Ok(json) => parse_message(&json)
                .map(Some)
                .map_err(|e| SourceError::Fatal(format!("message {}: {}", id, e))),
            Err(SourceError::Fatal(msg)) if msg.starts_with("HTTP 404") => {
                warn!(document_id = %id, "message disappeared before it could be fetched");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let detail: String = body.chars().take(300).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SourceError::Transient(format!("HTTP {}: {}", status.as_u16(), detail))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        SourceError::Fatal(format!(
            "HTTP {}: Gmail rejected the access token; re-run the authorization flow ({})",
            status.as_u16(),
            detail
        ))
    } else {
        SourceError::Fatal(format!("HTTP {}: {}", status.as_u16(), detail))
    }
}

#[async_trait]
impl DocumentSource for GmailSource {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn open(&self, request: &ListRequest) -> Result<Box<dyn DocumentStream>, SourceError> {
        let mut query = request.filter.trim().to_string();
        let order = match &request.since {
            Some(position) => {
                // `after:` has one-second resolution; include the cursor's own second
                let after = (position.timestamp.timestamp() - 1).max(0);
                if !query.is_empty() {
                    query.push(' ');
                }
                query.push_str(&format!("after:{}", after));
                SourceOrder::Ascending
            }
            None => SourceOrder::ProviderNative,
        };
        debug!(query = %query, ?order, "opening gmail listing");

        Ok(Box::new(GmailStream {
            client: Arc::clone(&self.client),
            query,
            order,
            page_size: self.page_size,
            remaining: request.limit,
            pending: VecDeque::new(),
            next_token: None,
            listing_done: false,
        }))
    }
}

struct GmailStream {
    client: Arc<GmailClient>,
    query: String,
    order: SourceOrder,
    page_size: u32,
    /// Ids still allowed to be listed (provider-native listing only).
    remaining: Option<usize>,
    pending: VecDeque<String>,
    next_token: Option<String>,
    listing_done: bool,
}

impl GmailStream {
    async fn list_more(&mut self) -> Result<(), SourceError> {
        match self.order {
            SourceOrder::Ascending => {
                let mut all = Vec::new();
                let mut token: Option<String> = None;
                loop {
                    let (ids, next) = self
                        .client
                        .list_page(&self.query, token.as_deref(), self.page_size)
                        .await?;
                    all.extend(ids);
                    match next {
                        Some(t) => token = Some(t),
                        None => break,
                    }
                }
                all.reverse();
                self.pending.extend(all);
                self.listing_done = true;
            }
            SourceOrder::ProviderNative => {
                let max = match self.remaining {
                    Some(0) => {
                        self.listing_done = true;
                        return Ok(());
                    }
                    Some(r) => (r as u32).min(self.page_size),
                    None => self.page_size,
                };
                let (mut ids, next) = self
                    .client
                    .list_page(&self.query, self.next_token.as_deref(), max)
                    .await?;
                if let Some(r) = self.remaining.as_mut() {
                    ids.truncate(*r);
                    *r -= ids.len();
                }
                self.listing_done = next.is_none() || ids.is_empty();
                self.next_token = next;
                self.pending.extend(ids);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStream for GmailStream {
    fn order(&self) -> SourceOrder {
        self.order
    }

    async fn next_page(&mut self) -> Result<Option<Vec<Document>>, SourceError> {
        if self.pending.is_empty() && !self.listing_done {
            self.list_more().await?;
        }
        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = self.pending.len().min(FETCH_PAGE);
        let mut documents = Vec::with_capacity(take);
        for id in self.pending.iter().take(take) {
            if let Some(doc) = self.client.get_message(id).await? {
                documents.push(doc);
            }
        }
        // Only consume ids once the whole page succeeded
        self.pending.drain(..take);
        Ok(Some(documents))
    }
}

/// Convert a `format=full` Gmail message into a [`Document`].
pub fn parse_message(json: &Value) -> Result<Document> {
    let id = json
        .get("id")
        .and_then(|v| v.as_str())
        .context("message has no id")?
        .to_string();
    let thread_id = json
        .get("threadId")
        .and_then(|v| v.as_str())
        .unwrap_or(&id)
        .to_string();
    let payload = json.get("payload").cloned().unwrap_or(Value::Null);

    let mut headers = BTreeMap::new();
    if let Some(list) = payload.get("headers").and_then(|h| h.as_array()) {
        for header in list {
            let (Some(name), Some(value)) = (
                header.get("name").and_then(|n| n.as_str()),
                header.get("value").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }

    let timestamp = json
        .get("internalDate")
        .and_then(|v| v.as_str().and_then(|s| s.parse::<i64>().ok()).or(v.as_i64()))
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| {
            headers
                .get("date")
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
                .map(|d| d.with_timezone(&Utc))
        })
        .unwrap_or(DateTime::UNIX_EPOCH);

    let labels = json
        .get("labelIds")
        .and_then(|l| l.as_array())
        .map(|l| {
            l.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(Document {
        id,
        thread_id,
        timestamp,
        headers,
        labels,
        snippet: json
            .get("snippet")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string(),
        body_text: extract_body(&payload),
        raw_size: json
            .get("sizeEstimate")
            .and_then(|s| s.as_u64())
            .unwrap_or(0),
    })
}

/// Plain-text parts win; HTML parts are used only when there are none.
fn extract_body(payload: &Value) -> String {
    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_parts(payload, &mut plain, &mut html);

    if !plain.is_empty() {
        normalize::clean_text(&plain.join("\n"))
    } else if !html.is_empty() {
        normalize::html_to_text(&html.join("\n"))
    } else {
        String::new()
    }
}

fn collect_parts(part: &Value, plain: &mut Vec<String>, html: &mut Vec<String>) {
    let mime = part.get("mimeType").and_then(|m| m.as_str()).unwrap_or("");
    let data = part
        .get("body")
        .and_then(|b| b.get("data"))
        .and_then(|d| d.as_str())
        .and_then(decode_base64url);

    match (mime, data) {
        ("text/plain", Some(text)) => plain.push(text),
        ("text/html", Some(text)) => html.push(text),
        _ => {}
    }

    if let Some(parts) = part.get("parts").and_then(|p| p.as_array()) {
        for child in parts {
            collect_parts(child, plain, html);
        }
    }
}

fn decode_base64url(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn parses_multipart_message_preferring_plain_text() {
        let msg = json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Lunch?",
            "sizeEstimate": 2048,
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "Subject", "value": "Lunch"},
                    {"name": "From", "value": "Alice <alice@example.com>"},
                    {"name": "To", "value": "bob@example.com"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": b64("Lunch   at noon?\n")}},
                    {"mimeType": "text/html", "body": {"data": b64("<p>Lunch at <b>noon</b>?</p>")}}
                ]
            }
        });
        let doc = parse_message(&msg).unwrap();
        assert_eq!(doc.id, "m1");
        assert_eq!(doc.thread_id, "t1");
        assert_eq!(doc.subject(), "Lunch");
        assert_eq!(doc.sender(), "Alice <alice@example.com>");
        assert_eq!(doc.body_text, "Lunch at noon?");
        assert_eq!(doc.labels, vec!["INBOX", "UNREAD"]);
        assert_eq!(doc.raw_size, 2048);
        assert_eq!(doc.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn falls_back_to_html_and_date_header() {
        let msg = json!({
            "id": "m2",
            "payload": {
                "mimeType": "text/html",
                "headers": [{"name": "Date", "value": "Tue, 14 Nov 2023 22:13:20 +0000"}],
                "body": {"data": b64("<html><body><h1>Invoice</h1><style>x{}</style><p>Due Friday</p></body></html>")}
            }
        });
        let doc = parse_message(&msg).unwrap();
        assert_eq!(doc.thread_id, "m2");
        assert_eq!(doc.subject(), "(No Subject)");
        assert_eq!(doc.body_text, "Invoice\nDue Friday");
        assert_eq!(doc.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "Invalid query").is_transient());
        let auth = classify_status(StatusCode::UNAUTHORIZED, "");
        assert!(auth.to_string().contains("access token"));
    }

    #[test]
    fn token_file_accepts_either_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"token": "ya29.abc", "refresh_token": "r"}"#).unwrap();
        if std::env::var(TOKEN_ENV).is_err() {
            assert_eq!(load_access_token(&path).unwrap(), "ya29.abc");
            assert!(load_access_token(&dir.path().join("none.json")).is_err());
        }
    }
}

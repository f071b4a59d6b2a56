//! Gmail tools - keyword search and send to the configured recipient
//!
//! Both tools ask the credential manager for a valid token on every call,
//! so a token that expires mid-session is refreshed transparently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{json, Value};

use super::web::html_to_text;
use super::{Tool, ToolOutput};
use crate::auth::CredentialManager;
use crate::error::Error;
use crate::Result;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

const DEFAULT_SUBJECT: &str = "Message from Kestrel";
const MAX_SUBJECT_CHARS: usize = 60;
const MAX_BODY_CHARS: usize = 2000;

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

async fn access_token(credentials: &CredentialManager, identity: &str) -> Result<String> {
    let state = credentials.ensure_valid(identity).await?;
    Ok(state.access_token)
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Tool(format!("Gmail {} failed ({}): {}", what, status, body)))
}

/// Search mail by keyword and return message bodies
pub struct GmailSearchTool {
    credentials: Arc<CredentialManager>,
    identity: String,
    client: reqwest::Client,
    api_base: String,
}

impl GmailSearchTool {
    pub fn new(credentials: Arc<CredentialManager>, identity: String) -> Self {
        Self {
            credentials,
            identity,
            client: http_client(),
            api_base: GMAIL_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Tool for GmailSearchTool {
    fn name(&self) -> &str {
        "gmail_search"
    }

    fn description(&self) -> &str {
        "Search Gmail for messages matching a keyword and return up to `top` message bodies"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "keyword": {
                    "type": "string",
                    "description": "Gmail search query, e.g. a subject keyword"
                },
                "top": {
                    "type": "integer",
                    "description": "Maximum number of messages to return (default 5)"
                }
            },
            "required": ["keyword"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let keyword = params
            .get("keyword")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing 'keyword' parameter".to_string()))?;
        let top = params.get("top").and_then(|v| v.as_u64()).unwrap_or(5).max(1);

        let token = access_token(&self.credentials, &self.identity).await?;

        let response = self
            .client
            .get(format!("{}/users/me/messages", self.api_base))
            .bearer_auth(&token)
            .query(&[("q", keyword.to_string()), ("maxResults", top.to_string())])
            .send()
            .await?;
        let listing: Value = check_status(response, "search").await?.json().await?;

        let ids: Vec<String> = listing
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("id").and_then(|id| id.as_str()).map(str::to_string))
                    .take(top as usize)
                    .collect()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            tracing::debug!("No messages matched '{}'", keyword);
            return Ok(ToolOutput::text(format!("No emails found matching '{}'", keyword)));
        }

        let mut bodies = Vec::with_capacity(ids.len());
        for id in ids {
            let response = self
                .client
                .get(format!("{}/users/me/messages/{}", self.api_base, id))
                .bearer_auth(&token)
                .query(&[("format", "full")])
                .send()
                .await?;
            let message: Value = check_status(response, "fetch").await?.json().await?;
            match summarize_message(&message) {
                Some(summary) => bodies.push(Value::String(summary)),
                None => tracing::debug!("Could not extract body from message {}", id),
            }
        }

        Ok(ToolOutput::List(bodies))
    }
}

/// Send a message to the fixed configured recipient
pub struct SendEmailTool {
    credentials: Arc<CredentialManager>,
    identity: String,
    mail_to: String,
    client: reqwest::Client,
    api_base: String,
}

impl SendEmailTool {
    pub fn new(credentials: Arc<CredentialManager>, identity: String, mail_to: String) -> Self {
        Self {
            credentials,
            identity,
            mail_to,
            client: http_client(),
            api_base: GMAIL_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email_to_fixed_address"
    }

    fn description(&self) -> &str {
        "Send an email to the preconfigured recipient. The subject defaults to the first line of the body"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "body": {
                    "type": "string",
                    "description": "Email body text"
                },
                "subject": {
                    "type": "string",
                    "description": "Optional subject line"
                }
            },
            "required": ["body"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        if self.mail_to.trim().is_empty() {
            return Err(Error::Tool("No recipient configured (set MAIL_TO or google.mail_to)".to_string()));
        }
        let body = params
            .get("body")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing 'body' parameter".to_string()))?;
        let body = body.replace("\\n", "\n");
        let subject = params
            .get("subject")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| subject_from_body(&body));

        let token = access_token(&self.credentials, &self.identity).await?;
        let raw = URL_SAFE.encode(build_message(&self.mail_to, &subject, &body));

        let response = self
            .client
            .post(format!("{}/users/me/messages/send", self.api_base))
            .bearer_auth(&token)
            .json(&json!({ "raw": raw }))
            .send()
            .await?;
        let sent: Value = check_status(response, "send").await?.json().await?;
        let id = sent.get("id").and_then(|v| v.as_str()).unwrap_or("unknown");

        tracing::info!("Sent email {} to {}", id, self.mail_to);
        Ok(ToolOutput::Structured(json!({
            "result": format!("Email sent to {} (id {})", self.mail_to, id),
            "id": id,
        })))
    }
}

/// First non-empty line of the body, clipped
fn subject_from_body(body: &str) -> String {
    match body.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) if line.chars().count() > MAX_SUBJECT_CHARS => {
            let clipped: String = line.chars().take(MAX_SUBJECT_CHARS).collect();
            format!("{}...", clipped.trim_end())
        }
        Some(line) => line.to_string(),
        None => DEFAULT_SUBJECT.to_string(),
    }
}

/// RFC 2822 message with a UTF-8 plain text body
fn build_message(to: &str, subject: &str, body: &str) -> String {
    let encoded_subject = base64::engine::general_purpose::STANDARD.encode(subject.as_bytes());
    format!(
        "To: {}\r\nSubject: =?UTF-8?B?{}?=\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        to, encoded_subject, body
    )
}

fn header<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
    payload.get("headers")?.as_array()?.iter().find_map(|h| {
        let header_name = h.get("name")?.as_str()?;
        if header_name.eq_ignore_ascii_case(name) {
            h.get("value")?.as_str()
        } else {
            None
        }
    })
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Prefer text/plain, fall back to text/html, searching nested parts
fn find_body(payload: &Value) -> Option<String> {
    fn find_part(part: &Value, mime: &str) -> Option<String> {
        if part.get("mimeType").and_then(|m| m.as_str()) == Some(mime) {
            if let Some(data) = part.pointer("/body/data").and_then(|d| d.as_str()) {
                return decode_body(data);
            }
        }
        part.get("parts")?
            .as_array()?
            .iter()
            .find_map(|p| find_part(p, mime))
    }

    if let Some(text) = find_part(payload, "text/plain") {
        return Some(text);
    }
    if let Some(html) = find_part(payload, "text/html") {
        return Some(html_to_text(&html));
    }
    payload
        .pointer("/body/data")
        .and_then(|d| d.as_str())
        .and_then(decode_body)
}

fn summarize_message(message: &Value) -> Option<String> {
    let payload = message.get("payload")?;
    let body = find_body(payload)
        .or_else(|| message.get("snippet").and_then(|s| s.as_str()).map(str::to_string))?;
    let body = body.trim();
    let body: String = if body.chars().count() > MAX_BODY_CHARS {
        let clipped: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("{}...", clipped)
    } else {
        body.to_string()
    };

    let subject = header(payload, "Subject").unwrap_or("(no subject)");
    let from = header(payload, "From").unwrap_or("(unknown sender)");
    Some(format!("Subject: {}\nFrom: {}\n{}", subject, from, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::CountingRefresher;
    use crate::auth::MemoryCredentialStore;
    use crate::tools::Observation;

    fn manager() -> Arc<CredentialManager> {
        Arc::new(CredentialManager::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(CountingRefresher::ok()),
        ))
    }

    #[test]
    fn test_subject_from_body() {
        assert_eq!(subject_from_body("\n  Weekly report \nbody"), "Weekly report");
        assert_eq!(subject_from_body("   "), DEFAULT_SUBJECT);
        let long = "x".repeat(100);
        let subject = subject_from_body(&long);
        assert_eq!(subject.chars().count(), MAX_SUBJECT_CHARS + 3);
    }

    #[test]
    fn test_build_message_encodes_subject() {
        let msg = build_message("a@example.com", "こんにちは", "body text");
        assert!(msg.starts_with("To: a@example.com\r\n"));
        assert!(msg.contains("Subject: =?UTF-8?B?"));
        assert!(msg.ends_with("\r\n\r\nbody text"));
    }

    #[test]
    fn test_summarize_nested_plain_part() {
        let data = URL_SAFE_NO_PAD.encode("Hello from the invoice thread");
        let message = json!({
            "snippet": "Hello",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "Subject", "value": "Invoice 42"},
                    {"name": "from", "value": "billing@example.com"}
                ],
                "parts": [{
                    "mimeType": "multipart/alternative",
                    "parts": [
                        {"mimeType": "text/html", "body": {"data": URL_SAFE_NO_PAD.encode("<p>ignored</p>")}},
                        {"mimeType": "text/plain", "body": {"data": data}}
                    ]
                }]
            }
        });
        let summary = summarize_message(&message).unwrap();
        assert_eq!(summary, "Subject: Invoice 42\nFrom: billing@example.com\nHello from the invoice thread");
    }

    #[test]
    fn test_summarize_html_only_and_snippet_fallback() {
        let html = json!({
            "payload": {
                "mimeType": "text/html",
                "body": {"data": URL_SAFE_NO_PAD.encode("<html><body><b>Bold</b> news</body></html>")}
            }
        });
        assert!(summarize_message(&html).unwrap().ends_with("Bold news"));

        let snippet_only = json!({"snippet": "just a snippet", "payload": {"mimeType": "multipart/mixed"}});
        assert!(summarize_message(&snippet_only).unwrap().ends_with("just a snippet"));
    }

    #[tokio::test]
    async fn test_send_without_recipient_is_tool_failure() {
        let tool = SendEmailTool::new(manager(), "google:test".to_string(), String::new());
        let obs = crate::tools::invoke(&tool, json!("hello")).await;
        assert!(matches!(obs, Observation::ToolFailed(ref m) if m.contains("No recipient")));
    }

    #[tokio::test]
    async fn test_missing_credentials_surface_as_tool_failure() {
        let tool = GmailSearchTool::new(manager(), "google:test".to_string())
            .with_api_base("http://127.0.0.1:9");
        let obs = crate::tools::invoke(&tool, json!("invoice")).await;
        assert!(matches!(obs, Observation::ToolFailed(ref m) if m.starts_with("credential error")));
    }
}

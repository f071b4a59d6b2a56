//! Web fetch tool

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{Tool, ToolOutput};
use crate::error::Error;
use crate::Result;

const DEFAULT_MAX_LENGTH: usize = 10000;

/// Fetch a URL over HTTP and return its text content
pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("kestrel/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL and return it as plain text"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL to fetch (http or https)"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 10000)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing 'url' parameter".to_string()))?;
        let max_len = params
            .get("max_length")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_LENGTH);

        let parsed = url::Url::parse(url).map_err(|e| Error::Validation(format!("Invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation(format!("Unsupported URL scheme: {}", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Error::Tool(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Tool(format!("HTTP error: {}", status)));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |ct| ct.contains("html"));
        let text = response
            .text()
            .await
            .map_err(|e| Error::Tool(format!("Failed to read response: {}", e)))?;

        let clean = if is_html { html_to_text(&text) } else { text };
        Ok(ToolOutput::Text(truncate(&clean, max_len)))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...\n\n[Truncated - {} total chars]", head, total)
}

fn block_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->").ok())
        .as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").ok()).as_ref()
}

/// Basic HTML to text conversion
pub(crate) fn html_to_text(html: &str) -> String {
    let without_blocks = match block_pattern() {
        Some(re) => re.replace_all(html, " ").into_owned(),
        None => html.to_string(),
    };
    let without_tags = match tag_pattern() {
        Some(re) => re.replace_all(&without_blocks, " ").into_owned(),
        None => without_blocks,
    };
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Observation;

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><title>Test</title></head><body><p>Hello World</p></body></html>";
        assert_eq!(html_to_text(html), "Test Hello World");
    }

    #[test]
    fn test_html_to_text_removes_scripts_and_styles() {
        let html = "<body><script type=\"x\">alert('hi');</script><STYLE>p{}</STYLE><!-- note --><p>Content &amp; more</p></body>";
        assert_eq!(html_to_text(html), "Content & more");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        let out = truncate("ééééé", 2);
        assert!(out.starts_with("éé..."));
        assert!(out.contains("5 total chars"));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let obs = crate::tools::invoke(&FetchUrlTool::new(), json!("file:///etc/passwd")).await;
        assert!(matches!(obs, Observation::ValidationFailed(ref m) if m.contains("scheme")));
    }
}

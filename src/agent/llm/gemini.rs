//! Gemini LLM client implementation (API key authentication).
//!
//! Besides chat, the client can answer a query grounded in Google Search
//! results ([`GeminiClient::grounded_search`]).

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Message, Role, ToolCallRequest};
use super::{LlmClient, LlmResponse, Usage};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Schema keywords the function declaration format rejects
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties", "default", "title"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    search_entry_point: Option<SearchEntryPoint>,
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntryPoint {
    rendered_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<usize>,
    candidates_token_count: Option<usize>,
    total_token_count: Option<usize>,
}

/// Answer to a search query, with the pages it was grounded on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundedAnswer {
    pub text: String,
    /// Links from the rendered search suggestions
    pub search_entry_point: Vec<String>,
    /// Pages the answer cites
    pub uris: Vec<String>,
}

/// Gemini API client using API key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client with API key.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.trim_start_matches("models/").to_string(),
            base_url: GEMINI_API_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Point the client at another endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_url(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({
                    "role": role,
                    "parts": [{"text": m.content}]
                })
            })
            .collect()
    }

    fn system_instruction(messages: &[Message]) -> Option<String> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }

        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": sanitize_schema(&t.parameters)
                })
            })
            .collect();

        Some(json!([{
            "functionDeclarations": function_declarations
        }]))
    }

    async fn generate(&self, request: &Value) -> Result<GeminiResponse> {
        let response = self
            .client
            .post(self.build_url())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(Error::Llm(format!("Gemini API error ({status}): {error_text}")));
        }

        Ok(response.json().await?)
    }

    /// Answer `query` with the Google Search grounding tool enabled.
    pub async fn grounded_search(&self, query: &str) -> Result<GroundedAnswer> {
        let prompt = format!(
            "You are a search agent. Answer the request below using Google Search \
             and mention the sites you relied on.\n\nRequest: {}",
            query
        );
        let request = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "tools": [{"google_search": {}}]
        });

        let response = self.generate(&request).await?;
        Self::parse_grounded(response)
    }

    fn parse_grounded(response: GeminiResponse) -> Result<GroundedAnswer> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("No candidates in response".to_string()))?;

        let text = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        let metadata = candidate.grounding_metadata.unwrap_or_default();
        let search_entry_point = metadata
            .search_entry_point
            .and_then(|e| e.rendered_content)
            .map(|html| entry_point_links(&html))
            .unwrap_or_default();
        let uris = metadata
            .grounding_chunks
            .into_iter()
            .filter_map(|chunk| chunk.web.and_then(|w| w.uri))
            .collect();

        Ok(GroundedAnswer {
            text: text.trim().to_string(),
            search_entry_point,
            uris,
        })
    }

    fn parse_response(response: GeminiResponse) -> Result<LlmResponse> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("No candidates in response".to_string()))?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                texts.push(text);
            }
            if let Some(fc) = part.function_call {
                tool_calls.push(ToolCallRequest {
                    id: format!("tc_{}", tool_calls.len()),
                    name: fc.name,
                    arguments: fc.args,
                });
            }
        }

        let usage = response
            .usage_metadata
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: if texts.is_empty() { None } else { Some(texts.join("")) },
            tool_calls,
            finish_reason: candidate.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

fn href_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).ok()).as_ref()
}

/// Link targets in the search suggestion chips
fn entry_point_links(html: &str) -> Vec<String> {
    match href_pattern() {
        Some(re) => re
            .captures_iter(html)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().replace("&amp;", "&"))
            .collect(),
        None => Vec::new(),
    }
}

/// Copy of a JSON schema without the keywords Gemini rejects
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| {
                    // Property names live under `properties`; only their values are schemas.
                    let cleaned = if k == "properties" {
                        match v {
                            Value::Object(props) => Value::Object(
                                props.iter().map(|(name, s)| (name.clone(), sanitize_schema(s))).collect(),
                            ),
                            other => other.clone(),
                        }
                    } else {
                        sanitize_schema(v)
                    };
                    (k.clone(), cleaned)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let mut request = json!({
            "contents": Self::convert_messages(messages),
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": 8192
            }
        });

        if let Some(system) = Self::system_instruction(messages) {
            request["systemInstruction"] = json!({
                "parts": [{"text": system}]
            });
        }

        if let Some(tool_config) = Self::convert_tools(tools) {
            request["tools"] = tool_config;
        }

        let gemini_response = self.generate(&request).await?;
        Self::parse_response(gemini_response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

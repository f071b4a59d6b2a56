//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable reasoning backends
//! - [`ProviderRegistry`] choosing a backend from the model name
//! - Concrete implementations: Gemini, OpenAI
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `anthropic.rs`)
//! 2. Implement `LlmClient` trait
//! 3. Add a model-name rule to `ProviderRegistry::create()`
//! 4. Add the API key field in `config.rs`

pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

pub use gemini::{GeminiClient, GroundedAnswer};
pub use openai::OpenAiClient;

use super::message::{Message, ToolCallRequest};

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text content of the response.
    pub content: Option<String>,

    /// Native tool calls requested by the LLM.
    pub tool_calls: Vec<ToolCallRequest>,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Create a response carrying one native tool call.
    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "tc_0".to_string(),
                name: name.into(),
                arguments,
            }],
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    /// Check if response has tool calls.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// LLM client trait, the swappable reasoning backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send messages and get response.
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse>;

    /// Model this client talks to.
    fn model(&self) -> &str;
}

/// Backend family behind a model name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gemini,
    OpenAi,
}

impl BackendKind {
    /// Classify a model name: `gemini*` is Gemini, `gpt*`, `o1*` and `o3*`
    /// are OpenAI.
    pub fn for_model(model: &str) -> Option<Self> {
        let lower = model.to_ascii_lowercase();
        if lower.contains("gemini") {
            Some(BackendKind::Gemini)
        } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
            Some(BackendKind::OpenAi)
        } else {
            None
        }
    }
}

/// Provider registry: creates LLM clients from model names.
///
/// # Example
///
/// ```ignore
/// let client = ProviderRegistry::create(&config, Some("gpt-4o"))?;
/// let response = client.chat(&messages, &tools).await?;
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create an LLM client for `model_name`, or the configured model.
    pub fn create(config: &Config, model_name: Option<&str>) -> Result<Box<dyn LlmClient>> {
        let model = model_name
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(config.model.as_str());

        match BackendKind::for_model(model) {
            Some(BackendKind::Gemini) => {
                if config.gemini_api_key.is_empty() {
                    return Err(Error::Config(
                        "Gemini API key not configured (set GEMINI_API_KEY)".to_string(),
                    ));
                }
                Ok(Box::new(GeminiClient::new(&config.gemini_api_key, model)))
            }
            Some(BackendKind::OpenAi) => {
                if config.openai_api_key.is_empty() {
                    return Err(Error::Config(
                        "OpenAI API key not configured (set OPENAI_API_KEY)".to_string(),
                    ));
                }
                Ok(Box::new(OpenAiClient::new(&config.openai_api_key, model)))
            }
            None => Err(Error::Config(format!("Unsupported model: {model}"))),
        }
    }

    /// Model name prefixes this registry understands.
    pub fn available() -> &'static [&'static str] {
        &["gemini-*", "gpt-*", "o1-*", "o3-*"]
    }
}

/// Scripted LLM client for tests.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<LlmResponse>>>,
    seen: std::sync::Mutex<Vec<Vec<Message>>>,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Ok(LlmResponse::text(s))).collect())
    }

    /// Create with arbitrary responses, including errors.
    pub fn scripted(responses: Vec<Result<LlmResponse>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Number of chat calls made so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Transcript passed to the nth call.
    pub fn transcript(&self, call: usize) -> Vec<Message> {
        self.seen
            .lock()
            .ok()
            .and_then(|s| s.get(call).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(&self, messages: &[Message], _tools: &[ToolDefinition]) -> Result<LlmResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        responses
            .pop_front()
            .unwrap_or_else(|| Err(Error::Llm("No more fake responses".to_string())))
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::new(vec!["Hello!", "World!"]);

        let resp1 = client.chat(&[], &[]).await.unwrap();
        assert_eq!(resp1.content.as_deref(), Some("Hello!"));

        let resp2 = client.chat(&[], &[]).await.unwrap();
        assert_eq!(resp2.content.as_deref(), Some("World!"));

        assert!(client.chat(&[], &[]).await.is_err());
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn test_backend_kind_for_model() {
        assert_eq!(BackendKind::for_model("gemini-1.5-pro"), Some(BackendKind::Gemini));
        assert_eq!(BackendKind::for_model("models/Gemini-2.0-flash"), Some(BackendKind::Gemini));
        assert_eq!(BackendKind::for_model("gpt-4o"), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::for_model("o3-mini"), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::for_model("claude-x"), None);
    }

    #[test]
    fn test_registry_selects_by_model_name() {
        let config = Config {
            gemini_api_key: "g-key".to_string(),
            openai_api_key: "o-key".to_string(),
            ..Config::default()
        };

        let default = ProviderRegistry::create(&config, None).unwrap();
        assert_eq!(default.model(), "gemini-1.5-pro");

        let openai = ProviderRegistry::create(&config, Some("gpt-4o-mini")).unwrap();
        assert_eq!(openai.model(), "gpt-4o-mini");

        let blank = ProviderRegistry::create(&config, Some("  ")).unwrap();
        assert_eq!(blank.model(), "gemini-1.5-pro");

        assert!(matches!(
            ProviderRegistry::create(&config, Some("llama-3")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_registry_requires_api_key() {
        let config = Config::default();
        let err = ProviderRegistry::create(&config, Some("gpt-4o")).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}

//! Tool outcomes and the observations the agent loop sees

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw result of a tool body.
///
/// Tools answer with plain text, a structured object carrying a conventional
/// `result` field, or a list. [`ToolOutput::normalize`] is the single place
/// these shapes collapse into observation text.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
    List(Vec<Value>),
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        ToolOutput::Text(s.into())
    }

    /// Render as observation text.
    pub fn normalize(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.trim().to_string(),
            ToolOutput::Structured(value) => match value.get("result") {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Null) | None => value.to_string(),
                Some(other) => other.to_string(),
            },
            ToolOutput::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

/// Normalized outcome of dispatching one action. Never an error value:
/// every failure below the dispatch boundary lands in one of these tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Observation {
    Success(String),
    /// Bad or ambiguous input; the backend can correct itself.
    ValidationFailed(String),
    /// The tool body failed.
    ToolFailed(String),
    /// The remote provider could not be reached; fatal for the invocation.
    ProviderUnavailable(String),
}

impl Observation {
    pub fn is_success(&self) -> bool {
        matches!(self, Observation::Success(_))
    }

    pub fn is_provider_unavailable(&self) -> bool {
        matches!(self, Observation::ProviderUnavailable(_))
    }

    /// Text fed back to the reasoning backend
    pub fn to_prompt_text(&self) -> String {
        match self {
            Observation::Success(s) => s.clone(),
            Observation::ValidationFailed(s) => format!("Invalid tool input: {}", s),
            Observation::ToolFailed(s) => format!("Tool failed: {}", s),
            Observation::ProviderUnavailable(s) => format!("Tool provider unavailable: {}", s),
        }
    }
}

//! Tools module - agent capabilities
//!
//! Tools are the actions the agent can take: built-in ones registered at
//! startup (mail, web fetch, search) and remote ones discovered from a tool provider for
//! the length of a single invocation.

mod gmail;
mod outcome;
mod registry;
mod schema;
mod search;
mod web;

pub use gmail::{GmailSearchTool, SendEmailTool, GMAIL_API_BASE};
pub use outcome::{Observation, ToolOutput};
pub use registry::{invoke, ToolDefinition, ToolRegistry, ToolSet};
pub use schema::{prepare_input, validate};
pub use search::GoogleSearchTool;
pub use web::FetchUrlTool;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::GeminiClient;
use crate::auth::CredentialManager;
use crate::config::Config;
use crate::Result;

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in actions
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with input that already passed schema checks
    async fn execute(&self, params: Value) -> Result<ToolOutput>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Build the static registry: web fetch always, search when a Gemini key
/// is set, mail tools when a credential manager is available.
pub fn default_registry(config: &Config, credentials: Option<Arc<CredentialManager>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(FetchUrlTool::new());

    if !config.gemini_api_key.is_empty() {
        registry.register(GoogleSearchTool::new(GeminiClient::new(
            &config.gemini_api_key,
            &config.search_model,
        )));
    }

    if let Some(manager) = credentials {
        let identity = config.google.identity.clone();
        registry.register(GmailSearchTool::new(manager.clone(), identity.clone()));
        registry.register(SendEmailTool::new(manager, identity, config.google.mail_to.clone()));
    }

    tracing::debug!("Registered tools: {:?}", registry.tool_names());
    registry
}

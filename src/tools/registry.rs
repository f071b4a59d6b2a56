//! Tool dispatch - resolves, validates and invokes tools
//!
//! [`ToolRegistry`] holds the static tool set and is shared read-only
//! across invocations. [`ToolSet`] layers the remote tools of one
//! invocation on top of it; nothing registered there is visible to any
//! other invocation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::outcome::Observation;
use super::schema::prepare_input;
use super::Tool;
use crate::error::Error;

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Static tools, registered once and immutable after construction
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!("Tool '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions for LLM, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch against the static tools only
    pub async fn dispatch(&self, name: &str, raw_input: Value) -> Observation {
        match self.get(name) {
            Some(tool) => invoke(tool.as_ref(), raw_input).await,
            None => unknown_tool(name),
        }
    }
}

/// The tools visible to one invocation: shared static tools plus the
/// remote tools discovered for that invocation.
#[derive(Clone)]
pub struct ToolSet {
    base: Arc<ToolRegistry>,
    scoped: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(base: Arc<ToolRegistry>) -> Self {
        Self {
            base,
            scoped: HashMap::new(),
        }
    }

    /// Add invocation-scoped tools. Names already taken by a static tool
    /// are skipped.
    pub fn with_scoped<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        for tool in tools {
            let name = tool.name().to_string();
            if self.base.has(&name) || self.scoped.contains_key(&name) {
                warn!("Skipping remote tool '{}': name already registered", name);
                continue;
            }
            self.scoped.insert(name, tool);
        }
        self
    }

    fn resolve(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.base.get(name).or_else(|| self.scoped.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.base.definitions();
        let mut scoped: Vec<ToolDefinition> = self.scoped.values().map(|t| t.to_definition()).collect();
        scoped.sort_by(|a, b| a.name.cmp(&b.name));
        defs.extend(scoped);
        defs
    }

    /// Resolve, validate and invoke. Never fails: every outcome is an
    /// [`Observation`].
    pub async fn dispatch(&self, name: &str, raw_input: Value) -> Observation {
        match self.resolve(name) {
            Some(tool) => invoke(tool.as_ref(), raw_input).await,
            None => unknown_tool(name),
        }
    }
}

fn unknown_tool(name: &str) -> Observation {
    debug!("Unknown tool requested: {}", name);
    Observation::ToolFailed(format!("unknown tool: {}", name))
}

/// Validate the input against the tool's schema, run the tool and fold
/// errors and panics into an observation.
pub async fn invoke(tool: &dyn Tool, raw_input: Value) -> Observation {
    let name = tool.name();
    let input = match prepare_input(&tool.parameters(), raw_input) {
        Ok(input) => input,
        Err(reason) => {
            debug!("Tool {} rejected input: {}", name, reason);
            return Observation::ValidationFailed(reason);
        }
    };

    debug!("Executing tool: {} with args: {}", name, input);
    match AssertUnwindSafe(tool.execute(input)).catch_unwind().await {
        Ok(Ok(output)) => {
            let text = output.normalize();
            debug!("Tool {} succeeded: {} chars", name, text.len());
            Observation::Success(text)
        }
        Ok(Err(e)) => {
            debug!("Tool {} failed: {}", name, e);
            error_observation(e)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Tool {} panicked: {}", name, message);
            Observation::ToolFailed(format!("tool panicked: {}", message))
        }
    }
}

fn error_observation(error: Error) -> Observation {
    match error {
        Error::Validation(reason) => Observation::ValidationFailed(reason),
        Error::Provider(reason) => Observation::ProviderUnavailable(reason),
        Error::Credential(e) => Observation::ToolFailed(format!("credential error: {}", e)),
        other => Observation::ToolFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialError;
    use crate::tools::ToolOutput;
    use crate::Result;
    use async_trait::async_trait;
    use serde_json::json;

    /// Echoes its `body` field, or fails in the requested way
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Echo the body"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"body": {"type": "string"}},
                "required": ["body"]
            })
        }
        async fn execute(&self, params: Value) -> Result<ToolOutput> {
            match params["body"].as_str().unwrap_or_default() {
                "panic" => panic!("tool body exploded"),
                "fail" => Err(Error::Tool("downstream said no".to_string())),
                "creds" => Err(CredentialError::NeedsReauthentication { identity: "g".to_string() }.into()),
                "remote" => Err(Error::Provider("connection reset".to_string())),
                "list" => Ok(ToolOutput::List(vec![json!("a"), json!("b")])),
                body => Ok(ToolOutput::Structured(json!({"result": body}))),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool { name: "echo" });
        registry
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let obs = registry().dispatch("echo", json!({"body": "hi"})).await;
        assert_eq!(obs, Observation::Success("hi".to_string()));
    }

    #[tokio::test]
    async fn test_dispatch_list_outcome() {
        let obs = registry().dispatch("echo", json!({"body": "list"})).await;
        assert_eq!(obs, Observation::Success("a, b".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let obs = registry().dispatch("missing", json!({})).await;
        assert!(matches!(obs, Observation::ToolFailed(ref r) if r.starts_with("unknown tool")));
    }

    #[tokio::test]
    async fn test_bare_string_coerced() {
        let obs = registry().dispatch("echo", json!("plain text")).await;
        assert_eq!(obs, Observation::Success("plain text".to_string()));
    }

    #[tokio::test]
    async fn test_validation_failure_is_observation() {
        let obs = registry().dispatch("echo", json!({"body": 5})).await;
        assert!(matches!(obs, Observation::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_caught() {
        let r = registry();
        assert!(matches!(
            r.dispatch("echo", json!({"body": "fail"})).await,
            Observation::ToolFailed(ref m) if m.contains("downstream said no")
        ));
        assert!(matches!(
            r.dispatch("echo", json!({"body": "panic"})).await,
            Observation::ToolFailed(ref m) if m.contains("tool body exploded")
        ));
        assert!(matches!(
            r.dispatch("echo", json!({"body": "creds"})).await,
            Observation::ToolFailed(ref m) if m.starts_with("credential error")
        ));
        assert!(matches!(
            r.dispatch("echo", json!({"body": "remote"})).await,
            Observation::ProviderUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_toolset_scopes_remote_tools() {
        let base = Arc::new(registry());
        let remote: Vec<Arc<dyn Tool>> = vec![
            Arc::new(EchoTool { name: "remote_echo" }),
            Arc::new(EchoTool { name: "echo" }),
        ];
        let set = ToolSet::new(base.clone()).with_scoped(remote);

        assert!(set.has("remote_echo"));
        assert_eq!(set.definitions().len(), 2);
        assert!(set.dispatch("remote_echo", json!({"body": "x"})).await.is_success());

        // The shared registry never sees invocation tools.
        assert!(!base.has("remote_echo"));
        let other = ToolSet::new(base);
        assert!(!other.has("remote_echo"));
    }

    #[test]
    fn test_definitions_sorted() {
        let mut r = ToolRegistry::new();
        r.register(EchoTool { name: "zeta" });
        r.register(EchoTool { name: "alpha" });
        let names: Vec<String> = r.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(r.tool_names(), vec!["alpha", "zeta"]);
    }
}

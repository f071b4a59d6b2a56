//! Invocation surface: request in, history and trace out.
//!
//! Each request gets its own session, reasoning backend client and agent
//! loop, so concurrent requests share nothing but the static tool registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::provider::ProviderConnector;
use crate::tools::ToolRegistry;
use crate::Result;

use super::llm::{LlmClient, ProviderRegistry};
use super::loop_impl::AgentLoop;
use super::message::{Message, Session};
use super::trace::{ExecutionResult, ExecutionStatus, Step};

/// A task posed by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub user_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl InvocationRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            model_name: None,
            max_iterations: None,
        }
    }
}

/// What the caller gets back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    /// Messages appended during the invocation
    pub history: Vec<Message>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub trace: Vec<Step>,
}

impl From<ExecutionResult> for InvocationResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            history: result.messages,
            status: result.status,
            final_answer: result.final_answer,
            trace: result.trace,
        }
    }
}

/// Builds the reasoning backend client for a request's model name
pub type ClientFactory = Arc<dyn Fn(&Config, Option<&str>) -> Result<Box<dyn LlmClient>> + Send + Sync>;

/// Runs invocation requests against a shared configuration and registry
pub struct Invoker {
    config: Config,
    tools: Arc<ToolRegistry>,
    connector: Option<Arc<dyn ProviderConnector>>,
    client_factory: ClientFactory,
}

impl Invoker {
    pub fn new(config: Config, tools: Arc<ToolRegistry>) -> Self {
        Self {
            config,
            tools,
            connector: None,
            client_factory: Arc::new(ProviderRegistry::create),
        }
    }

    /// Connector used when the config names a tool provider
    pub fn with_connector(mut self, connector: Arc<dyn ProviderConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one request. Always yields a result: a request that cannot
    /// start (zero iteration budget, unknown model, missing key) comes back
    /// `Aborted` with nothing dispatched.
    pub async fn execute(&self, request: &InvocationRequest, cancel: &CancellationToken) -> ExecutionResult {
        let max_iterations = request.max_iterations.unwrap_or(self.config.max_iterations);
        let mut session = match Session::new(max_iterations) {
            Ok(session) => session,
            Err(e) => return not_started(request, format!("invalid request: {}", e)),
        };
        let client: Arc<dyn LlmClient> = match (self.client_factory)(&self.config, request.model_name.as_deref()) {
            Ok(client) => client.into(),
            Err(e) => return not_started(request, format!("reasoning backend unavailable: {}", e)),
        };
        debug!("Invocation {} using model {}", session.id(), client.model());

        let mut agent = AgentLoop::new(client, self.tools.clone()).with_parse_retry_limit(self.config.parse_retry_limit);
        if let (Some(connector), Some(provider)) = (&self.connector, &self.config.tool_provider) {
            agent = agent.with_provider(connector.clone(), provider.url.clone());
        }

        agent.run(&mut session, &request.user_input, cancel).await
    }

    /// [`Invoker::execute`] shaped as a response
    pub async fn handle(&self, request: &InvocationRequest, cancel: &CancellationToken) -> InvocationResponse {
        self.execute(request, cancel).await.into()
    }
}

fn not_started(request: &InvocationRequest, reason: String) -> ExecutionResult {
    warn!("Invocation not started: {}", reason);
    ExecutionResult {
        final_answer: None,
        trace: Vec::new(),
        status: ExecutionStatus::Aborted(reason),
        messages: vec![Message::user(&request.user_input)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::message::Role;
    use crate::config::ToolProviderConfig;
    use crate::provider::testing::{FakeConnector, FakeProvider};
    use serde_json::json;
    use std::sync::Mutex;

    fn invoker(config: Config, models: Arc<Mutex<Vec<String>>>) -> Invoker {
        let factory: ClientFactory = Arc::new(move |config: &Config, model: Option<&str>| -> Result<Box<dyn LlmClient>> {
            let model = model.unwrap_or(config.model.as_str()).to_string();
            if let Ok(mut seen) = models.lock() {
                seen.push(model);
            }
            Ok(Box::new(FakeLlmClient::new(vec!["Final Answer: hello"])) as Box<dyn LlmClient>)
        });
        Invoker::new(config, Arc::new(ToolRegistry::new())).with_client_factory(factory)
    }

    #[test]
    fn test_request_deserialization() {
        let request: InvocationRequest = serde_json::from_value(json!({"user_input": "hi"})).unwrap();
        assert_eq!(request, InvocationRequest::new("hi"));

        let request: InvocationRequest =
            serde_json::from_value(json!({"user_input": "hi", "model_name": "gpt-4o", "max_iterations": 2})).unwrap();
        assert_eq!(request.model_name.as_deref(), Some("gpt-4o"));
        assert_eq!(request.max_iterations, Some(2));
    }

    #[tokio::test]
    async fn test_handle_returns_history() {
        let models = Arc::new(Mutex::new(Vec::new()));
        let invoker = invoker(Config::default(), models.clone());

        let mut request = InvocationRequest::new("say hello");
        request.model_name = Some("gpt-4o".to_string());
        let response = invoker.handle(&request, &CancellationToken::new()).await;

        assert_eq!(response.status, ExecutionStatus::Completed);
        assert_eq!(response.history.len(), 2);
        assert_eq!(response.history[0].role, Role::User);
        assert_eq!(response.history[1].content, "hello");
        assert_eq!(models.lock().unwrap().as_slice(), ["gpt-4o".to_string()]);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["history"][1], json!({"role": "assistant", "content": "hello"}));
        assert_eq!(json["status"], json!({"status": "completed"}));
    }

    #[tokio::test]
    async fn test_zero_iterations_rejected() {
        let invoker = invoker(Config::default(), Arc::new(Mutex::new(Vec::new())));
        let mut request = InvocationRequest::new("x");
        request.max_iterations = Some(0);

        let result = invoker.execute(&request, &CancellationToken::new()).await;
        assert!(matches!(result.status, ExecutionStatus::Aborted(ref r) if r.starts_with("invalid request")));
        assert!(result.trace.is_empty());
        assert_eq!(result.messages, vec![Message::user("x")]);
    }

    #[tokio::test]
    async fn test_default_factory_rejects_unknown_model() {
        let invoker = Invoker::new(Config::default(), Arc::new(ToolRegistry::new()));
        let mut request = InvocationRequest::new("x");
        request.model_name = Some("llama-3".to_string());

        let response = invoker.handle(&request, &CancellationToken::new()).await;
        assert!(matches!(
            response.status,
            ExecutionStatus::Aborted(ref r) if r.starts_with("reasoning backend unavailable")
        ));
        assert_eq!(response.final_answer, None);

        // Still a well-formed response for `run --json`.
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["history"][0]["content"], "x");
        assert_eq!(json["status"]["status"], "aborted");
    }

    #[tokio::test]
    async fn test_configured_provider_is_acquired_per_request() {
        let provider = FakeProvider::new();
        let config = Config {
            tool_provider: Some(ToolProviderConfig {
                url: "http://provider".to_string(),
            }),
            ..Config::default()
        };
        let invoker = invoker(config, Arc::new(Mutex::new(Vec::new())))
            .with_connector(Arc::new(FakeConnector(provider.clone())));

        let cancel = CancellationToken::new();
        let a = InvocationRequest::new("first");
        let b = InvocationRequest::new("second");
        let (first, second) = tokio::join!(invoker.handle(&a, &cancel), invoker.handle(&b, &cancel));

        assert_eq!(first.history[0].content, "first");
        assert_eq!(second.history[0].content, "second");
        assert_eq!(provider.connects(), 2);
        assert_eq!(provider.closes(), 2);
    }
}

//! Agent loop - ReAct execution of one invocation
//!
//! Thinking asks the backend for the next turn, an action is dispatched
//! through the invocation's [`ToolSet`] and recorded as a [`Step`], and the
//! loop ends on a final answer, an exhausted iteration budget or an abort.
//! A provider connection acquired at the start is released before `run`
//! returns, whatever the status.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{Connection, ProviderConnector};
use crate::tools::{Observation, ToolRegistry, ToolSet};

use super::context::{Context, Scratchpad};
use super::llm::LlmClient;
use super::message::{Message, Session};
use super::parser::{self, Turn};
use super::trace::{ExecutionResult, ExecutionStatus, Step};

/// Unparseable turns tolerated before the invocation is aborted
pub const DEFAULT_PARSE_RETRY_LIMIT: usize = 2;

const PROVIDER_UNAVAILABLE: &str = "provider unavailable";
const CANCELLED: &str = "cancelled";
const UNPARSEABLE_OUTPUT: &str = "unparseable output";

/// Remote tool provider attached to every invocation of a loop
struct ProviderTarget {
    connector: Arc<dyn ProviderConnector>,
    url: String,
}

/// What the thinking/dispatching cycle produced
struct Outcome {
    final_answer: Option<String>,
    trace: Vec<Step>,
    status: ExecutionStatus,
}

impl Outcome {
    fn aborted(trace: Vec<Step>, reason: impl Into<String>) -> Self {
        Self {
            final_answer: None,
            trace,
            status: ExecutionStatus::Aborted(reason.into()),
        }
    }
}

/// The agent loop drives one session through the reasoning backend and tools
pub struct AgentLoop {
    client: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    provider: Option<ProviderTarget>,
    parse_retry_limit: usize,
}

impl AgentLoop {
    /// Create a new agent loop over a shared static registry
    pub fn new(client: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            client,
            tools,
            provider: None,
            parse_retry_limit: DEFAULT_PARSE_RETRY_LIMIT,
        }
    }

    /// Acquire a connection to `url` at the start of each run
    pub fn with_provider(mut self, connector: Arc<dyn ProviderConnector>, url: impl Into<String>) -> Self {
        self.provider = Some(ProviderTarget {
            connector,
            url: url.into(),
        });
        self
    }

    pub fn with_parse_retry_limit(mut self, limit: usize) -> Self {
        self.parse_retry_limit = limit;
        self
    }

    /// Run one invocation. Never fails: every problem ends up in the
    /// returned status.
    pub async fn run(&self, session: &mut Session, user_input: &str, cancel: &CancellationToken) -> ExecutionResult {
        info!("Starting invocation {} with message: {}", session.id(), user_input);

        let user = Message::user(user_input);
        session.push(user.clone());
        let mut appended = vec![user];

        let connection = match &self.provider {
            Some(target) => match Connection::acquire(target.connector.as_ref(), &target.url).await {
                Ok(connection) => Some(connection),
                Err(e) => {
                    warn!("Tool provider {} unavailable: {}", target.url, e);
                    return ExecutionResult {
                        final_answer: None,
                        trace: Vec::new(),
                        status: ExecutionStatus::Aborted(PROVIDER_UNAVAILABLE.to_string()),
                        messages: appended,
                    };
                }
            },
            None => None,
        };

        let tools = ToolSet::new(self.tools.clone()).with_scoped(connection.iter().flat_map(|c| c.tools()));
        let outcome = self.drive(session, &tools, cancel).await;
        drop(tools);

        if let Some(connection) = connection {
            connection.release().await;
        }

        if let Some(answer) = &outcome.final_answer {
            let reply = Message::assistant(answer.clone());
            session.push(reply.clone());
            appended.push(reply);
        }

        info!(
            "Invocation {} finished: {} after {} steps",
            session.id(),
            outcome.status,
            outcome.trace.len()
        );
        ExecutionResult {
            final_answer: outcome.final_answer,
            trace: outcome.trace,
            status: outcome.status,
            messages: appended,
        }
    }

    async fn drive(&self, session: &Session, tools: &ToolSet, cancel: &CancellationToken) -> Outcome {
        let context = Context::new(tools.definitions());
        let max_iterations = session.max_iterations();
        let mut scratchpad = Scratchpad::new();
        let mut trace: Vec<Step> = Vec::new();
        let mut iterations = 0;
        let mut parse_retries = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Invocation {} cancelled", session.id());
                return Outcome::aborted(trace, CANCELLED);
            }

            let messages = context.build_messages(session.messages(), &scratchpad);
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Invocation {} cancelled while waiting for the backend", session.id());
                    return Outcome::aborted(trace, CANCELLED);
                }
                response = self.client.chat(&messages, context.tools()) => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!("Reasoning backend failed: {}", e);
                    return Outcome::aborted(trace, format!("reasoning backend error: {}", e));
                }
            };

            match parser::interpret(&response) {
                Err(e) => {
                    parse_retries += 1;
                    if parse_retries > self.parse_retry_limit {
                        warn!("Giving up after {} unparseable turns: {}", parse_retries, e);
                        return Outcome::aborted(trace, UNPARSEABLE_OUTPUT);
                    }
                    debug!("Unparseable turn ({}/{}): {}", parse_retries, self.parse_retry_limit, e);
                    let correction = Observation::ValidationFailed(format!("unparseable action: {}", e));
                    scratchpad.record_unparseable(
                        response.content.as_deref().unwrap_or_default(),
                        &correction.to_prompt_text(),
                    );
                }
                Ok(Turn::Final(answer)) => {
                    debug!("Final answer: {} chars", answer.len());
                    return Outcome {
                        final_answer: Some(answer),
                        trace,
                        status: ExecutionStatus::Completed,
                    };
                }
                Ok(Turn::Act(action)) => {
                    iterations += 1;
                    if iterations > max_iterations {
                        info!("Iteration budget of {} exhausted", max_iterations);
                        return Outcome {
                            final_answer: None,
                            trace,
                            status: ExecutionStatus::IterationBudgetExceeded,
                        };
                    }

                    info!("Iteration {}/{}: {}", iterations, max_iterations, action.describe());
                    let observation = tools.dispatch(&action.tool_name, action.tool_input.clone()).await;
                    scratchpad.record_step(&action, &observation.to_prompt_text());

                    let fatal = observation.is_provider_unavailable();
                    trace.push(Step {
                        index: trace.len() + 1,
                        action,
                        observation,
                    });
                    if fatal {
                        warn!("Tool provider became unavailable mid-invocation");
                        return Outcome::aborted(trace, PROVIDER_UNAVAILABLE);
                    }
                }
            }
        }
    }
}

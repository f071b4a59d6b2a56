//! Execution trace and the result handed back to the caller

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;
use crate::tools::Observation;

/// A tool call proposed by the reasoning backend for one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    pub tool_input: Value,
    /// Reasoning that preceded the call, if any
    #[serde(default)]
    pub rationale: String,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// `tool[input]` form used in logs and the thought process
    pub fn describe(&self) -> String {
        let input = match &self.tool_input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!("{}[{}]", self.tool_name, input)
    }
}

/// One dispatched action and what came back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the trace
    pub index: usize,
    pub action: Action,
    pub observation: Observation,
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    IterationBudgetExceeded,
    Aborted(String),
}

impl ExecutionStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionStatus::Completed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::IterationBudgetExceeded => write!(f, "iteration budget exceeded"),
            ExecutionStatus::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Outcome of one invocation of the agent loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub final_answer: Option<String>,
    pub trace: Vec<Step>,
    pub status: ExecutionStatus,
    /// Messages appended to the session during this invocation
    pub messages: Vec<Message>,
}

impl ExecutionResult {
    /// Trace rendered as numbered Action / Observation blocks
    pub fn thought_process(&self) -> String {
        let mut log = String::new();
        for step in &self.trace {
            log.push_str(&format!("\n--- Step {} ---", step.index));
            if !step.action.rationale.is_empty() {
                log.push_str(&format!("\nThought: {}", step.action.rationale.trim()));
            }
            log.push_str(&format!("\nAction: {}", step.action.describe()));
            log.push_str(&format!("\nObservation: {}", step.observation.to_prompt_text()));
        }
        log
    }
}

//! Message types and the per-invocation session

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A native tool call request from the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Conversation state for one invocation.
///
/// Owned by the caller; only the agent loop appends to it.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    messages: Vec<Message>,
    max_iterations: usize,
}

impl Session {
    /// Fresh session with a unique execution id
    pub fn new(max_iterations: usize) -> Result<Self> {
        if max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            max_iterations,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

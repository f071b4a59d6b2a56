//! Agent module: core agent logic.
//!
//! This module contains:
//! - Message and session types
//! - LLM client trait and implementations
//! - Turn interpretation (ReAct text and native tool calls)
//! - Agent loop and the invocation surface around it
//! - Context builder for prompts
//!
//! # Adding a New LLM Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod context;
mod invocation;
mod loop_impl;
mod message;
pub mod parser;
mod trace;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use context::{Context, Scratchpad};
pub use invocation::{ClientFactory, InvocationRequest, InvocationResponse, Invoker};
pub use llm::{GeminiClient, GroundedAnswer, LlmClient, LlmResponse, OpenAiClient, ProviderRegistry, Usage};
pub use loop_impl::{AgentLoop, DEFAULT_PARSE_RETRY_LIMIT};
pub use message::{Message, Role, Session, ToolCallRequest};
pub use parser::{ParseError, Turn};
pub use trace::{Action, ExecutionResult, ExecutionStatus, Step};

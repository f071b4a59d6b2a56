//! Kestrel - autonomous task agent
//!
//! This library provides a ReAct agent loop with tool dispatch, managed
//! OAuth credentials and per-invocation remote tool providers.

pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod provider;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};

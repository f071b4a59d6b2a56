//! Error types for Kestrel

use thiserror::Error;

use crate::auth::CredentialError;

/// Result type alias for Kestrel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Kestrel
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Invalid tool input: {0}")]
    Validation(String),

    #[error("Tool provider error: {0}")]
    Provider(String),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

//! Error types for council-mcp.

use thiserror::Error;

/// Result type for council-mcp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for council-mcp.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Tool name not present in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Path outside the configured allow-list.
    #[error("sandbox violation: {0}")]
    Sandbox(String),

    /// Provider-level failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Render the `source()` chain below this error, outermost first.
    pub fn trace(&self) -> Option<String> {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        if chain.is_empty() {
            None
        } else {
            Some(chain.join("\ncaused by: "))
        }
    }
}

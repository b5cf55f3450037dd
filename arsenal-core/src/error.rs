//! Error types for arsenal-core

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using arsenal Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for arsenal
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(arsenal::config))]
    Config(String),

    #[error("Invalid target or parameter: {0}")]
    #[diagnostic(code(arsenal::validation))]
    Validation(String),

    #[error("Unknown tool: {0}")]
    #[diagnostic(code(arsenal::not_found))]
    NotFound(String),

    #[error("Network error: {0}")]
    #[diagnostic(code(arsenal::network))]
    Network(String),

    #[error("Operation timed out: {0}")]
    #[diagnostic(code(arsenal::timeout))]
    Timeout(String),

    #[error("Tool execution error: {0}")]
    #[diagnostic(code(arsenal::tool))]
    Tool(String),

    #[error("Reasoning service unavailable: {0}")]
    #[diagnostic(code(arsenal::reasoning))]
    Reasoning(String),

    #[error("IO error: {0}")]
    #[diagnostic(code(arsenal::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(arsenal::serde))]
    Serde(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    #[diagnostic(code(arsenal::toml))]
    Toml(#[from] toml::de::Error),

    #[error("Internal invariant violated: {0}")]
    #[diagnostic(code(arsenal::fatal))]
    Fatal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

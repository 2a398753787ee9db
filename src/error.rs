//! Error types and result aliases for Polygate.
//!
//! This module defines the core error type [`PolygateError`] and the [`Result`] type alias
//! used throughout the crate. Streaming operations never raise these directly; they are
//! delivered to the caller inside the terminal [`StreamEvent::Error`](crate::llm::StreamEvent).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolygateError {
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("API key not set: {0}")]
    ApiKeyNotSet(String),

    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("tool loop exceeded after {0} rounds")]
    ToolLoopExceeded(usize),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolygateError {
    /// Whether this error means the requested model could not be routed to a backend.
    pub fn is_resolution_error(&self) -> bool {
        matches!(self, PolygateError::ProviderNotFound(_) | PolygateError::ModelNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PolygateError>;

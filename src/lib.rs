pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;

#[cfg(test)]
mod test_support;

pub use client::Polygate;
pub use config::GatewayConfig;
pub use error::{PolygateError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::client::{Polygate, StartupReport};
    pub use crate::config::GatewayConfig;
    pub use crate::error::{PolygateError, Result};
    pub use crate::llm::{
        ChatBackend, ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse, CompletionOrchestrator,
        EventStream, MessageRole, Model, OrchestratorConfig, Provider, ProviderRegistry, StreamEvent,
    };
    pub use crate::mcp::{McpHub, McpServerConfig, ToolBridge};
    pub use tokio_util::sync::CancellationToken;
}

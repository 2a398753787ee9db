//! Model Context Protocol tool bridge.
//!
//! The orchestrator only sees the [`ToolBridge`] trait. [`McpHub`] implements it over a set of
//! stdio MCP servers; tests substitute their own bridges.
//!
//! Tools are exposed to models as `mcp_<server>_<tool>` because function-calling schemas
//! usually restrict names to `[A-Za-z0-9_]`.

pub mod client;
pub mod hub;
pub mod types;

pub use client::StdioMcpClient;
pub use hub::McpHub;
pub use types::{McpServerConfig, McpTransport, DEFAULT_PROTOCOL_VERSION};

use crate::error::{PolygateError, Result};
use crate::llm::models::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of every bridged tool name
pub const TOOL_NAME_PREFIX: &str = "mcp";

/// A tool as listed by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolSpec {
    /// Function definition exposing this tool of `server` to a model
    pub fn to_definition(&self, server: &str) -> ToolDefinition {
        ToolDefinition::function(
            encode_tool_name(server, &self.name),
            self.description.clone(),
            self.input_schema.clone(),
        )
    }
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Resource { resource } => resource.text.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Concatenate the textual blocks and trim the result.
pub fn flatten_text(blocks: &[ContentBlock]) -> String {
    blocks.iter().filter_map(ContentBlock::as_text).collect::<String>().trim().to_string()
}

/// Check that `server` survives the `mcp_<server>_<tool>` encoding: non-empty and free of `_`.
pub fn validate_server_name(server: &str) -> Result<()> {
    if server.is_empty() || server.contains('_') {
        return Err(PolygateError::InvalidConfiguration(format!(
            "MCP server name must be non-empty and contain no '_', got {:?}",
            server
        )));
    }
    Ok(())
}

pub fn encode_tool_name(server: &str, tool: &str) -> String {
    format!("{}_{}_{}", TOOL_NAME_PREFIX, server, tool)
}

/// Split `mcp_<server>_<tool>` into `(server, tool)`.
///
/// The server is the second underscore-delimited segment; everything after the second
/// underscore is the tool name, so tool names may contain underscores and server names may not.
pub fn decode_tool_name(name: &str) -> Result<(&str, &str)> {
    let mut parts = name.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(TOOL_NAME_PREFIX), Some(server), Some(tool)) if !server.is_empty() && !tool.is_empty() => {
            Ok((server, tool))
        }
        _ => Err(PolygateError::Tool(format!(
            "tool name must be in format mcp_<server>_<tool>, got {}",
            name
        ))),
    }
}

/// Lists and executes tools on behalf of the model.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    /// Names of every configured tool server
    fn server_names(&self) -> Vec<String>;

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>>;

    /// Invoke `tool` on `server`. A successful call returns at least one content block.
    async fn call_tool(&self, server: &str, tool: &str, arguments: Map<String, Value>) -> Result<Vec<ContentBlock>>;
}

/// Bridge with no servers, for gateways that never expose tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolBridge for NoTools {
    fn server_names(&self) -> Vec<String> {
        Vec::new()
    }

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>> {
        Err(PolygateError::Tool(format!("unknown MCP server: {}", server)))
    }

    async fn call_tool(&self, server: &str, _tool: &str, _arguments: Map<String, Value>) -> Result<Vec<ContentBlock>> {
        Err(PolygateError::Tool(format!("unknown MCP server: {}", server)))
    }
}

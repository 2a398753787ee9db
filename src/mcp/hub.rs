use super::client::StdioMcpClient;
use super::types::McpServerConfig;
use super::{validate_server_name, ContentBlock, ToolBridge, ToolSpec};
use crate::error::{PolygateError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// [`ToolBridge`] over a set of connected MCP servers, keyed by configured name.
#[derive(Default)]
pub struct McpHub {
    clients: BTreeMap<String, Arc<StdioMcpClient>>,
}

impl McpHub {
    /// Connect every configured server concurrently.
    ///
    /// Servers that fail to start are logged, left out of the hub and returned alongside it.
    pub async fn connect(configs: &BTreeMap<String, McpServerConfig>) -> (Self, Vec<(String, PolygateError)>) {
        let attempts = configs.iter().map(|(name, config)| async move {
            let client = StdioMcpClient::new(name.clone(), config.clone());
            let outcome = match validate_server_name(name) {
                Ok(()) => client.connect().await,
                Err(e) => Err(e),
            };
            (name.clone(), client, outcome)
        });

        let mut hub = McpHub::default();
        let mut failures = Vec::new();

        for (name, client, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => {
                    hub.clients.insert(name, Arc::new(client));
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping MCP server");
                    failures.push((name, e));
                }
            }
        }

        info!(connected = hub.clients.len(), failed = failures.len(), "MCP servers ready");
        (hub, failures)
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn client(&self, server: &str) -> Result<&Arc<StdioMcpClient>> {
        self.clients
            .get(server)
            .ok_or_else(|| PolygateError::Tool(format!("unknown MCP server: {}", server)))
    }

    pub async fn shutdown(&self) {
        join_all(self.clients.values().map(|client| client.disconnect())).await;
    }
}

#[async_trait]
impl ToolBridge for McpHub {
    fn server_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>> {
        self.client(server)?.list_tools().await
    }

    async fn call_tool(&self, server: &str, tool: &str, arguments: Map<String, Value>) -> Result<Vec<ContentBlock>> {
        self.client(server)?.call_tool(tool, arguments).await
    }
}

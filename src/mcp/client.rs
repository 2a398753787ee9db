//! Stdio MCP client.
//!
//! Spawns the server as a child process and exchanges line-delimited JSON-RPC 2.0 messages
//! over its stdin/stdout. Responses are matched to requests by id through a pending table
//! filled by a background reader task.

use super::types::*;
use super::{flatten_text, ContentBlock, ToolSpec};
use crate::error::{PolygateError, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Removes a request's pending entry when the request finishes, fails or is dropped.
struct PendingEntry {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        let id = self.id;
        match self.pending.try_lock() {
            Ok(mut pending) => {
                pending.remove(&id);
            }
            Err(_) => {
                let pending = Arc::clone(&self.pending);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        pending.lock().await.remove(&id);
                    });
                }
            }
        }
    }
}

/// Client for a single stdio MCP server
pub struct StdioMcpClient {
    name: String,
    config: McpServerConfig,
    process: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    request_id: AtomicU64,
    pending: PendingMap,
    server_info: Mutex<Option<Implementation>>,
}

impl StdioMcpClient {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            server_info: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the server process and run the initialize handshake
    pub async fn connect(&self) -> Result<()> {
        if self.config.transport() != McpTransport::Stdio {
            return Err(PolygateError::UnsupportedOperation(format!(
                "MCP server {} uses the SSE transport, only stdio servers are supported",
                self.name
            )));
        }
        if self.config.command.is_empty() {
            return Err(PolygateError::InvalidConfiguration(format!(
                "MCP server {} has no command",
                self.name
            )));
        }

        info!(server = %self.name, command = %self.config.command, "Connecting to MCP server");

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(ref cwd) = self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(server = %self.name, error = %e, "Failed to spawn MCP server process");
            PolygateError::Tool(format!("failed to spawn MCP server {}: {}", self.name, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PolygateError::Tool("failed to capture MCP server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PolygateError::Tool("failed to capture MCP server stdout".to_string()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.process.lock().await = Some(child);

        self.spawn_reader(stdout);

        let init = match self.initialize().await {
            Ok(init) => init,
            Err(e) => {
                self.disconnect().await;
                return Err(e);
            }
        };

        info!(
            server = %self.name,
            server_name = %init.server_info.name,
            server_version = %init.server_info.version,
            protocol_version = %init.protocol_version,
            "MCP server initialized"
        );
        *self.server_info.lock().await = Some(init.server_info);

        Ok(())
    }

    pub async fn disconnect(&self) {
        debug!(server = %self.name, "Disconnecting from MCP server");

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        self.server_info.lock().await.clone()
    }

    async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version().to_string(),
            capabilities: json!({}),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result = self.send_request("initialize", Some(serde_json::to_value(params)?)).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| PolygateError::Tool(format!("invalid initialize result: {}", e)))?;

        self.send_notification("notifications/initialized", None).await?;
        Ok(init)
    }

    /// List every tool, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = ListToolsParams { cursor };
            let result = self.send_request("tools/list", Some(serde_json::to_value(params)?)).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| PolygateError::Tool(format!("invalid tools/list result: {}", e)))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool. A result flagged `isError` is returned as an error carrying its text.
    pub async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<Vec<ContentBlock>> {
        debug!(server = %self.name, tool, "Calling MCP tool");

        let params = CallToolParams {
            name: tool.to_string(),
            arguments,
        };
        let result = self.send_request("tools/call", Some(serde_json::to_value(params)?)).await?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| PolygateError::Tool(format!("invalid tools/call result: {}", e)))?;

        if call.is_error {
            return Err(PolygateError::Tool(format!(
                "{} on {} failed: {}",
                tool,
                self.name,
                flatten_text(&call.content)
            )));
        }
        Ok(call.content)
    }

    async fn write_line(&self, line: String) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| PolygateError::Tool(format!("MCP server {} is not connected", self.name)))?;

        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.write_line(serde_json::to_string(&notification)?).await
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let _entry = PendingEntry {
            pending: Arc::clone(&self.pending),
            id,
        };

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };

        self.write_line(serde_json::to_string(&request)?).await?;

        let wait = Duration::from_secs(self.config.request_timeout_secs);
        let response = match timeout(wait, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(PolygateError::Tool(format!(
                    "MCP server {} closed before answering {}",
                    self.name, method
                )));
            }
            Err(_) => {
                warn!(server = %self.name, method, "MCP request timed out");
                return Err(PolygateError::Tool(format!(
                    "MCP request {} to {} timed out",
                    method, self.name
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(PolygateError::Tool(format!(
                "{} (code: {})",
                error.message, error.code
            )));
        }

        response
            .result
            .ok_or_else(|| PolygateError::Tool(format!("missing result for {}", method)))
    }

    fn spawn_reader(&self, stdout: ChildStdout) {
        let pending = Arc::clone(&self.pending);
        let server = self.name.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        // Server-initiated requests and notifications carry no numeric id
                        let Some(id) = response.id.as_u64() else {
                            continue;
                        };
                        match pending.lock().await.remove(&id) {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => warn!(server = %server, id, "Response for unknown MCP request"),
                        }
                    }
                    Err(e) => warn!(server = %server, error = %e, "Failed to parse MCP message"),
                }
            }

            // Dropping the senders wakes every waiter with a closed-channel error
            pending.lock().await.clear();
            debug!(server = %server, "MCP stdout reader exited");
        });
    }
}

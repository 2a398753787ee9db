//! Multi-round chat completion with MCP tool calling.
//!
//! The orchestrator routes a request to its backend, exposes the tools named by the model's
//! directive, and runs tool rounds until the model answers without tool calls. Callers see
//! the content of every round and exactly one terminal event for the whole conversation.

use crate::error::{PolygateError, Result};
use crate::llm::assembler::ToolCallAssembler;
use crate::llm::directive::ToolDirective;
use crate::llm::envelope::{EventStream, StreamEvent};
use crate::llm::models::{ChatCompletionMessage, ChatCompletionRequest, ToolCall};
use crate::llm::registry::ProviderRegistry;
use crate::mcp::{decode_tool_name, flatten_text, validate_server_name, ToolBridge};
use futures::future::join_all;
use futures::stream::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on tool rounds per request
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tool rounds allowed before the request fails with `ToolLoopExceeded`
    pub max_tool_rounds: usize,
    /// Run the calls of one round concurrently; replies keep call order either way
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            parallel_tool_calls: true,
        }
    }
}

enum Step {
    Cancelled,
    Event(Option<StreamEvent>),
}

/// Drives a request through the backend and tool rounds.
pub struct CompletionOrchestrator {
    registry: Arc<ProviderRegistry>,
    tools: Arc<dyn ToolBridge>,
    config: OrchestratorConfig,
}

impl CompletionOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, tools: Arc<dyn ToolBridge>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            tools,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn tools(&self) -> &Arc<dyn ToolBridge> {
        &self.tools
    }

    /// Run a chat completion, streaming or not according to `request.stream`.
    ///
    /// The returned stream yields every content chunk of every round, then exactly one
    /// terminal event. Cancelling `cancel` or dropping the stream aborts the in-flight backend
    /// call and any pending tool invocations.
    pub fn chat_completion(&self, request: ChatCompletionRequest, cancel: CancellationToken) -> EventStream<'static> {
        let registry = self.registry.clone();
        let tools = self.tools.clone();
        let config = self.config.clone();

        Box::pin(async_stream::stream! {
            let request_id = Uuid::new_v4();

            let resolution = match registry.resolve(&request.model) {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(request_id = %request_id, model = %request.model, error = %e, "Model resolution failed");
                    yield StreamEvent::Error(e);
                    return;
                }
            };

            info!(
                request_id = %request_id,
                provider = %resolution.provider,
                model = %resolution.public_model,
                backend_model = %resolution.backend_model,
                stream = request.stream,
                "Starting chat completion"
            );

            let mut request = request;

            if let Some(raw) = resolution.directive.as_deref() {
                let configured = tools.server_names();
                let directive = ToolDirective::parse(raw, configured.as_slice());
                for server in &directive.servers {
                    if let Err(e) = validate_server_name(server) {
                        warn!(request_id = %request_id, server = %server, error = %e, "Not exposing tools of MCP server");
                        continue;
                    }
                    let listing = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        listing = tools.list_tools(server) => Some(listing),
                    };
                    match listing {
                        None => {
                            yield StreamEvent::Error(PolygateError::Cancelled);
                            return;
                        }
                        Some(Ok(specs)) => {
                            debug!(request_id = %request_id, server = %server, tools = specs.len(), "Exposing MCP tools");
                            request.tools.extend(specs.iter().map(|spec| spec.to_definition(server)));
                        }
                        Some(Err(e)) => {
                            warn!(request_id = %request_id, server = %server, error = %e, "Failed to list MCP tools");
                        }
                    }
                }
            }

            request.model = resolution.backend_model.clone();
            let backend = resolution.backend.clone();
            let mut tool_rounds = 0usize;

            loop {
                debug!(request_id = %request_id, round = tool_rounds, messages = request.messages.len(), "Calling backend");

                let mut events = backend.chat_completion(request.clone());
                let mut assembler = ToolCallAssembler::new();
                let mut round_text = String::new();

                let calls: Vec<ToolCall> = loop {
                    let step = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Step::Cancelled,
                        event = events.next() => Step::Event(event),
                    };

                    match step {
                        Step::Cancelled => {
                            info!(request_id = %request_id, round = tool_rounds, "Chat completion cancelled");
                            yield StreamEvent::Error(PolygateError::Cancelled);
                            return;
                        }
                        Step::Event(None) => {
                            warn!(request_id = %request_id, round = tool_rounds, "Backend stream ended without a terminal event");
                            yield StreamEvent::Error(PolygateError::Stream(
                                "backend stream ended without a terminal event".to_string(),
                            ));
                            return;
                        }
                        Step::Event(Some(StreamEvent::Chunk(chunk))) => {
                            if let Some(chunk) = assembler.absorb(chunk) {
                                round_text.push_str(&chunk.content());
                                yield StreamEvent::Chunk(chunk);
                            }
                        }
                        Step::Event(Some(StreamEvent::Error(e))) => {
                            warn!(request_id = %request_id, round = tool_rounds, error = %e, "Backend failed");
                            yield StreamEvent::Error(e);
                            return;
                        }
                        Step::Event(Some(StreamEvent::Done(response))) => {
                            if !assembler.is_empty() {
                                if !assembler.finished_with_tool_calls() {
                                    debug!(request_id = %request_id, "Stream carried tool calls without a tool_calls finish reason");
                                }
                                break assembler.finish();
                            }
                            let calls = response
                                .as_ref()
                                .map(|r| r.message_tool_calls().to_vec())
                                .unwrap_or_default();
                            if calls.is_empty() {
                                info!(request_id = %request_id, tool_rounds, "Chat completion finished");
                                yield StreamEvent::Done(response);
                                return;
                            }
                            if let Some(response) = &response {
                                round_text.push_str(&response.content());
                            }
                            break calls;
                        }
                    }
                };
                drop(events);

                if tool_rounds >= config.max_tool_rounds {
                    warn!(request_id = %request_id, max = config.max_tool_rounds, "Tool loop limit reached");
                    yield StreamEvent::Error(PolygateError::ToolLoopExceeded(config.max_tool_rounds));
                    return;
                }
                tool_rounds += 1;

                info!(request_id = %request_id, round = tool_rounds, calls = calls.len(), "Running tool round");
                request
                    .messages
                    .push(ChatCompletionMessage::assistant_tool_calls(calls.clone()).with_text(round_text));

                let replies = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    replies = run_tool_calls(tools.as_ref(), &calls, config.parallel_tool_calls, request_id) => Some(replies),
                };
                match replies {
                    Some(replies) => request.messages.extend(replies),
                    None => {
                        info!(request_id = %request_id, round = tool_rounds, "Chat completion cancelled during tool round");
                        yield StreamEvent::Error(PolygateError::Cancelled);
                        return;
                    }
                }
            }
        })
    }

    /// Callback form of [`chat_completion`](Self::chat_completion): every event is passed to
    /// `on_event`, which is called exactly once with a terminal event.
    pub async fn chat_completion_with<F>(&self, request: ChatCompletionRequest, cancel: CancellationToken, mut on_event: F)
    where
        F: FnMut(StreamEvent) + Send,
    {
        let mut stream = self.chat_completion(request, cancel);
        while let Some(event) = stream.next().await {
            on_event(event);
        }
    }
}

/// Invoke every call of a round, returning one tool reply per call in call order.
async fn run_tool_calls(
    tools: &dyn ToolBridge,
    calls: &[ToolCall],
    parallel: bool,
    request_id: Uuid,
) -> Vec<ChatCompletionMessage> {
    if parallel {
        return join_all(calls.iter().map(|call| invoke_tool(tools, call, request_id))).await;
    }

    let mut replies = Vec::with_capacity(calls.len());
    for call in calls {
        replies.push(invoke_tool(tools, call, request_id).await);
    }
    replies
}

/// Run one call. Failures become an `error: ...` reply so every call is answered.
async fn invoke_tool(tools: &dyn ToolBridge, call: &ToolCall, request_id: Uuid) -> ChatCompletionMessage {
    let content = match try_invoke_tool(tools, call, request_id).await {
        Ok(content) => content,
        Err(e) => {
            warn!(
                request_id = %request_id,
                tool = %call.function.name,
                call_id = %call.id,
                error = %e,
                "Tool call failed"
            );
            format!("error: {}", e)
        }
    };
    ChatCompletionMessage::tool_result(call.id.clone(), content)
}

async fn try_invoke_tool(tools: &dyn ToolBridge, call: &ToolCall, request_id: Uuid) -> Result<String> {
    let (server, tool) = decode_tool_name(&call.function.name)?;
    let arguments = parse_arguments(&call.function.arguments)?;

    info!(request_id = %request_id, server, tool, call_id = %call.id, "Invoking MCP tool");
    let blocks = tools.call_tool(server, tool, arguments).await?;
    if blocks.is_empty() {
        return Err(PolygateError::Tool(format!("{} returned no content", call.function.name)));
    }

    let content = flatten_text(&blocks);
    debug!(request_id = %request_id, tool, bytes = content.len(), "MCP tool finished");
    Ok(content)
}

/// Parse a call's argument text. Blank text means no arguments.
fn parse_arguments(raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(PolygateError::Tool(format!(
            "tool arguments must be a JSON object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::cache::{ModelCache, DEFAULT_CACHE_TTL};
    use crate::llm::envelope::collect_events;
    use crate::llm::models::{FinishReason, MessageRole, Model};
    use crate::llm::provider::Provider;
    use crate::mcp::{ContentBlock, NoTools};
    use crate::test_support::*;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        orchestrator: CompletionOrchestrator,
        backend: Arc<ScriptedBackend>,
        bridge: Arc<RecordingBridge>,
        _dir: TempDir,
    }

    async fn fixture(backend: ScriptedBackend, bridge: RecordingBridge, config: OrchestratorConfig) -> Fixture {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ProviderRegistry::new(Arc::new(ModelCache::new(dir.path(), DEFAULT_CACHE_TTL))));
        let backend = Arc::new(backend);
        registry
            .register_with_backend(
                Provider::new("mock", "http://localhost")
                    .with_model_prefix("mock/")
                    .with_models(vec![Model::new("mock/gpt-4")]),
                backend.clone(),
            )
            .await
            .unwrap();
        let bridge = Arc::new(bridge);
        let orchestrator = CompletionOrchestrator::new(registry, bridge.clone(), config);

        Fixture {
            orchestrator,
            backend,
            bridge,
            _dir: dir,
        }
    }

    fn page(text: &str) -> ToolOutcome {
        ToolOutcome::Content(vec![ContentBlock::text(text)])
    }

    fn request(model: &str, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest::new(model, vec![ChatCompletionMessage::user("What is at http://x?")]).with_stream(stream)
    }

    #[tokio::test]
    async fn test_unknown_model_yields_single_error_without_backend_call() {
        let f = fixture(ScriptedBackend::new("mock"), RecordingBridge::new(), OrchestratorConfig::default()).await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("no-such-model", false), CancellationToken::new()),
        )
        .await;

        assert_eq!(collected.terminal_events, 1);
        assert!(collected.chunks.is_empty());
        assert!(matches!(collected.error, Some(PolygateError::ModelNotFound(_))));
        assert_eq!(f.backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_directive_exposes_tools_and_rewrites_model() {
        let f = fixture(
            ScriptedBackend::new("mock").with_round(vec![message_done("hi")]),
            RecordingBridge::new()
                .with_tool("fetch", "get", page("x"))
                .with_tool("time", "now", page("noon")),
            OrchestratorConfig::default(),
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4?mcp=fetch", false), CancellationToken::new()),
        )
        .await;

        assert!(collected.error.is_none());
        let sent = f.backend.requests();
        assert_eq!(sent[0].model, "gpt-4");
        let names: Vec<_> = sent[0].tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, vec!["mcp_fetch_get"]);
    }

    #[tokio::test]
    async fn test_directive_all_exposes_every_server_sorted() {
        let f = fixture(
            ScriptedBackend::new("mock").with_round(vec![message_done("hi")]),
            RecordingBridge::new()
                .with_tool("time", "now", page("noon"))
                .with_tool("fetch", "get", page("x")),
            OrchestratorConfig::default(),
        )
        .await;

        collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4?mcp=all", false), CancellationToken::new()),
        )
        .await;

        let names: Vec<_> = f.backend.requests()[0]
            .tools
            .iter()
            .map(|t| t.function.name.clone())
            .collect();
        assert_eq!(names, vec!["mcp_fetch_get", "mcp_time_now"]);
    }

    #[tokio::test]
    async fn test_servers_whose_names_cannot_round_trip_are_not_exposed() {
        let f = fixture(
            ScriptedBackend::new("mock").with_round(vec![message_done("hi")]),
            RecordingBridge::new()
                .with_tool("web_search", "query", page("x"))
                .with_tool("fetch", "get", page("y")),
            OrchestratorConfig::default(),
        )
        .await;

        collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4?mcp=web_search,fetch", false), CancellationToken::new()),
        )
        .await;

        let names: Vec<_> = f.backend.requests()[0]
            .tools
            .iter()
            .map(|t| t.function.name.clone())
            .collect();
        assert_eq!(names, vec!["mcp_fetch_get"]);
    }

    #[tokio::test]
    async fn test_non_streaming_tool_round() {
        let f = fixture(
            ScriptedBackend::new("mock")
                .with_round(vec![tool_calls_done(vec![ToolCall::function(
                    "call_1",
                    "mcp_fetch_get",
                    r#"{"url":"http://x"}"#,
                )])])
                .with_round(vec![message_done("It is a test page.")]),
            RecordingBridge::new().with_tool("fetch", "get", page("  page body \n")),
            OrchestratorConfig::default(),
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4?mcp=fetch", false), CancellationToken::new()),
        )
        .await;

        assert_eq!(collected.terminal_events, 1);
        assert_eq!(collected.text(), "It is a test page.");

        let calls = f.bridge.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "fetch");
        assert_eq!(calls[0].1, "get");
        assert_eq!(Value::Object(calls[0].2.clone()), json!({"url": "http://x"}));

        let requests = f.backend.requests();
        let second = &requests[1];
        let n = second.messages.len();
        assert_eq!(second.messages[n - 2].role, MessageRole::Assistant);
        assert_eq!(second.messages[n - 2].tool_calls()[0].id, "call_1");
        assert!(second.messages[n - 2].content.is_none());
        assert_eq!(second.messages[n - 1].role, MessageRole::Tool);
        assert_eq!(second.messages[n - 1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(second.messages[n - 1].text(), "page body");
        assert!(!second.stream);
    }

    #[tokio::test]
    async fn test_non_streaming_text_beside_tool_calls_is_kept_in_history() {
        let f = fixture(
            ScriptedBackend::new("mock")
                .with_round(vec![tool_calls_done_with_text(
                    "Checking the page.",
                    vec![ToolCall::function("call_1", "mcp_fetch_get", "{}")],
                )])
                .with_round(vec![message_done("done")]),
            RecordingBridge::new().with_tool("fetch", "get", page("body")),
            OrchestratorConfig::default(),
        )
        .await;

        collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4", false), CancellationToken::new()),
        )
        .await;

        let requests = f.backend.requests();
        let assistant = requests[1]
            .messages
            .iter()
            .find(|m| m.role == MessageRole::Assistant)
            .unwrap();
        assert_eq!(assistant.text(), "Checking the page.");
        assert_eq!(assistant.tool_calls()[0].id, "call_1");
    }

    #[tokio::test]
    async fn test_streaming_rounds_forward_content_and_single_terminal() {
        let f = fixture(
            ScriptedBackend::new("mock")
                .with_round(vec![
                    text_chunk("Let me look. "),
                    fragment_chunk(0, "call_1", "mcp_fetch_get", "{\"url\":"),
                    fragment_chunk(0, "", "", "\"http://x\"}"),
                    finish_chunk(FinishReason::ToolCalls),
                    StreamEvent::Done(None),
                ])
                .with_round(vec![
                    text_chunk("Found "),
                    text_chunk("it."),
                    finish_chunk(FinishReason::Stop),
                    StreamEvent::Done(None),
                ]),
            RecordingBridge::new().with_tool("fetch", "get", page("body")),
            OrchestratorConfig::default(),
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4?mcp=fetch", true), CancellationToken::new()),
        )
        .await;

        assert_eq!(collected.terminal_events, 1);
        assert!(collected.error.is_none());
        assert_eq!(collected.chunks.len(), 4);
        assert_eq!(collected.text(), "Let me look. Found it.");
        assert!(collected.chunks.iter().all(|c| c.delta_tool_calls().is_empty()));

        let calls = f.bridge.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(Value::Object(calls[0].2.clone()), json!({"url": "http://x"}));

        let requests = f.backend.requests();
        let second = &requests[1];
        assert!(second.stream);
        assert_eq!(second.messages.last().unwrap().tool_call_id.as_deref(), Some("call_1"));
        let assistant = &second.messages[second.messages.len() - 2];
        assert_eq!(assistant.text(), "Let me look. ");
        assert_eq!(assistant.tool_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_every_failed_call_still_gets_a_reply() {
        let f = fixture(
            ScriptedBackend::new("mock")
                .with_round(vec![tool_calls_done(vec![
                    ToolCall::function("call_1", "mcp_fetch_missing", "{}"),
                    ToolCall::function("call_2", "not_a_bridged_tool", "{}"),
                    ToolCall::function("call_3", "mcp_fetch_get", "[1, 2]"),
                    ToolCall::function("call_4", "mcp_fetch_empty", "{}"),
                    ToolCall::function("call_5", "mcp_fetch_get", ""),
                ])])
                .with_round(vec![message_done("sorry")]),
            RecordingBridge::new()
                .with_tool("fetch", "get", page("ok"))
                .with_tool("fetch", "empty", ToolOutcome::Content(vec![])),
            OrchestratorConfig {
                parallel_tool_calls: false,
                ..Default::default()
            },
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4", false), CancellationToken::new()),
        )
        .await;
        assert!(collected.error.is_none());

        let requests = f.backend.requests();
        let second = &requests[1];
        let replies: Vec<_> = second
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| (m.tool_call_id.clone().unwrap(), m.text()))
            .collect();

        assert_eq!(replies.len(), 5);
        let ids: Vec<_> = replies.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3", "call_4", "call_5"]);
        for (_, text) in &replies[..4] {
            assert!(text.starts_with("error: "), "unexpected reply {}", text);
        }
        assert_eq!(replies[4].1, "ok");
    }

    #[tokio::test]
    async fn test_parallel_replies_keep_call_order() {
        let f = fixture(
            ScriptedBackend::new("mock")
                .with_round(vec![tool_calls_done(vec![
                    ToolCall::function("call_a", "mcp_time_now", "{}"),
                    ToolCall::function("call_b", "mcp_fetch_get", "{}"),
                ])])
                .with_round(vec![message_done("done")]),
            RecordingBridge::new()
                .with_tool("fetch", "get", page("page"))
                .with_tool("time", "now", page("noon")),
            OrchestratorConfig::default(),
        )
        .await;

        collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4", false), CancellationToken::new()),
        )
        .await;

        let requests = f.backend.requests();
        let second = &requests[1];
        let replies: Vec<_> = second
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| m.text())
            .collect();
        assert_eq!(replies, vec!["noon", "page"]);
    }

    #[tokio::test]
    async fn test_tool_loop_limit() {
        let looping = || {
            tool_calls_done(vec![ToolCall::function("call", "mcp_time_now", "{}")])
        };
        let f = fixture(
            ScriptedBackend::new("mock")
                .with_round(vec![looping()])
                .with_round(vec![looping()])
                .with_round(vec![message_done("never reached")]),
            RecordingBridge::new().with_tool("time", "now", page("noon")),
            OrchestratorConfig {
                max_tool_rounds: 1,
                ..Default::default()
            },
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4", false), CancellationToken::new()),
        )
        .await;

        assert_eq!(collected.terminal_events, 1);
        assert!(matches!(collected.error, Some(PolygateError::ToolLoopExceeded(1))));
        assert_eq!(f.bridge.calls().len(), 1);
        assert_eq!(f.backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream_with_single_error() {
        let f = fixture(
            ScriptedBackend::new("mock").with_hanging_round(vec![
                text_chunk("partial"),
                fragment_chunk(0, "call_1", "mcp_fetch_get", "{"),
            ]),
            RecordingBridge::new(),
            OrchestratorConfig::default(),
        )
        .await;
        let cancel = CancellationToken::new();

        let mut stream = f
            .orchestrator
            .chat_completion(request("mock/gpt-4", true), cancel.clone());

        assert!(matches!(stream.next().await, Some(StreamEvent::Chunk(_))));
        cancel.cancel();
        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Error(PolygateError::Cancelled))
        ));
        assert!(stream.next().await.is_none());
        assert!(f.bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_discards_partial_tool_calls() {
        let f = fixture(
            ScriptedBackend::new("mock").with_round(vec![
                fragment_chunk(0, "call_1", "mcp_fetch_get", "{"),
                StreamEvent::Error(PolygateError::RequestFailed {
                    status: 502,
                    body: "bad gateway".to_string(),
                }),
            ]),
            RecordingBridge::new().with_tool("fetch", "get", page("x")),
            OrchestratorConfig::default(),
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4", true), CancellationToken::new()),
        )
        .await;

        assert_eq!(collected.terminal_events, 1);
        assert!(collected.chunks.is_empty());
        assert!(matches!(
            collected.error,
            Some(PolygateError::RequestFailed { status: 502, .. })
        ));
        assert!(f.bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_stream_without_terminal_event() {
        let f = fixture(
            ScriptedBackend::new("mock").with_round(vec![text_chunk("cut")]),
            RecordingBridge::new(),
            OrchestratorConfig::default(),
        )
        .await;

        let collected = collect_events(
            f.orchestrator
                .chat_completion(request("mock/gpt-4", true), CancellationToken::new()),
        )
        .await;

        assert_eq!(collected.chunks.len(), 1);
        assert_eq!(collected.terminal_events, 1);
        assert!(matches!(collected.error, Some(PolygateError::Stream(_))));
    }

    #[tokio::test]
    async fn test_callback_receives_one_terminal_event() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ProviderRegistry::new(Arc::new(ModelCache::new(dir.path(), DEFAULT_CACHE_TTL))));
        let backend = Arc::new(
            ScriptedBackend::new("mock").with_round(vec![text_chunk("a"), text_chunk("b"), StreamEvent::Done(None)]),
        );
        registry
            .register_with_backend(
                Provider::new("mock", "http://localhost").with_models(vec![Model::new("m")]),
                backend,
            )
            .await
            .unwrap();
        let orchestrator = CompletionOrchestrator::new(registry, Arc::new(NoTools), OrchestratorConfig::default());

        let mut events = Vec::new();
        orchestrator
            .chat_completion_with(request("m", true), CancellationToken::new(), |event| events.push(event))
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn test_parse_arguments() {
        assert!(parse_arguments("  ").unwrap().is_empty());
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap()["a"], 1);
        assert!(matches!(parse_arguments("[1]"), Err(PolygateError::Tool(_))));
        assert!(matches!(parse_arguments("{oops"), Err(PolygateError::Serialization(_))));
    }
}

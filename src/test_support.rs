//! Scripted backends and tool bridges shared by unit tests.

use crate::error::{PolygateError, Result};
use crate::llm::backend::ChatBackend;
use crate::llm::envelope::{EventStream, StreamEvent};
use crate::llm::models::{
    ChatCompletionDelta, ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse, Choice,
    FinishReason, FunctionCall, Model, ToolCall,
};
use crate::mcp::{ContentBlock, ToolBridge, ToolSpec};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Events one backend round produces
pub enum Round {
    Events(Vec<StreamEvent>),
    /// Emit the events, then never finish
    EventsThenHang(Vec<StreamEvent>),
}

/// Backend that replays scripted rounds and records every request it receives.
pub struct ScriptedBackend {
    name: String,
    models: Vec<Model>,
    fail_listing: bool,
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    list_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            models: Vec::new(),
            fail_listing: false,
            rounds: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids.iter().map(|id| Model::new(*id)).collect();
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn with_round(self, events: Vec<StreamEvent>) -> Self {
        self.rounds.lock().unwrap().push_back(Round::Events(events));
        self
    }

    pub fn with_hanging_round(self, events: Vec<StreamEvent>) -> Self {
        self.rounds.lock().unwrap().push_back(Round::EventsThenHang(events));
        self
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(PolygateError::RequestFailed {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self.models.clone())
    }

    fn chat_completion(&self, request: ChatCompletionRequest) -> EventStream<'_> {
        self.requests.lock().unwrap().push(request);
        let round = self.rounds.lock().unwrap().pop_front();
        match round {
            Some(Round::Events(events)) => Box::pin(stream::iter(events)),
            Some(Round::EventsThenHang(events)) => Box::pin(stream::iter(events).chain(stream::pending())),
            None => Box::pin(stream::iter(vec![StreamEvent::Error(PolygateError::Stream(
                "no scripted round left".to_string(),
            ))])),
        }
    }
}

pub fn text_chunk(text: &str) -> StreamEvent {
    StreamEvent::Chunk(ChatCompletionResponse {
        choices: vec![Choice {
            delta: Some(ChatCompletionDelta {
                content: Some(text.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    })
}

pub fn fragment_chunk(index: usize, id: &str, name: &str, arguments: &str) -> StreamEvent {
    StreamEvent::Chunk(ChatCompletionResponse {
        choices: vec![Choice {
            delta: Some(ChatCompletionDelta {
                tool_calls: Some(vec![ToolCall {
                    index: Some(index),
                    id: id.to_string(),
                    r#type: if id.is_empty() { String::new() } else { "function".to_string() },
                    function: FunctionCall {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    })
}

pub fn finish_chunk(reason: FinishReason) -> StreamEvent {
    StreamEvent::Chunk(ChatCompletionResponse {
        choices: vec![Choice {
            delta: Some(ChatCompletionDelta::default()),
            finish_reason: Some(reason),
            ..Default::default()
        }],
        ..Default::default()
    })
}

pub fn message_done(text: &str) -> StreamEvent {
    StreamEvent::Done(Some(ChatCompletionResponse {
        choices: vec![Choice {
            message: Some(ChatCompletionMessage::assistant(text)),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }],
        ..Default::default()
    }))
}

pub fn tool_calls_done(calls: Vec<ToolCall>) -> StreamEvent {
    tool_calls_done_with_text("", calls)
}

pub fn tool_calls_done_with_text(text: &str, calls: Vec<ToolCall>) -> StreamEvent {
    StreamEvent::Done(Some(ChatCompletionResponse {
        choices: vec![Choice {
            message: Some(ChatCompletionMessage::assistant_tool_calls(calls).with_text(text)),
            finish_reason: Some(FinishReason::ToolCalls),
            ..Default::default()
        }],
        ..Default::default()
    }))
}

/// Result a [`RecordingBridge`] returns for one tool
#[derive(Clone)]
pub enum ToolOutcome {
    Content(Vec<ContentBlock>),
    Fail(String),
}

/// Tool bridge with fixed tool lists that records every call.
#[derive(Default)]
pub struct RecordingBridge {
    servers: BTreeMap<String, Vec<ToolSpec>>,
    outcomes: HashMap<(String, String), ToolOutcome>,
    calls: Mutex<Vec<(String, String, Map<String, Value>)>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, server: &str, tool: &str, outcome: ToolOutcome) -> Self {
        self.servers.entry(server.to_string()).or_default().push(ToolSpec {
            name: tool.to_string(),
            description: Some(format!("{} tool", tool)),
            input_schema: json!({"type": "object"}),
        });
        self.outcomes.insert((server.to_string(), tool.to_string()), outcome);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolBridge for RecordingBridge {
    fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>> {
        self.servers
            .get(server)
            .cloned()
            .ok_or_else(|| PolygateError::Tool(format!("unknown MCP server: {}", server)))
    }

    async fn call_tool(&self, server: &str, tool: &str, arguments: Map<String, Value>) -> Result<Vec<ContentBlock>> {
        self.calls
            .lock()
            .unwrap()
            .push((server.to_string(), tool.to_string(), arguments));
        match self.outcomes.get(&(server.to_string(), tool.to_string())) {
            Some(ToolOutcome::Content(blocks)) => Ok(blocks.clone()),
            Some(ToolOutcome::Fail(message)) => Err(PolygateError::Tool(message.clone())),
            None => Err(PolygateError::Tool(format!("unknown tool {} on {}", tool, server))),
        }
    }
}

//! High-level gateway handle.
//!
//! [`Polygate`] wires a [`ProviderRegistry`], its model cache, the MCP servers and a
//! [`CompletionOrchestrator`] together. Most applications build one from a [`GatewayConfig`]
//! and call [`Polygate::chat_completion`] or the text helpers.

use crate::config::GatewayConfig;
use crate::error::{PolygateError, Result};
use crate::llm::cache::ModelCache;
use crate::llm::envelope::{collect_events, EventStream, StreamEvent};
use crate::llm::models::{ChatCompletionMessage, ChatCompletionRequest, Model};
use crate::llm::orchestrator::{CompletionOrchestrator, OrchestratorConfig};
use crate::llm::registry::{ProviderRegistry, RegistrationReport};
use crate::mcp::{McpHub, ToolBridge};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stream of text pieces produced by [`Polygate::stream_text`]
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// What happened while starting a gateway from configuration.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub registration: RegistrationReport,
    /// MCP servers that could not be started
    pub mcp_failures: Vec<(String, PolygateError)>,
}

pub struct Polygate {
    registry: Arc<ProviderRegistry>,
    hub: Option<Arc<McpHub>>,
    orchestrator: CompletionOrchestrator,
}

impl Polygate {
    /// Assemble a gateway from parts that are already set up.
    pub fn new(registry: Arc<ProviderRegistry>, tools: Arc<dyn ToolBridge>, config: OrchestratorConfig) -> Self {
        Self {
            orchestrator: CompletionOrchestrator::new(registry.clone(), tools, config),
            registry,
            hub: None,
        }
    }

    /// Start the configured MCP servers and register every provider that has credentials.
    ///
    /// Neither failing servers nor failing providers abort startup; both are logged and
    /// listed in the returned report.
    pub async fn from_config(config: &GatewayConfig) -> (Self, StartupReport) {
        let cache = Arc::new(ModelCache::new(config.cache_dir(), config.cache_ttl()));
        let registry = Arc::new(ProviderRegistry::new(cache));

        let (hub, mcp_failures) = McpHub::connect(&config.mcp_servers).await;
        let hub = Arc::new(hub);

        let registration = registry
            .register_all(config.all_providers(), config.registration_concurrency)
            .await;

        info!(
            providers = registration.registered.len(),
            mcp_servers = hub.server_names().len(),
            "Gateway ready"
        );

        let gateway = Self {
            orchestrator: CompletionOrchestrator::new(registry.clone(), hub.clone(), config.orchestrator_config()),
            registry,
            hub: Some(hub),
        };
        let report = StartupReport {
            registration,
            mcp_failures,
        };
        (gateway, report)
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &CompletionOrchestrator {
        &self.orchestrator
    }

    pub async fn list_models(&self) -> Vec<Model> {
        self.registry.list_models().await
    }

    pub fn chat_completion(&self, request: ChatCompletionRequest, cancel: CancellationToken) -> EventStream<'static> {
        self.orchestrator.chat_completion(request, cancel)
    }

    /// Send one user prompt without streaming and return the final answer text.
    pub async fn generate_text(&self, model: &str, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest::new(model, vec![ChatCompletionMessage::user(prompt)]);
        let collected = collect_events(self.chat_completion(request, CancellationToken::new()))
            .await
            .into_result()?;
        Ok(collected.text())
    }

    /// Send one user prompt with streaming and yield the text as it arrives.
    ///
    /// A failure ends the stream with an `Err` item.
    pub fn stream_text(&self, model: &str, prompt: &str) -> TextStream {
        let request =
            ChatCompletionRequest::new(model, vec![ChatCompletionMessage::user(prompt)]).with_stream(true);
        let mut events = self.chat_completion(request, CancellationToken::new());

        Box::pin(async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Chunk(chunk) => {
                        let text = chunk.content();
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    StreamEvent::Done(_) => break,
                    StreamEvent::Error(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    /// Stop the MCP servers started by [`from_config`](Self::from_config).
    pub async fn shutdown(&self) {
        if let Some(hub) = &self.hub {
            hub.shutdown().await;
        }
    }
}

//! Backend for OpenAI-compatible chat-completion APIs.
//!
//! Nearly every hosted provider (DeepSeek, Qwen, Gemini, OpenRouter, Groq, ...) speaks this
//! protocol, so one adapter covers all built-in providers.

use crate::error::{PolygateError, Result};
use crate::llm::backend::ChatBackend;
use crate::llm::backends::sse::{SseDecoder, SseLine};
use crate::llm::envelope::{EventStream, StreamEvent};
use crate::llm::models::{ChatCompletionRequest, ChatCompletionResponse, Model};
use crate::llm::provider::Provider;
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    /// Prepended to every model id returned by the live listing
    pub model_prefix: String,
    pub timeout: Option<Duration>,
    pub extra_headers: BTreeMap<String, String>,
}

impl OpenAICompatibleConfig {
    pub fn from_provider(provider: &Provider) -> Self {
        Self {
            name: provider.name.clone(),
            base_url: provider.base_url.clone(),
            api_key: provider.api_key.clone(),
            model_prefix: provider.model_prefix.clone(),
            timeout: Some(provider.timeout()),
            extra_headers: provider.extra_headers.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<Model>,
}

/// [`ChatBackend`] speaking the OpenAI `/models` and `/chat/completions` protocol.
pub struct OpenAICompatibleBackend {
    client: Client,
    config: OpenAICompatibleConfig,
}

impl OpenAICompatibleBackend {
    pub fn new(config: OpenAICompatibleConfig) -> Result<Self> {
        let mut client_builder = Client::builder();

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;

        Ok(Self { client, config })
    }

    pub fn from_provider(provider: &Provider) -> Result<Self> {
        Self::new(OpenAICompatibleConfig::from_provider(provider))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, mut builder: RequestBuilder) -> RequestBuilder {
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn prefixed(&self, mut model: Model) -> Model {
        if !self.config.model_prefix.is_empty() {
            model.id = format!("{}{}", self.config.model_prefix, model.id);
        }
        if model.name.is_none() {
            model.name = Some(model.id.clone());
        }
        if model.owned_by.is_empty() {
            model.owned_by = self.config.name.clone();
        }
        model
    }
}

async fn failure(response: reqwest::Response) -> PolygateError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    PolygateError::RequestFailed { status, body }
}

#[async_trait]
impl ChatBackend for OpenAICompatibleBackend {
    fn provider_name(&self) -> &str {
        &self.config.name
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        info!(provider = %self.config.name, "Fetching available models");

        let response = self.authorize(self.client.get(self.url("models"))).send().await?;

        if !response.status().is_success() {
            return Err(failure(response).await);
        }

        let list: ModelList = response.json().await?;
        let models: Vec<Model> = list.data.into_iter().map(|m| self.prefixed(m)).collect();

        debug!(provider = %self.config.name, count = models.len(), "Models fetched");
        Ok(models)
    }

    fn chat_completion(&self, request: ChatCompletionRequest) -> EventStream<'_> {
        Box::pin(async_stream::stream! {
            debug!(
                provider = %self.config.name,
                model = %request.model,
                messages = request.messages.len(),
                tools = request.tools.len(),
                stream = request.stream,
                "Sending chat completion"
            );

            let mut builder = self
                .authorize(self.client.post(self.url("chat/completions")))
                .header("Content-Type", "application/json")
                .json(&request);
            if request.stream {
                builder = builder.header("Accept", "text/event-stream");
            }
            for (name, value) in &request.extra_headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamEvent::Error(e.into());
                    return;
                }
            };

            if !response.status().is_success() {
                let err = failure(response).await;
                warn!(provider = %self.config.name, error = %err, "Chat completion rejected");
                yield StreamEvent::Error(err);
                return;
            }

            if !request.stream {
                match response.json::<ChatCompletionResponse>().await {
                    Ok(body) => yield StreamEvent::Done(Some(body)),
                    Err(e) => yield StreamEvent::Error(e.into()),
                }
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield StreamEvent::Error(e.into());
                        return;
                    }
                };

                for line in decoder.push(&chunk) {
                    match line {
                        SseLine::Done => {
                            yield StreamEvent::Done(None);
                            return;
                        }
                        SseLine::Data(data) => match serde_json::from_str::<ChatCompletionResponse>(&data) {
                            Ok(parsed) if parsed.choices.is_empty() => continue,
                            Ok(parsed) => yield StreamEvent::Chunk(parsed),
                            Err(e) => {
                                warn!(provider = %self.config.name, error = %e, "Failed to parse streaming chunk");
                                yield StreamEvent::Error(e.into());
                                return;
                            }
                        },
                    }
                }
            }

            match decoder.finish() {
                Some(SseLine::Done) => yield StreamEvent::Done(None),
                _ => {
                    yield StreamEvent::Error(PolygateError::Stream(
                        "stream ended before [DONE]".to_string(),
                    ));
                }
            }
        })
    }
}

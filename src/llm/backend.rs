use crate::error::Result;
use crate::llm::envelope::EventStream;
use crate::llm::models::{ChatCompletionRequest, Model};
use async_trait::async_trait;

/// Abstract interface for a concrete chat-completion provider.
///
/// Implementations translate one provider's wire protocol into the streaming envelope:
/// a non-streaming request yields a single `Done(Some(response))`, a streaming request
/// yields one `Chunk` per delta followed by `Done(None)`. Transport or decoding failures
/// end the stream with one `Error` event. Tool-call fragments are passed through as-is;
/// reassembly is the orchestrator's job.
///
/// Dropping the returned stream must abort the in-flight request.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Provider identity, also used as the model cache key
    fn provider_name(&self) -> &str;

    /// Live list of models offered by the provider
    async fn list_models(&self) -> Result<Vec<Model>>;

    /// Run one chat-completion round
    fn chat_completion(&self, request: ChatCompletionRequest) -> EventStream<'_>;
}

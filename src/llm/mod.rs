pub mod assembler;
pub mod backend;
pub mod backends;
pub mod cache;
pub mod directive;
pub mod envelope;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod registry;

pub use backend::ChatBackend;
pub use backends::{OpenAICompatibleBackend, OpenAICompatibleConfig};
pub use cache::{ModelCache, ModelCacheEntry, DEFAULT_CACHE_TTL};
pub use directive::ToolDirective;
pub use envelope::{collect_events, CollectedStream, EventStream, StreamEvent};
pub use models::{
    ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse, FinishReason, MessageRole, Model, ToolCall,
    ToolDefinition,
};
pub use orchestrator::{CompletionOrchestrator, OrchestratorConfig};
pub use provider::{builtin_providers, Provider};
pub use registry::{ProviderRegistry, RegistrationReport, Resolution};

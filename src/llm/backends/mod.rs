//! Concrete [`ChatBackend`](crate::llm::ChatBackend) implementations.

pub mod openai_compatible;
pub mod sse;

pub use openai_compatible::{OpenAICompatibleBackend, OpenAICompatibleConfig};

//! Streaming envelope shared by backends and the orchestrator.
//!
//! A well-formed event stream carries zero or more [`StreamEvent::Chunk`] events followed by
//! exactly one terminal event, either [`StreamEvent::Done`] or [`StreamEvent::Error`]. Nothing
//! follows the terminal event.

use crate::error::PolygateError;
use crate::llm::models::ChatCompletionResponse;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

/// One event of a chat-completion stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// A non-terminal partial response (streamed delta)
    Chunk(ChatCompletionResponse),
    /// Successful completion. Non-streaming backends carry the full response here.
    Done(Option<ChatCompletionResponse>),
    /// Fatal failure for the whole request
    Error(PolygateError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }

    pub fn response(&self) -> Option<&ChatCompletionResponse> {
        match self {
            StreamEvent::Chunk(response) => Some(response),
            StreamEvent::Done(response) => response.as_ref(),
            StreamEvent::Error(_) => None,
        }
    }
}

/// Boxed stream of envelope events
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'a>>;

/// Outcome of draining an event stream to completion.
#[derive(Debug, Default)]
pub struct CollectedStream {
    /// Every non-terminal chunk, in arrival order
    pub chunks: Vec<ChatCompletionResponse>,
    /// Response carried by the terminal `Done`, if any
    pub response: Option<ChatCompletionResponse>,
    /// Number of terminal events observed
    pub terminal_events: usize,
    pub error: Option<PolygateError>,
}

impl CollectedStream {
    /// Concatenated text of streamed chunks, or of the final response when nothing streamed
    pub fn text(&self) -> String {
        if self.chunks.is_empty() {
            return self.response.as_ref().map(ChatCompletionResponse::content).unwrap_or_default();
        }
        self.chunks.iter().map(ChatCompletionResponse::content).collect()
    }

    pub fn into_result(self) -> crate::Result<Self> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(CollectedStream { error: None, ..self }),
        }
    }
}

/// Drain `stream`, keeping every event.
pub async fn collect_events(mut stream: EventStream<'_>) -> CollectedStream {
    let mut collected = CollectedStream::default();

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Chunk(chunk) => collected.chunks.push(chunk),
            StreamEvent::Done(response) => {
                collected.terminal_events += 1;
                collected.response = response;
            }
            StreamEvent::Error(err) => {
                collected.terminal_events += 1;
                collected.error = Some(err);
            }
        }
    }

    collected
}

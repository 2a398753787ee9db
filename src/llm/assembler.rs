//! Reassembly of streamed tool-call fragments.
//!
//! Backends stream a tool call as a series of fragments sharing an index: the first carries
//! the call id and function name, the rest only append to the argument string.

use crate::llm::models::{ChatCompletionResponse, FinishReason, ToolCall};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Accumulates the tool calls of one streamed round.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<usize, ToolCall>,
    finished_with_tool_calls: bool,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether the round's finish reason asked for tool invocation
    pub fn finished_with_tool_calls(&self) -> bool {
        self.finished_with_tool_calls
    }

    /// Take in one streamed chunk.
    ///
    /// Returns the chunk to forward to the caller, or `None` when it only carried tool-call
    /// fragments or the round's `tool_calls` finish signal. Text that arrives alongside
    /// fragments is forwarded with the fragments stripped.
    pub fn absorb(&mut self, mut chunk: ChatCompletionResponse) -> Option<ChatCompletionResponse> {
        let fragments = chunk.delta_tool_calls().to_vec();
        let tool_finish = matches!(chunk.finish_reason(), Some(FinishReason::ToolCalls));

        if fragments.is_empty() && !(tool_finish && !self.calls.is_empty()) {
            return Some(chunk);
        }

        for (position, fragment) in fragments.into_iter().enumerate() {
            self.merge(position, fragment);
        }

        if tool_finish {
            self.finished_with_tool_calls = true;
        }

        let has_text = chunk
            .choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
            .is_some_and(|text| !text.is_empty());
        if !has_text {
            return None;
        }

        if let Some(delta) = chunk.choices.first_mut().and_then(|c| c.delta.as_mut()) {
            delta.tool_calls = None;
        }
        if let Some(choice) = chunk.choices.first_mut() {
            if tool_finish {
                choice.finish_reason = None;
            }
        }
        Some(chunk)
    }

    fn merge(&mut self, position: usize, fragment: ToolCall) {
        let index = fragment.index.unwrap_or(position);

        if let Some(existing) = self.calls.get_mut(&index) {
            existing.function.arguments.push_str(&fragment.function.arguments);
            if existing.id.is_empty() && !fragment.id.is_empty() {
                existing.id = fragment.id;
            }
            if existing.function.name.is_empty() && !fragment.function.name.is_empty() {
                existing.function.name = fragment.function.name;
            }
            return;
        }

        if !self.calls.is_empty() && fragment.function.name.is_empty() {
            warn!(index, "Dropping tool-call fragment for an index that was never opened");
            return;
        }

        debug!(index, id = %fragment.id, name = %fragment.function.name, "Tool call opened");
        self.calls.insert(index, fragment);
    }

    /// Complete calls in index order, leaving the assembler empty for the next round.
    pub fn finish(&mut self) -> Vec<ToolCall> {
        self.finished_with_tool_calls = false;
        std::mem::take(&mut self.calls)
            .into_iter()
            .map(|(index, mut call)| {
                call.index = None;
                if call.r#type.is_empty() {
                    call.r#type = "function".to_string();
                }
                if call.id.is_empty() {
                    call.id = format!("call_{}", index);
                }
                call
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::{ChatCompletionDelta, Choice, FunctionCall};

    fn fragment(index: Option<usize>, id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            index,
            id: id.to_string(),
            r#type: String::new(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn chunk(
        content: Option<&str>,
        tool_calls: Vec<ToolCall>,
        finish_reason: Option<FinishReason>,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            choices: vec![Choice {
                index: 0,
                message: None,
                delta: Some(ChatCompletionDelta {
                    content: content.map(str::to_string),
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    ..Default::default()
                }),
                finish_reason,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_arguments_concatenate_across_fragments() {
        let mut assembler = ToolCallAssembler::new();

        assert!(assembler
            .absorb(chunk(None, vec![fragment(Some(0), "call_1", "mcp_fetch_get", "{\"a\":")], None))
            .is_none());
        assert!(assembler.absorb(chunk(None, vec![fragment(Some(0), "", "", "1}")], None)).is_none());
        assert!(assembler.absorb(chunk(None, vec![], Some(FinishReason::ToolCalls))).is_none());

        assert!(assembler.finished_with_tool_calls());
        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "mcp_fetch_get");
        assert_eq!(calls[0].function.arguments, "{\"a\":1}");
        assert_eq!(calls[0].index, None);
        assert_eq!(calls[0].r#type, "function");
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_later_fragments_never_change_id_or_name() {
        let mut assembler = ToolCallAssembler::new();
        assembler.absorb(chunk(None, vec![fragment(Some(0), "call_1", "mcp_fetch_get", "{")], None));
        assembler.absorb(chunk(None, vec![fragment(Some(0), "call_2", "mcp_other_x", "}")], None));

        let calls = assembler.finish();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "mcp_fetch_get");
        assert_eq!(calls[0].function.arguments, "{}");
    }

    #[test]
    fn test_nameless_fragment_cannot_open_new_index() {
        let mut assembler = ToolCallAssembler::new();
        assembler.absorb(chunk(None, vec![fragment(Some(0), "call_1", "mcp_fetch_get", "{}")], None));
        assembler.absorb(chunk(None, vec![fragment(Some(3), "", "", "garbage")], None));

        assert_eq!(assembler.len(), 1);
    }

    #[test]
    fn test_parallel_calls_in_index_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.absorb(chunk(None, vec![fragment(Some(0), "call_a", "mcp_fetch_get", "{\"u\":")], None));
        assembler.absorb(chunk(None, vec![fragment(Some(1), "call_b", "mcp_time_now", "{}")], None));
        assembler.absorb(chunk(None, vec![fragment(Some(0), "", "", "1}")], None));

        let calls = assembler.finish();
        assert_eq!(calls.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["call_a", "call_b"]);
        assert_eq!(calls[0].function.arguments, "{\"u\":1}");
    }

    #[test]
    fn test_missing_index_defaults_to_position() {
        let mut assembler = ToolCallAssembler::new();
        assembler.absorb(chunk(
            None,
            vec![fragment(None, "", "mcp_a_x", "{}"), fragment(None, "", "mcp_b_y", "{}")],
            None,
        ));

        let calls = assembler.finish();
        assert_eq!(calls.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["call_0", "call_1"]);
    }

    #[test]
    fn test_plain_content_is_forwarded_untouched() {
        let mut assembler = ToolCallAssembler::new();
        let original = chunk(Some("Hello"), vec![], None);

        assert_eq!(assembler.absorb(original.clone()), Some(original));
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_stop_finish_is_forwarded() {
        let mut assembler = ToolCallAssembler::new();
        let last = chunk(Some(""), vec![], Some(FinishReason::Stop));

        assert!(assembler.absorb(last).is_some());
    }

    #[test]
    fn test_tool_finish_without_calls_is_forwarded() {
        let mut assembler = ToolCallAssembler::new();
        assert!(assembler.absorb(chunk(None, vec![], Some(FinishReason::ToolCalls))).is_some());
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_text_alongside_fragments_is_forwarded_without_them() {
        let mut assembler = ToolCallAssembler::new();
        let forwarded = assembler
            .absorb(chunk(
                Some("Let me check."),
                vec![fragment(Some(0), "call_1", "mcp_fetch_get", "{}")],
                None,
            ))
            .unwrap();

        assert_eq!(forwarded.content(), "Let me check.");
        assert!(forwarded.delta_tool_calls().is_empty());
        assert_eq!(assembler.len(), 1);
    }
}

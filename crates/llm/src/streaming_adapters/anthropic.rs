//! Anthropic Messages API Adapter
//!
//! Handles the SSE format from the Messages API with content_block_delta parsing.

use dockside_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

/// Internal event types from the Messages API SSE format
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Adapter for the Anthropic SSE format
#[derive(Debug, Default)]
pub struct AnthropicAdapter {
    current_tool_id: Option<String>,
    current_tool_name: Option<String>,
    tool_input_buffer: String,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamAdapter for AnthropicAdapter {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();

        let json_str = if let Some(rest) = trimmed.strip_prefix("data:") {
            rest.trim_start()
        } else if trimmed.starts_with('{') {
            trimmed
        } else {
            return Ok(vec![]);
        };

        if json_str.is_empty() || json_str == "[DONE]" {
            return Ok(vec![]);
        }

        let event: AnthropicEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let events = match event {
            AnthropicEvent::MessageStart { message } => match message.usage {
                Some(usage) => vec![UnifiedStreamEvent::Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_read_tokens: usage.cache_read_input_tokens,
                }],
                None => vec![],
            },
            AnthropicEvent::ContentBlockStart { content_block } => match content_block {
                ContentBlock::ToolUse { id, name } => {
                    self.current_tool_id = Some(id.clone());
                    self.current_tool_name = Some(name.clone());
                    self.tool_input_buffer.clear();
                    vec![UnifiedStreamEvent::ToolStart {
                        tool_id: id,
                        tool_name: name,
                        arguments: None,
                    }]
                }
                ContentBlock::Other => vec![],
            },
            AnthropicEvent::ContentBlockDelta { delta } => match delta {
                Delta::TextDelta { text } => vec![UnifiedStreamEvent::TextDelta { content: text }],
                Delta::InputJsonDelta { partial_json } => {
                    self.tool_input_buffer.push_str(&partial_json);
                    vec![]
                }
                Delta::Other => vec![],
            },
            AnthropicEvent::ContentBlockStop { .. } => {
                match (self.current_tool_id.take(), self.current_tool_name.take()) {
                    (Some(id), Some(name)) => vec![UnifiedStreamEvent::ToolComplete {
                        tool_id: id,
                        tool_name: name,
                        arguments: std::mem::take(&mut self.tool_input_buffer),
                    }],
                    _ => vec![],
                }
            }
            AnthropicEvent::MessageDelta { delta, usage } => {
                let mut events = vec![];
                if let Some(u) = usage {
                    events.push(UnifiedStreamEvent::Usage {
                        input_tokens: 0,
                        output_tokens: u.output_tokens,
                        cache_read_tokens: None,
                    });
                }
                if delta.stop_reason.is_some() {
                    events.push(UnifiedStreamEvent::Complete {
                        stop_reason: delta.stop_reason,
                    });
                }
                events
            }
            AnthropicEvent::MessageStop => vec![],
            AnthropicEvent::Error { error } => vec![UnifiedStreamEvent::Error {
                message: error.message,
                code: error.error_type,
            }],
            AnthropicEvent::Ping | AnthropicEvent::Unknown => vec![],
        };

        Ok(events)
    }

    fn reset(&mut self) {
        self.current_tool_id = None;
        self.current_tool_name = None;
        self.tool_input_buffer.clear();
    }
}

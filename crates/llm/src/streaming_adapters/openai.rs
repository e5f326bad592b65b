//! OpenAI API Adapter
//!
//! Handles the chat-completions SSE format. Parallel tool calls arrive
//! interleaved and are keyed by their `index`.

use std::collections::BTreeMap;

use dockside_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct OpenAIEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Default)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

/// Adapter for OpenAI API SSE format
#[derive(Debug, Default)]
pub struct OpenAIAdapter {
    pending: BTreeMap<usize, PendingTool>,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit ToolComplete for every accumulated call, in index order.
    fn flush_pending_tools(&mut self) -> Vec<UnifiedStreamEvent> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|t| !t.name.is_empty())
            .map(|t| UnifiedStreamEvent::ToolComplete {
                tool_id: t.id,
                tool_name: t.name,
                arguments: t.arguments,
            })
            .collect()
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();

        let json_str = if let Some(rest) = trimmed.strip_prefix("data:") {
            rest.trim_start()
        } else if trimmed.starts_with('{') {
            trimmed
        } else {
            // event:, id:, retry: and comment lines carry nothing for us
            return Ok(vec![]);
        };

        if json_str.is_empty() || json_str == "[DONE]" {
            return Ok(self.flush_pending_tools());
        }

        let event: OpenAIEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let mut events = vec![];

        if let Some(error) = event.error {
            events.push(UnifiedStreamEvent::Error {
                message: error.message,
                code: error.code,
            });
            return Ok(events);
        }

        if let Some(usage) = event.usage {
            events.push(UnifiedStreamEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cache_read_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
            });
        }

        for choice in event.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        events.push(UnifiedStreamEvent::TextDelta { content });
                    }
                }

                for tc in delta.tool_calls.unwrap_or_default() {
                    let pending = self.pending.entry(tc.index).or_default();
                    if let Some(id) = tc.id {
                        pending.id = id;
                    }
                    if let Some(func) = tc.function {
                        if let Some(name) = func.name {
                            pending.name = name;
                            events.push(UnifiedStreamEvent::ToolStart {
                                tool_id: pending.id.clone(),
                                tool_name: pending.name.clone(),
                                arguments: None,
                            });
                        }
                        if let Some(args) = func.arguments {
                            pending.arguments.push_str(&args);
                        }
                    }
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                events.extend(self.flush_pending_tools());
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

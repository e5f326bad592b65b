//! SSE stream driver shared by the HTTP providers.
//!
//! Splits the response body into lines, feeds each line to the provider's
//! `StreamAdapter`, forwards text deltas to the caller and accumulates the
//! final `LlmResponse`.

use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::provider::network_error;
use crate::types::{LlmError, LlmResponse, LlmResult, StopReason, ToolCall, UsageStats};
use dockside_core::streaming::{StreamAdapter, UnifiedStreamEvent};

pub(crate) async fn drive_stream<A: StreamAdapter>(
    response: reqwest::Response,
    adapter: &mut A,
    tx: &mpsc::Sender<UnifiedStreamEvent>,
    model: &str,
) -> LlmResult<LlmResponse> {
    let mut accumulated_content = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = UsageStats::default();
    let mut stop_reason = StopReason::EndTurn;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(network_error)?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].to_string();
            buffer = buffer[line_end + 1..].to_string();

            if line.trim().is_empty() {
                continue;
            }

            let events = adapter.adapt(&line).map_err(|e| LlmError::ParseError {
                message: format!("{} stream: {}", adapter.provider_name(), e),
            })?;

            for event in events {
                match &event {
                    UnifiedStreamEvent::TextDelta { content } => {
                        accumulated_content.push_str(content);
                    }
                    UnifiedStreamEvent::ToolComplete {
                        tool_id,
                        tool_name,
                        arguments,
                    } => {
                        let input = if arguments.trim().is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(arguments).map_err(|e| LlmError::ParseError {
                                message: format!("tool {} arguments: {}", tool_name, e),
                            })?
                        };
                        tool_calls.push(ToolCall {
                            id: tool_id.clone(),
                            name: tool_name.clone(),
                            arguments: input,
                        });
                    }
                    UnifiedStreamEvent::Usage {
                        input_tokens,
                        output_tokens,
                        cache_read_tokens,
                    } => {
                        if *input_tokens > 0 {
                            usage.input_tokens = *input_tokens;
                        }
                        usage.output_tokens = usage.output_tokens.max(*output_tokens);
                        if cache_read_tokens.is_some() {
                            usage.cache_read_tokens = *cache_read_tokens;
                        }
                    }
                    UnifiedStreamEvent::Complete {
                        stop_reason: Some(reason),
                    } => {
                        stop_reason = StopReason::from(reason.as_str());
                    }
                    UnifiedStreamEvent::Error { message, code } => {
                        return Err(LlmError::ServerError {
                            message: match code {
                                Some(code) => format!("{}: {}", code, message),
                                None => message.clone(),
                            },
                            status: None,
                        });
                    }
                    _ => {}
                }

                // Only text reaches the caller; tool lifecycle and usage are
                // reported through the returned response.
                if matches!(&event, UnifiedStreamEvent::TextDelta { .. }) {
                    let _ = tx.send(event).await;
                }
            }
        }
    }

    tracing::debug!(
        provider = adapter.provider_name(),
        output_tokens = usage.output_tokens,
        tool_calls = tool_calls.len(),
        "stream finished"
    );

    Ok(LlmResponse {
        content: if accumulated_content.is_empty() {
            None
        } else {
            Some(accumulated_content)
        },
        tool_calls,
        stop_reason,
        usage,
        model: model.to_string(),
    })
}

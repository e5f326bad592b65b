//! Anthropic Provider
//!
//! Implementation of the LlmProvider trait for Anthropic's Messages API.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::http_client::build_http_client;
use crate::provider::{missing_api_key_error, network_error, parse_http_error, LlmProvider};
use crate::sse::drive_stream;
use crate::streaming_adapters::AnthropicAdapter;
use crate::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageContent, MessageRole,
    ProviderConfig, StopReason, ToolCall, ToolCallMode, ToolDefinition, UsageStats,
};
use dockside_core::streaming::UnifiedStreamEvent;

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Current API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL)
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("anthropic"))
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        stream: bool,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
            "temperature": request_options
                .temperature_override
                .unwrap_or(self.config.temperature),
        });

        // System text lives outside the message list for this API.
        let mut system_parts: Vec<String> = system.map(|s| vec![s.to_string()]).unwrap_or_default();
        system_parts.extend(
            messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(|m| m.text_content()),
        );
        if !system_parts.is_empty() {
            body["system"] = serde_json::json!(system_parts.join("\n\n"));
        }

        body["messages"] = serde_json::json!(self.merge_messages(messages));

        if !tools.is_empty() && request_options.tool_call_mode != ToolCallMode::None {
            let claude_tools: Vec<serde_json::Value> =
                tools.iter().map(|t| self.tool_to_anthropic(t)).collect();
            body["tools"] = serde_json::json!(claude_tools);
            if request_options.tool_call_mode == ToolCallMode::Required {
                body["tool_choice"] = serde_json::json!({
                    "type": "any"
                });
            }
        }

        body
    }

    /// Convert messages, merging consecutive same-role messages.
    ///
    /// The Messages API requires strictly alternating roles; tool results sent
    /// as separate user messages are folded into one.
    fn merge_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        let mut merged: Vec<(MessageRole, Vec<serde_json::Value>)> = Vec::new();

        for message in messages.iter().filter(|m| m.role != MessageRole::System) {
            let blocks: Vec<serde_json::Value> =
                message.content.iter().map(content_to_anthropic).collect();
            match merged.last_mut() {
                Some((role, content)) if *role == message.role => content.extend(blocks),
                _ => merged.push((message.role, blocks)),
            }
        }

        merged
            .into_iter()
            .map(|(role, content)| {
                serde_json::json!({
                    "role": if role == MessageRole::Assistant { "assistant" } else { "user" },
                    "content": content
                })
            })
            .collect()
    }

    fn tool_to_anthropic(&self, tool: &ToolDefinition) -> serde_json::Value {
        serde_json::json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema
        })
    }

    /// Parse a response from the Messages API
    fn parse_response(&self, response: &AnthropicResponse) -> LlmResponse {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for block in &response.content {
            match block {
                ResponseBlock::Text { text } => text_parts.push(text.clone()),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                ResponseBlock::Other => {}
            }
        }

        LlmResponse {
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join(""))
            },
            tool_calls,
            stop_reason: response
                .stop_reason
                .as_deref()
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: UsageStats {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                cache_read_tokens: response.usage.cache_read_input_tokens,
            },
            model: response.model.clone(),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> LlmResult<reqwest::Response> {
        let api_key = self.api_key()?;
        self.client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(network_error)
    }
}

fn content_to_anthropic(content: &MessageContent) -> serde_json::Value {
    match content {
        MessageContent::Text { text } => serde_json::json!({
            "type": "text",
            "text": text
        }),
        MessageContent::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input
        }),
        MessageContent::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let mut result = serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content
            });
            if let Some(true) = is_error {
                result["is_error"] = serde_json::json!(true);
            }
            result
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(
            &messages,
            system.as_deref(),
            &tools,
            false,
            &request_options,
        );

        let response = self.post(&body).await?;
        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(network_error)?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text, "anthropic"));
        }

        let parsed: AnthropicResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(self.parse_response(&parsed))
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body =
            self.build_request_body(&messages, system.as_deref(), &tools, true, &request_options);

        let response = self.post(&body).await?;
        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.map_err(network_error)?;
            return Err(parse_http_error(status, &body_text, "anthropic"));
        }

        let mut adapter = AnthropicAdapter::new();
        drive_stream(response, &mut adapter, &tx, &self.config.model).await
    }

    async fn health_check(&self) -> LlmResult<()> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "Hi"}]
        });

        let response = self.post(&body).await?;
        let status = response.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(parse_http_error(status, &body, "anthropic"))
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Messages API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderType;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(ProviderConfig {
            provider: ProviderType::Anthropic,
            api_key: Some("sk-ant-test".into()),
            model: "claude-sonnet-4-5".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_required_tool_choice_is_any() {
        let tools = vec![ToolDefinition::new(
            "inventoryAgent",
            "Inventory questions",
            serde_json::json!({"type": "object"}),
        )];
        let body = provider().build_request_body(
            &[Message::user("stock?")],
            Some("route"),
            &tools,
            false,
            &LlmRequestOptions::tools_required(),
        );
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["system"], "route");
    }

    #[test]
    fn test_system_messages_fold_into_system_param() {
        let body = provider().build_request_body(
            &[Message::system("tenant: acme_3pl"), Message::user("hi")],
            Some("base"),
            &[],
            false,
            &LlmRequestOptions::default(),
        );
        assert_eq!(body["system"], "base\n\ntenant: acme_3pl");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_consecutive_tool_results_merge() {
        let messages = vec![
            Message::user("q"),
            Message::tool_calls(&[
                ToolCall {
                    id: "a".into(),
                    name: "t".into(),
                    arguments: serde_json::json!({}),
                },
                ToolCall {
                    id: "b".into(),
                    name: "t".into(),
                    arguments: serde_json::json!({}),
                },
            ]),
            Message::tool_result("a", "{}", false),
            Message::tool_result("b", "boom", true),
        ];
        let merged = provider().merge_messages(&messages);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2]["role"], "user");
        assert_eq!(merged[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(merged[2]["content"][1]["is_error"], true);
    }

    #[test]
    fn test_parse_response() {
        let raw: AnthropicResponse = serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "text", "text": "Routing."},
                {"type": "tool_use", "id": "toolu_1", "name": "orderAgent", "input": {"instructions": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }))
        .unwrap();
        let parsed = provider().parse_response(&raw);
        assert_eq!(parsed.content.as_deref(), Some("Routing."));
        assert_eq!(parsed.tool_calls[0].name, "orderAgent");
        assert_eq!(parsed.stop_reason, StopReason::ToolUse);
    }
}

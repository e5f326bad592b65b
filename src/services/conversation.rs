//! Conversation State
//!
//! Ordered, append-only message log for one turn. Owned by the orchestrator
//! for the duration of the turn; persisted once the turn ends.
//!
//! Tool traffic is always appended as a pair: a `tool-call` message followed
//! by a `tool-result` message covering exactly the same call ids.

use std::collections::HashSet;

use dockside_llm::{Message, MessageContent, MessageRole, ToolCall};

use crate::models::chat::{ChatMessage, MessageBody, Role, ToolCallPart, ToolResultPart};
use crate::utils::error::{AppError, AppResult};

/// Tool result text fed back to a model is capped at this many characters.
pub const MAX_TOOL_RESULT_CHARS: usize = 12_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new(prior: Vec<ChatMessage>) -> Self {
        Self { messages: prior }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::user(text))
    }

    pub fn push_answer(&mut self, text: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::answer(text))
    }

    pub fn push_error(&mut self, message: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::error(message))
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        let last = self.messages.len() - 1;
        &self.messages[last]
    }

    /// Append a tool-call message and its tool-result message.
    ///
    /// Rejects the pair unless both sides carry the same set of call ids.
    pub fn push_tool_exchange(
        &mut self,
        calls: Vec<ToolCallPart>,
        results: Vec<ToolResultPart>,
    ) -> AppResult<()> {
        if calls.is_empty() {
            return Err(AppError::validation("tool exchange without calls"));
        }
        let call_ids: HashSet<&str> = calls.iter().map(|c| c.tool_call_id.as_str()).collect();
        let result_ids: HashSet<&str> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        if call_ids.len() != calls.len()
            || result_ids.len() != results.len()
            || call_ids != result_ids
        {
            return Err(AppError::validation(
                "tool results do not match tool calls one-to-one",
            ));
        }
        self.messages.push(ChatMessage::tool_calls(calls));
        self.messages.push(ChatMessage::tool_results(results));
        Ok(())
    }

    /// Drop the last user message and everything after it, returning its text.
    ///
    /// Used by retry (resubmit the same text) and edit (submit new text).
    pub fn truncate_for_retry(&mut self) -> Option<String> {
        let index = self.messages.iter().rposition(ChatMessage::is_user_input)?;
        let removed = self.messages[index].text().map(str::to_string);
        self.messages.truncate(index);
        removed
    }

    /// Whether every tool-call id has exactly one tool-result and vice versa.
    pub fn is_paired(&self) -> bool {
        tool_pairing_holds(&self.messages)
    }

    /// Model-facing history.
    ///
    /// Error cards are omitted. Each tool exchange becomes one tool-use
    /// message and one tool-result message, result text capped at
    /// `MAX_TOOL_RESULT_CHARS`.
    pub fn to_llm_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            match (&message.role, &message.content) {
                (Role::User, MessageBody::Text { text }) => out.push(Message::user(text.clone())),
                (Role::System, MessageBody::Text { text }) => {
                    out.push(Message::system(text.clone()))
                }
                (_, MessageBody::Text { text }) | (_, MessageBody::Answer { text }) => {
                    out.push(Message::assistant(text.clone()))
                }
                (_, MessageBody::Error { .. }) => {}
                (_, MessageBody::ToolCall { calls }) => {
                    let calls: Vec<ToolCall> = calls
                        .iter()
                        .map(|c| ToolCall {
                            id: c.tool_call_id.clone(),
                            name: c.tool_name.clone(),
                            arguments: c.args.clone(),
                        })
                        .collect();
                    out.push(Message::tool_calls(&calls));
                }
                (_, MessageBody::ToolResult { results }) => out.push(Message {
                    role: MessageRole::User,
                    content: results
                        .iter()
                        .map(|r| MessageContent::ToolResult {
                            tool_use_id: r.tool_call_id.clone(),
                            content: truncate_chars(&r.result.to_string(), MAX_TOOL_RESULT_CHARS),
                            is_error: r.is_error.then_some(true),
                        })
                        .collect(),
                }),
            }
        }
        out
    }
}

/// Pairing check over any message log.
pub fn tool_pairing_holds(messages: &[ChatMessage]) -> bool {
    let mut calls: Vec<&str> = Vec::new();
    let mut results: Vec<&str> = Vec::new();
    for message in messages {
        match &message.content {
            MessageBody::ToolCall { calls: c } => {
                calls.extend(c.iter().map(|p| p.tool_call_id.as_str()))
            }
            MessageBody::ToolResult { results: r } => {
                results.extend(r.iter().map(|p| p.tool_call_id.as_str()))
            }
            _ => {}
        }
    }
    calls.sort_unstable();
    results.sort_unstable();
    let unique = calls.windows(2).all(|w| w[0] != w[1]);
    unique && calls == results
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...[truncated]");
    cut
}

/// Remove a trailing assistant message when the one before it is also an
/// assistant message.
pub fn drop_duplicate_trailing_assistant(messages: &mut Vec<Message>) {
    let n = messages.len();
    if n >= 2
        && messages[n - 1].role == MessageRole::Assistant
        && messages[n - 2].role == MessageRole::Assistant
    {
        messages.pop();
    }
}

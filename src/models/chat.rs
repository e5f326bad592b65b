//! Chat Models
//!
//! Persisted chat records and the messages that make up a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length of a generated chat title, in characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// One tool invocation requested during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Value,
    pub is_error: bool,
}

impl From<&dockside_tools::ToolResult> for ToolResultPart {
    fn from(result: &dockside_tools::ToolResult) -> Self {
        Self {
            tool_call_id: result.tool_call_id.clone(),
            tool_name: result.tool_name.clone(),
            result: result.result.clone(),
            is_error: result.is_error,
        }
    }
}

/// Message payload, tagged by message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageBody {
    /// Free text (user input)
    Text { text: String },
    /// Final assistant answer for a turn
    Answer { text: String },
    /// Terminal failure card with a retry affordance
    Error { message: String, retryable: bool },
    ToolCall { calls: Vec<ToolCallPart> },
    ToolResult { results: Vec<ToolResultPart> },
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: MessageBody,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: MessageBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageBody::Text { text: text.into() })
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageBody::Answer { text: text.into() })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            MessageBody::Error {
                message: message.into(),
                retryable: true,
            },
        )
    }

    pub fn tool_calls(calls: Vec<ToolCallPart>) -> Self {
        Self::new(Role::Assistant, MessageBody::ToolCall { calls })
    }

    pub fn tool_results(results: Vec<ToolResultPart>) -> Self {
        Self::new(Role::Tool, MessageBody::ToolResult { results })
    }

    /// Message type tag as persisted.
    pub fn kind(&self) -> &'static str {
        match self.content {
            MessageBody::Text { .. } => "text",
            MessageBody::Answer { .. } => "answer",
            MessageBody::Error { .. } => "error",
            MessageBody::ToolCall { .. } => "tool-call",
            MessageBody::ToolResult { .. } => "tool-result",
        }
    }

    /// Answer or error card: the entries that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.content,
            MessageBody::Answer { .. } | MessageBody::Error { .. }
        )
    }

    pub fn is_user_input(&self) -> bool {
        self.role == Role::User
    }

    /// Text of a user, answer or error message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageBody::Text { text } | MessageBody::Answer { text } => Some(text),
            MessageBody::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Persisted chat record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub path: String,
    pub org_type: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favourite: Option<bool>,
}

impl Chat {
    /// Create an empty chat; the title is set from the first user message.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, org_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            path: format!("/chat/{}", id),
            id,
            title: String::new(),
            created_at: Utc::now(),
            user_id: user_id.into(),
            org_type: org_type.into(),
            messages: Vec::new(),
            share_path: None,
            is_favourite: None,
        }
    }

    /// Replace the message log, deriving a title if none is set yet.
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        if self.title.is_empty() {
            if let Some(first) = messages.iter().find(|m| m.is_user_input()) {
                self.title = title_from(first.text().unwrap_or_default());
            }
        }
        self.messages = messages;
    }
}

/// Chat title from user input: whitespace collapsed, truncated to 100 chars.
pub fn title_from(input: &str) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_TITLE_CHARS).collect()
}

/// User input for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnInput {
    Text { text: String },
    /// Structured form submission, rendered to text before entering the conversation
    Form {
        form_id: String,
        fields: Vec<FormField>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Deterministic text rendering of the input.
    pub fn render(&self) -> String {
        match self {
            TurnInput::Text { text } => text.trim().to_string(),
            TurnInput::Form { form_id, fields } => {
                let mut lines = vec![format!("Form submission: {}", form_id)];
                lines.extend(
                    fields
                        .iter()
                        .map(|f| format!("{}: {}", f.name.trim(), f.value.trim())),
                );
                lines.join("\n")
            }
        }
    }
}

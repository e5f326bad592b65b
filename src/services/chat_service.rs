//! Chat Service
//!
//! Entry point for turn submission and chat management. Loads the stored
//! conversation, applies retry/edit truncation and hands the turn to the
//! orchestrator. At most one turn runs per chat id in this process; a second
//! submission while one is in flight is rejected with `AppError::Conflict`.

use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};

use dockside_core::RoutingContext;

use crate::models::chat::{Chat, TurnInput};
use crate::services::conversation::ConversationState;
use crate::services::pipeline::{TurnHandle, TurnOrchestrator, TurnRequest};
use crate::storage::chat_store::ChatStore;
use crate::utils::error::{AppError, AppResult};

/// One turn submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTurn {
    pub chat_id: String,
    pub user_id: String,
    pub tenant_key: String,
    pub org_type: String,
    #[serde(default)]
    pub brand_id: Option<String>,
    pub input: TurnInput,
    /// Resubmit the last user message, discarding everything after it
    #[serde(default)]
    pub retry: bool,
    /// Replace the last user message with `input`
    #[serde(default)]
    pub edited: bool,
}

/// Removes the chat id from the in-flight set when dropped.
pub struct TurnGuard {
    in_flight: Arc<DashSet<String>>,
    chat_id: String,
}

impl TurnGuard {
    fn acquire(in_flight: &Arc<DashSet<String>>, chat_id: &str) -> AppResult<Self> {
        if !in_flight.insert(chat_id.to_string()) {
            return Err(AppError::conflict(format!(
                "a turn is already running for chat {}",
                chat_id
            )));
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            chat_id: chat_id.to_string(),
        })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.chat_id);
    }
}

pub struct ChatService {
    chats: Arc<dyn ChatStore>,
    orchestrator: Arc<TurnOrchestrator>,
    in_flight: Arc<DashSet<String>>,
}

impl ChatService {
    pub fn new(chats: Arc<dyn ChatStore>, orchestrator: Arc<TurnOrchestrator>) -> Self {
        Self {
            chats,
            orchestrator,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn is_busy(&self, chat_id: &str) -> bool {
        self.in_flight.contains(chat_id)
    }

    /// Start a turn. The returned handle streams UI fragments and resolves
    /// once the turn has been persisted.
    pub async fn submit_turn(&self, request: SubmitTurn) -> AppResult<TurnHandle> {
        if request.chat_id.trim().is_empty() || request.user_id.trim().is_empty() {
            return Err(AppError::validation("chat id and user id are required"));
        }
        let guard = TurnGuard::acquire(&self.in_flight, &request.chat_id)?;

        if let Some(owner) = self.chats.chat_owner(&request.chat_id).await? {
            if owner != request.user_id {
                return Err(AppError::not_found(format!(
                    "chat {} not found",
                    request.chat_id
                )));
            }
        }

        let stored = self
            .chats
            .get_chat(&request.chat_id, &request.user_id)
            .await?;
        let mut state = ConversationState::new(stored.map(|c| c.messages).unwrap_or_default());

        let input = if request.retry {
            let previous = state
                .truncate_for_retry()
                .ok_or_else(|| AppError::validation("nothing to retry in this chat"))?;
            TurnInput::text(previous)
        } else {
            if request.edited && state.truncate_for_retry().is_none() {
                return Err(AppError::validation("no message to edit in this chat"));
            }
            request.input
        };
        if input.render().is_empty() {
            return Err(AppError::validation("message is empty"));
        }

        let mut routing = RoutingContext::new(
            request.tenant_key,
            request.org_type,
            request.chat_id,
            request.user_id,
        );
        if let Some(brand) = request.brand_id.filter(|b| !b.trim().is_empty()) {
            routing = routing.with_brand(brand);
        }
        tracing::debug!(
            chat_id = %routing.chat_id,
            retry = request.retry,
            edited = request.edited,
            prior = state.len(),
            "submitting turn"
        );

        Ok(self.orchestrator.start_guarded(
            TurnRequest {
                routing,
                prior: state.into_messages(),
                input,
            },
            guard,
        ))
    }

    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Chat> {
        let mut chat = self
            .chats
            .get_chat(chat_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("chat {} not found", chat_id)))?;
        chat.is_favourite = Some(self.chats.is_favourite(user_id, chat_id).await?);
        Ok(chat)
    }

    pub async fn list_chats(&self, user_id: &str) -> AppResult<Vec<Chat>> {
        self.chats.list_chats(user_id).await
    }

    /// Flip favourite membership, returning the new state.
    pub async fn toggle_favourite(&self, user_id: &str, chat_id: &str) -> AppResult<bool> {
        if self.chats.get_chat(chat_id, user_id).await?.is_none() {
            return Err(AppError::not_found(format!("chat {} not found", chat_id)));
        }
        let favourite = !self.chats.is_favourite(user_id, chat_id).await?;
        self.chats.set_favourite(user_id, chat_id, favourite).await?;
        Ok(favourite)
    }

    pub async fn delete_chat(&self, chat_id: &str, user_id: &str) -> AppResult<()> {
        if self.is_busy(chat_id) {
            return Err(AppError::conflict(format!(
                "chat {} has a turn in progress",
                chat_id
            )));
        }
        self.chats.delete_chat(chat_id, user_id).await
    }
}

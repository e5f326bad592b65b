//! Chat Commands
//!
//! Turn submission (server-sent events) and chat management.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::respond;
use crate::models::chat::{Chat, TurnInput};
use crate::models::response::{CommandResponse, FavouriteResponse};
use crate::services::chat_service::SubmitTurn;
use crate::services::ui_stream::UiFragment;
use crate::state::AppState;

/// Body of POST /api/chats/{chat_id}/turns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTurnRequest {
    pub user_id: String,
    pub tenant_key: String,
    pub org_type: String,
    #[serde(default)]
    pub brand_id: Option<String>,
    pub input: TurnInput,
    #[serde(default)]
    pub retry: bool,
    #[serde(default)]
    pub edited: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: String,
}

fn fragment_event(fragment: &UiFragment) -> Event {
    let name = match fragment {
        UiFragment::TurnStarted { .. } => "turn_started",
        UiFragment::Status { .. } => "status",
        UiFragment::ToolActivity { .. } => "tool_activity",
        UiFragment::AnalysisReady { .. } => "analysis_ready",
        UiFragment::FileReady { .. } => "file_ready",
        UiFragment::TextDelta { .. } => "text_delta",
        UiFragment::Answer { .. } => "answer",
        UiFragment::Error { .. } => "error",
    };
    match Event::default().event(name).json_data(fragment) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "fragment not serializable");
            Event::default().event("error").data("unserializable fragment")
        }
    }
}

/// POST /api/chats/{chat_id}/turns
pub async fn submit_turn(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<SubmitTurnRequest>,
) -> Response {
    let request = SubmitTurn {
        chat_id,
        user_id: body.user_id,
        tenant_key: body.tenant_key,
        org_type: body.org_type,
        brand_id: body.brand_id,
        input: body.input,
        retry: body.retry,
        edited: body.edited,
    };

    match state.chats.submit_turn(request).await {
        Ok(handle) => {
            tracing::info!(turn_id = %handle.turn_id, "streaming turn");
            let events = UnboundedReceiverStream::new(handle.fragments)
                .map(|fragment| Ok::<Event, Infallible>(fragment_event(&fragment)));
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => respond::<()>(Err(e)).into_response(),
    }
}

/// GET /api/chats/{chat_id}?userId=..
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<CommandResponse<Chat>>) {
    respond(state.chats.get_chat(&chat_id, &query.user_id).await)
}

/// DELETE /api/chats/{chat_id}?userId=..
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<CommandResponse<()>>) {
    respond(state.chats.delete_chat(&chat_id, &query.user_id).await)
}

/// GET /api/users/{user_id}/chats
pub async fn list_chats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<CommandResponse<Vec<Chat>>>) {
    respond(state.chats.list_chats(&user_id).await)
}

/// POST /api/chats/{chat_id}/favourite
pub async fn toggle_favourite(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<UserQuery>,
) -> (StatusCode, Json<CommandResponse<FavouriteResponse>>) {
    respond(
        state
            .chats
            .toggle_favourite(&body.user_id, &chat_id)
            .await
            .map(|favourite| FavouriteResponse { favourite }),
    )
}

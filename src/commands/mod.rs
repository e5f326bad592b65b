//! HTTP Commands
//!
//! Axum handlers exposed to the chat UI. Every JSON endpoint answers with
//! the `CommandResponse` envelope; turn submission answers with a
//! server-sent event stream of UI fragments.

pub mod chats;
pub mod health;

use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};

use crate::models::response::CommandResponse;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};

pub use chats::*;
pub use health::*;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::get_health))
        .route("/api/chats/{chat_id}/turns", post(chats::submit_turn))
        .route(
            "/api/chats/{chat_id}",
            get(chats::get_chat).delete(chats::delete_chat),
        )
        .route("/api/chats/{chat_id}/favourite", post(chats::toggle_favourite))
        .route("/api/users/{user_id}/chats", get(chats::list_chats))
        .with_state(state)
}

/// HTTP status for an application error.
pub fn status_of(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation(_) | AppError::UnknownDomain(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        AppError::Http(_) | AppError::Llm(_) | AppError::Sandbox(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wrap a service result in the response envelope.
pub fn respond<T>(result: AppResult<T>) -> (StatusCode, Json<CommandResponse<T>>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(CommandResponse::ok(data))),
        Err(e) => {
            let status = status_of(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, "request failed");
            }
            (status, Json(CommandResponse::err(e.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&AppError::conflict("busy")), StatusCode::CONFLICT);
        assert_eq!(status_of(&AppError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(&AppError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(&AppError::storage("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_respond_envelope() {
        let (status, Json(body)) = respond::<u32>(Err(AppError::conflict("turn running")));
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);
        let (status, Json(body)) = respond(Ok(7));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data, Some(7));
    }
}

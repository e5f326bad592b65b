//! Health Check Commands
//!
//! Reports which backing services are configured.

use axum::{extract::State, response::Json};

use crate::models::response::{CommandResponse, HealthResponse};
use crate::models::settings::ChatStoreBackend;
use crate::state::AppState;

/// GET /healthz
pub async fn get_health(State(state): State<AppState>) -> Json<CommandResponse<HealthResponse>> {
    let config = &state.config;
    let health = HealthResponse {
        chat_store: match config.chat_store.backend {
            ChatStoreBackend::Memory => "memory".to_string(),
            ChatStoreBackend::Upstash => "upstash".to_string(),
        },
        blob_storage: config.blob.enabled,
        tracing: config.tracing.enabled,
        ..HealthResponse::default()
    };
    Json(CommandResponse::ok(health))
}

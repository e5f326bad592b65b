//! Dockside - Conversational Analytics Backend
//!
//! Answers natural-language questions from logistics and 3PL teams about
//! their orders, inventory, returns, shipments and billing. It includes:
//! - HTTP command handlers for the chat UI
//! - The turn pipeline and its supporting services
//! - Storage layer (config, chat store, blob store)
//! - Data models and utilities

pub mod commands;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use commands::router;
pub use models::response::*;
pub use models::settings::AppConfig;
pub use state::AppState;
pub use utils::error::{AppError, AppResult};

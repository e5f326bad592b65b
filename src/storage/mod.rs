//! Storage Layer
//!
//! Handles all data persistence: JSON config, chat records and generated files.

pub mod blob_store;
pub mod chat_store;
pub mod config;

pub use blob_store::*;
pub use chat_store::*;
pub use config::*;

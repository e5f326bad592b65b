//! Data Models
//!
//! Contains all data structures used throughout the application.

pub mod chat;
pub mod response;
pub mod settings;

pub use chat::*;
pub use settings::*;

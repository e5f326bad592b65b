//! Services
//!
//! Business logic services for the application.
//! Services handle the core functionality and are called by commands.

pub mod chat_service;
pub mod code_interpreter;
pub mod conversation;
pub mod csv_interchange;
pub mod pipeline;
pub mod sandbox;
pub mod trace;
pub mod ui_stream;

pub use chat_service::{ChatService, SubmitTurn};
pub use conversation::ConversationState;
pub use pipeline::{TurnHandle, TurnOrchestrator, TurnRequest, TurnSummary};
pub use trace::{TraceSink, HttpTraceSink, MemoryTraceSink, NoopTraceSink};
pub use ui_stream::{UiFragment, UiStream};

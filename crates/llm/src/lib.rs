//! Dockside LLM
//!
//! Provides a unified interface for the LLM providers used by the chat
//! pipeline:
//! - OpenAI chat completions
//! - Anthropic messages
//!
//! Also includes the provider-specific streaming adapters, the HTTP client
//! factory and the structured-output helper.

pub mod anthropic;
pub mod factory;
pub mod http_client;
pub mod openai;
pub mod provider;
mod sse;
pub mod streaming_adapters;
pub mod structured;
pub mod types;

// Re-export main types
pub use anthropic::AnthropicProvider;
pub use factory::create_provider;
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use structured::{generate_object, strict_schema_for};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::{AnthropicAdapter, OpenAIAdapter};

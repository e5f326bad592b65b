//! Dockside Core
//!
//! Foundational traits, error types and stream primitives for the Dockside
//! workspace. This crate has no dependency on application-level code
//! (HTTP server, chat storage, LLM providers, etc.).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `context` - Routing and tool execution context (`RoutingContext`, `ToolContext`)
//! - `tool_trait` - Unified tool abstraction (`ToolDefinitionTrait`, `ToolExecutable`, `UnifiedTool`)
//! - `streaming` - Unified stream event types and adapter trait
//! - `artifact` - Single-writer streamable values with a terminal "done" state

pub mod artifact;
pub mod context;
pub mod error;
pub mod streaming;
pub mod tool_trait;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Context Hierarchy ──────────────────────────────────────────────────
pub use context::{ExecutionContext, RoutingContext, ToolContext};

// ── Unified Tool Trait ─────────────────────────────────────────────────
pub use tool_trait::{ToolDefinitionTrait, ToolExecutable, UnifiedTool, UnifiedToolRegistry};

// ── Streaming Types ────────────────────────────────────────────────────
pub use artifact::{ArtifactError, ArtifactSnapshot, StreamableValue};
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};

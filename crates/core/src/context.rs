//! Context Hierarchy
//!
//! Defines the context types that flow through a chat turn:
//!
//! 1. `ExecutionContext` trait - Base read-only context shared across all scopes
//! 2. `RoutingContext` - Per-turn caller identity (tenant, org type, chat, user)
//! 3. `ToolContext` - Context handed to a single tool invocation
//!
//! Tools only ever see a `ToolContext`. The tenant filter they apply to remote
//! queries comes from here and never from LLM-supplied arguments.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// ============================================================================
// ExecutionContext Trait
// ============================================================================

/// Base execution context trait providing read-only turn information.
pub trait ExecutionContext: Send + Sync {
    /// Returns the chat (conversation) identifier for this execution.
    fn session_id(&self) -> &str;

    /// Returns the name of the stage or agent currently executing.
    fn agent_name(&self) -> &str;

    /// Returns an optional execution tag for categorization (e.g., "orders", "writer").
    fn execution_tag(&self) -> Option<&str> {
        None
    }
}

// ============================================================================
// RoutingContext
// ============================================================================

/// Caller identity for one turn.
///
/// `tenant_key` is the `company_url` every analytics query is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingContext {
    pub tenant_key: String,
    pub org_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    pub chat_id: String,
    pub user_id: String,
}

impl RoutingContext {
    /// Create a routing context without a brand filter.
    pub fn new(
        tenant_key: impl Into<String>,
        org_type: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_key: tenant_key.into(),
            org_type: org_type.into(),
            brand_id: None,
            chat_id: chat_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Set the brand filter.
    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    /// Returns the tenant key, refusing blank values.
    pub fn tenant(&self) -> CoreResult<&str> {
        let tenant = self.tenant_key.trim();
        if tenant.is_empty() {
            return Err(CoreError::tenant_not_resolved(format!(
                "chat {} has no company_url",
                self.chat_id
            )));
        }
        Ok(tenant)
    }

    /// Create a `ToolContext` for a specific tool call made by `agent_name`.
    pub fn tool_context(
        &self,
        agent_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> ToolContext {
        ToolContext {
            routing: self.clone(),
            agent_name: agent_name.into(),
            execution_tag: None,
            tool_call_id: tool_call_id.into(),
        }
    }
}

impl ExecutionContext for RoutingContext {
    fn session_id(&self) -> &str {
        &self.chat_id
    }

    fn agent_name(&self) -> &str {
        "orchestrator"
    }
}

// ============================================================================
// ToolContext
// ============================================================================

/// Context for tool-level execution.
///
/// Carries the caller's routing context read-only plus the identifier of the
/// tool call being served.
#[derive(Debug, Clone)]
pub struct ToolContext {
    routing: RoutingContext,
    agent_name: String,
    execution_tag: Option<String>,
    tool_call_id: String,
}

impl ToolContext {
    /// Set the execution tag.
    pub fn with_execution_tag(mut self, tag: impl Into<String>) -> Self {
        self.execution_tag = Some(tag.into());
        self
    }

    /// Returns the unique tool call identifier.
    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// Returns the tenant key every remote query must be filtered by.
    pub fn tenant(&self) -> CoreResult<&str> {
        self.routing.tenant()
    }

    /// Returns the optional brand filter.
    pub fn brand_id(&self) -> Option<&str> {
        self.routing
            .brand_id
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    /// Returns the routing context this tool call belongs to.
    pub fn routing(&self) -> &RoutingContext {
        &self.routing
    }
}

impl ExecutionContext for ToolContext {
    fn session_id(&self) -> &str {
        &self.routing.chat_id
    }

    fn agent_name(&self) -> &str {
        &self.agent_name
    }

    fn execution_tag(&self) -> Option<&str> {
        self.execution_tag.as_deref()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Tool Invocation
//!
//! `ToolResult` is the uniform outcome of one tool call, and `invoke_tool`
//! turns a model-issued `ToolCall` into one without ever failing: unknown
//! tools, tenant errors and remote failures all come back as `is_error`
//! results.
//!
//! A successful result always carries `result.data` as an array; absent or
//! null outputs become the empty-dataset marker `{"data": []}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dockside_core::{CoreResult, RoutingContext, UnifiedToolRegistry};
use dockside_llm::ToolCall;

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Always an object with a `data` array
    pub result: Value,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result, normalizing the payload.
    pub fn ok(tool_call_id: impl Into<String>, tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: normalize_result(result),
            is_error: false,
            error: None,
        }
    }

    /// Create an error result carrying an empty dataset.
    pub fn err(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: empty_dataset(),
            is_error: true,
            error: Some(error.into()),
        }
    }

    pub fn from_execution(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        outcome: CoreResult<Value>,
    ) -> Self {
        match outcome {
            Ok(value) => Self::ok(tool_call_id, tool_name, value),
            Err(e) => Self::err(tool_call_id, tool_name, e.to_string()),
        }
    }

    /// Rows of the result set.
    pub fn rows(&self) -> &[Value] {
        self.result
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Column names declared in `result.meta`, if any.
    pub fn columns(&self) -> Vec<String> {
        self.result
            .get("meta")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Convert to string for LLM consumption
    pub fn to_content(&self) -> String {
        if self.is_error {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            )
        } else {
            self.result.to_string()
        }
    }
}

/// The empty-dataset marker.
pub fn empty_dataset() -> Value {
    serde_json::json!({ "data": [] })
}

fn normalize_result(result: Value) -> Value {
    match result {
        Value::Null => empty_dataset(),
        Value::Array(rows) => serde_json::json!({ "data": rows }),
        Value::Object(mut map) => {
            if !map.get("data").map(Value::is_array).unwrap_or(false) {
                map.insert("data".to_string(), Value::Array(vec![]));
            }
            Value::Object(map)
        }
        other => serde_json::json!({ "data": [], "value": other }),
    }
}

/// Execute one model-issued tool call against `registry`.
pub async fn invoke_tool(
    registry: &UnifiedToolRegistry,
    routing: &RoutingContext,
    agent_name: &str,
    call: &ToolCall,
) -> ToolResult {
    let ctx = routing.tool_context(agent_name, call.id.clone());
    let outcome = registry
        .execute(&call.name, &ctx, call.arguments.clone())
        .await;
    if let Err(e) = &outcome {
        tracing::warn!(agent = agent_name, tool = %call.name, error = %e, "tool call failed");
    }
    ToolResult::from_execution(call.id.clone(), call.name.clone(), outcome)
}

/// Execute all calls concurrently; results keep the order of `calls`.
pub async fn invoke_all(
    registry: &UnifiedToolRegistry,
    routing: &RoutingContext,
    agent_name: &str,
    calls: &[ToolCall],
) -> Vec<ToolResult> {
    futures_util::future::join_all(
        calls
            .iter()
            .map(|call| invoke_tool(registry, routing, agent_name, call)),
    )
    .await
}

//! Inquiry Stage
//!
//! The router model picks one or more domain managers and writes
//! instructions for each. Managers run one after another in the order the
//! model called them; their tool traffic is flattened into one list.
//! If the router or any manager fails, nothing is kept.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use dockside_llm::{LlmProvider, LlmRequestOptions, Message, ToolCall};
use dockside_tools::ToolResult;

use super::manager::ManagerStage;
use super::outcome::{Stage, StageOutcome};
use super::prompts::{inquiry_system_prompt, manager_tools};
use super::TurnScope;
use crate::models::chat::ToolCallPart;
use crate::services::trace::TraceKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InquiryOutput {
    /// Managers the router selected, in call order
    pub managers: Vec<String>,
    /// All tool calls made by the managers, index-aligned with `tool_results`
    pub tool_calls: Vec<ToolCallPart>,
    pub tool_results: Vec<ToolResult>,
}

impl InquiryOutput {
    pub fn has_results(&self) -> bool {
        !self.tool_results.is_empty()
    }
}

pub struct InquiryStage {
    provider: Arc<dyn LlmProvider>,
    manager: Arc<ManagerStage>,
}

impl InquiryStage {
    pub fn new(provider: Arc<dyn LlmProvider>, manager: Arc<ManagerStage>) -> Self {
        Self { provider, manager }
    }

    pub async fn run(&self, messages: Vec<Message>, scope: &TurnScope) -> StageOutcome<InquiryOutput> {
        scope.status(Stage::Inquiry);
        let outcome = self.execute(messages, scope).await;
        match &outcome {
            Ok(output) => {
                scope
                    .trace(
                        TraceKind::StageEnd,
                        Stage::Inquiry.as_str(),
                        json!({ "managers": output.managers, "toolCalls": output.tool_calls.len() }),
                    )
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "inquiry failed");
                scope
                    .trace_error(TraceKind::StageEnd, Stage::Inquiry.as_str(), json!({ "error": e }))
                    .await
            }
        }
        match outcome {
            Ok(output) => StageOutcome::ok(output),
            Err(e) => StageOutcome::failed(e),
        }
    }

    async fn execute(&self, messages: Vec<Message>, scope: &TurnScope) -> Result<InquiryOutput, String> {
        let fallback_instructions = messages
            .iter()
            .rev()
            .find(|m| m.role == dockside_llm::MessageRole::User)
            .map(Message::text_content)
            .unwrap_or_default();

        let response = self
            .provider
            .send_message(
                messages,
                Some(inquiry_system_prompt(&scope.routing)),
                manager_tools(),
                LlmRequestOptions::tools_required(),
            )
            .await
            .map_err(|e| format!("Routing request failed: {}", e))?;
        if !response.has_tool_calls() {
            return Err("Routing model did not select a manager".to_string());
        }

        let mut output = InquiryOutput::default();
        let mut seen = HashSet::new();
        for call in &response.tool_calls {
            let instructions = instructions_of(call).unwrap_or(fallback_instructions.as_str());
            tracing::debug!(manager = %call.name, "dispatching manager");
            let mut managed = self
                .manager
                .run(&call.name, instructions, scope)
                .await
                .into_result()
                .map_err(|e| format!("{}: {}", call.name, e))?;

            for (part, result) in managed
                .tool_calls
                .iter_mut()
                .zip(managed.tool_results.iter_mut())
            {
                if !seen.insert(part.tool_call_id.clone()) {
                    let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                    part.tool_call_id = fresh.clone();
                    result.tool_call_id = fresh.clone();
                    seen.insert(fresh);
                }
            }
            output.managers.push(call.name.clone());
            output.tool_calls.extend(managed.tool_calls);
            output.tool_results.extend(managed.tool_results);
        }
        Ok(output)
    }
}

fn instructions_of(call: &ToolCall) -> Option<&str> {
    call.arguments
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::domains::DomainTable;
    use crate::services::pipeline::test_support::{scope, MockLlmProvider, StaticBackend};
    use dockside_llm::{LlmError, LlmResponse};
    use dockside_tools::ToolCatalog;

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    fn stage(router: MockLlmProvider, manager: MockLlmProvider, backend: Arc<StaticBackend>) -> InquiryStage {
        let domains = Arc::new(DomainTable::new(Arc::new(ToolCatalog::new(backend))));
        let manager = Arc::new(ManagerStage::new(Arc::new(manager), domains));
        InquiryStage::new(Arc::new(router), manager)
    }

    #[tokio::test]
    async fn test_aggregates_managers_in_order() {
        let router = MockLlmProvider::new(vec![Ok(LlmResponse::with_tool_calls(
            vec![
                call("r1", "inventoryAgent", json!({"instructions": "low stock"})),
                call("r2", "billingAgent", json!({"instructions": "charges"})),
            ],
            "mock",
        ))]);
        let manager = MockLlmProvider::new(vec![
            Ok(LlmResponse::with_tool_calls(
                vec![call("call_1", "low_stock_items", json!({}))],
                "mock",
            )),
            Ok(LlmResponse::with_tool_calls(
                vec![call("call_1", "billing_charges", json!({}))],
                "mock",
            )),
        ]);
        let (scope, _rx) = scope("acme_3pl");
        let outcome = stage(router, manager, Arc::new(StaticBackend::empty()))
            .run(vec![Message::user("stock and charges")], &scope)
            .await;

        assert!(!outcome.is_error);
        let output = outcome.payload;
        assert_eq!(output.managers, vec!["inventoryAgent", "billingAgent"]);
        assert_eq!(output.tool_results[0].tool_name, "low_stock_items");
        assert_eq!(output.tool_results[1].tool_name, "billing_charges");
        assert_ne!(output.tool_calls[0].tool_call_id, output.tool_calls[1].tool_call_id);
        assert_eq!(output.tool_calls[1].tool_call_id, output.tool_results[1].tool_call_id);
    }

    #[tokio::test]
    async fn test_router_failure_is_error() {
        let router = MockLlmProvider::new(vec![Err(LlmError::NetworkError {
            message: "reset".into(),
        })]);
        let (scope, _rx) = scope("acme_3pl");
        let outcome = stage(router, MockLlmProvider::new(vec![]), Arc::new(StaticBackend::empty()))
            .run(vec![Message::user("hi")], &scope)
            .await;
        assert!(outcome.is_error);
        assert!(!outcome.payload.has_results());
    }

    #[tokio::test]
    async fn test_manager_failure_discards_partial_results() {
        let router = MockLlmProvider::new(vec![Ok(LlmResponse::with_tool_calls(
            vec![
                call("r1", "inventoryAgent", json!({"instructions": "low stock"})),
                call("r2", "fleetAgent", json!({"instructions": "trucks"})),
            ],
            "mock",
        ))]);
        let manager = MockLlmProvider::new(vec![Ok(LlmResponse::with_tool_calls(
            vec![call("c1", "low_stock_items", json!({}))],
            "mock",
        ))]);
        let (scope, _rx) = scope("acme_3pl");
        let outcome = stage(router, manager, Arc::new(StaticBackend::empty()))
            .run(vec![Message::user("stock and trucks")], &scope)
            .await;
        assert!(outcome.is_error);
        assert!(outcome.error.unwrap().contains("fleetAgent"));
        assert!(outcome.payload.tool_calls.is_empty());
    }

    #[test]
    fn test_instructions_of() {
        assert_eq!(
            instructions_of(&call("a", "orderAgent", json!({"instructions": " late orders "}))),
            Some("late orders")
        );
        assert_eq!(instructions_of(&call("a", "orderAgent", json!({}))), None);
    }
}

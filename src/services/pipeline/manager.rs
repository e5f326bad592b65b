//! Manager Stage
//!
//! A domain manager turns natural-language instructions into analytics tool
//! calls. The first round must call at least one tool; domains with a
//! follow-up budget get further rounds in which the model may look up
//! details it discovered, or stop.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use dockside_llm::{LlmError, LlmProvider, LlmRequestOptions, Message, MessageContent, MessageRole, ToolCall};
use dockside_tools::{invoke_all, ToolResult};

use super::domains::DomainTable;
use super::outcome::{Stage, StageOutcome};
use super::TurnScope;
use crate::models::chat::ToolCallPart;
use crate::services::trace::TraceKind;
use crate::services::ui_stream::UiFragment;
use crate::utils::error::{AppError, AppResult};

/// Tool traffic of one manager, index-aligned: `tool_results[i]` answers
/// `tool_calls[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerOutput {
    pub tool_calls: Vec<ToolCallPart>,
    pub tool_results: Vec<ToolResult>,
}

pub struct ManagerStage {
    provider: Arc<dyn LlmProvider>,
    domains: Arc<DomainTable>,
}

impl ManagerStage {
    pub fn new(provider: Arc<dyn LlmProvider>, domains: Arc<DomainTable>) -> Self {
        Self { provider, domains }
    }

    pub async fn run(
        &self,
        domain_name: &str,
        instructions: &str,
        scope: &TurnScope,
    ) -> StageOutcome<ManagerOutput> {
        scope.status(Stage::Manager);
        match self.execute(domain_name, instructions, scope).await {
            Ok(output) => StageOutcome::ok(output),
            Err(e) => {
                tracing::warn!(manager = domain_name, error = %e, "manager failed");
                scope
                    .trace_error(
                        TraceKind::StageEnd,
                        Stage::Manager.as_str(),
                        json!({ "manager": domain_name, "error": e.to_string() }),
                    )
                    .await;
                StageOutcome::failed(e.to_string())
            }
        }
    }

    async fn execute(
        &self,
        domain_name: &str,
        instructions: &str,
        scope: &TurnScope,
    ) -> AppResult<ManagerOutput> {
        let profile = self.domains.resolve(domain_name)?;
        let agent = profile.domain.agent_name();
        let mut messages = vec![Message::user(instructions)];
        let mut output = ManagerOutput::default();
        let mut seen: HashSet<String> = HashSet::new();

        for round in 0..profile.follow_up_rounds.max(1) {
            let options = if round == 0 {
                LlmRequestOptions::tools_required()
            } else {
                LlmRequestOptions::default()
            };
            let response = self
                .provider
                .send_message(
                    messages.clone(),
                    Some(profile.system_prompt.clone()),
                    profile.tools.clone(),
                    options,
                )
                .await?;
            scope
                .trace(
                    TraceKind::Generation,
                    agent,
                    json!({ "round": round, "toolCalls": response.tool_calls.len(), "model": response.model }),
                )
                .await;

            if !response.has_tool_calls() {
                if round == 0 {
                    return Err(LlmError::MissingToolCall {
                        message: format!("{} selected no tools", agent),
                    }
                    .into());
                }
                break;
            }

            let calls = with_unique_ids(response.tool_calls, &mut seen);
            let results = invoke_all(&profile.registry, &scope.routing, agent, &calls).await;
            for result in &results {
                scope.ui.emit(UiFragment::ToolActivity {
                    tool_call_id: result.tool_call_id.clone(),
                    tool_name: result.tool_name.clone(),
                    rows: result.rows().len(),
                    is_error: result.is_error,
                });
                scope
                    .trace(
                        TraceKind::ToolCall,
                        &result.tool_name,
                        json!({ "rows": result.rows().len(), "error": result.error }),
                    )
                    .await;
            }
            if let Some(failed) = results.iter().find(|r| r.is_error) {
                return Err(AppError::http(format!(
                    "{} failed: {}",
                    failed.tool_name,
                    failed.error.as_deref().unwrap_or("unknown error")
                )));
            }

            messages.push(Message::tool_calls(&calls));
            messages.push(tool_results_message(&results));
            output.tool_calls.extend(calls.into_iter().map(|c| ToolCallPart {
                tool_call_id: c.id,
                tool_name: c.name,
                args: c.arguments,
            }));
            output.tool_results.extend(results);
        }

        tracing::info!(
            manager = agent,
            calls = output.tool_calls.len(),
            "manager finished"
        );
        Ok(output)
    }
}

/// Replace missing or repeated call ids so every id in a turn is unique.
pub fn with_unique_ids(calls: Vec<ToolCall>, seen: &mut HashSet<String>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() || seen.contains(&call.id) {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
            seen.insert(call.id.clone());
            call
        })
        .collect()
}

fn tool_results_message(results: &[ToolResult]) -> Message {
    Message {
        role: MessageRole::User,
        content: results
            .iter()
            .map(|r| MessageContent::ToolResult {
                tool_use_id: r.tool_call_id.clone(),
                content: r.to_content(),
                is_error: r.is_error.then_some(true),
            })
            .collect(),
    }
}

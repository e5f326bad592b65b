//! File Check Stage
//!
//! One structured-output call deciding whether the user asked for a
//! downloadable file.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use dockside_llm::{generate_object, LlmProvider, Message};

use super::outcome::{Stage, StageOutcome};
use super::prompts::FILE_CHECK_SYSTEM_PROMPT;
use super::TurnScope;
use crate::services::trace::TraceKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileCheckDecision {
    /// Whether the request implies a downloadable artifact
    pub is_file_download_required: bool,
    /// Expected format and content of the file; empty when none is needed
    pub kind_of_file: String,
}

pub struct FileCheckStage {
    provider: Arc<dyn LlmProvider>,
}

impl FileCheckStage {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub async fn run(&self, question: &str, scope: &TurnScope) -> StageOutcome<FileCheckDecision> {
        scope.status(Stage::FileCheck);
        let result = generate_object::<FileCheckDecision>(
            self.provider.as_ref(),
            "file_check",
            Some(FILE_CHECK_SYSTEM_PROMPT.to_string()),
            vec![Message::user(question)],
        )
        .await;

        match result {
            Ok(decision) => {
                scope
                    .trace(
                        TraceKind::Generation,
                        Stage::FileCheck.as_str(),
                        json!(decision),
                    )
                    .await;
                StageOutcome::ok(decision)
            }
            Err(e) => {
                tracing::warn!(error = %e, "file check failed");
                scope
                    .trace_error(
                        TraceKind::Generation,
                        Stage::FileCheck.as_str(),
                        json!({ "error": e.to_string() }),
                    )
                    .await;
                StageOutcome::failed(e.to_string())
            }
        }
    }
}

//! File Programmer Stage
//!
//! The model writes a Python program for the requested file; the sandbox
//! runs it over the analysis dataset and the resulting file is stored in
//! the blob store.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dockside_llm::{generate_object, LlmProvider, Message};

use super::analysis::AnalysisTable;
use super::outcome::{Stage, StageOutcome};
use super::prompts::file_programmer_system_prompt;
use super::TurnScope;
use crate::services::csv_interchange::rows_to_csv;
use crate::services::sandbox::{FileArtifact, SandboxExecutor, SandboxRequest};
use crate::services::trace::TraceKind;
use crate::services::ui_stream::UiFragment;

/// Path generated code reads its dataset from; replaced with the real
/// upload path before execution.
pub const PLACEHOLDER_PATH: &str = "/data/input.csv";

const DATASET_FILE_NAME: &str = "dataset.csv";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedProgram {
    /// Third-party packages the program imports
    pub packages: Vec<String>,
    /// Complete Python source
    pub code: String,
    /// Base name of the produced file, without extension
    pub output_name: String,
}

pub struct FileProgrammerStage {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<SandboxExecutor>,
}

impl FileProgrammerStage {
    pub fn new(provider: Arc<dyn LlmProvider>, executor: Arc<SandboxExecutor>) -> Self {
        Self { provider, executor }
    }

    pub async fn run(
        &self,
        messages: Vec<Message>,
        kind_of_file: &str,
        dataset: &AnalysisTable,
        scope: &TurnScope,
    ) -> StageOutcome<Option<FileArtifact>> {
        if dataset.rows.is_empty() {
            return StageOutcome::failed("There is no data to build the requested file from.");
        }
        scope.status(Stage::FileProgrammer);

        let tenant = match scope.routing.tenant() {
            Ok(t) => t.to_string(),
            Err(e) => return StageOutcome::failed(e.to_string()),
        };

        let mut prompt = messages;
        prompt.push(Message::user(format!(
            "Create this file: {}\nThe dataset has {} rows.",
            kind_of_file,
            dataset.rows.len()
        )));
        let program = match generate_object::<GeneratedProgram>(
            self.provider.as_ref(),
            "file_program",
            Some(file_programmer_system_prompt(PLACEHOLDER_PATH, &dataset.columns())),
            prompt,
        )
        .await
        {
            Ok(p) if !p.code.trim().is_empty() => p,
            Ok(_) => return self.fail(scope, "The generated program was empty.", None).await,
            Err(e) => {
                return self
                    .fail(scope, &format!("Could not generate the file program: {}", e), None)
                    .await
            }
        };

        let rows: Vec<Value> = dataset.rows.iter().cloned().map(Value::Object).collect();
        let csv = match rows_to_csv(&rows, &[]) {
            Ok(csv) => csv,
            Err(e) => return self.fail(scope, &e.to_string(), None).await,
        };

        let request = SandboxRequest {
            tenant,
            chat_id: scope.routing.chat_id.clone(),
            packages: program.packages.clone(),
            code: program.code.clone(),
            placeholder_path: PLACEHOLDER_PATH.to_string(),
            dataset_file_name: DATASET_FILE_NAME.to_string(),
            dataset: csv.into_bytes(),
            output_name: if program.output_name.trim().is_empty() {
                "export".to_string()
            } else {
                program.output_name.clone()
            },
        };

        match self.executor.execute(request).await {
            Ok(file) => {
                scope
                    .trace(
                        TraceKind::StageEnd,
                        Stage::FileProgrammer.as_str(),
                        json!({ "url": file.url, "size": file.size, "packages": program.packages }),
                    )
                    .await;
                scope.ui.emit(UiFragment::FileReady {
                    url: file.url.clone(),
                    description: kind_of_file.to_string(),
                });
                StageOutcome::ok(Some(file))
            }
            Err(failure) => {
                let raw = failure
                    .raw
                    .as_ref()
                    .and_then(|r| serde_json::to_value(r).ok());
                self.fail(
                    scope,
                    &format!("The file could not be created: {}", failure.message),
                    raw.map(|r| json!({ "execution": r, "code": program.code })),
                )
                .await
            }
        }
    }

    async fn fail(
        &self,
        scope: &TurnScope,
        message: &str,
        raw: Option<Value>,
    ) -> StageOutcome<Option<FileArtifact>> {
        tracing::warn!(error = message, "file programmer failed");
        scope
            .trace_error(
                TraceKind::StageEnd,
                Stage::FileProgrammer.as_str(),
                json!({ "error": message, "raw": raw }),
            )
            .await;
        StageOutcome::failed(message)
    }
}

//! Analysis Stage
//!
//! Tool results go to the hosted code interpreter as CSV files, one per
//! tool call. The interpreter's CSV outputs come back as JSON rows, keyed by
//! the file name it gave them. When every tool result is empty the stage
//! does nothing and succeeds.
//!
//! All uploaded and generated files are deleted before the stage returns,
//! whether or not the run succeeded.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use dockside_tools::{ToolCatalog, ToolResult};

use super::outcome::{Stage, StageOutcome};
use super::prompts::{analysis_request, ANALYSIS_INSTRUCTIONS};
use super::TurnScope;
use crate::models::chat::{ChatMessage, MessageBody, Role};
use crate::services::code_interpreter::{CodeInterpreter, FileLease, ThreadMessage};
use crate::services::csv_interchange::{csv_to_rows, rows_to_csv};
use crate::services::trace::TraceKind;
use crate::services::ui_stream::UiFragment;
use crate::utils::error::{AppError, AppResult};

/// Prior turns replayed into the analysis thread.
const MAX_CONTEXT_MESSAGES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisTable {
    pub file_name: String,
    pub rows: Vec<Map<String, Value>>,
}

impl AnalysisTable {
    /// Column names in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub summary: Option<String>,
    pub tables: Vec<AnalysisTable>,
}

impl AnalysisOutput {
    /// Whether the analysis produced any rows.
    pub fn has_data(&self) -> bool {
        self.tables.iter().any(|t| !t.rows.is_empty())
    }

    /// First table with rows.
    pub fn first_dataset(&self) -> Option<&AnalysisTable> {
        self.tables.iter().find(|t| !t.rows.is_empty())
    }
}

/// One CSV file handed to the interpreter
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub file_name: String,
    pub csv: String,
    pub rows: usize,
}

/// CSV datasets for the given tool results. Empty results keep a header row.
pub fn build_datasets(results: &[ToolResult], catalog: &ToolCatalog) -> AppResult<Vec<Dataset>> {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut columns = result.columns();
            if columns.is_empty() {
                columns = catalog.columns_of(&result.tool_name);
            }
            Ok(Dataset {
                file_name: format!("{:02}_{}.csv", i + 1, result.tool_name),
                csv: rows_to_csv(result.rows(), &columns)?,
                rows: result.rows().len(),
            })
        })
        .collect()
}

pub struct AnalysisStage {
    interpreter: Arc<dyn CodeInterpreter>,
    catalog: Arc<ToolCatalog>,
}

impl AnalysisStage {
    pub fn new(interpreter: Arc<dyn CodeInterpreter>, catalog: Arc<ToolCatalog>) -> Self {
        Self {
            interpreter,
            catalog,
        }
    }

    pub async fn run(
        &self,
        question: &str,
        results: &[ToolResult],
        history: &[ChatMessage],
        scope: &TurnScope,
    ) -> StageOutcome<AnalysisOutput> {
        if results.iter().all(ToolResult::is_empty) {
            tracing::debug!("all tool results empty, analysis skipped");
            return StageOutcome::ok(AnalysisOutput::default());
        }
        scope.status(Stage::Analysis);

        let mut lease = FileLease::new(self.interpreter.clone());
        let outcome = self
            .analyze(&mut lease, question, results, history)
            .await;
        let released = lease.release().await;
        tracing::debug!(released, "analysis files released");

        match outcome {
            Ok(output) => {
                let tables: Vec<String> = output.tables.iter().map(|t| t.file_name.clone()).collect();
                scope
                    .trace(
                        TraceKind::StageEnd,
                        Stage::Analysis.as_str(),
                        json!({ "tables": tables, "summary": output.summary }),
                    )
                    .await;
                if !tables.is_empty() {
                    scope.ui.emit(UiFragment::AnalysisReady { tables });
                }
                StageOutcome::ok(output)
            }
            Err(e) => {
                tracing::warn!(error = %e, "analysis failed");
                scope
                    .trace_error(
                        TraceKind::StageEnd,
                        Stage::Analysis.as_str(),
                        json!({ "error": e.to_string() }),
                    )
                    .await;
                StageOutcome::failed(e.to_string())
            }
        }
    }

    async fn analyze(
        &self,
        lease: &mut FileLease,
        question: &str,
        results: &[ToolResult],
        history: &[ChatMessage],
    ) -> AppResult<AnalysisOutput> {
        let datasets = build_datasets(results, &self.catalog)?;
        let mut file_ids = Vec::with_capacity(datasets.len());
        for dataset in &datasets {
            file_ids.push(
                lease
                    .upload(&dataset.file_name, dataset.csv.clone().into_bytes())
                    .await?,
            );
        }

        let names: Vec<String> = datasets.iter().map(|d| d.file_name.clone()).collect();
        let mut messages = thread_context(history);
        messages.push(ThreadMessage::user(analysis_request(question, &names)).with_files(file_ids));

        let thread_id = self.interpreter.create_thread(messages).await?;
        let status = self
            .interpreter
            .run_thread(&thread_id, ANALYSIS_INSTRUCTIONS)
            .await?;
        if !status.is_success() {
            match self.interpreter.list_output_files(&thread_id).await {
                Ok(partial) => {
                    for file in &partial.files {
                        lease.adopt(file.file_id.clone());
                    }
                }
                Err(e) => tracing::debug!(error = %e, "outputs of failed run not listed"),
            }
            return Err(AppError::internal(format!(
                "analysis run ended with status {:?}",
                status
            )));
        }

        let reply = self.interpreter.list_output_files(&thread_id).await?;
        for file in &reply.files {
            lease.adopt(file.file_id.clone());
        }
        let mut output = AnalysisOutput {
            summary: reply.text,
            tables: Vec::new(),
        };
        for file in reply.files {
            if !file.file_name.to_ascii_lowercase().ends_with(".csv") {
                tracing::debug!(file = %file.file_name, "non-csv analysis output ignored");
                continue;
            }
            let bytes = self.interpreter.download_file(&file.file_id).await?;
            let text = String::from_utf8(bytes)
                .map_err(|e| AppError::internal(format!("{} is not utf-8: {}", file.file_name, e)))?;
            output.tables.push(AnalysisTable {
                file_name: file.file_name,
                rows: csv_to_rows(&text)?,
            });
        }
        Ok(output)
    }
}

/// Recent user questions and answers as thread messages.
fn thread_context(history: &[ChatMessage]) -> Vec<ThreadMessage> {
    let messages: Vec<ThreadMessage> = history
        .iter()
        .filter_map(|m| match (&m.role, &m.content) {
            (Role::User, MessageBody::Text { text }) => Some(ThreadMessage::user(text.clone())),
            (_, MessageBody::Answer { text }) => Some(ThreadMessage::assistant(text.clone())),
            _ => None,
        })
        .collect();
    let skip = messages.len().saturating_sub(MAX_CONTEXT_MESSAGES);
    messages.into_iter().skip(skip).collect()
}

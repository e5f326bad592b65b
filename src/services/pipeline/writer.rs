//! Writer Stage
//!
//! Streams the final answer. Text deltas go to the turn's answer artifact
//! and to the UI as they arrive; the artifact is marked done with the full
//! text when the stream ends. On any failure the artifact ends with a fixed
//! fallback message instead.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use dockside_core::{StreamableValue, UnifiedStreamEvent};
use dockside_llm::{LlmProvider, LlmRequestOptions, Message};

use super::outcome::{Stage, StageOutcome};
use super::prompts::WRITER_SYSTEM_PROMPT;
use super::TurnScope;
use crate::services::conversation::drop_duplicate_trailing_assistant;
use crate::services::trace::TraceKind;
use crate::services::ui_stream::UiFragment;

/// Shown when the answer could not be written.
pub const WRITER_FALLBACK: &str =
    "Sorry, I ran into a problem while writing the answer. Please try again.";

pub struct WriterStage {
    provider: Arc<dyn LlmProvider>,
}

impl WriterStage {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        answer: &StreamableValue<String>,
        scope: &TurnScope,
    ) -> StageOutcome<String> {
        scope.status(Stage::Writer);
        drop_duplicate_trailing_assistant(&mut messages);

        let (tx, mut rx) = mpsc::channel::<UnifiedStreamEvent>(64);
        let stream = self.provider.stream_message(
            messages,
            Some(WRITER_SYSTEM_PROMPT.to_string()),
            vec![],
            tx,
            LlmRequestOptions::default(),
        );
        let forward = async {
            let mut streamed = String::new();
            while let Some(event) = rx.recv().await {
                if let UnifiedStreamEvent::TextDelta { content } = event {
                    if answer.append(&content).is_err() {
                        continue;
                    }
                    streamed.push_str(&content);
                    scope.ui.emit(UiFragment::TextDelta { content });
                }
            }
            streamed
        };
        let (result, streamed) = tokio::join!(stream, forward);

        let text = match result {
            Ok(response) => response
                .content
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(streamed),
            Err(e) => return self.fail(answer, scope, e.to_string()).await,
        };
        if text.trim().is_empty() {
            return self
                .fail(answer, scope, "model returned an empty answer".to_string())
                .await;
        }

        if let Err(e) = answer.done(Some(text.clone())) {
            tracing::warn!(error = %e, "answer artifact already finalized");
        }
        scope
            .trace(
                TraceKind::Generation,
                Stage::Writer.as_str(),
                json!({ "chars": text.chars().count() }),
            )
            .await;
        StageOutcome::ok(text)
    }

    async fn fail(
        &self,
        answer: &StreamableValue<String>,
        scope: &TurnScope,
        error: String,
    ) -> StageOutcome<String> {
        tracing::warn!(error = %error, "writer failed");
        if answer.done(Some(WRITER_FALLBACK.to_string())).is_err() {
            tracing::warn!("answer artifact already finalized");
        }
        scope
            .trace_error(
                TraceKind::Generation,
                Stage::Writer.as_str(),
                json!({ "error": error }),
            )
            .await;
        StageOutcome::failed_with(WRITER_FALLBACK.to_string(), error)
    }
}

//! Turn Pipeline
//!
//! The stages a user turn passes through:
//! - Inquiry routes the question to one or more domain managers
//! - Manager runs a bounded tool-calling loop against the analytics backend
//! - Analysis hands the tool results to a code interpreter
//! - FileCheck decides whether a downloadable file was requested
//! - FileProgrammer generates and runs code that produces that file
//! - Writer streams the final answer
//!
//! `TurnOrchestrator` sequences them and owns the conversation for the turn.

pub mod analysis;
pub mod domains;
pub mod file_check;
pub mod file_programmer;
pub mod inquiry;
pub mod manager;
pub mod orchestrator;
pub mod outcome;
pub mod prompts;
pub mod providers;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use serde_json::Value;

use dockside_core::RoutingContext;

use crate::services::trace::{TraceEvent, TraceKind, TraceSink};
use crate::services::ui_stream::{UiFragment, UiStream};

pub use analysis::{AnalysisOutput, AnalysisStage, AnalysisTable};
pub use domains::{DomainProfile, DomainTable};
pub use file_check::{FileCheckDecision, FileCheckStage};
pub use file_programmer::{FileProgrammerStage, GeneratedProgram, PLACEHOLDER_PATH};
pub use inquiry::{InquiryOutput, InquiryStage};
pub use manager::{ManagerOutput, ManagerStage};
pub use orchestrator::{TurnHandle, TurnOrchestrator, TurnRequest, TurnSummary};
pub use outcome::{Stage, StageOutcome};
pub use providers::{ProviderRegistry, StageRole};
pub use writer::{WriterStage, WRITER_FALLBACK};

/// Per-turn handles every stage needs: routing, UI channel and trace sink.
pub struct TurnScope {
    pub turn_id: String,
    pub routing: RoutingContext,
    pub ui: UiStream,
    trace: Arc<dyn TraceSink>,
}

impl TurnScope {
    pub fn new(
        turn_id: impl Into<String>,
        routing: RoutingContext,
        ui: UiStream,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            turn_id: turn_id.into(),
            routing,
            ui,
            trace,
        }
    }

    /// Emit the progress line for a stage.
    pub fn status(&self, stage: Stage) {
        self.ui
            .emit(UiFragment::status(stage.as_str(), stage.status_message()));
    }

    pub async fn trace(&self, kind: TraceKind, name: &str, payload: Value) {
        self.trace
            .record(TraceEvent::new(
                &self.turn_id,
                &self.routing.chat_id,
                kind,
                name,
                payload,
            ))
            .await;
    }

    pub async fn trace_error(&self, kind: TraceKind, name: &str, payload: Value) {
        self.trace
            .record(
                TraceEvent::new(&self.turn_id, &self.routing.chat_id, kind, name, payload)
                    .failed(),
            )
            .await;
    }

    pub fn trace_sink(&self) -> &dyn TraceSink {
        self.trace.as_ref()
    }
}

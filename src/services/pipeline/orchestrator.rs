//! Turn Orchestrator
//!
//! Runs one user turn through the stages in order:
//! Inquiry, Analysis (when tool results exist), FileCheck (when analysis
//! produced data), FileProgrammer (when a file was requested) and Writer.
//!
//! The orchestrator owns the conversation for the duration of the turn.
//! Every path ends with exactly one terminal message (answer or error card),
//! one terminal UI fragment and one persistence write.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{oneshot, watch};

use dockside_core::{ArtifactSnapshot, RoutingContext, StreamableValue};
use dockside_tools::ToolCatalog;

use super::analysis::{AnalysisOutput, AnalysisStage};
use super::domains::DomainTable;
use super::file_check::FileCheckStage;
use super::file_programmer::FileProgrammerStage;
use super::inquiry::InquiryStage;
use super::manager::ManagerStage;
use super::providers::{ProviderRegistry, StageRole};
use super::writer::WriterStage;
use super::TurnScope;
use crate::models::chat::{Chat, ChatMessage, ToolCallPart, ToolResultPart, TurnInput};
use crate::services::code_interpreter::CodeInterpreter;
use crate::services::conversation::ConversationState;
use crate::services::sandbox::{FileArtifact, SandboxExecutor};
use crate::services::trace::{flush_with_retry, TraceKind, TraceSink};
use crate::services::ui_stream::{UiFragment, UiReceiver, UiStream};
use crate::storage::chat_store::ChatStore;

const LOOKUP_FAILED: &str = "I couldn't look up your data for this question. Please try again.";
const HISTORY_INVALID: &str = "Something went wrong while recording this turn. Please try again.";

/// Tool name of the synthetic exchange recording analysis output.
pub const ANALYSIS_TOOL: &str = "analysis";
/// Tool name of the synthetic exchange recording a produced file.
pub const CREATE_FILE_TOOL: &str = "createFile";

/// Everything needed to run one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub routing: RoutingContext,
    /// Conversation before this turn, already truncated for retry or edit
    pub prior: Vec<ChatMessage>,
    pub input: TurnInput,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub turn_id: String,
    pub chat_id: String,
    pub is_error: bool,
    /// The single terminal message appended by this turn
    pub terminal: ChatMessage,
    pub file: Option<FileArtifact>,
    /// Full conversation after the turn
    pub messages: Vec<ChatMessage>,
    pub persisted: bool,
}

/// Subscriber side of a running turn.
#[derive(Debug)]
pub struct TurnHandle {
    pub turn_id: String,
    pub fragments: UiReceiver,
    pub answer: watch::Receiver<ArtifactSnapshot<String>>,
    pub done: oneshot::Receiver<TurnSummary>,
}

enum Terminal {
    Answer(String),
    Error(String),
}

pub struct TurnOrchestrator {
    inquiry: InquiryStage,
    analysis: AnalysisStage,
    file_check: FileCheckStage,
    file_programmer: FileProgrammerStage,
    writer: WriterStage,
    chats: Arc<dyn ChatStore>,
    trace: Arc<dyn TraceSink>,
    flush_attempts: u32,
    flush_delay: Duration,
}

impl TurnOrchestrator {
    pub fn new(
        providers: &ProviderRegistry,
        catalog: Arc<ToolCatalog>,
        interpreter: Arc<dyn CodeInterpreter>,
        sandbox: Arc<SandboxExecutor>,
        chats: Arc<dyn ChatStore>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        let domains = Arc::new(DomainTable::new(catalog.clone()));
        let manager = Arc::new(ManagerStage::new(providers.get(StageRole::Manager), domains));
        Self {
            inquiry: InquiryStage::new(providers.get(StageRole::Router), manager),
            analysis: AnalysisStage::new(interpreter, catalog),
            file_check: FileCheckStage::new(providers.get(StageRole::Router)),
            file_programmer: FileProgrammerStage::new(providers.get(StageRole::Analysis), sandbox),
            writer: WriterStage::new(providers.get(StageRole::Writer)),
            chats,
            trace,
            flush_attempts: 3,
            flush_delay: Duration::from_millis(500),
        }
    }

    pub fn with_flush_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.flush_attempts = attempts;
        self.flush_delay = delay;
        self
    }

    /// Spawn the turn and return its subscriber handle.
    pub fn start(self: &Arc<Self>, request: TurnRequest) -> TurnHandle {
        self.start_guarded(request, ())
    }

    /// Like `start`, holding `guard` until the turn has been persisted.
    pub fn start_guarded<G: Send + 'static>(
        self: &Arc<Self>,
        request: TurnRequest,
        guard: G,
    ) -> TurnHandle {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let (ui, fragments) = UiStream::channel();
        let answer = StreamableValue::new();
        let answer_rx = answer.subscribe();
        let (done_tx, done_rx) = oneshot::channel();

        let this = Arc::clone(self);
        let id = turn_id.clone();
        tokio::spawn(async move {
            let summary = this.run(&id, request, ui, &answer).await;
            drop(guard);
            if done_tx.send(summary).is_err() {
                tracing::debug!(turn_id = %id, "turn finished with no listener");
            }
        });

        TurnHandle {
            turn_id,
            fragments,
            answer: answer_rx,
            done: done_rx,
        }
    }

    /// Run a turn to completion on the current task.
    pub async fn run(
        &self,
        turn_id: &str,
        request: TurnRequest,
        ui: UiStream,
        answer: &StreamableValue<String>,
    ) -> TurnSummary {
        let TurnRequest {
            routing,
            prior,
            input,
        } = request;
        let question = input.render();
        let prior_len = prior.len();
        let mut conversation = ConversationState::new(prior);
        conversation.push_user(question.clone());

        tracing::info!(turn_id, chat_id = %routing.chat_id, "turn started");
        ui.emit(UiFragment::TurnStarted {
            turn_id: turn_id.to_string(),
            chat_id: routing.chat_id.clone(),
        });
        let scope = TurnScope::new(turn_id, routing, ui, self.trace.clone());
        scope
            .trace(TraceKind::TurnStart, "turn", json!({ "question": question }))
            .await;
        self.flush(&scope).await;

        let mut file = None;
        let terminal = self
            .drive(&question, prior_len, &mut conversation, answer, &mut file, &scope)
            .await;

        let (terminal_message, fragment, is_error) = match terminal {
            Terminal::Answer(text) => (
                conversation.push_answer(text.clone()).clone(),
                UiFragment::Answer { text },
                false,
            ),
            Terminal::Error(message) => {
                if answer.fail(message.clone()).is_err() {
                    tracing::debug!("answer artifact already finalized");
                }
                (
                    conversation.push_error(message.clone()).clone(),
                    UiFragment::Error {
                        message,
                        retryable: true,
                    },
                    true,
                )
            }
        };
        scope.ui.finish(fragment);

        let messages = conversation.into_messages();
        let persisted = self.persist(&scope.routing, &messages).await;
        scope
            .trace(
                TraceKind::TurnEnd,
                "turn",
                json!({ "isError": is_error, "persisted": persisted, "messages": messages.len() }),
            )
            .await;
        self.flush(&scope).await;
        tracing::info!(turn_id, is_error, persisted, "turn finished");

        TurnSummary {
            turn_id: turn_id.to_string(),
            chat_id: scope.routing.chat_id.clone(),
            is_error,
            terminal: terminal_message,
            file,
            messages,
            persisted,
        }
    }

    async fn drive(
        &self,
        question: &str,
        prior_len: usize,
        conversation: &mut ConversationState,
        answer: &StreamableValue<String>,
        file: &mut Option<FileArtifact>,
        scope: &TurnScope,
    ) -> Terminal {
        let inquiry = match self
            .inquiry
            .run(conversation.to_llm_messages(), scope)
            .await
            .into_result()
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "inquiry stage failed");
                return Terminal::Error(LOOKUP_FAILED.to_string());
            }
        };

        if !inquiry.tool_calls.is_empty() {
            let results = inquiry.tool_results.iter().map(ToolResultPart::from).collect();
            if let Err(e) = conversation.push_tool_exchange(inquiry.tool_calls.clone(), results) {
                tracing::error!(error = %e, "tool exchange rejected");
                return Terminal::Error(HISTORY_INVALID.to_string());
            }
        }

        let analysis = if inquiry.has_results() {
            let history = &conversation.messages()[..prior_len];
            let outcome = self
                .analysis
                .run(question, &inquiry.tool_results, history, scope)
                .await;
            if outcome.is_error {
                tracing::info!(error = ?outcome.error, "continuing without analysis");
            }
            outcome.payload
        } else {
            AnalysisOutput::default()
        };

        if analysis.has_data() {
            if let Err(e) = push_synthetic(
                conversation,
                ANALYSIS_TOOL,
                json!({ "question": question }),
                json!({ "summary": analysis.summary, "tables": analysis.tables }),
            ) {
                tracing::error!(error = %e, "analysis exchange rejected");
                return Terminal::Error(HISTORY_INVALID.to_string());
            }

            let decision = self.file_check.run(question, scope).await;
            if decision.is_error {
                tracing::info!(error = ?decision.error, "file check failed, no file produced");
            }
            let decision = decision.payload;
            if decision.is_file_download_required {
                if let Some(dataset) = analysis.first_dataset() {
                    let produced = self
                        .file_programmer
                        .run(
                            conversation.to_llm_messages(),
                            &decision.kind_of_file,
                            dataset,
                            scope,
                        )
                        .await;
                    match produced.into_result() {
                        Ok(Some(artifact)) => {
                            if let Err(e) = push_synthetic(
                                conversation,
                                CREATE_FILE_TOOL,
                                json!({ "kindOfFile": decision.kind_of_file }),
                                json!({ "url": artifact.url, "mimeType": artifact.mime_type }),
                            ) {
                                tracing::error!(error = %e, "file exchange rejected");
                                return Terminal::Error(HISTORY_INVALID.to_string());
                            }
                            *file = Some(artifact);
                        }
                        Ok(None) => {}
                        Err(e) => return Terminal::Error(e),
                    }
                }
            }
        }

        let written = self
            .writer
            .run(conversation.to_llm_messages(), answer, scope)
            .await;
        if written.is_error {
            Terminal::Error(written.payload)
        } else {
            Terminal::Answer(written.payload)
        }
    }

    async fn flush(&self, scope: &TurnScope) {
        if let Err(e) =
            flush_with_retry(scope.trace_sink(), self.flush_attempts, self.flush_delay).await
        {
            tracing::warn!(error = %e, "trace events not delivered");
        }
    }

    /// Read-modify-write of the chat record; last write wins. The store
    /// refuses to replace a chat owned by another user.
    async fn persist(&self, routing: &RoutingContext, messages: &[ChatMessage]) -> bool {
        let existing = match self.chats.get_chat(&routing.chat_id, &routing.user_id).await {
            Ok(chat) => chat,
            Err(e) => {
                tracing::error!(chat_id = %routing.chat_id, error = %e, "chat load failed");
                return false;
            }
        };
        let mut chat = existing.unwrap_or_else(|| {
            Chat::new(&routing.chat_id, &routing.user_id, &routing.org_type)
        });
        chat.set_messages(messages.to_vec());
        match self.chats.save_chat(&chat).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(chat_id = %routing.chat_id, error = %e, "chat save failed");
                false
            }
        }
    }
}

fn push_synthetic(
    conversation: &mut ConversationState,
    tool_name: &str,
    args: serde_json::Value,
    result: serde_json::Value,
) -> crate::utils::error::AppResult<()> {
    let tool_call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
    conversation.push_tool_exchange(
        vec![ToolCallPart {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.to_string(),
            args,
        }],
        vec![ToolResultPart {
            tool_call_id,
            tool_name: tool_name.to_string(),
            result,
            is_error: false,
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::MessageBody;
    use crate::services::code_interpreter::{RunStatus, ThreadMessage, ThreadOutput};
    use crate::services::pipeline::test_support::{MockLlmProvider, ScriptedSandbox, StaticBackend};
    use crate::services::pipeline::WRITER_FALLBACK;
    use crate::services::trace::MemoryTraceSink;
    use crate::storage::blob_store::MemoryBlobStore;
    use crate::storage::chat_store::MemoryChatStore;
    use crate::utils::error::{AppError, AppResult};
    use async_trait::async_trait;
    use dockside_llm::{LlmError, LlmResponse, ToolCall};

    /// Interpreter that is never expected to be reached.
    struct UnusedInterpreter;

    #[async_trait]
    impl CodeInterpreter for UnusedInterpreter {
        async fn upload_file(&self, _name: &str, _bytes: Vec<u8>) -> AppResult<String> {
            Err(AppError::internal("unexpected upload"))
        }
        async fn create_thread(&self, _messages: Vec<ThreadMessage>) -> AppResult<String> {
            Err(AppError::internal("unexpected thread"))
        }
        async fn run_thread(&self, _thread_id: &str, _instructions: &str) -> AppResult<RunStatus> {
            Err(AppError::internal("unexpected run"))
        }
        async fn list_output_files(&self, _thread_id: &str) -> AppResult<ThreadOutput> {
            Err(AppError::internal("unexpected listing"))
        }
        async fn download_file(&self, _file_id: &str) -> AppResult<Vec<u8>> {
            Err(AppError::internal("unexpected download"))
        }
        async fn delete_file(&self, _file_id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    fn route(manager: &str) -> LlmResponse {
        LlmResponse::with_tool_calls(
            vec![ToolCall {
                id: "route_1".into(),
                name: manager.into(),
                arguments: json!({ "instructions": "find orders needing attention" }),
            }],
            "mock",
        )
    }

    fn query(tool: &str) -> LlmResponse {
        LlmResponse::with_tool_calls(
            vec![ToolCall {
                id: "call_1".into(),
                name: tool.into(),
                arguments: json!({}),
            }],
            "mock",
        )
    }

    fn orchestrator(
        responses: Vec<Result<LlmResponse, LlmError>>,
        chats: Arc<MemoryChatStore>,
        trace: Arc<MemoryTraceSink>,
    ) -> TurnOrchestrator {
        let provider = Arc::new(MockLlmProvider::new(responses));
        let catalog = Arc::new(ToolCatalog::new(Arc::new(StaticBackend::empty())));
        let sandbox = Arc::new(SandboxExecutor::new(
            Arc::new(ScriptedSandbox::succeeding()),
            Arc::new(MemoryBlobStore::new()),
        ));
        TurnOrchestrator::new(
            &ProviderRegistry::uniform(provider),
            catalog,
            Arc::new(UnusedInterpreter),
            sandbox,
            chats,
            trace,
        )
        .with_flush_policy(1, Duration::from_millis(1))
    }

    fn request(text: &str) -> TurnRequest {
        TurnRequest {
            routing: RoutingContext::new("acme_3pl", "3pl", "chat-1", "user-1"),
            prior: vec![],
            input: TurnInput::text(text),
        }
    }

    #[tokio::test]
    async fn test_empty_results_skip_analysis_and_answer() {
        let chats = Arc::new(MemoryChatStore::new());
        let trace = Arc::new(MemoryTraceSink::new());
        let orchestrator = orchestrator(
            vec![
                Ok(route("orderAgent")),
                Ok(query("orders_requiring_attention")),
                Ok(LlmResponse::text("done", "mock")),
                Ok(LlmResponse::text("No orders currently require attention.", "mock")),
            ],
            chats.clone(),
            trace.clone(),
        );
        let (ui, _rx) = UiStream::channel();
        let answer = StreamableValue::new();
        let summary = orchestrator
            .run("turn-1", request("What orders need attention?"), ui, &answer)
            .await;

        assert!(!summary.is_error);
        assert!(summary.persisted);
        assert!(summary.file.is_none());
        let kinds: Vec<&str> = summary.messages.iter().map(ChatMessage::kind).collect();
        assert_eq!(kinds, vec!["text", "tool-call", "tool-result", "answer"]);
        assert!(answer.snapshot().done);

        let saved = chats.get_chat("chat-1", "user-1").await.unwrap().unwrap();
        assert_eq!(saved.messages.len(), 4);
        assert_eq!(saved.title, "What orders need attention?");
    }

    #[tokio::test]
    async fn test_foreign_chat_is_not_overwritten() {
        let chats = Arc::new(MemoryChatStore::new());
        let mut owned = Chat::new("chat-1", "user-a", "3pl");
        owned.set_messages(vec![
            ChatMessage::user("How many returns last week?"),
            ChatMessage::answer("Twelve."),
        ]);
        chats.save_chat(&owned).await.unwrap();

        let orchestrator = orchestrator(vec![], chats.clone(), Arc::new(MemoryTraceSink::new()));
        let mut intruding = request("What orders need attention?");
        intruding.routing = RoutingContext::new("acme_3pl", "3pl", "chat-1", "user-b");
        let (ui, _rx) = UiStream::channel();
        let summary = orchestrator
            .run("turn-1", intruding, ui, &StreamableValue::new())
            .await;

        assert!(!summary.persisted);
        let kept = chats.get_chat("chat-1", "user-a").await.unwrap().unwrap();
        assert_eq!(kept.messages, owned.messages);
        assert!(chats.get_chat("chat-1", "user-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inquiry_failure_ends_with_error_card() {
        let chats = Arc::new(MemoryChatStore::new());
        let trace = Arc::new(MemoryTraceSink::new());
        let orchestrator = orchestrator(
            vec![Err(LlmError::NetworkError {
                message: "connection reset".into(),
            })],
            chats.clone(),
            trace.clone(),
        );
        let (ui, mut rx) = UiStream::channel();
        let answer = StreamableValue::new();
        let summary = orchestrator
            .run("turn-1", request("orders?"), ui, &answer)
            .await;

        assert!(summary.is_error);
        assert_eq!(summary.messages.len(), 2);
        assert!(matches!(
            summary.terminal.content,
            MessageBody::Error { retryable: true, .. }
        ));
        let snapshot = answer.snapshot();
        assert!(snapshot.done);
        assert!(snapshot.error.is_some());

        let mut terminals = 0;
        while let Ok(fragment) = rx.try_recv() {
            if fragment.is_terminal() {
                terminals += 1;
            }
        }
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_trace_flushed_before_stages() {
        let chats = Arc::new(MemoryChatStore::new());
        let trace = Arc::new(MemoryTraceSink::new());
        let orchestrator = orchestrator(vec![], chats, trace.clone());
        let (ui, _rx) = UiStream::channel();
        orchestrator
            .run("turn-1", request("hello"), ui, &StreamableValue::new())
            .await;

        let flushed = trace.flushed();
        assert_eq!(flushed[0].kind, TraceKind::TurnStart);
        assert!(trace.flush_calls() >= 2);
    }

    #[tokio::test]
    async fn test_writer_failure_is_terminal_error() {
        let chats = Arc::new(MemoryChatStore::new());
        let orchestrator = orchestrator(
            vec![
                Ok(route("orderAgent")),
                Ok(query("orders_requiring_attention")),
                Ok(LlmResponse::text("done", "mock")),
                Err(LlmError::ServerError {
                    message: "overloaded".into(),
                    status: Some(529),
                }),
            ],
            chats,
            Arc::new(MemoryTraceSink::new()),
        );
        let (ui, _rx) = UiStream::channel();
        let summary = orchestrator
            .run("turn-1", request("orders?"), ui, &StreamableValue::new())
            .await;
        assert!(summary.is_error);
        assert_eq!(summary.terminal.text(), Some(WRITER_FALLBACK));
        assert_eq!(summary.messages.iter().filter(|m| m.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_start_resolves_done() {
        let chats = Arc::new(MemoryChatStore::new());
        let orchestrator = Arc::new(orchestrator(
            vec![],
            chats,
            Arc::new(MemoryTraceSink::new()),
        ));
        let handle = orchestrator.start(request("hello"));
        let summary = handle.done.await.unwrap();
        assert_eq!(summary.turn_id, handle.turn_id);
        assert!(summary.is_error);
    }
}

//! Shared test doubles for the integration suite.
//!
//! Every double implements the production trait so the whole pipeline runs
//! unchanged through `TurnOrchestrator`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use dockside::services::code_interpreter::{
    CodeInterpreter, OutputFile, RunStatus, ThreadMessage, ThreadOutput,
};
use dockside::services::pipeline::{ProviderRegistry, TurnOrchestrator, TurnRequest};
use dockside::services::sandbox::{
    CellError, CellResult, Execution, SandboxExecutor, SandboxProvider, SandboxSession,
};
use dockside::services::trace::MemoryTraceSink;
use dockside::storage::blob_store::MemoryBlobStore;
use dockside::storage::chat_store::MemoryChatStore;
use dockside::{AppError, AppResult};
use dockside::models::chat::TurnInput;
use dockside_core::{RoutingContext, UnifiedStreamEvent};
use dockside_llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig,
    ToolCall, ToolDefinition,
};
use dockside_tools::{AnalyticsBackend, AnalyticsQuery, QueryRows, ToolCatalog, ToolInvokeError};

// ============================================================================
// LLM
// ============================================================================

/// Replays scripted responses in call order.
pub struct ScriptedLlm {
    responses: Mutex<Vec<LlmResult<LlmResponse>>>,
    calls: AtomicU32,
    config: ProviderConfig,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<LlmResult<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicU32::new(0),
            config: ProviderConfig::default(),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next(&self) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Other {
                message: "No more mock responses available".to_string(),
            });
        }
        responses.remove(0)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn send_message(
        &self,
        _messages: Vec<Message>,
        _system: Option<String>,
        _tools: Vec<ToolDefinition>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.next()
    }

    async fn stream_message(
        &self,
        _messages: Vec<Message>,
        _system: Option<String>,
        _tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let response = self.next()?;
        if let Some(text) = &response.content {
            for chunk in text.split_inclusive(' ') {
                let _ = tx
                    .send(UnifiedStreamEvent::TextDelta {
                        content: chunk.to_string(),
                    })
                    .await;
            }
        }
        Ok(response)
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> LlmResponse {
    LlmResponse::with_tool_calls(
        vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }],
        "scripted",
    )
}

pub fn route_to(manager: &str, instructions: &str) -> LlmResponse {
    tool_call("route_1", manager, json!({ "instructions": instructions }))
}

pub fn text(content: &str) -> LlmResponse {
    LlmResponse::text(content, "scripted")
}

// ============================================================================
// Analytics backend
// ============================================================================

/// Fixed rows per pipe; records every query it receives.
#[derive(Default)]
pub struct FixtureBackend {
    rows: HashMap<String, Vec<Map<String, Value>>>,
    queries: Mutex<Vec<AnalyticsQuery>>,
}

impl FixtureBackend {
    pub fn with_rows(mut self, pipe: &str, rows: Vec<Value>) -> Self {
        self.rows.insert(
            pipe.to_string(),
            rows.into_iter().filter_map(|r| r.as_object().cloned()).collect(),
        );
        self
    }

    pub fn queries(&self) -> Vec<AnalyticsQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsBackend for FixtureBackend {
    async fn query(&self, query: &AnalyticsQuery) -> Result<QueryRows, ToolInvokeError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(QueryRows {
            data: self.rows.get(&query.pipe).cloned().unwrap_or_default(),
            meta: vec![],
        })
    }
}

// ============================================================================
// Code interpreter
// ============================================================================

/// Returns one CSV output file; tracks uploads and deletions.
pub struct FakeInterpreter {
    output_csv: String,
    fail_run: bool,
    uploads: AtomicU32,
    deleted: Mutex<Vec<String>>,
}

impl FakeInterpreter {
    pub fn returning(output_csv: &str) -> Self {
        Self {
            output_csv: output_csv.to_string(),
            fail_run: false,
            uploads: AtomicU32::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_run: true,
            ..Self::returning("")
        }
    }

    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeInterpreter for FakeInterpreter {
    async fn upload_file(&self, _file_name: &str, _bytes: Vec<u8>) -> AppResult<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("file-in-{}", n))
    }

    async fn create_thread(&self, _messages: Vec<ThreadMessage>) -> AppResult<String> {
        Ok("thread-1".to_string())
    }

    async fn run_thread(&self, _thread_id: &str, _instructions: &str) -> AppResult<RunStatus> {
        if self.fail_run {
            return Err(AppError::http("run creation returned HTTP 500"));
        }
        Ok(RunStatus::Completed)
    }

    async fn list_output_files(&self, _thread_id: &str) -> AppResult<ThreadOutput> {
        Ok(ThreadOutput {
            text: Some("Summary of the attached data.".to_string()),
            files: vec![OutputFile {
                file_id: "file-out-0".to_string(),
                file_name: "result.csv".to_string(),
            }],
        })
    }

    async fn download_file(&self, _file_id: &str) -> AppResult<Vec<u8>> {
        Ok(self.output_csv.clone().into_bytes())
    }

    async fn delete_file(&self, file_id: &str) -> AppResult<()> {
        self.deleted.lock().unwrap().push(file_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Sandbox
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    Succeed,
    Raise,
    /// `run_code` itself fails, as if the transport broke mid-execution
    Throw,
}

pub struct CountingSandbox {
    mode: SandboxMode,
    created: Arc<AtomicU32>,
    closed: Arc<AtomicU32>,
}

impl CountingSandbox {
    pub fn new(mode: SandboxMode) -> Self {
        Self {
            mode,
            created: Arc::new(AtomicU32::new(0)),
            closed: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

struct CountingSession {
    mode: SandboxMode,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl SandboxProvider for CountingSandbox {
    async fn create(&self, _env: HashMap<String, String>) -> AppResult<Box<dyn SandboxSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSession {
            mode: self.mode,
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl SandboxSession for CountingSession {
    fn id(&self) -> &str {
        "sbx-test"
    }

    async fn install(&self, _packages: &[String]) -> AppResult<()> {
        Ok(())
    }

    async fn upload(&self, file_name: &str, _bytes: Vec<u8>) -> AppResult<String> {
        Ok(format!("/home/user/{}", file_name))
    }

    async fn run_code(&self, _code: &str) -> AppResult<Execution> {
        match self.mode {
            SandboxMode::Succeed => Ok(Execution {
                results: vec![CellResult {
                    text: Some("'data:text/csv;base64,c2t1LG9uX2hhbmQKQS0xLDIK'".to_string()),
                    is_main_result: true,
                }],
                ..Default::default()
            }),
            SandboxMode::Raise => Ok(Execution {
                error: Some(CellError {
                    name: "KeyError".to_string(),
                    value: "'period'".to_string(),
                    traceback: String::new(),
                }),
                ..Default::default()
            }),
            SandboxMode::Throw => Err(AppError::sandbox("connection reset during execution")),
        }
    }

    async fn close(&self) -> AppResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub llm: Arc<ScriptedLlm>,
    pub backend: Arc<FixtureBackend>,
    pub interpreter: Arc<FakeInterpreter>,
    pub sandbox: Arc<CountingSandbox>,
    pub blob: Arc<MemoryBlobStore>,
    pub chats: Arc<MemoryChatStore>,
    pub trace: Arc<MemoryTraceSink>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

impl Harness {
    pub fn new(
        responses: Vec<LlmResult<LlmResponse>>,
        backend: FixtureBackend,
        interpreter: FakeInterpreter,
        sandbox: SandboxMode,
    ) -> Self {
        let llm = Arc::new(ScriptedLlm::new(responses));
        let backend = Arc::new(backend);
        let interpreter = Arc::new(interpreter);
        let sandbox = Arc::new(CountingSandbox::new(sandbox));
        let blob = Arc::new(MemoryBlobStore::new());
        let chats = Arc::new(MemoryChatStore::new());
        let trace = Arc::new(MemoryTraceSink::new());

        let orchestrator = TurnOrchestrator::new(
            &ProviderRegistry::uniform(llm.clone()),
            Arc::new(ToolCatalog::new(backend.clone())),
            interpreter.clone(),
            Arc::new(SandboxExecutor::new(sandbox.clone(), blob.clone())),
            chats.clone(),
            trace.clone(),
        )
        .with_flush_policy(2, Duration::from_millis(1));

        Self {
            llm,
            backend,
            interpreter,
            sandbox,
            blob,
            chats,
            trace,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub fn acme_request(question: &str) -> TurnRequest {
    TurnRequest {
        routing: RoutingContext::new("acme_3pl", "3pl", "chat-acme", "user-1"),
        prior: vec![],
        input: TurnInput::text(question),
    }
}

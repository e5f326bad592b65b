//! Test doubles shared by the pipeline stage tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use dockside_core::{RoutingContext, UnifiedStreamEvent};
use dockside_llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig,
    ToolDefinition,
};
use dockside_tools::{AnalyticsBackend, AnalyticsQuery, QueryRows, ToolInvokeError};

use super::TurnScope;
use crate::services::sandbox::{
    CellError, CellResult, Execution, SandboxProvider, SandboxSession,
};
use crate::services::trace::NoopTraceSink;
use crate::services::ui_stream::{UiReceiver, UiStream};
use crate::utils::error::AppResult;

pub fn scope(tenant: &str) -> (TurnScope, UiReceiver) {
    let (ui, rx) = UiStream::channel();
    let routing = RoutingContext::new(tenant, "3pl", "chat-1", "user-1");
    (
        TurnScope::new("turn-1", routing, ui, Arc::new(NoopTraceSink)),
        rx,
    )
}

/// Pops scripted responses in order; streams text replies word by word.
pub struct MockLlmProvider {
    responses: Mutex<Vec<LlmResult<LlmResponse>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    response_format: bool,
    config: ProviderConfig,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<LlmResult<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            response_format: false,
            config: ProviderConfig::default(),
        }
    }

    pub fn with_response_format(mut self) -> Self {
        self.response_format = true;
        self
    }

    pub fn last_request_len(&self) -> Option<usize> {
        self.requests.lock().unwrap().last().map(Vec::len)
    }

    fn next(&self, messages: Vec<Message>) -> LlmResult<LlmResponse> {
        self.requests.lock().unwrap().push(messages);
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
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn supports_response_format(&self) -> bool {
        self.response_format
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _tools: Vec<ToolDefinition>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.next(messages)
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let response = self.next(messages)?;
        if let Some(text) = &response.content {
            for word in text.split_inclusive(' ') {
                let _ = tx
                    .send(UnifiedStreamEvent::TextDelta {
                        content: word.to_string(),
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

/// Analytics backend returning fixed rows per pipe and recording tenants.
#[derive(Default)]
pub struct StaticBackend {
    rows: HashMap<String, Vec<Map<String, Value>>>,
    tenants: Mutex<Vec<String>>,
}

impl StaticBackend {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, pipe: &str, rows: Vec<Value>) -> Self {
        self.rows.insert(
            pipe.to_string(),
            rows.into_iter().filter_map(|r| r.as_object().cloned()).collect(),
        );
        self
    }

    pub fn tenants(&self) -> Vec<String> {
        self.tenants.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsBackend for StaticBackend {
    async fn query(&self, query: &AnalyticsQuery) -> Result<QueryRows, ToolInvokeError> {
        if let Some(tenant) = query.tenant() {
            self.tenants.lock().unwrap().push(tenant.to_string());
        }
        Ok(QueryRows {
            data: self.rows.get(&query.pipe).cloned().unwrap_or_default(),
            meta: vec![],
        })
    }
}

/// Sandbox whose sessions either return a CSV data URI or raise.
pub struct ScriptedSandbox {
    error: Option<(String, String)>,
    created: Arc<AtomicU32>,
    closed: Arc<AtomicU32>,
}

impl ScriptedSandbox {
    pub fn succeeding() -> Self {
        Self {
            error: None,
            created: Arc::new(AtomicU32::new(0)),
            closed: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn raising(name: &str, value: &str) -> Self {
        Self {
            error: Some((name.to_string(), value.to_string())),
            ..Self::succeeding()
        }
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    error: Option<(String, String)>,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl SandboxProvider for ScriptedSandbox {
    async fn create(&self, _env: HashMap<String, String>) -> AppResult<Box<dyn SandboxSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            error: self.error.clone(),
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl SandboxSession for ScriptedSession {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn install(&self, _packages: &[String]) -> AppResult<()> {
        Ok(())
    }

    async fn upload(&self, file_name: &str, _bytes: Vec<u8>) -> AppResult<String> {
        Ok(format!("/home/user/{}", file_name))
    }

    async fn run_code(&self, _code: &str) -> AppResult<Execution> {
        Ok(match &self.error {
            Some((name, value)) => Execution {
                error: Some(CellError {
                    name: name.clone(),
                    value: value.clone(),
                    traceback: String::new(),
                }),
                ..Default::default()
            },
            None => Execution {
                results: vec![CellResult {
                    text: Some("data:text/csv;base64,c2t1ClMtMAo=".into()),
                    is_main_result: true,
                }],
                ..Default::default()
            },
        })
    }

    async fn close(&self) -> AppResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

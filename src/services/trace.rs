//! Turn Tracing
//!
//! Structured trace events for each turn, sent to an LLM-observability
//! ingestion endpoint. The orchestrator flushes right after the user message
//! is recorded so a turn that dies mid-way is still visible.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::settings::TraceConfig;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceKind {
    TurnStart,
    StageStart,
    StageEnd,
    Generation,
    ToolCall,
    TurnEnd,
}

/// One trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub id: String,
    pub turn_id: String,
    pub chat_id: String,
    pub kind: TraceKind,
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(
        turn_id: impl Into<String>,
        chat_id: impl Into<String>,
        kind: TraceKind,
        name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turn_id: turn_id.into(),
            chat_id: chat_id.into(),
            kind,
            name: name.into(),
            payload,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(mut self) -> Self {
        self.is_error = true;
        self
    }
}

/// Destination for trace events
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Buffer one event. Never fails the caller.
    async fn record(&self, event: TraceEvent);

    /// Deliver buffered events.
    async fn flush(&self) -> AppResult<()>;
}

/// Flush with a bounded number of attempts and a fixed delay between them.
pub async fn flush_with_retry(sink: &dyn TraceSink, attempts: u32, delay: Duration) -> AppResult<()> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match sink.flush().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "trace flush failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| AppError::internal("trace flush failed")))
}

/// Discards everything
pub struct NoopTraceSink;

#[async_trait]
impl TraceSink for NoopTraceSink {
    async fn record(&self, _event: TraceEvent) {}

    async fn flush(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Keeps events in memory; flushes can be made to fail a set number of times.
#[derive(Default)]
pub struct MemoryTraceSink {
    pending: Mutex<Vec<TraceEvent>>,
    flushed: Mutex<Vec<TraceEvent>>,
    flush_calls: AtomicU32,
    failures_left: AtomicU32,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` flushes.
    pub fn failing(n: u32) -> Self {
        let sink = Self::default();
        sink.failures_left.store(n, Ordering::SeqCst);
        sink
    }

    pub fn flush_calls(&self) -> u32 {
        self.flush_calls.load(Ordering::SeqCst)
    }

    /// All events seen, flushed first.
    pub fn events(&self) -> Vec<TraceEvent> {
        let mut all = self.flushed.lock().map(|v| v.clone()).unwrap_or_default();
        all.extend(self.pending.lock().map(|v| v.clone()).unwrap_or_default());
        all
    }

    pub fn flushed(&self) -> Vec<TraceEvent> {
        self.flushed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn record(&self, event: TraceEvent) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(event);
        }
    }

    async fn flush(&self) -> AppResult<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(AppError::http("trace ingestion unavailable"));
        }
        let drained: Vec<TraceEvent> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return Err(AppError::internal("trace buffer poisoned")),
        };
        if let Ok(mut flushed) = self.flushed.lock() {
            flushed.extend(drained);
        }
        Ok(())
    }
}

/// Batched POST to an ingestion endpoint with basic credentials
pub struct HttpTraceSink {
    client: reqwest::Client,
    endpoint: String,
    public_key: String,
    secret_key: String,
    pending: tokio::sync::Mutex<Vec<TraceEvent>>,
}

impl HttpTraceSink {
    pub fn new(config: &TraceConfig) -> AppResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| AppError::config("tracing.endpoint is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_key: config.public_key.clone().unwrap_or_default(),
            secret_key: config.secret_key.clone().unwrap_or_default(),
            pending: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    fn batch_body(events: &[TraceEvent]) -> Value {
        let batch: Vec<Value> = events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "type": "event-create",
                    "timestamp": e.timestamp.to_rfc3339(),
                    "body": {
                        "traceId": e.turn_id,
                        "sessionId": e.chat_id,
                        "name": e.name,
                        "metadata": { "kind": e.kind },
                        "input": e.payload,
                        "level": if e.is_error { "ERROR" } else { "DEFAULT" },
                    }
                })
            })
            .collect();
        serde_json::json!({ "batch": batch })
    }
}

#[async_trait]
impl TraceSink for HttpTraceSink {
    async fn record(&self, event: TraceEvent) {
        self.pending.lock().await.push(event);
    }

    async fn flush(&self) -> AppResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/api/public/ingestion", self.endpoint))
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&Self::batch_body(&pending))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::http(format!(
                "trace ingestion returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        tracing::debug!(events = pending.len(), "trace batch delivered");
        pending.clear();
        Ok(())
    }
}

//! OpenAI Assistants (v2) code interpreter
//!
//! One assistant with the `code_interpreter` tool is created lazily and
//! reused for every run unless `assistant_id` is configured.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use super::{CodeInterpreter, OutputFile, RunStatus, ThreadMessage, ThreadOutput};
use crate::models::settings::CodeInterpreterConfig;
use crate::utils::error::{AppError, AppResult};

const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

const ASSISTANT_INSTRUCTIONS: &str = "You are a data analyst for a third-party logistics provider. \
Use the code interpreter to read the attached CSV files, answer the question, and save any \
restructured tables you produce as CSV files.";

pub struct OpenAiCodeInterpreter {
    client: reqwest::Client,
    config: CodeInterpreterConfig,
    api_key: String,
    assistant_id: OnceCell<String>,
}

impl OpenAiCodeInterpreter {
    pub fn new(config: CodeInterpreterConfig) -> AppResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::config("code_interpreter.api_key is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let assistant_id = OnceCell::new();
        if let Some(id) = config.assistant_id.clone().filter(|id| !id.is_empty()) {
            let _ = assistant_id.set(id);
        }
        Ok(Self {
            client,
            config,
            api_key,
            assistant_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }

    async fn send_json(&self, request: reqwest::RequestBuilder, what: &str) -> AppResult<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::http(format!(
                "{} returned HTTP {}: {}",
                what,
                status.as_u16(),
                body
            )));
        }
        Ok(response.json().await?)
    }

    async fn assistant(&self) -> AppResult<&str> {
        let id = self
            .assistant_id
            .get_or_try_init(|| async {
                let body = json!({
                    "model": self.config.model,
                    "instructions": ASSISTANT_INSTRUCTIONS,
                    "tools": [{"type": "code_interpreter"}],
                });
                let created = self
                    .send_json(
                        self.request(reqwest::Method::POST, "/assistants").json(&body),
                        "assistant create",
                    )
                    .await?;
                let id = string_field(&created, "id")?;
                tracing::info!(assistant_id = %id, "code interpreter assistant created");
                Ok::<String, AppError>(id)
            })
            .await?;
        Ok(id.as_str())
    }
}

fn string_field(value: &Value, field: &str) -> AppResult<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::http(format!("response is missing `{}`", field)))
}

fn parse_run_status(status: &str) -> Option<RunStatus> {
    match status {
        "completed" => Some(RunStatus::Completed),
        "failed" => Some(RunStatus::Failed),
        "cancelled" => Some(RunStatus::Cancelled),
        "expired" => Some(RunStatus::Expired),
        "incomplete" => Some(RunStatus::Incomplete),
        "requires_action" => Some(RunStatus::RequiresAction),
        _ => None,
    }
}

fn thread_message_body(message: &ThreadMessage) -> Value {
    let mut body = json!({
        "role": message.role,
        "content": message.content,
    });
    if !message.file_ids.is_empty() {
        body["attachments"] = message
            .file_ids
            .iter()
            .map(|id| json!({"file_id": id, "tools": [{"type": "code_interpreter"}]}))
            .collect();
    }
    body
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<Value>,
}

/// Extract the newest assistant message's text and file outputs.
fn parse_thread_output(list: &MessageList) -> ThreadOutput {
    let Some(message) = list
        .data
        .iter()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
    else {
        return ThreadOutput::default();
    };

    let mut texts = Vec::new();
    let mut files: Vec<OutputFile> = Vec::new();
    let mut push_file = |file_id: &str, path: Option<&str>| {
        if files.iter().any(|f| f.file_id == file_id) {
            return;
        }
        let file_name = path
            .and_then(|p| p.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or(file_id)
            .to_string();
        files.push(OutputFile {
            file_id: file_id.to_string(),
            file_name,
        });
    };

    for block in message
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(text) = block.get("text") else {
            continue;
        };
        if let Some(value) = text.get("value").and_then(Value::as_str) {
            texts.push(value.to_string());
        }
        for annotation in text
            .get("annotations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(id) = annotation.pointer("/file_path/file_id").and_then(Value::as_str) {
                push_file(id, annotation.get("text").and_then(Value::as_str));
            }
        }
    }
    for attachment in message
        .get("attachments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(id) = attachment.get("file_id").and_then(Value::as_str) {
            push_file(id, None);
        }
    }

    ThreadOutput {
        text: (!texts.is_empty()).then(|| texts.join("\n")),
        files,
    }
}

#[async_trait]
impl CodeInterpreter for OpenAiCodeInterpreter {
    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> AppResult<String> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("text/csv")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let uploaded = self
            .send_json(
                self.request(reqwest::Method::POST, "/files").multipart(form),
                "file upload",
            )
            .await?;
        string_field(&uploaded, "id")
    }

    async fn create_thread(&self, messages: Vec<ThreadMessage>) -> AppResult<String> {
        let body = json!({
            "messages": messages.iter().map(thread_message_body).collect::<Vec<_>>(),
        });
        let thread = self
            .send_json(
                self.request(reqwest::Method::POST, "/threads").json(&body),
                "thread create",
            )
            .await?;
        string_field(&thread, "id")
    }

    async fn run_thread(&self, thread_id: &str, instructions: &str) -> AppResult<RunStatus> {
        let assistant_id = self.assistant().await?.to_string();
        let run = self
            .send_json(
                self.request(reqwest::Method::POST, &format!("/threads/{}/runs", thread_id))
                    .json(&json!({
                        "assistant_id": assistant_id,
                        "additional_instructions": instructions,
                    })),
                "run create",
            )
            .await?;
        let run_id = string_field(&run, "id")?;

        let deadline = Instant::now() + Duration::from_secs(self.config.run_timeout_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(100));
        loop {
            let current = self
                .send_json(
                    self.request(
                        reqwest::Method::GET,
                        &format!("/threads/{}/runs/{}", thread_id, run_id),
                    ),
                    "run poll",
                )
                .await?;
            let status = current.get("status").and_then(Value::as_str).unwrap_or("");
            if let Some(done) = parse_run_status(status) {
                tracing::debug!(thread_id, run_id = %run_id, ?done, "run finished");
                return Ok(done);
            }
            if Instant::now() >= deadline {
                tracing::warn!(thread_id, run_id = %run_id, "run did not finish before deadline");
                if let Err(e) = self
                    .request(
                        reqwest::Method::POST,
                        &format!("/threads/{}/runs/{}/cancel", thread_id, run_id),
                    )
                    .send()
                    .await
                {
                    tracing::debug!(thread_id, run_id = %run_id, error = %e, "run cancel failed");
                }
                return Ok(RunStatus::TimedOut);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn list_output_files(&self, thread_id: &str) -> AppResult<ThreadOutput> {
        let value = self
            .send_json(
                self.request(
                    reqwest::Method::GET,
                    &format!("/threads/{}/messages?order=desc&limit=20", thread_id),
                ),
                "message list",
            )
            .await?;
        let list: MessageList = serde_json::from_value(value)?;
        Ok(parse_thread_output(&list))
    }

    async fn download_file(&self, file_id: &str) -> AppResult<Vec<u8>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/files/{}/content", file_id))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::http(format!(
                "file download returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete_file(&self, file_id: &str) -> AppResult<()> {
        self.send_json(
            self.request(reqwest::Method::DELETE, &format!("/files/{}", file_id)),
            "file delete",
        )
        .await?;
        Ok(())
    }
}

//! Sandbox Executor
//!
//! Runs one generated program against one dataset:
//!
//! 1. create a session
//! 2. install the declared packages
//! 3. upload the dataset and point the code's placeholder path at it
//! 4. run the code and pick the data-URI payload out of its output
//! 5. decode the payload and store it in the blob store
//!
//! The session is closed exactly once after step 1 succeeds, whatever
//! happens in steps 2-5.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;

use super::{Execution, SandboxProvider, SandboxSession};
use crate::storage::blob_store::{blob_key, BlobStore};
use crate::utils::error::{AppError, AppResult};

/// Input for one sandbox run
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub tenant: String,
    pub chat_id: String,
    pub packages: Vec<String>,
    pub code: String,
    /// Path the generated code reads its input from
    pub placeholder_path: String,
    pub dataset_file_name: String,
    pub dataset: Vec<u8>,
    /// Base name of the stored artifact, without extension
    pub output_name: String,
}

/// File stored for the user
#[derive(Debug, Clone, PartialEq)]
pub struct FileArtifact {
    pub url: String,
    pub key: String,
    pub mime_type: String,
    pub size: usize,
}

/// Failed run, with the raw output kept for tracing
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxFailure {
    pub message: String,
    pub raw: Option<Execution>,
}

impl SandboxFailure {
    fn new(message: impl Into<String>, raw: Option<Execution>) -> Self {
        Self {
            message: message.into(),
            raw,
        }
    }
}

impl From<AppError> for SandboxFailure {
    fn from(err: AppError) -> Self {
        Self::new(err.to_string(), None)
    }
}

/// Decoded `data:` URI
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Parse `data:<mime>[;base64],<payload>`, tolerating surrounding quotes.
pub fn parse_data_uri(raw: &str) -> AppResult<DataUri> {
    let trimmed = raw.trim().trim_matches(|c| c == '\'' || c == '"');
    let rest = trimmed
        .strip_prefix("data:")
        .ok_or_else(|| AppError::sandbox("output is not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| AppError::sandbox("data URI has no payload"))?;

    let mut parts = meta.split(';');
    let mime_type = match parts.next() {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => "text/plain".to_string(),
    };
    let is_base64 = parts.any(|p| p.eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| AppError::sandbox(format!("data URI payload is not base64: {}", e)))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    if bytes.is_empty() {
        return Err(AppError::sandbox("data URI payload is empty"));
    }

    Ok(DataUri { mime_type, bytes })
}

/// The data-URI payload an execution produced: the main result first, then
/// other results, then stdout lines, latest first.
pub fn find_data_uri(execution: &Execution) -> Option<&str> {
    let is_uri = |s: &&str| s.trim().trim_matches(|c| c == '\'' || c == '"').starts_with("data:");
    let main = execution
        .results
        .iter()
        .filter(|r| r.is_main_result)
        .filter_map(|r| r.text.as_deref());
    let others = execution
        .results
        .iter()
        .rev()
        .filter(|r| !r.is_main_result)
        .filter_map(|r| r.text.as_deref());
    let stdout = execution.stdout.iter().rev().flat_map(|s| s.lines().rev());
    main.chain(others).chain(stdout).find(is_uri)
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "text/csv" => "csv",
        "application/json" => "json",
        "application/pdf" => "pdf",
        "image/png" => "png",
        "text/plain" => "txt",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        _ => "bin",
    }
}

pub struct SandboxExecutor {
    provider: Arc<dyn SandboxProvider>,
    blob: Arc<dyn BlobStore>,
}

impl SandboxExecutor {
    pub fn new(provider: Arc<dyn SandboxProvider>, blob: Arc<dyn BlobStore>) -> Self {
        Self { provider, blob }
    }

    pub async fn execute(&self, request: SandboxRequest) -> Result<FileArtifact, SandboxFailure> {
        let env: HashMap<String, String> =
            [("DOCKSIDE_TENANT".to_string(), request.tenant.clone())].into();
        let session = self.provider.create(env).await?;
        let session_id = session.id().to_string();

        let outcome = self.run_in(session.as_ref(), &request).await;

        if let Err(e) = session.close().await {
            tracing::warn!(sandbox_id = %session_id, error = %e, "sandbox close failed");
        }

        match &outcome {
            Ok(file) => tracing::info!(sandbox_id = %session_id, url = %file.url, "sandbox produced file"),
            Err(f) => tracing::warn!(sandbox_id = %session_id, error = %f.message, "sandbox run failed"),
        }
        outcome
    }

    async fn run_in(
        &self,
        session: &dyn SandboxSession,
        request: &SandboxRequest,
    ) -> Result<FileArtifact, SandboxFailure> {
        session.install(&request.packages).await?;

        let path = session
            .upload(&request.dataset_file_name, request.dataset.clone())
            .await?;
        let code = request.code.replace(&request.placeholder_path, &path);

        let execution = session.run_code(&code).await?;
        if let Some(err) = &execution.error {
            return Err(SandboxFailure::new(
                format!("{}: {}", err.name, err.value),
                Some(execution),
            ));
        }

        let raw_uri = match find_data_uri(&execution) {
            Some(uri) => uri.to_string(),
            None => {
                return Err(SandboxFailure::new(
                    "code produced no data URI",
                    Some(execution),
                ))
            }
        };
        let data = match parse_data_uri(&raw_uri) {
            Ok(d) => d,
            Err(e) => return Err(SandboxFailure::new(e.to_string(), Some(execution))),
        };

        let file_name = format!("{}.{}", request.output_name, extension_for(&data.mime_type));
        let key = blob_key(&request.tenant, &request.chat_id, &file_name);
        let size = data.bytes.len();
        let url = self.blob.put(&key, data.bytes, &data.mime_type).await?;

        Ok(FileArtifact {
            url,
            key,
            mime_type: data.mime_type,
            size,
        })
    }
}

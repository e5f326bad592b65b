//! E2B Sandbox Provider
//!
//! Sandboxes are created and killed through the control API. Inside a
//! sandbox, the code interpreter listens on port 49999 (`POST /execute`,
//! NDJSON replies) and the file service on port 49983 (`POST /files`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{CellError, CellResult, Execution, SandboxProvider, SandboxSession};
use crate::models::settings::SandboxConfig;
use crate::utils::error::{AppError, AppResult};

const INTERPRETER_PORT: u16 = 49999;
const FILES_PORT: u16 = 49983;
const USER_HOME: &str = "/home/user";

pub struct E2bSandboxProvider {
    client: reqwest::Client,
    config: SandboxConfig,
    api_key: String,
}

impl E2bSandboxProvider {
    pub fn new(config: SandboxConfig) -> AppResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::config("sandbox.api_key is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

async fn check_status(response: reqwest::Response, what: &str) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::sandbox(format!(
        "{} returned HTTP {}: {}",
        what,
        status.as_u16(),
        body
    )))
}

#[async_trait]
impl SandboxProvider for E2bSandboxProvider {
    async fn create(&self, env: HashMap<String, String>) -> AppResult<Box<dyn SandboxSession>> {
        let response = self
            .client
            .post(format!("{}/sandboxes", self.config.base_url.trim_end_matches('/')))
            .header("X-API-Key", &self.api_key)
            .json(&serde_json::json!({
                "templateID": self.config.template,
                "timeout": self.config.timeout_secs,
                "envVars": env,
            }))
            .send()
            .await?;
        let created: CreatedSandbox = check_status(response, "sandbox create").await?.json().await?;
        tracing::info!(sandbox_id = %created.sandbox_id, "sandbox created");

        Ok(Box::new(E2bSession {
            client: self.client.clone(),
            api_base: self.config.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone(),
            domain: self.config.domain.clone(),
            access_token: created.envd_access_token,
            id: created.sandbox_id,
        }))
    }
}

struct E2bSession {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    domain: String,
    access_token: Option<String>,
    id: String,
}

impl E2bSession {
    fn host_url(&self, port: u16, path: &str) -> String {
        format!("https://{}-{}.{}{}", port, self.id, self.domain, path)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.header("X-Access-Token", token),
            None => request,
        }
    }
}

/// Decode the interpreter's NDJSON reply.
pub fn parse_execution_stream(body: &str) -> Execution {
    let mut execution = Execution::default();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let text = || event.get("text").and_then(Value::as_str).map(str::to_string);
        match event.get("type").and_then(Value::as_str) {
            Some("stdout") => execution.stdout.extend(text()),
            Some("stderr") => execution.stderr.extend(text()),
            Some("result") => execution.results.push(CellResult {
                text: text(),
                is_main_result: event
                    .get("is_main_result")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            Some("error") => {
                execution.error = Some(CellError {
                    name: event
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("Error")
                        .to_string(),
                    value: event
                        .get("value")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    traceback: event
                        .get("traceback")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            _ => {}
        }
    }
    execution
}

/// Builds the `%pip install` line, keeping only `name` or `name==version`
/// specs and single-quoting each one for the shell.
fn pip_install_command(packages: &[String]) -> Option<String> {
    let quoted: Vec<String> = packages
        .iter()
        .map(|p| p.trim())
        .filter(|p| {
            !p.is_empty()
                && !p.starts_with('-')
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_.=[],".contains(c))
        })
        .map(|p| format!("'{}'", p))
        .collect();
    if quoted.is_empty() {
        return None;
    }
    Some(format!("%pip install -q {}", quoted.join(" ")))
}

#[async_trait]
impl SandboxSession for E2bSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn install(&self, packages: &[String]) -> AppResult<()> {
        let Some(command) = pip_install_command(packages) else {
            return Ok(());
        };
        let execution = self.run_code(&command).await?;
        if let Some(err) = execution.error {
            return Err(AppError::sandbox(format!(
                "package install failed: {}: {}",
                err.name, err.value
            )));
        }
        Ok(())
    }

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> AppResult<String> {
        let path = format!("{}/{}", USER_HOME, file_name);
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self
            .client
            .post(self.host_url(FILES_PORT, "/files"))
            .query(&[("path", path.as_str()), ("username", "user")])
            .multipart(form);
        let response = self.authed(request).send().await?;
        check_status(response, "sandbox upload").await?;
        Ok(path)
    }

    async fn run_code(&self, code: &str) -> AppResult<Execution> {
        let request = self
            .client
            .post(self.host_url(INTERPRETER_PORT, "/execute"))
            .json(&serde_json::json!({ "code": code }));
        let response = self.authed(request).send().await?;
        let body = check_status(response, "sandbox execute").await?.text().await?;
        Ok(parse_execution_stream(&body))
    }

    async fn close(&self) -> AppResult<()> {
        let response = self
            .client
            .delete(format!("{}/sandboxes/{}", self.api_base, self.id))
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        check_status(response, "sandbox kill").await?;
        tracing::info!(sandbox_id = %self.id, "sandbox closed");
        Ok(())
    }
}

//! Analytics Backend
//!
//! The remote analytics API is a set of named query endpoints ("pipes").
//! A query is `GET {base}/v0/pipes/{pipe}.json?company_url=..&<filters>`
//! with a bearer token; the reply carries `data` rows and column `meta`.
//!
//! Queries are idempotent reads, so `TinybirdClient` retries transport
//! errors, 429 and 5xx with exponential backoff up to `max_retries` times.
//! Nothing is cached.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolInvokeError;

/// Query parameter carrying the tenant filter.
pub const TENANT_PARAM: &str = "company_url";

/// Query parameter carrying the optional brand filter.
pub const BRAND_PARAM: &str = "brand_id";

/// One query against a named pipe.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsQuery {
    pub pipe: String,
    pub params: Vec<(String, String)>,
}

impl AnalyticsQuery {
    /// Start a query already scoped to `tenant`.
    pub fn scoped(pipe: impl Into<String>, tenant: &str) -> Self {
        Self {
            pipe: pipe.into(),
            params: vec![(TENANT_PARAM.to_string(), tenant.to_string())],
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Value of the first parameter named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The tenant this query is scoped to.
    pub fn tenant(&self) -> Option<&str> {
        self.get(TENANT_PARAM)
    }
}

/// Column metadata returned alongside rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}

/// Rows returned by one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
    #[serde(default)]
    pub meta: Vec<ColumnMeta>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_value(self) -> Value {
        serde_json::json!({
            "data": self.data,
            "meta": self.meta,
        })
    }
}

/// Capability to run tenant-scoped analytics queries.
#[async_trait]
pub trait AnalyticsBackend: Send + Sync {
    async fn query(&self, query: &AnalyticsQuery) -> Result<QueryRows, ToolInvokeError>;
}

/// Connection settings for the analytics API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TinybirdConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

impl Default for TinybirdConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tinybird.co".to_string(),
            token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// HTTP analytics backend.
pub struct TinybirdClient {
    client: reqwest::Client,
    config: TinybirdConfig,
}

impl TinybirdClient {
    pub fn new(config: TinybirdConfig) -> Result<Self, ToolInvokeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ToolInvokeError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Full URL for a query, parameters percent-encoded.
    pub fn query_url(&self, query: &AnalyticsQuery) -> Result<url::Url, ToolInvokeError> {
        let raw = format!(
            "{}/v0/pipes/{}.json",
            self.config.base_url.trim_end_matches('/'),
            query.pipe
        );
        url::Url::parse_with_params(&raw, &query.params)
            .map_err(|e| ToolInvokeError::InvalidArguments(format!("bad query URL: {}", e)))
    }

    async fn query_once(&self, url: &url::Url) -> Result<QueryRows, ToolInvokeError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = self.config.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolInvokeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ToolInvokeError::Decode(e.to_string()))
    }
}

/// Map an attempt's error onto the backoff policy.
fn classify(
    err: ToolInvokeError,
    attempt: u32,
    max_retries: u32,
) -> backoff::Error<ToolInvokeError> {
    if err.is_retryable() && attempt <= max_retries {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

#[async_trait]
impl AnalyticsBackend for TinybirdClient {
    async fn query(&self, query: &AnalyticsQuery) -> Result<QueryRows, ToolInvokeError> {
        if query.tenant().map(str::trim).unwrap_or_default().is_empty() {
            return Err(ToolInvokeError::TenantNotResolved(query.pipe.clone()));
        }

        let url = self.query_url(query)?;
        let max_retries = self.config.max_retries;
        let attempts = AtomicU32::new(0);
        let (url, attempts) = (&url, &attempts);

        let policy = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_interval(Duration::from_secs(4))
            .with_max_elapsed_time(None)
            .build();

        let result = backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            match self.query_once(url).await {
                Ok(rows) => Ok(rows),
                Err(err) => {
                    tracing::warn!(pipe = %query.pipe, attempt, error = %err, "analytics query failed");
                    Err(classify(err, attempt + 1, max_retries))
                }
            }
        })
        .await;

        if let Ok(rows) = &result {
            tracing::debug!(pipe = %query.pipe, rows = rows.data.len(), "analytics query ok");
        }
        result
    }
}

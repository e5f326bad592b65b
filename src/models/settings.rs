//! Settings Models
//!
//! Application configuration stored in `dockside.json`, with secrets
//! overlaid from the environment.

use serde::{Deserialize, Serialize};

use dockside_llm::{ProviderConfig, ProviderType};
use dockside_tools::TinybirdConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub analytics: TinybirdConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub code_interpreter: CodeInterpreterConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub chat_store: ChatStoreConfig,
    #[serde(default)]
    pub tracing: TraceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
        }
    }
}

/// Provider settings per pipeline role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Inquiry stage (manager selection)
    pub router: ProviderConfig,
    /// Domain managers (tool selection)
    pub manager: ProviderConfig,
    /// Structured calls: file check and file programmer
    pub analysis: ProviderConfig,
    /// Final answer streaming
    pub writer: ProviderConfig,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let openai = ProviderConfig::default();
        Self {
            router: openai.clone(),
            manager: openai.clone(),
            analysis: openai.clone(),
            writer: ProviderConfig {
                temperature: 0.4,
                ..openai
            },
        }
    }
}

impl LlmSettings {
    fn roles_mut(&mut self) -> [&mut ProviderConfig; 4] {
        [
            &mut self.router,
            &mut self.manager,
            &mut self.analysis,
            &mut self.writer,
        ]
    }

    fn roles(&self) -> [(&'static str, &ProviderConfig); 4] {
        [
            ("router", &self.router),
            ("manager", &self.manager),
            ("analysis", &self.analysis),
            ("writer", &self.writer),
        ]
    }
}

/// Remote sandbox used by the file programmer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub template: String,
    /// Domain sandbox hosts live under, `{port}-{sandbox_id}.{domain}`
    #[serde(default = "default_sandbox_domain")]
    pub domain: String,
    pub timeout_secs: u64,
}

fn default_sandbox_domain() -> String {
    "e2b.app".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.e2b.dev".to_string(),
            api_key: None,
            template: "code-interpreter-v1".to_string(),
            domain: default_sandbox_domain(),
            timeout_secs: 300,
        }
    }
}

/// Hosted code interpreter used by the analysis stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeInterpreterConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    /// Existing assistant to reuse; one is created on first use otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub poll_interval_ms: u64,
    pub run_timeout_secs: u64,
}

impl Default for CodeInterpreterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            assistant_id: None,
            poll_interval_ms: 1000,
            run_timeout_secs: 180,
        }
    }
}

/// Object storage for generated files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub enabled: bool,
    #[serde(default)]
    pub bucket: String,
    pub region: String,
    /// Path-style endpoint for S3-compatible stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Base of the URLs handed back to users, e.g. a CDN domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            public_base_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStoreBackend {
    #[default]
    Memory,
    Upstash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatStoreConfig {
    #[serde(default)]
    pub backend: ChatStoreBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// LLM trace ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub flush_attempts: u32,
    pub flush_delay_ms: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            public_key: None,
            secret_key: None,
            flush_attempts: 3,
            flush_delay_ms: 500,
        }
    }
}

fn set_if_present(target: &mut Option<String>, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        *target = Some(v);
    }
}

impl AppConfig {
    /// Overlay secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay secrets using `lookup` as the environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let openai_key = lookup("OPENAI_API_KEY");
        let anthropic_key = lookup("ANTHROPIC_API_KEY");
        for role in self.llm.roles_mut() {
            let key = match role.provider {
                ProviderType::OpenAI => openai_key.clone(),
                ProviderType::Anthropic => anthropic_key.clone(),
            };
            set_if_present(&mut role.api_key, key);
        }
        set_if_present(&mut self.code_interpreter.api_key, openai_key);

        set_if_present(&mut self.analytics.token, lookup("TINYBIRD_TOKEN"));
        set_if_present(&mut self.sandbox.api_key, lookup("E2B_API_KEY"));
        set_if_present(&mut self.chat_store.url, lookup("UPSTASH_REDIS_REST_URL"));
        set_if_present(&mut self.chat_store.token, lookup("UPSTASH_REDIS_REST_TOKEN"));
        set_if_present(&mut self.blob.access_key_id, lookup("AWS_ACCESS_KEY_ID"));
        set_if_present(&mut self.blob.secret_access_key, lookup("AWS_SECRET_ACCESS_KEY"));
        set_if_present(&mut self.tracing.public_key, lookup("TRACE_PUBLIC_KEY"));
        set_if_present(&mut self.tracing.secret_key, lookup("TRACE_SECRET_KEY"));
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.trim().is_empty() {
            return Err("server.bind_address cannot be empty".to_string());
        }

        for (role, config) in self.llm.roles() {
            if config.model.trim().is_empty() {
                return Err(format!("llm.{}.model cannot be empty", role));
            }
            if config.timeout_secs == 0 {
                return Err(format!("llm.{}.timeout_secs must be greater than 0", role));
            }
        }

        if self.analytics.base_url.trim().is_empty() {
            return Err("analytics.base_url cannot be empty".to_string());
        }
        if self.analytics.timeout_secs == 0 {
            return Err("analytics.timeout_secs must be greater than 0".to_string());
        }
        if self.analytics.max_retries > 10 {
            return Err("analytics.max_retries cannot exceed 10".to_string());
        }

        if self.sandbox.timeout_secs == 0 {
            return Err("sandbox.timeout_secs must be greater than 0".to_string());
        }
        if self.code_interpreter.run_timeout_secs == 0 {
            return Err("code_interpreter.run_timeout_secs must be greater than 0".to_string());
        }

        if self.blob.enabled && self.blob.bucket.trim().is_empty() {
            return Err("blob.bucket is required when blob storage is enabled".to_string());
        }

        if self.chat_store.backend == ChatStoreBackend::Upstash && self.chat_store.url.is_none() {
            return Err("chat_store.url is required for the upstash backend".to_string());
        }

        if self.tracing.enabled && self.tracing.endpoint.is_none() {
            return Err("tracing.endpoint is required when tracing is enabled".to_string());
        }
        if self.tracing.flush_attempts > 10 {
            return Err("tracing.flush_attempts cannot exceed 10".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analytics.max_retries, 2);
        assert_eq!(config.tracing.flush_attempts, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"server": {"bind_address": "0.0.0.0:9000"}, "chat_store": {"backend": "memory"}}"#,
        )
        .unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.sandbox.template, "code-interpreter-v1");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.llm.writer.model = " ".into();
        assert!(config.validate().unwrap_err().contains("llm.writer.model"));

        let mut config = AppConfig::default();
        config.analytics.max_retries = 11;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.blob.enabled = true;
        assert!(config.validate().unwrap_err().contains("blob.bucket"));

        let mut config = AppConfig::default();
        config.chat_store.backend = ChatStoreBackend::Upstash;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_routes_keys_by_provider() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("TINYBIRD_TOKEN", "tb"),
            ("E2B_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.llm.writer.provider = ProviderType::Anthropic;
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.router.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.llm.writer.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.code_interpreter.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.analytics.token.as_deref(), Some("tb"));
        assert!(config.sandbox.api_key.is_none());
    }
}

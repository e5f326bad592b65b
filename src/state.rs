//! Application State
//!
//! Process-wide service handles, built once from `AppConfig` and shared by
//! every request.

use std::sync::Arc;
use std::time::Duration;

use dockside_tools::{AnalyticsBackend, TinybirdClient, ToolCatalog};

use crate::models::settings::{AppConfig, ChatStoreBackend};
use crate::services::chat_service::ChatService;
use crate::services::code_interpreter::openai::OpenAiCodeInterpreter;
use crate::services::pipeline::{ProviderRegistry, TurnOrchestrator};
use crate::services::sandbox::{E2bSandboxProvider, SandboxExecutor};
use crate::services::trace::{HttpTraceSink, NoopTraceSink, TraceSink};
use crate::storage::blob_store::{BlobStore, MemoryBlobStore, S3BlobStore};
use crate::storage::chat_store::{ChatStore, MemoryChatStore, UpstashChatStore};
use crate::utils::error::{AppError, AppResult};

/// Shared application state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub chats: Arc<ChatService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build every service from configuration.
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let providers = ProviderRegistry::from_settings(&config.llm)?;

        let backend: Arc<dyn AnalyticsBackend> = Arc::new(
            TinybirdClient::new(config.analytics.clone())
                .map_err(|e| AppError::config(e.to_string()))?,
        );
        let catalog = Arc::new(ToolCatalog::new(backend));

        let interpreter = Arc::new(OpenAiCodeInterpreter::new(config.code_interpreter.clone())?);

        let blob: Arc<dyn BlobStore> = if config.blob.enabled {
            Arc::new(S3BlobStore::new(config.blob.clone())?)
        } else {
            tracing::warn!("blob storage disabled, generated files are kept in memory");
            Arc::new(MemoryBlobStore::new())
        };
        let sandbox = Arc::new(SandboxExecutor::new(
            Arc::new(E2bSandboxProvider::new(config.sandbox.clone())?),
            blob,
        ));

        let chat_store: Arc<dyn ChatStore> = match config.chat_store.backend {
            ChatStoreBackend::Memory => Arc::new(MemoryChatStore::new()),
            ChatStoreBackend::Upstash => Arc::new(UpstashChatStore::new(
                config.chat_store.url.clone().unwrap_or_default(),
                config.chat_store.token.clone().unwrap_or_default(),
            )?),
        };

        let trace: Arc<dyn TraceSink> = if config.tracing.enabled {
            Arc::new(HttpTraceSink::new(&config.tracing)?)
        } else {
            Arc::new(NoopTraceSink)
        };

        let orchestrator = TurnOrchestrator::new(
            &providers,
            catalog,
            interpreter,
            sandbox,
            chat_store.clone(),
            trace,
        )
        .with_flush_policy(
            config.tracing.flush_attempts,
            Duration::from_millis(config.tracing.flush_delay_ms),
        );

        Ok(Self::new(
            ChatService::new(chat_store, Arc::new(orchestrator)),
            config,
        ))
    }

    pub fn new(chats: ChatService, config: AppConfig) -> Self {
        Self {
            chats: Arc::new(chats),
            config: Arc::new(config),
        }
    }
}

//! Provider registry
//!
//! Providers are built once per process from `LlmSettings` and shared by
//! every turn.

use std::sync::Arc;

use dockside_llm::{create_provider, LlmProvider};

use crate::models::settings::LlmSettings;
use crate::utils::error::AppResult;

/// Which provider a stage talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    Router,
    Manager,
    Analysis,
    Writer,
}

#[derive(Clone)]
pub struct ProviderRegistry {
    router: Arc<dyn LlmProvider>,
    manager: Arc<dyn LlmProvider>,
    analysis: Arc<dyn LlmProvider>,
    writer: Arc<dyn LlmProvider>,
}

impl ProviderRegistry {
    pub fn from_settings(settings: &LlmSettings) -> AppResult<Self> {
        Ok(Self {
            router: create_provider(settings.router.clone())?,
            manager: create_provider(settings.manager.clone())?,
            analysis: create_provider(settings.analysis.clone())?,
            writer: create_provider(settings.writer.clone())?,
        })
    }

    /// Same provider for every role.
    pub fn uniform(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            router: provider.clone(),
            manager: provider.clone(),
            analysis: provider.clone(),
            writer: provider,
        }
    }

    pub fn with_role(mut self, role: StageRole, provider: Arc<dyn LlmProvider>) -> Self {
        match role {
            StageRole::Router => self.router = provider,
            StageRole::Manager => self.manager = provider,
            StageRole::Analysis => self.analysis = provider,
            StageRole::Writer => self.writer = provider,
        }
        self
    }

    pub fn get(&self, role: StageRole) -> Arc<dyn LlmProvider> {
        match role {
            StageRole::Router => self.router.clone(),
            StageRole::Manager => self.manager.clone(),
            StageRole::Analysis => self.analysis.clone(),
            StageRole::Writer => self.writer.clone(),
        }
    }
}

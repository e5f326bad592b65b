//! Provider factory.

use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAIProvider;
use crate::provider::LlmProvider;
use crate::types::{LlmResult, ProviderConfig, ProviderType};

/// Build a provider instance for `config`.
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    tracing::debug!(provider = %config.provider, model = %config.model, "creating LLM provider");
    Ok(match config.provider {
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)?),
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_each_provider() {
        let openai = create_provider(ProviderConfig::default()).unwrap();
        assert_eq!(openai.name(), "openai");

        let anthropic = create_provider(ProviderConfig {
            provider: ProviderType::Anthropic,
            model: "claude-sonnet-4-5".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(anthropic.name(), "anthropic");
        assert_eq!(anthropic.model(), "claude-sonnet-4-5");
    }
}

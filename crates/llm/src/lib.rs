use std::sync::Arc;

mod model;
mod provider;
mod rig_adapter;

pub use model::{
    DEFAULT_MODEL, Model, ModelCache, ModelCatalog, ModelCatalogSource, default_models,
};
pub use provider::{
    BoxFuture, CompletionRequest, LlmProvider, ProviderConfig, ProviderError, ProviderMessage,
    ProviderResult, Role,
};
pub use rig_adapter::RigProviderAdapter;

pub const OPENROUTER_PROVIDER_ID: &str = "openrouter";
pub const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_PROVIDER_ID: &str = "openai";

/// Builds the provider named by `config.provider_id`, defaulting to OpenRouter.
pub fn create_provider(
    mut config: ProviderConfig,
    model_cache: Arc<ModelCache>,
) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = OPENROUTER_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        OPENROUTER_PROVIDER_ID => {
            if config.endpoint.is_empty() {
                config.endpoint = OPENROUTER_ENDPOINT.to_string();
            }
            Ok(Arc::new(RigProviderAdapter::new(config, model_cache)?))
        }
        OPENAI_PROVIDER_ID | "rig-openai" => {
            config.provider_id = OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config, model_cache)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_id_defaults_to_openrouter() {
        let provider = create_provider(
            ProviderConfig::new("", "sk-or-test", ""),
            Arc::new(ModelCache::default()),
        )
        .unwrap();
        assert_eq!(provider.id(), OPENROUTER_PROVIDER_ID);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = create_provider(
            ProviderConfig::new("anthropic-direct", "key", ""),
            Arc::new(ModelCache::default()),
        );
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn openai_alias_is_normalized() {
        let provider = create_provider(
            ProviderConfig::new("rig-openai", "sk-test", ""),
            Arc::new(ModelCache::default()),
        )
        .unwrap();
        assert_eq!(provider.id(), OPENAI_PROVIDER_ID);
    }
}

use std::sync::Arc;

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::http_client::{self, HttpClientExt, NoBody};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};

use super::model::{
    DEFAULT_MODEL, Model, ModelCache, ModelCatalog, ModelCatalogSource, default_models,
    parse_model_listing,
};
use super::provider::{
    BoxFuture, CompletionRequest, CompletionsFailedSnafu, EmptyMessageSetSnafu, EmptyReplySnafu,
    HttpClientSnafu, LlmProvider, MissingApiKeySnafu, ModelFetchStatusSnafu,
    ModelPayloadParseSnafu, ProviderConfig, ProviderError, ProviderMessage, ProviderResult, Role,
};

/// Adapter for OpenAI-compatible endpoints (OpenRouter, OpenAI) through rig.
pub struct RigProviderAdapter {
    config: ProviderConfig,
    fallback_models: Vec<Model>,
    model_cache: Arc<ModelCache>,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig, model_cache: Arc<ModelCache>) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            config,
            fallback_models: default_models(),
            model_cache,
        })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    async fn fetch_models_from_provider(&self) -> ProviderResult<Vec<Model>> {
        let client = Self::build_client(&self.config)?;
        let request = client
            .get("/models")
            .context(HttpClientSnafu {
                stage: "build-model-request",
            })?
            .body(NoBody)
            .map_err(|source| ProviderError::BuildHttpRequestBody {
                stage: "build-model-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(request).await.context(HttpClientSnafu {
            stage: "send-model-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-model-response",
        })?;

        if !status.is_success() {
            return ModelFetchStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        parse_model_listing(&payload).context(ModelPayloadParseSnafu {
            stage: "parse-model-response",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &CompletionRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig has a single preamble slot, so system-role messages are folded into it.
        for message in &request.messages {
            if matches!(message.role, Role::System) && !message.content.trim().is_empty() {
                preamble_parts.push(message.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn run_completion(
        config: &ProviderConfig,
        request: CompletionRequest,
    ) -> ProviderResult<String> {
        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "complete-pop-prompt",
                model_id: request.model_id.clone(),
            }
            .fail();
        };

        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(&request) {
            builder = builder.preamble(preamble);
        }

        let mut stream = builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })?;

        let mut reply = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamedAssistantContent::Text(text)) => reply.push_str(&text.text),
                Ok(_) => {}
                Err(source) => {
                    tracing::warn!(
                        model_id = %request.model_id,
                        error = %source,
                        "provider stream emitted an error chunk"
                    );
                    return Err(ProviderError::CompletionsFailed {
                        stage: "stream-chunk",
                        source,
                    });
                }
            }
        }

        let reply = reply.trim().to_string();
        ensure!(
            !reply.is_empty(),
            EmptyReplySnafu {
                stage: "complete-collect",
                model_id: request.model_id,
            }
        );
        Ok(reply)
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI-compatible"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn fallback_models(&self) -> &[Model] {
        &self.fallback_models
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<ModelCatalog>> {
        Box::pin(async move {
            if let Some(models) = self.model_cache.get_fresh(self.id()).await {
                return Ok(ModelCatalog::new(models, ModelCatalogSource::CacheFresh));
            }

            // Availability wins over freshness: provider API, then stale cache, then defaults.
            match self.fetch_models_from_provider().await {
                Ok(models) => {
                    self.model_cache.set(self.id(), models.clone()).await;
                    Ok(ModelCatalog::new(models, ModelCatalogSource::ProviderApi))
                }
                Err(error) => {
                    let error_message = error.to_string();

                    if let Some(models) = self.model_cache.get_any(self.id()).await {
                        tracing::warn!(
                            provider_id = %self.id(),
                            cached_model_count = models.len(),
                            error = %error_message,
                            "model fetch failed; serving stale cached models"
                        );
                        return Ok(
                            ModelCatalog::new(models, ModelCatalogSource::CacheStaleFallback)
                                .with_warning(error_message),
                        );
                    }

                    tracing::warn!(
                        provider_id = %self.id(),
                        fallback_model_count = self.fallback_models.len(),
                        error = %error_message,
                        "model fetch failed without cache; serving static fallback models"
                    );
                    Ok(
                        ModelCatalog::new(
                            self.fallback_models.clone(),
                            ModelCatalogSource::StaticFallback,
                        )
                        .with_warning(error_message),
                    )
                }
            }
        })
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            ensure!(
                !request.messages.is_empty(),
                EmptyMessageSetSnafu {
                    stage: "complete",
                    model_id: request.model_id.clone(),
                }
            );

            tracing::debug!(
                provider_id = %self.config.provider_id,
                model_id = %request.model_id,
                message_count = request.messages.len(),
                "requesting completion"
            );
            Self::run_completion(&self.config, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new("openrouter", "sk-test", "http://127.0.0.1:9/api/v1")
    }

    #[test]
    fn adapter_requires_an_api_key() {
        let result = RigProviderAdapter::new(
            ProviderConfig::new("openrouter", "  ", ""),
            Arc::new(ModelCache::default()),
        );
        assert!(matches!(result, Err(ProviderError::MissingApiKey { .. })));
    }

    #[test]
    fn system_messages_fold_into_the_preamble() {
        let request = CompletionRequest::new(
            DEFAULT_MODEL,
            vec![
                ProviderMessage::new(Role::System, "Be brief."),
                ProviderMessage::new(Role::User, "hello"),
                ProviderMessage::new(Role::System, "   "),
            ],
        )
        .with_preamble("You are SuperPost.");

        assert_eq!(
            RigProviderAdapter::merged_preamble(&request).as_deref(),
            Some("You are SuperPost.\n\nBe brief.")
        );
        assert!(
            RigProviderAdapter::merged_preamble(&CompletionRequest::new(DEFAULT_MODEL, vec![]))
                .is_none()
        );
    }

    #[tokio::test]
    async fn system_only_request_is_rejected_before_any_io() {
        let adapter = RigProviderAdapter::new(config(), Arc::new(ModelCache::default())).unwrap();
        let request = CompletionRequest::new(
            DEFAULT_MODEL,
            vec![ProviderMessage::new(Role::System, "rules only")],
        );

        let result = adapter.complete(request).await;
        assert!(matches!(result, Err(ProviderError::EmptyMessageSet { .. })));
    }

    #[tokio::test]
    async fn fresh_cache_short_circuits_model_fetch() {
        let cache = Arc::new(ModelCache::default());
        cache
            .set("openrouter", vec![Model::from_id("cached/model")])
            .await;
        let adapter = RigProviderAdapter::new(config(), cache).unwrap();

        let catalog = adapter.fetch_models().await.unwrap();
        assert_eq!(catalog.source, ModelCatalogSource::CacheFresh);
        assert_eq!(catalog.models, vec![Model::from_id("cached/model")]);
    }
}

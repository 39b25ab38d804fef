use std::sync::Arc;

use arc_swap::ArcSwap;
use superpost_llm::{
    DEFAULT_MODEL, LlmProvider, Model, ModelCatalogSource, ProviderResult, default_models,
};

/// Shared handle to the selected model id; the local assistant reads it per request.
#[derive(Clone)]
pub struct SelectedModel {
    inner: Arc<ArcSwap<String>>,
}

impl SelectedModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(model_id.into())),
        }
    }

    pub fn get(&self) -> String {
        self.inner.load().as_ref().clone()
    }

    fn set(&self, model_id: String) {
        self.inner.store(Arc::new(model_id));
    }
}

impl Default for SelectedModel {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

pub struct ModelSelector {
    selected: SelectedModel,
    available_models: Vec<Model>,
    catalog_source: ModelCatalogSource,
    catalog_warning: Option<String>,
}

impl ModelSelector {
    pub fn new(current_model_id: impl Into<String>) -> Self {
        let mut selector = Self {
            selected: SelectedModel::new(current_model_id),
            available_models: default_models(),
            catalog_source: ModelCatalogSource::StaticFallback,
            catalog_warning: None,
        };
        let current = selector.selected.get();
        selector.select(&current);
        selector
    }

    pub fn handle(&self) -> SelectedModel {
        self.selected.clone()
    }

    pub fn models(&self) -> &[Model] {
        &self.available_models
    }

    pub fn current_model_id(&self) -> String {
        self.selected.get()
    }

    pub fn current_model(&self) -> Option<&Model> {
        let current_model_id = self.selected.get();
        self.available_models
            .iter()
            .find(|model| model.id == current_model_id)
    }

    pub fn current_model_display_name(&self) -> String {
        self.current_model()
            .map(|model| model.name.clone())
            .unwrap_or_else(|| self.selected.get())
    }

    /// Selects `model_id`, or the first catalog entry when it is unknown.
    pub fn select(&mut self, model_id: &str) -> Option<&Model> {
        let model = self
            .available_models
            .iter()
            .find(|model| model.id == model_id.trim())
            .or_else(|| self.available_models.first())?;

        if model.id != model_id.trim() {
            tracing::debug!(
                requested = %model_id,
                resolved = %model.id,
                "unknown model id; using first catalog entry"
            );
        }
        self.selected.set(model.id.clone());
        Some(model)
    }

    pub fn set_models(&mut self, models: Vec<Model>) {
        self.available_models = if models.is_empty() {
            default_models()
        } else {
            models
        };

        let current = self.selected.get();
        self.select(&current);
    }

    pub fn catalog_source(&self) -> ModelCatalogSource {
        self.catalog_source
    }

    pub fn catalog_warning(&self) -> Option<&str> {
        self.catalog_warning.as_deref()
    }

    /// Reloads the catalog from `provider`, which falls back to cached or
    /// static models on its own.
    pub async fn refresh(&mut self, provider: &dyn LlmProvider) -> ProviderResult<ModelCatalogSource> {
        let catalog = provider.fetch_models().await?;
        tracing::info!(
            provider_id = %provider.id(),
            model_count = catalog.models.len(),
            source = ?catalog.source,
            "refreshed model catalog"
        );

        self.catalog_source = catalog.source;
        self.catalog_warning = catalog.warning;
        self.set_models(catalog.models);
        Ok(self.catalog_source)
    }
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;

    #[test]
    fn defaults_to_auto_router() {
        let selector = ModelSelector::default();
        assert_eq!(selector.current_model_id(), DEFAULT_MODEL);
        assert_eq!(selector.models().len(), 7);
        assert_eq!(
            selector.current_model_display_name(),
            "Auto (Best Free Model)"
        );
    }

    #[test]
    fn unknown_model_resolves_to_first_entry() {
        let mut selector = ModelSelector::new("meta-llama/llama-3-8b-instruct");
        assert_eq!(selector.current_model_id(), "meta-llama/llama-3-8b-instruct");

        let resolved = selector.select("does-not/exist").map(|model| model.id.clone());
        assert_eq!(resolved.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(ModelSelector::new("nope").current_model_id(), DEFAULT_MODEL);
    }

    #[test]
    fn handle_observes_later_selections() {
        let mut selector = ModelSelector::default();
        let handle = selector.handle();

        selector.select("gryphe/mythomax-l2-13b");
        assert_eq!(handle.get(), "gryphe/mythomax-l2-13b");
    }

    #[test]
    fn replacing_catalog_keeps_known_selection_and_resets_unknown() {
        let mut selector = ModelSelector::new("mistralai/mistral-7b-instruct");

        selector.set_models(vec![
            Model::from_id("x/first"),
            Model::from_id("mistralai/mistral-7b-instruct"),
        ]);
        assert_eq!(selector.current_model_id(), "mistralai/mistral-7b-instruct");

        selector.set_models(vec![Model::from_id("y/only")]);
        assert_eq!(selector.current_model_id(), "y/only");

        selector.set_models(Vec::new());
        assert_eq!(selector.models().len(), 7);
        assert_eq!(selector.current_model_id(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn refresh_records_source_and_warning() {
        let mut selector = ModelSelector::default();
        let provider = FakeProvider::with_models(vec![Model::from_id("live/model")]);

        let source = selector.refresh(&provider).await.unwrap();
        assert_eq!(source, ModelCatalogSource::ProviderApi);
        assert_eq!(selector.current_model_id(), "live/model");
        assert!(selector.catalog_warning().is_none());
    }
}

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

/// Model picked when nothing else is configured; OpenRouter routes it to a free model.
pub const DEFAULT_MODEL: &str = "openrouter/auto";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCatalogSource {
    ProviderApi,
    CacheFresh,
    CacheStaleFallback,
    StaticFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub models: Vec<Model>,
    pub source: ModelCatalogSource,
    pub warning: Option<String>,
}

impl ModelCatalog {
    pub fn new(models: Vec<Model>, source: ModelCatalogSource) -> Self {
        Self {
            models,
            source,
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

struct CacheEntry {
    models: Vec<Model>,
    fetched_at: Instant,
}

/// Per-provider model list cache; stale entries stay readable as a fallback.
pub struct ModelCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get_fresh(&self, provider_id: &str) -> Option<Vec<Model>> {
        let entries = self.entries.read().await;
        entries
            .get(provider_id)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.models.clone())
    }

    pub async fn get_any(&self, provider_id: &str) -> Option<Vec<Model>> {
        let entries = self.entries.read().await;
        entries.get(provider_id).map(|entry| entry.models.clone())
    }

    pub async fn set(&self, provider_id: &str, models: Vec<Model>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            provider_id.to_string(),
            CacheEntry {
                models,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// Free models offered in the selector when the provider cannot be asked.
pub fn default_models() -> Vec<Model> {
    vec![
        Model::new(DEFAULT_MODEL, "Auto (Best Free Model)")
            .with_description("Automatically selects the best free model"),
        Model::new("mistralai/mixtral-8x7b-instruct", "Mixtral 8x7B Instruct")
            .with_description("Smart and fast open model by Mistral"),
        Model::new("meta-llama/llama-3-8b-instruct", "Llama 3 8B Instruct")
            .with_description("Meta's small and powerful model"),
        Model::new("mistralai/mistral-7b-instruct", "Mistral 7B Instruct")
            .with_description("Lighter, faster version of Mixtral"),
        Model::new("openchat/openchat-3.5-0106", "OpenChat 3.5")
            .with_description("Fine-tuned chat model, helpful and fast"),
        Model::new("nousresearch/nous-capybara-7b", "Nous Capybara 7B")
            .with_description("Conversational model with good memory"),
        Model::new("gryphe/mythomax-l2-13b", "MythoMax L2 13B")
            .with_description("Balanced between creativity and logic"),
    ]
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    data: Vec<ModelListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListingEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parses an OpenAI/OpenRouter style `{"data": [{"id": ...}]}` model listing.
pub(crate) fn parse_model_listing(payload: &str) -> serde_json::Result<Vec<Model>> {
    let listing: ModelListing = serde_json::from_str(payload)?;
    let mut models = listing
        .data
        .into_iter()
        .filter(|entry| !entry.id.trim().is_empty())
        .map(|entry| {
            let id = entry.id.trim().to_string();
            let name = entry
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| id.clone());
            let model = Model::new(id, name);
            match entry.description {
                Some(description) if !description.trim().is_empty() => {
                    model.with_description(description)
                }
                _ => model,
            }
        })
        .collect::<Vec<_>>();

    models.sort_by(|left, right| left.id.cmp(&right.id));
    models.dedup_by(|left, right| left.id == right.id);
    Ok(models)
}

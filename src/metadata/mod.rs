//! Model metadata catalog
//!
//! Context windows, pricing, and capability information per model id, kept
//! current by [`CatalogUpdater`] writing an OpenRouter-format document into
//! the object store. Lookups never fail: a memoized copy is served while
//! warm, the store document is read on a cold start, and a hardcoded table
//! covers first deployment or a missing document. Every lookup reports which
//! tier answered so callers can observe degradation.

use crate::store::ObjectStore;
use crate::types::{AppError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Store key the metadata updater writes the catalog document to.
pub const CATALOG_KEY: &str = "config/model_catalog.json";

/// Which tier of the catalog answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// Warm in-memory copy.
    Cache,
    /// Read from the object store on this call.
    Store,
    /// Hardcoded table; the store document was missing or invalid.
    Fallback,
}

/// One model entry in OpenRouter format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default)]
    pub pricing: ModelPricing,
    #[serde(default)]
    pub architecture: Map<String, Value>,
    #[serde(default)]
    pub supported_parameters: Vec<String>,
}

fn default_context_length() -> u32 {
    8192
}

/// Per-token prices as decimal strings, matching the upstream API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub completion: String,
}

impl ModelPricing {
    /// Parse into (prompt, completion) costs; `None` when either is malformed.
    pub fn as_floats(&self) -> Option<(f64, f64)> {
        Some((self.prompt.parse().ok()?, self.completion.parse().ok()?))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

impl CatalogData {
    pub fn entry(&self, model_id: &str) -> Option<&ModelEntry> {
        self.data.iter().find(|m| m.id == model_id)
    }
}

/// Capability summary for a single model, with safe defaults when the model
/// is unknown to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub context_length: u32,
    pub pricing: ModelPricing,
    pub architecture: Map<String, Value>,
    pub supported_parameters: Vec<String>,
}

/// Three-tier model metadata lookup: memory, then store document, then the
/// hardcoded fallback table.
pub struct ModelCatalog {
    store: Arc<dyn ObjectStore>,
    key: String,
    cached: RwLock<Option<(Arc<CatalogData>, CatalogSource)>>,
}

impl ModelCatalog {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_key(store, CATALOG_KEY)
    }

    pub fn with_key(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            cached: RwLock::new(None),
        }
    }

    /// Look up the catalog, reporting which tier answered.
    ///
    /// The source is `Cache` on warm calls; `origin` exposes where the warm
    /// copy originally came from.
    pub async fn load(&self) -> (Arc<CatalogData>, CatalogSource) {
        if let Some((data, _)) = self.cached.read().as_ref() {
            debug!("Serving model catalog from in-memory cache");
            return (Arc::clone(data), CatalogSource::Cache);
        }

        let (data, source) = self.fetch().await;
        let data = Arc::new(data);
        *self.cached.write() = Some((Arc::clone(&data), source));
        (data, source)
    }

    async fn fetch(&self) -> (CatalogData, CatalogSource) {
        info!("Cold start: fetching model catalog from '{}'", self.key);
        match self.store.get(&self.key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CatalogData>(&raw) {
                Ok(data) if !data.data.is_empty() => {
                    info!(models = data.data.len(), "Loaded model catalog from store");
                    (data, CatalogSource::Store)
                }
                Ok(_) => {
                    warn!("Model catalog document is empty, using hardcoded fallback");
                    (fallback_catalog(), CatalogSource::Fallback)
                }
                Err(e) => {
                    warn!("Invalid model catalog document ({e}), using hardcoded fallback");
                    (fallback_catalog(), CatalogSource::Fallback)
                }
            },
            Ok(None) => {
                warn!("Model catalog '{}' not found, using hardcoded fallback", self.key);
                (fallback_catalog(), CatalogSource::Fallback)
            }
            Err(e) => {
                error!("Failed to read model catalog: {e}, using hardcoded fallback");
                (fallback_catalog(), CatalogSource::Fallback)
            }
        }
    }

    /// Tier the warm copy originally came from, loading it first if needed.
    pub async fn origin(&self) -> CatalogSource {
        if let Some((_, origin)) = self.cached.read().as_ref() {
            return *origin;
        }
        self.load().await;
        self.origin_cached()
    }

    fn origin_cached(&self) -> CatalogSource {
        self.cached
            .read()
            .as_ref()
            .map(|(_, origin)| *origin)
            .unwrap_or(CatalogSource::Fallback)
    }

    pub async fn is_fallback(&self) -> bool {
        self.origin().await == CatalogSource::Fallback
    }

    /// Discard the warm copy and reload from the store. Returns `true` when
    /// the reload produced store-backed data rather than the fallback table.
    pub async fn refresh(&self) -> bool {
        *self.cached.write() = None;
        let (_, source) = self.load().await;
        source == CatalogSource::Store
    }

    /// Context window for a model, or `default` when unknown.
    pub async fn context_limit(&self, model_id: &str, default: u32) -> u32 {
        let (data, _) = self.load().await;
        data.entry(model_id)
            .map(|m| m.context_length)
            .unwrap_or(default)
    }

    /// (prompt, completion) per-token costs; `None` when the model is unknown
    /// or its pricing is malformed.
    pub async fn pricing(&self, model_id: &str) -> Option<(f64, f64)> {
        let (data, _) = self.load().await;
        data.entry(model_id)?.pricing.as_floats()
    }

    pub async fn capabilities(&self, model_id: &str) -> ModelCapabilities {
        let (data, _) = self.load().await;
        match data.entry(model_id) {
            Some(m) => ModelCapabilities {
                context_length: m.context_length,
                pricing: m.pricing.clone(),
                architecture: m.architecture.clone(),
                supported_parameters: m.supported_parameters.clone(),
            },
            None => ModelCapabilities {
                context_length: default_context_length(),
                pricing: ModelPricing::default(),
                architecture: Map::new(),
                supported_parameters: Vec::new(),
            },
        }
    }

    /// Log catalog health for observability.
    pub async fn log_status(&self) {
        let (data, _) = self.load().await;
        let origin = self.origin_cached();
        info!(
            models = data.data.len(),
            source = ?origin,
            "Model catalog status"
        );
        if origin == CatalogSource::Fallback {
            warn!("Operating with fallback model catalog, check the metadata updater");
        }
    }
}

/// Fetches the model catalog document from an OpenRouter-format endpoint and
/// persists it at the catalog's store key.
///
/// Runs on a schedule from the server and on demand through the API. The
/// fetched document is validated before the store copy is replaced; a bad
/// fetch leaves the previous document in place.
pub struct CatalogUpdater {
    client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    source_url: String,
    key: String,
}

impl CatalogUpdater {
    pub fn new(store: Arc<dyn ObjectStore>, source_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
            source_url: source_url.into(),
            key: CATALOG_KEY.to_string(),
        }
    }

    /// Fetch, validate, and store the catalog document. Returns the number of
    /// models in the new document.
    pub async fn update(&self) -> Result<usize> {
        info!(url = %self.source_url, "Updating model catalog");

        let response = self
            .client
            .get(&self.source_url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Catalog fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Catalog endpoint returned {}",
                response.status()
            )));
        }
        let raw = response
            .text()
            .await
            .map_err(|e| AppError::Internal(format!("Catalog fetch failed: {e}")))?;

        let data: CatalogData = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("Malformed catalog document: {e}")))?;
        if data.data.is_empty() {
            return Err(AppError::Internal(
                "Catalog endpoint returned no models".to_string(),
            ));
        }

        self.store.put(&self.key, &raw).await?;
        info!(models = data.data.len(), key = %self.key, "Updated model catalog document");
        Ok(data.data.len())
    }
}

/// Hardcoded catalog used on first deployment or when the store document is
/// unavailable.
fn fallback_catalog() -> CatalogData {
    fn entry(id: &str, context_length: u32, prompt: &str, completion: &str, tok: &str) -> ModelEntry {
        let mut architecture = Map::new();
        architecture.insert("tokenizer".to_string(), Value::String(tok.to_string()));
        ModelEntry {
            id: id.to_string(),
            context_length,
            pricing: ModelPricing {
                prompt: prompt.to_string(),
                completion: completion.to_string(),
            },
            architecture,
            supported_parameters: Vec::new(),
        }
    }

    CatalogData {
        data: vec![
            entry("anthropic/claude-3-haiku-20240307", 200_000, "0.00000025", "0.00000125", "Claude"),
            entry("anthropic/claude-3-sonnet-20240229", 200_000, "0.000003", "0.000015", "Claude"),
            entry("anthropic/claude-3-opus-20240229", 200_000, "0.000015", "0.000075", "Claude"),
            entry("openai/gpt-4o", 128_000, "0.000005", "0.000015", "GPT"),
            entry("openai/gpt-4-turbo", 128_000, "0.00001", "0.00003", "GPT"),
            entry("google/gemini-pro", 32_768, "0.0000005", "0.0000015", "Gemini"),
            entry("meta-llama/llama-3-70b-instruct", 8_192, "0.0000009", "0.0000009", "Llama"),
        ],
    }
}

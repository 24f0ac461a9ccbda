//! TOML-based configuration for A.T.L.A.S
//!
//! Declarative configuration for the server, the LLM provider, the search
//! provider, the project list, and the pipeline tunables (decomposition
//! strategy, synthesis settings) via a TOML file (`atlas.toml`).
//!
//! Every tunable has a documented default, so an empty file is a valid
//! configuration apart from the project list.

use crate::llm::Provider;
use crate::types::{AppError, ProjectConfig, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Root configuration structure loaded from atlas.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Opaque version tag stamped onto every work item and outcome record.
    #[serde(default = "default_config_version")]
    pub version: String,

    /// LLM provider configuration
    #[serde(default)]
    pub provider: LlmProviderConfig,

    /// Search provider configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Projects to research on each run
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,

    /// Topic decomposition strategy
    #[serde(default)]
    pub decomposition: DecompositionConfig,

    /// Prompt templates shared with workers
    #[serde(default)]
    pub research_prompts: ResearchPromptsConfig,

    /// Synthesis coordinator settings
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Model metadata catalog updater settings
    #[serde(default)]
    pub metadata: MetadataConfig,
}

fn default_config_version() -> String {
    "unknown".to_string()
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Concurrent work-item consumers to run in-process.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            workers: default_workers(),
        }
    }
}

// ============= Store Configuration =============

/// Object store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local store; contents are lost on restart.
    Memory,
    /// Filesystem store rooted at `root`.
    Fs {
        #[serde(default = "default_store_root")]
        root: PathBuf,
    },
}

fn default_store_root() -> PathBuf {
    PathBuf::from("data/store")
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Fs {
            root: default_store_root(),
        }
    }
}

// ============= Provider Configuration =============

/// LLM provider configuration. API keys come from the environment, never the
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LlmProviderConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        default_model: String,
    },
    OpenAI {
        /// Environment variable containing the API key
        #[serde(default = "default_openai_key_env")]
        api_key_env: String,
        #[serde(default = "default_openai_base")]
        api_base: String,
        default_model: String,
    },
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        LlmProviderConfig::Ollama {
            base_url: default_ollama_url(),
            default_model: "llama3.2".to_string(),
        }
    }
}

impl LlmProviderConfig {
    /// Resolve a [`Provider`] for the given model, or the provider's default
    /// model when `model` is `None`.
    pub fn provider(&self, model: Option<&str>) -> Result<Provider> {
        match self {
            LlmProviderConfig::Ollama {
                base_url,
                default_model,
            } => Ok(Provider::Ollama {
                base_url: base_url.clone(),
                model: model.unwrap_or(default_model).to_string(),
            }),
            LlmProviderConfig::OpenAI {
                api_key_env,
                api_base,
                default_model,
            } => {
                let api_key = std::env::var(api_key_env).map_err(|_| {
                    AppError::Configuration(format!(
                        "Environment variable {api_key_env} is not set"
                    ))
                })?;
                Ok(Provider::OpenAI {
                    api_key,
                    api_base: api_base.clone(),
                    model: model.unwrap_or(default_model).to_string(),
                })
            }
        }
    }
}

// ============= Search Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Environment variable containing the search API key
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_search_key_env() -> String {
    "SEARCH_API_KEY".to_string()
}

fn default_search_max_results() -> usize {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            max_results: default_search_max_results(),
        }
    }
}

// ============= Decomposition Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Override prompt; a built-in research-analyst prompt is used otherwise.
    #[serde(default)]
    pub prompt_template: Option<String>,

    #[serde(default = "default_sub_topic_count")]
    pub default_sub_topic_count: usize,

    /// Model name for decomposition calls; provider default when unset.
    #[serde(default)]
    pub model: Option<String>,

    /// Deterministic sub-topics used when decomposition output fails
    /// validation, so dispatch is never starved.
    #[serde(default = "default_fallback_topics")]
    pub fallback_topics: Vec<String>,

    #[serde(default = "default_search_depth")]
    pub default_search_depth: String,
}

fn default_sub_topic_count() -> usize {
    4
}

fn default_fallback_topics() -> Vec<String> {
    vec![
        "Current state of the technology and ecosystem".to_string(),
        "Performance optimization best practices".to_string(),
        "Security considerations and implementations".to_string(),
        "Cost optimization strategies".to_string(),
    ]
}

fn default_search_depth() -> String {
    "advanced".to_string()
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            prompt_template: None,
            default_sub_topic_count: default_sub_topic_count(),
            model: None,
            fallback_topics: default_fallback_topics(),
            default_search_depth: default_search_depth(),
        }
    }
}

// ============= Research Prompt Configuration =============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPromptsConfig {
    /// Override system prompt for workers; a built-in one is used otherwise.
    #[serde(default)]
    pub worker_prompt_template: Option<String>,

    /// Model name for worker research calls; provider default when unset.
    #[serde(default)]
    pub model: Option<String>,
}

// ============= Synthesis Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Completion rate at which a run is acceptable to synthesize.
    #[serde(default = "default_minimum_completion_rate")]
    pub minimum_completion_rate: f64,

    /// Reschedules before synthesizing with whatever data exists.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a rescheduled check runs.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Model name for synthesis calls; provider default when unset.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_report_sections")]
    pub report_sections: Vec<String>,

    /// Target report length in words.
    #[serde(default = "default_max_report_length")]
    pub max_report_length: usize,
}

fn default_minimum_completion_rate() -> f64 {
    0.8
}

fn default_max_retries() -> u32 {
    6
}

fn default_retry_delay_secs() -> u64 {
    300
}

fn default_report_sections() -> Vec<String> {
    vec![
        "Executive Summary".to_string(),
        "Key Findings by Project".to_string(),
        "Cross-Project Patterns and Insights".to_string(),
        "Recommended Action Items".to_string(),
        "Technology Trends and Implications".to_string(),
        "Implementation Roadmap Suggestions".to_string(),
    ]
}

fn default_max_report_length() -> usize {
    5000
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            minimum_completion_rate: default_minimum_completion_rate(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            model: None,
            report_sections: default_report_sections(),
            max_report_length: default_max_report_length(),
        }
    }
}

// ============= Metadata Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// OpenRouter-format endpoint the catalog updater fetches from.
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,

    /// Hours between scheduled catalog updates; 0 disables the scheduled
    /// updater (the API endpoint still works).
    #[serde(default = "default_catalog_update_hours")]
    pub update_interval_hours: u64,
}

fn default_catalog_url() -> String {
    "https://openrouter.ai/api/v1/models".to_string()
}

fn default_catalog_update_hours() -> u64 {
    24
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            update_interval_hours: default_catalog_update_hours(),
        }
    }
}

// ============= Loading & Manager =============

impl AtlasConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Configuration(format!("Failed to read {path:?}: {e}")))?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Configuration(format!("Invalid TOML in {path:?}: {e}")))
    }

    /// Look up a configured project by name.
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }
}

/// Thread-safe configuration handle with lockless reads.
///
/// The pipeline snapshots configuration once per invocation; `reload` swaps
/// in a fresh copy for subsequent invocations without disturbing in-flight
/// work.
pub struct AtlasConfigManager {
    config: ArcSwap<AtlasConfig>,
    config_path: Option<PathBuf>,
}

impl AtlasConfigManager {
    /// Create a manager from a TOML file path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = AtlasConfig::load(&path)?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            config_path: Some(path),
        })
    }

    /// Create a manager from an already-built configuration (tests, embedded
    /// use).
    pub fn from_config(config: AtlasConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            config_path: None,
        }
    }

    /// Get the current configuration (lockless read).
    pub fn config(&self) -> Arc<AtlasConfig> {
        self.config.load_full()
    }

    /// Reload the configuration from disk.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Err(AppError::Configuration(
                "No config path to reload from".to_string(),
            ));
        };
        let new_config = AtlasConfig::load(path)?;
        self.config.store(Arc::new(new_config));
        info!("Configuration reloaded from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AtlasConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.synthesis.minimum_completion_rate, 0.8);
        assert_eq!(config.synthesis.max_retries, 6);
        assert_eq!(config.synthesis.retry_delay_secs, 300);
        assert_eq!(config.decomposition.default_sub_topic_count, 4);
        assert!(!config.decomposition.fallback_topics.is_empty());
        assert!(config.projects.is_empty());
        assert_eq!(config.metadata.update_interval_hours, 24);
        assert!(config.metadata.catalog_url.starts_with("https://"));
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            version = "2024-06"

            [server]
            port = 8080

            [store]
            backend = "memory"

            [provider]
            type = "ollama"
            base_url = "http://localhost:11434"
            default_model = "llama3.2"

            [[projects]]
            name = "webapp"
            description = "Main web application"
            focus_areas = ["performance", "security"]

            [synthesis]
            minimum_completion_rate = 0.9
            max_retries = 3
        "#;

        let config: AtlasConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.version, "2024-06");
        assert_eq!(config.server.port, 8080);
        assert!(matches!(config.store, StoreConfig::Memory));
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.project("webapp").unwrap().focus_areas.len(), 2);
        assert!(config.project("missing").is_none());
        assert_eq!(config.synthesis.minimum_completion_rate, 0.9);
        assert_eq!(config.synthesis.max_retries, 3);
        // Unset fields keep their defaults
        assert_eq!(config.synthesis.retry_delay_secs, 300);
    }

    #[test]
    fn test_manager_from_config() {
        let manager = AtlasConfigManager::from_config(AtlasConfig::default());
        assert_eq!(manager.config().server.host, "127.0.0.1");
        assert!(manager.reload().is_err());
    }

    #[test]
    fn test_ollama_provider_resolution() {
        let provider_config = LlmProviderConfig::default();
        let provider = provider_config.provider(Some("mistral")).unwrap();
        assert_eq!(provider.model(), "mistral");

        let provider = provider_config.provider(None).unwrap();
        assert_eq!(provider.model(), "llama3.2");
    }
}

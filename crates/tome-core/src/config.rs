//! Configuration management for the knowledge retrieval core.
//!
//! Configuration is stored in TOML and deserialized into a typed tree with
//! per-field defaults, so a partial file (or no file at all) yields a working
//! configuration. Environment variables are applied after deserialization:
//! empty values are treated as unset, and invalid integer values fail before
//! startup completes.
//!
//! ## Example configuration file
//!
//! ```toml
//! [library]
//! path = "./library"
//!
//! [embeddings]
//! provider = "mistral"
//! model = "mistral-embed"
//! api_key_env_var = "MISTRAL_API_KEY"
//!
//! [vector]
//! url = "localhost"
//! port = 6333
//! collection_name = "knowledge_library"
//!
//! [chunking]
//! min_tokens = 512
//! max_tokens = 2048
//! ```

use crate::chunker::ChunkerOptions;
use crate::ranking::RankingWeights;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_library_path() -> String {
    "./library".to_string()
}

fn default_index_file() -> String {
    "_index.yaml".to_string()
}

/// Library location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root directory of the markdown library.
    #[serde(default = "default_library_path")]
    pub path: String,

    /// Name of the library's own index document inside the root.
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
            index_file: default_index_file(),
        }
    }
}

fn default_embedding_provider() -> String {
    "mistral".to_string()
}

fn default_embedding_model() -> String {
    "mistral-embed".to_string()
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Provider family: `mistral`, `openai`, …
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name or id.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Explicit API key; takes precedence over environment lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable to read the key from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env_var: Option<String>,

    /// Custom endpoint, when not using the provider's public API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Expected embedding dimensions; provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: None,
            api_key_env_var: None,
            base_url: None,
            dimensions: None,
        }
    }
}

fn default_vector_url() -> String {
    "localhost".to_string()
}

const fn default_vector_port() -> u16 {
    6333
}

fn default_collection_name() -> String {
    "knowledge_library".to_string()
}

/// Vector store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Host (or full URL) of the vector store.
    #[serde(default = "default_vector_url")]
    pub url: String,

    /// REST port of the vector store.
    #[serde(default = "default_vector_port")]
    pub port: u16,

    /// Optional API key sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Name of the collection holding the library.
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            port: default_vector_port(),
            api_key: None,
            collection_name: default_collection_name(),
        }
    }
}

fn default_fast_tier_threshold() -> f32 {
    0.75
}

fn default_new_category_threshold() -> f32 {
    0.85
}

const fn default_auto_approve() -> bool {
    true
}

const fn default_max_content_length() -> usize {
    2000
}

/// Two-tier classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Fast-tier confidence below this escalates to the LLM tier.
    #[serde(default = "default_fast_tier_threshold")]
    pub fast_tier_confidence_threshold: f32,

    /// Proposal confidence at or above this may auto-approve.
    #[serde(default = "default_new_category_threshold")]
    pub new_category_confidence_threshold: f32,

    /// Auto-approve high-confidence level-3+ proposals.
    #[serde(default = "default_auto_approve")]
    pub auto_approve_level3_plus: bool,

    /// Maximum content excerpt length forwarded to the LLM.
    #[serde(default = "default_max_content_length")]
    pub max_content_length_for_llm: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            fast_tier_confidence_threshold: default_fast_tier_threshold(),
            new_category_confidence_threshold: default_new_category_threshold(),
            auto_approve_level3_plus: default_auto_approve(),
            max_content_length_for_llm: default_max_content_length(),
        }
    }
}

fn default_taxonomy_config_path() -> String {
    "configs/taxonomy.yaml".to_string()
}

fn default_centroids_cache_dir() -> String {
    "data/centroids".to_string()
}

const fn default_min_samples() -> usize {
    3
}

/// Taxonomy management settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    /// Path of the taxonomy document.
    #[serde(default = "default_taxonomy_config_path")]
    pub config_path: String,

    /// Directory holding the centroid cache artifact.
    #[serde(default = "default_centroids_cache_dir")]
    pub centroids_cache_dir: String,

    /// Minimum indexed samples required before a centroid is computed.
    #[serde(default = "default_min_samples")]
    pub min_samples_for_centroid: usize,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            config_path: default_taxonomy_config_path(),
            centroids_cache_dir: default_centroids_cache_dir(),
            min_samples_for_centroid: default_min_samples(),
        }
    }
}

/// Root configuration for the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Library location.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Embedding provider.
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Vector store connection.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Chunking windows.
    #[serde(default)]
    pub chunking: ChunkerOptions,

    /// Classification thresholds.
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Composite ranking weights.
    #[serde(default)]
    pub ranking: RankingWeights,

    /// Taxonomy management.
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides. A missing file yields defaults (plus overrides).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
                toml::from_str(&contents)?
            },
            _ => Self::default(),
        };

        apply_env_overrides_with(config, |name| std::env::var(name).ok())
    }
}

/// Read an environment value, treating empty/whitespace values as unset.
fn env_value(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read an integer environment value.
///
/// # Errors
///
/// Returns [`Error::Config`] for values that are present but not integers.
fn env_int(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u16>> {
    match env_value(lookup, name) {
        None => Ok(None),
        Some(value) => value
            .parse::<u16>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} must be an integer, got '{value}'"))),
    }
}

/// Apply environment overrides with an injectable lookup.
pub(crate) fn apply_env_overrides_with(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    if let Some(path) = env_value(&lookup, "LIBRARY_PATH") {
        config.library.path = path;
    }
    if let Some(port) = env_int(&lookup, "VECTOR_PORT")? {
        config.vector.port = port;
    }
    Ok(config)
}

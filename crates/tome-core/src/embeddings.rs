//! Pluggable embedding providers.
//!
//! An [`EmbeddingProvider`] turns batches of strings into fixed-dimension
//! vectors, in order. Implementations are interchangeable behind the trait;
//! the factory builds one from configuration. API keys resolve in order:
//! explicit config value, then the configured env-var name, then the default
//! env var for the provider family. Empty values count as unset.

use crate::config::EmbeddingsConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default per-call timeout for embedding requests.
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// A provider of fixed-dimension text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text.
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| Error::Other("provider returned no embedding".to_string()))
    }

    /// The fixed vector size this provider produces.
    fn dimensions(&self) -> usize;
}

/// Resolve the API key for a provider configuration.
///
/// # Errors
///
/// Returns [`Error::MissingCredential`] when no key can be resolved.
pub fn resolve_api_key(config: &EmbeddingsConfig) -> Result<String> {
    resolve_api_key_with(config, |name| {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Key resolution with an injectable environment lookup.
pub(crate) fn resolve_api_key_with(
    config: &EmbeddingsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    if let Some(key) = config.api_key.as_deref() {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    if let Some(var) = config.api_key_env_var.as_deref() {
        if let Some(value) = lookup(var) {
            return Ok(value);
        }
    }

    let default_var = match config.provider.as_str() {
        "mistral" => "MISTRAL_API_KEY",
        "openai" => "OPENAI_API_KEY",
        "cohere" => "COHERE_API_KEY",
        other => {
            return Err(Error::MissingCredential(format!(
                "no API key configured for provider '{other}'"
            )));
        },
    };

    lookup(default_var).ok_or_else(|| {
        Error::MissingCredential(format!(
            "no API key for provider '{}' (checked config and {default_var})",
            config.provider
        ))
    })
}

/// Map a reqwest failure to the error taxonomy, surfacing timeouts.
fn map_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("embedding request timed out: {err}"))
    } else {
        Error::Network(err)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

/// Shared request plumbing for the OpenAI-compatible `/v1/embeddings` shape,
/// which both Mistral and OpenAI speak.
struct EmbeddingsEndpoint {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl EmbeddingsEndpoint {
    fn new(base_url: &str, api_key: String, model: String, dimensions: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(EMBED_TIMEOUT)
            .user_agent(concat!("tome/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            url: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
            dimensions,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Other(format!(
                "embedding request failed with {status}: {detail}"
            )));
        }

        let mut parsed: EmbeddingsResponse = response.json().await.map_err(map_transport)?;
        // The API reports an index per entry; trust it over response order.
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != texts.len() {
            return Err(Error::Other(format!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        debug!(count = texts.len(), model = %self.model, "embedded batch");
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

/// Mistral embeddings API provider.
pub struct MistralProvider {
    endpoint: EmbeddingsEndpoint,
}

impl MistralProvider {
    /// Default vector size of `mistral-embed`.
    pub const DEFAULT_DIMENSIONS: usize = 1024;

    /// Build a provider from configuration, resolving the API key.
    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        let base_url = config.base_url.as_deref().unwrap_or("https://api.mistral.ai");
        let dimensions = config.dimensions.unwrap_or(Self::DEFAULT_DIMENSIONS);
        Ok(Self {
            endpoint: EmbeddingsEndpoint::new(
                base_url,
                api_key,
                config.model.clone(),
                dimensions,
            )?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for MistralProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.endpoint.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.endpoint.dimensions
    }
}

/// OpenAI embeddings API provider.
pub struct OpenAiProvider {
    endpoint: EmbeddingsEndpoint,
}

impl OpenAiProvider {
    fn default_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    /// Build a provider from configuration, resolving the API key.
    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        let base_url = config.base_url.as_deref().unwrap_or("https://api.openai.com");
        let dimensions = config
            .dimensions
            .unwrap_or_else(|| Self::default_dimensions(&config.model));
        Ok(Self {
            endpoint: EmbeddingsEndpoint::new(
                base_url,
                api_key,
                config.model.clone(),
                dimensions,
            )?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.endpoint.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.endpoint.dimensions
    }
}

/// Build the configured embedding provider.
///
/// # Errors
///
/// Returns [`Error::Config`] for unknown provider names and
/// [`Error::MissingCredential`] when no API key resolves.
pub fn create_provider(config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "mistral" => Ok(Arc::new(MistralProvider::from_config(config)?)),
        "openai" => Ok(Arc::new(OpenAiProvider::from_config(config)?)),
        other => Err(Error::Config(format!(
            "unknown embedding provider '{other}' (available: mistral, openai)"
        ))),
    }
}

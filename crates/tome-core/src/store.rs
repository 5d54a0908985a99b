//! Vector store client for the knowledge library.
//!
//! Speaks the Qdrant-compatible REST API: a single named collection of
//! `{id, vector, payload}` points with cosine distance. On initialization the
//! collection is created if missing and payload indexes are ensured on the
//! filterable keys (taxonomy levels, content type, file path, content hash).
//! Initialization failures propagate — a store that cannot be prepared is
//! fatal to startup.
//!
//! All operations are suspending; every call carries the client timeout and
//! surfaces expiry as [`Error::Timeout`].

use crate::config::VectorConfig;
use crate::embeddings::EmbeddingProvider;
use crate::payload::{ContentPayload, ContentType};
use crate::relationships::RelationshipKind;
use crate::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default per-call timeout for store requests.
const STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default batch size for bulk upserts.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Payload keys that get dedicated indexes for filtering.
const INDEXED_PAYLOAD_KEYS: &[&str] = &[
    "taxonomy.level1",
    "taxonomy.level2",
    "content_type",
    "file_path",
    "content_hash",
];

/// A point to insert: id, embedding and payload.
#[derive(Debug, Clone)]
pub struct PointRecord {
    /// Opaque unique id.
    pub id: String,
    /// Embedding vector; optional on reads without vectors.
    pub vector: Option<Vec<f32>>,
    /// Typed payload.
    pub payload: ContentPayload,
}

/// A search hit: id, cosine score and payload.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Point id.
    pub id: String,
    /// Cosine similarity in `[0, 1]`.
    pub score: f32,
    /// Typed payload.
    pub payload: ContentPayload,
}

/// Optional filters for search operations.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to a level-1 taxonomy segment.
    pub taxonomy_level1: Option<String>,
    /// Restrict to a level-2 taxonomy segment.
    pub taxonomy_level2: Option<String>,
    /// Restrict to one content type.
    pub content_type: Option<ContentType>,
    /// Restrict to one source file.
    pub file_path: Option<String>,
    /// Restrict to points carrying a relationship of this kind.
    pub relationship_kind: Option<RelationshipKind>,
}

impl SearchFilters {
    pub(crate) fn to_value(&self) -> Option<Value> {
        let mut must = Vec::new();
        if let Some(level1) = &self.taxonomy_level1 {
            must.push(json!({"key": "taxonomy.level1", "match": {"value": level1}}));
        }
        if let Some(level2) = &self.taxonomy_level2 {
            must.push(json!({"key": "taxonomy.level2", "match": {"value": level2}}));
        }
        if let Some(content_type) = &self.content_type {
            must.push(json!({"key": "content_type", "match": {"value": content_type}}));
        }
        if let Some(file_path) = &self.file_path {
            must.push(json!({"key": "file_path", "match": {"value": file_path}}));
        }
        if let Some(kind) = &self.relationship_kind {
            must.push(json!({"key": "relationships[].kind", "match": {"value": kind}}));
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({"must": must}))
        }
    }
}

/// Collection-level statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Total points in the collection.
    pub total_points: u64,
    /// Points with indexed vectors.
    pub indexed_vectors: u64,
    /// Embedding dimensions of the collection.
    pub dimensions: usize,
    /// Collection status string from the store.
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct RawScored {
    id: Value,
    score: f32,
    payload: Option<ContentPayload>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    id: Value,
    payload: Option<ContentPayload>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<RawPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    indexed_vectors_count: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    config: Option<CollectionConfig>,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn map_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("vector store request timed out: {err}"))
    } else {
        Error::Network(err)
    }
}

/// Client for one collection of the vector store.
pub struct VectorStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl VectorStore {
    /// Build a store client from configuration.
    pub fn new(config: &VectorConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let base_url = if config.url.starts_with("http://") || config.url.starts_with("https://") {
            format!("{}:{}", config.url.trim_end_matches('/'), config.port)
        } else {
            format!("http://{}:{}", config.url, config.port)
        };
        Self::with_base_url(
            base_url,
            config.collection_name.clone(),
            config.api_key.clone(),
            provider,
        )
    }

    /// Build a store client against an explicit base URL (tests, proxies).
    pub fn with_base_url(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        api_key: Option<String>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(STORE_TIMEOUT)
            .user_agent(concat!("tome/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key,
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Override the bulk upsert batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The embedding provider backing text searches.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Store(format!("{context} failed with {status}: {body}")))
    }

    /// Ensure the collection exists with the provider's dimensions and
    /// cosine distance, and that payload indexes are present.
    ///
    /// # Errors
    ///
    /// Any unexpected store error propagates; a store that cannot be
    /// initialized is fatal to startup.
    pub async fn init(&self) -> Result<()> {
        let collection_path = format!("/collections/{}", self.collection);
        let response = self
            .request(reqwest::Method::GET, &collection_path)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() {
            debug!(collection = %self.collection, "collection already exists");
        } else if status == reqwest::StatusCode::NOT_FOUND {
            info!(
                collection = %self.collection,
                dimensions = self.provider.dimensions(),
                "creating collection"
            );
            let body = json!({
                "vectors": {
                    "size": self.provider.dimensions(),
                    "distance": "Cosine",
                }
            });
            let created = self
                .request(reqwest::Method::PUT, &collection_path)
                .json(&body)
                .send()
                .await
                .map_err(map_transport)?;
            Self::check(created, "create collection").await?;
        } else {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Store(format!(
                "collection probe failed with {status}: {body}"
            )));
        }

        for key in INDEXED_PAYLOAD_KEYS {
            let body = json!({"field_name": key, "field_schema": "keyword"});
            let response = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/collections/{}/index", self.collection),
                )
                .json(&body)
                .send()
                .await
                .map_err(map_transport)?;
            // An index that already exists is fine; anything else is not.
            if !response.status().is_success()
                && response.status() != reqwest::StatusCode::CONFLICT
            {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Store(format!(
                    "payload index on '{key}' failed with {status}: {body}"
                )));
            }
        }

        Ok(())
    }

    /// Insert or replace a single point.
    pub async fn upsert(&self, point: &PointRecord) -> Result<()> {
        self.upsert_points(std::slice::from_ref(point)).await
    }

    /// Insert or replace points in configured-size batches.
    pub async fn upsert_batch(&self, points: &[PointRecord]) -> Result<()> {
        for batch in points.chunks(self.batch_size.max(1)) {
            self.upsert_points(batch).await?;
        }
        Ok(())
    }

    async fn upsert_points(&self, points: &[PointRecord]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body: Vec<Value> = points
            .iter()
            .map(|point| {
                Ok(json!({
                    "id": point.id,
                    "vector": point.vector.as_ref().ok_or_else(|| {
                        Error::Store(format!("point {} has no vector to upsert", point.id))
                    })?,
                    "payload": serde_json::to_value(&point.payload)?,
                }))
            })
            .collect::<Result<_>>()?;

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&json!({"points": body}))
            .send()
            .await
            .map_err(map_transport)?;
        Self::check(response, "upsert points").await?;
        debug!(count = points.len(), "upserted points");
        Ok(())
    }

    /// Search by query text; the text is embedded first.
    pub async fn search_text(
        &self,
        query: &str,
        n_results: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredPoint>> {
        let vector = self.provider.embed_single(query).await?;
        self.search_vector(&vector, n_results, filters).await
    }

    /// Search by query vector, returning top hits by cosine similarity,
    /// sorted descending.
    pub async fn search_vector(
        &self,
        vector: &[f32],
        n_results: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": n_results,
            "with_payload": true,
        });
        if let Some(filter) = filters.to_value() {
            body["filter"] = filter;
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let response = Self::check(response, "search").await?;

        let envelope: ApiEnvelope<Vec<RawScored>> =
            response.json().await.map_err(map_transport)?;
        let mut hits: Vec<ScoredPoint> = envelope
            .result
            .into_iter()
            .filter_map(|raw| {
                let payload = raw.payload?;
                Some(ScoredPoint {
                    id: id_string(&raw.id),
                    score: raw.score,
                    payload,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    /// Fetch up to `limit` points whose taxonomy full path matches exactly.
    pub async fn search_by_taxonomy(
        &self,
        taxonomy_path: &str,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<PointRecord>> {
        let mut scroll = self.iter_by_taxonomy(taxonomy_path, limit.clamp(1, 256));
        scroll.with_vectors = with_vectors;

        let mut points = Vec::new();
        while let Some(batch) = scroll.next_batch().await? {
            for point in batch {
                points.push(point);
                if points.len() >= limit {
                    return Ok(points);
                }
            }
        }
        Ok(points)
    }

    /// Lazy paginated scroll over all points under a taxonomy path.
    ///
    /// Each `next_batch` call fetches one page and suspends between pages;
    /// a new scroll starts from the beginning.
    #[must_use]
    pub fn iter_by_taxonomy(&self, taxonomy_path: &str, batch_size: usize) -> TaxonomyScroll<'_> {
        TaxonomyScroll {
            store: self,
            filter: json!({
                "must": [{"key": "taxonomy.full_path", "match": {"value": taxonomy_path}}]
            }),
            batch_size,
            with_vectors: false,
            offset: None,
            done: false,
        }
    }

    async fn scroll_page(
        &self,
        filter: &Value,
        batch_size: usize,
        with_vectors: bool,
        offset: Option<&Value>,
    ) -> Result<ScrollResult> {
        let mut body = json!({
            "filter": filter,
            "limit": batch_size,
            "with_payload": true,
            "with_vector": with_vectors,
        });
        if let Some(offset) = offset {
            body["offset"] = offset.clone();
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/scroll", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let response = Self::check(response, "scroll").await?;

        let envelope: ApiEnvelope<ScrollResult> =
            response.json().await.map_err(map_transport)?;
        Ok(envelope.result)
    }

    /// Delete a point by id.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&json!({"points": [id]}))
            .send()
            .await
            .map_err(map_transport)?;
        Self::check(response, "delete point").await?;
        Ok(())
    }

    /// Delete every point belonging to a source file.
    pub async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .json(&json!({
                "filter": {"must": [{"key": "file_path", "match": {"value": file_path}}]}
            }))
            .send()
            .await
            .map_err(map_transport)?;
        Self::check(response, "delete by file").await?;
        debug!(file_path, "deleted points for file");
        Ok(())
    }

    /// Merge partial payload fields into an existing point.
    pub async fn update_payload(&self, id: &str, partial: &Value) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/payload?wait=true", self.collection),
            )
            .json(&json!({"payload": partial, "points": [id]}))
            .send()
            .await
            .map_err(map_transport)?;
        Self::check(response, "update payload").await?;
        Ok(())
    }

    /// Scroll all points sharing a content hash.
    ///
    /// Two files producing the same hash is a dedup opportunity for callers,
    /// never an error.
    pub async fn find_duplicates(&self, content_hash: &str) -> Result<Vec<PointRecord>> {
        let filter = json!({
            "must": [{"key": "content_hash", "match": {"value": content_hash}}]
        });

        let mut points = Vec::new();
        let mut offset: Option<Value> = None;
        loop {
            let page = self.scroll_page(&filter, 64, false, offset.as_ref()).await?;
            points.extend(page.points.into_iter().filter_map(|raw| {
                let payload = raw.payload?;
                Some(PointRecord {
                    id: id_string(&raw.id),
                    vector: raw.vector,
                    payload,
                })
            }));
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(points)
    }

    /// Collection statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await
            .map_err(map_transport)?;
        let response = Self::check(response, "collection info").await?;

        let envelope: ApiEnvelope<CollectionInfo> =
            response.json().await.map_err(map_transport)?;
        let info = envelope.result;
        let dimensions = info
            .config
            .map_or_else(|| self.provider.dimensions(), |c| c.params.vectors.size);

        Ok(StoreStats {
            total_points: info.points_count.unwrap_or(0),
            indexed_vectors: info.indexed_vectors_count.unwrap_or(0),
            dimensions,
            status: info.status.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Restartable pagination cursor over one taxonomy path.
pub struct TaxonomyScroll<'a> {
    store: &'a VectorStore,
    filter: Value,
    batch_size: usize,
    /// Include vectors in returned points (needed for centroid computation).
    pub with_vectors: bool,
    offset: Option<Value>,
    done: bool,
}

impl TaxonomyScroll<'_> {
    /// Fetch the next page, or `None` once the scroll is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<PointRecord>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .store
            .scroll_page(
                &self.filter,
                self.batch_size,
                self.with_vectors,
                self.offset.as_ref(),
            )
            .await?;

        match page.next_page_offset {
            Some(next) => self.offset = Some(next),
            None => self.done = true,
        }

        if page.points.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let points = page
            .points
            .into_iter()
            .filter_map(|raw| {
                let payload = raw.payload?;
                Some(PointRecord {
                    id: id_string(&raw.id),
                    vector: raw.vector,
                    payload,
                })
            })
            .collect();
        Ok(Some(points))
    }
}

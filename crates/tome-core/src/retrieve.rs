//! Semantic search and RAG-style retrieval.
//!
//! [`SemanticSearch`] wraps the vector store with similarity thresholds,
//! taxonomy/content-type filters and content hydration: the store holds only
//! vectors and payloads, so chunk text is recovered by re-running the
//! chunker against the source file and matching by chunk index first, then
//! content hash. Hydration never fails a query — missing files or chunks
//! yield `[Content unavailable: …]` placeholders.
//!
//! [`Retriever`] layers deduplication and a bonus re-rank on top: base
//! similarity plus small boosts for substantial content, section context and
//! query-term overlap.

use crate::canonical::checksum;
use crate::chunker::{ChunkerOptions, chunk_markdown};
use crate::payload::{ContentPayload, ContentType};
use crate::store::{ScoredPoint, SearchFilters, VectorStore};
use crate::Result;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Default number of raw candidates fetched per query.
pub const DEFAULT_TOP_K: usize = 20;

/// Default minimum similarity for retrieval.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// Default maximum chunks returned to the caller.
pub const DEFAULT_MAX_CHUNKS: usize = 10;

/// A search result with metadata, hydrated with chunk content.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Chunk text (possibly a placeholder after failed hydration).
    pub content: String,
    /// Library-relative source file.
    pub file_path: String,
    /// Heading immediately preceding the chunk.
    pub section: Option<String>,
    /// Cosine similarity of the hit.
    pub similarity: f32,
    /// Point id in the store.
    pub chunk_id: String,
    /// Taxonomy path, when classified.
    pub taxonomy_path: Option<String>,
    /// Content type of the chunk.
    pub content_type: ContentType,
    /// Full payload for downstream consumers.
    pub payload: ContentPayload,
}

/// High-level semantic search interface for the knowledge library.
pub struct SemanticSearch {
    store: Arc<VectorStore>,
    library_root: Option<PathBuf>,
    chunking: ChunkerOptions,
}

impl SemanticSearch {
    /// Create a search layer. Without a library root, hydration degrades to
    /// placeholders.
    #[must_use]
    pub fn new(
        store: Arc<VectorStore>,
        library_root: Option<PathBuf>,
        chunking: ChunkerOptions,
    ) -> Self {
        Self {
            store,
            library_root,
            chunking,
        }
    }

    /// Search the library for content similar to the query.
    ///
    /// Fetches extra raw candidates, applies the similarity threshold and
    /// optional taxonomy / content-type filters, truncates to `n_results`,
    /// then hydrates chunk content from the source files.
    pub async fn search(
        &self,
        query: &str,
        n_results: usize,
        min_similarity: f32,
        filter_taxonomy: Option<&str>,
        filter_content_type: Option<ContentType>,
    ) -> Result<Vec<SearchResult>> {
        let mut filters = SearchFilters {
            content_type: filter_content_type,
            ..SearchFilters::default()
        };
        if let Some(taxonomy) = filter_taxonomy {
            let mut parts = taxonomy.trim_matches('/').split('/');
            filters.taxonomy_level1 = parts.next().map(ToString::to_string);
            filters.taxonomy_level2 = parts.next().map(ToString::to_string);
        }

        let raw = self
            .store
            .search_text(query, n_results * 2, &filters)
            .await?;

        let mut results: Vec<SearchResult> = raw
            .into_iter()
            .filter(|hit| hit.score >= min_similarity)
            .map(SearchResult::from_hit)
            .collect();
        results.truncate(n_results);

        self.hydrate_contents(&mut results).await;
        debug!(query, hits = results.len(), "semantic search finished");
        Ok(results)
    }

    /// Find content that might be a candidate for merging with `content`.
    pub async fn find_merge_candidates(
        &self,
        content: &str,
        threshold: f32,
        exclude_file: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let mut results = self.search(content, 10, threshold, None, None).await?;
        if let Some(exclude) = exclude_file {
            results.retain(|result| result.file_path != exclude);
        }
        Ok(results)
    }

    /// Fill missing chunk content by re-chunking source files.
    ///
    /// Candidates are matched by `chunk_index` (validated against the
    /// content hash) with a hash-only fallback. Never raises: failures leave
    /// placeholders in place of content.
    async fn hydrate_contents(&self, results: &mut [SearchResult]) {
        let Some(library_root) = &self.library_root else {
            return;
        };

        let mut grouped: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, result) in results.iter().enumerate() {
            if result.content.is_empty() {
                grouped
                    .entry(result.file_path.clone())
                    .or_default()
                    .push(index);
            }
        }

        for (rel_path, indices) in grouped {
            let full_path = library_root.join(&rel_path);
            let Ok(text) = tokio::fs::read_to_string(&full_path).await else {
                for index in indices {
                    results[index].content = "[Content unavailable: file not found]".to_string();
                }
                continue;
            };

            let chunks = chunk_markdown(&text, &self.chunking);
            if chunks.is_empty() {
                for index in indices {
                    results[index].content =
                        "[Content unavailable: no chunks in file]".to_string();
                }
                continue;
            }

            let by_hash: HashMap<&str, usize> = chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| (chunk.content_hash.as_str(), i))
                .collect();

            for index in indices {
                let payload = &results[index].payload;

                let mut candidate = chunks.get(payload.chunk_index);
                if let Some(found) = candidate {
                    if found.content_hash != payload.content_hash {
                        candidate = None;
                    }
                }
                if candidate.is_none() {
                    candidate = by_hash
                        .get(payload.content_hash.as_str())
                        .and_then(|&i| chunks.get(i));
                }

                results[index].content = candidate.map_or_else(
                    || "[Content unavailable: chunk not found]".to_string(),
                    |chunk| chunk.content.clone(),
                );
            }
        }
    }

    /// Collection statistics passthrough.
    pub async fn stats(&self) -> Result<crate::store::StoreStats> {
        self.store.stats().await
    }
}

impl SearchResult {
    fn from_hit(hit: ScoredPoint) -> Self {
        let taxonomy_path = hit
            .payload
            .taxonomy
            .as_ref()
            .map(|taxonomy| taxonomy.full_path.clone());
        Self {
            // Content is stored outside the vector store; hydrated later.
            content: String::new(),
            file_path: hit.payload.file_path.clone(),
            section: hit.payload.section.clone(),
            similarity: hit.score,
            chunk_id: hit.id,
            taxonomy_path,
            content_type: hit.payload.content_type,
            payload: hit.payload,
        }
    }
}

/// An enriched chunk returned by the retriever.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// Chunk text.
    pub content: String,
    /// Library-relative source file.
    pub source_file: String,
    /// Heading immediately preceding the chunk.
    pub section: Option<String>,
    /// Cosine similarity of the underlying hit.
    pub similarity: f32,
    /// 16-hex fingerprint of the chunk content, used for deduplication.
    pub content_fingerprint: String,
    /// Lightweight metadata for downstream consumers.
    pub metadata: Value,
}

impl RetrievedChunk {
    fn from_search_result(result: SearchResult) -> Self {
        let mut metadata = serde_json::Map::new();
        if let Some(taxonomy_path) = &result.taxonomy_path {
            metadata.insert("taxonomy_path".to_string(), json!(taxonomy_path));
        }
        metadata.insert("content_type".to_string(), json!(result.content_type));
        metadata.insert("chunk_id".to_string(), json!(result.chunk_id));

        Self {
            content_fingerprint: checksum(&result.content),
            content: result.content,
            source_file: result.file_path,
            section: result.section,
            similarity: result.similarity,
            metadata: Value::Object(metadata),
        }
    }
}

/// Retriever wrapping [`SemanticSearch`] with deduplication and re-ranking.
pub struct Retriever {
    search: SemanticSearch,
    min_similarity: f32,
    max_chunks: usize,
}

impl Retriever {
    /// Create a retriever with default thresholds.
    #[must_use]
    pub fn new(search: SemanticSearch) -> Self {
        Self {
            search,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }

    /// Override the similarity floor.
    #[must_use]
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Override the output cap.
    #[must_use]
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    /// Retrieve relevant chunks for a query: search, optional file filter,
    /// fingerprint dedupe, bonus re-rank, truncate.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        file_filter: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut results = self
            .search
            .search(query, top_k, self.min_similarity, None, None)
            .await?;

        if let Some(file) = file_filter {
            results.retain(|result| result.file_path == file);
        }

        let chunks: Vec<RetrievedChunk> = results
            .into_iter()
            .map(RetrievedChunk::from_search_result)
            .collect();

        let mut deduplicated = deduplicate(chunks);
        rerank(&mut deduplicated, query);
        deduplicated.truncate(self.max_chunks);
        Ok(deduplicated)
    }

    /// Retrieve chunks from one specific file.
    pub async fn retrieve_for_file(
        &self,
        query: &str,
        file_path: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        self.retrieve(query, top_k, Some(file_path)).await
    }
}

/// Drop chunks whose fingerprint was already seen, keeping first occurrence.
fn deduplicate(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen: HashSet<String> = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.content_fingerprint.clone()))
        .collect()
}

/// Bonus-based re-rank: similarity plus length, section and term-overlap
/// boosts. Stable sort, so ties keep input order.
fn rerank(chunks: &mut [RetrievedChunk], query: &str) {
    let query_lower = query.to_lowercase();
    let query_terms: HashSet<&str> = query_lower.split_whitespace().collect();

    let score = |chunk: &RetrievedChunk| -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let length_bonus = (chunk.content.len() as f32 / 2000.0).min(0.1);
        let section_bonus = if chunk.section.is_some() { 0.05 } else { 0.0 };

        let content_lower = chunk.content.to_lowercase();
        #[allow(clippy::cast_precision_loss)]
        let overlap = query_terms
            .iter()
            .filter(|term| content_lower.contains(**term))
            .count() as f32;
        let term_bonus = (overlap * 0.02).min(0.1);

        chunk.similarity + length_bonus + section_bonus + term_bonus
    };

    chunks.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chunker::ChunkStrategy;
    use crate::store::tests::{StubProvider, test_payload};
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Small windows so the two sections of the fixture land in two chunks.
    fn chunking() -> ChunkerOptions {
        ChunkerOptions {
            min_tokens: 1,
            max_tokens: 12,
            overlap_tokens: 2,
            strategy: ChunkStrategy::Semantic,
        }
    }

    const LIBRARY_DOC: &str =
        "# Authentication\n\nJWT tokens carry signed claims for stateless auth.\n\n\
## OAuth2\n\nAuthorization flows delegate access between services.\n";

    /// Payload matching the first chunk the chunker produces for the doc.
    fn payload_for_chunk(rel_path: &str, chunk_index: usize) -> ContentPayload {
        let chunks = chunk_markdown(LIBRARY_DOC, &chunking());
        let chunk = &chunks[chunk_index];
        let mut payload = test_payload(rel_path, chunk_index);
        payload.chunk_total = chunks.len();
        payload.content_hash.clone_from(&chunk.content_hash);
        payload
    }

    async fn search_server(hits: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/collections/knowledge_library/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": hits, "status": "ok"
            })))
            .mount(&server)
            .await;
        server
    }

    fn semantic_search(server: &MockServer, library_root: Option<PathBuf>) -> SemanticSearch {
        let store = VectorStore::with_base_url(
            server.uri(),
            "knowledge_library",
            None,
            Arc::new(StubProvider { dims: 4 }),
        )
        .unwrap();
        SemanticSearch::new(Arc::new(store), library_root, chunking())
    }

    #[tokio::test]
    async fn test_hydration_by_chunk_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth.md"), LIBRARY_DOC).unwrap();

        let payload = payload_for_chunk("auth.md", 0);
        let server = search_server(serde_json::json!([
            {"id": "p1", "score": 0.9, "payload": serde_json::to_value(&payload).unwrap()}
        ]))
        .await;

        let search = semantic_search(&server, Some(dir.path().to_path_buf()));
        let results = search.search("jwt auth", 5, 0.3, None, None).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("JWT tokens"));
    }

    #[tokio::test]
    async fn test_hydration_falls_back_to_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth.md"), LIBRARY_DOC).unwrap();

        // Wrong index, correct hash: the hash fallback must find the chunk.
        let mut payload = payload_for_chunk("auth.md", 1);
        payload.chunk_index = 7;
        let server = search_server(serde_json::json!([
            {"id": "p1", "score": 0.9, "payload": serde_json::to_value(&payload).unwrap()}
        ]))
        .await;

        let search = semantic_search(&server, Some(dir.path().to_path_buf()));
        let results = search.search("oauth", 5, 0.3, None, None).await.unwrap();

        assert!(results[0].content.contains("Authorization flows"));
    }

    #[tokio::test]
    async fn test_hydration_placeholder_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let payload = test_payload("gone.md", 0);
        let server = search_server(serde_json::json!([
            {"id": "p1", "score": 0.9, "payload": serde_json::to_value(&payload).unwrap()}
        ]))
        .await;

        let search = semantic_search(&server, Some(dir.path().to_path_buf()));
        let results = search.search("anything", 5, 0.3, None, None).await.unwrap();

        assert_eq!(
            results[0].content,
            "[Content unavailable: file not found]"
        );
    }

    #[tokio::test]
    async fn test_hydration_placeholder_for_missing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth.md"), LIBRARY_DOC).unwrap();

        // Index out of range and a hash no chunk carries.
        let mut payload = test_payload("auth.md", 0);
        payload.chunk_index = 42;
        payload.content_hash = "ffffffffffffffff".to_string();
        let server = search_server(serde_json::json!([
            {"id": "p1", "score": 0.9, "payload": serde_json::to_value(&payload).unwrap()}
        ]))
        .await;

        let search = semantic_search(&server, Some(dir.path().to_path_buf()));
        let results = search.search("anything", 5, 0.3, None, None).await.unwrap();

        assert_eq!(
            results[0].content,
            "[Content unavailable: chunk not found]"
        );
    }

    #[tokio::test]
    async fn test_min_similarity_filters_hits() {
        let payload = test_payload("auth.md", 0);
        let server = search_server(serde_json::json!([
            {"id": "high", "score": 0.8, "payload": serde_json::to_value(&payload).unwrap()},
            {"id": "low", "score": 0.1, "payload": serde_json::to_value(&payload).unwrap()},
        ]))
        .await;

        let search = semantic_search(&server, None);
        let results = search.search("query", 5, 0.3, None, None).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "high");
    }

    #[tokio::test]
    async fn test_retriever_deduplicates_by_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth.md"), LIBRARY_DOC).unwrap();

        // Two hits resolving to the same chunk content.
        let payload = payload_for_chunk("auth.md", 0);
        let server = search_server(serde_json::json!([
            {"id": "p1", "score": 0.9, "payload": serde_json::to_value(&payload).unwrap()},
            {"id": "p2", "score": 0.7, "payload": serde_json::to_value(&payload).unwrap()},
        ]))
        .await;

        let retriever = Retriever::new(semantic_search(&server, Some(dir.path().to_path_buf())));
        let chunks = retriever.retrieve("jwt", 10, None).await.unwrap();

        assert_eq!(chunks.len(), 1);
        let fingerprints: HashSet<&str> = chunks
            .iter()
            .map(|chunk| chunk.content_fingerprint.as_str())
            .collect();
        assert_eq!(fingerprints.len(), chunks.len());
    }

    #[tokio::test]
    async fn test_retriever_file_filter() {
        let payload_a = test_payload("a.md", 0);
        let payload_b = test_payload("b.md", 0);
        let server = search_server(serde_json::json!([
            {"id": "p1", "score": 0.9, "payload": serde_json::to_value(&payload_a).unwrap()},
            {"id": "p2", "score": 0.8, "payload": serde_json::to_value(&payload_b).unwrap()},
        ]))
        .await;

        let retriever = Retriever::new(semantic_search(&server, None));
        let chunks = retriever.retrieve_for_file("query", "b.md", 10).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_file, "b.md");
    }

    #[test]
    fn test_rerank_prefers_section_and_term_overlap() {
        let make = |content: &str, section: Option<&str>, similarity: f32| RetrievedChunk {
            content: content.to_string(),
            source_file: "f.md".to_string(),
            section: section.map(ToString::to_string),
            similarity,
            content_fingerprint: checksum(content),
            metadata: Value::Null,
        };

        let mut chunks = vec![
            make("unrelated words entirely", None, 0.5),
            make("jwt tokens explained in depth", Some("Auth"), 0.5),
        ];
        rerank(&mut chunks, "jwt tokens");

        assert!(chunks[0].content.contains("jwt"));
    }

    #[test]
    fn test_rerank_length_bonus_caps() {
        let long_content = "word ".repeat(2000);
        let make = |content: &str, similarity: f32| RetrievedChunk {
            content: content.to_string(),
            source_file: "f.md".to_string(),
            section: None,
            similarity,
            content_fingerprint: checksum(content),
            metadata: Value::Null,
        };

        // Length bonus caps at 0.1, so a 0.15 similarity edge survives.
        let mut chunks = vec![make(&long_content, 0.5), make("short", 0.65)];
        rerank(&mut chunks, "query");
        assert_eq!(chunks[0].content, "short");
    }

    #[test]
    fn test_deduplicate_keeps_first_occurrence() {
        let chunk = |content: &str, similarity: f32| RetrievedChunk {
            content: content.to_string(),
            source_file: "f.md".to_string(),
            section: None,
            similarity,
            content_fingerprint: checksum(content),
            metadata: Value::Null,
        };

        let result = deduplicate(vec![
            chunk("same", 0.9),
            chunk("same", 0.5),
            chunk("different", 0.7),
        ]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].similarity, 0.9);
    }
}

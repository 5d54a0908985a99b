//! Per-category centroid computation and caching.
//!
//! The fast classification tier compares content embeddings against the mean
//! embedding of each taxonomy category. Centroids are held in memory, backed
//! by a single JSON artifact (`centroids.json`) that is replaced atomically
//! on save. A centroid exists only when the category has at least the
//! configured minimum of indexed vectors.

use crate::numeric::{cosine_similarity, mean_vector};
use crate::store::VectorStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the cache artifact inside the cache directory.
pub const CENTROID_CACHE_FILE: &str = "centroids.json";

/// Cap on points sampled per category during centroid computation.
const MAX_SAMPLE_POINTS: usize = 1000;

/// Scroll page size used while sampling category vectors.
const SAMPLE_BATCH_SIZE: usize = 128;

/// Manages category centroids for fast-tier classification.
pub struct CentroidManager {
    cache_dir: PathBuf,
    centroids: HashMap<String, Vec<f32>>,
}

impl CentroidManager {
    /// Create a manager caching under `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            centroids: HashMap::new(),
        }
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CENTROID_CACHE_FILE)
    }

    /// Load cached centroids from disk. Returns the number loaded; a
    /// missing cache file is not an error.
    pub async fn load_from_cache(&mut self) -> Result<usize> {
        let path = self.cache_path();
        if !tokio::fs::try_exists(&path).await? {
            info!(path = %path.display(), "no centroid cache found");
            return Ok(0);
        }

        let contents = tokio::fs::read_to_string(&path).await?;
        self.centroids = serde_json::from_str(&contents)?;
        info!(count = self.centroids.len(), "loaded centroids from cache");
        Ok(self.centroids.len())
    }

    /// Persist centroids to the cache artifact; atomic temp + rename.
    pub async fn save_to_cache(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self.cache_path();
        let tmp_path = path.with_extension("json.tmp");

        let contents = serde_json::to_string(&self.centroids)?;
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(count = self.centroids.len(), "saved centroids to cache");
        Ok(())
    }

    /// Compute centroids for the given taxonomy paths from indexed content.
    ///
    /// For each path, up to 1000 points are scrolled with vectors and the
    /// element-wise mean is assigned when at least `min_samples` vectors are
    /// available. Idempotent; repeated runs converge to the same mapping. A
    /// failing category query is skipped with a warning rather than aborting
    /// the whole pass.
    pub async fn compute_centroids(
        &mut self,
        store: &VectorStore,
        paths: &[String],
        min_samples: usize,
    ) -> Result<usize> {
        let mut computed = 0;

        for path in paths {
            match self.sample_category(store, path, min_samples).await {
                Ok(Some(centroid)) => {
                    self.centroids.insert(path.clone(), centroid);
                    computed += 1;
                    debug!(path, "computed centroid");
                },
                Ok(None) => {},
                Err(err) => {
                    warn!(path, error = %err, "failed to sample category, skipping");
                },
            }
        }

        info!(
            computed,
            categories = paths.len(),
            "centroid computation pass finished"
        );
        Ok(computed)
    }

    async fn sample_category(
        &self,
        store: &VectorStore,
        path: &str,
        min_samples: usize,
    ) -> Result<Option<Vec<f32>>> {
        let mut scroll = store.iter_by_taxonomy(path, SAMPLE_BATCH_SIZE);
        scroll.with_vectors = true;

        let mut vectors = Vec::new();
        while let Some(batch) = scroll.next_batch().await? {
            for point in batch {
                if let Some(vector) = point.vector {
                    vectors.push(vector);
                }
                if vectors.len() >= MAX_SAMPLE_POINTS {
                    break;
                }
            }
            if vectors.len() >= MAX_SAMPLE_POINTS {
                break;
            }
        }

        if vectors.len() < min_samples {
            return Ok(None);
        }

        mean_vector(&vectors)
            .map(Some)
            .ok_or_else(|| Error::Store(format!("inconsistent vector dimensions under '{path}'")))
    }

    /// Centroid for a path, when computed.
    #[must_use]
    pub fn centroid(&self, path: &str) -> Option<&Vec<f32>> {
        self.centroids.get(path)
    }

    /// Whether a centroid exists for the path.
    #[must_use]
    pub fn has_centroid(&self, path: &str) -> bool {
        self.centroids.contains_key(path)
    }

    /// Number of cached centroids.
    #[must_use]
    pub fn centroid_count(&self) -> usize {
        self.centroids.len()
    }

    /// Snapshot of all centroids.
    #[must_use]
    pub fn all_centroids(&self) -> &HashMap<String, Vec<f32>> {
        &self.centroids
    }

    /// Running-mean update with a new member vector.
    ///
    /// `centroid ← centroid + (new − centroid) / current_count`, where
    /// `current_count` is the category size after adding the new item. An
    /// absent centroid is assigned directly. O(1) per new content item.
    pub fn update_incremental(&mut self, path: &str, new_vector: &[f32], current_count: usize) {
        match self.centroids.get_mut(path) {
            None => {
                self.centroids.insert(path.to_string(), new_vector.to_vec());
            },
            Some(centroid) => {
                if centroid.len() != new_vector.len() || current_count == 0 {
                    warn!(path, "ignoring incremental update with mismatched input");
                    return;
                }
                #[allow(clippy::cast_precision_loss)]
                let count = current_count as f32;
                for (value, new) in centroid.iter_mut().zip(new_vector.iter()) {
                    *value += (new - *value) / count;
                }
            },
        }
    }

    /// Top-k nearest centroids to a query vector by cosine similarity,
    /// sorted descending.
    #[must_use]
    pub fn find_nearest(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        let mut scores: Vec<(String, f32)> = self
            .centroids
            .iter()
            .map(|(path, centroid)| (path.clone(), cosine_similarity(query, centroid)))
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(top_k);
        scores
    }

    /// Drop the centroid for a deleted category.
    pub fn clear(&mut self, path: &str) {
        self.centroids.remove(path);
    }

    /// Replace the in-memory mapping (tests, warm handover).
    pub fn set_centroids(&mut self, centroids: HashMap<String, Vec<f32>>) {
        self.centroids = centroids;
    }
}

impl std::fmt::Debug for CentroidManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentroidManager")
            .field("cache_dir", &self.cache_dir)
            .field("centroid_count", &self.centroids.len())
            .finish()
    }
}

/// Convenience: cache directory path helper for config consumers.
#[must_use]
pub fn cache_file_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(CENTROID_CACHE_FILE)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::store::tests::{StubProvider, test_payload};
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_with(centroids: &[(&str, Vec<f32>)]) -> CentroidManager {
        let mut manager = CentroidManager::new("/tmp/does-not-matter");
        manager.set_centroids(
            centroids
                .iter()
                .map(|(path, vector)| ((*path).to_string(), vector.clone()))
                .collect(),
        );
        manager
    }

    #[test]
    fn test_find_nearest_sorts_by_cosine() {
        let manager = manager_with(&[
            ("technical/programming", vec![1.0, 0.0]),
            ("domain/business", vec![0.0, 1.0]),
            ("technical/architecture", vec![0.7, 0.7]),
        ]);

        let nearest = manager.find_nearest(&[1.0, 0.1], 2);
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].0, "technical/programming");
        assert!(nearest[0].1 > nearest[1].1);
    }

    #[test]
    fn test_find_nearest_with_no_centroids() {
        let manager = CentroidManager::new("/tmp/x");
        assert!(manager.find_nearest(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_incremental_update_matches_running_mean() {
        let mut manager = CentroidManager::new("/tmp/x");

        // First member becomes the centroid.
        manager.update_incremental("t/p", &[2.0, 4.0], 1);
        assert_eq!(manager.centroid("t/p").unwrap(), &vec![2.0, 4.0]);

        // Second member: mean of the two.
        manager.update_incremental("t/p", &[4.0, 8.0], 2);
        assert_eq!(manager.centroid("t/p").unwrap(), &vec![3.0, 6.0]);

        // Third member keeps tracking the true mean.
        manager.update_incremental("t/p", &[6.0, 3.0], 3);
        assert_eq!(manager.centroid("t/p").unwrap(), &vec![4.0, 5.0]);
    }

    #[test]
    fn test_clear_removes_centroid() {
        let mut manager = manager_with(&[("t/p", vec![1.0])]);
        assert!(manager.has_centroid("t/p"));
        manager.clear("t/p");
        assert!(!manager.has_centroid("t/p"));
        assert_eq!(manager.centroid_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_roundtrip_is_atomic_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CentroidManager::new(dir.path());
        manager.update_incremental("technical/programming", &[0.5, 0.5], 1);
        manager.save_to_cache().await.unwrap();

        assert!(dir.path().join(CENTROID_CACHE_FILE).exists());
        assert!(!dir.path().join("centroids.json.tmp").exists());

        let mut fresh = CentroidManager::new(dir.path());
        let loaded = fresh.load_from_cache().await.unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(
            fresh.centroid("technical/programming").unwrap(),
            &vec![0.5, 0.5]
        );
    }

    #[tokio::test]
    async fn test_load_missing_cache_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CentroidManager::new(dir.path().join("never-created"));
        assert_eq!(manager.load_from_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_compute_centroids_respects_min_samples() {
        let server = MockServer::start().await;
        let payload = serde_json::to_value(test_payload("a.md", 0)).unwrap();

        // Three vectors under technical/programming.
        Mock::given(method("POST"))
            .and(url_path("/collections/knowledge_library/points/scroll"))
            .and(body_partial_json(serde_json::json!({
                "filter": {"must": [
                    {"key": "taxonomy.full_path", "match": {"value": "technical/programming"}}
                ]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "points": [
                        {"id": "p1", "payload": payload, "vector": [1.0, 0.0]},
                        {"id": "p2", "payload": payload, "vector": [0.0, 1.0]},
                        {"id": "p3", "payload": payload, "vector": [0.5, 0.5]},
                    ],
                    "next_page_offset": null
                },
                "status": "ok"
            })))
            .mount(&server)
            .await;
        // Only one vector under domain/business: below min_samples.
        Mock::given(method("POST"))
            .and(url_path("/collections/knowledge_library/points/scroll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "points": [{"id": "p4", "payload": payload, "vector": [0.9, 0.1]}],
                    "next_page_offset": null
                },
                "status": "ok"
            })))
            .mount(&server)
            .await;

        let store = VectorStore::with_base_url(
            server.uri(),
            "knowledge_library",
            None,
            Arc::new(StubProvider { dims: 2 }),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut manager = CentroidManager::new(dir.path());
        let computed = manager
            .compute_centroids(
                &store,
                &[
                    "technical/programming".to_string(),
                    "domain/business".to_string(),
                ],
                3,
            )
            .await
            .unwrap();

        assert_eq!(computed, 1);
        let centroid = manager.centroid("technical/programming").unwrap();
        assert!((centroid[0] - 0.5).abs() < 1e-6);
        assert!((centroid[1] - 0.5).abs() < 1e-6);
        assert!(!manager.has_centroid("domain/business"));
    }
}

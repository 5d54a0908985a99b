//! Composite ranking over similarity, taxonomy overlap and recency.
//!
//! Raw similarity hits are re-scored as a weighted sum of three signals:
//!
//! - **similarity** — the vector-search score, taken as-is
//! - **taxonomy** — piecewise overlap between the query's taxonomy path and
//!   the result's (exact match > more-specific > more-general > sibling)
//! - **recency** — exponential half-life decay over the result's age,
//!   preferring `updated_at` over `created_at`
//!
//! Weights are normalized to sum to 1, which keeps the composite score in
//! `[0, 1]` whenever the inputs are. Ordering is deterministic: ties keep
//! input order (stable sort).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_similarity_weight() -> f32 {
    0.6
}

fn default_taxonomy_weight() -> f32 {
    0.25
}

fn default_recency_weight() -> f32 {
    0.15
}

fn default_half_life_days() -> f32 {
    30.0
}

/// Configurable weights for the ranking signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingWeights {
    /// Weight for vector similarity.
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    /// Weight for taxonomy overlap.
    #[serde(default = "default_taxonomy_weight")]
    pub taxonomy_weight: f32,

    /// Weight for recency.
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Half-life for recency decay, in days.
    #[serde(default = "default_half_life_days")]
    pub recency_half_life_days: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity_weight: default_similarity_weight(),
            taxonomy_weight: default_taxonomy_weight(),
            recency_weight: default_recency_weight(),
            recency_half_life_days: default_half_life_days(),
        }
    }
}

impl RankingWeights {
    /// Whether the three signal weights already sum to ~1.0.
    #[must_use]
    pub fn validate(&self) -> bool {
        let total = self.similarity_weight + self.taxonomy_weight + self.recency_weight;
        (total - 1.0).abs() < 0.01
    }

    /// Return weights scaled to sum to 1.0. Zero totals fall back to the
    /// defaults.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let total = self.similarity_weight + self.taxonomy_weight + self.recency_weight;
        if total == 0.0 {
            return Self {
                recency_half_life_days: self.recency_half_life_days,
                ..Self::default()
            };
        }
        Self {
            similarity_weight: self.similarity_weight / total,
            taxonomy_weight: self.taxonomy_weight / total,
            recency_weight: self.recency_weight / total,
            recency_half_life_days: self.recency_half_life_days,
        }
    }
}

/// One raw hit to be ranked.
#[derive(Debug, Clone)]
pub struct RankingCandidate {
    /// Content id of the hit.
    pub content_id: String,
    /// Vector-search similarity in `[0, 1]`.
    pub similarity: f32,
    /// Taxonomy path of the result, when classified.
    pub taxonomy_path: Option<String>,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Last-update timestamp (preferred for recency).
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-signal weighted contributions for one ranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// `similarity × similarity_weight`.
    pub similarity_weighted: f32,
    /// `taxonomy × taxonomy_weight`.
    pub taxonomy_weighted: f32,
    /// `recency × recency_weight`.
    pub recency_weighted: f32,
}

/// A result with its composite score and the signals behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    /// Content id of the hit.
    pub content_id: String,
    /// Weighted sum of the three signals, in `[0, 1]`.
    pub composite_score: f32,
    /// Raw similarity signal.
    pub similarity_score: f32,
    /// Raw taxonomy overlap signal.
    pub taxonomy_score: f32,
    /// Raw recency signal.
    pub recency_score: f32,
    /// Weighted per-signal contributions.
    pub breakdown: ScoreBreakdown,
}

/// Ranks search results using multiple signals.
pub struct CompositeRanker {
    weights: RankingWeights,
}

impl CompositeRanker {
    /// Create a ranker; the weights are normalized up front.
    #[must_use]
    pub fn new(weights: RankingWeights) -> Self {
        Self {
            weights: weights.normalize(),
        }
    }

    /// Current (normalized) weights.
    #[must_use]
    pub const fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Rank candidates by composite score, descending. Ties keep input
    /// order. `now` defaults to the current time.
    #[must_use]
    pub fn rank(
        &self,
        candidates: &[RankingCandidate],
        query_taxonomy_path: Option<&str>,
        now: Option<DateTime<Utc>>,
    ) -> Vec<RankedResult> {
        let now = now.unwrap_or_else(Utc::now);

        let mut results: Vec<RankedResult> = candidates
            .iter()
            .map(|candidate| self.score(candidate, query_taxonomy_path, now))
            .collect();

        results.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    fn score(
        &self,
        candidate: &RankingCandidate,
        query_taxonomy_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> RankedResult {
        let similarity = candidate.similarity.clamp(0.0, 1.0);
        let taxonomy = taxonomy_score(query_taxonomy_path, candidate.taxonomy_path.as_deref());
        let recency = self.recency_score(candidate.created_at, candidate.updated_at, now);

        let breakdown = ScoreBreakdown {
            similarity_weighted: self.weights.similarity_weight * similarity,
            taxonomy_weighted: self.weights.taxonomy_weight * taxonomy,
            recency_weighted: self.weights.recency_weight * recency,
        };
        let composite =
            breakdown.similarity_weighted + breakdown.taxonomy_weighted + breakdown.recency_weighted;

        RankedResult {
            content_id: candidate.content_id.clone(),
            composite_score: composite,
            similarity_score: similarity,
            taxonomy_score: taxonomy,
            recency_score: recency,
            breakdown,
        }
    }

    /// Exponential half-life decay over the result age.
    ///
    /// Timestamps are UTC throughout the crate, so the subtraction is always
    /// between like-aware values. Future timestamps score 1.0 (very recent);
    /// missing timestamps score the neutral 0.5.
    fn recency_score(
        &self,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> f32 {
        let Some(timestamp) = updated_at.or(created_at) else {
            return 0.5;
        };

        let age = now - timestamp;
        if age < chrono::Duration::zero() {
            return 1.0;
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let age_days = (age.num_seconds() as f64 / 86_400.0) as f32;
        let score = 0.5f32.powf(age_days / self.weights.recency_half_life_days);
        score.clamp(0.0, 1.0)
    }

    /// Re-rank with per-content boost multipliers; boosted composites are
    /// clamped to 1.0.
    #[must_use]
    pub fn rerank(
        &self,
        mut results: Vec<RankedResult>,
        boosts: &HashMap<String, f32>,
    ) -> Vec<RankedResult> {
        if boosts.is_empty() {
            return results;
        }

        for result in &mut results {
            if let Some(boost) = boosts.get(&result.content_id) {
                result.composite_score = (result.composite_score * boost).min(1.0);
            }
        }
        results.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    /// Human-readable explanation of one ranked result.
    #[must_use]
    pub fn explain(&self, result: &RankedResult) -> String {
        format!(
            "Composite Score: {:.3}\n  - Similarity: {:.3} (weight: {:.2})\n  - Taxonomy: {:.3} (weight: {:.2})\n  - Recency: {:.3} (weight: {:.2})",
            result.composite_score,
            result.similarity_score,
            self.weights.similarity_weight,
            result.taxonomy_score,
            self.weights.taxonomy_weight,
            result.recency_score,
            self.weights.recency_weight,
        )
    }
}

/// Piecewise taxonomy overlap score.
///
/// With `q` the query parts, `r` the result parts and `c` the common prefix
/// length (stopping at the first mismatch), `base = c / max(|q|, |r|)`:
///
/// - identical paths score 1.0
/// - result more specific: `0.6 + 0.4·base`
/// - result more general: `0.4 + 0.4·base`
/// - siblings: `0.3 + 0.3·base`
/// - nothing in common: 0.0
/// - anything else: `base`
#[must_use]
pub fn taxonomy_score(query_path: Option<&str>, result_path: Option<&str>) -> f32 {
    let (Some(query), Some(result)) = (query_path, result_path) else {
        return 0.0;
    };
    if query.is_empty() || result.is_empty() {
        return 0.0;
    }

    let q: Vec<&str> = query.trim_matches('/').split('/').collect();
    let r: Vec<&str> = result.trim_matches('/').split('/').collect();

    if q == r {
        return 1.0;
    }

    let common = q.iter().zip(r.iter()).take_while(|(a, b)| a == b).count();
    if common == 0 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let base = common as f32 / q.len().max(r.len()) as f32;

    if common == q.len() && r.len() > q.len() {
        // Result is more specific (descendant of the query path).
        0.6 + 0.4 * base
    } else if common == r.len() && q.len() > r.len() {
        // Result is more general (ancestor of the query path).
        0.4 + 0.4 * base
    } else if common == q.len() - 1 && common == r.len() - 1 {
        // Siblings under the same parent.
        0.3 + 0.3 * base
    } else {
        base
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(id: &str, similarity: f32, taxonomy: Option<&str>) -> RankingCandidate {
        RankingCandidate {
            content_id: id.to_string(),
            similarity,
            taxonomy_path: taxonomy.map(ToString::to_string),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_taxonomy_exact_match() {
        let score = taxonomy_score(
            Some("technical/programming/python"),
            Some("technical/programming/python"),
        );
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_taxonomy_result_more_general() {
        let score = taxonomy_score(
            Some("technical/programming/python"),
            Some("technical/programming"),
        );
        assert!(score > 0.4 && score < 0.8, "got {score}");
    }

    #[test]
    fn test_taxonomy_result_more_specific() {
        let score = taxonomy_score(
            Some("technical/programming"),
            Some("technical/programming/python"),
        );
        assert!(score > 0.6 && score < 1.0, "got {score}");
    }

    #[test]
    fn test_taxonomy_disjoint_paths() {
        let score = taxonomy_score(Some("technical/programming"), Some("domain/business"));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_taxonomy_siblings() {
        let score = taxonomy_score(
            Some("technical/programming/python"),
            Some("technical/programming/rust"),
        );
        // Siblings: 0.3 + 0.3 * (2/3)
        assert!((score - 0.5).abs() < 0.01, "got {score}");
    }

    #[test]
    fn test_taxonomy_missing_paths() {
        assert_eq!(taxonomy_score(None, Some("a/b")), 0.0);
        assert_eq!(taxonomy_score(Some("a/b"), None), 0.0);
        assert_eq!(taxonomy_score(Some(""), Some("a")), 0.0);
    }

    #[test]
    fn test_recency_half_life() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        let now = Utc::now();

        let fresh = ranker.recency_score(Some(now), None, now);
        assert!(fresh >= 0.95);

        let at_half_life = ranker.recency_score(Some(now - chrono::Duration::days(30)), None, now);
        assert!((at_half_life - 0.5).abs() < 0.01, "got {at_half_life}");

        let old = ranker.recency_score(Some(now - chrono::Duration::days(90)), None, now);
        assert!(old > 0.1 && old < 0.2, "got {old}");
    }

    #[test]
    fn test_recency_future_timestamp_is_very_recent() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        let now = Utc::now();
        let score = ranker.recency_score(Some(now + chrono::Duration::days(3)), None, now);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_recency_missing_timestamp_is_neutral() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        assert_eq!(ranker.recency_score(None, None, Utc::now()), 0.5);
    }

    #[test]
    fn test_recency_prefers_updated_at() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        let now = Utc::now();
        let score = ranker.recency_score(
            Some(now - chrono::Duration::days(300)),
            Some(now),
            now,
        );
        assert!(score >= 0.95);
    }

    #[test]
    fn test_rank_sorts_descending_with_breakdown() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        let candidates = vec![
            candidate("low", 0.2, None),
            candidate("high", 0.9, Some("technical/programming")),
        ];

        let ranked = ranker.rank(&candidates, Some("technical/programming"), None);
        assert_eq!(ranked[0].content_id, "high");
        assert_eq!(ranked[0].taxonomy_score, 1.0);

        let sum = ranked[0].breakdown.similarity_weighted
            + ranked[0].breakdown.taxonomy_weighted
            + ranked[0].breakdown.recency_weighted;
        assert!((sum - ranked[0].composite_score).abs() < 1e-6);
    }

    #[test]
    fn test_ranking_is_stable_for_ties() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        let candidates = vec![
            candidate("first", 0.5, None),
            candidate("second", 0.5, None),
            candidate("third", 0.5, None),
        ];

        let ranked = ranker.rank(&candidates, None, None);
        let order: Vec<&str> = ranked.iter().map(|r| r.content_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rerank_boosts_and_clamps() {
        let ranker = CompositeRanker::new(RankingWeights::default());
        let candidates = vec![candidate("a", 0.9, None), candidate("b", 0.8, None)];
        let ranked = ranker.rank(&candidates, None, None);

        let mut boosts = HashMap::new();
        boosts.insert("b".to_string(), 10.0);
        let reranked = ranker.rerank(ranked, &boosts);

        assert_eq!(reranked[0].content_id, "b");
        assert!(reranked[0].composite_score <= 1.0);
    }

    #[test]
    fn test_weight_normalization() {
        let weights = RankingWeights {
            similarity_weight: 3.0,
            taxonomy_weight: 1.0,
            recency_weight: 1.0,
            recency_half_life_days: 30.0,
        };
        assert!(!weights.validate());
        let normalized = weights.normalize();
        assert!(normalized.validate());
        assert!((normalized.similarity_weight - 0.6).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn test_composite_stays_in_unit_interval(
            similarity in 0.0f32..1.0,
            has_taxonomy in proptest::bool::ANY,
            age_days in 0i64..720,
        ) {
            let ranker = CompositeRanker::new(RankingWeights::default());
            let now = Utc::now();
            let candidates = vec![RankingCandidate {
                content_id: "x".to_string(),
                similarity,
                taxonomy_path: has_taxonomy.then(|| "technical/programming".to_string()),
                created_at: Some(now - chrono::Duration::days(age_days)),
                updated_at: None,
            }];

            let ranked = ranker.rank(&candidates, Some("technical"), Some(now));
            prop_assert!((0.0..=1.0).contains(&ranked[0].composite_score));
        }
    }
}

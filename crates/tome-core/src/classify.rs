//! Two-tier content classification.
//!
//! The fast tier compares a content embedding against cached category
//! centroids (sub-100ms, no network). When the fast tier is not ready or its
//! confidence lands below the configured threshold, the orchestrator
//! escalates to the LLM tier, which renders the taxonomy tree into a prompt
//! and expects a JSON reply. The LLM may also propose a new category, which
//! is forwarded to the taxonomy manager; a rejected proposal is dropped, not
//! fatal.
//!
//! LLM replies are parsed defensively: fenced or bare JSON is accepted, the
//! first balanced object is extracted, and unparseable replies downgrade to
//! `uncategorized` instead of erroring. Transport failures propagate.

use crate::centroids::CentroidManager;
use crate::config::ClassificationConfig;
use crate::embeddings::EmbeddingProvider;
use crate::numeric::{cosine_similarity, normalize_confidence};
use crate::payload::ClassificationTier;
use crate::taxonomy::{CategoryProposal, TaxonomyManager};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Path assigned when no classification is possible.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Default number of fast-tier candidates.
const DEFAULT_TOP_K: usize = 5;

/// Client for the external LLM endpoint.
///
/// The transport lives outside the core; this seam only promises a text
/// completion for a prompt.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a prompt, returning the raw model reply.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Result of classifying content into the taxonomy.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    /// Best matching taxonomy path.
    pub primary_path: String,
    /// Confidence of the primary match, in `[0, 1]`.
    pub primary_confidence: f32,
    /// Alternative `(path, confidence)` candidates.
    pub alternatives: Vec<(String, f32)>,
    /// Tier that produced this result.
    pub tier_used: ClassificationTier,
    /// New category proposed by the LLM, when accepted by the taxonomy.
    pub new_category: Option<CategoryProposal>,
    /// Model reasoning, when the LLM tier ran.
    pub reasoning: Option<String>,
    /// Wall-clock processing time.
    pub processing_time_ms: f64,
}

impl ClassificationResult {
    fn uncategorized(tier: ClassificationTier, elapsed_ms: f64) -> Self {
        Self {
            primary_path: UNCATEGORIZED.to_string(),
            primary_confidence: 0.0,
            alternatives: Vec::new(),
            tier_used: tier,
            new_category: None,
            reasoning: None,
            processing_time_ms: elapsed_ms,
        }
    }
}

/// Classify an embedding against cached centroids.
///
/// Returns `uncategorized` with zero confidence when no centroids exist.
#[must_use]
pub fn fast_classify(
    centroids: &CentroidManager,
    embedding: &[f32],
    top_k: usize,
) -> ClassificationResult {
    let start = Instant::now();
    let mut matches = centroids.find_nearest(embedding, top_k);
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    if matches.is_empty() {
        return ClassificationResult::uncategorized(ClassificationTier::Fast, elapsed_ms);
    }

    let (primary_path, primary_confidence) = matches.remove(0);
    debug!(
        path = %primary_path,
        confidence = primary_confidence,
        elapsed_ms,
        "fast tier classified"
    );

    ClassificationResult {
        primary_path,
        primary_confidence,
        alternatives: matches,
        tier_used: ClassificationTier::Fast,
        new_category: None,
        reasoning: None,
        processing_time_ms: elapsed_ms,
    }
}

/// Cosine confidence of an embedding against one specific category.
#[must_use]
pub fn confidence_for_path(centroids: &CentroidManager, embedding: &[f32], path: &str) -> f32 {
    centroids
        .centroid(path)
        .map_or(0.0, |centroid| cosine_similarity(embedding, centroid))
}

/// Which taxonomy paths currently have a centroid.
#[must_use]
pub fn category_coverage(
    taxonomy: &TaxonomyManager,
    centroids: &CentroidManager,
) -> HashMap<String, bool> {
    taxonomy
        .get_all_paths()
        .into_iter()
        .map(|path| {
            let covered = centroids.has_centroid(&path);
            (path, covered)
        })
        .collect()
}

/// Successfully parsed fields of an LLM classification reply.
#[derive(Debug, Clone)]
pub(crate) struct LlmClassification {
    primary_path: String,
    confidence: f32,
    alternatives: Vec<(String, f32)>,
    reasoning: Option<String>,
    new_category: Option<CategoryProposal>,
}

/// Tagged outcome of parsing an LLM reply; the orchestrator pattern-matches.
#[derive(Debug)]
pub(crate) enum LlmReply {
    Parsed(LlmClassification),
    Invalid(String),
}

/// Extract the first balanced JSON object from free-form text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            },
            _ => {},
        }
    }
    None
}

/// Strip triple-backtick fences (with or without a language tag) around the
/// reply body, when present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(inner_start) = trimmed.find("```") {
        let after_fence = &trimmed[inner_start + 3..];
        // Skip an optional language tag on the fence line.
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    trimmed
}

/// Normalize a confidence field: clamp finite numbers, default everything
/// else to 0.5.
fn confidence_field(value: Option<&Value>) -> f32 {
    #[allow(clippy::cast_possible_truncation)]
    match value.and_then(Value::as_f64) {
        Some(number) => normalize_confidence(number as f32),
        None => 0.5,
    }
}

pub(crate) fn parse_llm_reply(response: &str) -> LlmReply {
    let body = strip_fences(response);
    let Some(object) = extract_json_object(body) else {
        return LlmReply::Invalid("no JSON object in reply".to_string());
    };

    let data: Value = match serde_json::from_str(object) {
        Ok(value) => value,
        Err(err) => return LlmReply::Invalid(format!("invalid JSON: {err}")),
    };

    let primary_path = data
        .get("primary_path")
        .and_then(Value::as_str)
        .unwrap_or(UNCATEGORIZED)
        .to_string();
    let confidence = confidence_field(data.get("confidence"));

    let alternatives = data
        .get("alternatives")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let path = entry.get("path")?.as_str()?;
                    if path.is_empty() {
                        return None;
                    }
                    Some((path.to_string(), confidence_field(entry.get("confidence"))))
                })
                .collect()
        })
        .unwrap_or_default();

    let reasoning = data
        .get("reasoning")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let new_category = data
        .get("new_category_proposal")
        .filter(|value| !value.is_null())
        .map(|proposal| CategoryProposal {
            name: proposal
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: proposal
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parent_path: proposal
                .get("parent_path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            confidence: confidence_field(proposal.get("confidence")),
            evidence_ids: Vec::new(),
        });

    LlmReply::Parsed(LlmClassification {
        primary_path,
        confidence,
        alternatives,
        reasoning,
        new_category,
    })
}

/// Render the taxonomy tree as an indented listing for the prompt.
fn render_taxonomy_tree(taxonomy: &TaxonomyManager) -> String {
    let mut lines = Vec::new();
    for path in taxonomy.get_all_paths() {
        let depth = path.matches('/').count();
        let description = taxonomy
            .get_category(&path)
            .map(|node| node.description.clone())
            .unwrap_or_default();
        lines.push(format!("{}- {path}: {description}", "  ".repeat(depth)));
    }
    lines.join("\n")
}

fn build_prompt(
    taxonomy_tree: &str,
    title: &str,
    content: &str,
    max_content_length: usize,
) -> String {
    let mut excerpt: String = content.chars().take(max_content_length).collect();
    if content.chars().count() > max_content_length {
        excerpt.push_str("...");
    }

    format!(
        "You are a content classification expert. Classify the content below into \
the best matching taxonomy category.\n\n\
Available categories:\n{taxonomy_tree}\n\n\
Title: {title}\n\
Content (excerpt): {excerpt}\n\n\
Rules:\n\
1. Pick the best matching category path and give your confidence (0.0-1.0).\n\
2. List up to 3 alternative paths with confidences.\n\
3. Only if no existing category fits (confidence < 0.7), you may propose one \
new subcategory under a level-2+ parent.\n\n\
Respond with JSON only:\n\
{{\"primary_path\": \"path/to/category\", \"confidence\": 0.85, \
\"alternatives\": [{{\"path\": \"other/path\", \"confidence\": 0.6}}], \
\"reasoning\": \"brief explanation\", \"new_category_proposal\": null}}"
    )
}

/// Snapshot of classifier readiness and configuration.
#[derive(Debug, Clone)]
pub struct ClassificationStats {
    /// Whether the fast tier has centroids to work with.
    pub fast_tier_ready: bool,
    /// Number of cached centroids.
    pub centroid_count: usize,
    /// Fast-tier escalation threshold.
    pub confidence_threshold: f32,
    /// Number of taxonomy paths known.
    pub taxonomy_paths: usize,
}

/// Two-tier classification orchestrator.
///
/// Owns shared handles to the taxonomy (single writer, behind a mutex) and
/// the centroid map (read-mostly, behind a rwlock).
pub struct ClassificationService {
    taxonomy: Arc<Mutex<TaxonomyManager>>,
    centroids: Arc<RwLock<CentroidManager>>,
    provider: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn CompletionClient>,
    config: ClassificationConfig,
}

impl ClassificationService {
    /// Assemble the service from its collaborators.
    pub fn new(
        taxonomy: Arc<Mutex<TaxonomyManager>>,
        centroids: Arc<RwLock<CentroidManager>>,
        provider: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn CompletionClient>,
        config: ClassificationConfig,
    ) -> Self {
        Self {
            taxonomy,
            centroids,
            provider,
            llm,
            config,
        }
    }

    /// Classify content into a taxonomy category.
    ///
    /// Computes the embedding when not supplied (over `title\n\ncontent`),
    /// tries the fast tier unless `force_llm` is set, and escalates to the
    /// LLM tier when fast confidence is below the threshold.
    pub async fn classify(
        &self,
        title: &str,
        content: &str,
        embedding: Option<Vec<f32>>,
        force_llm: bool,
    ) -> Result<ClassificationResult> {
        let embedding = match embedding {
            Some(vector) => vector,
            None => {
                let combined = format!("{title}\n\n{content}");
                self.provider.embed_single(&combined).await?
            },
        };

        if !force_llm {
            let centroids = self.centroids.read().await;
            if centroids.centroid_count() > 0 {
                let fast = fast_classify(&centroids, &embedding, DEFAULT_TOP_K);
                if fast.primary_confidence >= self.config.fast_tier_confidence_threshold {
                    debug!(
                        confidence = fast.primary_confidence,
                        threshold = self.config.fast_tier_confidence_threshold,
                        "fast tier accepted"
                    );
                    return Ok(fast);
                }
                debug!(
                    confidence = fast.primary_confidence,
                    threshold = self.config.fast_tier_confidence_threshold,
                    "fast tier below threshold, escalating to LLM"
                );
            }
        }

        self.classify_llm(title, content).await
    }

    async fn classify_llm(&self, title: &str, content: &str) -> Result<ClassificationResult> {
        let start = Instant::now();

        let taxonomy_tree = {
            let taxonomy = self.taxonomy.lock().await;
            render_taxonomy_tree(&taxonomy)
        };
        let prompt = build_prompt(
            &taxonomy_tree,
            title,
            content,
            self.config.max_content_length_for_llm,
        );

        // Transport errors propagate; only parse failures downgrade.
        let response = self.llm.complete(&prompt).await?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let parsed = match parse_llm_reply(&response) {
            LlmReply::Parsed(parsed) => parsed,
            LlmReply::Invalid(reason) => {
                warn!(reason, "failed to parse LLM classification reply");
                return Ok(ClassificationResult::uncategorized(
                    ClassificationTier::Llm,
                    elapsed_ms,
                ));
            },
        };

        let mut result = ClassificationResult {
            primary_path: parsed.primary_path,
            primary_confidence: parsed.confidence,
            alternatives: parsed.alternatives,
            tier_used: ClassificationTier::Llm,
            new_category: parsed.new_category,
            reasoning: parsed.reasoning,
            processing_time_ms: elapsed_ms,
        };

        if let Some(proposal) = result.new_category.clone() {
            let mut taxonomy = self.taxonomy.lock().await;
            match taxonomy.propose_category(proposal) {
                Ok(proposed) => {
                    info!(path = %proposed.path, status = ?proposed.status, "new category proposed");
                },
                Err(err) => {
                    // A malformed proposal never fails the user's query.
                    warn!(error = %err, "category proposal rejected, dropping");
                    result.new_category = None;
                },
            }
        }

        debug!(
            path = %result.primary_path,
            confidence = result.primary_confidence,
            elapsed_ms = result.processing_time_ms,
            "LLM tier classified"
        );
        Ok(result)
    }

    /// Classify several items sequentially, preserving order.
    pub async fn classify_batch(
        &self,
        items: Vec<(String, String, Option<Vec<f32>>)>,
    ) -> Result<Vec<ClassificationResult>> {
        let mut results = Vec::with_capacity(items.len());
        for (title, content, embedding) in items {
            results.push(self.classify(&title, &content, embedding, false).await?);
        }
        Ok(results)
    }

    /// Reclassify existing content.
    ///
    /// Returns a result only when the primary path changed AND the new
    /// confidence clears the fast-tier threshold; otherwise `None`.
    pub async fn reclassify(
        &self,
        content_id: &str,
        title: &str,
        content: &str,
        current_path: &str,
    ) -> Result<Option<ClassificationResult>> {
        let result = self.classify(title, content, None, false).await?;

        if result.primary_path == current_path {
            return Ok(None);
        }
        if result.primary_confidence < self.config.fast_tier_confidence_threshold {
            return Ok(None);
        }

        info!(
            content_id,
            from = current_path,
            to = %result.primary_path,
            confidence = result.primary_confidence,
            "content should move"
        );
        Ok(Some(result))
    }

    /// Whether a taxonomy path currently exists.
    pub async fn validate_path(&self, path: &str) -> bool {
        self.taxonomy.lock().await.validate_path(path)
    }

    /// Readiness and configuration snapshot.
    pub async fn stats(&self) -> ClassificationStats {
        let centroid_count = self.centroids.read().await.centroid_count();
        let taxonomy_paths = self.taxonomy.lock().await.get_all_paths().len();
        ClassificationStats {
            fast_tier_ready: centroid_count > 0,
            centroid_count,
            confidence_threshold: self.config.fast_tier_confidence_threshold,
            taxonomy_paths,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::store::tests::StubProvider;
    use crate::taxonomy::{ProposalStatus, TaxonomyDocument};

    const TAXONOMY_YAML: &str = r#"
categories:
  technical:
    description: Technical knowledge
    children:
      programming:
        description: Programming topics
        children:
          python:
            description: Python specifics
      architecture:
        description: System architecture
        children:
          microservices:
            description: Microservice patterns
"#;

    struct ScriptedLlm {
        reply: std::sync::Mutex<Option<Result<String>>>,
    }

    impl ScriptedLlm {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: std::sync::Mutex::new(Some(Ok(reply.to_string()))),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: std::sync::Mutex::new(Some(Err(Error::Timeout(
                    "llm call".to_string(),
                )))),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok("{}".to_string()))
        }
    }

    fn taxonomy() -> Arc<Mutex<TaxonomyManager>> {
        let document: TaxonomyDocument = serde_yaml::from_str(TAXONOMY_YAML).unwrap();
        Arc::new(Mutex::new(TaxonomyManager::from_document(
            document,
            "/tmp/taxonomy.yaml",
        )))
    }

    fn centroids_with(entries: &[(&str, Vec<f32>)]) -> Arc<RwLock<CentroidManager>> {
        let mut manager = CentroidManager::new("/tmp/centroids");
        manager.set_centroids(
            entries
                .iter()
                .map(|(path, vector)| ((*path).to_string(), vector.clone()))
                .collect(),
        );
        Arc::new(RwLock::new(manager))
    }

    fn service(
        centroids: Arc<RwLock<CentroidManager>>,
        llm: Arc<dyn CompletionClient>,
    ) -> ClassificationService {
        ClassificationService::new(
            taxonomy(),
            centroids,
            Arc::new(StubProvider { dims: 2 }),
            llm,
            ClassificationConfig::default(),
        )
    }

    #[test]
    fn test_fast_tier_without_centroids_is_uncategorized() {
        let manager = CentroidManager::new("/tmp/none");
        let result = fast_classify(&manager, &[1.0, 0.0], 5);

        assert_eq!(result.primary_path, UNCATEGORIZED);
        assert_eq!(result.primary_confidence, 0.0);
        assert_eq!(result.tier_used, ClassificationTier::Fast);
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn test_fast_tier_primary_and_alternatives() {
        let mut manager = CentroidManager::new("/tmp/x");
        manager.set_centroids(
            [
                ("technical/programming".to_string(), vec![1.0, 0.0]),
                ("domain/business".to_string(), vec![0.0, 1.0]),
            ]
            .into_iter()
            .collect(),
        );

        let result = fast_classify(&manager, &[1.0, 0.05], 5);
        assert_eq!(result.primary_path, "technical/programming");
        assert!(result.primary_confidence > 0.9);
        assert_eq!(result.alternatives.len(), 1);
        assert!(result.processing_time_ms >= 0.0);
    }

    #[test]
    fn test_parse_reply_with_json_fence() {
        let reply = "```json\n{\"primary_path\": \"technical/programming\", \
\"confidence\": 0.9, \"alternatives\": [], \"reasoning\": \"code talk\", \
\"new_category_proposal\": null}\n```";
        match parse_llm_reply(reply) {
            LlmReply::Parsed(parsed) => {
                assert_eq!(parsed.primary_path, "technical/programming");
                assert_eq!(parsed.confidence, 0.9);
                assert_eq!(parsed.reasoning.as_deref(), Some("code talk"));
                assert!(parsed.new_category.is_none());
            },
            LlmReply::Invalid(reason) => panic!("expected parse, got {reason}"),
        }
    }

    #[test]
    fn test_parse_reply_with_surrounding_prose() {
        let reply = "Sure! Here is my classification:\n\
{\"primary_path\": \"technical\", \"confidence\": 0.8, \"alternatives\": \
[{\"path\": \"domain\", \"confidence\": 0.3}]}\nLet me know if you need more.";
        match parse_llm_reply(reply) {
            LlmReply::Parsed(parsed) => {
                assert_eq!(parsed.primary_path, "technical");
                assert_eq!(parsed.alternatives, vec![("domain".to_string(), 0.3)]);
            },
            LlmReply::Invalid(reason) => panic!("expected parse, got {reason}"),
        }
    }

    #[test]
    fn test_parse_reply_normalizes_bad_confidences() {
        let reply = "{\"primary_path\": \"technical\", \"confidence\": 7.5}";
        match parse_llm_reply(reply) {
            LlmReply::Parsed(parsed) => assert_eq!(parsed.confidence, 1.0),
            LlmReply::Invalid(reason) => panic!("expected parse, got {reason}"),
        }

        let missing = "{\"primary_path\": \"technical\"}";
        match parse_llm_reply(missing) {
            LlmReply::Parsed(parsed) => assert_eq!(parsed.confidence, 0.5),
            LlmReply::Invalid(reason) => panic!("expected parse, got {reason}"),
        }
    }

    #[test]
    fn test_parse_reply_invalid_json() {
        assert!(matches!(
            parse_llm_reply("total nonsense with no braces"),
            LlmReply::Invalid(_)
        ));
        assert!(matches!(
            parse_llm_reply("{broken json"),
            LlmReply::Invalid(_)
        ));
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = "{\"a\": \"value with } inside\", \"b\": 1} trailing";
        let object = extract_json_object(text).unwrap();
        let parsed: Value = serde_json::from_str(object).unwrap();
        assert_eq!(parsed["b"], 1);
    }

    #[tokio::test]
    async fn test_low_fast_confidence_escalates_to_llm() {
        // Centroid nearly orthogonal to every stub embedding: cosine will be
        // far below the 0.75 threshold, forcing escalation.
        let centroids = centroids_with(&[("technical/programming", vec![1.0, -1.0])]);
        let llm = ScriptedLlm::replying(
            "{\"primary_path\": \"technical/programming/python\", \"confidence\": 0.9, \
\"alternatives\": [], \"reasoning\": \"clearly python\", \"new_category_proposal\": null}",
        );
        let service = service(centroids, llm);

        let result = service
            .classify("Python decorators", "How decorators wrap callables", None, false)
            .await
            .unwrap();

        assert_eq!(result.tier_used, ClassificationTier::Llm);
        assert_eq!(result.primary_path, "technical/programming/python");
        assert_eq!(result.primary_confidence, 0.9);
    }

    #[tokio::test]
    async fn test_high_fast_confidence_skips_llm() {
        // Centroid aligned with the stub embedding of the input text.
        let provider = StubProvider { dims: 2 };
        let embedding = provider
            .embed(&["Title\n\nbody text".to_string()])
            .await
            .unwrap()
            .remove(0);

        let centroids = centroids_with(&[("technical/programming", embedding)]);
        let llm = ScriptedLlm::failing(); // would propagate if called
        let service = service(centroids, llm);

        let result = service
            .classify("Title", "body text", None, false)
            .await
            .unwrap();
        assert_eq!(result.tier_used, ClassificationTier::Fast);
        assert_eq!(result.primary_path, "technical/programming");
    }

    #[tokio::test]
    async fn test_force_llm_bypasses_fast_tier() {
        let provider = StubProvider { dims: 2 };
        let embedding = provider
            .embed(&["t\n\nc".to_string()])
            .await
            .unwrap()
            .remove(0);
        let centroids = centroids_with(&[("technical/programming", embedding)]);
        let llm = ScriptedLlm::replying("{\"primary_path\": \"technical\", \"confidence\": 0.8}");
        let service = service(centroids, llm);

        let result = service.classify("t", "c", None, true).await.unwrap();
        assert_eq!(result.tier_used, ClassificationTier::Llm);
    }

    #[tokio::test]
    async fn test_unparseable_reply_downgrades_to_uncategorized() {
        let centroids = centroids_with(&[]);
        let llm = ScriptedLlm::replying("the model rambled with no JSON at all");
        let service = service(centroids, llm);

        let result = service.classify("t", "c", None, false).await.unwrap();
        assert_eq!(result.primary_path, UNCATEGORIZED);
        assert_eq!(result.primary_confidence, 0.0);
        assert_eq!(result.tier_used, ClassificationTier::Llm);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let centroids = centroids_with(&[]);
        let service = service(centroids, ScriptedLlm::failing());

        let err = service.classify("t", "c", None, false).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_llm_proposal_is_forwarded_and_auto_approved() {
        let centroids = centroids_with(&[]);
        let llm = ScriptedLlm::replying(
            "{\"primary_path\": \"technical/architecture/microservices\", \"confidence\": 0.9, \
\"alternatives\": [], \"new_category_proposal\": {\"name\": \"saga_patterns\", \
\"description\": \"Saga orchestration patterns\", \
\"parent_path\": \"technical/architecture/microservices\", \"confidence\": 0.9}}",
        );
        let service = service(centroids, llm);

        let result = service.classify("Sagas", "Long-running flows", None, false).await.unwrap();
        assert!(result.new_category.is_some());

        let taxonomy = service.taxonomy.lock().await;
        assert!(taxonomy.validate_path("technical/architecture/microservices/saga_patterns"));
        assert!(taxonomy.pending_proposals().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_proposal_is_dropped_not_fatal() {
        let centroids = centroids_with(&[]);
        let llm = ScriptedLlm::replying(
            "{\"primary_path\": \"technical\", \"confidence\": 0.8, \
\"new_category_proposal\": {\"name\": \"misc\", \"description\": \"catch-all\", \
\"parent_path\": \"technical\", \"confidence\": 0.95}}",
        );
        let service = service(centroids, llm);

        let result = service.classify("Misc", "odds and ends", None, false).await.unwrap();
        assert!(result.new_category.is_none());
        assert_eq!(result.primary_path, "technical");

        let taxonomy = service.taxonomy.lock().await;
        assert!(!taxonomy.validate_path("technical/misc"));
    }

    #[tokio::test]
    async fn test_low_confidence_proposal_goes_pending_via_service() {
        let centroids = centroids_with(&[]);
        let llm = ScriptedLlm::replying(
            "{\"primary_path\": \"technical/programming\", \"confidence\": 0.8, \
\"new_category_proposal\": {\"name\": \"zig\", \"description\": \"Zig language\", \
\"parent_path\": \"technical/programming\", \"confidence\": 0.5}}",
        );
        let service = service(centroids, llm);

        service.classify("Zig", "comptime things", None, false).await.unwrap();

        let taxonomy = service.taxonomy.lock().await;
        let pending = taxonomy.pending_proposals();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn test_reclassify_is_silent_for_same_path() {
        let provider = StubProvider { dims: 2 };
        let embedding = provider
            .embed(&["t\n\nc".to_string()])
            .await
            .unwrap()
            .remove(0);
        let centroids = centroids_with(&[("technical/programming", embedding)]);
        let service = service(centroids, ScriptedLlm::failing());

        let outcome = service
            .reclassify("id-1", "t", "c", "technical/programming")
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_reclassify_is_silent_below_threshold() {
        let centroids = centroids_with(&[]);
        let llm = ScriptedLlm::replying(
            "{\"primary_path\": \"technical/programming\", \"confidence\": 0.4}",
        );
        let service = service(centroids, llm);

        let outcome = service
            .reclassify("id-1", "t", "c", "domain/business")
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_reclassify_returns_confident_move() {
        let centroids = centroids_with(&[]);
        let llm = ScriptedLlm::replying(
            "{\"primary_path\": \"technical/programming\", \"confidence\": 0.9}",
        );
        let service = service(centroids, llm);

        let outcome = service
            .reclassify("id-1", "t", "c", "domain/business")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.primary_path, "technical/programming");
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let centroids = centroids_with(&[("technical", vec![1.0, 0.0])]);
        let service = service(centroids, ScriptedLlm::failing());

        let stats = service.stats().await;
        assert!(stats.fast_tier_ready);
        assert_eq!(stats.centroid_count, 1);
        assert_eq!(stats.confidence_threshold, 0.75);
        assert_eq!(stats.taxonomy_paths, 5);
    }

    #[test]
    fn test_prompt_truncates_long_content() {
        let content = "x".repeat(3000);
        let prompt = build_prompt("- technical: tech", "Title", &content, 2000);
        assert!(prompt.contains(&"x".repeat(2000)));
        assert!(!prompt.contains(&"x".repeat(2001)));
        assert!(prompt.contains("..."));
    }
}

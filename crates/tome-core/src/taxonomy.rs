//! Hierarchical taxonomy: tree, document persistence and evolution.
//!
//! The taxonomy is a tree of named categories persisted as a human-readable
//! YAML document. Nodes carry derived attributes (level, parent path) that
//! are reconstructed on load rather than stored. The manager is the single
//! writer for the tree: it validates paths, resolves categories, and handles
//! the AI category-proposal flow.
//!
//! Proposal rules: the AI may only propose below a level-2 parent (so new
//! nodes land at level 3 or deeper). Proposals at or above the configured
//! confidence auto-approve when `auto_approve_level3_plus` is set; everything
//! else waits in the pending list for a human. AI-created nodes are never
//! locked, and locked nodes are never mutated by AI-initiated edits — the
//! only AI mutation is adding children.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Status of a taxonomy category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    /// Normal, classifiable category.
    #[default]
    Active,
    /// Created via proposal, awaiting content.
    Proposed,
    /// Kept for history, not offered for classification.
    Deprecated,
}

/// Status of a pending category proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Awaiting review.
    #[default]
    Pending,
    /// Accepted; the node exists in the tree.
    Approved,
    /// Declined with a reason.
    Rejected,
}

/// A node in the taxonomy tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyNode {
    /// Category name (slug format).
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// If true, only humans may mutate this node.
    pub locked: bool,

    /// Depth level; roots are level 1.
    pub level: usize,

    /// Full path of the parent, `None` at level 1.
    pub parent_path: Option<String>,

    /// Child categories by name.
    pub children: BTreeMap<String, TaxonomyNode>,

    /// Category status.
    pub status: CategoryStatus,

    /// Number of content items classified here.
    pub content_count: i64,

    /// Cached centroid for this category, when computed.
    pub centroid_vector: Option<Vec<f32>>,
}

impl TaxonomyNode {
    /// Full slash path from root to this node.
    #[must_use]
    pub fn full_path(&self) -> String {
        match &self.parent_path {
            Some(parent) => format!("{parent}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Direct child by name.
    #[must_use]
    pub fn get_child(&self, name: &str) -> Option<&TaxonomyNode> {
        self.children.get(name)
    }

    /// Attach a child, deriving its parent path and level from this node.
    pub fn add_child(&mut self, mut node: TaxonomyNode) {
        node.parent_path = Some(self.full_path());
        node.level = self.level + 1;
        self.children.insert(node.name.clone(), node);
    }
}

/// Classification thresholds stored in the taxonomy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationThresholds {
    /// Below this, the fast tier escalates to the LLM.
    #[serde(default = "default_fast_threshold")]
    pub fast_tier_confidence_threshold: f32,

    /// At or above this, proposals may auto-approve.
    #[serde(default = "default_newcat_threshold")]
    pub new_category_confidence_threshold: f32,

    /// Auto-approve high-confidence level-3+ proposals.
    #[serde(default = "default_auto_approve")]
    pub auto_approve_level3_plus: bool,
}

fn default_fast_threshold() -> f32 {
    0.75
}

fn default_newcat_threshold() -> f32 {
    0.85
}

const fn default_auto_approve() -> bool {
    true
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            fast_tier_confidence_threshold: default_fast_threshold(),
            new_category_confidence_threshold: default_newcat_threshold(),
            auto_approve_level3_plus: default_auto_approve(),
        }
    }
}

/// Rules guiding taxonomy evolution suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionRules {
    /// Minimum items before a split is suggested.
    #[serde(default = "default_min_content_for_split")]
    pub min_content_for_split: usize,

    /// Suggest splitting categories above this size.
    #[serde(default = "default_max_items_per_category")]
    pub max_items_per_category: usize,

    /// Merge categories more similar than this.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

const fn default_min_content_for_split() -> usize {
    10
}

const fn default_max_items_per_category() -> usize {
    100
}

fn default_similarity_threshold() -> f32 {
    0.8
}

impl Default for EvolutionRules {
    fn default() -> Self {
        Self {
            min_content_for_split: default_min_content_for_split(),
            max_items_per_category: default_max_items_per_category(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Request to create a new category (typically AI-initiated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryProposal {
    /// Proposed category name.
    pub name: String,

    /// Proposed description.
    pub description: String,

    /// Full path of the parent category.
    pub parent_path: String,

    /// Proposer confidence in `[0, 1]`.
    pub confidence: f32,

    /// Content ids supporting the proposal.
    #[serde(default)]
    pub evidence_ids: Vec<String>,
}

/// A recorded category proposal, pending or resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedCategory {
    /// Full path the new category would occupy.
    pub path: String,

    /// Category name.
    pub name: String,

    /// Proposed description.
    pub description: String,

    /// Parent category path.
    pub parent_path: String,

    /// Proposer confidence.
    pub confidence: f32,

    /// Supporting content ids.
    #[serde(default)]
    pub evidence: Vec<String>,

    /// When the proposal was filed.
    pub proposed_at: DateTime<Utc>,

    /// Who filed it (`ai` for the classifier flow).
    pub proposed_by: String,

    /// Current status.
    #[serde(default)]
    pub status: ProposalStatus,

    /// Reviewer notes or rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
}

/// On-disk node shape: name, level and parent path are derived on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawCategory {
    #[serde(default)]
    description: String,
    #[serde(default)]
    locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<CategoryStatus>,
    #[serde(default)]
    children: BTreeMap<String, RawCategory>,
}

/// On-disk taxonomy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyDocument {
    /// Document schema version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Classification thresholds.
    #[serde(default)]
    pub classification: ClassificationThresholds,

    /// Root categories by name.
    #[serde(default)]
    categories: BTreeMap<String, RawCategory>,

    /// Proposals, pending and resolved.
    #[serde(default)]
    pub proposed_categories: Vec<ProposedCategory>,

    /// Evolution rules.
    #[serde(default)]
    pub evolution: EvolutionRules,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Manages the taxonomy lifecycle: loading, validation and evolution.
///
/// The manager is the single writer for the tree. Mutations flip a dirty
/// flag; `save` persists only when dirty.
#[derive(Debug)]
pub struct TaxonomyManager {
    config_path: PathBuf,
    version: String,
    /// Thresholds read from the document; the classifier consults these.
    pub classification: ClassificationThresholds,
    categories: BTreeMap<String, TaxonomyNode>,
    proposed: Vec<ProposedCategory>,
    evolution: EvolutionRules,
    dirty: bool,
}

impl TaxonomyManager {
    /// Load the taxonomy document from `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "taxonomy document not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(&path)?;
        let document: TaxonomyDocument = serde_yaml::from_str(&contents)?;
        let manager = Self::from_document(document, path);
        info!(
            roots = manager.categories.len(),
            "loaded taxonomy document"
        );
        Ok(manager)
    }

    /// Build a manager from an in-memory document.
    #[must_use]
    pub fn from_document(document: TaxonomyDocument, path: impl Into<PathBuf>) -> Self {
        let categories = document
            .categories
            .into_iter()
            .map(|(name, raw)| (name.clone(), build_node(name, raw, 1, None)))
            .collect();

        Self {
            config_path: path.into(),
            version: document.version,
            classification: document.classification,
            categories,
            proposed: document.proposed_categories,
            evolution: document.evolution,
            dirty: false,
        }
    }

    /// Evolution rules from the document.
    #[must_use]
    pub const fn evolution(&self) -> &EvolutionRules {
        &self.evolution
    }

    /// Persist the document when dirty; atomic temp + rename.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let document = TaxonomyDocument {
            version: self.version.clone(),
            classification: self.classification.clone(),
            categories: self
                .categories
                .iter()
                .map(|(name, node)| (name.clone(), node_to_raw(node)))
                .collect(),
            proposed_categories: self.proposed.clone(),
            evolution: self.evolution.clone(),
        };

        let yaml = serde_yaml::to_string(&document)?;
        let tmp_path = self.config_path.with_extension("yaml.tmp");
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, yaml)?;
        std::fs::rename(&tmp_path, &self.config_path)?;

        self.dirty = false;
        info!(path = %self.config_path.display(), "saved taxonomy document");
        Ok(())
    }

    /// True iff a node exists at `path`.
    #[must_use]
    pub fn validate_path(&self, path: &str) -> bool {
        self.get_category(path).is_some()
    }

    /// Resolve a node by full path.
    #[must_use]
    pub fn get_category(&self, path: &str) -> Option<&TaxonomyNode> {
        let mut parts = path.trim_matches('/').split('/');
        let mut current = self.categories.get(parts.next()?)?;
        for part in parts {
            current = current.get_child(part)?;
        }
        Some(current)
    }

    fn get_category_mut(&mut self, path: &str) -> Option<&mut TaxonomyNode> {
        let mut parts = path.trim_matches('/').split('/');
        let mut current = self.categories.get_mut(parts.next()?)?;
        for part in parts {
            current = current.children.get_mut(part)?;
        }
        Some(current)
    }

    /// All node full paths, depth-first.
    #[must_use]
    pub fn get_all_paths(&self) -> Vec<String> {
        fn collect(node: &TaxonomyNode, paths: &mut Vec<String>) {
            paths.push(node.full_path());
            for child in node.children.values() {
                collect(child, paths);
            }
        }

        let mut paths = Vec::new();
        for root in self.categories.values() {
            collect(root, &mut paths);
        }
        paths
    }

    /// File a category proposal (AI-initiated).
    ///
    /// Auto-approves when the confidence clears the document threshold,
    /// `auto_approve_level3_plus` is set, and the parent sits at level 2 or
    /// deeper. Otherwise the proposal joins the pending list.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the parent path does not exist, and
    /// [`Error::ProposalRejected`] for proposals under a level-1 parent.
    pub fn propose_category(&mut self, proposal: CategoryProposal) -> Result<ProposedCategory> {
        let parent = self
            .get_category(&proposal.parent_path)
            .ok_or_else(|| Error::NotFound(format!("parent not found: {}", proposal.parent_path)))?;

        if parent.level < 2 {
            return Err(Error::ProposalRejected(format!(
                "cannot propose under level 1 (parent '{}' is level {})",
                proposal.parent_path, parent.level
            )));
        }
        let parent_level = parent.level;

        let proposed = ProposedCategory {
            path: format!("{}/{}", proposal.parent_path, proposal.name),
            name: proposal.name,
            description: proposal.description,
            parent_path: proposal.parent_path,
            confidence: proposal.confidence,
            evidence: proposal.evidence_ids,
            proposed_at: Utc::now(),
            proposed_by: "ai".to_string(),
            status: ProposalStatus::Pending,
            review_notes: None,
        };

        let thresholds = &self.classification;
        if proposed.confidence >= thresholds.new_category_confidence_threshold
            && thresholds.auto_approve_level3_plus
            && parent_level >= 2
        {
            let approved = self.approve(proposed)?;
            info!(path = %approved.path, "auto-approved category proposal");
            return Ok(approved);
        }

        info!(
            path = %proposed.path,
            confidence = proposed.confidence,
            "queued category proposal for review"
        );
        self.proposed.push(proposed.clone());
        self.dirty = true;
        Ok(proposed)
    }

    /// Insert the proposed node under its parent and mark it approved.
    fn approve(&mut self, mut proposed: ProposedCategory) -> Result<ProposedCategory> {
        let parent = self
            .get_category_mut(&proposed.parent_path)
            .ok_or_else(|| Error::NotFound(format!("parent not found: {}", proposed.parent_path)))?;

        // AI-created categories are never locked.
        let node = TaxonomyNode {
            name: proposed.name.clone(),
            description: proposed.description.clone(),
            locked: false,
            level: 0,
            parent_path: None,
            children: BTreeMap::new(),
            status: CategoryStatus::Active,
            content_count: 0,
            centroid_vector: None,
        };
        parent.add_child(node);

        proposed.status = ProposalStatus::Approved;
        self.dirty = true;
        Ok(proposed)
    }

    /// Manually approve a pending proposal by path. Returns false when no
    /// pending proposal matches.
    pub fn approve_proposal(&mut self, path: &str, review_notes: Option<String>) -> Result<bool> {
        let Some(index) = self
            .proposed
            .iter()
            .position(|p| p.path == path && p.status == ProposalStatus::Pending)
        else {
            return Ok(false);
        };

        let mut proposal = self.proposed[index].clone();
        proposal.review_notes = review_notes;
        let approved = self.approve(proposal)?;
        self.proposed[index] = approved;
        Ok(true)
    }

    /// Reject a pending proposal by path with a reason. Returns false when
    /// no pending proposal matches.
    pub fn reject_proposal(&mut self, path: &str, reason: &str) -> bool {
        for proposal in &mut self.proposed {
            if proposal.path == path && proposal.status == ProposalStatus::Pending {
                proposal.status = ProposalStatus::Rejected;
                proposal.review_notes = Some(reason.to_string());
                self.dirty = true;
                info!(path, reason, "rejected category proposal");
                return true;
            }
        }
        false
    }

    /// Proposals still awaiting review.
    #[must_use]
    pub fn pending_proposals(&self) -> Vec<&ProposedCategory> {
        self.proposed
            .iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .collect()
    }

    /// Adjust the content count bookkeeping for a category.
    pub fn update_content_count(&mut self, path: &str, delta: i64) {
        let mut found = false;
        if let Some(node) = self.get_category_mut(path) {
            node.content_count += delta;
            found = true;
            debug!(path, count = node.content_count, "updated content count");
        }
        if found {
            self.dirty = true;
        }
    }

    /// Whether the document has unsaved changes.
    #[must_use]
    pub const fn needs_save(&self) -> bool {
        self.dirty
    }
}

fn build_node(
    name: String,
    raw: RawCategory,
    level: usize,
    parent_path: Option<&str>,
) -> TaxonomyNode {
    let full_path = match parent_path {
        Some(parent) => format!("{parent}/{name}"),
        None => name.clone(),
    };

    let children = raw
        .children
        .into_iter()
        .map(|(child_name, child_raw)| {
            (
                child_name.clone(),
                build_node(child_name, child_raw, level + 1, Some(&full_path)),
            )
        })
        .collect();

    TaxonomyNode {
        name,
        description: raw.description,
        locked: raw.locked,
        level,
        parent_path: parent_path.map(ToString::to_string),
        children,
        status: raw.status.unwrap_or_default(),
        content_count: 0,
        centroid_vector: None,
    }
}

fn node_to_raw(node: &TaxonomyNode) -> RawCategory {
    RawCategory {
        description: node.description.clone(),
        locked: node.locked,
        status: (node.status != CategoryStatus::Active).then_some(node.status),
        children: node
            .children
            .iter()
            .map(|(name, child)| (name.clone(), node_to_raw(child)))
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
version: "1.0"
classification:
  fast_tier_confidence_threshold: 0.75
  new_category_confidence_threshold: 0.85
  auto_approve_level3_plus: true
categories:
  technical:
    description: Technical knowledge
    locked: true
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
  domain:
    description: Domain knowledge
    children:
      business:
        description: Business knowledge
proposed_categories: []
evolution:
  min_content_for_split: 10
  max_items_per_category: 100
  similarity_threshold: 0.8
"#;

    fn manager() -> TaxonomyManager {
        let document: TaxonomyDocument = serde_yaml::from_str(FIXTURE).unwrap();
        TaxonomyManager::from_document(document, "/tmp/taxonomy.yaml")
    }

    fn proposal(parent: &str, confidence: f32) -> CategoryProposal {
        CategoryProposal {
            name: "event_sourcing".to_string(),
            description: "Event sourcing patterns and tradeoffs".to_string(),
            parent_path: parent.to_string(),
            confidence,
            evidence_ids: vec![],
        }
    }

    #[test]
    fn test_levels_and_paths_derived_on_load() {
        let manager = manager();
        let node = manager
            .get_category("technical/programming/python")
            .unwrap();
        assert_eq!(node.level, 3);
        assert_eq!(node.parent_path.as_deref(), Some("technical/programming"));
        assert_eq!(node.full_path(), "technical/programming/python");
    }

    #[test]
    fn test_every_enumerated_path_validates() {
        let manager = manager();
        let paths = manager.get_all_paths();
        assert!(paths.contains(&"technical".to_string()));
        assert!(paths.contains(&"technical/architecture/microservices".to_string()));

        for path in paths {
            assert!(manager.validate_path(&path), "path {path} should validate");
            assert!(manager.get_category(&path).is_some());
        }
    }

    #[test]
    fn test_unknown_path_does_not_validate() {
        let manager = manager();
        assert!(!manager.validate_path("technical/unknown"));
        assert!(manager.get_category("nope/nope").is_none());
    }

    #[test]
    fn test_high_confidence_proposal_auto_approves() {
        // Scenario F: level-3 parent, confidence above threshold.
        let mut manager = manager();
        let result = manager
            .propose_category(proposal("technical/architecture/microservices", 0.9))
            .unwrap();

        assert_eq!(result.status, ProposalStatus::Approved);
        let node = manager
            .get_category("technical/architecture/microservices/event_sourcing")
            .unwrap();
        assert_eq!(node.level, 4);
        assert!(!node.locked);
        assert!(manager.needs_save());
    }

    #[test]
    fn test_low_confidence_proposal_goes_pending() {
        let mut manager = manager();
        let result = manager
            .propose_category(proposal("technical/architecture/microservices", 0.5))
            .unwrap();

        assert_eq!(result.status, ProposalStatus::Pending);
        assert!(
            manager
                .get_category("technical/architecture/microservices/event_sourcing")
                .is_none()
        );
        assert_eq!(manager.pending_proposals().len(), 1);
    }

    #[test]
    fn test_proposal_under_level1_rejected() {
        // Scenario G: level-1 parent.
        let mut manager = manager();
        let err = manager.propose_category(proposal("technical", 0.95)).unwrap_err();
        assert!(matches!(err, Error::ProposalRejected(_)));
    }

    #[test]
    fn test_proposal_with_missing_parent() {
        let mut manager = manager();
        let err = manager
            .propose_category(proposal("technical/nope", 0.95))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_manual_approval_flow() {
        let mut manager = manager();
        manager
            .propose_category(proposal("technical/architecture/microservices", 0.5))
            .unwrap();

        let approved = manager
            .approve_proposal(
                "technical/architecture/microservices/event_sourcing",
                Some("looks right".to_string()),
            )
            .unwrap();
        assert!(approved);
        assert!(
            manager
                .get_category("technical/architecture/microservices/event_sourcing")
                .is_some()
        );
        assert!(manager.pending_proposals().is_empty());
    }

    #[test]
    fn test_reject_flow() {
        let mut manager = manager();
        manager
            .propose_category(proposal("technical/architecture/microservices", 0.5))
            .unwrap();

        let rejected = manager.reject_proposal(
            "technical/architecture/microservices/event_sourcing",
            "too narrow",
        );
        assert!(rejected);
        assert!(manager.pending_proposals().is_empty());
        assert!(
            manager
                .get_category("technical/architecture/microservices/event_sourcing")
                .is_none()
        );
    }

    #[test]
    fn test_content_count_and_dirty_flag() {
        let mut manager = manager();
        assert!(!manager.needs_save());

        manager.update_content_count("technical/programming/python", 2);
        assert!(manager.needs_save());
        assert_eq!(
            manager
                .get_category("technical/programming/python")
                .unwrap()
                .content_count,
            2
        );

        manager.update_content_count("technical/programming/python", -1);
        assert_eq!(
            manager
                .get_category("technical/programming/python")
                .unwrap()
                .content_count,
            1
        );
    }

    #[test]
    fn test_save_roundtrip_preserves_locked_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.yaml");

        let document: TaxonomyDocument = serde_yaml::from_str(FIXTURE).unwrap();
        let mut manager = TaxonomyManager::from_document(document, &path);
        manager
            .propose_category(proposal("technical/architecture/microservices", 0.9))
            .unwrap();
        manager.save().unwrap();

        let reloaded = TaxonomyManager::load(&path).unwrap();
        assert!(reloaded.get_category("technical").unwrap().locked);
        assert!(
            reloaded
                .get_category("technical/architecture/microservices/event_sourcing")
                .is_some()
        );
        assert!(!reloaded.needs_save());
    }

    #[test]
    fn test_save_is_noop_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.yaml");
        let document: TaxonomyDocument = serde_yaml::from_str(FIXTURE).unwrap();
        let mut manager = TaxonomyManager::from_document(document, &path);

        manager.save().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_document() {
        let err = TaxonomyManager::load("/nonexistent/taxonomy.yaml").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

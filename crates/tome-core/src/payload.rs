//! Typed metadata attached to every indexed chunk.
//!
//! A [`ContentPayload`] travels with each point in the vector store and
//! carries everything the retrieval and classification layers need without
//! touching the source file: position in the chunk split, content hash,
//! resolved taxonomy, classification provenance, relationships and an
//! append-only audit trail.
//!
//! Payloads are created with exactly one `created` audit entry; every
//! relationship change appends another entry.

use crate::relationships::Relationship;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type of an indexed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// General knowledge content.
    #[default]
    General,
    /// Architectural or implementation blueprint.
    Blueprint,
    /// Reference material (APIs, tables, lookups).
    Reference,
    /// Step-by-step guide.
    Guide,
    /// Recorded decision.
    Decision,
}

/// Which classification tier produced the current taxonomy assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationTier {
    /// Not classified yet.
    #[default]
    None,
    /// Centroid-similarity fast tier.
    Fast,
    /// LLM fallback tier.
    Llm,
}

/// Resolved taxonomy position: full path plus the first path levels, which
/// are mirrored as separate fields so the store can index them for filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyPath {
    /// Slash-separated path from root to node.
    pub full_path: String,

    /// First path segment.
    pub level1: String,

    /// Second path segment, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level2: Option<String>,

    /// Third path segment, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level3: Option<String>,
}

impl TaxonomyPath {
    /// Split a slash path into its levels.
    #[must_use]
    pub fn from_path(full_path: &str) -> Self {
        let trimmed = full_path.trim_matches('/');
        let mut parts = trimmed.split('/');
        let level1 = parts.next().unwrap_or_default().to_string();
        let level2 = parts.next().map(ToString::to_string);
        let level3 = parts.next().map(ToString::to_string);
        Self {
            full_path: trimmed.to_string(),
            level1,
            level2,
            level3,
        }
    }
}

/// Classification outcome recorded on a payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationInfo {
    /// Confidence of the primary assignment, in `[0, 1]`.
    pub confidence: f32,

    /// Tier that produced the assignment.
    pub tier_used: ClassificationTier,

    /// Alternative `(path, confidence)` candidates.
    #[serde(default)]
    pub alternatives: Vec<(String, f32)>,
}

/// Where an indexed chunk came from and how it was extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Source file the chunk was extracted from.
    pub source_file: String,

    /// Upstream URL, when the file mirrors remote content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Extraction method identifier (e.g. `markdown_semantic`).
    pub extraction_method: String,

    /// Extraction pipeline version.
    pub version: String,

    /// Heading path at the original extraction site.
    #[serde(default)]
    pub original_heading_path: Vec<String>,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// What happened (`created`, `classified`, `relationship_added`, …).
    pub action: String,

    /// Who did it (`system`, `ai`, a user handle).
    pub actor: String,

    /// When it happened.
    pub timestamp: DateTime<Utc>,

    /// Optional free-form context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AuditEntry {
    fn now(action: &str, actor: &str, details: Option<String>) -> Self {
        Self {
            action: action.to_string(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            details,
        }
    }
}

/// The metadata attached to each indexed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPayload {
    /// Opaque unique id of the indexed item.
    pub content_id: String,

    /// Library-relative path of the source file.
    pub file_path: String,

    /// Heading immediately preceding the chunk, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Position of this chunk within the file's split.
    pub chunk_index: usize,

    /// Number of chunks the file split into.
    pub chunk_total: usize,

    /// Stable 16-hex hash over the chunk text.
    pub content_hash: String,

    /// Resolved taxonomy position, once classified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomy: Option<TaxonomyPath>,

    /// Content type of the chunk.
    #[serde(default)]
    pub content_type: ContentType,

    /// Classification provenance.
    #[serde(default)]
    pub classification: ClassificationInfo,

    /// Relationships originating at this item.
    #[serde(default)]
    pub relationships: Vec<Relationship>,

    /// Extraction provenance.
    pub provenance: Provenance,

    /// Append-only audit trail.
    pub audit_trail: Vec<AuditEntry>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ContentPayload {
    /// Create a payload for a freshly extracted chunk.
    ///
    /// Assigns a fresh content id and records the mandatory `created` audit
    /// entry.
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        section: Option<String>,
        chunk_index: usize,
        chunk_total: usize,
        content_hash: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        let now = Utc::now();
        Self {
            content_id: Uuid::new_v4().to_string(),
            file_path: file_path.into(),
            section,
            chunk_index,
            chunk_total,
            content_hash: content_hash.into(),
            taxonomy: None,
            content_type: ContentType::default(),
            classification: ClassificationInfo::default(),
            relationships: Vec::new(),
            provenance,
            audit_trail: vec![AuditEntry::now("created", "system", None)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a taxonomy assignment and its classification provenance.
    pub fn set_taxonomy(
        &mut self,
        full_path: &str,
        confidence: f32,
        tier: ClassificationTier,
        alternatives: Vec<(String, f32)>,
    ) {
        self.taxonomy = Some(TaxonomyPath::from_path(full_path));
        self.classification = ClassificationInfo {
            confidence: crate::numeric::normalize_confidence(confidence),
            tier_used: tier,
            alternatives,
        };
        self.touch("classified", "system", Some(full_path.to_string()));
    }

    /// Attach a relationship and append the corresponding audit entry.
    pub fn add_relationship(&mut self, relationship: Relationship, actor: &str) {
        let details = format!(
            "{:?} {} -> {}",
            relationship.kind, relationship.source_id, relationship.target_id
        );
        self.relationships.push(relationship);
        self.touch("relationship_added", actor, Some(details));
    }

    fn touch(&mut self, action: &str, actor: &str, details: Option<String>) {
        self.audit_trail
            .push(AuditEntry::now(action, actor, details));
        self.updated_at = Utc::now();
    }
}

//! Directed and symmetric relationships between content items.
//!
//! Relationships are stored as an edge table keyed by
//! `(source_id, target_id, kind)` rather than as references between payload
//! structs, so the graph may be cyclic without ownership problems. Creating a
//! non-symmetric relationship always materializes the inverse edge; the two
//! symmetric kinds (`similar_to`, `related_to`) are their own inverse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The ten relationship kinds between content items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// A depends on B (B is a prerequisite for A).
    DependsOn,
    /// Inverse of `depends_on`.
    DependencyOf,
    /// A implements concepts from B.
    Implements,
    /// Inverse of `implements`.
    ImplementedBy,
    /// A references or cites B.
    References,
    /// Inverse of `references`.
    ReferencedBy,
    /// A is the parent / broader concept of B.
    ParentOf,
    /// Inverse of `parent_of`.
    ChildOf,
    /// A and B cover similar topics (symmetric).
    SimilarTo,
    /// A and B are related (symmetric).
    RelatedTo,
}

impl RelationshipKind {
    /// The inverse kind; symmetric kinds are their own inverse.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::DependsOn => Self::DependencyOf,
            Self::DependencyOf => Self::DependsOn,
            Self::Implements => Self::ImplementedBy,
            Self::ImplementedBy => Self::Implements,
            Self::References => Self::ReferencedBy,
            Self::ReferencedBy => Self::References,
            Self::ParentOf => Self::ChildOf,
            Self::ChildOf => Self::ParentOf,
            Self::SimilarTo => Self::SimilarTo,
            Self::RelatedTo => Self::RelatedTo,
        }
    }

    /// Whether the kind is bidirectional by nature.
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        matches!(self, Self::SimilarTo | Self::RelatedTo)
    }
}

/// Metadata attached to a relationship edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    /// Confidence in the relationship, in `[0, 1]`.
    pub confidence: f32,

    /// Who created the edge (`manual`, `ai`, `auto`).
    pub actor: String,

    /// Optional free-form notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Computed similarity for `similar_to` edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
}

impl Default for RelationshipMetadata {
    fn default() -> Self {
        Self {
            confidence: 1.0,
            actor: "manual".to_string(),
            notes: None,
            similarity_score: None,
        }
    }
}

/// A relationship between two content items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Source content id.
    pub source_id: String,

    /// Target content id.
    pub target_id: String,

    /// Kind of the relationship.
    pub kind: RelationshipKind,

    /// Edge metadata.
    #[serde(default)]
    pub metadata: RelationshipMetadata,

    /// When the edge was created.
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Create a relationship edge with the given metadata.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: RelationshipKind,
        metadata: RelationshipMetadata,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Build the inverse edge: source/target swapped, kind inverted.
    #[must_use]
    pub fn to_inverse(&self) -> Self {
        Self {
            source_id: self.target_id.clone(),
            target_id: self.source_id.clone(),
            kind: self.kind.inverse(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

/// Audit record for a relationship mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipAudit {
    /// `create` or `delete`.
    pub action: String,
    /// `(source, target, kind)` of the affected edge.
    pub source_id: String,
    /// Target id of the affected edge.
    pub target_id: String,
    /// Kind of the affected edge.
    pub kind: RelationshipKind,
    /// Who performed the action.
    pub actor: String,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
}

/// Filter for querying edges out of the graph.
#[derive(Debug, Clone, Default)]
pub struct RelationshipQuery {
    /// Match edges where this id is the source or the target.
    pub content_id: Option<String>,
    /// Restrict to one kind.
    pub kind: Option<RelationshipKind>,
    /// Drop edges below this confidence.
    pub min_confidence: f32,
}

/// In-memory relationship graph stored as an edge table.
///
/// Keys are `(source_id, target_id, kind)`. Linking a non-symmetric kind
/// inserts the inverse edge in the same operation, so inverse invariants
/// hold by construction. Every mutation appends to the audit log.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    edges: BTreeMap<(String, String, RelationshipKind), Relationship>,
    audit_log: Vec<RelationshipAudit>,
}

impl RelationshipGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(edge: &Relationship) -> (String, String, RelationshipKind) {
        (edge.source_id.clone(), edge.target_id.clone(), edge.kind)
    }

    fn record(&mut self, action: &str, edge: &Relationship) {
        self.audit_log.push(RelationshipAudit {
            action: action.to_string(),
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            kind: edge.kind,
            actor: edge.metadata.actor.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Insert an edge and materialize its inverse.
    ///
    /// Symmetric kinds produce the mirrored edge with the same kind; other
    /// kinds produce the inverse kind. Re-linking an existing pair replaces
    /// the stored edge.
    pub fn link(&mut self, edge: Relationship) {
        let inverse = edge.to_inverse();
        self.record("create", &edge);
        self.edges.insert(Self::key(&edge), edge);
        self.record("create", &inverse);
        self.edges.insert(Self::key(&inverse), inverse);
    }

    /// Remove an edge and its inverse. Returns true when something existed.
    pub fn unlink(&mut self, source_id: &str, target_id: &str, kind: RelationshipKind) -> bool {
        let key = (source_id.to_string(), target_id.to_string(), kind);
        let Some(edge) = self.edges.remove(&key) else {
            return false;
        };
        self.record("delete", &edge);

        let inverse_key = (target_id.to_string(), source_id.to_string(), kind.inverse());
        if let Some(inverse) = self.edges.remove(&inverse_key) {
            self.record("delete", &inverse);
        }
        true
    }

    /// Query edges matching the filter, in deterministic key order.
    #[must_use]
    pub fn query(&self, query: &RelationshipQuery) -> Vec<&Relationship> {
        self.edges
            .values()
            .filter(|edge| {
                if let Some(id) = &query.content_id {
                    if edge.source_id != *id && edge.target_id != *id {
                        return false;
                    }
                }
                if let Some(kind) = query.kind {
                    if edge.kind != kind {
                        return false;
                    }
                }
                edge.metadata.confidence >= query.min_confidence
            })
            .collect()
    }

    /// All edges originating at `source_id`.
    #[must_use]
    pub fn outgoing(&self, source_id: &str) -> Vec<&Relationship> {
        self.edges
            .values()
            .filter(|edge| edge.source_id == source_id)
            .collect()
    }

    /// Number of stored edges (inverses included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph holds no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The append-only audit log of mutations.
    #[must_use]
    pub fn audit_log(&self) -> &[RelationshipAudit] {
        &self.audit_log
    }
}

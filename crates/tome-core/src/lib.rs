//! # tome-core
//!
//! Core functionality for tome - a knowledge retrieval engine over markdown
//! libraries.
//!
//! This crate ingests markdown source documents, decomposes them into
//! integrity-tracked blocks, embeds them into a vector index, classifies
//! each item into a hierarchical taxonomy, and answers similarity and
//! RAG-style queries with composite ranking.
//!
//! ## Architecture
//!
//! The crate is organized around five tightly coupled subsystems:
//!
//! - **Block extraction & integrity**: line-accurate markdown parsing with
//!   dual checksums (exact + canonicalized) and verified write-back
//! - **Vector store & indexing**: content-addressable embeddings with rich
//!   payloads, kept in sync by file-checksum-driven incremental reindexing
//! - **Taxonomy & centroids**: a hierarchical category tree with cached
//!   per-category centroid vectors and AI-proposed category evolution
//! - **Two-tier classification**: fast centroid similarity with LLM
//!   escalation on low confidence
//! - **Retrieval & ranking**: semantic search with deduplication and a
//!   composite of similarity, taxonomy overlap and recency
//!
//! ## Quick Start
//!
//! ```rust
//! use tome_core::parser::MarkdownParser;
//!
//! let mut parser = MarkdownParser::new("notes/example.md");
//! let blocks = parser.parse("# Hello\n\nThis is content.");
//!
//! println!("Extracted {} blocks", blocks.len());
//! for block in &blocks {
//!     println!("{} [{}-{}] {}", block.id, block.start_line, block.end_line,
//!         block.checksum_exact);
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`] with structured error
//! information. Transient failures (timeouts, connection errors) report
//! `is_recoverable() == true` for retry logic; integrity violations and
//! path traversal never do.

/// Canonicalization and checksum primitives
pub mod canonical;
/// Per-category centroid computation and caching
pub mod centroids;
/// Two-tier classification (fast centroid tier + LLM fallback)
pub mod classify;
/// Splitting markdown into embeddable chunks
pub mod chunker;
/// Typed configuration with TOML loading and env overrides
pub mod config;
/// Pluggable embedding providers
pub mod embeddings;
/// Error types and result aliases
pub mod error;
/// File-checksum-driven incremental indexing
pub mod indexer;
/// Small numeric helpers (cosine similarity, means, clamping)
pub mod numeric;
/// Markdown parsing into integrity-tracked blocks
pub mod parser;
/// Typed payload metadata attached to indexed chunks
pub mod payload;
/// Composite ranking over similarity, taxonomy and recency
pub mod ranking;
/// Relationship kinds and the edge-table graph
pub mod relationships;
/// Semantic search and RAG-style retrieval
pub mod retrieve;
/// Vector store client (Qdrant-compatible REST)
pub mod store;
/// Taxonomy tree, document persistence and proposals
pub mod taxonomy;
/// Integrity-verified block writes into the library
pub mod writer;

// Re-export commonly used types
pub use canonical::{canonicalize_prose, checksum, verify, verify_canonical};
pub use centroids::CentroidManager;
pub use classify::{
    ClassificationResult, ClassificationService, CompletionClient, fast_classify,
};
pub use chunker::{Chunk, ChunkStrategy, ChunkerOptions, chunk_markdown};
pub use config::Config;
pub use embeddings::{EmbeddingProvider, create_provider};
pub use error::{Error, Result};
pub use indexer::{IndexState, LibraryIndexer};
pub use parser::{Block, BlockKind, MarkdownParser, SourceDocument, parse_document};
pub use payload::{ClassificationTier, ContentPayload, ContentType, TaxonomyPath};
pub use ranking::{CompositeRanker, RankedResult, RankingCandidate, RankingWeights};
pub use relationships::{Relationship, RelationshipGraph, RelationshipKind};
pub use retrieve::{RetrievedChunk, Retriever, SemanticSearch};
pub use store::{PointRecord, ScoredPoint, SearchFilters, VectorStore};
pub use taxonomy::{CategoryProposal, TaxonomyManager, TaxonomyNode};
pub use writer::{BlockWriter, WriteMode, WriteReceipt};

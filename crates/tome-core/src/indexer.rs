//! File-checksum-driven incremental synchronization of the vector store.
//!
//! The indexer keeps one collection in lockstep with a directory tree of
//! markdown files. Per-file checksums are persisted in a state file next to
//! the library (`.index_state.json`); a file is reindexed only when forced
//! or when its checksum changed, so unchanged libraries produce zero store
//! writes. For a changed file, existing points are deleted before the new
//! batch is upserted.
//!
//! Files whose names begin with an underscore and non-markdown files are
//! never indexed. A file that fails to index is skipped with a warning; the
//! run continues.

use crate::canonical::checksum;
use crate::chunker::{Chunk, ChunkerOptions, chunk_markdown};
use crate::parser::MAX_SOURCE_FILE_SIZE;
use crate::payload::{ContentPayload, Provenance};
use crate::store::{PointRecord, VectorStore};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name of the persisted index state file inside the library root.
pub const INDEX_STATE_FILE: &str = ".index_state.json";

/// Extraction method recorded in payload provenance.
const EXTRACTION_METHOD: &str = "markdown_semantic";

/// Extraction pipeline version recorded in payload provenance.
const EXTRACTION_VERSION: &str = "1";

/// Per-file bookkeeping entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Checksum of the raw file bytes at index time.
    pub checksum: String,
    /// When the file was last indexed (UTC).
    pub indexed_at: DateTime<Utc>,
}

/// Mapping from relative file path to indexing bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexState {
    /// Entries by library-relative path.
    pub entries: HashMap<String, IndexedFile>,
}

impl IndexState {
    /// Load state from disk; a missing file yields an empty state.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::default());
        }
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Persist state atomically (temp sibling + rename).
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

/// Summary of one `index_all` run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Files (re)indexed this run.
    pub indexed: Vec<String>,
    /// Files skipped because their checksum was unchanged.
    pub unchanged: usize,
    /// Files that failed and were skipped.
    pub failed: Vec<String>,
}

/// Keeps the vector store synchronized with the library directory.
pub struct LibraryIndexer {
    library_root: PathBuf,
    state_path: PathBuf,
    store: Arc<VectorStore>,
    chunking: ChunkerOptions,
}

impl LibraryIndexer {
    /// Create an indexer for the library rooted at `library_root`.
    #[must_use]
    pub fn new(
        library_root: impl Into<PathBuf>,
        store: Arc<VectorStore>,
        chunking: ChunkerOptions,
    ) -> Self {
        let library_root = library_root.into();
        let state_path = library_root.join(INDEX_STATE_FILE);
        Self {
            library_root,
            state_path,
            store,
            chunking,
        }
    }

    /// The library root this indexer serves.
    #[must_use]
    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Split file content into chunks with their payloads.
    #[must_use]
    pub fn extract_chunks(&self, content: &str, rel_path: &str) -> Vec<(Chunk, ContentPayload)> {
        let chunks = chunk_markdown(content, &self.chunking);
        chunks
            .into_iter()
            .map(|chunk| {
                let payload = ContentPayload::new(
                    rel_path,
                    chunk.section.clone(),
                    chunk.index,
                    chunk.total,
                    chunk.content_hash.clone(),
                    Provenance {
                        source_file: rel_path.to_string(),
                        source_url: None,
                        extraction_method: EXTRACTION_METHOD.to_string(),
                        version: EXTRACTION_VERSION.to_string(),
                        original_heading_path: chunk.heading_path.clone(),
                    },
                );
                (chunk, payload)
            })
            .collect()
    }

    /// Index one file by library-relative path.
    ///
    /// Reads the file, splits it into chunks, embeds them, deletes any
    /// existing points for the path, then upserts the new batch. Returns the
    /// number of chunks indexed.
    pub async fn index_file(&self, rel_path: &str) -> Result<usize> {
        let content = self.read_source(rel_path).await?;
        self.index_content(rel_path, &content).await
    }

    async fn read_source(&self, rel_path: &str) -> Result<String> {
        let path = self.library_root.join(rel_path);
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.len() > MAX_SOURCE_FILE_SIZE {
            return Err(Error::InputTooLarge {
                size: metadata.len(),
                limit: MAX_SOURCE_FILE_SIZE,
            });
        }
        Ok(tokio::fs::read_to_string(&path).await?)
    }

    async fn index_content(&self, rel_path: &str, content: &str) -> Result<usize> {
        let chunks = self.extract_chunks(content, rel_path);
        if chunks.is_empty() {
            debug!(rel_path, "no chunks above minimum size, clearing stale points");
            self.store.delete_by_file(rel_path).await?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|(chunk, _)| chunk.content.clone()).collect();
        let vectors = self.store.provider().embed(&texts).await?;

        let points: Vec<PointRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|((_, payload), vector)| PointRecord {
                id: payload.content_id.clone(),
                vector: Some(vector),
                payload,
            })
            .collect();

        // Old points go first so a reindex never leaves duplicates behind.
        self.store.delete_by_file(rel_path).await?;
        self.store.upsert_batch(&points).await?;

        info!(rel_path, chunks = points.len(), "indexed file");
        Ok(points.len())
    }

    /// Discover indexable files: markdown only, no underscore-prefixed
    /// names, paths relative to the library root.
    async fn discover_files(&self) -> Result<Vec<String>> {
        let root = self.library_root.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(std::result::Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('_') {
                    continue;
                }
                let is_markdown = Path::new(name.as_ref())
                    .extension()
                    .is_some_and(|ext| ext == "md" || ext == "markdown");
                if !is_markdown {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&root) {
                    files.push(rel.to_string_lossy().to_string());
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| Error::Other(format!("library walk failed: {e}")))
    }

    /// Walk the library and reindex files whose checksum changed (or all of
    /// them when `force` is set). Unchanged files cause zero store writes.
    pub async fn index_all(&self, force: bool) -> Result<IndexReport> {
        let mut state = IndexState::load(&self.state_path).await?;
        let files = self.discover_files().await?;
        let mut report = IndexReport::default();

        for rel_path in files {
            let content = match self.read_source(&rel_path).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(rel_path, error = %err, "skipping unreadable file");
                    report.failed.push(rel_path);
                    continue;
                },
            };

            let file_checksum = checksum(&content);
            let unchanged = state
                .entries
                .get(&rel_path)
                .is_some_and(|entry| entry.checksum == file_checksum);
            if unchanged && !force {
                report.unchanged += 1;
                continue;
            }

            match self.index_content(&rel_path, &content).await {
                Ok(_) => {
                    state.entries.insert(
                        rel_path.clone(),
                        IndexedFile {
                            checksum: file_checksum,
                            indexed_at: Utc::now(),
                        },
                    );
                    report.indexed.push(rel_path);
                },
                Err(err) => {
                    warn!(rel_path, error = %err, "failed to index file, continuing");
                    report.failed.push(rel_path);
                },
            }
        }

        state.save(&self.state_path).await?;
        info!(
            indexed = report.indexed.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "index run finished"
        );
        Ok(report)
    }

    /// Drop points for files recorded in the state that no longer exist on
    /// disk. Returns the removed paths.
    pub async fn remove_deleted_files(&self) -> Result<Vec<String>> {
        let mut state = IndexState::load(&self.state_path).await?;
        let mut removed = Vec::new();

        let tracked: Vec<String> = state.entries.keys().cloned().collect();
        for rel_path in tracked {
            let exists = tokio::fs::try_exists(self.library_root.join(&rel_path)).await?;
            if !exists {
                self.store.delete_by_file(&rel_path).await?;
                state.entries.remove(&rel_path);
                removed.push(rel_path);
            }
        }

        if !removed.is_empty() {
            state.save(&self.state_path).await?;
            info!(count = removed.len(), "removed deleted files from index");
        }
        Ok(removed)
    }

    /// Load the current index state (diagnostics, tests).
    pub async fn state(&self) -> Result<IndexState> {
        IndexState::load(&self.state_path).await
    }
}

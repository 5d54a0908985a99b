//! Integrity-verified block writes into the library.
//!
//! Two write modes:
//!
//! - **STRICT** — code blocks must hash to `checksum_exact` byte-for-byte;
//!   prose must hash to `checksum_canonical` after canonicalization, so
//!   whitespace renormalization is tolerated but nothing else. A mismatch
//!   fails the write with nothing touched on disk.
//! - **REFINEMENT** — the write is accepted unconditionally; checksums are
//!   recorded in the receipt but not enforced.
//!
//! Writes are atomic (temp sibling + rename), optionally preceded by a
//! timestamped backup of the destination. Destinations are resolved
//! lexically against the library root; anything that escapes the root
//! (absolute paths, `..` components) is rejected as path traversal before
//! any I/O happens. Concurrent writes to the same destination are serialized
//! by a per-file mutex keyed on the normalized path.

use crate::canonical::{checksum, verify, verify_canonical};
use crate::parser::{Block, BlockKind};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Write enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Enforce checksums; reject mismatches.
    Strict,
    /// Record checksums without enforcing them.
    Refinement,
}

/// Outcome of a completed block write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    /// Absolute destination path that was written.
    pub path: PathBuf,
    /// Whether the written bytes were verified against the block checksums.
    pub integrity_verified: bool,
    /// Whether the write was executed.
    pub is_executed: bool,
    /// Checksum of the bytes actually written.
    pub written_checksum: String,
    /// Backup file created before overwriting, when any.
    pub backup_path: Option<PathBuf>,
}

/// Writes verified blocks into the library tree.
pub struct BlockWriter {
    library_root: PathBuf,
    backup_before_write: bool,
    locks: Mutex<HashMap<PathBuf, std::sync::Arc<Mutex<()>>>>,
}

impl BlockWriter {
    /// Create a writer rooted at the library directory.
    #[must_use]
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
            backup_before_write: true,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Disable timestamped backups before overwrites.
    #[must_use]
    pub fn without_backups(mut self) -> Self {
        self.backup_before_write = false;
        self
    }

    /// Resolve a library-relative destination, rejecting traversal.
    ///
    /// Normalization is lexical: `.` components are dropped and `..`
    /// components pop. A destination that is absolute or resolves outside
    /// the library root fails with [`Error::PathTraversal`].
    pub fn resolve_destination(&self, destination: &str) -> Result<PathBuf> {
        let candidate = Path::new(destination);
        if candidate.is_absolute() {
            return Err(Error::PathTraversal(destination.to_string()));
        }

        let mut normalized = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {},
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(Error::PathTraversal(destination.to_string()));
                    }
                },
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::PathTraversal(destination.to_string()));
                },
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(Error::PathTraversal(destination.to_string()));
        }
        Ok(self.library_root.join(normalized))
    }

    async fn lock_for(&self, path: &Path) -> std::sync::Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write `content` for `block` into the library.
    ///
    /// In STRICT mode the content is verified against the block's checksums
    /// before anything reaches disk: code blocks byte-exact, prose by
    /// canonical form. REFINEMENT accepts the content unconditionally.
    ///
    /// # Errors
    ///
    /// [`Error::PathTraversal`] for destinations escaping the library root,
    /// [`Error::IntegrityViolation`] for STRICT mismatches (the destination
    /// is left untouched), and [`Error::Io`] for filesystem failures.
    pub async fn write_block(
        &self,
        block: &Block,
        content: &str,
        destination: &str,
        mode: WriteMode,
    ) -> Result<WriteReceipt> {
        let path = self.resolve_destination(destination)?;

        let verified = match mode {
            WriteMode::Strict => {
                self.enforce_checksums(block, content)?;
                true
            },
            WriteMode::Refinement => {
                debug!(
                    block = %block.id,
                    checksum = %checksum(content),
                    "refinement write, checksums recorded only"
                );
                false
            },
        };

        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let backup_path = if self.backup_before_write
            && tokio::fs::try_exists(&path).await?
        {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S");
            let backup = path.with_extension(format!("bak.{stamp}"));
            tokio::fs::copy(&path, &backup).await?;
            debug!(backup = %backup.display(), "created backup before overwrite");
            Some(backup)
        } else {
            None
        };

        // Atomic replace: write the temp sibling, then rename over.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(
            block = %block.id,
            path = %path.display(),
            mode = ?mode,
            "wrote block"
        );

        Ok(WriteReceipt {
            path,
            integrity_verified: verified,
            is_executed: true,
            written_checksum: checksum(content),
            backup_path,
        })
    }

    fn enforce_checksums(&self, block: &Block, content: &str) -> Result<()> {
        if block.kind == BlockKind::Code {
            if !verify(content, &block.checksum_exact) {
                warn!(block = %block.id, "strict code write failed exact checksum");
                return Err(Error::IntegrityViolation {
                    expected: block.checksum_exact.clone(),
                    actual: checksum(content),
                });
            }
        } else if !verify_canonical(content, &block.checksum_canonical) {
            warn!(block = %block.id, "strict prose write failed canonical checksum");
            return Err(Error::IntegrityViolation {
                expected: block.checksum_canonical.clone(),
                actual: checksum(&crate::canonical::canonicalize_prose(content)),
            });
        }
        Ok(())
    }
}

/// A block recovered from marker-delimited library content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedBlock {
    /// Block id from the marker.
    pub id: String,
    /// Source file recorded in the marker.
    pub source: String,
    /// Session id recorded in the marker.
    pub session: String,
    /// Checksum recorded in the marker.
    pub checksum: String,
    /// Timestamp recorded in the marker.
    pub written: String,
    /// Content between the markers.
    pub content: String,
}

/// Wrap block content in HTML-comment markers for round-trip extraction.
#[must_use]
pub fn render_marked(block: &Block, content: &str, session_id: &str) -> String {
    render_marked_at(block, content, session_id, Utc::now())
}

/// Marker rendering with an explicit timestamp (deterministic tests).
#[must_use]
pub fn render_marked_at(
    block: &Block,
    content: &str,
    session_id: &str,
    written: DateTime<Utc>,
) -> String {
    format!(
        "<!-- BLOCK_START id={id} source={source} session={session} checksum={sum} written={written} -->\n{content}\n<!-- BLOCK_END id={id} -->",
        id = block.id,
        source = block.source_file,
        session = session_id,
        sum = checksum(content),
        written = written.to_rfc3339(),
    )
}

#[allow(clippy::expect_used)]
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!-- BLOCK_START id=(\S+) source=(\S+) session=(\S+) checksum=([0-9a-f]+) written=(\S+) -->\n(.*?)\n<!-- BLOCK_END id=(\S+) -->",
    )
    .expect("static marker pattern")
});

/// Extract all marker-delimited blocks from library file content.
///
/// Entries whose start and end ids disagree are skipped.
#[must_use]
pub fn extract_marked_blocks(text: &str) -> Vec<MarkedBlock> {
    MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let start_id = caps.get(1)?.as_str();
            let end_id = caps.get(7)?.as_str();
            if start_id != end_id {
                return None;
            }
            Some(MarkedBlock {
                id: start_id.to_string(),
                source: caps.get(2)?.as_str().to_string(),
                session: caps.get(3)?.as_str().to_string(),
                checksum: caps.get(4)?.as_str().to_string(),
                written: caps.get(5)?.as_str().to_string(),
                content: caps.get(6)?.as_str().to_string(),
            })
        })
        .collect()
}

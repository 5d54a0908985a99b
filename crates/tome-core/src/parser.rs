//! Markdown parsing into integrity-tracked content blocks.
//!
//! The parser decomposes a markdown document into an ordered stream of
//! [`Block`]s — the minimally-divisible units the rest of the system indexes,
//! classifies and writes back. Parsing is line-based so that every block
//! reproduces its raw bytes exactly; this is what makes the dual-checksum
//! integrity layer possible.
//!
//! ## Parsing strategy
//!
//! 1. Fenced code blocks (` ``` ` to the next fence) are atomic, one block.
//! 2. Indented code blocks (maximal runs of blank or ≥4-space/tab lines) are
//!    atomic, one block.
//! 3. ATX headers update the heading stack; they never produce a block of
//!    their own, only context for the blocks that follow.
//! 4. Everything else groups into paragraph, list, blockquote or table
//!    blocks. Lists and blockquotes extend across internal blank lines while
//!    the next non-empty line continues the same kind.
//!
//! Line numbers are 1-indexed and inclusive. Block ids are assigned
//! monotonically as `block_001`, `block_002`, … and are unique within a
//! document.
//!
//! ## Examples
//!
//! ```rust
//! use tome_core::parser::{BlockKind, MarkdownParser};
//!
//! let mut parser = MarkdownParser::new("notes/example.md");
//! let blocks = parser.parse("# Title\n\nSome prose under the title.\n");
//!
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].kind, BlockKind::Paragraph);
//! assert_eq!(blocks[0].heading_path, vec!["Title".to_string()]);
//! ```

use crate::canonical::{canonicalize_prose, checksum, checksums};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

/// Maximum source file size accepted by the parser (1 MiB).
///
/// Larger files fail loudly with [`Error::InputTooLarge`]; the indexer skips
/// them and continues.
pub const MAX_SOURCE_FILE_SIZE: u64 = 1024 * 1024;

#[allow(clippy::expect_used)]
static ATX_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("static header pattern"));

#[allow(clippy::expect_used)]
static UNORDERED_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*+]\s").expect("static list pattern"));

#[allow(clippy::expect_used)]
static ORDERED_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s").expect("static list pattern"));

#[allow(clippy::expect_used)]
static TABLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|[-:]+\|").expect("static table pattern"));

/// The semantic kind of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Plain prose paragraph.
    Paragraph,
    /// Fenced or indented code; byte-strict under canonicalization.
    Code,
    /// Ordered or unordered list.
    List,
    /// `>`-prefixed quotation.
    Blockquote,
    /// Pipe table with a separator row.
    Table,
    /// A `#`-leading line that did not parse as an ATX header.
    HeaderSection,
}

/// A minimally-divisible unit of a source document.
///
/// Blocks are created by the parser and immutable thereafter; the integrity
/// layer verifies writes against the checksums recorded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Identifier unique within the document (`block_001`, `block_002`, …).
    pub id: String,

    /// Semantic kind detected for this block.
    pub kind: BlockKind,

    /// Raw content, byte-exact as it appeared in the source.
    pub content: String,

    /// Canonical form: whitespace-normalized prose, or the raw bytes for
    /// code blocks.
    pub content_canonical: String,

    /// Path of the source file this block was extracted from.
    pub source_file: String,

    /// Starting line number (1-indexed, inclusive).
    pub start_line: usize,

    /// Ending line number (1-indexed, inclusive).
    pub end_line: usize,

    /// Ordered heading texts from the document root to the immediate parent.
    pub heading_path: Vec<String>,

    /// 16-hex-char SHA-256 prefix over the raw bytes.
    pub checksum_exact: String,

    /// 16-hex-char SHA-256 prefix over the canonical form.
    ///
    /// Equal to `checksum_exact` for code blocks.
    pub checksum_canonical: String,
}

impl Block {
    /// Heading immediately preceding this block, if any.
    #[must_use]
    pub fn section(&self) -> Option<&str> {
        self.heading_path.last().map(String::as_str)
    }
}

/// A parsed source document: ordered blocks plus file-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Path of the source file.
    pub file_path: String,

    /// 16-hex-char SHA-256 prefix over the full file content.
    pub checksum: String,

    /// Number of blocks extracted.
    pub total_blocks: usize,

    /// Blocks in document order.
    pub blocks: Vec<Block>,
}

/// Parse markdown documents into semantic content blocks.
///
/// A parser instance tracks the heading stack and block counter for one
/// document at a time; `parse` resets both, so instances can be reused.
pub struct MarkdownParser {
    source_file: String,
    heading_stack: Vec<(usize, String)>,
    block_counter: usize,
}

impl MarkdownParser {
    /// Create a parser for blocks originating from `source_file`.
    #[must_use]
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            heading_stack: Vec::new(),
            block_counter: 0,
        }
    }

    fn next_block_id(&mut self) -> String {
        self.block_counter += 1;
        format!("block_{:03}", self.block_counter)
    }

    fn heading_path(&self) -> Vec<String> {
        self.heading_stack
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Pop entries at the same or deeper level, then push the new heading.
    fn update_heading_stack(&mut self, level: usize, text: String) {
        while self
            .heading_stack
            .last()
            .is_some_and(|(existing, _)| *existing >= level)
        {
            self.heading_stack.pop();
        }
        self.heading_stack.push((level, text));
    }

    /// Detect the kind of a block from its lines.
    fn detect_kind(lines: &[&str]) -> BlockKind {
        let first_nonempty = lines
            .iter()
            .find(|line| !line.trim().is_empty())
            .copied()
            .unwrap_or("");

        if first_nonempty.trim_start().starts_with("```") {
            return BlockKind::Code;
        }

        let nonempty: Vec<&str> = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .copied()
            .collect();
        if !nonempty.is_empty()
            && nonempty
                .iter()
                .all(|line| line.starts_with("    ") || line.starts_with('\t'))
        {
            return BlockKind::Code;
        }

        let stripped = first_nonempty.trim();
        if stripped.starts_with('>') {
            return BlockKind::Blockquote;
        }
        if UNORDERED_LIST.is_match(stripped) || ORDERED_LIST.is_match(stripped) {
            return BlockKind::List;
        }
        if lines
            .iter()
            .any(|line| line.contains('|') && TABLE_SEPARATOR.is_match(line))
        {
            return BlockKind::Table;
        }
        if stripped.starts_with('#') {
            return BlockKind::HeaderSection;
        }

        BlockKind::Paragraph
    }

    fn create_block(
        &mut self,
        content: String,
        start_line: usize,
        end_line: usize,
        kind: BlockKind,
    ) -> Block {
        let is_code = kind == BlockKind::Code;
        let canonical = if is_code {
            content.clone()
        } else {
            canonicalize_prose(&content)
        };
        let (checksum_exact, checksum_canonical) = checksums(&content, is_code);

        Block {
            id: self.next_block_id(),
            kind,
            content,
            content_canonical: canonical,
            source_file: self.source_file.clone(),
            start_line,
            end_line,
            heading_path: self.heading_path(),
            checksum_exact,
            checksum_canonical,
        }
    }

    /// Parse markdown content into an ordered block list.
    ///
    /// Headers update the heading stack without producing blocks; fenced and
    /// indented code runs are atomic; prose runs terminate on blank lines,
    /// headers and fence markers, with lists and blockquotes continuing
    /// across blank lines while the next non-empty line keeps the same kind.
    pub fn parse(&mut self, content: &str) -> Vec<Block> {
        let lines: Vec<&str> = content.split('\n').collect();
        let mut blocks = Vec::new();
        self.heading_stack.clear();
        self.block_counter = 0;

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];

            // Fenced code block: atomic until the closing fence or EOF.
            if line.trim().starts_with("```") {
                let code_start = i;
                let mut code_lines = vec![line];
                i += 1;

                while i < lines.len() {
                    code_lines.push(lines[i]);
                    if lines[i].trim().starts_with("```") && i > code_start {
                        i += 1;
                        break;
                    }
                    i += 1;
                }

                let block =
                    self.create_block(code_lines.join("\n"), code_start + 1, i, BlockKind::Code);
                blocks.push(block);
                continue;
            }

            // Indented code block: maximal run of blank or indented lines.
            if (line.starts_with("    ") || line.starts_with('\t')) && !line.trim().is_empty() {
                let code_start = i;
                let mut code_lines = Vec::new();

                while i < lines.len() {
                    let current = lines[i];
                    if current.trim().is_empty()
                        || current.starts_with("    ")
                        || current.starts_with('\t')
                    {
                        code_lines.push(current);
                        i += 1;
                        continue;
                    }
                    break;
                }

                let block =
                    self.create_block(code_lines.join("\n"), code_start + 1, i, BlockKind::Code);
                blocks.push(block);
                continue;
            }

            // ATX header: context only, never a block of its own.
            if let Some(caps) = ATX_HEADER.captures(line) {
                let level = caps[1].len();
                let text = caps[2].trim().to_string();
                self.update_heading_stack(level, text);
                i += 1;
                continue;
            }

            if line.trim().is_empty() {
                i += 1;
                continue;
            }

            // Prose run: paragraph, list, blockquote or table.
            let block_start = i;
            let mut block_lines: Vec<&str> = Vec::new();
            let initial_kind = Self::detect_kind(&[line]);

            while i < lines.len() {
                let current = lines[i];

                if ATX_HEADER.is_match(current) {
                    break;
                }
                if current.trim().starts_with("```") {
                    break;
                }
                if current.trim().is_empty() {
                    if !matches!(initial_kind, BlockKind::List | BlockKind::Blockquote) {
                        break;
                    }
                    // Lists and blockquotes survive blank lines only while
                    // the next non-empty line continues the same kind.
                    let mut peek = i + 1;
                    while peek < lines.len() && lines[peek].trim().is_empty() {
                        peek += 1;
                    }
                    if peek >= lines.len() {
                        break;
                    }
                    if Self::detect_kind(&[lines[peek]]) != initial_kind {
                        break;
                    }
                }

                block_lines.push(current);
                i += 1;
            }

            if !block_lines.is_empty() {
                let kind = Self::detect_kind(&block_lines);
                let block = self.create_block(block_lines.join("\n"), block_start + 1, i, kind);
                blocks.push(block);
            }
        }

        blocks
    }
}

/// Parse markdown text into a [`SourceDocument`].
///
/// # Errors
///
/// Returns [`Error::InputTooLarge`] when the content exceeds
/// [`MAX_SOURCE_FILE_SIZE`].
pub fn parse_document(content: &str, file_path: &str) -> Result<SourceDocument> {
    let size = content.len() as u64;
    if size > MAX_SOURCE_FILE_SIZE {
        return Err(Error::InputTooLarge {
            size,
            limit: MAX_SOURCE_FILE_SIZE,
        });
    }

    let doc_checksum = checksum(content);
    let mut parser = MarkdownParser::new(file_path);
    let blocks = parser.parse(content);

    Ok(SourceDocument {
        file_path: file_path.to_string(),
        checksum: doc_checksum,
        total_blocks: blocks.len(),
        blocks,
    })
}

/// Read and parse a markdown file into a [`SourceDocument`].
///
/// The size check runs against file metadata before the content is read, so
/// oversized files are rejected without loading them.
///
/// # Errors
///
/// Returns [`Error::InputTooLarge`] for files above 1 MiB and [`Error::Io`]
/// when the file cannot be read.
pub async fn parse_markdown_file(path: &Path) -> Result<SourceDocument> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_SOURCE_FILE_SIZE {
        return Err(Error::InputTooLarge {
            size: metadata.len(),
            limit: MAX_SOURCE_FILE_SIZE,
        });
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_document(&content, &path.to_string_lossy())
}

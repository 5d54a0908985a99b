//! Splitting markdown into embeddable chunks.
//!
//! The default "semantic" strategy splits on heading boundaries, then packs
//! the resulting sections into token windows between the configured minimum
//! and maximum, splitting oversized sections with overlap. Chunks that end
//! below the minimum are not indexed.
//!
//! Chunking must be deterministic: the retriever re-runs the chunker against
//! the source file to hydrate content, matching chunks by index and content
//! hash. Any change here is effectively an index format change.

use crate::canonical::checksum;
use crate::parser::MarkdownParser;
use serde::{Deserialize, Serialize};

/// Strategy used to split a document into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Split on heading boundaries, then enforce token windows.
    #[default]
    Semantic,
    /// Fixed-size token windows across the whole document.
    Fixed,
    /// Sentence-boundary packing into token windows.
    Sentence,
}

const fn default_min_tokens() -> usize {
    512
}

const fn default_max_tokens() -> usize {
    2048
}

const fn default_overlap_tokens() -> usize {
    128
}

/// Window parameters for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerOptions {
    /// Minimum tokens per chunk; smaller chunks are skipped.
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    /// Maximum tokens per chunk.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Overlap between consecutive windows of a split section.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Splitting strategy.
    #[serde(default)]
    pub strategy: ChunkStrategy,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            min_tokens: 512,
            max_tokens: 2048,
            overlap_tokens: 128,
            strategy: ChunkStrategy::Semantic,
        }
    }
}

/// A unit of text submitted for embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the file's split.
    pub index: usize,
    /// Number of chunks the file produced.
    pub total: usize,
    /// Chunk text.
    pub content: String,
    /// Heading immediately preceding the chunk, when any.
    pub section: Option<String>,
    /// Heading path of the chunk's first section.
    pub heading_path: Vec<String>,
    /// 16-hex hash over the chunk text.
    pub content_hash: String,
}

/// Rough token estimate: whitespace-separated words.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split markdown text into chunks according to the options.
#[must_use]
pub fn chunk_markdown(text: &str, options: &ChunkerOptions) -> Vec<Chunk> {
    let mut chunks = match options.strategy {
        ChunkStrategy::Semantic => chunk_semantic(text, options),
        ChunkStrategy::Fixed => chunk_fixed(text, options),
        ChunkStrategy::Sentence => chunk_sentence(text, options),
    };

    let total = chunks.len();
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = index;
        chunk.total = total;
    }
    chunks
}

struct Section {
    heading_path: Vec<String>,
    content: String,
}

/// Group consecutive blocks sharing a heading path into sections.
fn collect_sections(text: &str) -> Vec<Section> {
    let blocks = MarkdownParser::new("chunker").parse(text);
    let mut sections: Vec<Section> = Vec::new();

    for block in blocks {
        match sections.last_mut() {
            Some(section) if section.heading_path == block.heading_path => {
                section.content.push_str("\n\n");
                section.content.push_str(&block.content);
            },
            _ => sections.push(Section {
                heading_path: block.heading_path,
                content: block.content,
            }),
        }
    }

    sections
}

fn make_chunk(content: String, heading_path: Vec<String>) -> Chunk {
    let content_hash = checksum(&content);
    Chunk {
        index: 0,
        total: 0,
        content,
        section: heading_path.last().cloned(),
        heading_path,
        content_hash,
    }
}

fn chunk_semantic(text: &str, options: &ChunkerOptions) -> Vec<Chunk> {
    let sections = collect_sections(text);
    let mut chunks = Vec::new();

    let mut pending: Option<(Vec<String>, String)> = None;
    for section in sections {
        let section_tokens = estimate_tokens(&section.content);

        // Oversized sections get their own windowed chunks.
        if section_tokens > options.max_tokens {
            if let Some((path, content)) = pending.take() {
                if estimate_tokens(&content) >= options.min_tokens {
                    chunks.push(make_chunk(content, path));
                }
            }
            for window in split_windows(&section.content, options) {
                chunks.push(make_chunk(window, section.heading_path.clone()));
            }
            continue;
        }

        match pending.take() {
            None => pending = Some((section.heading_path, section.content)),
            Some((path, mut content)) => {
                let combined = estimate_tokens(&content) + section_tokens;
                if combined > options.max_tokens {
                    if estimate_tokens(&content) >= options.min_tokens {
                        chunks.push(make_chunk(content, path));
                    }
                    pending = Some((section.heading_path, section.content));
                } else {
                    content.push_str("\n\n");
                    content.push_str(&section.content);
                    if combined >= options.min_tokens {
                        chunks.push(make_chunk(content, path));
                        pending = None;
                    } else {
                        pending = Some((path, content));
                    }
                }
            },
        }
    }

    if let Some((path, content)) = pending {
        if estimate_tokens(&content) >= options.min_tokens {
            chunks.push(make_chunk(content, path));
        }
    }

    chunks
}

fn chunk_fixed(text: &str, options: &ChunkerOptions) -> Vec<Chunk> {
    split_windows(text, options)
        .into_iter()
        .filter(|window| estimate_tokens(window) >= options.min_tokens)
        .map(|window| make_chunk(window, Vec::new()))
        .collect()
}

fn chunk_sentence(text: &str, options: &ChunkerOptions) -> Vec<Chunk> {
    let sentences = split_sentences(text);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let combined = estimate_tokens(&current) + estimate_tokens(&sentence);
        if combined > options.max_tokens && !current.is_empty() {
            if estimate_tokens(&current) >= options.min_tokens {
                chunks.push(make_chunk(std::mem::take(&mut current), Vec::new()));
            } else {
                current.clear();
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence.trim());
    }

    if !current.is_empty() && estimate_tokens(&current) >= options.min_tokens {
        chunks.push(make_chunk(current, Vec::new()));
    }

    chunks
}

/// Word windows of `max_tokens` with `overlap_tokens` carried between them.
fn split_windows(text: &str, options: &ChunkerOptions) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() <= options.max_tokens {
        return vec![words.join(" ")];
    }

    let step = options.max_tokens.saturating_sub(options.overlap_tokens).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + options.max_tokens).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    windows
}

fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, byte) in bytes.iter().enumerate() {
        if matches!(byte, b'.' | b'!' | b'?') {
            let next = bytes.get(i + 1);
            if next.is_none_or(u8::is_ascii_whitespace) {
                let sentence = text[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = i + 1;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

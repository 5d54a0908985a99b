//! Canonicalization and checksum primitives for the integrity layer.
//!
//! Every extracted block carries two fingerprints:
//!
//! - `checksum_exact` — SHA-256 over the raw bytes, truncated to a
//!   16-character lowercase hex prefix
//! - `checksum_canonical` — the same hash over the canonical form
//!
//! Canonicalization v1 collapses every whitespace run in prose to a single
//! space and trims the ends, preserving every word verbatim. Code blocks are
//! byte-strict: their canonical form is the raw form, so both checksums are
//! equal.
//!
//! ## Examples
//!
//! ```rust
//! use tome_core::canonical::{canonicalize_prose, checksum, verify_canonical};
//!
//! let canonical = canonicalize_prose("Hello   world\n");
//! assert_eq!(canonical, "Hello world");
//!
//! let expected = checksum("Hello world");
//! assert!(verify_canonical("Hello\tworld", &expected));
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Length of the truncated hex checksum prefix.
pub const CHECKSUM_LEN: usize = 16;

#[allow(clippy::expect_used)]
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

/// Canonicalize prose content using v1 rules.
///
/// Collapses all whitespace sequences (spaces, tabs, newlines) into single
/// spaces and trims leading/trailing whitespace. Code blocks are byte-strict
/// and returned unchanged.
#[must_use]
pub fn canonicalize_prose(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    if is_code_block(content) {
        return content.to_string();
    }

    WHITESPACE_RUN.replace_all(content, " ").trim().to_string()
}

/// Detect whether content is a code block.
///
/// A block is code when its first non-empty line opens a triple-backtick
/// fence (up to 3 leading spaces tolerated), or when every non-empty line is
/// indented with at least 4 spaces or a tab.
#[must_use]
pub fn is_code_block(content: &str) -> bool {
    if content.trim().is_empty() {
        return false;
    }

    let first_nonempty = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");
    if first_nonempty.trim_start().starts_with("```") {
        return true;
    }

    let mut nonempty = content.lines().filter(|line| !line.trim().is_empty());
    let mut any = false;
    for line in nonempty.by_ref() {
        if !(line.starts_with("    ") || line.starts_with('\t')) {
            return false;
        }
        any = true;
    }
    any
}

/// Generate a 16-character SHA-256 prefix checksum over UTF-8 bytes.
#[must_use]
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..CHECKSUM_LEN].to_string()
}

/// Generate both the exact and canonical checksums for content.
///
/// For code blocks the canonical form equals the raw form, so the pair is
/// identical.
#[must_use]
pub fn checksums(content: &str, is_code: bool) -> (String, String) {
    let exact = checksum(content);
    let canonical = if is_code {
        exact.clone()
    } else {
        checksum(&canonicalize_prose(content))
    };
    (exact, canonical)
}

/// Verify that content matches an expected exact checksum.
#[must_use]
pub fn verify(content: &str, expected: &str) -> bool {
    checksum(content) == expected
}

/// Verify that canonicalized content matches an expected canonical checksum.
#[must_use]
pub fn verify_canonical(content: &str, expected: &str) -> bool {
    checksum(&canonicalize_prose(content)) == expected
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prose_whitespace_collapse() {
        assert_eq!(canonicalize_prose("Hello   world"), "Hello world");
        assert_eq!(canonicalize_prose("  a\tb\nc  "), "a b c");
        assert_eq!(canonicalize_prose("one\n\n\ntwo"), "one two");
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(canonicalize_prose(""), "");
        assert!(!is_code_block(""));
        assert!(!is_code_block("   \n  "));
    }

    #[test]
    fn test_fenced_code_detection() {
        assert!(is_code_block("```python\nprint('hi')\n```"));
        assert!(is_code_block("   ```\ncode\n```"));
        assert!(!is_code_block("text before\n```\ncode\n```"));
    }

    #[test]
    fn test_indented_code_detection() {
        assert!(is_code_block("    let x = 1;\n    let y = 2;"));
        assert!(is_code_block("\tfoo()\n\n\tbar()"));
        assert!(!is_code_block("    indented\nnot indented"));
    }

    #[test]
    fn test_code_blocks_are_byte_strict() {
        let code = "```python\nprint('hello')\n```";
        assert_eq!(canonicalize_prose(code), code);

        let (exact, canonical) = checksums(code, true);
        assert_eq!(exact, canonical);
    }

    #[test]
    fn test_checksum_format() {
        let sum = checksum("some content");
        assert_eq!(sum.len(), CHECKSUM_LEN);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sum, sum.to_lowercase());
    }

    #[test]
    fn test_checksum_known_value() {
        // sha256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(checksum("hello"), "2cf24dba5fb0a30e");
    }

    #[test]
    fn test_verify_helpers() {
        let expected = checksum("Hello world");
        assert!(verify("Hello world", &expected));
        assert!(!verify("Goodbye", &expected));
        assert!(verify_canonical("Hello   world", &expected));
        assert!(verify_canonical("Hello\nworld", &expected));
        assert!(!verify_canonical("Hello there world", &expected));
    }

    #[test]
    fn test_prose_checksums_differ_when_whitespace_varies() {
        let (exact_a, canonical_a) = checksums("Hello   world", false);
        let (exact_b, canonical_b) = checksums("Hello world", false);
        assert_ne!(exact_a, exact_b);
        assert_eq!(canonical_a, canonical_b);
    }

    proptest! {
        #[test]
        fn test_canonicalization_idempotent(content in r"[ \t\n\ra-zA-Z0-9,.!?'-]{0,400}") {
            let once = canonicalize_prose(&content);
            let twice = canonicalize_prose(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_checksum_deterministic(content in r".{0,400}") {
            prop_assert_eq!(checksum(&content), checksum(&content));
        }

        #[test]
        fn test_canonical_prose_has_no_whitespace_runs(content in r"[ \t\na-z]{0,200}") {
            prop_assume!(!is_code_block(&content));
            let canonical = canonicalize_prose(&content);
            prop_assert!(!canonical.contains("  "));
            prop_assert!(!canonical.contains('\t'));
            prop_assert!(!canonical.contains('\n'));
            prop_assert_eq!(canonical.trim(), canonical.as_str());
        }
    }
}

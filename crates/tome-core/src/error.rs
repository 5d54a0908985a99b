//! Error types and handling for tome-core operations.
//!
//! This module provides a comprehensive error type that covers all possible
//! failures in the knowledge retrieval core. Errors are categorized for easier
//! handling and include context about recoverability for retry logic.
//!
//! ## Error Categories
//!
//! Errors are organized into logical categories:
//!
//! - **I/O Errors**: File system operations, disk access
//! - **Network Errors**: Embedding, LLM and vector-store transport failures
//! - **Parse Errors**: Markdown parsing, config deserialization
//! - **Integrity Errors**: Checksum violations, path traversal attempts
//! - **Store Errors**: Vector store operations
//! - **Taxonomy Errors**: Missing categories, rejected proposals
//! - **Configuration Errors**: Invalid settings or config files
//!
//! ## Recovery Hints
//!
//! Errors include information about whether they might be recoverable through
//! retries. Timeouts and connection failures are transient; integrity and
//! traversal violations never are.

use thiserror::Error;

/// The main error type for tome-core operations.
///
/// All public functions in tome-core return `Result<T, Error>` for consistent
/// error handling. The error type includes automatic conversion from common
/// standard library errors and provides additional metadata for error
/// handling logic.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Covers file system operations like reading/writing library files,
    /// creating directories, and persisting caches. The underlying
    /// `std::io::Error` is preserved to maintain detailed error information.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network operation failed.
    ///
    /// Covers HTTP requests to embedding providers, the LLM endpoint, and the
    /// vector store. The underlying `reqwest::Error` is preserved for
    /// detailed connection information.
    ///
    /// ## Recoverability
    ///
    /// Connection and timeout errors are typically recoverable, while
    /// authentication and malformed URL errors are permanent.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Parsing operation failed.
    ///
    /// Occurs when markdown content cannot be parsed at a level the parser
    /// cannot tolerate. Rare: the parser is resilient and most malformed
    /// input degrades to paragraph blocks instead.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Source file exceeds the per-file size limit.
    ///
    /// The parser refuses files larger than 1 MiB; this is fatal to the
    /// operation but the indexer skips the file and continues.
    #[error("Input too large: {size} bytes exceeds {limit} byte limit")]
    InputTooLarge {
        /// Observed size of the input in bytes.
        size: u64,
        /// Configured maximum in bytes.
        limit: u64,
    },

    /// A STRICT-mode write did not match the expected checksum.
    ///
    /// The write is rolled back; nothing reaches the destination file.
    #[error("Integrity violation: expected checksum {expected}, got {actual}")]
    IntegrityViolation {
        /// Checksum recorded on the block being written.
        expected: String,
        /// Checksum of the bytes that were about to be written.
        actual: String,
    },

    /// A destination path escapes the library root.
    ///
    /// Raised for `..` components or absolute destinations that resolve
    /// outside the library. Always fatal for that write.
    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    /// An embedding or LLM provider cannot resolve an API key.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Operation exceeded its per-call deadline.
    ///
    /// Callers treat this the same as a transport error; it is typically
    /// recoverable with retry logic.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Requested resource was not found.
    ///
    /// Used for missing taxonomy paths, content ids, and files that were
    /// deleted after being indexed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The taxonomy rejected a malformed category proposal.
    ///
    /// Raised for proposals under a level-1 parent or with an invalid shape.
    /// Classification callers drop the proposal and continue.
    #[error("Proposal rejected: {0}")]
    ProposalRejected(String),

    /// Vector store operation failed.
    ///
    /// Covers collection management, upserts, searches and scrolls beyond
    /// basic transport failures. Initialization failures are fatal to
    /// startup.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    ///
    /// Occurs when converting between data formats (JSON, YAML, TOML) fails
    /// due to incompatible formats or corruption.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// Returns `true` for errors that are typically temporary and might
    /// succeed if the operation is retried after a delay: network timeouts,
    /// connection failures, and temporary I/O issues. Integrity violations,
    /// traversal attempts and configuration problems are permanent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// Returns a static string that categorizes the error type for logging,
    /// metrics collection, and error handling logic.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Parse(_) => "parse",
            Self::InputTooLarge { .. } => "input_too_large",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::PathTraversal(_) => "path_traversal",
            Self::MissingCredential(_) => "missing_credential",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::ProposalRejected(_) => "proposal_rejected",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
///
/// This type is used throughout tome-core for consistent error handling.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the facts engine.
//!
//! All errors are strongly typed using thiserror. The taxonomy follows the
//! engine's layers: validation problems (documents and source configuration),
//! per-source collection failures, and storage failures, with a top-level
//! [`FactsError`] that callers can pattern-match on.

use thiserror::Error;

use crate::source::FactSource;
use crate::storage::StorageError;

/// Validation errors for source configuration and custom-facts documents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("source type cannot be empty")]
    EmptySourceType,

    #[error("unknown source type: '{source_type}'")]
    UnknownSourceType { source_type: String },

    #[error("unknown merge policy: '{policy}'")]
    UnknownMergePolicy { policy: String },

    #[error("timeout must be positive (got {timeout_secs}s)")]
    NonPositiveTimeout { timeout_secs: i64 },

    #[error("unknown document format: '{format}'")]
    UnknownDocumentFormat { format: String },

    #[error("source type '{source_type}' requires a document location")]
    MissingLocation { source_type: String },

    #[error("source type '{source_type}' requires a fact provider")]
    MissingProvider { source_type: String },

    #[error("document at '{path}' is unreachable: {reason}")]
    UnreachableFile { path: String, reason: String },

    #[error("refusing non-https origin '{url}'")]
    InsecureUrl { url: String },

    #[error("fact key cannot be empty")]
    EmptyFactKey,

    #[error("server name cannot be empty")]
    EmptyServerName,

    #[error("invalid server name '{server}': must match [A-Za-z0-9_-]+")]
    InvalidServerName { server: String },

    #[error("server '{server}': {section} category name cannot be empty")]
    EmptyCategoryName { server: String, section: String },

    #[error("server '{server}': {section} category '{category}' must be a map of keys, got {type_name}")]
    CategoryNotMap {
        server: String,
        section: String,
        category: String,
        type_name: String,
    },

    #[error("server '{server}': {section} category '{category}' contains an empty key")]
    EmptyCustomKey {
        server: String,
        section: String,
        category: String,
    },

    #[error("server '{server}': {section} fact '{category}.{key}' has a null value")]
    NullCustomValue {
        server: String,
        section: String,
        category: String,
        key: String,
    },
}

/// A single source's failure to produce facts.
///
/// These are soft errors during aggregate collection: the manager
/// accumulates them and only escalates when every applicable source failed.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The source does not know the requested key.
    #[error("source {source} does not support key '{key}'")]
    UnsupportedKey { source: FactSource, key: String },

    /// The source has no entry for the requested server.
    #[error("source {source} has no facts for server '{server}'")]
    UnknownServer { source: FactSource, server: String },

    /// The external provider behind this source failed.
    #[error("provider failure for source {source}: {reason}")]
    Provider { source: FactSource, reason: String },

    /// A document could not be parsed into facts.
    #[error("malformed document at '{location}': {reason}")]
    MalformedDocument { location: String, reason: String },

    /// A remote document fetch failed after passing the origin check.
    #[error("fetch of '{url}' failed: {reason}")]
    Fetch { url: String, reason: String },

    /// Reading a local document failed.
    #[error("I/O error reading '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

/// A per-source failure recorded during aggregate collection.
#[derive(Debug)]
pub struct SourceFailure {
    /// The source that failed.
    pub source: FactSource,
    /// Why it failed.
    pub error: CollectError,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

/// Top-level error type for the facts engine.
#[derive(Debug, Error)]
pub enum FactsError {
    /// The requested fact was absent after exhausting all classified sources.
    #[error("fact '{key}' not found for server '{server}'")]
    NotFound { server: String, key: String },

    /// Malformed configuration or document structure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A single source failed in a context where that is fatal.
    #[error("collection error: {0}")]
    Collect(#[from] CollectError),

    /// Every applicable source failed for an aggregate collection.
    #[error("all {} applicable sources failed for server '{server}'", .failures.len())]
    AllSourcesFailed {
        server: String,
        failures: Vec<SourceFailure>,
    },

    /// An imported custom-facts document was structurally invalid.
    ///
    /// Carries every violation found; the import was refused wholesale.
    #[error("custom-facts document rejected with {} validation error(s)", .errors.len())]
    DocumentRejected { errors: Vec<ValidationError> },

    /// A persistence-dependent operation was invoked with no backend configured.
    #[error("no storage backend configured")]
    StorageUnavailable,

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl FactsError {
    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a validation error (config or document).
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::DocumentRejected { .. })
    }

    /// Returns true if every applicable source failed.
    #[must_use]
    pub const fn is_all_sources_failed(&self) -> bool {
        matches!(self, Self::AllSourcesFailed { .. })
    }

    /// Returns true if no storage backend is configured.
    #[must_use]
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable)
    }
}

/// Result type alias for facts-engine operations.
pub type FactsResult<T> = Result<T, FactsError>;

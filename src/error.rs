//! Error types
//!
//! Library-level failures that callers need to tell apart: input validation,
//! JSON import problems and classified storage failures. Application glue
//! (CLI, chat service) wraps these in `anyhow` with context.

use thiserror::Error;

// ============================================================================
// RagError
// ============================================================================

/// Errors surfaced by the knowledge pipeline
#[derive(Debug, Error)]
pub enum RagError {
    /// A required field was missing or empty. Nothing was written.
    #[error("{0}")]
    Validation(String),

    /// An uploaded file does not carry the `.json` extension.
    #[error("Only .json files are supported (invalid: {0})")]
    NotJsonFile(String),

    /// The file could not be parsed as JSON.
    #[error("Invalid JSON format in file: {file}")]
    InvalidJson {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// The file parsed, but no entry carried importable content.
    #[error("No valid documents found in {0}. Use {{ title, content }}, an array of objects, or {{ documents: [...] }}")]
    NoValidDocuments(String),

    /// A document id did not resolve to a stored document.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// The shared connection mutex was poisoned.
    #[error("Lock error: {0}")]
    Lock(String),

    /// Filesystem failure (data directory, import files).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A storage failure, classified for display.
    #[error("{}", kind.message())]
    Storage {
        kind: StorageErrorKind,
        #[source]
        source: rusqlite::Error,
    },
}

impl RagError {
    /// Wrap a raw SQLite error, classifying it by its message.
    pub fn storage(source: rusqlite::Error) -> Self {
        let kind = StorageErrorKind::classify(&source.to_string());
        Self::Storage { kind, source }
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage(e)
    }
}

/// Convenience result type for library operations
pub type Result<T> = std::result::Result<T, RagError>;

// ============================================================================
// Storage Error Classification
// ============================================================================

/// Human-readable category for a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Schema has not been created yet
    TablesMissing,
    /// The database server or file cannot be reached
    Unreachable,
    /// The named database does not exist
    DatabaseMissing,
    /// Credentials were rejected
    AuthFailed,
    /// Anything else
    Other,
}

impl StorageErrorKind {
    /// Classify an error message by substring.
    ///
    /// Order matters: "relation ... does not exist" must win over the generic
    /// "database does not exist" check.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if (lower.contains("relation") && lower.contains("does not exist"))
            || lower.contains("no such table")
        {
            return Self::TablesMissing;
        }
        if lower.contains("connect")
            || lower.contains("econnrefused")
            || lower.contains("unable to open")
        {
            return Self::Unreachable;
        }
        if lower.contains("does not exist") && lower.contains("database") {
            return Self::DatabaseMissing;
        }
        if lower.contains("authentication failed") {
            return Self::AuthFailed;
        }
        Self::Other
    }

    /// Message shown to the operator
    pub fn message(&self) -> &'static str {
        match self {
            Self::TablesMissing => "Database tables not initialized. Run migrations.",
            Self::Unreachable => "Cannot connect to database server.",
            Self::DatabaseMissing => "Database does not exist.",
            Self::AuthFailed => "Database authentication failed.",
            Self::Other => "Database connection failed.",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

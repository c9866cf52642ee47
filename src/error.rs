//! Error types for schema compilation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for crate-level operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Top-level errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Build failed: {failed} of {total} subject(s) did not pass")]
    BuildFailed { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Parse Errors
// =============================================================================

/// What went wrong while parsing a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// Input is not a well-formed schema
    Malformed,
    /// A name was defined twice (named type, field, or enum symbol)
    DuplicateName,
    /// A named-type reference did not resolve
    UnresolvedReference,
    /// A default value does not match its field type
    InvalidDefault,
    /// A named type contains itself without array/map/union indirection
    RecursiveWithoutIndirection,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Malformed => "malformed schema",
            Self::DuplicateName => "duplicate name",
            Self::UnresolvedReference => "unresolved reference",
            Self::InvalidDefault => "invalid default",
            Self::RecursiveWithoutIndirection => "recursive type without indirection",
        };
        f.write_str(s)
    }
}

/// Schema parse failure with the location it was detected at
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} at {location}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Path into the schema document (e.g. `com.acme.User.fields[1].type`)
    /// or `line:column` for IDL input
    pub location: String,
    pub message: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Malformed, location, message)
    }

    pub fn duplicate(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::DuplicateName, location, message)
    }

    pub fn unresolved(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::UnresolvedReference, location, message)
    }

    pub fn invalid_default(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::InvalidDefault, location, message)
    }
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Failures talking to the schema registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry could not be reached; retryable, and never a stand-in for "no history"
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Registry entry for subject '{subject}' is corrupt: {reason}")]
    Corrupt { subject: String, reason: String },

    #[error("Registration rejected for subject '{subject}': {reason}")]
    Rejected { subject: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl RegistryError {
    /// Whether retrying the call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Unavailable(_))
    }
}

// =============================================================================
// Generation Errors
// =============================================================================

/// Binding generation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Two different definitions would be emitted under the same type name
    #[error("Generation conflict for '{type_name}': definitions differ\n{diff}")]
    Conflict { type_name: String, diff: String },
}

// =============================================================================
// Discovery Errors
// =============================================================================

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Source root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("Invalid include pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),
}

//! Typed error hierarchy for seedling
//!
//! Every rejection path carries a distinguishable kind; no failure is
//! collapsed into a generic success or a bare string.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the session engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed bencode input
    #[error("Bencode parse error at byte {offset}: {kind}")]
    Parse { kind: ParseErrorKind, offset: usize },

    /// Structurally valid bencode that is not valid torrent metadata
    #[error("Invalid torrent metadata: {message}")]
    Metadata {
        kind: MetadataErrorKind,
        message: String,
    },

    /// Unknown session id on a lifecycle operation
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Invalid input from user
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// Filesystem failure while materializing output artifacts
    #[error("Artifact error at {path:?}: {message}")]
    Artifact { path: PathBuf, message: String },

    /// Per-file failure during a watch-directory scan
    #[error("Ingest error for {path:?}: {message}")]
    Ingest { path: PathBuf, message: String },

    /// Engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Bencode parse error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input ended before the value did
    UnexpectedEof,
    /// Byte that does not begin any bencode value
    InvalidMarker,
    /// Non-numeric or oversized string length prefix
    BadLengthPrefix,
    /// Malformed integer payload (leading zero, negative zero, non-digits)
    BadInteger,
    /// Missing `e` terminator on an integer, list, or dict
    Unterminated,
    /// Dict key that is not a byte string
    NonStringKey,
    /// Nesting beyond the recursion bound
    DepthExceeded,
    /// Bytes left over after the top-level value
    TrailingData,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnexpectedEof => "unexpected end of input",
            Self::InvalidMarker => "invalid type marker",
            Self::BadLengthPrefix => "bad string length prefix",
            Self::BadInteger => "malformed integer",
            Self::Unterminated => "missing terminator",
            Self::NonStringKey => "dict key is not a byte string",
            Self::DepthExceeded => "nesting too deep",
            Self::TrailingData => "trailing data after value",
        };
        f.write_str(s)
    }
}

/// Metadata extraction error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    /// Top-level value is not a dict
    NotADict,
    /// Missing `info` key, or `info` is not a dict
    MissingInfoDict,
    /// Missing, non-integer, or non-positive `piece length`
    BadPieceLength,
    /// Missing `pieces`, or its length disagrees with the file sizes
    BadPieceTable,
    /// Single-file torrent without a `length`
    MissingLength,
    /// Malformed entry in the `files` list
    BadFileEntry,
}

impl EngineError {
    /// Create a parse error at the given byte offset
    pub fn parse(kind: ParseErrorKind, offset: usize) -> Self {
        Self::Parse { kind, offset }
    }

    /// Create a metadata error
    pub fn metadata(kind: MetadataErrorKind, message: impl Into<String>) -> Self {
        Self::Metadata {
            kind,
            message: message.into(),
        }
    }

    /// Create an artifact error
    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an ingest error
    pub fn ingest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Ingest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Artifact {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_reports_offset() {
        let err = EngineError::parse(ParseErrorKind::UnexpectedEof, 17);
        assert_eq!(
            err.to_string(),
            "Bencode parse error at byte 17: unexpected end of input"
        );
    }

    #[test]
    fn test_metadata_error_keeps_kind() {
        let err = EngineError::metadata(MetadataErrorKind::BadPieceTable, "length 25");
        match err {
            EngineError::Metadata { kind, .. } => {
                assert_eq!(kind, MetadataErrorKind::BadPieceTable)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

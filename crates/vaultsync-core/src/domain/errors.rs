//! Domain error types
//!
//! Validation failures raised when constructing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid vault-relative path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid content hash (expected lowercase SHA-256 hex)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid remote file identifier
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid page token
    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    /// A record violated its own invariants
    #[error("Invalid record for {path}: {reason}")]
    InvalidRecord {
        /// Path of the offending record
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Unknown enum value read back from storage
    #[error("Unknown {kind}: {value}")]
    UnknownVariant {
        /// The enum being parsed
        kind: &'static str,
        /// The unrecognized value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("../escape.md".to_string());
        assert_eq!(err.to_string(), "Invalid path: ../escape.md");

        let err = DomainError::UnknownVariant {
            kind: "record status",
            value: "frozen".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown record status: frozen");
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidHash("xyz".to_string());
        let err2 = DomainError::InvalidHash("xyz".to_string());
        let err3 = DomainError::InvalidHash("abc".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}

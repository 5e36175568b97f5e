//! Reason codes for ledger entries
//!
//! Stable identifiers prefixed to the `error` field of failure entries so
//! the CLI and tests can classify them without parsing free text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a file-level operation did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Transient failures persisted past the retry ceiling
    RetriesExhausted,
    /// The remote rejected the request (4xx) and it will not be retried
    PermanentRejection,
    /// The remote store is out of space
    QuotaExceeded,
    /// Conflict markers in the file could not be parsed
    MalformedMarkers,
    /// Both sides changed and the file still needs manual attention
    UnresolvedConflict,
    /// The access token was rejected even after a forced refresh
    AuthRequired,
    /// The remote file no longer exists
    RemoteMissing,
    /// Reading or writing the local file failed
    LocalIo,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RetriesExhausted => "retries_exhausted",
            ReasonCode::PermanentRejection => "permanent_rejection",
            ReasonCode::QuotaExceeded => "quota_exceeded",
            ReasonCode::MalformedMarkers => "malformed_markers",
            ReasonCode::UnresolvedConflict => "unresolved_conflict",
            ReasonCode::AuthRequired => "auth_required",
            ReasonCode::RemoteMissing => "remote_missing",
            ReasonCode::LocalIo => "local_io",
        }
    }

    /// Format an error message as `code: message`
    pub fn annotate(&self, message: impl fmt::Display) -> String {
        format!("{}: {}", self.as_str(), message)
    }

    /// Recover the code from an annotated error message
    pub fn from_annotated(error: &str) -> Option<Self> {
        let code = error.split(':').next()?.trim();
        serde_json::from_value(serde_json::Value::String(code.to_string())).ok()
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_display_matches_serde() {
        for code in [
            ReasonCode::RetriesExhausted,
            ReasonCode::PermanentRejection,
            ReasonCode::QuotaExceeded,
            ReasonCode::MalformedMarkers,
            ReasonCode::UnresolvedConflict,
            ReasonCode::AuthRequired,
            ReasonCode::RemoteMissing,
            ReasonCode::LocalIo,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code));
        }
    }

    #[test]
    fn annotate_roundtrip() {
        let msg = ReasonCode::RetriesExhausted.annotate("server error 503 after 5 attempts");
        assert_eq!(msg, "retries_exhausted: server error 503 after 5 attempts");
        assert_eq!(
            ReasonCode::from_annotated(&msg),
            Some(ReasonCode::RetriesExhausted)
        );
        assert_eq!(ReasonCode::from_annotated("plain failure"), None);
    }
}

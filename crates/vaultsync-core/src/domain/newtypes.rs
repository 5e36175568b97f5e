//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for paths, identifiers and hashes. Each newtype
//! validates its input at construction time, so the rest of the engine can
//! rely on the invariants without re-checking.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::DomainError;

// ============================================================================
// VaultPath
// ============================================================================

/// A normalized, vault-relative file path
///
/// Always uses `/` as the separator, never starts or ends with a separator,
/// and never contains empty, `.` or `..` components. Two spellings of the
/// same file (`notes\a.md`, `./notes/a.md`) normalize to the same value, so
/// a `VaultPath` can be used directly as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultPath(String);

impl VaultPath {
    /// Create a new VaultPath, normalizing separators
    ///
    /// # Errors
    /// Returns error if the path is empty, escapes the vault, or contains NUL
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let raw: String = path.into();
        if raw.contains('\0') {
            return Err(DomainError::InvalidPath(format!(
                "path contains NUL byte: {raw:?}"
            )));
        }

        let unified = raw.replace('\\', "/");
        let mut parts: Vec<&str> = Vec::new();
        for part in unified.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "path escapes the vault: {raw}"
                    )))
                }
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Err(DomainError::InvalidPath(format!("empty path: {raw:?}")));
        }

        Ok(Self(parts.join("/")))
    }

    /// Build a VaultPath from an absolute local path under `root`
    ///
    /// # Errors
    /// Returns error if `path` is not inside `root`
    pub fn from_local(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not inside {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::InvalidPath(format!(
                        "unsupported component in {}",
                        path.display()
                    )))
                }
            }
        }
        Self::new(parts.join("/"))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path against a local vault root
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        self.components().fold(root.to_path_buf(), |acc, c| acc.join(c))
    }

    /// Iterate over the path components
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The final component of the path
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The file name without its extension
    #[must_use]
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos > 0 => &name[..pos],
            _ => name,
        }
    }

    /// Lowercased extension of the file name, without the dot
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos > 0 && pos + 1 < name.len() => {
                Some(name[pos + 1..].to_ascii_lowercase())
            }
            _ => None,
        }
    }

    /// Parent directory, or `None` for a top-level entry
    #[must_use]
    pub fn parent(&self) -> Option<VaultPath> {
        self.0
            .rfind('/')
            .map(|pos| VaultPath(self.0[..pos].to_string()))
    }

    /// Returns true if this path equals `dir` or lies underneath it
    ///
    /// Matching happens on component boundaries: `notes` contains
    /// `notes/a.md` but not `notes-old/a.md`.
    #[must_use]
    pub fn is_within(&self, dir: &str) -> bool {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return true;
        }
        self.0 == dir
            || (self.0.len() > dir.len()
                && self.0.starts_with(dir)
                && self.0.as_bytes()[dir.len()] == b'/')
    }

    /// Append a child component
    ///
    /// # Errors
    /// Returns error if the child is not a valid path fragment
    pub fn join(&self, child: &str) -> Result<VaultPath, DomainError> {
        Self::new(format!("{}/{}", self.0, child))
    }

    /// Replace the file name, keeping the parent directory
    ///
    /// # Errors
    /// Returns error if the new name is not a valid path fragment
    pub fn with_file_name(&self, name: &str) -> Result<VaultPath, DomainError> {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => Self::new(name),
        }
    }
}

impl Display for VaultPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VaultPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VaultPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<VaultPath> for String {
    fn from(path: VaultPath) -> Self {
        path.0
    }
}

// ============================================================================
// RemoteId
// ============================================================================

/// Identifier of a file or folder in the remote store
///
/// Ordered lexicographically; the order is used as the final tie-break when
/// several remote files compete for the same canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace or `/`
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id: String = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }
        if id.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// SHA-256 digest of file content, as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    const HEX_LEN: usize = 64;

    /// Wrap an existing hex digest
    ///
    /// # Errors
    /// Returns error if the digest is not 64 hex characters
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash: String = hash.into().to_ascii_lowercase();
        if hash.len() != Self::HEX_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "expected {} hex characters, got {hash:?}",
                Self::HEX_LEN
            )));
        }
        Ok(Self(hash))
    }

    /// Hash a byte slice
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut hex = String::with_capacity(Self::HEX_LEN);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// PageToken
// ============================================================================

/// Opaque cursor into the remote change feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageToken(String);

impl PageToken {
    /// Create a new PageToken
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token: String = token.into();
        if token.trim().is_empty() {
            return Err(DomainError::InvalidPageToken(
                "Page token cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PageToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PageToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PageToken> for String {
    fn from(token: PageToken) -> Self {
        token.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_path_normalizes_separators() {
        let a = VaultPath::new("./notes\\daily//a.md").unwrap();
        let b = VaultPath::new("/notes/daily/a.md/").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "notes/daily/a.md");
    }

    #[test]
    fn test_vault_path_rejects_escape_and_empty() {
        assert!(VaultPath::new("../secret.md").is_err());
        assert!(VaultPath::new("notes/../../x").is_err());
        assert!(VaultPath::new("").is_err());
        assert!(VaultPath::new("/").is_err());
    }

    #[test]
    fn test_vault_path_parts() {
        let p = VaultPath::new("notes/Archive.tar.GZ").unwrap();
        assert_eq!(p.file_name(), "Archive.tar.GZ");
        assert_eq!(p.file_stem(), "Archive.tar");
        assert_eq!(p.extension().as_deref(), Some("gz"));
        assert_eq!(p.parent().unwrap().as_str(), "notes");

        let dotfile = VaultPath::new(".gitignore").unwrap();
        assert_eq!(dotfile.extension(), None);
        assert!(dotfile.parent().is_none());
    }

    #[test]
    fn test_vault_path_is_within_component_boundary() {
        let p = VaultPath::new("notes/a.md").unwrap();
        assert!(p.is_within("notes"));
        assert!(p.is_within("notes/"));
        assert!(p.is_within("notes/a.md"));
        assert!(!p.is_within("note"));
        assert!(!VaultPath::new("notes-old/a.md").unwrap().is_within("notes"));
    }

    #[test]
    fn test_vault_path_local_roundtrip() {
        let root = Path::new("/vault");
        let p = VaultPath::new("a/b.md").unwrap();
        let local = p.to_local(root);
        assert_eq!(local, PathBuf::from("/vault/a/b.md"));
        assert_eq!(VaultPath::from_local(root, &local).unwrap(), p);
        assert!(VaultPath::from_local(root, Path::new("/elsewhere/b.md")).is_err());
    }

    #[test]
    fn test_vault_path_serde_validates() {
        let ok: VaultPath = serde_json::from_str("\"a\\\\b.md\"").unwrap();
        assert_eq!(ok.as_str(), "a/b.md");
        assert!(serde_json::from_str::<VaultPath>("\"../x\"").is_err());
    }

    #[test]
    fn test_remote_id_validation_and_order() {
        assert!(RemoteId::new("").is_err());
        assert!(RemoteId::new("has space").is_err());
        let a = RemoteId::new("file-001").unwrap();
        let b = RemoteId::new("file-002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_content_hash_of_bytes() {
        let h = ContentHash::of_bytes(b"");
        assert_eq!(
            h.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(h.short(), "e3b0c442");
        assert_eq!(ContentHash::new(h.as_str().to_uppercase()).unwrap(), h);
        assert!(ContentHash::new("abc").is_err());
    }

    #[test]
    fn test_page_token() {
        assert!(PageToken::new("  ").is_err());
        assert_eq!(PageToken::new("42").unwrap().as_str(), "42");
    }
}

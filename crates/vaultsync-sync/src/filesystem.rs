//! Local vault adapter (secondary/driven adapter)
//!
//! Implements [`ILocalStore`] on top of `tokio::fs`, resolving vault paths
//! against a root directory.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a hidden temp file in the target
//!   directory and is renamed over the target, so readers never see a
//!   partial file. The temp name is dot-prefixed and therefore never
//!   picked up by sync.
//! - **Streaming hash**: `content_hash` reads in fixed-size chunks instead
//!   of loading the whole file.
//! - **Symlinks** are skipped during listing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, trace};

use vaultsync_core::domain::{ContentHash, VaultPath};
use vaultsync_core::ports::{ILocalStore, LocalEntry};

const HASH_CHUNK: usize = 64 * 1024;
const TEMP_SUFFIX: &str = ".vaultsync.tmp";

/// [`ILocalStore`] backed by a directory on disk
#[derive(Debug, Clone)]
pub struct LocalVaultStore {
    root: PathBuf,
}

impl LocalVaultStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &VaultPath) -> PathBuf {
        path.to_local(&self.root)
    }

    fn temp_path(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}{TEMP_SUFFIX}"))
    }
}

fn modified_of(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[async_trait::async_trait]
impl ILocalStore for LocalVaultStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self) -> anyhow::Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to list {}", dir.display()))
                }
            };
            while let Some(entry) = reader.next_entry().await? {
                let file_type = entry.file_type().await?;
                let local = entry.path();
                if file_type.is_symlink() {
                    trace!(path = %local.display(), "Skipping symlink");
                } else if file_type.is_dir() {
                    dirs.push(local);
                } else if file_type.is_file() {
                    let metadata = entry.metadata().await?;
                    match VaultPath::from_local(&self.root, &local) {
                        Ok(path) => entries.push(LocalEntry {
                            path,
                            size: metadata.len(),
                            modified: modified_of(&metadata),
                        }),
                        Err(e) => debug!(path = %local.display(), error = %e, "Skipping unmappable path"),
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(files = entries.len(), "Vault listed");
        Ok(entries)
    }

    async fn stat(&self, path: &VaultPath) -> anyhow::Result<Option<LocalEntry>> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(m) if m.is_file() => Ok(Some(LocalEntry {
                path: path.clone(),
                size: m.len(),
                modified: modified_of(&m),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {path}")),
        }
    }

    async fn read(&self, path: &VaultPath) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(self.resolve(path))
            .await
            .with_context(|| format!("Failed to read {path}"))
    }

    #[instrument(skip(self, data), fields(path = %path, bytes = data.len()))]
    async fn write(&self, path: &VaultPath, data: &[u8]) -> anyhow::Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = Self::temp_path(&target);
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write temp file for {path}"))?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to move {path} into place"));
        }
        trace!("write complete");
        Ok(())
    }

    async fn mkdir(&self, path: &VaultPath) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .with_context(|| format!("Failed to create directory {path}"))
    }

    async fn remove(&self, path: &VaultPath) -> anyhow::Result<()> {
        let local = self.resolve(path);
        let result = match tokio::fs::metadata(&local).await {
            Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(&local).await,
            Ok(_) => tokio::fs::remove_file(&local).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {path}")),
        }
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &VaultPath, to: &VaultPath) -> anyhow::Result<()> {
        let target = self.resolve(to);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.resolve(from), &target)
            .await
            .with_context(|| format!("Failed to rename {from} to {to}"))
    }

    async fn content_hash(&self, path: &VaultPath) -> anyhow::Result<ContentHash> {
        let mut file = tokio::fs::File::open(self.resolve(path))
            .await
            .with_context(|| format!("Failed to open {path} for hashing"))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(ContentHash::new(hex(&hasher.finalize()))?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn p(s: &str) -> VaultPath {
        VaultPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let store = LocalVaultStore::new(dir.path());
        store.write(&p("a/b/note.md"), b"hello").await.unwrap();

        assert_eq!(store.read(&p("a/b/note.md")).await.unwrap(), b"hello");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("a/b"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["note.md".to_string()]);
    }

    #[tokio::test]
    async fn test_list_is_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        let store = LocalVaultStore::new(dir.path());
        store.write(&p("z.md"), b"1").await.unwrap();
        store.write(&p("notes/a.md"), b"22").await.unwrap();
        store.mkdir(&p("empty")).await.unwrap();

        let listed = store.list().await.unwrap();
        let paths: Vec<_> = listed.iter().map(|e| e.path.as_str().to_string()).collect();
        assert_eq!(paths, vec!["notes/a.md", "z.md"]);
        assert_eq!(listed[0].size, 2);
    }

    #[tokio::test]
    async fn test_stat_missing_and_directory() {
        let dir = TempDir::new().unwrap();
        let store = LocalVaultStore::new(dir.path());
        store.mkdir(&p("folder")).await.unwrap();
        assert!(store.stat(&p("missing.md")).await.unwrap().is_none());
        assert!(store.stat(&p("folder")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = LocalVaultStore::new(dir.path());
        store.remove(&p("nothing.md")).await.unwrap();
        store.write(&p("x.md"), b"x").await.unwrap();
        store.remove(&p("x.md")).await.unwrap();
        assert!(store.stat(&p("x.md")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_into_new_directory() {
        let dir = TempDir::new().unwrap();
        let store = LocalVaultStore::new(dir.path());
        store.write(&p("a.md"), b"x").await.unwrap();
        store.rename(&p("a.md"), &p("archive/a.md")).await.unwrap();
        assert!(store.stat(&p("a.md")).await.unwrap().is_none());
        assert_eq!(store.read(&p("archive/a.md")).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_content_hash_matches_in_memory_hash() {
        let dir = TempDir::new().unwrap();
        let store = LocalVaultStore::new(dir.path());
        let big = vec![7u8; HASH_CHUNK * 2 + 13];
        store.write(&p("big.bin"), &big).await.unwrap();
        assert_eq!(
            store.content_hash(&p("big.bin")).await.unwrap(),
            ContentHash::of_bytes(&big)
        );
    }
}

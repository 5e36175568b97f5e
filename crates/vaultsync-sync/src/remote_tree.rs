//! Mapping remote ids onto vault paths
//!
//! The remote store addresses items by id and parent id. The engine keeps a
//! folder map (vault directory → remote folder id) in the record store
//! metadata and resolves every file in a change batch through it.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use vaultsync_core::domain::{RemoteId, VaultPath};
use vaultsync_core::ports::RemoteFile;

use crate::record_store::SyncRecordStore;

/// A folder-level change observed in a change batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderChange {
    Added { path: String },
    Moved { from: String, to: String },
    Removed { path: String },
}

/// True if `path` is `dir` itself or lies underneath it
pub fn is_under(path: &str, dir: &str) -> bool {
    path == dir || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

fn child_path(parent: Option<&str>, name: &str) -> Option<VaultPath> {
    let raw = match parent {
        Some(dir) => format!("{dir}/{name}"),
        None => name.to_string(),
    };
    VaultPath::new(raw).ok()
}

/// Vault path of a remote item, if its parent is the root or a known folder
pub fn path_of(store: &SyncRecordStore, root: &RemoteId, file: &RemoteFile) -> Option<VaultPath> {
    let parent = file.parent_id.as_ref()?;
    if parent == root {
        return child_path(None, &file.name);
    }
    let dir = store.folder_path(parent)?;
    child_path(Some(dir), &file.name)
}

/// Parent folder id and file name to use when uploading `path`
///
/// Returns `None` for the parent when the directory has no known remote
/// folder yet.
pub fn placement<'a>(
    store: &SyncRecordStore,
    root: &RemoteId,
    path: &'a VaultPath,
) -> (Option<RemoteId>, &'a str) {
    let parent = match path.parent() {
        None => Some(root.clone()),
        Some(dir) => store.folder_id(dir.as_str()).cloned(),
    };
    (parent, path.file_name())
}

/// Rewrite every folder mapping under `from` to live under `to`
fn move_folder_subtree(store: &mut SyncRecordStore, from: &str, to: &str) {
    let moved: Vec<(String, RemoteId)> = store
        .meta()
        .folder_ids
        .iter()
        .filter(|(path, _)| is_under(path, from))
        .map(|(path, id)| (path.clone(), id.clone()))
        .collect();
    for (path, id) in moved {
        store.remove_folder_id(&path);
        let rebased = format!("{to}{}", &path[from.len()..]);
        store.set_folder_id(rebased, id);
    }
}

/// Fold the folders of a change batch into the folder map
///
/// Folders are resolved iteratively so a batch may list children before
/// their parents. Folders whose parent never resolves lie outside the vault
/// and are ignored.
pub fn apply_folder_changes(
    store: &mut SyncRecordStore,
    root: &RemoteId,
    files: &[RemoteFile],
) -> Vec<FolderChange> {
    let mut changes = Vec::new();

    for gone in files.iter().filter(|f| f.is_folder && f.is_gone()) {
        if let Some(path) = store.folder_path(&gone.id).map(str::to_string) {
            let dropped: Vec<String> = store
                .meta()
                .folder_ids
                .keys()
                .filter(|p| is_under(p, &path))
                .cloned()
                .collect();
            for p in dropped {
                store.remove_folder_id(&p);
            }
            changes.push(FolderChange::Removed { path });
        }
    }

    let mut pending: Vec<&RemoteFile> = files
        .iter()
        .filter(|f| f.is_folder && !f.is_gone())
        .collect();

    loop {
        let before = pending.len();
        pending.retain(|folder| {
            let Some(path) = path_of(store, root, folder) else {
                return true;
            };
            let path = path.as_str().to_string();
            match store.folder_path(&folder.id).map(str::to_string) {
                Some(old) if old == path => {}
                Some(old) => {
                    debug!(from = %old, to = %path, "Remote folder moved");
                    move_folder_subtree(store, &old, &path);
                    changes.push(FolderChange::Moved { from: old, to: path });
                }
                None => {
                    trace!(path = %path, id = %folder.id, "Remote folder registered");
                    store.set_folder_id(path.clone(), folder.id.clone());
                    changes.push(FolderChange::Added { path });
                }
            }
            false
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    for orphan in &pending {
        debug!(name = %orphan.name, id = %orphan.id, "Folder outside the vault tree ignored");
    }
    changes
}

/// A full remote listing resolved onto vault paths
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    /// Live files by path; more than one entry means duplicates
    pub files: BTreeMap<VaultPath, Vec<RemoteFile>>,
    /// Folder map rebuilt from scratch
    pub folders: BTreeMap<String, RemoteId>,
}

impl RemoteListing {
    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Resolve a full listing without consulting any stored folder map
pub fn index_listing(root: &RemoteId, items: Vec<RemoteFile>) -> RemoteListing {
    let mut listing = RemoteListing::default();
    let (folders, files): (Vec<_>, Vec<_>) = items
        .into_iter()
        .filter(|item| !item.is_gone())
        .partition(|item| item.is_folder);

    let dir_of = |folders: &BTreeMap<String, RemoteId>, parent: &RemoteId| -> Option<Option<String>> {
        if parent == root {
            return Some(None);
        }
        folders
            .iter()
            .find(|(_, id)| *id == parent)
            .map(|(path, _)| Some(path.clone()))
    };

    let mut pending = folders;
    loop {
        let before = pending.len();
        pending.retain(|folder| {
            let Some(parent) = folder.parent_id.as_ref() else {
                return false;
            };
            let Some(dir) = dir_of(&listing.folders, parent) else {
                return true;
            };
            if let Some(path) = child_path(dir.as_deref(), &folder.name) {
                listing.folders.insert(path.as_str().to_string(), folder.id.clone());
            }
            false
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    for file in files {
        let Some(parent) = file.parent_id.as_ref() else {
            continue;
        };
        let Some(dir) = dir_of(&listing.folders, parent) else {
            trace!(name = %file.name, "File outside the vault tree ignored");
            continue;
        };
        if let Some(path) = child_path(dir.as_deref(), &file.name) {
            listing.files.entry(path).or_default().push(file);
        }
    }
    listing
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use vaultsync_cache::{DatabasePool, SqliteStateRepository};

    use super::*;

    async fn store() -> (DatabasePool, SyncRecordStore) {
        let pool = DatabasePool::in_memory().await.unwrap();
        let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        (pool, SyncRecordStore::new(repo))
    }

    fn id(s: &str) -> RemoteId {
        RemoteId::new(s).unwrap()
    }

    fn item(file_id: &str, parent: &str, name: &str, folder: bool) -> RemoteFile {
        RemoteFile {
            id: id(file_id),
            name: name.to_string(),
            parent_id: Some(id(parent)),
            is_folder: folder,
            size: 0,
            modified: Utc::now(),
            content_hash: None,
            trashed: false,
            removed: false,
        }
    }

    #[test]
    fn test_is_under_respects_boundaries() {
        assert!(is_under("notes", "notes"));
        assert!(is_under("notes/a", "notes"));
        assert!(!is_under("notes-old/a", "notes"));
    }

    #[tokio::test]
    async fn test_children_listed_before_parents_resolve() {
        let (_pool, mut store) = store().await;
        let root = id("root");
        let batch = vec![
            item("f2", "f1", "deep", true),
            item("f1", "root", "notes", true),
            item("x", "elsewhere", "stray", true),
        ];
        let changes = apply_folder_changes(&mut store, &root, &batch);
        assert_eq!(changes.len(), 2);
        assert_eq!(store.folder_id("notes/deep"), Some(&id("f2")));

        let file = item("a", "f2", "a.md", false);
        assert_eq!(
            path_of(&store, &root, &file),
            Some(VaultPath::new("notes/deep/a.md").unwrap())
        );
        assert_eq!(path_of(&store, &root, &item("b", "elsewhere", "b.md", false)), None);
    }

    #[tokio::test]
    async fn test_moved_folder_rebases_subtree() {
        let (_pool, mut store) = store().await;
        let root = id("root");
        store.set_folder_id("notes", id("f1"));
        store.set_folder_id("notes/deep", id("f2"));

        let changes = apply_folder_changes(&mut store, &root, &[item("f1", "root", "archive", true)]);
        assert_eq!(
            changes,
            vec![FolderChange::Moved {
                from: "notes".into(),
                to: "archive".into()
            }]
        );
        assert_eq!(store.folder_id("archive/deep"), Some(&id("f2")));
        assert!(store.folder_id("notes/deep").is_none());
    }

    #[tokio::test]
    async fn test_trashed_folder_drops_subtree() {
        let (_pool, mut store) = store().await;
        store.set_folder_id("notes", id("f1"));
        store.set_folder_id("notes/deep", id("f2"));
        let mut gone = item("f1", "root", "notes", true);
        gone.trashed = true;

        let changes = apply_folder_changes(&mut store, &id("root"), &[gone]);
        assert_eq!(changes, vec![FolderChange::Removed { path: "notes".into() }]);
        assert!(store.meta().folder_ids.is_empty());
    }

    #[test]
    fn test_index_listing_groups_duplicates() {
        let root = id("root");
        let mut trashed = item("t", "root", "old.md", false);
        trashed.trashed = true;
        let listing = index_listing(
            &root,
            vec![
                item("a1", "f1", "a.md", false),
                item("f1", "root", "notes", true),
                item("a2", "f1", "a.md", false),
                item("b", "root", "b.md", false),
                trashed,
            ],
        );
        assert_eq!(listing.folders.get("notes"), Some(&id("f1")));
        assert_eq!(listing.files[&VaultPath::new("notes/a.md").unwrap()].len(), 2);
        assert_eq!(listing.file_count(), 3);
    }

    #[tokio::test]
    async fn test_placement_uses_root_for_top_level() {
        let (_pool, mut store) = store().await;
        let root = id("root");
        store.set_folder_id("notes", id("f1"));
        let top = VaultPath::new("a.md").unwrap();
        let nested = VaultPath::new("notes/b.md").unwrap();
        let unknown = VaultPath::new("new/c.md").unwrap();
        assert_eq!(placement(&store, &root, &top), (Some(root.clone()), "a.md"));
        assert_eq!(placement(&store, &root, &nested), (Some(id("f1")), "b.md"));
        assert_eq!(placement(&store, &root, &unknown), (None, "c.md"));
    }
}

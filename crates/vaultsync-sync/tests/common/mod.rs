//! Shared fakes for the sync engine integration tests
//!
//! `FakeRemote` is an in-memory remote store with a change feed, revision
//! history, quota and failure injection. The vault itself is a real
//! directory behind `LocalVaultStore`, and state lives in an in-memory
//! SQLite database.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use vaultsync_cache::{DatabasePool, SqliteStateRepository};
use vaultsync_core::config::{Config, ConfigBuilder};
use vaultsync_core::domain::{ContentHash, PageToken, RemoteId, VaultPath};
use vaultsync_core::ports::{
    ChangesPage, INotificationSink, IRemoteStore, IStateRepository, ITokenProvider, Notification,
    RateLimitSnapshot, RemoteError, RemoteFile, RemoteRevision, StorageQuota,
};
use vaultsync_sync::{EnginePorts, LocalVaultStore, SyncEngine};

pub const ROOT: &str = "root";
pub const GOOD_TOKEN: &str = "token-good";

pub fn p(path: &str) -> VaultPath {
    VaultPath::new(path).unwrap()
}

// ============================================================================
// FakeRemote
// ============================================================================

struct Item {
    file: RemoteFile,
    data: Vec<u8>,
    changed_at: u64,
    revisions: Vec<(RemoteRevision, Vec<u8>)>,
}

#[derive(Default)]
struct RemoteState {
    items: BTreeMap<String, Item>,
    next_id: u64,
    clock: u64,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    calls: HashMap<&'static str, usize>,
}

impl RemoteState {
    fn tick(&mut self) -> (u64, DateTime<Utc>) {
        self.clock += 1;
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(self.clock as i64);
        (self.clock, at)
    }

    fn fresh_id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId::new(format!("id-{:04}", self.next_id)).unwrap()
    }

    fn path_of(&self, item: &RemoteFile) -> Option<String> {
        let parent = item.parent_id.as_ref()?;
        if parent.as_str() == ROOT {
            return Some(item.name.clone());
        }
        let folder = self.items.get(parent.as_str())?;
        if folder.file.is_gone() {
            return None;
        }
        Some(format!("{}/{}", self.path_of(&folder.file)?, item.name))
    }

    fn find(&self, path: &str) -> Vec<&Item> {
        self.items
            .values()
            .filter(|i| !i.file.is_gone() && self.path_of(&i.file).as_deref() == Some(path))
            .collect()
    }

    fn ensure_folder(&mut self, dir: &str) -> RemoteId {
        let mut parent = RemoteId::new(ROOT).unwrap();
        let mut current = String::new();
        for name in dir.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(name);
            let existing = self
                .find(&current)
                .into_iter()
                .find(|i| i.file.is_folder)
                .map(|i| i.file.id.clone());
            parent = match existing {
                Some(id) => id,
                None => self.insert(&parent, name, Vec::new(), true),
            };
        }
        parent
    }

    fn insert(&mut self, parent: &RemoteId, name: &str, data: Vec<u8>, is_folder: bool) -> RemoteId {
        let id = self.fresh_id();
        let (seq, at) = self.tick();
        let mut item = Item {
            file: RemoteFile {
                id: id.clone(),
                name: name.to_string(),
                parent_id: Some(parent.clone()),
                is_folder,
                size: data.len() as u64,
                modified: at,
                content_hash: (!is_folder).then(|| ContentHash::of_bytes(&data)),
                trashed: false,
                removed: false,
            },
            data: Vec::new(),
            changed_at: seq,
            revisions: Vec::new(),
        };
        if !is_folder {
            Self::write(&mut item, data, seq, at);
        }
        self.items.insert(id.as_str().to_string(), item);
        id
    }

    fn write(item: &mut Item, data: Vec<u8>, seq: u64, at: DateTime<Utc>) {
        let hash = ContentHash::of_bytes(&data);
        item.revisions.push((
            RemoteRevision {
                id: format!("rev-{seq}"),
                modified: at,
                content_hash: Some(hash.clone()),
                keep_forever: false,
            },
            data.clone(),
        ));
        item.file.size = data.len() as u64;
        item.file.content_hash = Some(hash);
        item.file.modified = at;
        item.changed_at = seq;
        item.data = data;
    }
}

/// Runs inside the next listing, which then waits `settle` before answering
type ListHook = (Box<dyn FnOnce() + Send>, std::time::Duration);

/// In-memory remote store
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
    storage_full: AtomicBool,
    hide_hashes: AtomicBool,
    unauthorized: AtomicUsize,
    on_list: Mutex<Option<ListHook>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a file at `path` as another device would, with folders
    pub fn put(&self, path: &str, data: &[u8]) -> RemoteId {
        let mut state = self.state.lock().unwrap();
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, path),
        };
        let parent = match dir {
            Some(dir) => state.ensure_folder(dir),
            None => RemoteId::new(ROOT).unwrap(),
        };
        state.insert(&parent, name, data.to_vec(), false)
    }

    pub fn edit(&self, id: &RemoteId, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let (seq, at) = state.tick();
        let item = state.items.get_mut(id.as_str()).unwrap();
        RemoteState::write(item, data.to_vec(), seq, at);
    }

    pub fn remove(&self, id: &RemoteId) {
        let mut state = self.state.lock().unwrap();
        let (seq, _) = state.tick();
        let item = state.items.get_mut(id.as_str()).unwrap();
        item.file.trashed = true;
        item.changed_at = seq;
    }

    pub fn move_to(&self, id: &RemoteId, new_path: &str) {
        let mut state = self.state.lock().unwrap();
        let (dir, name) = match new_path.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, new_path),
        };
        let parent = match dir {
            Some(dir) => state.ensure_folder(dir),
            None => RemoteId::new(ROOT).unwrap(),
        };
        let (seq, _) = state.tick();
        let item = state.items.get_mut(id.as_str()).unwrap();
        item.file.name = name.to_string();
        item.file.parent_id = Some(parent);
        item.changed_at = seq;
    }

    /// Content of the single live file at `path`
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let found = state.find(path);
        found
            .iter()
            .find(|i| !i.file.is_folder)
            .map(|i| i.data.clone())
    }

    pub fn content_str(&self, path: &str) -> Option<String> {
        self.content(path).map(|d| String::from_utf8(d).unwrap())
    }

    /// Modification time of the single live file at `path`
    pub fn modified(&self, path: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap();
        let found = state.find(path);
        found
            .iter()
            .find(|i| !i.file.is_folder)
            .map(|i| i.file.modified)
    }

    pub fn ids_at(&self, path: &str) -> Vec<RemoteId> {
        let state = self.state.lock().unwrap();
        state
            .find(path)
            .into_iter()
            .filter(|i| !i.file.is_folder)
            .map(|i| i.file.id.clone())
            .collect()
    }

    pub fn live_file_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .items
            .values()
            .filter(|i| !i.file.is_folder && !i.file.is_gone())
            .count()
    }

    pub fn is_trashed(&self, id: &RemoteId) -> bool {
        let state = self.state.lock().unwrap();
        state.items.get(id.as_str()).is_some_and(|i| i.file.trashed)
    }

    /// Fail the next `times` calls of `operation` with `error`
    pub fn fail(&self, operation: &'static str, error: RemoteError, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.failures.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub fn calls(&self, operation: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(operation).copied().unwrap_or(0)
    }

    pub fn set_storage_full(&self, full: bool) {
        self.storage_full.store(full, Ordering::SeqCst);
    }

    /// Stop reporting content hashes in listings
    pub fn hide_hashes(&self) {
        self.hide_hashes.store(true, Ordering::SeqCst);
    }

    /// Run `hook` while the next `list_changed_files` call is in flight
    pub fn on_next_list(
        &self,
        hook: impl FnOnce() + Send + 'static,
        settle: std::time::Duration,
    ) {
        *self.on_list.lock().unwrap() = Some((Box::new(hook), settle));
    }

    pub fn unauthorized_count(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }

    fn enter(&self, operation: &'static str, token: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_default() += 1;
        if token != GOOD_TOKEN {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
            return Err(RemoteError::Unauthorized.into());
        }
        if let Some(err) = state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(err.into());
        }
        Ok(())
    }

    fn listed(&self, file: &RemoteFile) -> RemoteFile {
        let mut file = file.clone();
        if self.hide_hashes.load(Ordering::SeqCst) {
            file.content_hash = None;
        }
        file
    }

    fn not_found(id: &RemoteId) -> anyhow::Error {
        RemoteError::NotFound(id.to_string()).into()
    }
}

#[async_trait::async_trait]
impl IRemoteStore for FakeRemote {
    async fn list_changed_files(
        &self,
        access_token: &str,
        _root: &RemoteId,
        page_token: Option<&PageToken>,
    ) -> anyhow::Result<ChangesPage> {
        self.enter("list_changed_files", access_token)?;
        let hook = self.on_list.lock().unwrap().take();
        if let Some((hook, settle)) = hook {
            hook();
            tokio::time::sleep(settle).await;
        }
        let state = self.state.lock().unwrap();
        let since = page_token
            .and_then(|t| t.as_str().strip_prefix("cursor-"))
            .and_then(|n| n.parse::<u64>().ok());
        let files = state
            .items
            .values()
            .filter(|i| match since {
                None => !i.file.is_gone(),
                Some(since) => i.changed_at > since,
            })
            .map(|i| self.listed(&i.file))
            .collect();
        Ok(ChangesPage {
            files,
            next_page_token: Some(PageToken::new(format!("cursor-{}", state.clock)).unwrap()),
        })
    }

    async fn download_file(&self, access_token: &str, id: &RemoteId) -> anyhow::Result<Vec<u8>> {
        self.enter("download_file", access_token)?;
        let state = self.state.lock().unwrap();
        state
            .items
            .get(id.as_str())
            .filter(|i| !i.file.is_gone())
            .map(|i| i.data.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn download_revision(
        &self,
        access_token: &str,
        id: &RemoteId,
        revision_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        self.enter("download_revision", access_token)?;
        let state = self.state.lock().unwrap();
        state
            .items
            .get(id.as_str())
            .and_then(|i| i.revisions.iter().find(|(r, _)| r.id == revision_id))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn create_folder(
        &self,
        access_token: &str,
        parent_id: &RemoteId,
        name: &str,
    ) -> anyhow::Result<RemoteFile> {
        self.enter("create_folder", access_token)?;
        let mut state = self.state.lock().unwrap();
        let id = state.insert(parent_id, name, Vec::new(), true);
        Ok(state.items[id.as_str()].file.clone())
    }

    async fn create_file(
        &self,
        access_token: &str,
        parent_id: &RemoteId,
        name: &str,
        data: &[u8],
        _keep_forever: bool,
    ) -> anyhow::Result<RemoteFile> {
        self.enter("create_file", access_token)?;
        if self.storage_full.load(Ordering::SeqCst) {
            return Err(RemoteError::QuotaExceeded.into());
        }
        let mut state = self.state.lock().unwrap();
        let id = state.insert(parent_id, name, data.to_vec(), false);
        Ok(state.items[id.as_str()].file.clone())
    }

    async fn update_file(
        &self,
        access_token: &str,
        id: &RemoteId,
        data: &[u8],
        _keep_forever: bool,
    ) -> anyhow::Result<RemoteFile> {
        self.enter("update_file", access_token)?;
        if self.storage_full.load(Ordering::SeqCst) {
            return Err(RemoteError::QuotaExceeded.into());
        }
        let mut state = self.state.lock().unwrap();
        let (seq, at) = state.tick();
        let item = state
            .items
            .get_mut(id.as_str())
            .filter(|i| !i.file.is_gone())
            .ok_or_else(|| Self::not_found(id))?;
        RemoteState::write(item, data.to_vec(), seq, at);
        Ok(item.file.clone())
    }

    async fn trash_file(&self, access_token: &str, id: &RemoteId) -> anyhow::Result<()> {
        self.enter("trash_file", access_token)?;
        let mut state = self.state.lock().unwrap();
        let (seq, _) = state.tick();
        let item = state
            .items
            .get_mut(id.as_str())
            .filter(|i| !i.file.is_gone())
            .ok_or_else(|| Self::not_found(id))?;
        item.file.trashed = true;
        item.changed_at = seq;
        Ok(())
    }

    async fn rename_file(
        &self,
        access_token: &str,
        id: &RemoteId,
        new_name: &str,
        new_parent: Option<&RemoteId>,
    ) -> anyhow::Result<RemoteFile> {
        self.enter("rename_file", access_token)?;
        let mut state = self.state.lock().unwrap();
        let (seq, _) = state.tick();
        let item = state
            .items
            .get_mut(id.as_str())
            .filter(|i| !i.file.is_gone())
            .ok_or_else(|| Self::not_found(id))?;
        item.file.name = new_name.to_string();
        if let Some(parent) = new_parent {
            item.file.parent_id = Some(parent.clone());
        }
        item.changed_at = seq;
        Ok(item.file.clone())
    }

    async fn list_revisions(
        &self,
        access_token: &str,
        id: &RemoteId,
    ) -> anyhow::Result<Vec<RemoteRevision>> {
        self.enter("list_revisions", access_token)?;
        let state = self.state.lock().unwrap();
        state
            .items
            .get(id.as_str())
            .map(|i| i.revisions.iter().map(|(r, _)| r.clone()).collect())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn get_storage_quota(&self, access_token: &str) -> anyhow::Result<StorageQuota> {
        self.enter("get_storage_quota", access_token)?;
        let used = if self.storage_full.load(Ordering::SeqCst) {
            1_000
        } else {
            10
        };
        Ok(StorageQuota {
            used,
            limit: Some(1_000),
        })
    }

    fn get_rate_limit_snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot::default()
    }
}

// ============================================================================
// Tokens and notifications
// ============================================================================

/// Hands out `initial` until a refresh, then the good token
pub struct FakeTokens {
    current: Mutex<String>,
    refreshed_token: String,
    pub refreshes: AtomicUsize,
}

impl FakeTokens {
    pub fn good() -> Arc<Self> {
        Self::with(GOOD_TOKEN, GOOD_TOKEN)
    }

    /// Starts with an expired token that a refresh fixes
    pub fn expired() -> Arc<Self> {
        Self::with("token-expired", GOOD_TOKEN)
    }

    /// Never yields a token the remote accepts
    pub fn revoked() -> Arc<Self> {
        Self::with("token-expired", "token-revoked")
    }

    fn with(initial: &str, refreshed: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(initial.to_string()),
            refreshed_token: refreshed.to_string(),
            refreshes: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ITokenProvider for FakeTokens {
    async fn get_access_token(&self) -> anyhow::Result<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn refresh_after_unauthorized(&self) -> anyhow::Result<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        *current = self.refreshed_token.clone();
        Ok(current.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl INotificationSink for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub vault: TempDir,
    pub remote: Arc<FakeRemote>,
    pub tokens: Arc<FakeTokens>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: Arc<dyn IStateRepository>,
    pub config: Config,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_tokens(FakeTokens::good()).await
    }

    pub async fn with_tokens(tokens: Arc<FakeTokens>) -> Self {
        let vault = TempDir::new().unwrap();
        let pool = DatabasePool::in_memory().await.unwrap();
        let state: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let config = ConfigBuilder::new()
            .vault_root(vault.path().to_path_buf())
            .remote_folder_id(ROOT)
            .quiescence_ms(20)
            .retry(3, 1, 4)
            .build();
        Self {
            vault,
            remote: FakeRemote::new(),
            tokens,
            notifier: Arc::new(RecordingNotifier::default()),
            state,
            config,
        }
    }

    pub fn ports(&self) -> EnginePorts {
        EnginePorts {
            remote: self.remote.clone(),
            local: Arc::new(LocalVaultStore::new(self.vault.path())),
            tokens: self.tokens.clone(),
            state: self.state.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub async fn engine(&self) -> SyncEngine {
        SyncEngine::start(self.config.clone(), self.ports()).await.unwrap()
    }

    pub fn root(&self) -> &Path {
        self.vault.path()
    }

    pub fn write(&self, path: &str, content: &str) {
        self.write_bytes(path, content.as_bytes());
    }

    pub fn write_bytes(&self, path: &str, content: &[u8]) {
        let full = self.vault.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub fn read_bytes(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.vault.path().join(path)).ok()
    }

    /// Backdate or postdate a local file
    pub fn set_modified(&self, path: &str, at: DateTime<Utc>) {
        let file = std::fs::File::options()
            .write(true)
            .open(self.vault.path().join(path))
            .unwrap();
        file.set_modified(at.into()).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.vault.path().join(path)).ok()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.vault.path().join(path).exists()
    }

    pub fn delete(&self, path: &str) {
        std::fs::remove_file(self.vault.path().join(path)).unwrap();
    }

    /// Names of local files whose name contains `needle`
    pub fn files_containing(&self, needle: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut dirs = vec![self.vault.path().to_path_buf()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    dirs.push(path);
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.contains(needle) {
                        found.push(
                            path.strip_prefix(self.vault.path())
                                .unwrap()
                                .to_string_lossy()
                                .replace('\\', "/"),
                        );
                    }
                }
            }
        }
        found.sort();
        found
    }
}

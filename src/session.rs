//! Per-user shared state: where the settings directory lives on the host and
//! which notepad file belongs to which script.
//!
//! Both lookups are cached in memory and in the [`LocalStore`]. Each cache sits
//! behind an async mutex held for the whole resolution, so concurrent callers
//! wait for the one request in flight and then read its result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{DirectoryId, FileId, NotepadBackend};
use crate::error::{NotepadError, Result};
use crate::storage::LocalStore;

/// Name of the notepad directory that holds every script's settings.
pub const RESERVED_DIRECTORY_NAME: &str = "userscript-config";

/// Kept in the settings directory at all times; never mapped to a script.
pub const RESERVED_PLACEHOLDER_FILE: &str = "_placeholder";

/// Content of a freshly created settings file.
pub const EMPTY_RECORD: &str = "{}";

const DIRECTORY_CACHE_KEY: &str = "userscript-config-dir-id";
const FILE_INDEX_CACHE_KEY: &str = "userscript-config-file-ids";

/// Script name → notepad file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIndex(BTreeMap<String, FileId>);

impl FileIndex {
    pub fn get(&self, script: &str) -> Option<FileId> {
        self.0.get(script).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FileId)> {
        self.0.iter().map(|(name, id)| (name.as_str(), *id))
    }

    fn insert(&mut self, script: &str, id: FileId) {
        self.0.insert(script.to_string(), id);
    }
}

/// Handle on one user's settings storage. Clones share the same caches.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn NotepadBackend>,
    store: LocalStore,
    directory: Mutex<Option<DirectoryId>>,
    index: Mutex<Option<FileIndex>>,
}

impl Session {
    pub fn new(backend: Arc<dyn NotepadBackend>, store: LocalStore) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend,
                store,
                directory: Mutex::new(None),
                index: Mutex::new(None),
            }),
        }
    }

    pub fn backend(&self) -> &dyn NotepadBackend {
        self.inner.backend.as_ref()
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn user_id(&self) -> &str {
        self.inner.store.user_id()
    }

    // ── Directory ───────────────────────────────────────────────────────────

    /// The settings directory: memory, then local cache, then a lookup by
    /// name on the host, then creating it.
    pub async fn directory_id(&self) -> Result<DirectoryId> {
        let mut slot = self.inner.directory.lock().await;
        if let Some(id) = *slot {
            return Ok(id);
        }
        let id = self.resolve_directory().await?;
        *slot = Some(id);
        Ok(id)
    }

    async fn resolve_directory(&self) -> Result<DirectoryId> {
        let store = &self.inner.store;
        if let Some(id) = store.get_json::<DirectoryId>(DIRECTORY_CACHE_KEY) {
            tracing::debug!(user = store.user_id(), ?id, "settings directory from local cache");
            return Ok(id);
        }

        let listing = self.inner.backend.list_root().await?;
        let id = match listing
            .into_iter()
            .find(|d| d.name == RESERVED_DIRECTORY_NAME)
        {
            Some(dir) => dir.id,
            None => {
                tracing::info!(user = store.user_id(), "creating settings directory");
                self.inner
                    .backend
                    .create_directory(RESERVED_DIRECTORY_NAME)
                    .await?
            }
        };

        store.set_json(DIRECTORY_CACHE_KEY, &id)?;
        Ok(id)
    }

    /// Forget the directory id so the next access resolves it again.
    pub async fn invalidate_directory(&self) -> Result<()> {
        let mut slot = self.inner.directory.lock().await;
        *slot = None;
        self.inner.store.remove(DIRECTORY_CACHE_KEY)
    }

    // ── File index ──────────────────────────────────────────────────────────

    /// The script → file mapping: memory, then local cache, then the host's
    /// directory listing.
    pub async fn file_index(&self) -> Result<FileIndex> {
        let mut slot = self.inner.index.lock().await;
        Ok(self.ensure_index(&mut slot).await?.clone())
    }

    pub async fn invalidate_file_index(&self) -> Result<()> {
        let mut slot = self.inner.index.lock().await;
        *slot = None;
        self.inner.store.remove(FILE_INDEX_CACHE_KEY)
    }

    /// Drop both caches; everything is looked up from scratch next time.
    pub async fn forget_directory(&self) -> Result<()> {
        self.invalidate_directory().await?;
        self.invalidate_file_index().await
    }

    /// File holding `script`'s settings, created empty on first use.
    ///
    /// Runs with the index locked, so two callers asking for the same new
    /// script end up with the same file.
    pub async fn file_id(&self, script: &str) -> Result<FileId> {
        if script.is_empty() || script == RESERVED_PLACEHOLDER_FILE {
            return Err(NotepadError::Custom(format!(
                "'{script}' cannot be used as a script name"
            )));
        }

        let mut slot = self.inner.index.lock().await;
        if let Some(id) = self.ensure_index(&mut slot).await?.get(script) {
            return Ok(id);
        }

        let id = match self.create_entry(script).await {
            Err(NotepadError::DirectoryNotFound) => {
                tracing::warn!(script, "settings directory vanished, resolving again");
                self.invalidate_directory().await?;
                *slot = None;
                self.inner.store.remove(FILE_INDEX_CACHE_KEY)?;
                match self.ensure_index(&mut slot).await?.get(script) {
                    Some(id) => id,
                    None => self.create_entry(script).await?,
                }
            }
            other => other?,
        };

        let index = self.ensure_index(&mut slot).await?;
        index.insert(script, id);
        self.inner.store.set_json(FILE_INDEX_CACHE_KEY, &*index)?;
        Ok(id)
    }

    async fn create_entry(&self, script: &str) -> Result<FileId> {
        let dir = self.directory_id().await?;
        tracing::info!(script, ?dir, "creating settings file");
        self.inner
            .backend
            .create_file(dir, script, EMPTY_RECORD)
            .await
    }

    async fn ensure_index<'a>(&self, slot: &'a mut Option<FileIndex>) -> Result<&'a mut FileIndex> {
        let index = match slot.take() {
            Some(index) => index,
            None => self.load_index().await?,
        };
        Ok(slot.insert(index))
    }

    async fn load_index(&self) -> Result<FileIndex> {
        let store = &self.inner.store;
        if let Some(index) = store.get_json::<FileIndex>(FILE_INDEX_CACHE_KEY) {
            tracing::debug!(user = store.user_id(), files = index.len(), "file index from local cache");
            return Ok(index);
        }

        let index = match self.fetch_index().await {
            Err(NotepadError::DirectoryNotFound) => {
                tracing::warn!(user = store.user_id(), "settings directory vanished, resolving again");
                self.invalidate_directory().await?;
                self.fetch_index().await?
            }
            other => other?,
        };

        store.set_json(FILE_INDEX_CACHE_KEY, &index)?;
        Ok(index)
    }

    async fn fetch_index(&self) -> Result<FileIndex> {
        let dir = self.directory_id().await?;
        let listing = self.inner.backend.list_directory(dir).await?;

        let mut index = FileIndex::default();
        let mut has_placeholder = false;
        for entry in listing {
            if entry.name == RESERVED_PLACEHOLDER_FILE {
                has_placeholder = true;
                continue;
            }
            // First listed file wins when a name shows up twice.
            index.0.entry(entry.name).or_insert(entry.id);
        }

        if !has_placeholder {
            self.inner
                .backend
                .create_file(dir, RESERVED_PLACEHOLDER_FILE, "")
                .await?;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn session(dir: &tempfile::TempDir, backend: &Arc<MemoryBackend>) -> Session {
        let store = LocalStore::open(dir.path(), "1001").unwrap();
        Session::new(backend.clone(), store)
    }

    #[tokio::test]
    async fn test_directory_created_once_and_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());

        let first = session(&tmp, &backend).directory_id().await.unwrap();
        assert_eq!(backend.directories_named(RESERVED_DIRECTORY_NAME), vec![first]);
        let served = backend.requests();

        // A new session for the same user reads the id from local cache.
        let second = session(&tmp, &backend).directory_id().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.requests(), served);
    }

    #[tokio::test]
    async fn test_existing_directory_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        backend.create_directory("unrelated").await.unwrap();
        let existing = backend
            .create_directory(RESERVED_DIRECTORY_NAME)
            .await
            .unwrap();

        let id = session(&tmp, &backend).directory_id().await.unwrap();
        assert_eq!(id, existing);
        assert_eq!(backend.directories_named(RESERVED_DIRECTORY_NAME).len(), 1);
    }

    #[tokio::test]
    async fn test_index_skips_placeholder_and_creates_it() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let dir = backend
            .create_directory(RESERVED_DIRECTORY_NAME)
            .await
            .unwrap();
        let history = backend.create_file(dir, "nice-history", "{}").await.unwrap();

        let index = session(&tmp, &backend).file_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("nice-history"), Some(history));
        assert_eq!(index.get(RESERVED_PLACEHOLDER_FILE), None);
        assert_eq!(backend.files_named(RESERVED_PLACEHOLDER_FILE).len(), 1);
    }

    #[tokio::test]
    async fn test_index_recovers_from_deleted_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let old = session(&tmp, &backend).directory_id().await.unwrap();
        backend.delete_directory(old);

        // Fresh session: the stale id comes from local cache and the listing fails once.
        let s = session(&tmp, &backend);
        let index = s.file_index().await.unwrap();
        assert!(index.is_empty());

        let new = s.directory_id().await.unwrap();
        assert_ne!(old, new);
        assert_eq!(backend.directories_named(RESERVED_DIRECTORY_NAME), vec![new]);
    }

    #[tokio::test]
    async fn test_file_id_recovers_when_directory_deleted_under_cached_index() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let s = session(&tmp, &backend);
        s.file_index().await.unwrap();
        let old = s.directory_id().await.unwrap();
        backend.delete_directory(old);

        let id = s.file_id("ot-revealer").await.unwrap();
        let new = s.directory_id().await.unwrap();
        assert_ne!(old, new);
        assert_eq!(backend.files_named("ot-revealer"), vec![(new, id)]);
    }

    #[tokio::test]
    async fn test_concurrent_file_id_creates_one_file() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let s = session(&tmp, &backend);

        let (a, b) = tokio::join!(s.file_id("eggs"), s.file_id("eggs"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(backend.files_named("eggs").len(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next("maintenance");

        let err = session(&tmp, &backend).file_index().await.unwrap_err();
        assert!(matches!(err, NotepadError::Remote(ref r) if r == "maintenance"));
    }

    #[tokio::test]
    async fn test_reserved_names_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let s = session(&tmp, &backend);
        assert!(s.file_id("").await.is_err());
        assert!(s.file_id(RESERVED_PLACEHOLDER_FILE).await.is_err());
        assert_eq!(backend.requests(), 0);
    }
}

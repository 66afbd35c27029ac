use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

const STORE_FILE: &str = "local-storage.json";

/// Serialises read-modify-write cycles between handles in this process.
static FILE_LOCK: Mutex<()> = Mutex::new(());

/// Persistent string key/value storage shared by every user on this machine.
///
/// Keys are namespaced per user as `"<user>.<key>"`, the same way the host
/// page's localStorage is partitioned. Nothing is held in memory: reads go to
/// the backing file, and writes re-read it and change only their own key, so
/// separate handles (or processes) never drop each other's entries.
#[derive(Clone, Debug)]
pub struct LocalStore {
    path: Arc<PathBuf>,
    user_id: String,
}

impl LocalStore {
    /// Open (or start) the store kept in `dir`, scoped to `user_id`.
    pub fn open(dir: impl AsRef<Path>, user_id: impl Into<String>) -> Result<Self> {
        let path = dir.as_ref().join(STORE_FILE);
        read_entries(&path)?;
        Ok(Self {
            path: Arc::new(path),
            user_id: user_id.into(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Same backing file, different user namespace.
    pub fn for_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            path: Arc::clone(&self.path),
            user_id: user_id.into(),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}.{}", self.user_id, key)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let _guard = lock();
        match read_entries(&self.path) {
            Ok(mut entries) => entries.remove(&self.scoped(key)),
            Err(e) => {
                tracing::warn!(key, "local storage unreadable: {e}");
                None
            }
        }
    }

    /// Read and decode a JSON value. A value that no longer decodes is treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, "ignoring malformed cached value: {e}");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<()> {
        let _guard = lock();
        let mut entries = read_entries(&self.path)?;
        entries.insert(self.scoped(key), value.into());
        write_entries(&self.path, &entries)
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let _guard = lock();
        let mut entries = read_entries(&self.path)?;
        if entries.remove(&self.scoped(key)).is_some() {
            write_entries(&self.path, &entries)?;
        }
        Ok(())
    }
}

fn lock() -> MutexGuard<'static, ()> {
    FILE_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                tracing::warn!("discarding unreadable {}: {e}", path.display());
                Ok(BTreeMap::new())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling file and rename over the original, so readers never see half a file.
fn write_entries(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    let staging = path.with_extension(format!("json.{}.tmp", std::process::id()));
    std::fs::write(&staging, json)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

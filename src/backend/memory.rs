use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{DirEntry, DirectoryId, FileEntry, FileId, NotepadBackend};
use crate::error::{NotepadError, Result};

/// In-process notepad host. Used for dry runs and tests; supports deleting
/// things behind the client's back and injecting failures.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    requests: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    dirs: BTreeMap<u64, Dir>,
    fail_next: Option<String>,
}

#[derive(Debug)]
struct Dir {
    name: String,
    files: BTreeMap<u64, File>,
}

#[derive(Debug)]
struct File {
    name: String,
    content: String,
}

impl State {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn dir_mut(&mut self, dir: DirectoryId) -> Result<&mut Dir> {
        self.dirs
            .get_mut(&dir.0)
            .ok_or(NotepadError::DirectoryNotFound)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests served so far, failed ones included.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Make the next request fail with `reason`, as the host would report it.
    pub fn fail_next(&self, reason: &str) {
        self.lock().fail_next = Some(reason.to_string());
    }

    pub fn delete_directory(&self, dir: DirectoryId) -> bool {
        self.lock().dirs.remove(&dir.0).is_some()
    }

    pub fn delete_file(&self, dir: DirectoryId, file: FileId) -> bool {
        self.lock()
            .dirs
            .get_mut(&dir.0)
            .map(|d| d.files.remove(&file.0).is_some())
            .unwrap_or(false)
    }

    pub fn directories_named(&self, name: &str) -> Vec<DirectoryId> {
        self.lock()
            .dirs
            .iter()
            .filter(|(_, d)| d.name == name)
            .map(|(id, _)| DirectoryId(*id))
            .collect()
    }

    /// Every `(directory, file)` pair holding a file called `name`.
    pub fn files_named(&self, name: &str) -> Vec<(DirectoryId, FileId)> {
        self.lock()
            .dirs
            .iter()
            .flat_map(|(dir_id, d)| {
                d.files
                    .iter()
                    .filter(|(_, f)| f.name == name)
                    .map(move |(file_id, _)| (DirectoryId(*dir_id), FileId(*file_id)))
            })
            .collect()
    }

    pub fn content(&self, dir: DirectoryId, file: FileId) -> Option<String> {
        self.lock()
            .dirs
            .get(&dir.0)
            .and_then(|d| d.files.get(&file.0))
            .map(|f| f.content.clone())
    }

    /// Overwrite a file as if edited from another browser.
    pub fn put_content(&self, dir: DirectoryId, file: FileId, content: &str) -> bool {
        match self
            .lock()
            .dirs
            .get_mut(&dir.0)
            .and_then(|d| d.files.get_mut(&file.0))
        {
            Some(f) => {
                f.content = content.to_string();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every request goes through here: count it, yield once so concurrent
    /// callers interleave, then honour any injected failure.
    async fn serve<T>(&self, op: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if let Some(reason) = state.fail_next.take() {
            return Err(NotepadError::from_reason(&reason));
        }
        op(&mut *state)
    }
}

impl NotepadBackend for MemoryBackend {
    fn list_root(&self) -> BoxFuture<'_, Result<Vec<DirEntry>>> {
        self.serve(|state| {
            Ok(state
                .dirs
                .iter()
                .map(|(id, d)| DirEntry {
                    id: DirectoryId(*id),
                    name: d.name.clone(),
                })
                .collect())
        })
        .boxed()
    }

    fn create_directory<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<DirectoryId>> {
        self.serve(move |state| {
            let id = state.alloc();
            state.dirs.insert(
                id,
                Dir {
                    name: name.to_string(),
                    files: BTreeMap::new(),
                },
            );
            Ok(DirectoryId(id))
        })
        .boxed()
    }

    fn list_directory(&self, dir: DirectoryId) -> BoxFuture<'_, Result<Vec<FileEntry>>> {
        self.serve(move |state| {
            Ok(state
                .dir_mut(dir)?
                .files
                .iter()
                .map(|(id, f)| FileEntry {
                    id: FileId(*id),
                    name: f.name.clone(),
                })
                .collect())
        })
        .boxed()
    }

    fn create_file<'a>(
        &'a self,
        dir: DirectoryId,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<FileId>> {
        self.serve(move |state| {
            state.dir_mut(dir)?;
            let id = state.alloc();
            state.dir_mut(dir)?.files.insert(
                id,
                File {
                    name: name.to_string(),
                    content: content.to_string(),
                },
            );
            Ok(FileId(id))
        })
        .boxed()
    }

    fn read_file(&self, dir: DirectoryId, file: FileId) -> BoxFuture<'_, Result<String>> {
        self.serve(move |state| {
            state
                .dir_mut(dir)?
                .files
                .get(&file.0)
                .map(|f| f.content.clone())
                .ok_or(NotepadError::FileNotFound)
        })
        .boxed()
    }

    fn save_file<'a>(
        &'a self,
        dir: DirectoryId,
        file: FileId,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.serve(move |state| {
            let f = state
                .dir_mut(dir)?
                .files
                .get_mut(&file.0)
                .ok_or(NotepadError::FileNotFound)?;
            f.name = name.to_string();
            f.content = content.to_string();
            Ok(())
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vanished_directory_and_file() {
        let backend = MemoryBackend::new();
        let dir = backend.create_directory("cfg").await.unwrap();
        let file = backend.create_file(dir, "a", "{}").await.unwrap();
        assert_eq!(backend.read_file(dir, file).await.unwrap(), "{}");

        assert!(backend.delete_file(dir, file));
        assert!(matches!(
            backend.read_file(dir, file).await,
            Err(NotepadError::FileNotFound)
        ));

        assert!(backend.delete_directory(dir));
        assert!(matches!(
            backend.list_directory(dir).await,
            Err(NotepadError::DirectoryNotFound)
        ));
        assert_eq!(backend.requests(), 5);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next("server busy");
        let err = backend.list_root().await.unwrap_err();
        assert_eq!(err.to_string(), "server busy");
        assert!(backend.list_root().await.unwrap().is_empty());
    }
}

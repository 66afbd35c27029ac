pub mod ajax;
pub mod memory;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use ajax::AjaxBackend;
pub use memory::MemoryBackend;

/// Identifier of a notepad directory on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryId(pub u64);

/// Identifier of a notepad file on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub id: DirectoryId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    pub name: String,
}

/// The host site's notepad feature, treated as a black box.
///
/// Implementations report the host's "directory not found" and
/// "file not found" reasons as [`NotepadError::DirectoryNotFound`] and
/// [`NotepadError::FileNotFound`]; everything else is passed through.
///
/// [`NotepadError::DirectoryNotFound`]: crate::error::NotepadError::DirectoryNotFound
/// [`NotepadError::FileNotFound`]: crate::error::NotepadError::FileNotFound
pub trait NotepadBackend: Send + Sync {
    /// Directories at the top level of the user's notepad.
    fn list_root(&self) -> BoxFuture<'_, Result<Vec<DirEntry>>>;

    fn create_directory<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<DirectoryId>>;

    fn list_directory(&self, dir: DirectoryId) -> BoxFuture<'_, Result<Vec<FileEntry>>>;

    fn create_file<'a>(
        &'a self,
        dir: DirectoryId,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<FileId>>;

    fn read_file(&self, dir: DirectoryId, file: FileId) -> BoxFuture<'_, Result<String>>;

    fn save_file<'a>(
        &'a self,
        dir: DirectoryId,
        file: FileId,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

//! Per-script settings kept in a host site's notepad files, with a local
//! cache in front of every remote round trip.

pub mod api;
pub mod backend;
pub mod error;
pub mod record;
pub mod session;
pub mod settings;
pub mod storage;
pub mod util;

pub use backend::{AjaxBackend, DirectoryId, FileId, MemoryBackend, NotepadBackend};
pub use error::{NotepadError, Result};
pub use record::{ConfigRecord, Record};
pub use session::{FileIndex, Session};
pub use settings::Settings;
pub use storage::LocalStore;

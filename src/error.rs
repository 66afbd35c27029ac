/// All errors that can occur while resolving, loading or saving settings.
#[derive(Debug, thiserror::Error)]
pub enum NotepadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The host reported that the storage directory no longer exists.
    #[error("directory not found")]
    DirectoryNotFound,

    /// The host reported that a settings file no longer exists.
    #[error("file not found")]
    FileNotFound,

    /// `get`/`set` called before the record finished loading.
    #[error("config record for '{0}' is not loaded yet")]
    NotReady(String),

    /// Any other failure reason reported by the host, passed through as-is.
    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    Custom(String),
}

impl NotepadError {
    /// Map a host failure reason onto the two recoverable cases.
    pub fn from_reason(reason: &str) -> Self {
        match reason.trim().to_ascii_lowercase().as_str() {
            "directory not found" => NotepadError::DirectoryNotFound,
            "file not found" => NotepadError::FileNotFound,
            _ => NotepadError::Remote(reason.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, NotepadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        assert!(matches!(
            NotepadError::from_reason("directory not found"),
            NotepadError::DirectoryNotFound
        ));
        assert!(matches!(
            NotepadError::from_reason("File not found "),
            NotepadError::FileNotFound
        ));
        match NotepadError::from_reason("quota exceeded") {
            NotepadError::Remote(r) => assert_eq!(r, "quota exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

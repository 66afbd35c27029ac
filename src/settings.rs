use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NotepadError, Result};
use crate::util::expand_home;

/// Contents of `~/.notecfg/config.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: u32,
    /// Host site root, e.g. `https://example.org`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Sent untouched as the `Cookie` header on notepad requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Where the local cache lives. Defaults to `~/.notecfg/cache`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,
}

pub fn settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".notecfg").join("config.json"))
}

impl Settings {
    /// Missing or unreadable settings fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::fresh(),
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("ignoring malformed {}: {e}", path.display());
                Self::fresh()
            }
        }
    }

    pub fn load() -> Self {
        settings_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_else(Self::fresh)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = settings_path()
            .ok_or_else(|| NotepadError::Custom("Cannot find home directory".into()))?;
        self.save_to(&path)
    }

    /// Resolved local cache directory.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match self.storage_dir {
            Some(ref dir) => Ok(expand_home(dir)),
            None => dirs::home_dir()
                .map(|h| h.join(".notecfg").join("cache"))
                .ok_or_else(|| NotepadError::Custom("Cannot find home directory".into())),
        }
    }

    fn fresh() -> Self {
        Self {
            version: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&tmp.path().join("nope.json"));
        assert_eq!(settings.version, 1);
        assert!(settings.host_url.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let settings = Settings {
            version: 1,
            host_url: Some("https://example.org".into()),
            user_id: Some("1001".into()),
            storage_dir: Some("/tmp/notecfg".into()),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"hostUrl\""));
        assert!(!raw.contains("apiKey"));

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.storage_dir().unwrap(), PathBuf::from("/tmp/notecfg"));
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert_eq!(Settings::load_from(&path).version, 1);
    }
}

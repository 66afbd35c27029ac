use std::path::PathBuf;

/// Expands a leading `~` against the home directory. Other paths are returned untouched.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/x"), PathBuf::from("/var/lib/x"));
        assert_eq!(expand_home("rel/dir"), PathBuf::from("rel/dir"));
    }

    #[test]
    fn test_expand_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.notecfg"), home.join(".notecfg"));
            assert_eq!(expand_home("~"), home);
        }
    }
}

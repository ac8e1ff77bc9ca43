use std::path::PathBuf;

/// Default root of the local package store.
///
/// Uses the platform cache location:
/// - Linux: `$XDG_CACHE_HOME/npmsync/store` or `~/.cache/npmsync/store`
/// - macOS: `~/Library/Caches/npmsync/store`
/// - Windows: `%LOCALAPPDATA%\npmsync\store`
#[must_use]
pub fn default_store_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".npmsync-cache"),
                |p| p.join(".cache").join("npmsync"),
            )
        },
        |p| p.join("npmsync"),
    );
    base.join("store")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_dir_named() {
        let dir = default_store_dir();
        assert!(dir.ends_with("store"));
        assert!(dir.to_string_lossy().contains("npmsync"));
    }
}

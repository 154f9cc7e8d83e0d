//! Process-wide filesystem paths.

use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::Result;

/// Filesystem layout shared by every component. Read-only after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    /// Where repository working trees are materialized.
    pub repos_path: PathBuf,

    /// Exclusive write domain of the index store.
    pub index_path: PathBuf,

    /// Generic cache directory.
    pub cache_path: PathBuf,

    /// Declared configuration file.
    pub config_path: PathBuf,
}

impl AppContext {
    /// Derive the layout from a single cache directory.
    #[must_use]
    pub fn from_cache_dir(cache_dir: impl AsRef<Path>, config_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_dir.as_ref().to_path_buf();
        Self {
            repos_path: cache_path.join("repos"),
            index_path: cache_path.join("index"),
            cache_path,
            config_path: config_path.into(),
        }
    }

    /// Create the repos and index directories.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the index directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.repos_path)?;
        std::fs::create_dir_all(&self.index_path)
            .map_err(|e| StorageError::unwritable(&self.index_path, e))?;
        Ok(())
    }

    /// Resolve a declared repository path against the repos directory.
    #[must_use]
    pub fn resolve_repo_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repos_path.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_cache_dir() {
        let ctx = AppContext::from_cache_dir("/var/cache/trigrep", "/etc/trigrep.json");
        assert_eq!(ctx.repos_path, PathBuf::from("/var/cache/trigrep/repos"));
        assert_eq!(ctx.index_path, PathBuf::from("/var/cache/trigrep/index"));
        assert_eq!(ctx.cache_path, PathBuf::from("/var/cache/trigrep"));
        assert_eq!(ctx.config_path, PathBuf::from("/etc/trigrep.json"));
    }

    #[test]
    fn test_resolve_repo_path() {
        let ctx = AppContext::from_cache_dir("/cache", "/config.json");
        assert_eq!(
            ctx.resolve_repo_path(Path::new("github.com/org/repo")),
            PathBuf::from("/cache/repos/github.com/org/repo")
        );
        assert_eq!(
            ctx.resolve_repo_path(Path::new("/src/local")),
            PathBuf::from("/src/local")
        );
    }

    #[test]
    fn test_ensure_dirs() {
        let tmp = TempDir::new().unwrap();
        let ctx = AppContext::from_cache_dir(tmp.path(), tmp.path().join("config.json"));
        ctx.ensure_dirs().unwrap();
        assert!(ctx.repos_path.is_dir());
        assert!(ctx.index_path.is_dir());
    }
}

//! Mapping from changed paths to owning repositories.

use std::path::{Component, Path, PathBuf};

/// Watched repository roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchRoots {
    roots: Vec<(PathBuf, String)>,
}

impl WatchRoots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root. Replaces any root previously registered for `id`.
    pub fn insert(&mut self, root: PathBuf, id: impl Into<String>) {
        let id = id.into();
        self.roots.retain(|(_, existing)| *existing != id);
        self.roots.push((root, id));
    }

    /// Remove the root of a repository, returning its path.
    pub fn remove(&mut self, id: &str) -> Option<PathBuf> {
        let pos = self.roots.iter().position(|(_, existing)| existing == id)?;
        Some(self.roots.swap_remove(pos).0)
    }

    /// Watched root of a repository.
    #[must_use]
    pub fn root_of(&self, id: &str) -> Option<&Path> {
        self.roots
            .iter()
            .find(|(_, existing)| existing == id)
            .map(|(root, _)| root.as_path())
    }

    /// Ids currently watched.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(|(_, id)| id.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Repository owning `path`, preferring the most specific root.
    ///
    /// Changes inside VCS metadata directories belong to no repository.
    #[must_use]
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        let (root, id) = self
            .roots
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())?;

        let relative = path.strip_prefix(root).ok()?;
        if relative.components().any(is_vcs_dir) {
            return None;
        }
        Some(id.as_str())
    }
}

fn is_vcs_dir(component: Component<'_>) -> bool {
    matches!(component, Component::Normal(name) if name == ".git" || name == ".hg" || name == ".svn")
}

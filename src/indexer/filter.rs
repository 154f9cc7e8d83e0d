//! Path exclusion and binary content detection.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::Result;

/// Number of leading bytes inspected for binary detection.
pub const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Directory names that hold VCS metadata rather than content.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Decides which paths under a repository root are enumerated.
#[derive(Debug, Clone)]
pub struct PathFilter {
    excluded: Option<Gitignore>,
    root: PathBuf,
}

impl PathFilter {
    /// Filter with no exclusion patterns.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            excluded: None,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Filter excluding gitignore-style patterns relative to `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is invalid.
    pub fn with_patterns(root: impl AsRef<Path>, patterns: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if patterns.is_empty() {
            return Ok(Self::new(root));
        }

        let mut builder = GitignoreBuilder::new(&root);
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| crate::Error::config(format!("invalid excluded path: {e}")))?;
        }

        let excluded = builder
            .build()
            .map_err(|e| crate::Error::config(format!("failed to build exclusions: {e}")))?;

        Ok(Self {
            excluded: Some(excluded),
            root,
        })
    }

    /// Whether a path (file or directory) should be skipped entirely.
    #[must_use]
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if is_dir && Self::is_vcs_dir(path) {
            return true;
        }

        let Some(ref excluded) = self.excluded else {
            return false;
        };

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if relative.as_os_str().is_empty() {
            return false;
        }

        excluded
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    fn is_vcs_dir(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| VCS_DIRS.contains(&name))
    }
}

/// Whether content should be treated as binary.
///
/// Looks at the first [`BINARY_SNIFF_LEN`] bytes: a NUL byte or an invalid
/// UTF-8 sequence marks the file binary. A multi-byte character cut off by
/// the sniff window is not counted against it.
#[must_use]
pub fn looks_binary(content: &[u8]) -> bool {
    let head = &content[..content.len().min(BINARY_SNIFF_LEN)];

    if head.contains(&0) {
        return true;
    }

    match std::str::from_utf8(head) {
        Ok(_) => false,
        Err(e) => e.error_len().is_some(),
    }
}

/// Path relative to `root` joined with `/`, independent of platform.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

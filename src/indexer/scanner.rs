//! Repository tree enumeration.
//!
//! Walks a repository root in a deterministic order, pruning excluded
//! directories and VCS metadata. No gitignore rules are applied: the only
//! exclusions are the ones declared for the repository.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ignore::WalkBuilder;

use super::filter::{relative_path, PathFilter};

/// Scan statistics.
#[derive(Debug, Default)]
pub struct ScanStats {
    pub files_found: AtomicU64,
    pub files_excluded: AtomicU64,
    pub errors: AtomicU64,
}

impl ScanStats {
    /// Get a snapshot of current stats.
    #[must_use]
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            files_found: self.files_found.load(Ordering::Relaxed),
            files_excluded: self.files_excluded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scan stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatsSnapshot {
    pub files_found: u64,
    pub files_excluded: u64,
    pub errors: u64,
}

/// A regular file discovered under a repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated.
    pub relative: String,
    /// Size in bytes at scan time.
    pub size: u64,
}

/// A file or directory the walk could not read.
///
/// For a directory, nothing beneath it was enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableEntry {
    /// Path relative to the root, `/`-separated.
    pub relative: String,
    pub error: String,
}

/// Everything one walk of a repository found.
#[derive(Debug, Clone, Default)]
pub struct RepositoryScan {
    /// Regular files, sorted by relative path.
    pub files: Vec<ScannedFile>,
    /// Entries that could not be read, sorted by relative path.
    pub unreadable: Vec<UnreadableEntry>,
    pub stats: ScanStatsSnapshot,
}

/// Enumerate the regular files under `root`, sorted by relative path.
///
/// Symlinks are not followed. Walk errors on individual entries never abort
/// the scan; they are returned as [`UnreadableEntry`] values.
pub fn scan_repository(root: &Path, filter: &PathFilter) -> RepositoryScan {
    let stats = Arc::new(ScanStats::default());

    tracing::debug!(path = %root.display(), "Starting repository scan");

    let prune = filter.clone();
    let prune_stats = Arc::clone(&stats);
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            let excluded = entry.depth() > 0 && prune.is_excluded(entry.path(), is_dir);
            if excluded && !is_dir {
                prune_stats.files_excluded.fetch_add(1, Ordering::Relaxed);
            }
            !excluded
        })
        .build();

    let mut files = Vec::new();
    let mut unreadable = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }

                stats.files_found.fetch_add(1, Ordering::Relaxed);

                let size = match entry.metadata() {
                    Ok(metadata) => metadata.len(),
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e, "Cannot stat file");
                        stats.errors.fetch_add(1, Ordering::Relaxed);
                        unreadable.push(UnreadableEntry {
                            relative: relative_path(root, entry.path()),
                            error: e.to_string(),
                        });
                        continue;
                    }
                };

                files.push(ScannedFile {
                    relative: relative_path(root, entry.path()),
                    path: entry.into_path(),
                    size,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error walking repository");
                stats.errors.fetch_add(1, Ordering::Relaxed);
                let path = error_path(&e).unwrap_or(root);
                unreadable.push(UnreadableEntry {
                    relative: relative_path(root, path),
                    error: e.to_string(),
                });
            }
        }
    }

    // Walk order is per-directory; the postings need a global path order.
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    unreadable.sort_by(|a, b| a.relative.cmp(&b.relative));

    let snapshot = stats.snapshot();
    tracing::debug!(
        path = %root.display(),
        found = snapshot.files_found,
        excluded = snapshot.files_excluded,
        errors = snapshot.errors,
        "Repository scan complete"
    );

    RepositoryScan {
        files,
        unreadable,
        stats: snapshot,
    }
}

/// Path a walk error refers to, if it carries one.
fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::Loop { child, .. } => Some(child),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Partial(errs) => errs.iter().find_map(error_path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_sorted_and_skips_git() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "aa").unwrap();
        fs::write(root.join("src/nested/deep.rs"), "fn deep() {}").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(root.join(".hidden"), "kept").unwrap();

        let scan = scan_repository(root, &PathFilter::new(root));
        let names: Vec<_> = scan.files.iter().map(|f| f.relative.as_str()).collect();

        assert_eq!(names, vec![".hidden", "a.txt", "b.txt", "src/nested/deep.rs"]);
        assert_eq!(scan.files[1].size, 2);
        assert_eq!(scan.stats.files_found, 4);
        assert_eq!(scan.stats.errors, 0);
        assert!(scan.unreadable.is_empty());
    }

    #[test]
    fn test_scan_applies_exclusions() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "module.exports = {};").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("trace.log"), "noise").unwrap();

        let patterns = vec!["node_modules/".to_string(), "*.log".to_string()];
        let filter = PathFilter::with_patterns(root, &patterns).unwrap();
        let scan = scan_repository(root, &filter);

        let names: Vec<_> = scan.files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["main.rs"]);
        assert_eq!(scan.stats.files_excluded, 1);
    }

    #[test]
    fn test_scan_ignores_gitignore_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join(".gitignore"), "*.txt\n").unwrap();
        fs::write(root.join("a.txt"), "abc").unwrap();

        let scan = scan_repository(root, &PathFilter::new(root));
        assert!(scan.files.iter().any(|f| f.relative == "a.txt"));
    }

    #[test]
    fn test_error_path_unwraps_nested_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ignore::Error::WithDepth {
            depth: 2,
            err: Box::new(ignore::Error::WithPath {
                path: PathBuf::from("/repo/private"),
                err: Box::new(ignore::Error::Io(io)),
            }),
        };
        assert_eq!(error_path(&err), Some(Path::new("/repo/private")));

        let bare = ignore::Error::Io(std::io::Error::other("x"));
        assert_eq!(error_path(&bare), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_reported() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("private")).unwrap();
        fs::write(root.join("private/secret.txt"), "hidden").unwrap();
        fs::write(root.join("open.txt"), "visible").unwrap();
        fs::set_permissions(root.join("private"), fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not apply to a privileged user.
        let denied = fs::read_dir(root.join("private")).is_err();
        let scan = scan_repository(root, &PathFilter::new(root));
        fs::set_permissions(root.join("private"), fs::Permissions::from_mode(0o755)).unwrap();
        if !denied {
            return;
        }

        let names: Vec<_> = scan.files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["open.txt"]);
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].relative, "private");
        assert_eq!(scan.stats.errors, 1);
    }
}

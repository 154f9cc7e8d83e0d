//! Repository declarations.
//!
//! A repository is either a git checkout or a plain local tree. The variant
//! decides which fields participate in staleness detection and how the
//! indexer filters paths.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Unique identifier within the registry.
    pub id: String,

    /// Display name. Defaults to the id when declared without one.
    #[serde(default)]
    pub name: String,

    /// Absolute path of the working tree.
    pub path: PathBuf,

    /// Whether the on-disk index lags behind the declaration.
    #[serde(default)]
    pub is_stale: bool,

    /// When the repository was last successfully indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fork: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,

    /// Variant-specific source description.
    #[serde(flatten)]
    pub source: VcsSource,
}

/// Variant-specific repository fields, tagged by `vcs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vcs", rename_all = "lowercase")]
pub enum VcsSource {
    /// Repository cloned from a git remote.
    Git(GitSource),
    /// Plain directory on the local filesystem.
    Local(LocalSource),
}

/// Fields specific to git repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub clone_url: String,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_config_metadata: Option<BTreeMap<String, String>>,
}

/// Fields specific to local repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSource {
    /// Gitignore-style patterns excluded from indexing.
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    /// Mark the repository stale when its tree changes.
    #[serde(default)]
    pub watch: bool,
}

impl Repository {
    /// Create a git repository declaration.
    #[must_use]
    pub fn git(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        clone_url: impl Into<String>,
    ) -> Self {
        Self::with_source(
            id,
            path,
            VcsSource::Git(GitSource {
                clone_url: clone_url.into(),
                ..GitSource::default()
            }),
        )
    }

    /// Create a local repository declaration.
    #[must_use]
    pub fn local(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_source(id, path, VcsSource::Local(LocalSource::default()))
    }

    fn with_source(id: impl Into<String>, path: impl Into<PathBuf>, source: VcsSource) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            path: path.into(),
            is_stale: false,
            last_indexed_date: None,
            is_fork: None,
            is_archived: None,
            code_host: None,
            topics: None,
            size_in_bytes: None,
            source,
        }
    }

    /// Set the excluded paths (local repositories only).
    #[must_use]
    pub fn with_excluded_paths<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let VcsSource::Local(ref mut local) = self.source {
            local.excluded_paths = patterns.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Set the watch flag (local repositories only).
    #[must_use]
    pub fn with_watch(mut self, watch: bool) -> Self {
        if let VcsSource::Local(ref mut local) = self.source {
            local.watch = watch;
        }
        self
    }

    /// Set the branches (git repositories only).
    #[must_use]
    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let VcsSource::Git(ref mut git) = self.source {
            git.branches = branches.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Short tag of the variant, for logs and metrics.
    #[must_use]
    pub const fn vcs(&self) -> &'static str {
        match self.source {
            VcsSource::Git(_) => "git",
            VcsSource::Local(_) => "local",
        }
    }

    /// Exclusion patterns applied while indexing.
    #[must_use]
    pub fn excluded_paths(&self) -> &[String] {
        match &self.source {
            VcsSource::Git(_) => &[],
            VcsSource::Local(local) => &local.excluded_paths,
        }
    }

    /// Whether filesystem changes should mark this repository stale.
    #[must_use]
    pub const fn watches(&self) -> bool {
        match &self.source {
            VcsSource::Git(_) => false,
            VcsSource::Local(local) => local.watch,
        }
    }

    /// Whether any field that influences the index differs from `other`.
    #[must_use]
    pub fn indexed_fields_differ(&self, other: &Self) -> bool {
        if self.path != other.path {
            return true;
        }

        match (&self.source, &other.source) {
            (VcsSource::Git(a), VcsSource::Git(b)) => a != b,
            (VcsSource::Local(a), VcsSource::Local(b)) => {
                a.excluded_paths != b.excluded_paths || a.watch != b.watch
            }
            (VcsSource::Git(_), VcsSource::Local(_)) | (VcsSource::Local(_), VcsSource::Git(_)) => {
                true
            }
        }
    }

    /// Digest of the indexed fields, stored alongside each index record.
    #[must_use]
    pub fn config_fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(self.path.to_string_lossy().as_bytes());
        field(self.vcs().as_bytes());
        match &self.source {
            VcsSource::Git(git) => {
                field(git.clone_url.as_bytes());
                for branch in &git.branches {
                    field(b"branch");
                    field(branch.as_bytes());
                }
                for tag in &git.tags {
                    field(b"tag");
                    field(tag.as_bytes());
                }
                if let Some(metadata) = &git.git_config_metadata {
                    field(b"metadata");
                    for (key, value) in metadata {
                        field(key.as_bytes());
                        field(value.as_bytes());
                    }
                }
            }
            VcsSource::Local(local) => {
                for pattern in &local.excluded_paths {
                    field(b"exclude");
                    field(pattern.as_bytes());
                }
                field(&[u8::from(local.watch)]);
            }
        }

        hasher.finalize().to_hex().to_string()
    }
}

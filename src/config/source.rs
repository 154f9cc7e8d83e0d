//! Declared configuration sources.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;

use super::context::AppContext;
use super::settings::Settings;
use crate::registry::Repository;
use crate::{Error, Result};

/// One load of the declared configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Declarations {
    /// Declared settings, if the source carries any.
    pub settings: Option<Settings>,

    /// Declared repositories, in declaration order.
    pub repos: Vec<Repository>,
}

impl Declarations {
    /// Check ids and normalize paths and names.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on empty or duplicate ids, or invalid
    /// settings.
    pub fn normalize(mut self, ctx: &AppContext) -> Result<Self> {
        if let Some(settings) = &self.settings {
            settings.validate()?;
        }

        let mut seen = HashSet::new();
        for repo in &mut self.repos {
            if repo.id.trim().is_empty() {
                return Err(Error::config("repository id cannot be empty"));
            }
            if !seen.insert(repo.id.clone()) {
                return Err(Error::config(format!(
                    "duplicate repository id '{}'",
                    repo.id
                )));
            }
            if repo.name.is_empty() {
                repo.name.clone_from(&repo.id);
            }
            repo.path = ctx.resolve_repo_path(&repo.path);
            // Runtime state is owned by the registry.
            repo.is_stale = false;
            repo.last_indexed_date = None;
        }

        Ok(self)
    }
}

/// Anything that can produce the declared repositories.
pub trait ConfigSource: Send + Sync {
    /// Load the current declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or is invalid.
    fn load(&self) -> Result<Declarations>;
}

/// JSON configuration file: `{ "settings": {...}, "repos": [...] }`.
#[derive(Debug, Clone)]
pub struct JsonConfigFile {
    path: PathBuf,
    ctx: AppContext,
}

impl JsonConfigFile {
    /// Read declarations from the context's config path.
    #[must_use]
    pub fn new(ctx: AppContext) -> Self {
        Self {
            path: ctx.config_path.clone(),
            ctx,
        }
    }
}

impl ConfigSource for JsonConfigFile {
    fn load(&self) -> Result<Declarations> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::config(format!(
                "cannot read config file '{}': {e}",
                self.path.display()
            ))
        })?;

        let declarations: Declarations = serde_json::from_str(&contents).map_err(|e| {
            Error::config(format!("invalid config file '{}': {e}", self.path.display()))
        })?;

        let declarations = declarations.normalize(&self.ctx)?;
        tracing::debug!(
            path = %self.path.display(),
            repos = declarations.repos.len(),
            "Loaded declarations"
        );
        Ok(declarations)
    }
}

/// In-memory declarations, replaceable between loads.
#[derive(Debug, Default)]
pub struct StaticConfig {
    declarations: parking_lot::RwLock<Declarations>,
}

impl StaticConfig {
    #[must_use]
    pub fn new(declarations: Declarations) -> Self {
        Self {
            declarations: parking_lot::RwLock::new(declarations),
        }
    }

    /// Replace what the next `load` returns.
    pub fn set(&self, declarations: Declarations) {
        *self.declarations.write() = declarations;
    }
}

impl ConfigSource for StaticConfig {
    fn load(&self) -> Result<Declarations> {
        Ok(self.declarations.read().clone())
    }
}

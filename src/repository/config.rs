// src/repository/config.rs

//! Declarative repository chains
//!
//! A chain configuration is an ordered set of entries, each naming its
//! parent. Exactly one entry hangs off the reserved root parent; the rest
//! must form one unbroken chain. Construction walks the chain root-outward,
//! initializing each repository; the first failure aborts the whole chain
//! so a partially-built chain is never exposed.

use crate::error::{Error, Result};
use crate::identity::Platform;
use crate::repository::{
    LocalRepository, LocalRepositoryOptions, ModuleRepository, UrlRepository,
    UrlRepositoryOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Reserved parent name marking the head of the chain
pub const ROOT_PARENT: &str = "root";

/// One declarative chain entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    /// Name of the parent entry, or [`ROOT_PARENT`]
    pub parent: String,
    /// Directory path (local) or base URL (url)
    pub source: String,
    /// `"local"`, `"url"`, or a registered factory name
    pub kind: String,
    /// Cache directory; defaults to a kind-specific location
    #[serde(default)]
    pub cache_dir: Option<String>,
    /// Fail construction when the source does not exist
    #[serde(default)]
    pub must_exist: bool,
}

impl RepositoryEntry {
    fn default_cache_dir(&self) -> PathBuf {
        match self.cache_dir.as_ref() {
            Some(dir) => PathBuf::from(dir),
            None if self.kind == "url" => {
                std::env::temp_dir().join(format!("modrepo-{}", self.name))
            }
            None => PathBuf::from(&self.source).join(".cache"),
        }
    }
}

/// Custom backend constructor for chain entries with a non-built-in kind
pub trait RepositoryFactory: Send + Sync {
    fn create(
        &self,
        entry: &RepositoryEntry,
        parent: Option<Arc<dyn ModuleRepository>>,
        platform: &Platform,
    ) -> Result<Arc<dyn ModuleRepository>>;
}

/// A parsed chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(rename = "repository")]
    pub repositories: Vec<RepositoryEntry>,
}

impl ChainConfig {
    pub fn new(repositories: Vec<RepositoryEntry>) -> Self {
        Self { repositories }
    }

    /// Parse the TOML form:
    ///
    /// ```toml
    /// [[repository]]
    /// name = "system"
    /// parent = "root"
    /// source = "/var/lib/modules"
    /// kind = "local"
    /// ```
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| Error::MalformedConfigError(format!("Invalid chain TOML: {e}")))
    }

    /// Validate the chain shape and return entries in root-outward order
    fn ordered(&self) -> Result<Vec<&RepositoryEntry>> {
        if self.repositories.is_empty() {
            return Err(Error::MalformedConfigError(
                "No repository entries declared".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for entry in &self.repositories {
            if entry.name == ROOT_PARENT {
                return Err(Error::MalformedConfigError(format!(
                    "Entry name '{ROOT_PARENT}' is reserved"
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(Error::MalformedConfigError(format!(
                    "Duplicate entry name '{}'",
                    entry.name
                )));
            }
        }

        let mut children: HashMap<&str, &RepositoryEntry> = HashMap::new();
        for entry in &self.repositories {
            if entry.parent != ROOT_PARENT && !names.contains(entry.parent.as_str()) {
                return Err(Error::MalformedConfigError(format!(
                    "Entry '{}' names undeclared parent '{}'",
                    entry.name, entry.parent
                )));
            }
            if children.insert(entry.parent.as_str(), entry).is_some() {
                return Err(Error::MalformedConfigError(format!(
                    "Parent '{}' has more than one child; a chain has no forks",
                    entry.parent
                )));
            }
        }

        let mut ordered = Vec::with_capacity(self.repositories.len());
        let mut cursor = ROOT_PARENT;
        while let Some(entry) = children.get(cursor) {
            ordered.push(*entry);
            cursor = entry.name.as_str();
        }

        if ordered.is_empty() {
            return Err(Error::MalformedConfigError(format!(
                "No entry names '{ROOT_PARENT}' as its parent"
            )));
        }
        if ordered.len() != self.repositories.len() {
            return Err(Error::MalformedConfigError(
                "Entries do not form a single chain reachable from the root".to_string(),
            ));
        }
        Ok(ordered)
    }

    /// Build and initialize the chain for the host platform
    pub fn build(&self) -> Result<Vec<Arc<dyn ModuleRepository>>> {
        self.build_with(Platform::current(), &HashMap::new())
    }

    /// Build and initialize the chain, resolving non-built-in kinds
    /// against `factories`
    pub fn build_with(
        &self,
        platform: Platform,
        factories: &HashMap<String, Arc<dyn RepositoryFactory>>,
    ) -> Result<Vec<Arc<dyn ModuleRepository>>> {
        let ordered = self.ordered()?;
        let mut chain: Vec<Arc<dyn ModuleRepository>> = Vec::with_capacity(ordered.len());

        for entry in ordered {
            let parent = chain.last().cloned();
            let repository: Arc<dyn ModuleRepository> = match entry.kind.as_str() {
                "local" => {
                    let options = LocalRepositoryOptions {
                        platform: platform.clone(),
                        parent,
                        must_exist: entry.must_exist,
                        ..LocalRepositoryOptions::default()
                    };
                    Arc::new(LocalRepository::with_options(
                        entry.name.clone(),
                        &entry.source,
                        entry.default_cache_dir(),
                        options,
                    ))
                }
                "url" => {
                    let options = UrlRepositoryOptions {
                        platform: platform.clone(),
                        parent,
                        must_exist: entry.must_exist,
                        ..UrlRepositoryOptions::default()
                    };
                    Arc::new(UrlRepository::with_options(
                        entry.name.clone(),
                        &entry.source,
                        entry.default_cache_dir(),
                        options,
                    )?)
                }
                other => {
                    let factory = factories.get(other).ok_or_else(|| {
                        Error::MalformedConfigError(format!(
                            "Entry '{}' has unknown kind '{other}' and no matching factory",
                            entry.name
                        ))
                    })?;
                    factory.create(entry, parent, &platform)?
                }
            };

            // One failed construction discards the whole chain
            repository.initialize()?;
            chain.push(repository);
        }

        info!("Built repository chain of {} repositories", chain.len());
        Ok(chain)
    }
}

// src/repository/mod.rs

//! Module repositories
//!
//! This module provides the repository state machine and its two backends:
//! - [`LocalRepository`]: a writable directory of archive files
//! - [`UrlRepository`]: a read-only repository behind a base URL
//!
//! Repositories form parent-delegating chains built by [`config`].
//! All mutating operations on one instance serialize under an exclusive
//! lock; readers observe mutations atomically, never partially.

pub mod client;
pub mod config;
mod local;
mod remote;

pub use client::RepositoryClient;
pub use config::{ChainConfig, RepositoryEntry, RepositoryFactory, ROOT_PARENT};
pub use local::{LocalRepository, LocalRepositoryOptions};
pub use remote::{UrlRepository, UrlRepositoryOptions};

use crate::bridge::ContainerBridge;
use crate::capability::{CapabilityCheck, Operation};
use crate::contents::RepositoryContents;
use crate::definition::{ModuleDefinition, ModuleQuery};
use crate::descriptor::DescriptorParser;
use crate::error::{Error, Result};
use crate::identity::{Platform, VersionedIdentity};
use crate::record::ModuleArchiveRecord;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Archive extensions accepted for install, in preference order:
/// primary packed form, primary unpacked form, generic fallback
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mar.gz", "mar", "tar"];

/// Match a path against the supported archive extensions
pub fn supported_extension(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?;
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|ext| name.ends_with(&format!(".{ext}")))
        .copied()
}

/// Repository lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Uninitialized,
    Active,
    /// Terminal; the repository is permanently inert
    Shutdown,
}

/// One archive reload failed to process
#[derive(Debug)]
pub struct ReloadFailure {
    /// Archive file or identity the failure concerns
    pub subject: String,
    pub error: Error,
}

/// Outcome of a reload reconciliation pass
///
/// Per-archive failures are collected here rather than aborting the
/// reconciliation of sibling archives.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub added: Vec<Arc<ModuleArchiveRecord>>,
    pub removed: Vec<VersionedIdentity>,
    pub failures: Vec<ReloadFailure>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A repository of installable module archives
pub trait ModuleRepository: Send + Sync {
    fn name(&self) -> &str;

    /// Source location (directory path or base URL)
    fn source(&self) -> &str;

    fn parent(&self) -> Option<&Arc<dyn ModuleRepository>>;

    fn state(&self) -> RepositoryState;

    fn is_read_only(&self) -> bool;

    fn is_active(&self) -> bool {
        self.state() == RepositoryState::Active
    }

    /// Scan the source once and build the initial contents
    ///
    /// Idempotent: an already-active repository returns its current
    /// records.
    fn initialize(&self) -> Result<Vec<Arc<ModuleArchiveRecord>>>;

    /// Install an archive file into managed storage
    ///
    /// Atomic from the caller's view: any failure after staging rolls
    /// back every filesystem change before the error propagates.
    fn install(&self, archive: &Path) -> Result<Arc<ModuleArchiveRecord>>;

    /// Remove an installed archive
    ///
    /// Returns `Ok(false)` when the record is no longer tracked (an
    /// idempotent no-op). Deliberately does not promote a portable
    /// fallback definition; only `reload` reconciles preference slots.
    fn uninstall(&self, record: &ModuleArchiveRecord) -> Result<bool>;

    /// Re-scan the source and reconcile contents with it
    fn reload(&self) -> Result<ReloadReport>;

    /// Snapshot of all tracked records
    fn list(&self) -> Result<Vec<Arc<ModuleArchiveRecord>>>;

    /// Definitions matching the query, parent chain first
    fn find(&self, query: &dyn ModuleQuery) -> Result<Vec<ModuleDefinition>>;

    /// Transition to the terminal state, optionally releasing scratch
    /// directories. Idempotent.
    fn shutdown(&self) -> Result<()>;
}

/// State shared by both repository backends
///
/// Mutations serialize on `mutation`; `contents` changes are prepared
/// outside the write lock and applied in one critical section so readers
/// see each mutation fully or not at all.
pub(crate) struct RepositoryCore {
    name: String,
    source: String,
    platform: Platform,
    parser: Arc<dyn DescriptorParser>,
    bridge: Arc<dyn ContainerBridge>,
    capability: Arc<dyn CapabilityCheck>,
    parent: Option<Arc<dyn ModuleRepository>>,
    state: RwLock<RepositoryState>,
    contents: RwLock<RepositoryContents>,
    mutation: Mutex<()>,
}

impl RepositoryCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        source: String,
        platform: Platform,
        parser: Arc<dyn DescriptorParser>,
        bridge: Arc<dyn ContainerBridge>,
        capability: Arc<dyn CapabilityCheck>,
        parent: Option<Arc<dyn ModuleRepository>>,
    ) -> Self {
        Self {
            name,
            source,
            platform,
            parser,
            bridge,
            capability,
            parent,
            state: RwLock::new(RepositoryState::Uninitialized),
            contents: RwLock::new(RepositoryContents::new()),
            mutation: Mutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn platform(&self) -> &Platform {
        &self.platform
    }

    pub(crate) fn parser(&self) -> &Arc<dyn DescriptorParser> {
        &self.parser
    }

    pub(crate) fn bridge(&self) -> &dyn ContainerBridge {
        self.bridge.as_ref()
    }

    pub(crate) fn parent(&self) -> Option<&Arc<dyn ModuleRepository>> {
        self.parent.as_ref()
    }

    pub(crate) fn state(&self) -> RepositoryState {
        *self.state.read().expect("state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: RepositoryState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.state() {
            RepositoryState::Active => Ok(()),
            RepositoryState::Uninitialized => Err(Error::NotActiveError(format!(
                "Repository '{}' ({}) has not been initialized",
                self.name, self.source
            ))),
            RepositoryState::Shutdown => Err(Error::NotActiveError(format!(
                "Repository '{}' ({}) has been shut down",
                self.name, self.source
            ))),
        }
    }

    /// Capability gate, consulted once per mutating public operation
    pub(crate) fn authorize(&self, operation: Operation) -> Result<()> {
        self.capability.authorize(&self.name, operation)
    }

    /// Serialize a mutating operation
    pub(crate) fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().expect("mutation lock poisoned")
    }

    pub(crate) fn read_contents<T>(&self, f: impl FnOnce(&RepositoryContents) -> T) -> T {
        f(&self.contents.read().expect("contents lock poisoned"))
    }

    /// Apply a prepared contents change atomically with respect to
    /// readers
    pub(crate) fn write_contents<T>(&self, f: impl FnOnce(&mut RepositoryContents) -> T) -> T {
        f(&mut self.contents.write().expect("contents lock poisoned"))
    }

    pub(crate) fn list(&self) -> Result<Vec<Arc<ModuleArchiveRecord>>> {
        self.ensure_active()?;
        Ok(self.read_contents(|c| c.records()))
    }

    /// Query the parent chain first, then own contents
    pub(crate) fn find(&self, query: &dyn ModuleQuery) -> Result<Vec<ModuleDefinition>> {
        self.ensure_active()?;
        let mut results = match &self.parent {
            Some(parent) => parent.find(query)?,
            None => Vec::new(),
        };
        results.extend(self.read_contents(|c| c.find(query)));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_supported_extension() {
        assert_eq!(
            supported_extension(&PathBuf::from("net-1.0.0.mar.gz")),
            Some("mar.gz")
        );
        assert_eq!(
            supported_extension(&PathBuf::from("net-1.0.0.mar")),
            Some("mar")
        );
        assert_eq!(
            supported_extension(&PathBuf::from("net-1.0.0.tar")),
            Some("tar")
        );
        assert_eq!(supported_extension(&PathBuf::from("net-1.0.0.rpm")), None);
        assert_eq!(supported_extension(&PathBuf::from("repository-manifest.json")), None);
    }
}

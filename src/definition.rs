// src/definition.rs

//! Constructed module definitions and the query boundary
//!
//! A [`ModuleDefinition`] is derived from an archive record when the
//! record's platform binding matches the resolving environment. Dependency
//! and export information is parsed from the record's descriptor on first
//! access, so remote records stay lazy until someone actually inspects the
//! definition.

use crate::descriptor::{DescriptorParser, ModuleDependency, ModuleDescriptor};
use crate::error::Result;
use crate::identity::VersionedIdentity;
use crate::record::ModuleArchiveRecord;
use semver::VersionReq;
use std::sync::{Arc, OnceLock};

/// A resolvable module, derived from one archive record
#[derive(Clone)]
pub struct ModuleDefinition {
    identity: VersionedIdentity,
    repository: String,
    record: Arc<ModuleArchiveRecord>,
    parser: Arc<dyn DescriptorParser>,
    descriptor: Arc<OnceLock<ModuleDescriptor>>,
}

impl ModuleDefinition {
    pub fn new(
        record: Arc<ModuleArchiveRecord>,
        parser: Arc<dyn DescriptorParser>,
    ) -> Self {
        Self {
            identity: record.identity().clone(),
            repository: record.repository().to_string(),
            record,
            parser,
            descriptor: Arc::new(OnceLock::new()),
        }
    }

    pub fn identity(&self) -> &VersionedIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn version(&self) -> &semver::Version {
        self.identity.version()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The archive record this definition was constructed from
    pub fn record(&self) -> &Arc<ModuleArchiveRecord> {
        &self.record
    }

    /// Parsed descriptor, fetched and decoded on first access
    pub fn descriptor(&self) -> Result<ModuleDescriptor> {
        if let Some(d) = self.descriptor.get() {
            return Ok(d.clone());
        }
        let bytes = self.record.metadata()?;
        let parsed = self.parser.parse(&bytes)?;
        Ok(self.descriptor.get_or_init(|| parsed).clone())
    }

    /// Declared dependencies of this module
    pub fn dependencies(&self) -> Result<Vec<ModuleDependency>> {
        Ok(self.descriptor()?.dependencies)
    }

    /// Packages this module exports
    pub fn exports(&self) -> Result<Vec<String>> {
        Ok(self.descriptor()?.exports)
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("identity", &self.identity)
            .field("repository", &self.repository)
            .finish()
    }
}

/// External query evaluation boundary
///
/// `find()` hands each candidate definition to the query; the core does
/// not interpret query semantics itself.
pub trait ModuleQuery: Send + Sync {
    fn matches(&self, definition: &ModuleDefinition) -> bool;
}

/// Matches every definition
#[derive(Debug, Default)]
pub struct AnyQuery;

impl ModuleQuery for AnyQuery {
    fn matches(&self, _definition: &ModuleDefinition) -> bool {
        true
    }
}

/// Matches definitions by exact module name
#[derive(Debug)]
pub struct NameQuery {
    pub name: String,
}

impl NameQuery {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ModuleQuery for NameQuery {
    fn matches(&self, definition: &ModuleDefinition) -> bool {
        definition.name() == self.name
    }
}

/// Matches definitions by name and a semver requirement
#[derive(Debug)]
pub struct VersionQuery {
    pub name: String,
    pub requirement: VersionReq,
}

impl VersionQuery {
    pub fn new(name: impl Into<String>, requirement: VersionReq) -> Self {
        Self {
            name: name.into(),
            requirement,
        }
    }
}

impl ModuleQuery for VersionQuery {
    fn matches(&self, definition: &ModuleDefinition) -> bool {
        definition.name() == self.name && self.requirement.matches(definition.version())
    }
}

// src/lib.rs

//! Modrepo — module archive repository core
//!
//! A miniature package-manager core: discovers, caches, versions, and
//! resolves installable module archives into module definitions, with
//! crash-safe install/uninstall/reload semantics and a query mechanism
//! over installed modules.
//!
//! # Architecture
//!
//! - Archives: tar containers (optionally gzipped) carrying a descriptor
//!   entry, embedded libraries, and platform-specific native libraries
//! - Identities: name + semver + optional platform/arch binding; at most
//!   one definition per `(name, version)` group, platform-bound preferred
//! - Repositories: local directory (writable) or base URL (read-only),
//!   chained parent-to-child; mutations are atomic to readers and undo
//!   their filesystem effects on failure
//! - Manifests: JSON record lists, rewritten via temp-then-atomic-rename

pub mod archive;
pub mod bridge;
pub mod capability;
pub mod contents;
pub mod definition;
pub mod descriptor;
mod error;
pub mod identity;
pub mod manifest;
pub mod record;
pub mod repository;

pub use archive::{ArchiveCache, ExtractedFile, ExtractedKind, ExtractionSpec};
pub use bridge::{ContainerBridge, NativeBridge};
pub use capability::{AllowAll, CapabilityCheck, DenyMutations, Operation};
pub use contents::RepositoryContents;
pub use definition::{AnyQuery, ModuleDefinition, ModuleQuery, NameQuery, VersionQuery};
pub use descriptor::{
    DescriptorParser, JsonDescriptorParser, ModuleDependency, ModuleDescriptor,
    DEFAULT_LIBRARY_PREFIX, DESCRIPTOR_ENTRY,
};
pub use error::{Error, Result};
pub use identity::{Platform, PlatformBinding, VersionedIdentity};
pub use manifest::{ManifestEntry, MANIFEST_FILE};
pub use record::{Backend, ModuleArchiveRecord};
pub use repository::{
    ChainConfig, LocalRepository, LocalRepositoryOptions, ModuleRepository, ReloadFailure,
    ReloadReport, RepositoryEntry, RepositoryFactory, RepositoryState, UrlRepository,
    UrlRepositoryOptions, ROOT_PARENT,
};

// src/identity.rs

//! Module identities and platform bindings
//!
//! A module archive is identified by name + semantic version, optionally
//! bound to a platform/architecture pair. Portable (unbound) and
//! platform-bound identities never compare equal, even with matching
//! name and version.

use crate::error::{Error, Result};
use semver::Version;
use std::fmt;

/// A platform/architecture pair a module archive is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformBinding {
    pub platform: String,
    pub arch: String,
}

impl PlatformBinding {
    pub fn new(platform: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for PlatformBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.arch)
    }
}

/// The environment a repository is resolving for
///
/// Injected at repository construction so tests can resolve for a platform
/// other than the host's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub platform: String,
    pub arch: String,
}

impl Platform {
    pub fn new(platform: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            arch: arch.into(),
        }
    }

    /// Detect the running platform from the compile-time target
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Check whether an archive binding is usable on this platform
    ///
    /// Portable archives (no binding) match everywhere.
    pub fn supports(&self, binding: Option<&PlatformBinding>) -> bool {
        match binding {
            None => true,
            Some(b) => b.platform == self.platform && b.arch == self.arch,
        }
    }
}

/// Name + semantic version + optional platform binding
///
/// Equality and ordering consider all fields; ordering over the `BTreeMap`
/// key gives `list()` a stable, deterministic order within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionedIdentity {
    name: String,
    version: Version,
    binding: Option<PlatformBinding>,
}

impl VersionedIdentity {
    /// A portable identity, usable on any platform
    pub fn portable(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            binding: None,
        }
    }

    /// An identity bound to one platform/architecture
    pub fn bound(name: impl Into<String>, version: Version, binding: PlatformBinding) -> Self {
        Self {
            name: name.into(),
            version,
            binding: Some(binding),
        }
    }

    pub fn new(
        name: impl Into<String>,
        version: Version,
        binding: Option<PlatformBinding>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            binding,
        }
    }

    /// Parse a version string, mapping failures to `ParseError`
    pub fn parse_version(s: &str) -> Result<Version> {
        Version::parse(s).map_err(|e| Error::ParseError(format!("Invalid version '{s}': {e}")))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn binding(&self) -> Option<&PlatformBinding> {
        self.binding.as_ref()
    }

    pub fn is_portable(&self) -> bool {
        self.binding.is_none()
    }

    /// True when `other` names the same module at the same version,
    /// regardless of binding
    pub fn same_release(&self, other: &VersionedIdentity) -> bool {
        self.name == other.name && self.version == other.version
    }

    /// Canonical filename stem: `{name}-{version}[-{platform}-{arch}]`
    ///
    /// Used for managed storage filenames, cache directories, and remote
    /// payload paths.
    pub fn file_stem(&self) -> String {
        match &self.binding {
            Some(b) => format!("{}-{}-{}", self.name, self.version, b),
            None => format!("{}-{}", self.name, self.version),
        }
    }
}

impl fmt::Display for VersionedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            Some(b) => write!(f, "{} {} ({})", self.name, self.version, b),
            None => write!(f, "{} {}", self.name, self.version),
        }
    }
}

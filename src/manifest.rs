// src/manifest.rs

//! Persisted manifest of installed archives
//!
//! Local repositories rewrite this file after every successful mutation,
//! always via write-to-temp-then-atomic-rename: a crash mid-write leaves
//! either the old or the new manifest intact, never a hybrid. Remote
//! repositories publish the same record shape at
//! `{base}/repository-manifest`.

use crate::error::{Error, Result};
use crate::identity::{PlatformBinding, VersionedIdentity};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Manifest filename inside a local repository's source directory
pub const MANIFEST_FILE: &str = "repository-manifest.json";

/// One archive the repository claims to hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Relative path to the archive. Install never creates one for the
    /// archives it lands; entries created by other tooling keep theirs
    /// across rewrites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ManifestEntry {
    pub fn from_identity(identity: &VersionedIdentity) -> Self {
        Self {
            name: identity.name().to_string(),
            version: identity.version().to_string(),
            platform: identity.binding().map(|b| b.platform.clone()),
            arch: identity.binding().map(|b| b.arch.clone()),
            path: None,
        }
    }

    /// Reconstruct the identity this entry names
    pub fn identity(&self) -> Result<VersionedIdentity> {
        let version = Version::parse(&self.version).map_err(|e| {
            Error::ParseError(format!(
                "Manifest entry '{}': invalid version '{}': {e}",
                self.name, self.version
            ))
        })?;
        let binding = match (&self.platform, &self.arch) {
            (Some(p), Some(a)) => Some(PlatformBinding::new(p.clone(), a.clone())),
            (None, None) => None,
            _ => {
                return Err(Error::ParseError(format!(
                    "Manifest entry '{}': platform and arch must be declared together",
                    self.name
                )))
            }
        };
        Ok(VersionedIdentity::new(self.name.clone(), version, binding))
    }
}

/// Read a manifest file; a missing file is an empty manifest
pub fn load(path: &Path) -> Result<Vec<ManifestEntry>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to read manifest {}: {e}",
                path.display()
            )))
        }
    };
    parse(&bytes).map_err(|e| match e {
        Error::ParseError(msg) => Error::ParseError(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Decode manifest bytes (also the remote `repository-manifest` payload)
pub fn parse(bytes: &[u8]) -> Result<Vec<ManifestEntry>> {
    serde_json::from_slice(bytes).map_err(|e| Error::ParseError(format!("Invalid manifest: {e}")))
}

/// Rewrite the manifest atomically
pub fn store(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::IoError(format!("{}: no parent directory", path.display())))?;

    let json = serde_json::to_vec_pretty(entries)
        .map_err(|e| Error::ParseError(format!("Failed to encode manifest: {e}")))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| {
        Error::IoError(format!(
            "Failed to create temp manifest in {}: {e}",
            parent.display()
        ))
    })?;
    tmp.write_all(&json)
        .map_err(|e| Error::IoError(format!("Failed to write manifest: {e}")))?;
    tmp.persist(path).map_err(|e| {
        Error::IoError(format!(
            "Failed to move manifest into {}: {e}",
            path.display()
        ))
    })?;

    debug!("Wrote manifest with {} entries to {}", entries.len(), path.display());
    Ok(())
}

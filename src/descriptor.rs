// src/descriptor.rs

//! Module descriptor parsing
//!
//! Every module archive carries a descriptor entry at a fixed path inside
//! the container. The core treats descriptor decoding as a serialization
//! boundary: it hands raw bytes to a [`DescriptorParser`] and consumes the
//! resulting [`ModuleDescriptor`] record. The shipped parser reads the
//! JSON form; alternate wire formats plug in behind the trait.

use crate::error::{Error, Result};
use crate::identity::{PlatformBinding, VersionedIdentity};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// Fixed path of the descriptor entry inside a module archive
pub const DESCRIPTOR_ENTRY: &str = "module-inf/module.json";

/// Default prefix for embedded legacy library entries
pub const DEFAULT_LIBRARY_PREFIX: &str = "module-inf/lib/";

/// Prefix under which native libraries live, before the platform-arch
/// directory component
pub const NATIVE_BIN_PREFIX: &str = "module-inf/bin/";

/// A dependency declared by a module descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub name: String,
    /// Version constraint in semver requirement syntax ("*" when absent)
    #[serde(default = "any_constraint")]
    pub constraint: String,
}

fn any_constraint() -> String {
    "*".to_string()
}

impl ModuleDependency {
    /// Parse the declared constraint
    pub fn requirement(&self) -> Result<VersionReq> {
        VersionReq::parse(&self.constraint).map_err(|e| {
            Error::ParseError(format!(
                "Invalid constraint '{}' on dependency '{}': {e}",
                self.constraint, self.name
            ))
        })
    }
}

/// The information content of one module descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Override for the embedded library path prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
    /// Override for the native library path prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_library_path: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,
    #[serde(default)]
    pub exports: Vec<String>,
}

impl ModuleDescriptor {
    /// Derive the archive identity from the descriptor fields
    ///
    /// `platform` and `arch` must be both present or both absent.
    pub fn identity(&self) -> Result<VersionedIdentity> {
        let version = Version::parse(&self.version).map_err(|e| {
            Error::ParseError(format!(
                "Invalid version '{}' in descriptor for '{}': {e}",
                self.version, self.name
            ))
        })?;

        let binding = match (&self.platform, &self.arch) {
            (Some(p), Some(a)) => Some(PlatformBinding::new(p.clone(), a.clone())),
            (None, None) => None,
            _ => {
                return Err(Error::ParseError(format!(
                    "Descriptor for '{}' declares platform without arch (or arch without platform)",
                    self.name
                )))
            }
        };

        if self.name.is_empty() {
            return Err(Error::ParseError(
                "Descriptor has an empty module name".to_string(),
            ));
        }

        Ok(VersionedIdentity::new(self.name.clone(), version, binding))
    }
}

/// External descriptor decoding boundary
pub trait DescriptorParser: Send + Sync {
    /// Decode raw descriptor bytes into a descriptor record
    fn parse(&self, bytes: &[u8]) -> Result<ModuleDescriptor>;

    /// Encode a descriptor back to its wire form
    fn serialize(&self, descriptor: &ModuleDescriptor) -> Result<Vec<u8>>;
}

/// The shipped JSON descriptor codec
#[derive(Debug, Default)]
pub struct JsonDescriptorParser;

impl DescriptorParser for JsonDescriptorParser {
    fn parse(&self, bytes: &[u8]) -> Result<ModuleDescriptor> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::ParseError(format!("Invalid module descriptor: {e}")))
    }

    fn serialize(&self, descriptor: &ModuleDescriptor) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(descriptor)
            .map_err(|e| Error::ParseError(format!("Failed to encode descriptor: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, version: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            version: version.to_string(),
            platform: None,
            arch: None,
            library_path: None,
            native_library_path: None,
            dependencies: vec![],
            exports: vec![],
        }
    }

    #[test]
    fn test_parse_minimal_descriptor() {
        let parser = JsonDescriptorParser;
        let parsed = parser
            .parse(br#"{"name": "logging", "version": "1.0.0"}"#)
            .unwrap();
        assert_eq!(parsed.name, "logging");
        assert_eq!(parsed.version, "1.0.0");
        assert!(parsed.dependencies.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let parser = JsonDescriptorParser;
        let mut d = descriptor("net", "2.1.0");
        d.platform = Some("linux".to_string());
        d.arch = Some("x86".to_string());
        d.dependencies.push(ModuleDependency {
            name: "logging".to_string(),
            constraint: ">=1.0.0".to_string(),
        });
        d.exports.push("net.http".to_string());

        let bytes = parser.serialize(&d).unwrap();
        let back = parser.parse(&bytes).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn test_identity_portable() {
        let d = descriptor("logging", "1.0.0");
        let id = d.identity().unwrap();
        assert!(id.is_portable());
        assert_eq!(id.name(), "logging");
    }

    #[test]
    fn test_identity_rejects_half_binding() {
        let mut d = descriptor("net", "1.0.0");
        d.platform = Some("linux".to_string());
        assert!(d.identity().is_err());
    }

    #[test]
    fn test_identity_rejects_bad_version() {
        let d = descriptor("net", "not-a-version");
        assert!(d.identity().is_err());
    }

    #[test]
    fn test_dependency_requirement() {
        let dep = ModuleDependency {
            name: "logging".to_string(),
            constraint: ">=1.0.0, <2.0.0".to_string(),
        };
        let req = dep.requirement().unwrap();
        assert!(req.matches(&Version::parse("1.5.0").unwrap()));
        assert!(!req.matches(&Version::parse("2.0.0").unwrap()));
    }
}

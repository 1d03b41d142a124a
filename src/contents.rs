// src/contents.rs

//! In-memory repository index
//!
//! Maps archive identities to their records and, for at most one archive
//! per `(name, version)` release group, the constructed definition. The
//! preferred-definition rule lives here: a platform-bound archive matching
//! the resolving platform wins over a portable one; never both.
//!
//! Owned exclusively by one repository; callers mutate it under the
//! repository's write lock.

use crate::bridge::ContainerBridge;
use crate::definition::{ModuleDefinition, ModuleQuery};
use crate::error::Error;
use crate::identity::{Platform, VersionedIdentity};
use crate::record::ModuleArchiveRecord;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
struct ContentsEntry {
    record: Arc<ModuleArchiveRecord>,
    definition: Option<ModuleDefinition>,
}

/// Index of everything a repository currently holds
///
/// Keyed by identity; `BTreeMap` ordering makes `records()` deterministic
/// within a session and keeps release groups adjacent.
#[derive(Debug, Default)]
pub struct RepositoryContents {
    entries: BTreeMap<VersionedIdentity, ContentsEntry>,
}

impl RepositoryContents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &VersionedIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn record(&self, identity: &VersionedIdentity) -> Option<&Arc<ModuleArchiveRecord>> {
        self.entries.get(identity).map(|e| &e.record)
    }

    pub fn definition(&self, identity: &VersionedIdentity) -> Option<&ModuleDefinition> {
        self.entries
            .get(identity)
            .filter(|e| !e.record.integrity_failed())
            .and_then(|e| e.definition.as_ref())
    }

    /// All records, in identity order
    pub fn records(&self) -> Vec<Arc<ModuleArchiveRecord>> {
        self.entries.values().map(|e| e.record.clone()).collect()
    }

    /// All active definitions, in identity order
    ///
    /// Records whose downloaded payload failed verification are excluded;
    /// reload replaces them with fresh records.
    pub fn definitions(&self) -> Vec<ModuleDefinition> {
        self.entries
            .values()
            .filter(|e| !e.record.integrity_failed())
            .filter_map(|e| e.definition.clone())
            .collect()
    }

    /// Definitions matching a query, in identity order
    pub fn find(&self, query: &dyn ModuleQuery) -> Vec<ModuleDefinition> {
        self.entries
            .values()
            .filter(|e| !e.record.integrity_failed())
            .filter_map(|e| e.definition.as_ref())
            .filter(|d| query.matches(d))
            .cloned()
            .collect()
    }

    /// Track a record without constructing a definition
    pub fn insert_record(&mut self, record: Arc<ModuleArchiveRecord>) {
        self.entries.insert(
            record.identity().clone(),
            ContentsEntry {
                record,
                definition: None,
            },
        );
    }

    /// Drop a record and its definition, if tracked
    ///
    /// Deliberately performs no fallback promotion: an uncovered portable
    /// sibling only regains its definition through `reselect` (invoked by
    /// reload).
    pub fn remove(&mut self, identity: &VersionedIdentity) -> Option<Arc<ModuleArchiveRecord>> {
        self.entries.remove(identity).map(|e| e.record)
    }

    /// Track a freshly installed record and construct its definition when
    /// the binding matches the resolving platform
    ///
    /// Install-time rule: a platform-bound archive matching the platform
    /// takes the definition slot for its release group, displacing a
    /// portable sibling's definition; a portable archive only takes the
    /// slot when the group has no definition yet.
    pub fn apply_install(
        &mut self,
        record: Arc<ModuleArchiveRecord>,
        platform: &Platform,
        bridge: &dyn ContainerBridge,
    ) -> Result<(), Error> {
        let identity = record.identity().clone();
        let compatible = platform.supports(identity.binding());

        let definition = if !compatible {
            None
        } else if identity.is_portable() && self.group_has_definition(&identity) {
            None
        } else {
            Some(bridge.build(&record)?)
        };

        if definition.is_some() && !identity.is_portable() {
            // The bound archive becomes preferred; clear the portable
            // sibling's definition to keep the group at one
            let siblings: Vec<VersionedIdentity> = self
                .entries
                .keys()
                .filter(|id| id.same_release(&identity) && **id != identity)
                .cloned()
                .collect();
            for sibling in siblings {
                if let Some(entry) = self.entries.get_mut(&sibling) {
                    entry.definition = None;
                }
            }
        }

        self.entries
            .insert(identity, ContentsEntry { record, definition });
        Ok(())
    }

    fn group_has_definition(&self, identity: &VersionedIdentity) -> bool {
        self.entries
            .iter()
            .any(|(id, e)| id.same_release(identity) && e.definition.is_some())
    }

    /// Recompute the preferred definition for every release group
    ///
    /// The single place where fallback promotion happens. A group's
    /// preferred archive is the platform-bound one matching `platform`
    /// when present, the portable one otherwise; incompatible-only groups
    /// get no definition. Per-group build failures are collected, not
    /// propagated, so one bad archive cannot poison the rest.
    pub fn reselect(
        &mut self,
        platform: &Platform,
        bridge: &dyn ContainerBridge,
    ) -> Vec<(VersionedIdentity, Error)> {
        let mut failures = Vec::new();

        // Release groups are adjacent in key order
        let keys: Vec<VersionedIdentity> = self.entries.keys().cloned().collect();
        let mut index = 0;
        while index < keys.len() {
            let mut end = index + 1;
            while end < keys.len() && keys[end].same_release(&keys[index]) {
                end += 1;
            }
            let group = &keys[index..end];

            let preferred = group
                .iter()
                .find(|id| !id.is_portable() && platform.supports(id.binding()))
                .or_else(|| group.iter().find(|id| id.is_portable()))
                .cloned();

            for id in group {
                let is_preferred = preferred.as_ref() == Some(id);
                let entry = self.entries.get_mut(id).expect("key came from the map");
                if !is_preferred {
                    entry.definition = None;
                    continue;
                }
                if entry.definition.is_some() {
                    continue;
                }
                match bridge.build(&entry.record) {
                    Ok(def) => entry.definition = Some(def),
                    Err(e) => {
                        warn!("Failed to construct definition for {id}: {e}");
                        failures.push((id.clone(), e));
                    }
                }
            }
            index = end;
        }
        failures
    }

    /// Invariant check used by tests: at most one definition per release
    /// group
    pub fn at_most_one_definition_per_release(&self) -> bool {
        let mut seen: Vec<&VersionedIdentity> = Vec::new();
        for (id, entry) in &self.entries {
            if entry.definition.is_none() {
                continue;
            }
            if seen.iter().any(|s| s.same_release(id)) {
                return false;
            }
            seen.push(id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NativeBridge;
    use crate::descriptor::JsonDescriptorParser;
    use crate::identity::PlatformBinding;
    use semver::Version;
    use std::path::PathBuf;

    fn record(name: &str, version: &str, binding: Option<(&str, &str)>) -> Arc<ModuleArchiveRecord> {
        let identity = VersionedIdentity::new(
            name,
            Version::parse(version).unwrap(),
            binding.map(|(p, a)| PlatformBinding::new(p, a)),
        );
        let (platform_json, arch_json) = match binding {
            Some((p, a)) => (format!(r#", "platform": "{p}""#), format!(r#", "arch": "{a}""#)),
            None => (String::new(), String::new()),
        };
        let metadata = format!(
            r#"{{"name": "{name}", "version": "{version}"{platform_json}{arch_json}}}"#
        );
        Arc::new(ModuleArchiveRecord::local(
            identity,
            "test",
            PathBuf::from(format!("{name}-{version}.mar")),
            0,
            metadata.into_bytes(),
        ))
    }

    fn bridge() -> NativeBridge {
        NativeBridge::new(Arc::new(JsonDescriptorParser))
    }

    fn linux_x86() -> Platform {
        Platform::new("linux", "x86")
    }

    #[test]
    fn test_reselect_prefers_bound_over_portable() {
        let mut contents = RepositoryContents::new();
        contents.insert_record(record("net", "1.0.0", None));
        contents.insert_record(record("net", "1.0.0", Some(("linux", "x86"))));

        let failures = contents.reselect(&linux_x86(), &bridge());
        assert!(failures.is_empty());

        let defs = contents.definitions();
        assert_eq!(defs.len(), 1);
        assert!(!defs[0].identity().is_portable());
        assert!(contents.at_most_one_definition_per_release());
    }

    #[test]
    fn test_reselect_falls_back_to_portable() {
        let mut contents = RepositoryContents::new();
        contents.insert_record(record("net", "1.0.0", None));
        contents.insert_record(record("net", "1.0.0", Some(("windows", "x86"))));

        contents.reselect(&linux_x86(), &bridge());

        let defs = contents.definitions();
        assert_eq!(defs.len(), 1);
        assert!(defs[0].identity().is_portable());
    }

    #[test]
    fn test_reselect_incompatible_only_group_gets_nothing() {
        let mut contents = RepositoryContents::new();
        contents.insert_record(record("net", "1.0.0", Some(("windows", "x86"))));

        contents.reselect(&linux_x86(), &bridge());
        assert!(contents.definitions().is_empty());
        assert_eq!(contents.records().len(), 1);
    }

    #[test]
    fn test_install_bound_displaces_portable_definition() {
        let mut contents = RepositoryContents::new();
        contents.insert_record(record("net", "1.0.0", None));
        contents.reselect(&linux_x86(), &bridge());
        assert_eq!(contents.definitions().len(), 1);

        contents
            .apply_install(record("net", "1.0.0", Some(("linux", "x86"))), &linux_x86(), &bridge())
            .unwrap();

        let defs = contents.definitions();
        assert_eq!(defs.len(), 1);
        assert!(!defs[0].identity().is_portable());
        assert!(contents.at_most_one_definition_per_release());
    }

    #[test]
    fn test_install_portable_does_not_displace_bound() {
        let mut contents = RepositoryContents::new();
        contents
            .apply_install(record("net", "1.0.0", Some(("linux", "x86"))), &linux_x86(), &bridge())
            .unwrap();
        contents
            .apply_install(record("net", "1.0.0", None), &linux_x86(), &bridge())
            .unwrap();

        let defs = contents.definitions();
        assert_eq!(defs.len(), 1);
        assert!(!defs[0].identity().is_portable());
    }

    #[test]
    fn test_remove_does_not_promote() {
        let mut contents = RepositoryContents::new();
        contents.insert_record(record("net", "1.0.0", None));
        contents.insert_record(record("net", "1.0.0", Some(("linux", "x86"))));
        contents.reselect(&linux_x86(), &bridge());

        let bound = VersionedIdentity::bound(
            "net",
            Version::parse("1.0.0").unwrap(),
            PlatformBinding::new("linux", "x86"),
        );
        contents.remove(&bound);

        // Portable sibling stays dormant until the next reselect
        assert!(contents.definitions().is_empty());

        contents.reselect(&linux_x86(), &bridge());
        assert_eq!(contents.definitions().len(), 1);
    }

    #[test]
    fn test_different_versions_are_independent_groups() {
        let mut contents = RepositoryContents::new();
        contents.insert_record(record("net", "1.0.0", None));
        contents.insert_record(record("net", "2.0.0", None));
        contents.reselect(&linux_x86(), &bridge());

        assert_eq!(contents.definitions().len(), 2);
        assert!(contents.at_most_one_definition_per_release());
    }
}

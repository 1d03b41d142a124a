// src/repository/remote.rs

//! URL-backed repository
//!
//! Always read-only. The published manifest at
//! `{base}/repository-manifest` is fetched at initialize and reload; each
//! module's descriptor and payload are fetched lazily, on first access,
//! into a local cache directory. Payload downloads are integrity-checked
//! against the published descriptor (see [`crate::record`]).

use crate::archive::ArchiveCache;
use crate::bridge::NativeBridge;
use crate::capability::{AllowAll, CapabilityCheck, Operation};
use crate::definition::{ModuleDefinition, ModuleQuery};
use crate::descriptor::{DescriptorParser, JsonDescriptorParser};
use crate::error::{Error, Result};
use crate::identity::{Platform, VersionedIdentity};
use crate::manifest::{self, ManifestEntry};
use crate::record::ModuleArchiveRecord;
use crate::repository::client::RepositoryClient;
use crate::repository::{
    ModuleRepository, ReloadFailure, ReloadReport, RepositoryCore, RepositoryState,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Manifest document name under the base URL
pub const REMOTE_MANIFEST: &str = "repository-manifest";

/// Descriptor file name inside a module's directory
pub const REMOTE_DESCRIPTOR_FILE: &str = "module.json";

/// Construction-time options for a URL repository
pub struct UrlRepositoryOptions {
    pub platform: Platform,
    pub parser: Arc<dyn DescriptorParser>,
    pub capability: Arc<dyn CapabilityCheck>,
    pub parent: Option<Arc<dyn ModuleRepository>>,
    /// Fail initialize with `SourceUnavailableError` when the manifest
    /// cannot be fetched
    pub must_exist: bool,
    /// Remove the download cache on shutdown
    pub purge_cache_on_shutdown: bool,
}

impl Default for UrlRepositoryOptions {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            parser: Arc::new(JsonDescriptorParser),
            capability: Arc::new(AllowAll),
            parent: None,
            must_exist: false,
            purge_cache_on_shutdown: true,
        }
    }
}

/// Repository behind a base URL
pub struct UrlRepository {
    core: RepositoryCore,
    base_url: String,
    cache_dir: PathBuf,
    client: Arc<RepositoryClient>,
    purge_cache_on_shutdown: bool,
    must_exist: bool,
}

impl UrlRepository {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::with_options(name, base_url, cache_dir, UrlRepositoryOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        base_url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        options: UrlRepositoryOptions,
    ) -> Result<Self> {
        let name = name.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let bridge = Arc::new(NativeBridge::new(options.parser.clone()));
        let core = RepositoryCore::new(
            name,
            base_url.clone(),
            options.platform,
            options.parser,
            bridge,
            options.capability,
            options.parent,
        );
        Ok(Self {
            core,
            base_url,
            cache_dir: cache_dir.into(),
            client: Arc::new(RepositoryClient::new()?),
            purge_cache_on_shutdown: options.purge_cache_on_shutdown,
            must_exist: options.must_exist,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The archive cache used for payload inspection
    pub fn archive_cache(&self) -> ArchiveCache {
        ArchiveCache::new(self.core.platform().clone())
    }

    fn manifest_url(&self) -> String {
        format!("{}/{REMOTE_MANIFEST}", self.base_url)
    }

    /// `{base}/{name}/{version}[/{platform}-{arch}]`
    fn module_dir_url(&self, identity: &VersionedIdentity) -> String {
        match identity.binding() {
            Some(b) => format!(
                "{}/{}/{}/{}",
                self.base_url,
                identity.name(),
                identity.version(),
                b
            ),
            None => format!("{}/{}/{}", self.base_url, identity.name(), identity.version()),
        }
    }

    fn record_for(&self, entry: &ManifestEntry) -> Result<Arc<ModuleArchiveRecord>> {
        let identity = entry.identity()?;
        let dir_url = self.module_dir_url(&identity);
        let descriptor_url = format!("{dir_url}/{REMOTE_DESCRIPTOR_FILE}");
        let file_name = entry
            .path
            .clone()
            .unwrap_or_else(|| format!("{}.mar.gz", identity.file_stem()));
        Ok(Arc::new(ModuleArchiveRecord::remote(
            identity,
            self.core.name(),
            file_name,
            descriptor_url,
            dir_url,
            self.cache_dir.clone(),
            self.client.clone(),
        )))
    }

    /// Fetch and decode the published manifest
    fn fetch_manifest(&self) -> Result<Vec<ManifestEntry>> {
        let url = self.manifest_url();
        let bytes = self.client.download_to_bytes(&url).map_err(|e| {
            Error::DownloadError(format!(
                "Repository '{}': failed to fetch manifest from {url}: {e}",
                self.core.name()
            ))
        })?;
        manifest::parse(&bytes).map_err(|e| match e {
            Error::ParseError(msg) => Error::ParseError(format!(
                "Repository '{}': {url}: {msg}",
                self.core.name()
            )),
            other => other,
        })
    }

    /// Build records for manifest entries, collecting per-entry failures
    fn records_for_entries(
        &self,
        entries: &[ManifestEntry],
    ) -> (Vec<Arc<ModuleArchiveRecord>>, Vec<ReloadFailure>) {
        let mut records = Vec::new();
        let mut failures = Vec::new();
        for entry in entries {
            match self.record_for(entry) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(
                        "Repository '{}': skipping manifest entry '{}': {error}",
                        self.core.name(),
                        entry.name
                    );
                    failures.push(ReloadFailure {
                        subject: format!("{} {}", entry.name, entry.version),
                        error,
                    });
                }
            }
        }
        (records, failures)
    }
}

impl ModuleRepository for UrlRepository {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn source(&self) -> &str {
        self.core.source()
    }

    fn parent(&self) -> Option<&Arc<dyn ModuleRepository>> {
        self.core.parent()
    }

    fn state(&self) -> RepositoryState {
        self.core.state()
    }

    /// A remote source never accepts mutation
    fn is_read_only(&self) -> bool {
        true
    }

    fn initialize(&self) -> Result<Vec<Arc<ModuleArchiveRecord>>> {
        self.core.authorize(Operation::Initialize)?;
        let _guard = self.core.lock_mutation();

        match self.core.state() {
            RepositoryState::Active => return self.core.list(),
            RepositoryState::Shutdown => return self.core.ensure_active().map(|_| Vec::new()),
            RepositoryState::Uninitialized => {}
        }

        let entries = match self.fetch_manifest() {
            Ok(entries) => entries,
            Err(Error::DownloadError(msg)) => {
                if self.must_exist {
                    return Err(Error::SourceUnavailableError(msg));
                }
                warn!(
                    "Repository '{}': manifest unavailable, starting empty ({msg})",
                    self.core.name()
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let (records, _failures) = self.records_for_entries(&entries);
        let listed = self.core.write_contents(|contents| {
            for record in &records {
                contents.insert_record(record.clone());
            }
            contents.reselect(self.core.platform(), self.core.bridge());
            contents.records()
        });
        self.core.set_state(RepositoryState::Active);

        info!(
            "Repository '{}' initialized with {} archive(s) from {}",
            self.core.name(),
            listed.len(),
            self.base_url
        );
        Ok(listed)
    }

    fn install(&self, archive: &Path) -> Result<Arc<ModuleArchiveRecord>> {
        self.core.authorize(Operation::Install)?;
        self.core.ensure_active()?;
        Err(Error::ReadOnlyError(format!(
            "Repository '{}' ({}): cannot install {}",
            self.core.name(),
            self.base_url,
            archive.display()
        )))
    }

    fn uninstall(&self, record: &ModuleArchiveRecord) -> Result<bool> {
        self.core.authorize(Operation::Uninstall)?;
        self.core.ensure_active()?;
        Err(Error::ReadOnlyError(format!(
            "Repository '{}' ({}): cannot uninstall {}",
            self.core.name(),
            self.base_url,
            record.identity()
        )))
    }

    fn reload(&self) -> Result<ReloadReport> {
        self.core.authorize(Operation::Reload)?;
        let _guard = self.core.lock_mutation();
        self.core.ensure_active()?;

        let entries = self.fetch_manifest()?;
        let (scanned, mut failures) = self.records_for_entries(&entries);
        let tracked = self.core.read_contents(|c| c.records());

        let published: BTreeSet<VersionedIdentity> =
            scanned.iter().map(|r| r.identity().clone()).collect();

        // A record whose payload failed verification counts as stale even
        // when still published, so a corrected publisher converges
        let removed: Vec<VersionedIdentity> = tracked
            .iter()
            .filter(|r| r.integrity_failed() || !published.contains(r.identity()))
            .map(|r| r.identity().clone())
            .collect();

        // Retained identities keep their existing records (and any
        // already-downloaded state); new and replaced ones come in fresh
        let added: Vec<Arc<ModuleArchiveRecord>> = scanned
            .into_iter()
            .filter(|r| {
                !tracked
                    .iter()
                    .any(|t| t.identity() == r.identity() && !t.integrity_failed())
            })
            .collect();

        let select_failures = self.core.write_contents(|contents| {
            for identity in &removed {
                contents.remove(identity);
            }
            for record in &added {
                contents.insert_record(record.clone());
            }
            contents.reselect(self.core.platform(), self.core.bridge())
        });
        for (identity, error) in select_failures {
            failures.push(ReloadFailure {
                subject: identity.to_string(),
                error,
            });
        }

        info!(
            "Repository '{}': reload added {}, removed {}, {} failure(s)",
            self.core.name(),
            added.len(),
            removed.len(),
            failures.len()
        );
        Ok(ReloadReport {
            added,
            removed,
            failures,
        })
    }

    fn list(&self) -> Result<Vec<Arc<ModuleArchiveRecord>>> {
        self.core.list()
    }

    fn find(&self, query: &dyn ModuleQuery) -> Result<Vec<ModuleDefinition>> {
        self.core.find(query)
    }

    fn shutdown(&self) -> Result<()> {
        self.core.authorize(Operation::Shutdown)?;
        let _guard = self.core.lock_mutation();
        if self.core.state() == RepositoryState::Shutdown {
            return Ok(());
        }
        self.core.set_state(RepositoryState::Shutdown);
        if self.purge_cache_on_shutdown && self.cache_dir.is_dir() {
            if let Err(e) = fs::remove_dir_all(&self.cache_dir) {
                warn!(
                    "Repository '{}': failed to purge cache {}: {e}",
                    self.core.name(),
                    self.cache_dir.display()
                );
            }
        }
        info!("Repository '{}' shut down", self.core.name());
        Ok(())
    }
}

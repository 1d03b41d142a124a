// src/repository/local.rs

//! Filesystem-backed repository
//!
//! The source directory holds archive files directly, alongside the
//! persisted manifest. Payload extraction lands in a separate cache
//! directory, one subdirectory per module. Writability is probed at
//! initialize; install/uninstall keep disk and manifest consistent by
//! doing all filesystem work before publishing the index change, and by
//! undoing landed files when a later step fails.

use crate::archive::{ArchiveCache, ExtractedFile, ExtractionSpec};
use crate::bridge::NativeBridge;
use crate::capability::{AllowAll, CapabilityCheck, Operation};
use crate::definition::{ModuleDefinition, ModuleQuery};
use crate::descriptor::{DescriptorParser, JsonDescriptorParser};
use crate::error::{Error, Result};
use crate::identity::{Platform, VersionedIdentity};
use crate::manifest::{self, ManifestEntry, MANIFEST_FILE};
use crate::record::{file_mtime_millis, ModuleArchiveRecord};
use crate::repository::{
    supported_extension, ModuleRepository, ReloadFailure, ReloadReport, RepositoryCore,
    RepositoryState,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Construction-time options for a local repository
pub struct LocalRepositoryOptions {
    /// Environment to resolve platform-bound archives against
    pub platform: Platform,
    pub parser: Arc<dyn DescriptorParser>,
    pub capability: Arc<dyn CapabilityCheck>,
    pub parent: Option<Arc<dyn ModuleRepository>>,
    /// Fail initialize with `SourceUnavailableError` when the source
    /// directory does not exist
    pub must_exist: bool,
    /// Treat the repository as read-only regardless of filesystem
    /// permissions
    pub force_read_only: bool,
    /// Remove the cache directory on shutdown
    pub purge_cache_on_shutdown: bool,
    /// Override for the embedded-library entry prefix; a configured
    /// prefix that matches nothing is an error
    pub library_prefix: Option<String>,
    /// Override for the native-library entry prefix
    pub native_prefix: Option<String>,
}

impl Default for LocalRepositoryOptions {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            parser: Arc::new(JsonDescriptorParser),
            capability: Arc::new(AllowAll),
            parent: None,
            must_exist: false,
            force_read_only: false,
            purge_cache_on_shutdown: false,
            library_prefix: None,
            native_prefix: None,
        }
    }
}

/// Repository backed by a directory of archive files
pub struct LocalRepository {
    core: RepositoryCore,
    source_dir: PathBuf,
    cache_dir: PathBuf,
    archive_cache: ArchiveCache,
    must_exist: bool,
    force_read_only: bool,
    purge_cache_on_shutdown: bool,
    library_prefix: Option<String>,
    native_prefix: Option<String>,
    read_only: RwLock<bool>,
}

impl LocalRepository {
    /// Repository with default options, resolving for the host platform
    pub fn new(
        name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_options(name, source_dir, cache_dir, LocalRepositoryOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        options: LocalRepositoryOptions,
    ) -> Self {
        let name = name.into();
        let source_dir = source_dir.into();
        let cache_dir = cache_dir.into();
        let bridge = Arc::new(NativeBridge::new(options.parser.clone()));
        let core = RepositoryCore::new(
            name,
            source_dir.display().to_string(),
            options.platform.clone(),
            options.parser,
            bridge,
            options.capability,
            options.parent,
        );
        let archive_cache = ArchiveCache::new(options.platform);
        Self {
            core,
            source_dir,
            cache_dir,
            archive_cache,
            must_exist: options.must_exist,
            force_read_only: options.force_read_only,
            purge_cache_on_shutdown: options.purge_cache_on_shutdown,
            library_prefix: options.library_prefix,
            native_prefix: options.native_prefix,
            read_only: RwLock::new(false),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.source_dir.join(MANIFEST_FILE)
    }

    /// Per-module extraction directory: `{cacheRoot}/{stem}/{lib|bin}`
    fn module_cache_dir(&self, identity: &VersionedIdentity) -> PathBuf {
        self.cache_dir.join(identity.file_stem())
    }

    /// Extract an installed module's payloads into its cache directory
    ///
    /// Honors the configured prefix overrides; a configured prefix that
    /// matches nothing fails with `NoMatchingEntriesError`.
    pub fn extract_payloads(&self, record: &ModuleArchiveRecord) -> Result<Vec<ExtractedFile>> {
        self.core.ensure_active()?;
        let archive = record.content_path()?;
        let dir = self.module_cache_dir(record.identity());
        let spec = ExtractionSpec {
            library_prefix: self.library_prefix.clone(),
            library_dest: dir.join("lib"),
            native_prefix: self.native_prefix.clone(),
            native_dest: dir.join("bin"),
        };
        self.archive_cache.extract(&archive, &spec)
    }

    fn ensure_writable(&self) -> Result<()> {
        if *self.read_only.read().expect("read_only lock poisoned") {
            return Err(Error::ReadOnlyError(format!(
                "Repository '{}' ({})",
                self.core.name(),
                self.core.source()
            )));
        }
        Ok(())
    }

    /// Probe whether the source directory accepts writes
    fn probe_writable(&self) -> bool {
        if self.force_read_only {
            return false;
        }
        if !self.source_dir.is_dir() {
            // Directory will be created on first install; assume writable
            return true;
        }
        NamedTempFile::new_in(&self.source_dir).is_ok()
    }

    /// Read and parse one archive file into record ingredients
    fn inspect_archive(&self, path: &Path) -> Result<(VersionedIdentity, u64, Vec<u8>)> {
        let metadata = self.archive_cache.read_descriptor(path)?;
        let descriptor = self.core.parser().parse(&metadata)?;
        let identity = descriptor.identity()?;
        let mtime = file_mtime_millis(path)?;
        Ok((identity, mtime, metadata))
    }

    /// Scan the source directory (and manifest path-entries) for archives
    fn scan_source(&self) -> Result<(Vec<Arc<ModuleArchiveRecord>>, Vec<ReloadFailure>)> {
        let mut records = Vec::new();
        let mut failures = Vec::new();

        if self.source_dir.is_dir() {
            let entries = fs::read_dir(&self.source_dir).map_err(|e| {
                Error::IoError(format!(
                    "Repository '{}': failed to read {}: {e}",
                    self.core.name(),
                    self.source_dir.display()
                ))
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    Error::IoError(format!(
                        "Repository '{}': failed to read directory entry: {e}",
                        self.core.name()
                    ))
                })?;
                let path = entry.path();
                if !path.is_file() || supported_extension(&path).is_none() {
                    continue;
                }
                match self.inspect_archive(&path) {
                    Ok((identity, mtime, metadata)) => {
                        records.push(Arc::new(ModuleArchiveRecord::local(
                            identity,
                            self.core.name(),
                            path,
                            mtime,
                            metadata,
                        )));
                    }
                    Err(error) => {
                        warn!(
                            "Repository '{}': skipping {}: {error}",
                            self.core.name(),
                            path.display()
                        );
                        failures.push(ReloadFailure {
                            subject: path.display().to_string(),
                            error,
                        });
                    }
                }
            }
        }

        // Manifest entries carrying explicit paths come from other
        // tooling; honor them when the file is still there
        for entry in manifest::load(&self.manifest_path())? {
            let Some(rel) = entry.path.as_ref() else {
                continue;
            };
            let path = self.source_dir.join(rel);
            if !path.is_file() {
                continue;
            }
            if records
                .iter()
                .any(|r: &Arc<ModuleArchiveRecord>| r.local_path() == Some(path.as_path()))
            {
                continue;
            }
            match self.inspect_archive(&path) {
                Ok((identity, mtime, metadata)) => {
                    records.push(Arc::new(
                        ModuleArchiveRecord::local(
                            identity,
                            self.core.name(),
                            path,
                            mtime,
                            metadata,
                        )
                        .with_manifest_path(rel.clone()),
                    ));
                }
                Err(error) => failures.push(ReloadFailure {
                    subject: path.display().to_string(),
                    error,
                }),
            }
        }

        Ok((records, failures))
    }

    /// Manifest entries for the given records
    ///
    /// Records discovered through an explicit `path` entry keep that path,
    /// so rewrites do not orphan archives living outside managed storage.
    fn manifest_entries(records: &[Arc<ModuleArchiveRecord>]) -> Vec<ManifestEntry> {
        records
            .iter()
            .map(|r| {
                let mut entry = ManifestEntry::from_identity(r.identity());
                entry.path = r.manifest_path().map(str::to_string);
                entry
            })
            .collect()
    }

    /// Land a staged archive in managed storage via temp-then-rename
    fn land_archive(&self, staged: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(&self.source_dir).map_err(|e| {
            Error::IoError(format!(
                "Repository '{}': failed to create {}: {e}",
                self.core.name(),
                self.source_dir.display()
            ))
        })?;
        let mut tmp = NamedTempFile::new_in(&self.source_dir).map_err(|e| {
            Error::IoError(format!(
                "Repository '{}': failed to create temp file: {e}",
                self.core.name()
            ))
        })?;
        let mut source = fs::File::open(staged).map_err(|e| {
            Error::IoError(format!("Failed to open staged archive {}: {e}", staged.display()))
        })?;
        io::copy(&mut source, &mut tmp)
            .map_err(|e| Error::IoError(format!("Failed to copy staged archive: {e}")))?;
        tmp.persist(dest).map_err(|e| {
            Error::IoError(format!("Failed to move archive into {}: {e}", dest.display()))
        })?;
        Ok(())
    }
}

impl ModuleRepository for LocalRepository {
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

    fn is_read_only(&self) -> bool {
        *self.read_only.read().expect("read_only lock poisoned")
    }

    fn initialize(&self) -> Result<Vec<Arc<ModuleArchiveRecord>>> {
        self.core.authorize(Operation::Initialize)?;
        let _guard = self.core.lock_mutation();

        match self.core.state() {
            RepositoryState::Active => return self.core.list(),
            RepositoryState::Shutdown => return self.core.ensure_active().map(|_| Vec::new()),
            RepositoryState::Uninitialized => {}
        }

        if !self.source_dir.is_dir() && self.must_exist {
            return Err(Error::SourceUnavailableError(format!(
                "Repository '{}': source directory {} does not exist",
                self.core.name(),
                self.source_dir.display()
            )));
        }

        let (records, _failures) = self.scan_source()?;
        *self.read_only.write().expect("read_only lock poisoned") = !self.probe_writable();

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
            self.source_dir.display()
        );
        Ok(listed)
    }

    fn install(&self, archive: &Path) -> Result<Arc<ModuleArchiveRecord>> {
        self.core.authorize(Operation::Install)?;
        let _guard = self.core.lock_mutation();
        self.core.ensure_active()?;
        self.ensure_writable()?;

        let Some(extension) = supported_extension(archive) else {
            return Err(Error::ArchiveFormatError(format!(
                "{}: unsupported archive extension (expected one of {:?})",
                archive.display(),
                crate::repository::SUPPORTED_EXTENSIONS
            )));
        };

        // (a) Stage into the cache and validate before touching managed
        // storage
        fs::create_dir_all(&self.cache_dir).map_err(|e| {
            Error::IoError(format!(
                "Repository '{}': failed to create cache {}: {e}",
                self.core.name(),
                self.cache_dir.display()
            ))
        })?;
        let staging = tempfile::tempdir_in(&self.cache_dir).map_err(|e| {
            Error::IoError(format!(
                "Repository '{}': failed to create staging directory: {e}",
                self.core.name()
            ))
        })?;
        let staged = staging.path().join(
            archive
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "staged.mar".into()),
        );
        fs::copy(archive, &staged).map_err(|e| {
            Error::IoError(format!(
                "Repository '{}': failed to stage {}: {e}",
                self.core.name(),
                archive.display()
            ))
        })?;
        let (identity, _mtime, metadata) = self.inspect_archive(&staged)?;

        let duplicate = self.core.read_contents(|c| c.contains(&identity));
        if duplicate {
            return Err(Error::DuplicateModuleError(format!(
                "Repository '{}': {} is already installed",
                self.core.name(),
                identity
            )));
        }

        // (b) Land the archive under its canonical name
        let dest = self
            .source_dir
            .join(format!("{}.{extension}", identity.file_stem()));
        self.land_archive(&staged, &dest)?;

        let record = match file_mtime_millis(&dest) {
            Ok(mtime) => Arc::new(ModuleArchiveRecord::local(
                identity.clone(),
                self.core.name(),
                dest.clone(),
                mtime,
                metadata,
            )),
            Err(e) => {
                let _ = fs::remove_file(&dest);
                return Err(e);
            }
        };

        // (d) Persist the manifest before publishing the index change;
        // a failure here undoes the landed file
        let mut records = self.core.read_contents(|c| c.records());
        records.push(record.clone());
        if let Err(e) = manifest::store(&self.manifest_path(), &Self::manifest_entries(&records)) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        // (c)+(d) succeeded; publish atomically to readers
        let applied = self.core.write_contents(|contents| {
            contents.apply_install(record.clone(), self.core.platform(), self.core.bridge())
        });
        if let Err(e) = applied {
            let _ = fs::remove_file(&dest);
            let previous: Vec<Arc<ModuleArchiveRecord>> = self
                .core
                .read_contents(|c| c.records())
                .into_iter()
                .filter(|r| r.identity() != &identity)
                .collect();
            let _ = manifest::store(&self.manifest_path(), &Self::manifest_entries(&previous));
            return Err(e);
        }

        info!(
            "Repository '{}': installed {} as {}",
            self.core.name(),
            identity,
            dest.display()
        );
        Ok(record)
    }

    fn uninstall(&self, record: &ModuleArchiveRecord) -> Result<bool> {
        self.core.authorize(Operation::Uninstall)?;
        let _guard = self.core.lock_mutation();
        self.core.ensure_active()?;
        self.ensure_writable()?;

        let identity = record.identity().clone();
        let Some(tracked) = self.core.read_contents(|c| c.record(&identity).cloned()) else {
            debug!(
                "Repository '{}': {} is not tracked; uninstall is a no-op",
                self.core.name(),
                identity
            );
            return Ok(false);
        };

        // Out-of-band replacement guard: the on-disk stamp must still
        // match what we recorded
        if let Some(path) = tracked.local_path() {
            match fs::metadata(path) {
                Ok(_) => {
                    if !tracked.matches_disk()? {
                        return Err(Error::StaleArchiveError(format!(
                            "Repository '{}': {} changed on disk since it was recorded",
                            self.core.name(),
                            path.display()
                        )));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Already gone; still drop the record below
                }
                Err(e) => {
                    return Err(Error::IoError(format!(
                        "Repository '{}': failed to stat {}: {e}",
                        self.core.name(),
                        path.display()
                    )))
                }
            }
        }

        // Persist the shrunk manifest first; the file removals below are
        // recoverable by reload if we crash between the two
        let remaining: Vec<Arc<ModuleArchiveRecord>> = self
            .core
            .read_contents(|c| c.records())
            .into_iter()
            .filter(|r| r.identity() != &identity)
            .collect();
        manifest::store(&self.manifest_path(), &Self::manifest_entries(&remaining))?;

        if let Some(path) = tracked.local_path() {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "Repository '{}': failed to remove {}: {e}",
                        self.core.name(),
                        path.display()
                    );
                }
            }
        }
        let module_cache = self.module_cache_dir(&identity);
        if module_cache.is_dir() {
            let _ = fs::remove_dir_all(&module_cache);
        }

        // No fallback promotion here: an uncovered portable sibling stays
        // dormant until reload reconciles preference slots
        self.core.write_contents(|c| c.remove(&identity));

        info!("Repository '{}': uninstalled {}", self.core.name(), identity);
        Ok(true)
    }

    fn reload(&self) -> Result<ReloadReport> {
        self.core.authorize(Operation::Reload)?;
        let _guard = self.core.lock_mutation();
        self.core.ensure_active()?;

        let (scanned, mut failures) = self.scan_source()?;
        let tracked = self.core.read_contents(|c| c.records());

        // An archive whose file vanished or changed on disk is dropped;
        // changed ones come back as fresh records from the scan
        let mut removed = Vec::new();
        for record in &tracked {
            let keep = scanned.iter().any(|s| {
                s.identity() == record.identity() && s.last_modified() == record.last_modified()
            });
            if !keep {
                removed.push(record.identity().clone());
            }
        }

        let mut added = Vec::new();
        for record in &scanned {
            let fresh = !tracked.iter().any(|t| {
                t.identity() == record.identity() && t.last_modified() == record.last_modified()
            });
            if fresh {
                added.push(record.clone());
            }
        }

        if !self.is_read_only() {
            manifest::store(&self.manifest_path(), &Self::manifest_entries(&scanned))?;
        }

        let select_failures = self.core.write_contents(|contents| {
            for identity in &removed {
                contents.remove(identity);
            }
            for record in &added {
                contents.insert_record(record.clone());
            }
            // The one place where a freed preference slot is refilled
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

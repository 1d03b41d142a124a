// src/record.rs

//! Installed-archive records
//!
//! A [`ModuleArchiveRecord`] tracks one archive a repository holds:
//! identity, source file, modification stamp, raw descriptor bytes, and a
//! handle to the archive payload. The two storage backends (local file,
//! remote URL) are one tagged union rather than parallel type hierarchies;
//! the remote variant fetches its descriptor and payload lazily, on first
//! access.

use crate::archive::read_descriptor_bytes;
use crate::error::{Error, Result};
use crate::identity::VersionedIdentity;
use crate::repository::client::RepositoryClient;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

/// Storage backend for one archive record
pub enum Backend {
    /// Archive file in a local repository's managed storage
    Local { path: PathBuf },
    /// Archive published by a remote repository; descriptor and payload
    /// are downloaded on demand into `cache_dir`
    Remote {
        descriptor_url: String,
        /// URL of the directory holding the payload archive
        payload_dir_url: String,
        cache_dir: PathBuf,
        client: Arc<RepositoryClient>,
    },
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Local { path } => f.debug_struct("Local").field("path", path).finish(),
            Backend::Remote {
                descriptor_url,
                payload_dir_url,
                cache_dir,
                ..
            } => f
                .debug_struct("Remote")
                .field("descriptor_url", descriptor_url)
                .field("payload_dir_url", payload_dir_url)
                .field("cache_dir", cache_dir)
                .finish(),
        }
    }
}

/// Metadata about one archive a repository currently holds
#[derive(Debug)]
pub struct ModuleArchiveRecord {
    identity: VersionedIdentity,
    /// Name of the owning repository, for error context
    repository: String,
    /// File name (local) or manifest-relative path (remote)
    file_name: String,
    /// Source mtime in milliseconds since the epoch; 0 = unknown
    last_modified: u64,
    metadata: OnceLock<Arc<Vec<u8>>>,
    /// Downloaded payload location, once fetched (remote backend)
    payload: Mutex<Option<PathBuf>>,
    /// Set when a downloaded payload failed verification; the record stays
    /// unusable until reload reconciles it away
    integrity_failure: OnceLock<String>,
    /// Manifest-relative path for archives discovered through an explicit
    /// manifest `path` entry; preserved across manifest rewrites
    manifest_path: Option<String>,
    backend: Backend,
}

impl ModuleArchiveRecord {
    /// Record for an archive file already on disk; descriptor bytes are
    /// read eagerly by the caller
    pub fn local(
        identity: VersionedIdentity,
        repository: impl Into<String>,
        path: PathBuf,
        last_modified: u64,
        metadata: Vec<u8>,
    ) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let cell = OnceLock::new();
        let _ = cell.set(Arc::new(metadata));
        Self {
            identity,
            repository: repository.into(),
            file_name,
            last_modified,
            metadata: cell,
            payload: Mutex::new(None),
            integrity_failure: OnceLock::new(),
            manifest_path: None,
            backend: Backend::Local { path },
        }
    }

    /// Record for an archive published by a remote repository; nothing is
    /// fetched until first access
    pub fn remote(
        identity: VersionedIdentity,
        repository: impl Into<String>,
        file_name: impl Into<String>,
        descriptor_url: String,
        payload_dir_url: String,
        cache_dir: PathBuf,
        client: Arc<RepositoryClient>,
    ) -> Self {
        Self {
            identity,
            repository: repository.into(),
            file_name: file_name.into(),
            last_modified: 0,
            metadata: OnceLock::new(),
            payload: Mutex::new(None),
            integrity_failure: OnceLock::new(),
            manifest_path: None,
            backend: Backend::Remote {
                descriptor_url,
                payload_dir_url,
                cache_dir,
                client,
            },
        }
    }

    pub fn identity(&self) -> &VersionedIdentity {
        &self.identity
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Attach the manifest-relative path this record was discovered under
    pub fn with_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// Manifest-relative path for archives living outside managed storage
    pub fn manifest_path(&self) -> Option<&str> {
        self.manifest_path.as_deref()
    }

    /// Whether a downloaded payload failed verification
    ///
    /// Failed records are excluded from definition queries and replaced
    /// with fresh ones on the next reload.
    pub fn integrity_failed(&self) -> bool {
        self.integrity_failure.get().is_some()
    }

    /// Path of the archive file for a local record
    pub fn local_path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Local { path } => Some(path),
            Backend::Remote { .. } => None,
        }
    }

    /// Raw descriptor bytes, fetching them on first access for remote
    /// records
    pub fn metadata(&self) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.metadata.get() {
            return Ok(bytes.clone());
        }
        let fetched = match &self.backend {
            Backend::Local { path } => {
                // Local records are materialized at discovery; reaching here
                // means the caller constructed one without metadata
                return Err(Error::ArchiveFormatError(format!(
                    "{}: record for {} has no descriptor",
                    path.display(),
                    self.identity
                )));
            }
            Backend::Remote {
                descriptor_url,
                cache_dir,
                client,
                ..
            } => {
                debug!(
                    "Fetching descriptor for {} from {}",
                    self.identity, descriptor_url
                );
                let bytes = client.download_to_bytes(descriptor_url).map_err(|e| {
                    Error::DownloadError(format!(
                        "Repository '{}': failed to fetch descriptor for {}: {e}",
                        self.repository, self.identity
                    ))
                })?;
                // Keep a cached copy next to the payload downloads
                let cache_path = cache_dir.join(format!("{}.descriptor", self.identity.file_stem()));
                if let Some(parent) = cache_path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                let _ = fs::write(&cache_path, &bytes);
                bytes
            }
        };
        Ok(self.metadata.get_or_init(|| Arc::new(fetched)).clone())
    }

    /// Path to the archive payload, downloading it on first access for
    /// remote records
    ///
    /// The compressed payload form is tried first, the plain form as a
    /// fallback. After a remote download the embedded descriptor is
    /// compared byte-for-byte against the published descriptor; a mismatch
    /// removes the download and fails with `IntegrityError`.
    pub fn content_path(&self) -> Result<PathBuf> {
        match &self.backend {
            Backend::Local { path } => Ok(path.clone()),
            Backend::Remote {
                payload_dir_url,
                cache_dir,
                client,
                ..
            } => {
                if let Some(msg) = self.integrity_failure.get() {
                    return Err(Error::IntegrityError(msg.clone()));
                }
                let mut payload = self
                    .payload
                    .lock()
                    .map_err(|_| Error::IoError("payload lock poisoned".to_string()))?;
                if let Some(path) = payload.as_ref() {
                    return Ok(path.clone());
                }

                let stem = self.identity.file_stem();
                let path = self.download_payload(payload_dir_url, cache_dir, client, &stem)?;
                self.verify_payload(&path)?;
                info!(
                    "Repository '{}': downloaded payload for {}",
                    self.repository, self.identity
                );
                *payload = Some(path.clone());
                Ok(path)
            }
        }
    }

    fn download_payload(
        &self,
        payload_dir_url: &str,
        cache_dir: &Path,
        client: &RepositoryClient,
        stem: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(cache_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        let packed_url = format!("{payload_dir_url}/{stem}.mar.gz");
        let packed_dest = cache_dir.join(format!("{stem}.mar.gz"));
        match client.download_file(&packed_url, &packed_dest) {
            Ok(()) => return Ok(packed_dest),
            Err(e) => debug!(
                "No packed payload for {} ({e}); trying plain form",
                self.identity
            ),
        }

        let plain_url = format!("{payload_dir_url}/{stem}.mar");
        let plain_dest = cache_dir.join(format!("{stem}.mar"));
        client.download_file(&plain_url, &plain_dest).map_err(|e| {
            Error::DownloadError(format!(
                "Repository '{}': failed to fetch payload for {}: {e}",
                self.repository, self.identity
            ))
        })?;
        Ok(plain_dest)
    }

    /// Byte-for-byte comparison of the downloaded payload's embedded
    /// descriptor against the published descriptor
    fn verify_payload(&self, path: &Path) -> Result<()> {
        let published = self.metadata()?;
        let embedded = read_descriptor_bytes(path)?;
        if embedded.as_slice() != published.as_slice() {
            let _ = fs::remove_file(path);
            let msg = format!(
                "Repository '{}': payload descriptor for {} does not match the published descriptor",
                self.repository, self.identity
            );
            let _ = self.integrity_failure.set(msg.clone());
            return Err(Error::IntegrityError(msg));
        }
        Ok(())
    }

    /// Whether the on-disk file still carries the recorded mtime
    ///
    /// Guards uninstall against out-of-band replacement. Remote records
    /// have no disk source and always pass.
    pub fn matches_disk(&self) -> Result<bool> {
        match &self.backend {
            Backend::Remote { .. } => Ok(true),
            Backend::Local { path } => {
                let current = file_mtime_millis(path)?;
                Ok(current == self.last_modified)
            }
        }
    }
}

/// Source-file mtime in milliseconds since the epoch
pub fn file_mtime_millis(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)
        .map_err(|e| Error::IoError(format!("Failed to stat {}: {e}", path.display())))?;
    let mtime = meta
        .modified()
        .map_err(|e| Error::IoError(format!("No mtime for {}: {e}", path.display())))?;
    Ok(mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

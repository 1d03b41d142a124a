// src/archive.rs

//! Module archive extraction and caching
//!
//! An archive is a tar container, optionally gzip-compressed (detected by
//! magic bytes, not extension). This module reads the distinguished
//! descriptor entry and extracts embedded library and native-library
//! payloads into a repository-owned cache directory.
//!
//! Extraction is idempotent and atomic per file: content lands in a temp
//! file in the destination directory and is renamed into place, so a retry
//! after a crash never observes a half-written file.

use crate::descriptor::{DEFAULT_LIBRARY_PREFIX, DESCRIPTOR_ENTRY, NATIVE_BIN_PREFIX};
use crate::error::{Error, Result};
use crate::identity::Platform;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Maximum size for a single entry during extraction (512 MB)
pub const MAX_ENTRY_SIZE: u64 = 512 * 1024 * 1024;

/// Gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Category of an extracted payload file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractedKind {
    /// Embedded legacy library
    Library,
    /// Platform-specific native library
    NativeLibrary,
}

/// A file landed in the cache by extraction
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Destination path on disk
    pub path: PathBuf,
    /// Entry name inside the archive
    pub entry: String,
    pub size: u64,
    pub sha256: String,
    pub kind: ExtractedKind,
}

/// Where to put payloads and which entry prefixes to match
///
/// `library_prefix`/`native_prefix` of `None` select the conventional
/// defaults; a miss on a default prefix is tolerated (the payload is
/// optional), while a miss on an explicitly configured prefix is an
/// operator error.
#[derive(Debug, Clone)]
pub struct ExtractionSpec {
    pub library_prefix: Option<String>,
    pub library_dest: PathBuf,
    pub native_prefix: Option<String>,
    pub native_dest: PathBuf,
}

impl ExtractionSpec {
    /// Conventional layout under a per-module cache directory:
    /// `{dir}/lib` for embedded libraries, `{dir}/bin` for native ones
    pub fn for_cache_dir(dir: &Path) -> Self {
        Self {
            library_prefix: None,
            library_dest: dir.join("lib"),
            native_prefix: None,
            native_dest: dir.join("bin"),
        }
    }
}

/// Content-addressed extraction of module archive payloads
///
/// One instance per repository; the platform determines which native
/// library entries apply.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    platform: Platform,
}

impl ArchiveCache {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Read the raw descriptor bytes from an archive
    ///
    /// Fails with `ArchiveFormatError` when the descriptor entry is absent
    /// or the container cannot be read.
    pub fn read_descriptor(&self, archive: &Path) -> Result<Vec<u8>> {
        read_descriptor_bytes(archive)
    }

    /// Extract embedded and native library payloads per the extraction
    /// settings
    ///
    /// Returns the list of files landed. Native entries are matched under
    /// the platform-arch directory for this cache's platform and flattened
    /// to their base filename; embedded libraries likewise land under their
    /// base filename. Embedded archives that carry their own module
    /// descriptor are skipped: they are modules in their own right, not
    /// libraries of this one.
    pub fn extract(&self, archive: &Path, spec: &ExtractionSpec) -> Result<Vec<ExtractedFile>> {
        let library_prefix = spec
            .library_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_LIBRARY_PREFIX.to_string());
        let native_prefix = spec.native_prefix.clone().unwrap_or_else(|| {
            format!(
                "{}{}-{}/",
                NATIVE_BIN_PREFIX, self.platform.platform, self.platform.arch
            )
        });

        // Descriptor presence doubles as the container validity check
        self.read_descriptor(archive)?;

        let mut extracted = Vec::new();
        let mut library_matches = 0usize;
        let mut native_matches = 0usize;

        for_each_entry(archive, |name, data| {
            if let Some(rest) = name.strip_prefix(library_prefix.as_str()) {
                let Some(base) = base_name(rest) else {
                    return Ok(());
                };
                if embedded_descriptor_present(data) {
                    warn!(
                        "Skipping embedded library '{}': it carries its own module descriptor",
                        name
                    );
                    return Ok(());
                }
                // Only landed entries satisfy a configured prefix
                library_matches += 1;
                let dest = spec.library_dest.join(base);
                land_file(&dest, data)?;
                extracted.push(extracted_file(dest, name, data, ExtractedKind::Library));
            } else if let Some(rest) = name.strip_prefix(native_prefix.as_str()) {
                let Some(base) = base_name(rest) else {
                    return Ok(());
                };
                native_matches += 1;
                let dest = spec.native_dest.join(base);
                land_file(&dest, data)?;
                extracted.push(extracted_file(dest, name, data, ExtractedKind::NativeLibrary));
            }
            Ok(())
        })?;

        if spec.library_prefix.is_some() && library_matches == 0 {
            return Err(Error::NoMatchingEntriesError(format!(
                "{}: configured library prefix '{}' matched no entries",
                archive.display(),
                library_prefix
            )));
        }
        if spec.native_prefix.is_some() && native_matches == 0 {
            return Err(Error::NoMatchingEntriesError(format!(
                "{}: configured native library prefix '{}' matched no entries",
                archive.display(),
                native_prefix
            )));
        }

        debug!(
            "Extracted {} file(s) from {}",
            extracted.len(),
            archive.display()
        );
        Ok(extracted)
    }
}

fn extracted_file(path: PathBuf, entry: &str, data: &[u8], kind: ExtractedKind) -> ExtractedFile {
    ExtractedFile {
        path,
        entry: entry.to_string(),
        size: data.len() as u64,
        sha256: sha256_hex(data),
        kind,
    }
}

/// Read the raw descriptor bytes from an archive file
///
/// Fails with `ArchiveFormatError` when the descriptor entry is absent or
/// the container cannot be read.
pub fn read_descriptor_bytes(archive: &Path) -> Result<Vec<u8>> {
    let mut found = None;
    for_each_entry(archive, |name, data| {
        if name == DESCRIPTOR_ENTRY {
            found = Some(data.to_vec());
        }
        Ok(())
    })?;

    found.ok_or_else(|| {
        Error::ArchiveFormatError(format!(
            "{}: no descriptor entry at '{}'",
            archive.display(),
            DESCRIPTOR_ENTRY
        ))
    })
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Last path component of an entry suffix, or None for directory entries
fn base_name(rest: &str) -> Option<&str> {
    let base = rest.rsplit('/').next().unwrap_or(rest);
    if base.is_empty() {
        None
    } else {
        Some(base)
    }
}

/// Write `data` to `dest` atomically (temp file in the same directory,
/// then rename). Overwrites any previous extraction of the same file.
fn land_file(dest: &Path, data: &[u8]) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| Error::IoError(format!("{}: no parent directory", dest.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| Error::IoError(format!("Failed to create {}: {e}", parent.display())))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|e| Error::IoError(format!("Failed to create temp file in {}: {e}", parent.display())))?;
    tmp.write_all(data)
        .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", dest.display())))?;
    tmp.persist(dest)
        .map_err(|e| Error::IoError(format!("Failed to move into {}: {e}", dest.display())))?;
    Ok(())
}

/// Open an archive for reading, decompressing when the gzip magic is seen
fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;

    let mut magic = [0u8; 2];
    let n = file
        .read(&mut magic)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::IoError(format!("Failed to seek {}: {e}", path.display())))?;

    if n == 2 && magic == GZIP_MAGIC {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Walk regular-file entries of an archive, handing each name + content to
/// the callback. Oversized entries are skipped with a warning.
fn for_each_entry<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(&str, &[u8]) -> Result<()>,
{
    let reader = open_reader(path)?;
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| Error::ArchiveFormatError(format!("{}: {e}", path.display())))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::ArchiveFormatError(format!("{}: {e}", path.display())))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if entry.size() > MAX_ENTRY_SIZE {
            warn!(
                "Skipping oversized entry in {} ({} bytes)",
                path.display(),
                entry.size()
            );
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| Error::ArchiveFormatError(format!("{}: bad entry path: {e}", path.display())))?
            .to_string_lossy()
            .replace('\\', "/");
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::ArchiveFormatError(format!("{}: truncated entry '{name}': {e}", path.display())))?;
        f(&name, &data)?;
    }
    Ok(())
}

/// True when a byte blob is itself an archive containing a module
/// descriptor entry. Non-archive blobs return false.
fn embedded_descriptor_present(data: &[u8]) -> bool {
    let reader: Box<dyn Read + '_> = if data.len() >= 2 && data[..2] == GZIP_MAGIC {
        Box::new(GzDecoder::new(data))
    } else {
        Box::new(data)
    };
    let mut archive = tar::Archive::new(reader);
    let Ok(entries) = archive.entries() else {
        return false;
    };
    for entry in entries.flatten() {
        if let Ok(path) = entry.path() {
            if path.to_string_lossy() == DESCRIPTOR_ENTRY {
                return true;
            }
        }
    }
    false
}

// src/error.rs

//! Crate-wide error type and result alias

use thiserror::Error;

/// Errors surfaced by repository operations
#[derive(Error, Debug)]
pub enum Error {
    /// Source location missing while the repository requires it to exist
    #[error("Source unavailable: {0}")]
    SourceUnavailableError(String),

    /// Malformed or unsupported module archive
    #[error("Invalid module archive: {0}")]
    ArchiveFormatError(String),

    /// An archive with the same identity is already installed
    #[error("Duplicate module: {0}")]
    DuplicateModuleError(String),

    /// An installed archive changed on disk outside the repository API
    #[error("Stale archive: {0}")]
    StaleArchiveError(String),

    /// Remote descriptor/payload mismatch
    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    /// Repository chain configuration is not a single well-formed chain
    #[error("Malformed repository configuration: {0}")]
    MalformedConfigError(String),

    /// Operation invoked before initialize or after shutdown
    #[error("Repository not active: {0}")]
    NotActiveError(String),

    /// Mutating operation invoked on a read-only repository
    #[error("Repository is read-only: {0}")]
    ReadOnlyError(String),

    /// An operator-configured extraction prefix matched no archive entries
    #[error("No matching archive entries: {0}")]
    NoMatchingEntriesError(String),

    /// Capability check rejected the operation
    #[error("Operation not permitted: {0}")]
    PermissionError(String),

    /// Network download failure
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Filesystem I/O failure
    #[error("I/O error: {0}")]
    IoError(String),

    /// Descriptor, manifest, or config parse failure
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

// src/repository/client.rs

//! HTTP client for remote repository operations
//!
//! Wraps the blocking reqwest client with a request timeout. Fetch
//! failures surface immediately as `DownloadError`; callers own any retry
//! policy. HTTP error statuses are errors too (a 404 on the packed payload
//! form is how the caller learns to try the plain form). Downloads land
//! via temp-file-then-rename.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking HTTP client shared by a repository's remote records
#[derive(Debug)]
pub struct RepositoryClient {
    client: reqwest::blocking::Client,
}

impl RepositoryClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch a URL into memory
    pub fn download_to_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read response from {url}: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Download a URL to a file, atomically
    ///
    /// Streams the response into a temp file next to the destination and
    /// renames it into place, so a partial download never lands.
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        debug!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let temp_path = dest_path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to create file {}: {e}",
                temp_path.display()
            ))
        })?;

        if let Err(e) = io::copy(&mut response, &mut file) {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::IoError(format!(
                "Failed to write downloaded data: {e}"
            )));
        }

        fs::rename(&temp_path, dest_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest_path.display()
            ))
        })?;

        debug!("Downloaded {} to {}", url, dest_path.display());
        Ok(())
    }
}

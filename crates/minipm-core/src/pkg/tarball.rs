//! Tarball download and extraction.
//!
//! A package directory is only ever replaced as a whole: archives are unpacked
//! into a staging directory next to the destination and renamed into place.

use super::error::PkgError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use semver::Version;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tar::Archive;
use tracing::debug;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Name of the previous install while an upgrade is being committed.
/// Hidden so it is never mistaken for the archive's root directory.
const PREVIOUS_DIR: &str = ".previous";

/// Materializes a resolved package into its install directory.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Download `url` and unpack it into `dest`, replacing any previous contents.
    ///
    /// On failure `dest` is either absent or still holds the previous install.
    async fn fetch_and_extract(
        &self,
        name: &str,
        version: &Version,
        url: &str,
        dest: &Path,
    ) -> Result<(), PkgError>;
}

/// Fetcher for gzip tarballs served over HTTP.
#[derive(Debug, Clone)]
pub struct TarballFetcher {
    http: Client,
    timeout: Duration,
}

impl TarballFetcher {
    /// Create a fetcher that reuses the registry's HTTP client.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http,
            timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        }
    }

    /// Override the per-download timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Fetcher for TarballFetcher {
    async fn fetch_and_extract(
        &self,
        name: &str,
        version: &Version,
        url: &str,
        dest: &Path,
    ) -> Result<(), PkgError> {
        debug!(name, %version, url, "Downloading tarball");
        let bytes = download_tarball(&self.http, url, MAX_TARBALL_SIZE, self.timeout).await?;
        debug!(name, %version, size = bytes.len(), "Downloaded tarball");

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tgz_atomic(&bytes, &dest))
            .await
            .map_err(|e| PkgError::extract_failed(format!("Extraction task failed: {e}")))?
    }
}

/// Download a tarball from a URL.
///
/// # Errors
/// Returns an error if the download fails or exceeds the size limit.
pub async fn download_tarball(
    client: &Client,
    url: &str,
    max_bytes: u64,
    timeout: Duration,
) -> Result<Bytes, PkgError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(PkgError::download_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    // Check content length if available
    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to read response body: {e}")))?;

    if bytes.len() as u64 > max_bytes {
        return Err(PkgError::download_failed(format!(
            "Tarball too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Extract a tarball into `dest` atomically.
///
/// The archive's single top-level directory (`package/` for npm) is stripped.
/// An existing `dest` is replaced only after the new tree is fully unpacked;
/// if anything fails, the staging directory is removed and `dest` is untouched.
///
/// # Errors
/// Returns an error if extraction fails or the tarball is invalid.
pub fn extract_tgz_atomic(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::fs(format!("Destination has no parent: {}", dest.display())))?;

    fs::create_dir_all(parent)
        .map_err(|e| PkgError::fs(format!("Failed to create {}: {e}", parent.display())))?;

    // Staging lives beside dest so the final rename never crosses filesystems.
    // Dropping it removes whatever is left inside, on success and on failure.
    let staging = tempfile::Builder::new()
        .prefix(".minipm-")
        .tempdir_in(parent)
        .map_err(|e| {
            PkgError::fs(format!(
                "Failed to create staging directory in {}: {e}",
                parent.display()
            ))
        })?;

    extract_tgz_to(bytes, staging.path())?;
    let root = find_extracted_root(staging.path())?;
    commit(&root, dest, &staging.path().join(PREVIOUS_DIR))
}

/// Move `src` to `dest`, swapping out an existing `dest` through `backup`.
fn commit(src: &Path, dest: &Path, backup: &Path) -> Result<(), PkgError> {
    let had_previous = dest.symlink_metadata().is_ok();

    if had_previous {
        fs::rename(dest, backup).map_err(|e| {
            PkgError::fs(format!(
                "Failed to move previous install {} aside: {e}",
                dest.display()
            ))
        })?;
    }

    if let Err(e) = fs::rename(src, dest) {
        if had_previous {
            let _ = fs::rename(backup, dest);
        }
        return Err(PkgError::fs(format!(
            "Failed to move extracted package into {}: {e}",
            dest.display()
        )));
    }

    Ok(())
}

/// Find the single top-level directory in an extracted tarball.
///
/// npm tarballs typically contain a single root directory (usually `package/`,
/// but some packages like `@types/*` use the bare package name).
fn find_extracted_root(staging: &Path) -> Result<PathBuf, PkgError> {
    let package_dir = staging.join("package");
    if package_dir.is_dir() {
        return Ok(package_dir);
    }

    let entries: Vec<_> = fs::read_dir(staging)
        .map_err(|e| PkgError::extract_failed(format!("Failed to read extracted dir: {e}")))?
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_ok_and(|ft| ft.is_dir())
                && !e.file_name().to_string_lossy().starts_with('.')
        })
        .collect();

    match entries.as_slice() {
        [only] => Ok(only.path()),
        [] => Err(PkgError::extract_failed(
            "Tarball does not contain any top-level directory",
        )),
        many => Err(PkgError::extract_failed(format!(
            "Tarball contains {} top-level directories, expected 1",
            many.len()
        ))),
    }
}

fn extract_tgz_to(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();

        check_entry_path(&path)?;
        let dest_path = dest.join(&path);

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if kind.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file).map_err(|e| {
                PkgError::extract_failed(format!("Failed to unpack {}: {e}", path.display()))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
                }
            }
        }
        // Symlinks and other special entries are skipped
    }

    Ok(())
}

/// Reject absolute paths and `..` so nothing escapes the staging directory.
fn check_entry_path(path: &Path) -> Result<(), PkgError> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });

    if escapes {
        return Err(PkgError::extract_failed(format!(
            "Tarball entry escapes destination: {}",
            path.display()
        )));
    }

    Ok(())
}

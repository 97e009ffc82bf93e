//! npm registry client.
//!
//! The install engine only talks to the registry through the [`Registry`] trait,
//! so sessions can run against [`RegistryClient`] or an in-memory registry.

use super::error::PkgError;
use super::spec::{unscoped_name, url_encoded_name};
use crate::config::Config;
use indexmap::IndexMap;
use reqwest::Client;
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "MINIPM_REGISTRY";

/// Connect timeout for registry requests.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Distribution info of a single published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    /// Absolute URL of the gzip tarball.
    #[serde(default)]
    pub tarball: Option<String>,
}

/// A registry document for `{name}/{versionOrTag}`.
///
/// The `latest` document is additionally expected to carry a `versions` map
/// enumerating every published version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    /// Dependencies in the order the registry listed them.
    #[serde(default, deserialize_with = "string_map")]
    pub dependencies: IndexMap<String, String>,

    #[serde(default)]
    pub dist: Option<Dist>,

    #[serde(default)]
    pub versions: Option<IndexMap<String, serde_json::Value>>,
}

impl PackageMetadata {
    /// All published version strings, if the document enumerates them.
    #[must_use]
    pub fn version_keys(&self) -> Option<Vec<&str>> {
        self.versions
            .as_ref()
            .map(|v| v.keys().map(String::as_str).collect())
    }

    /// The tarball URL given by the registry, if any.
    #[must_use]
    pub fn tarball(&self) -> Option<&str> {
        self.dist.as_ref()?.tarball.as_deref()
    }
}

/// Keep string values only; registries occasionally publish junk entries.
fn string_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<IndexMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
        .collect())
}

/// Source of package metadata.
#[allow(async_fn_in_trait)]
pub trait Registry {
    /// Fetch the document for `name` at a concrete version or a dist-tag.
    async fn fetch_metadata(
        &self,
        name: &str,
        version_or_tag: &str,
    ) -> Result<PackageMetadata, PkgError>;

    /// Fetch the full packument for `name`.
    ///
    /// Only used when a `latest` document does not enumerate versions.
    async fn fetch_packument(&self, name: &str) -> Result<PackageMetadata, PkgError> {
        Err(PkgError::registry(format!(
            "Registry does not enumerate versions for '{name}'"
        )))
    }

    /// Where to download `name@version` from.
    fn tarball_url(
        &self,
        name: &str,
        version: &Version,
        meta: &PackageMetadata,
    ) -> Result<String, PkgError>;
}

/// HTTP registry client for fetching package metadata.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let mut raw = base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;
        Self::with_timeout(url, Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client for an already validated base URL.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, PkgError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .user_agent(crate::version::user_agent())
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// Create a client from the CLI configuration.
    ///
    /// # Errors
    /// Returns an error if the registry URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self, PkgError> {
        let url = config
            .registry_url()
            .map_err(|e| PkgError::registry(e.to_string()))?;
        Self::with_timeout(url, config.timeout())
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in tarball downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// URL of the `{name}/{versionOrTag}` document.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built.
    pub fn metadata_url(&self, name: &str, version_or_tag: &str) -> Result<Url, PkgError> {
        let path = if version_or_tag.is_empty() {
            url_encoded_name(name)
        } else {
            format!("{}/{version_or_tag}", url_encoded_name(name))
        };
        self.base_url
            .join(&path)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))
    }

    async fn get_document(&self, name: &str, url: Url) -> Result<PackageMetadata, PkgError> {
        trace!(url = %url, "GET");
        let response = self.http.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let body = response.text().await?;
        let meta: PackageMetadata = serde_json::from_str(&body)?;
        Ok(meta)
    }
}

impl Registry for RegistryClient {
    async fn fetch_metadata(
        &self,
        name: &str,
        version_or_tag: &str,
    ) -> Result<PackageMetadata, PkgError> {
        let url = self.metadata_url(name, version_or_tag)?;
        self.get_document(name, url).await
    }

    async fn fetch_packument(&self, name: &str) -> Result<PackageMetadata, PkgError> {
        let url = self.metadata_url(name, "")?;
        self.get_document(name, url).await
    }

    fn tarball_url(
        &self,
        name: &str,
        version: &Version,
        meta: &PackageMetadata,
    ) -> Result<String, PkgError> {
        if let Some(url) = meta.tarball() {
            return Ok(url.to_string());
        }

        let path = format!("{name}/-/{}-{version}.tgz", unscoped_name(name));
        self.base_url
            .join(&path)
            .map(String::from)
            .map_err(|e| PkgError::registry(format!("Failed to build tarball URL for '{name}': {e}")))
    }
}

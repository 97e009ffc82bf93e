//! Session-scoped registry metadata cache.
//!
//! Every `(name, versionOrTag)` document is requested at most once per session.
//! Nothing is persisted; a new session starts empty.

use super::error::PkgError;
use super::registry::{PackageMetadata, Registry};
use semver::Version;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Key used for the full packument (`GET {registry}/{name}`).
const PACKUMENT_KEY: &str = "";

/// In-memory metadata cache keyed by `(name, versionOrTag)`.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<(String, String), Arc<PackageMetadata>>,
    requests: usize,
}

impl MetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registry requests issued through this cache.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Number of cached documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, name: &str, key: &str) -> Option<Arc<PackageMetadata>> {
        self.entries
            .get(&(name.to_string(), key.to_string()))
            .cloned()
    }

    /// Fetch `{name}/{version_or_tag}`, hitting the registry only on a miss.
    ///
    /// A document fetched by tag is also stored under its concrete version, so
    /// the manifest of a tag-resolved version is never requested twice.
    pub async fn get<R: Registry>(
        &mut self,
        registry: &R,
        name: &str,
        version_or_tag: &str,
    ) -> Result<Arc<PackageMetadata>, PkgError> {
        if let Some(meta) = self.lookup(name, version_or_tag) {
            return Ok(meta);
        }

        self.requests += 1;
        debug!(name, tag = version_or_tag, "Fetching metadata");
        let meta = Arc::new(registry.fetch_metadata(name, version_or_tag).await?);

        if let Ok(version) = Version::parse(meta.version.trim()) {
            let concrete = version.to_string();
            if concrete != version_or_tag {
                self.entries
                    .entry((name.to_string(), concrete))
                    .or_insert_with(|| Arc::clone(&meta));
            }
        }

        self.entries.insert(
            (name.to_string(), version_or_tag.to_string()),
            Arc::clone(&meta),
        );
        Ok(meta)
    }

    /// Get a document that enumerates every published version of `name`.
    ///
    /// Uses the `latest` document; falls back to the full packument when the
    /// registry serves an abbreviated `latest` without a `versions` map.
    pub async fn versions<R: Registry>(
        &mut self,
        registry: &R,
        name: &str,
    ) -> Result<Arc<PackageMetadata>, PkgError> {
        let latest = self.get(registry, name, super::spec::LATEST_TAG).await?;
        if latest.versions.is_some() {
            return Ok(latest);
        }

        if let Some(meta) = self.lookup(name, PACKUMENT_KEY) {
            return Ok(meta);
        }

        self.requests += 1;
        debug!(name, "Latest document has no versions, fetching packument");
        let packument = Arc::new(registry.fetch_packument(name).await?);
        if packument.versions.is_none() {
            return Err(PkgError::registry(format!(
                "Registry did not list any versions for '{name}'"
            )));
        }

        self.entries.insert(
            (name.to_string(), PACKUMENT_KEY.to_string()),
            Arc::clone(&packument),
        );
        Ok(packument)
    }
}

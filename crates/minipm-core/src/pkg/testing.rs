//! In-memory registry and fetcher used by unit tests.

use super::error::PkgError;
use super::registry::{PackageMetadata, Registry};
use super::tarball::Fetcher;
use indexmap::IndexMap;
use semver::Version;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

type Deps = Vec<(String, String)>;

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    packages: HashMap<String, IndexMap<String, Deps>>,
    tags: HashMap<(String, String), String>,
    abbreviated: bool,
    requests: RefCell<Vec<(String, String)>>,
    packuments: RefCell<Vec<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name@version` with the given dependency edges.
    pub fn publish(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let deps = deps
            .iter()
            .map(|(n, r)| ((*n).to_string(), (*r).to_string()))
            .collect();
        self.packages
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), deps);
        self
    }

    /// Point a dist-tag at a published version.
    pub fn tag(mut self, name: &str, tag: &str, version: &str) -> Self {
        self.tags
            .insert((name.to_string(), tag.to_string()), version.to_string());
        self
    }

    /// Serve `latest` without the `versions` map, like the public npm registry.
    pub fn abbreviated_latest(mut self) -> Self {
        self.abbreviated = true;
        self
    }

    pub fn request_count(&self, name: &str, tag: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|(n, t)| n == name && t == tag)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn packument_requests(&self, name: &str) -> usize {
        self.packuments.borrow().iter().filter(|n| *n == name).count()
    }

    fn latest_version(&self, name: &str) -> Option<String> {
        if let Some(v) = self.tags.get(&(name.to_string(), "latest".to_string())) {
            return Some(v.clone());
        }
        let versions = self.packages.get(name)?;
        let parsed = versions.keys().filter_map(|v| Version::parse(v).ok());
        let stable = parsed.clone().filter(|v| v.pre.is_empty()).max();
        stable.or_else(|| parsed.max()).map(|v| v.to_string())
    }

    fn document(&self, name: &str, version: &str, with_versions: bool) -> PackageMetadata {
        let dependencies = self.packages[name][version].iter().cloned().collect();

        let versions = with_versions.then(|| {
            self.packages[name]
                .keys()
                .map(|v| (v.clone(), serde_json::json!({ "version": v })))
                .collect()
        });

        PackageMetadata {
            name: name.to_string(),
            version: version.to_string(),
            dependencies,
            versions,
            ..Default::default()
        }
    }
}

impl Registry for MemoryRegistry {
    async fn fetch_metadata(
        &self,
        name: &str,
        version_or_tag: &str,
    ) -> Result<PackageMetadata, PkgError> {
        self.requests
            .borrow_mut()
            .push((name.to_string(), version_or_tag.to_string()));

        let versions = self
            .packages
            .get(name)
            .ok_or_else(|| PkgError::not_found(name))?;

        if versions.contains_key(version_or_tag) {
            return Ok(self.document(name, version_or_tag, false));
        }

        let version = if version_or_tag == "latest" {
            self.latest_version(name)
        } else {
            self.tags
                .get(&(name.to_string(), version_or_tag.to_string()))
                .cloned()
        }
        .ok_or_else(|| PkgError::not_found(&format!("{name}@{version_or_tag}")))?;

        let with_versions = version_or_tag == "latest" && !self.abbreviated;
        Ok(self.document(name, &version, with_versions))
    }

    async fn fetch_packument(&self, name: &str) -> Result<PackageMetadata, PkgError> {
        self.packuments.borrow_mut().push(name.to_string());
        let latest = self
            .latest_version(name)
            .ok_or_else(|| PkgError::not_found(name))?;
        Ok(self.document(name, &latest, true))
    }

    fn tarball_url(
        &self,
        name: &str,
        version: &Version,
        _meta: &PackageMetadata,
    ) -> Result<String, PkgError> {
        Ok(format!("mem://{name}/{version}"))
    }
}

/// Records every extraction and writes a small `package.json` into `dest`.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    calls: RefCell<Vec<(String, String)>>,
    failing: HashSet<String>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make extraction of `name@version` fail.
    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|(n, _)| n == name).count()
    }
}

impl Fetcher for MemoryFetcher {
    async fn fetch_and_extract(
        &self,
        name: &str,
        version: &Version,
        url: &str,
        dest: &Path,
    ) -> Result<(), PkgError> {
        assert_eq!(url, format!("mem://{name}/{version}"));
        self.calls
            .borrow_mut()
            .push((name.to_string(), version.to_string()));

        if self.failing.contains(&format!("{name}@{version}")) {
            return Err(PkgError::extract_failed(format!(
                "Corrupt archive for {name}@{version}"
            )));
        }

        std::fs::create_dir_all(dest)?;
        std::fs::write(
            dest.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )?;
        Ok(())
    }
}

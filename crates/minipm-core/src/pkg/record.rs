//! What a session has installed so far.

use semver::Version;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// A package that was materialized on disk during the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub name: String,
    #[serde(serialize_with = "display")]
    pub version: Version,
    /// Version that was replaced, when this was an upgrade.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display_opt")]
    pub previous: Option<Version>,
    pub path: PathBuf,
}

/// Counters for the decisions taken while walking the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallStats {
    /// Archives downloaded and extracted.
    pub fetched: usize,
    /// Edges skipped because an equal or newer version was already installed.
    pub satisfied: usize,
    /// Edges skipped by the cycle guard.
    pub cycle_skips: usize,
}

/// Session ledger: one installed version per package name.
///
/// Entries are only written after the package is on disk, and are overwritten
/// when a newer version replaces it.
#[derive(Debug, Default)]
pub struct InstallRecord {
    versions: HashMap<String, Version>,
    history: Vec<InstalledPackage>,
    stats: InstallStats,
}

impl InstallRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed version of `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Version> {
        self.versions.get(name)
    }

    /// Number of distinct packages installed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterate over `(name, version)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Version)> {
        self.versions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every materialization in the order it happened, upgrades included.
    #[must_use]
    pub fn history(&self) -> &[InstalledPackage] {
        &self.history
    }

    #[must_use]
    pub fn stats(&self) -> InstallStats {
        self.stats
    }

    /// Record that `name@version` now lives at `path`.
    ///
    /// Returns the version it replaced.
    pub fn insert(&mut self, name: &str, version: Version, path: PathBuf) -> Option<Version> {
        let previous = self.versions.insert(name.to_string(), version.clone());
        self.stats.fetched += 1;
        self.history.push(InstalledPackage {
            name: name.to_string(),
            version,
            previous: previous.clone(),
            path,
        });
        previous
    }

    pub(crate) fn note_satisfied(&mut self) {
        self.stats.satisfied += 1;
    }

    pub(crate) fn note_cycle_skip(&mut self) {
        self.stats.cycle_skips += 1;
    }
}

fn display<S: serde::Serializer>(v: &Version, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(v)
}

fn display_opt<S: serde::Serializer>(v: &Option<Version>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

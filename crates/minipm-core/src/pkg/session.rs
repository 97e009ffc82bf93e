//! Install session: one registry, one install root, many root requests.

use super::cache::MetadataCache;
use super::error::PkgError;
use super::planner::{InstallPlanner, DEFAULT_MAX_DEPTH};
use super::record::{InstallRecord, InstalledPackage, InstallStats};
use super::registry::Registry;
use super::spec::PackageSpec;
use super::tarball::Fetcher;
use super::version::ResolvedVersion;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tunables for an [`InstallSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How many times a root that failed on a network error is retried.
    pub retries: u32,
    /// Maximum number of packages on a single dependency path.
    pub max_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Outcome of one root request.
#[derive(Debug)]
pub struct RootReport {
    pub spec: PackageSpec,
    pub result: Result<ResolvedVersion, PkgError>,
}

/// Result of [`InstallSession::install_all`].
#[derive(Debug)]
pub struct InstallReport {
    /// One entry per requested root, in request order.
    pub roots: Vec<RootReport>,
    /// Packages materialized by this call, upgrades included.
    pub packages: Vec<InstalledPackage>,
    pub stats: InstallStats,
}

impl InstallReport {
    /// True if every root succeeded.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.roots.iter().all(|r| r.result.is_ok())
    }

    /// Roots that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&PackageSpec, &PkgError)> {
        self.roots
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (&r.spec, e)))
    }
}

/// Owns everything an install run mutates.
///
/// Metadata is cached and the install record kept for the lifetime of the
/// session; dropping the session discards both.
pub struct InstallSession<R, F> {
    registry: R,
    fetcher: F,
    cache: MetadataCache,
    record: InstallRecord,
    install_root: PathBuf,
    options: SessionOptions,
}

impl<R: Registry, F: Fetcher> InstallSession<R, F> {
    pub fn new(registry: R, fetcher: F, install_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            fetcher,
            cache: MetadataCache::new(),
            record: InstallRecord::new(),
            install_root: install_root.into(),
            options: SessionOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Packages installed so far.
    #[must_use]
    pub fn record(&self) -> &InstallRecord {
        &self.record
    }

    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    #[must_use]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Install one root request and its dependencies.
    ///
    /// Returns the version of the root that ends up installed.
    ///
    /// Network failures are retried up to `options.retries` times; packages
    /// installed by an earlier attempt are skipped on retry.
    pub async fn install(&mut self, spec: &PackageSpec) -> Result<ResolvedVersion, PkgError> {
        let mut attempt = 0;
        loop {
            let result = InstallPlanner::new(
                &self.registry,
                &self.fetcher,
                &mut self.cache,
                &mut self.record,
                &self.install_root,
            )
            .with_max_depth(self.options.max_depth)
            .plan_and_install(spec)
            .await;

            match result {
                Err(e) if e.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    warn!(spec = %spec, attempt, error = %e, "Retrying");
                }
                other => return other,
            }
        }
    }

    /// Install every root in order.
    ///
    /// A failing root does not stop the others; each outcome is reported.
    pub async fn install_all(&mut self, specs: &[PackageSpec]) -> InstallReport {
        let before = self.record.history().len();
        let stats_before = self.record.stats();
        let mut roots = Vec::with_capacity(specs.len());

        for spec in specs {
            let result = self.install(spec).await;
            match &result {
                Ok(resolved) => info!(spec = %spec, resolved = %resolved, "Root installed"),
                Err(e) => warn!(spec = %spec, error = %e, "Root failed"),
            }
            roots.push(RootReport {
                spec: spec.clone(),
                result,
            });
        }

        let stats = self.record.stats();
        InstallReport {
            roots,
            packages: self.record.history()[before..].to_vec(),
            stats: InstallStats {
                fetched: stats.fetched - stats_before.fetched,
                satisfied: stats.satisfied - stats_before.satisfied,
                cycle_skips: stats.cycle_skips - stats_before.cycle_skips,
            },
        }
    }
}

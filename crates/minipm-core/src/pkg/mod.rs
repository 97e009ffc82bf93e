//! Package installation.
//!
//! Provides:
//! - Parsing package specifications (`name@constraint`)
//! - Fetching package metadata from an npm-style registry
//! - Resolving version ranges using semver
//! - Walking dependencies into a flat install directory
//! - Downloading and atomically extracting tarballs

pub mod cache;
pub mod error;
pub mod planner;
pub mod record;
pub mod registry;
pub mod session;
pub mod spec;
pub mod tarball;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::MetadataCache;
pub use error::{codes, PkgError};
pub use planner::{install_path, InstallPlanner, Outcome, DEFAULT_MAX_DEPTH};
pub use record::{InstallRecord, InstallStats, InstalledPackage};
pub use registry::{PackageMetadata, Registry, RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use session::{InstallReport, InstallSession, RootReport, SessionOptions};
pub use spec::PackageSpec;
pub use tarball::{download_tarball, extract_tgz_atomic, Fetcher, TarballFetcher};
pub use version::{max_satisfying, resolve_version, Constraint, ResolvedVersion};

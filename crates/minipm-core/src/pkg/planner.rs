//! Dependency walk for a single root request.
//!
//! The graph is walked depth-first with an explicit work stack. Each edge is
//! resolved independently and the install directory is flat: one version per
//! package name, where the highest version seen so far wins and replaces the
//! installed one in place.

use super::cache::MetadataCache;
use super::error::PkgError;
use super::record::InstallRecord;
use super::registry::Registry;
use super::spec::PackageSpec;
use super::tarball::Fetcher;
use super::version::{resolve_version, ResolvedVersion};
use semver::Version;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default limit on the number of packages on the current walk path.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// What happened to one dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First install of this package in the session.
    Installed,
    /// A lower version was installed and has been replaced.
    Upgraded { from: Version },
    /// An equal or newer version is already installed; not descended into.
    AlreadySatisfied,
    /// The package is already on the current path.
    CycleSkipped,
}

/// Directory a package is installed into.
///
/// Scoped packages nest under their scope: `<root>/@scope/name`.
#[must_use]
pub fn install_path(install_root: &Path, name: &str) -> PathBuf {
    install_root.join(name)
}

#[derive(Debug)]
struct Edge {
    name: String,
    range: String,
    /// `name@version` of the package declaring this edge; `None` for the root.
    required_by: Option<String>,
}

impl Edge {
    fn root(spec: &PackageSpec) -> Self {
        Self {
            name: spec.name.clone(),
            range: spec.constraint().to_string(),
            required_by: None,
        }
    }

    /// Attach the edge to errors raised below the root.
    fn wrap(&self, err: PkgError) -> PkgError {
        match &self.required_by {
            Some(parent) => err.context(format!(
                "{}@{} (required by {parent})",
                self.name, self.range
            )),
            None => err,
        }
    }
}

enum Frame {
    Enter(Edge),
    Leave(String),
}

/// Walks one root request, installing whatever the flat layout needs.
///
/// Borrows the session state it mutates; a fresh planner is created per root.
pub struct InstallPlanner<'a, R, F> {
    registry: &'a R,
    fetcher: &'a F,
    cache: &'a mut MetadataCache,
    record: &'a mut InstallRecord,
    install_root: &'a Path,
    max_depth: usize,
    visited: HashSet<String>,
}

impl<'a, R: Registry, F: Fetcher> InstallPlanner<'a, R, F> {
    pub fn new(
        registry: &'a R,
        fetcher: &'a F,
        cache: &'a mut MetadataCache,
        record: &'a mut InstallRecord,
        install_root: &'a Path,
    ) -> Self {
        Self {
            registry,
            fetcher,
            cache,
            record,
            install_root,
            max_depth: DEFAULT_MAX_DEPTH,
            visited: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve `root`, install it and everything it needs.
    ///
    /// Returns the root as it is installed once the walk is done. When an
    /// equal or newer version was already present this is that version, not
    /// the one the constraint resolved to. The first error aborts the walk;
    /// packages installed before it stay installed and recorded.
    pub async fn plan_and_install(&mut self, root: &PackageSpec) -> Result<ResolvedVersion, PkgError> {
        self.visited.clear();
        let result = self.walk(root).await;
        self.visited.clear();
        result
    }

    async fn walk(&mut self, root: &PackageSpec) -> Result<ResolvedVersion, PkgError> {
        let mut stack = Vec::new();

        let edge = Edge::root(root);
        let resolved = self.resolve(&edge).await?;
        self.visit(&edge, &resolved, &mut stack).await?;

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Leave(name) => {
                    self.visited.remove(&name);
                }
                Frame::Enter(edge) => {
                    let dep = self.resolve(&edge).await?;
                    self.visit(&edge, &dep, &mut stack).await?;
                }
            }
        }

        let version = self
            .record
            .get(&resolved.name)
            .cloned()
            .unwrap_or(resolved.version);
        Ok(ResolvedVersion {
            name: resolved.name,
            version,
        })
    }

    async fn resolve(&mut self, edge: &Edge) -> Result<ResolvedVersion, PkgError> {
        let spec = PackageSpec::new(&edge.name, &edge.range).map_err(|e| edge.wrap(e))?;
        resolve_version(self.registry, self.cache, &spec.name, spec.constraint())
            .await
            .map_err(|e| edge.wrap(e))
    }

    async fn visit(
        &mut self,
        edge: &Edge,
        resolved: &ResolvedVersion,
        stack: &mut Vec<Frame>,
    ) -> Result<Outcome, PkgError> {
        let outcome = self.install(edge, resolved, stack).await?;
        debug!(
            name = %edge.name,
            range = %edge.range,
            version = %resolved.version,
            required_by = edge.required_by.as_deref().unwrap_or("-"),
            ?outcome,
            "Planned"
        );
        Ok(outcome)
    }

    async fn install(
        &mut self,
        edge: &Edge,
        resolved: &ResolvedVersion,
        stack: &mut Vec<Frame>,
    ) -> Result<Outcome, PkgError> {
        let name = &resolved.name;

        if self.visited.contains(name) {
            self.record.note_cycle_skip();
            return Ok(Outcome::CycleSkipped);
        }

        let previous = self.record.get(name).cloned();
        if previous.as_ref().is_some_and(|v| *v >= resolved.version) {
            self.record.note_satisfied();
            return Ok(Outcome::AlreadySatisfied);
        }

        if self.visited.len() >= self.max_depth {
            return Err(edge.wrap(PkgError::depth_exceeded(name, self.max_depth)));
        }

        let version = resolved.version.to_string();
        let meta = self
            .cache
            .get(self.registry, name, &version)
            .await
            .map_err(|e| edge.wrap(e))?;

        let url = self
            .registry
            .tarball_url(name, &resolved.version, &meta)
            .map_err(|e| edge.wrap(e))?;
        let dest = install_path(self.install_root, name);

        self.fetcher
            .fetch_and_extract(name, &resolved.version, &url, &dest)
            .await
            .map_err(|e| edge.wrap(e))?;

        self.record
            .insert(name, resolved.version.clone(), dest.clone());
        match &previous {
            Some(from) => info!(name = %name, from = %from, to = %version, "Upgraded"),
            None => info!(name = %name, version = %version, path = %dest.display(), "Installed"),
        }

        self.visited.insert(name.clone());
        stack.push(Frame::Leave(name.clone()));

        // Reversed so the first listed dependency is walked first.
        let parent = resolved.to_string();
        for (dep, range) in meta.dependencies.iter().rev() {
            stack.push(Frame::Enter(Edge {
                name: dep.clone(),
                range: range.clone(),
                required_by: Some(parent.clone()),
            }));
        }

        Ok(match previous {
            Some(from) => Outcome::Upgraded { from },
            None => Outcome::Installed,
        })
    }
}

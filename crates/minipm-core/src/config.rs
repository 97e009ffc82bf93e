use crate::error::Error;
use crate::pkg::registry::{DEFAULT_REGISTRY, REGISTRY_ENV};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default install directory name, relative to the working directory.
pub const DEFAULT_INSTALL_DIR: &str = "node_modules";

/// Default per-request timeout for registry and tarball requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Runtime configuration for the minipm CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs and JSON results.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Registry base URL.
    pub registry: String,

    /// Install root. Relative paths are resolved against `cwd`.
    pub install_dir: PathBuf,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// How many times a failed root request is retried.
    pub retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            registry: DEFAULT_REGISTRY.to_string(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Create a config for `cwd`, picking up the registry from `MINIPM_REGISTRY`.
    #[must_use]
    pub fn from_env(cwd: PathBuf) -> Self {
        let config = Self::new(cwd);
        match std::env::var(REGISTRY_ENV) {
            Ok(url) if !url.trim().is_empty() => config.with_registry(url.trim()),
            _ => config,
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the registry base URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the install directory.
    #[must_use]
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the number of retries per root request.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Absolute install root.
    #[must_use]
    pub fn install_root(&self) -> PathBuf {
        if self.install_dir.is_absolute() {
            self.install_dir.clone()
        } else {
            self.cwd.join(&self.install_dir)
        }
    }

    /// Per-request timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Parse and validate the registry URL.
    ///
    /// The returned URL always ends with `/` so relative joins append to it.
    pub fn registry_url(&self) -> Result<Url, Error> {
        let mut raw = self.registry.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let url = Url::parse(&raw).map_err(|source| Error::InvalidRegistry {
            url: self.registry.clone(),
            source,
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(Error::UnsupportedScheme {
                url: self.registry.clone(),
            }),
        }
    }

    /// Validate the whole configuration before a session starts.
    pub fn validate(&self) -> Result<(), Error> {
        self.registry_url()?;

        let root = self.install_root();
        if root.exists() && !root.is_dir() {
            return Err(Error::InstallDirNotDir { path: root });
        }

        Ok(())
    }
}

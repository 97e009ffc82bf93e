use std::path::PathBuf;
use thiserror::Error;

/// Core error type for minipm configuration and setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid registry URL '{url}': {source}")]
    InvalidRegistry {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Registry URL '{url}' must use http or https")]
    UnsupportedScheme { url: String },

    #[error("Install directory {path} is not a directory")]
    InstallDirNotDir { path: PathBuf },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

//! Error types for fleet-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating a batch spec.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Underlying I/O failure while reading a spec file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse batch spec at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML parse error for an in-memory document.
    #[error("failed to parse batch spec: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An `on` entry has neither a query nor a repository name.
    #[error("malformed 'on' field; missing either a repository name or a query")]
    MalformedOn,

    /// A `workspaces[].in` glob does not compile.
    #[error("invalid workspace glob {glob:?}: {message}")]
    InvalidGlob { glob: String, message: String },

    /// A structural rule of the batch spec is violated.
    #[error("invalid batch spec: {0}")]
    Invalid(String),

    /// An `externalIDs` entry is neither a string nor a number.
    #[error("cannot convert value {0} into a valid external ID: expected string or number")]
    ExternalId(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SpecError {
    SpecError::Io {
        path: path.into(),
        source,
    }
}

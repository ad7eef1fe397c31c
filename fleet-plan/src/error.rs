//! Error types for fleet-plan.

use thiserror::Error;

use crate::client::ClientError;

/// All errors that can arise while resolving repositories and building tasks.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The source client failed (transport, GraphQL error, ...).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Context wrapper naming the `on` declaration that failed.
    #[error("resolving {on:?}: {source}")]
    Resolve {
        on: String,
        #[source]
        source: Box<PlanError>,
    },

    #[error("no repository found with name {name:?}")]
    RepositoryNotFound { name: String },

    #[error("no branch matching {branch:?} found for repository {repository}")]
    BranchNotFound { repository: String, branch: String },

    /// A repository matched more than one `workspaces[].in` glob.
    #[error(
        "repository {repository} matches multiple workspaces.in globs in the batch spec. globs: {}",
        quoted(.globs)
    )]
    AmbiguousWorkspace {
        repository: String,
        globs: Vec<String>,
    },

    #[error("invalid workspace glob {glob:?}: {message}")]
    InvalidGlob { glob: String, message: String },

    /// A batched search answered under an alias that was never issued.
    #[error("result for query {alias:?} did not match any repository")]
    UnknownAlias { alias: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl PlanError {
    /// True when the error was caused by cancellation, however deeply wrapped.
    pub fn is_cancelled(&self) -> bool {
        match self {
            PlanError::Cancelled => true,
            PlanError::Resolve { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

fn quoted(globs: &[String]) -> String {
    globs
        .iter()
        .map(|g| format!("{g:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

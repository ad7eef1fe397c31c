//! The code-host capability fleet consumes: repository lookup and search.
//!
//! Implementations wrap whatever transport talks to the code host (GraphQL
//! over HTTP in production, in-memory maps in tests). They must be safe to
//! call from many workers at once.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use fleet_core::Repository;

use crate::error::PlanError;

/// Opaque failure reported by a [`SourceClient`] implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ClientError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// One row of a search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// A repository matched as a whole (e.g. `repo:` or `type:repo` queries).
    Repository(Repository),
    /// A file inside a repository matched.
    FileMatch { repository: Repository, path: String },
}

impl SearchResult {
    pub fn repository(&self) -> &Repository {
        match self {
            SearchResult::Repository(repo) | SearchResult::FileMatch { repository: repo, .. } => {
                repo
            }
        }
    }

    /// The matched file path, for file matches.
    pub fn path(&self) -> Option<&str> {
        match self {
            SearchResult::FileMatch { path, .. } => Some(path),
            SearchResult::Repository(_) => None,
        }
    }
}

/// A search sent as part of a combined request, answered under `alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedQuery {
    pub alias: String,
    pub query: String,
}

/// Repository metadata and search capability of the code host.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Look up a repository by name.
    ///
    /// The returned repository carries its default branch. When `rev` is
    /// given, [`Repository::commit`] is set to the commit `rev` resolves to,
    /// or left `None` when the revision does not exist. `Ok(None)` means the
    /// repository itself does not exist.
    async fn repository(
        &self,
        name: &str,
        rev: Option<&str>,
    ) -> Result<Option<Repository>, ClientError>;

    /// Run a single search query.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ClientError>;

    /// Run several searches in a single request. The response is keyed by
    /// the alias each query was sent under.
    async fn search_aliased(
        &self,
        queries: &[AliasedQuery],
    ) -> Result<HashMap<String, Vec<SearchResult>>, ClientError>;
}

/// Await a client call unless `cancel` fires first.
pub async fn or_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, PlanError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PlanError::Cancelled),
        res = fut => res.map_err(PlanError::from),
    }
}

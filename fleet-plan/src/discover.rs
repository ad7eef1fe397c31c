//! Directory Discoverer: where does a workspace marker file live?
//!
//! For every repository a search of the form
//! `file:(^|/)<marker>$ repo:^<name>$ type:path count:99999` is issued.
//! Repositories are processed in batches of [`BATCH_SIZE`]; each batch is a
//! single combined request in which every query is sent under its own alias.
//!
//! Returned paths are relative to the repository root with no leading `/`.
//! The root directory itself is reported as `"."`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio_util::sync::CancellationToken;

use fleet_core::{RepoId, Repository};

use crate::client::{or_cancel, AliasedQuery, SourceClient};
use crate::error::PlanError;

/// Repositories per combined search request.
pub const BATCH_SIZE: usize = 50;

/// Alias ↔ repository mapping for a single batch.
///
/// Aliases are `repo_<i>` where `i` indexes into the batch slice; the index
/// is rebuilt for every batch and dropped with it.
struct BatchIndex<'a> {
    batch: &'a [Repository],
    by_alias: HashMap<String, usize>,
}

impl<'a> BatchIndex<'a> {
    fn new(batch: &'a [Repository]) -> Self {
        let by_alias = (0..batch.len()).map(|i| (alias(i), i)).collect();
        Self { batch, by_alias }
    }

    fn queries(&self, file_name: &str) -> Vec<AliasedQuery> {
        self.batch
            .iter()
            .enumerate()
            .map(|(i, repo)| AliasedQuery {
                alias: alias(i),
                query: marker_query(file_name, &repo.name),
            })
            .collect()
    }

    fn repository(&self, alias: &str) -> Option<&'a Repository> {
        self.by_alias.get(alias).map(|&i| &self.batch[i])
    }
}

fn alias(i: usize) -> String {
    format!("repo_{i}")
}

/// Search query finding `file_name` at any depth of repository `repo_name`.
pub fn marker_query(file_name: &str, repo_name: &str) -> String {
    format!(
        "file:(^|/){}$ repo:^{}$ type:path count:99999",
        regex::escape(file_name),
        regex::escape(repo_name)
    )
}

/// Find the directories containing `file_name` in each of `repos`.
///
/// Repositories without a match are absent from the result. Directory lists
/// are sorted and free of duplicates.
pub async fn find_directories_in_repos(
    client: &dyn SourceClient,
    file_name: &str,
    repos: &[Repository],
    cancel: &CancellationToken,
) -> Result<BTreeMap<RepoId, Vec<String>>, PlanError> {
    let mut results = BTreeMap::new();

    for batch in repos.chunks(BATCH_SIZE) {
        if cancel.is_cancelled() {
            return Err(PlanError::Cancelled);
        }

        let index = BatchIndex::new(batch);
        let queries = index.queries(file_name);
        tracing::debug!(
            marker = %file_name,
            repositories = batch.len(),
            "searching for workspace roots"
        );

        let response = or_cancel(cancel, client.search_aliased(&queries)).await?;

        for (alias, rows) in response {
            let repo = index
                .repository(&alias)
                .ok_or_else(|| PlanError::UnknownAlias {
                    alias: alias.clone(),
                })?;

            let dirs: BTreeSet<String> = rows
                .iter()
                .filter_map(|row| row.path())
                .map(parent_dir)
                .collect();

            if !dirs.is_empty() {
                results.insert(repo.id.clone(), dirs.into_iter().collect());
            }
        }
    }

    Ok(results)
}

/// Containing directory of a slash-separated repository path.
///
/// Paths are always Unix-style: they end up inside containers regardless of
/// the host OS.
pub fn parent_dir(path: &str) -> String {
    let path = path.trim_start_matches('/');
    match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => ".".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

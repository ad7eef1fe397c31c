//! Repository Resolver: `on` declarations to deduplicated repositories.
//!
//! Resolution rules:
//! - `repository: name` resolves to the default branch.
//! - `repository: name` + `branch: b` requires `b` to exist.
//! - `repositoriesMatchingQuery: q` folds every search hit in, merging the
//!   file matches of rows that point at the same repository.
//! - Repositories without a resolvable branch are dropped silently.
//! - The same repository seen again later overwrites branch/commit
//!   (last writer wins, in declaration order).
//! - Code hosts outside [`SUPPORTED_SERVICE_TYPES`] are reported as
//!   [`UnsupportedRepos`] and filtered out unless explicitly allowed.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use fleet_core::{Branch, OnDeclaration, RepoId, Repository};

use crate::client::{or_cancel, SearchResult, SourceClient};
use crate::error::PlanError;

/// Code host kinds batch changes can be published to.
pub const SUPPORTED_SERVICE_TYPES: &[&str] = &["github", "gitlab", "bitbucketserver"];

const HARD_CODED_COUNT: &str = " count:999999";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Repositories filtered out because their code host is not supported.
///
/// Advisory only: it travels next to the resolved set rather than through
/// the error channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsupportedRepos(Vec<Repository>);

impl UnsupportedRepos {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.0
    }

    fn includes(&self, id: &RepoId) -> bool {
        self.0.iter().any(|r| &r.id == id)
    }
}

impl fmt::Display for UnsupportedRepos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} repositories on unsupported code hosts were skipped:",
            self.0.len()
        )?;
        for repo in &self.0 {
            writeln!(f, "\t* {} ({})", repo.name, repo.service_type)?;
        }
        Ok(())
    }
}

impl std::error::Error for UnsupportedRepos {}

/// Output of [`RepositoryResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedRepositories {
    /// Supported repositories in first-seen order.
    pub repositories: Vec<Repository>,
    pub unsupported: UnsupportedRepos,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves `on` declarations against a [`SourceClient`].
pub struct RepositoryResolver<'a> {
    client: &'a dyn SourceClient,
    allow_unsupported: bool,
}

impl<'a> RepositoryResolver<'a> {
    pub fn new(client: &'a dyn SourceClient, allow_unsupported: bool) -> Self {
        Self {
            client,
            allow_unsupported,
        }
    }

    /// Resolve every declaration in order and deduplicate by repository id.
    pub async fn resolve(
        &self,
        on: &[OnDeclaration],
        cancel: &CancellationToken,
    ) -> Result<ResolvedRepositories, PlanError> {
        let mut seen: Vec<Repository> = Vec::new();
        let mut index: HashMap<RepoId, usize> = HashMap::new();
        let mut unsupported = UnsupportedRepos::default();

        for decl in on {
            let repos = self
                .resolve_on(decl, cancel)
                .await
                .map_err(|e| PlanError::Resolve {
                    on: decl.to_string(),
                    source: Box::new(e),
                })?;

            for repo in repos {
                if !repo.has_branch() {
                    tracing::debug!(repository = %repo.name, "skipping repository without branch");
                    continue;
                }

                match index.get(&repo.id) {
                    Some(&i) => {
                        let existing = &mut seen[i];
                        existing.branch = repo.branch;
                        existing.commit = repo.commit;
                    }
                    None => {
                        if !self.allow_unsupported && !is_supported(&repo.service_type) {
                            unsupported.0.push(repo.clone());
                        }
                        index.insert(repo.id.clone(), seen.len());
                        seen.push(repo);
                    }
                }
            }
        }

        let repositories: Vec<Repository> = seen
            .into_iter()
            .filter(|r| !unsupported.includes(&r.id))
            .collect();

        if !unsupported.is_empty() {
            tracing::warn!(
                count = unsupported.len(),
                "skipping repositories on unsupported code hosts"
            );
        }
        tracing::info!(count = repositories.len(), "resolved repositories");

        Ok(ResolvedRepositories {
            repositories,
            unsupported,
        })
    }

    /// Resolve a single declaration.
    pub async fn resolve_on(
        &self,
        on: &OnDeclaration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Repository>, PlanError> {
        match on {
            OnDeclaration::Query(query) => self.resolve_repository_search(query, cancel).await,
            OnDeclaration::Repository {
                name,
                branch: Some(branch),
            } => Ok(vec![
                self.resolve_repository_name_and_branch(name, branch, cancel)
                    .await?,
            ]),
            OnDeclaration::Repository { name, branch: None } => {
                Ok(vec![self.resolve_repository_name(name, cancel).await?])
            }
        }
    }

    /// Look up a repository on its default branch.
    pub async fn resolve_repository_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Repository, PlanError> {
        or_cancel(cancel, self.client.repository(name, None))
            .await?
            .ok_or_else(|| PlanError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    async fn resolve_repository_name_and_branch(
        &self,
        name: &str,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<Repository, PlanError> {
        let mut repo = or_cancel(cancel, self.client.repository(name, Some(branch)))
            .await?
            .ok_or_else(|| PlanError::RepositoryNotFound {
                name: name.to_string(),
            })?;

        let commit = repo
            .commit
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PlanError::BranchNotFound {
                repository: name.to_string(),
                branch: branch.to_string(),
            })?;

        repo.branch = Some(Branch {
            name: branch.to_string(),
            commit,
        });
        Ok(repo)
    }

    async fn resolve_repository_search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Repository>, PlanError> {
        let query = set_default_query_count(query);
        tracing::debug!(query = %query, "searching repositories");
        let results = or_cancel(cancel, self.client.search(&query)).await?;
        Ok(fold_search_results(results))
    }
}

/// Collapse search rows into one repository per id, merging file matches.
fn fold_search_results(results: Vec<SearchResult>) -> Vec<Repository> {
    let mut repos: Vec<Repository> = Vec::new();
    let mut index: HashMap<RepoId, usize> = HashMap::new();

    for result in results {
        let (mut repo, path) = match result {
            SearchResult::Repository(repo) => (repo, None),
            SearchResult::FileMatch { repository, path } => (repository, Some(path)),
        };
        match index.get(&repo.id) {
            Some(&i) => repos[i].file_matches.extend(path),
            None => {
                repo.file_matches.extend(path);
                index.insert(repo.id.clone(), repos.len());
                repos.push(repo);
            }
        }
    }
    repos
}

fn is_supported(service_type: &str) -> bool {
    let lower = service_type.to_ascii_lowercase();
    SUPPORTED_SERVICE_TYPES.contains(&lower.as_str())
}

/// Append a large `count:` unless the query already sets one, so results are
/// not truncated by the server default.
pub fn set_default_query_count(query: &str) -> String {
    static COUNT: OnceLock<Regex> = OnceLock::new();
    let re = COUNT.get_or_init(|| Regex::new(r"\bcount:\d+\b").expect("static regex"));
    if re.is_match(query) {
        query.to_string()
    } else {
        format!("{query}{HARD_CODED_COUNT}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: &str, name: &str) -> Repository {
        Repository::new(id, name, "github").with_branch("main", "c1")
    }

    #[test]
    fn default_count_is_appended_once() {
        assert_eq!(set_default_query_count("lang:go"), "lang:go count:999999");
        assert_eq!(set_default_query_count("lang:go count:10"), "lang:go count:10");
        assert_eq!(
            set_default_query_count("lang:go nocount:10"),
            "lang:go nocount:10 count:999999"
        );
    }

    #[test]
    fn fold_merges_file_matches_per_repository() {
        let results = vec![
            SearchResult::FileMatch {
                repository: repo("1", "a"),
                path: "x/go.mod".into(),
            },
            SearchResult::Repository(repo("2", "b")),
            SearchResult::FileMatch {
                repository: repo("1", "a"),
                path: "go.mod".into(),
            },
        ];
        let folded = fold_search_results(results);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].name, "a");
        let files: Vec<&str> = folded[0].file_matches.iter().map(String::as_str).collect();
        assert_eq!(files, vec!["go.mod", "x/go.mod"]);
        assert!(folded[1].file_matches.is_empty());
    }

    #[test]
    fn service_types_are_case_insensitive() {
        assert!(is_supported("GitHub"));
        assert!(is_supported("bitbucketServer"));
        assert!(!is_supported("perforce"));
    }

    #[test]
    fn unsupported_display_lists_names() {
        let set = UnsupportedRepos(vec![Repository::new("9", "p4/depot", "perforce")]);
        let text = set.to_string();
        assert!(text.contains("p4/depot (perforce)"), "got: {text}");
    }
}

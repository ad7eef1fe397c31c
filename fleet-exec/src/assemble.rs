//! Spec assembly: imported changesets and duplicate-branch validation.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use fleet_core::{ChangesetSpec, ImportChangeset, RepoId, Repository};
use fleet_plan::RepositoryResolver;

use crate::error::{ErrorList, ExecError};

/// One `(repository, branch)` pair claimed by more than one changeset spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateBranch {
    pub repository: String,
    /// Branch name without `refs/heads/`.
    pub branch: String,
    pub count: usize,
}

/// Validation failure listing every duplicated branch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct DuplicateBranches(pub Vec<DuplicateBranch>);

impl fmt::Display for DuplicateBranches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Multiple changeset specs have the same branch:")?;
        writeln!(f)?;
        for dup in &self.0 {
            writeln!(
                f,
                "\t* {}: {} changeset specs have the branch {:?}",
                dup.repository, dup.count, dup.branch
            )?;
        }
        writeln!(f)?;
        write!(
            f,
            "Make sure that the changesetTemplate.branch field in the batch spec produces \
             unique values for each changeset in a single repository and rerun this command."
        )
    }
}

/// Reject specs where two branch changesets share `(headRepository, headRef)`.
///
/// `repos` supplies display names; unknown ids are shown as-is.
pub fn validate_changeset_specs(
    repos: &[Repository],
    specs: &[ChangesetSpec],
) -> Result<(), DuplicateBranches> {
    let names: HashMap<&RepoId, &str> = repos.iter().map(|r| (&r.id, r.name.as_str())).collect();

    let mut counts: HashMap<(&RepoId, &str), usize> = HashMap::new();
    for (repo, head_ref) in specs.iter().filter_map(ChangesetSpec::head) {
        let branch = head_ref.strip_prefix("refs/heads/").unwrap_or(head_ref);
        *counts.entry((repo, branch)).or_default() += 1;
    }

    let mut duplicates: Vec<DuplicateBranch> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((repo, branch), count)| DuplicateBranch {
            repository: names
                .get(repo)
                .map(|n| n.to_string())
                .unwrap_or_else(|| repo.to_string()),
            branch: branch.to_string(),
            count,
        })
        .collect();
    duplicates.sort_by(|a, b| (&a.repository, &a.branch).cmp(&(&b.repository, &b.branch)));

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(DuplicateBranches(duplicates))
    }
}

/// Resolve each import entry's repository and emit one external spec per ID.
///
/// With `skip_errors`, resolution failures are returned alongside the specs
/// that did resolve; otherwise the first one aborts.
pub async fn import_changesets(
    resolver: &RepositoryResolver<'_>,
    imports: &[ImportChangeset],
    skip_errors: bool,
    cancel: &CancellationToken,
) -> Result<(Vec<ChangesetSpec>, ErrorList), ExecError> {
    let mut specs = Vec::new();
    let mut errors = ErrorList::default();

    for import in imports {
        let repo = match resolver.resolve_repository_name(&import.repository, cancel).await {
            Ok(repo) => repo,
            Err(source) => {
                let err = ExecError::Import {
                    repository: import.repository.clone(),
                    source,
                };
                if skip_errors && !err.is_cancelled() {
                    errors.push(err);
                    continue;
                }
                return Err(err);
            }
        };
        for id in &import.external_ids {
            specs.push(ChangesetSpec::external(repo.id.clone(), id.clone()));
        }
        tracing::debug!(
            repository = %repo.name,
            count = import.external_ids.len(),
            "imported changesets"
        );
    }
    Ok((specs, errors))
}

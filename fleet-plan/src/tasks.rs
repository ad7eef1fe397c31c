//! Workspace Assigner and Task Builder.
//!
//! Every repository ends up in exactly one place:
//! - no `workspaces[].in` glob matches → the root workspace set, one task at `""`;
//! - one glob matches → that configuration, one task per discovered root
//!   (or a single root task when the rule has no marker file);
//! - several globs match → [`PlanError::AmbiguousWorkspace`], nothing runs.

use std::collections::{BTreeMap, HashSet};

use glob::Pattern;
use tokio_util::sync::CancellationToken;

use fleet_core::{BatchSpec, RepoId, Repository, Task, WorkspaceConfiguration};

use crate::client::SourceClient;
use crate::discover::find_directories_in_repos;
use crate::error::PlanError;

/// Result of matching repositories against workspace configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceAssignment {
    /// Repositories matching no configuration, in input order.
    pub root: Vec<Repository>,
    /// Configuration index → repositories assigned to it, in input order.
    pub by_config: BTreeMap<usize, Vec<Repository>>,
}

/// Match every repository name against the configuration globs.
pub fn assign_workspaces(
    repos: &[Repository],
    configs: &[WorkspaceConfiguration],
) -> Result<WorkspaceAssignment, PlanError> {
    let patterns = configs
        .iter()
        .map(|conf| {
            Pattern::new(&conf.glob).map_err(|e| PlanError::InvalidGlob {
                glob: conf.glob.clone(),
                message: e.msg.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut assignment = WorkspaceAssignment::default();

    for repo in repos {
        let matched: Vec<usize> = patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.matches(&repo.name))
            .map(|(i, _)| i)
            .collect();

        match matched.as_slice() {
            [] => assignment.root.push(repo.clone()),
            [i] => assignment
                .by_config
                .entry(*i)
                .or_default()
                .push(repo.clone()),
            _ => {
                return Err(PlanError::AmbiguousWorkspace {
                    repository: repo.name.clone(),
                    globs: matched.iter().map(|&i| configs[i].glob.clone()).collect(),
                })
            }
        }
    }

    Ok(assignment)
}

/// Build the task set for `repos` under `spec`.
///
/// Steps, template and batch metadata are copied from `spec` as they are at
/// call time, so image digests must be resolved beforehand.
pub async fn build_tasks(
    client: &dyn SourceClient,
    repos: &[Repository],
    spec: &BatchSpec,
    cancel: &CancellationToken,
) -> Result<Vec<Task>, PlanError> {
    let assignment = assign_workspaces(repos, &spec.workspaces)?;
    let root_ids: HashSet<&RepoId> = assignment.root.iter().map(|r| &r.id).collect();

    let new_task = |repo: &Repository, path: String, only_fetch_workspace: bool| Task {
        repository: repo.clone(),
        path,
        steps: spec.steps.clone(),
        template: spec.changeset_template.clone(),
        batch_change: spec.batch_change_meta(),
        only_fetch_workspace,
    };

    let mut tasks = Vec::new();

    for (config_index, config_repos) in &assignment.by_config {
        let conf = &spec.workspaces[*config_index];

        let Some(marker) = conf.root_at_location_of.as_deref() else {
            for repo in config_repos {
                tasks.push(new_task(repo, String::new(), conf.only_fetch_workspace));
            }
            continue;
        };

        let dirs_by_repo = find_directories_in_repos(client, marker, config_repos, cancel).await?;

        for repo in config_repos {
            let Some(dirs) = dirs_by_repo.get(&repo.id) else {
                tracing::debug!(
                    repository = %repo.name,
                    marker = %marker,
                    "no workspace roots found"
                );
                continue;
            };

            for dir in dirs {
                let path = if dir == "." {
                    // A repository cannot be in both sets; skip rather than
                    // produce a second root task.
                    if root_ids.contains(&repo.id) {
                        continue;
                    }
                    String::new()
                } else {
                    dir.clone()
                };
                tasks.push(new_task(repo, path, conf.only_fetch_workspace));
            }
        }
    }

    for repo in &assignment.root {
        tasks.push(new_task(repo, String::new(), false));
    }

    tracing::info!(
        tasks = tasks.len(),
        repositories = repos.len(),
        "built tasks"
    );
    Ok(tasks)
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

    fn conf(glob: &str) -> WorkspaceConfiguration {
        WorkspaceConfiguration {
            glob: glob.to_string(),
            root_at_location_of: Some("go.mod".to_string()),
            only_fetch_workspace: false,
        }
    }

    #[test]
    fn unmatched_repositories_go_to_root() {
        let repos = vec![repo("1", "github.com/a/x"), repo("2", "github.com/b/y")];
        let a = assign_workspaces(&repos, &[conf("github.com/a/*")]).unwrap();
        assert_eq!(a.root.len(), 1);
        assert_eq!(a.root[0].name, "github.com/b/y");
        assert_eq!(a.by_config[&0][0].name, "github.com/a/x");
    }

    #[test]
    fn star_crosses_path_separators() {
        let repos = vec![repo("1", "github.com/a/x")];
        let a = assign_workspaces(&repos, &[conf("github.com/*")]).unwrap();
        assert!(a.root.is_empty());
    }

    #[test]
    fn multiple_matches_name_repository_and_globs() {
        let repos = vec![repo("1", "github.com/a/x")];
        let err = assign_workspaces(&repos, &[conf("github.com/a/*"), conf("*/x")]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("github.com/a/x"), "got: {msg}");
        assert!(msg.contains("\"github.com/a/*\""), "got: {msg}");
        assert!(msg.contains("\"*/x\""), "got: {msg}");
    }

    #[test]
    fn invalid_glob_is_a_configuration_error() {
        let err = assign_workspaces(&[repo("1", "a")], &[conf("[")]).unwrap_err();
        assert!(matches!(err, PlanError::InvalidGlob { .. }));
    }
}

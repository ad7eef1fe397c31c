//! In-memory capabilities for the execution tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{
    BatchChangeMeta, ChangesetTemplate, CommitTemplate, Repository, Step, Task,
};
use fleet_exec::{ContainerRuntime, RuntimeError, StepResult, WorkspaceManager};
use fleet_plan::{AliasedQuery, ClientError, SearchResult, SourceClient};

/// Container runtime and workspace manager sharing one in-memory file system.
///
/// Every step appends a one-line change to `README.md` of its workspace.
#[derive(Default)]
pub struct FakeEngine {
    /// workdir → accumulated diff.
    workspaces: Mutex<HashMap<PathBuf, String>>,
    /// workdir → repository name.
    owners: Mutex<HashMap<PathBuf, String>>,
    pub failing: HashSet<String>,
    pub unchanged: HashSet<String>,
    pub step_delay: Option<Duration>,
    pub runs: AtomicUsize,
    pub pulls: AtomicUsize,
    pub cleanups: AtomicUsize,
}

impl FakeEngine {
    pub fn failing_for(mut self, repo: &str) -> Self {
        self.failing.insert(repo.to_string());
        self
    }

    pub fn unchanged_for(mut self, repo: &str) -> Self {
        self.unchanged.insert(repo.to_string());
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn owner(&self, workdir: &Path) -> String {
        self.owners
            .lock()
            .expect("lock")
            .get(workdir)
            .cloned()
            .unwrap_or_default()
    }

    fn append(&self, workdir: &Path, diff: &str) {
        self.workspaces
            .lock()
            .expect("lock")
            .entry(workdir.to_path_buf())
            .or_default()
            .push_str(diff);
    }
}

#[async_trait]
impl ContainerRuntime for FakeEngine {
    async fn ensure_image(&self, image: &str) -> Result<String, RuntimeError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("sha256:{}", image.replace(':', "-")))
    }

    async fn run_step(&self, step: &Step, workdir: &Path) -> Result<StepResult, RuntimeError> {
        if let Some(delay) = self.step_delay {
            tokio::time::sleep(delay).await;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        let owner = self.owner(workdir);
        if self.failing.contains(&owner) {
            return Err(RuntimeError::new(format!("exit status 1 in {owner}")));
        }
        if self.unchanged.contains(&owner) {
            return Ok(StepResult {
                stdout: "nothing to do\n".into(),
                ..Default::default()
            });
        }
        let diff = format!(
            "--- a/README.md\n+++ b/README.md\n@@ -0,0 +1 @@\n+{}\n",
            step.run
        );
        self.append(workdir, &diff);
        Ok(StepResult {
            diff,
            stdout: format!("ran {}\n", step.run),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl WorkspaceManager for FakeEngine {
    async fn prepare(&self, task: &Task) -> Result<PathBuf, RuntimeError> {
        let workdir = Path::new("/fake").join(&task.repository.name).join(&task.path);
        self.owners
            .lock()
            .expect("lock")
            .insert(workdir.clone(), task.repository.name.clone());
        self.workspaces
            .lock()
            .expect("lock")
            .insert(workdir.clone(), String::new());
        Ok(workdir)
    }

    async fn apply_diff(&self, workdir: &Path, diff: &str) -> Result<(), RuntimeError> {
        self.append(workdir, diff);
        Ok(())
    }

    async fn diff(&self, workdir: &Path) -> Result<String, RuntimeError> {
        Ok(self
            .workspaces
            .lock()
            .expect("lock")
            .get(workdir)
            .cloned()
            .unwrap_or_default())
    }

    async fn cleanup(&self, workdir: &Path) -> Result<(), RuntimeError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.workspaces.lock().expect("lock").remove(workdir);
        Ok(())
    }
}

/// Serves repositories by name, plus canned search results.
#[derive(Default)]
pub struct FakeClient {
    pub repos: HashMap<String, Repository>,
    pub searches: HashMap<String, Vec<SearchResult>>,
}

impl FakeClient {
    pub fn with_repo(mut self, repo: Repository) -> Self {
        self.repos.insert(repo.name.clone(), repo);
        self
    }

    pub fn with_search(mut self, query: &str, rows: Vec<SearchResult>) -> Self {
        self.searches.insert(query.to_string(), rows);
        self
    }
}

#[async_trait]
impl SourceClient for FakeClient {
    async fn repository(
        &self,
        name: &str,
        _rev: Option<&str>,
    ) -> Result<Option<Repository>, ClientError> {
        Ok(self.repos.get(name).cloned())
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ClientError> {
        Ok(self.searches.get(query).cloned().unwrap_or_default())
    }

    async fn search_aliased(
        &self,
        queries: &[AliasedQuery],
    ) -> Result<HashMap<String, Vec<SearchResult>>, ClientError> {
        Ok(queries.iter().map(|q| (q.alias.clone(), vec![])).collect())
    }
}

pub fn repo(id: &str, name: &str) -> Repository {
    Repository::new(id, name, "github").with_branch("main", format!("commit-{id}"))
}

pub fn template(branch: &str) -> ChangesetTemplate {
    ChangesetTemplate {
        title: "Update {{ repository.name }}".into(),
        body: String::new(),
        branch: branch.into(),
        commit: CommitTemplate {
            message: "update".into(),
            author: None,
        },
        published: false,
    }
}

pub fn task(repo: Repository, path: &str, steps: &[&str]) -> Task {
    Task {
        repository: repo,
        path: path.to_string(),
        steps: steps.iter().map(|run| Step::new(*run, "alpine:3")).collect(),
        template: Some(template("fleet/update")),
        batch_change: BatchChangeMeta {
            name: "update".into(),
            description: String::new(),
        },
        only_fetch_workspace: false,
    }
}

pub fn engine_arcs(
    engine: FakeEngine,
) -> (
    Arc<FakeEngine>,
    Arc<dyn ContainerRuntime>,
    Arc<dyn WorkspaceManager>,
) {
    let engine = Arc::new(engine);
    let runtime: Arc<dyn ContainerRuntime> = engine.clone();
    let workspaces: Arc<dyn WorkspaceManager> = engine.clone();
    (engine, runtime, workspaces)
}

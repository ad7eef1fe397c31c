//! Executor: runs tasks concurrently and tracks their status.
//!
//! Each task moves through `Pending → Preparing → Running(i of N) →
//! Completed | Failed`, driven only by its own worker. Workers are tokio
//! tasks gated by a semaphore of size `parallelism`. The status table sits
//! behind a mutex and is only ever handed out as a snapshot copy.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fleet_core::{ChangesetSpec, Task};

use crate::cache::{CacheKey, ExecutionCache, StepOutcome};
use crate::changeset::{render_changeset_spec, render_step_outputs};
use crate::error::{ErrorList, ExecError};
use crate::runtime::{ContainerRuntime, WorkspaceManager};
use crate::task_log::TaskLog;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorOpts {
    /// Maximum number of tasks running at once.
    pub parallelism: usize,
    /// Per-task limit; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Keep log files of successful tasks.
    pub keep_logs: bool,
    /// Directory the per-task log files are written to.
    pub temp_dir: PathBuf,
    /// Collect task failures instead of stopping at the first one.
    pub skip_errors: bool,
}

impl Default for ExecutorOpts {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout: None,
            keep_logs: false,
            temp_dir: std::env::temp_dir(),
            skip_errors: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Preparing,
    /// 1-based step currently running.
    Running { step: usize, of: usize },
    Completed,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub repository: String,
    pub path: String,
    pub phase: TaskPhase,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub log_file: Option<PathBuf>,
    /// Steps replayed from the execution cache.
    pub cached_steps: usize,
    pub produced_spec: bool,
}

impl TaskStatus {
    fn pending(task: &Task) -> Self {
        Self {
            repository: task.repository.name.clone(),
            path: task.path.clone(),
            phase: TaskPhase::Pending,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            log_file: None,
            cached_steps: 0,
            produced_spec: false,
        }
    }
}

/// Handle on the executor's status table.
#[derive(Debug, Clone, Default)]
pub struct StatusTable(Arc<Mutex<Vec<TaskStatus>>>);

impl StatusTable {
    pub async fn snapshot(&self) -> Vec<TaskStatus> {
        self.0.lock().await.clone()
    }

    /// Copy the table under the lock, release it, then call `f` on the copy.
    pub async fn locked_task_statuses<F>(&self, f: F)
    where
        F: FnOnce(&[TaskStatus]),
    {
        let snapshot = self.snapshot().await;
        f(&snapshot);
    }

    async fn push(&self, status: TaskStatus) {
        self.0.lock().await.push(status);
    }

    async fn update(&self, index: usize, f: impl FnOnce(&mut TaskStatus)) {
        if let Some(status) = self.0.lock().await.get_mut(index) {
            f(status);
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Specs in task registration order.
    pub specs: Vec<ChangesetSpec>,
    /// Task failures; only populated with `skip_errors`.
    pub failures: ErrorList,
    pub log_files: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

type TaskOutcome = (usize, Result<Option<ChangesetSpec>, ExecError>);

pub struct Executor {
    worker: Arc<Worker>,
    parallelism: usize,
    skip_errors: bool,
    tasks: Vec<Arc<Task>>,
    running: JoinSet<TaskOutcome>,
    cancel: CancellationToken,
    started: bool,
}

impl Executor {
    pub fn new(
        opts: ExecutorOpts,
        runtime: Arc<dyn ContainerRuntime>,
        workspaces: Arc<dyn WorkspaceManager>,
        cache: Arc<dyn ExecutionCache>,
    ) -> Self {
        Self {
            parallelism: opts.parallelism.max(1),
            skip_errors: opts.skip_errors,
            worker: Arc::new(Worker {
                runtime,
                workspaces,
                cache,
                statuses: StatusTable::default(),
                timeout: opts.timeout,
                keep_logs: opts.keep_logs,
                temp_dir: opts.temp_dir,
            }),
            tasks: Vec::new(),
            running: JoinSet::new(),
            cancel: CancellationToken::new(),
            started: false,
        }
    }

    /// Register a task. Tasks added after [`Executor::start`] are ignored.
    pub async fn add_task(&mut self, task: Arc<Task>) {
        if self.started {
            tracing::warn!(task = %task.label(), "executor already started; task ignored");
            return;
        }
        self.worker.statuses.push(TaskStatus::pending(&task)).await;
        self.tasks.push(task);
    }

    /// Launch one worker per registered task. Cancelling `cancel` stops them
    /// at their next await point.
    pub fn start(&mut self, cancel: &CancellationToken) {
        if self.started {
            return;
        }
        self.started = true;
        self.cancel = cancel.child_token();

        tracing::info!(
            tasks = self.tasks.len(),
            parallelism = self.parallelism,
            "starting execution"
        );

        let permits = Arc::new(Semaphore::new(self.parallelism));
        for (index, task) in self.tasks.iter().enumerate() {
            let worker = self.worker.clone();
            let permits = permits.clone();
            let cancel = self.cancel.clone();
            let task = task.clone();
            self.running.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                let result = match permit {
                    Some(_permit) => worker.run(index, &task, &cancel).await,
                    None => {
                        worker.fail_unstarted(index).await;
                        Err(ExecError::Cancelled)
                    }
                };
                let result = result.map_err(|source| ExecError::Task {
                    repository: task.repository.name.clone(),
                    path: task.path.clone(),
                    source: Box::new(source),
                });
                (index, result)
            });
        }
    }

    /// Block until every task is terminal.
    ///
    /// Without `skip_errors` the first failure cancels the remaining workers
    /// and is returned as the only error.
    pub async fn wait(&mut self) -> Result<ExecutionReport, ExecError> {
        let mut produced: Vec<(usize, ChangesetSpec)> = Vec::new();
        let mut failures = ErrorList::default();
        let mut first_error: Option<ExecError> = None;

        while let Some(joined) = self.running.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(spec))) => Ok((index, spec)),
                Ok((_, Err(err))) => Err(err),
                Err(join) => Err(ExecError::Join(join.to_string())),
            };
            match outcome {
                Ok((index, Some(spec))) => produced.push((index, spec)),
                Ok((_, None)) => {}
                Err(err) if self.skip_errors => {
                    tracing::debug!(error = %err, "task failed; continuing");
                    failures.push(err);
                }
                Err(err) => {
                    if first_error.is_none() {
                        tracing::debug!(error = %err, "task failed; cancelling remaining tasks");
                        self.cancel.cancel();
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if self.cancel.is_cancelled() || failures.iter().any(ExecError::is_cancelled) {
            tracing::debug!(failed = failures.len(), "execution cancelled");
            return Err(ExecError::Cancelled);
        }

        produced.sort_by_key(|(index, _)| *index);
        let specs: Vec<ChangesetSpec> = produced.into_iter().map(|(_, spec)| spec).collect();
        tracing::info!(
            specs = specs.len(),
            failed = failures.len(),
            "execution finished"
        );
        Ok(ExecutionReport {
            specs,
            failures,
            log_files: self.log_files().await,
        })
    }

    pub fn statuses(&self) -> StatusTable {
        self.worker.statuses.clone()
    }

    pub async fn locked_task_statuses<F>(&self, f: F)
    where
        F: FnOnce(&[TaskStatus]),
    {
        self.worker.statuses.locked_task_statuses(f).await;
    }

    /// Log files still on disk: failed tasks, or every task with `keep_logs`.
    pub async fn log_files(&self) -> Vec<PathBuf> {
        self.worker
            .statuses
            .snapshot()
            .await
            .into_iter()
            .filter_map(|s| s.log_file)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    runtime: Arc<dyn ContainerRuntime>,
    workspaces: Arc<dyn WorkspaceManager>,
    cache: Arc<dyn ExecutionCache>,
    statuses: StatusTable,
    timeout: Option<Duration>,
    keep_logs: bool,
    temp_dir: PathBuf,
}

impl Worker {
    async fn fail_unstarted(&self, index: usize) {
        self.statuses
            .update(index, |s| {
                s.phase = TaskPhase::Failed;
                s.error = Some(ExecError::Cancelled.to_string());
                s.finished_at = Some(Utc::now());
            })
            .await;
    }

    async fn run(
        &self,
        index: usize,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Option<ChangesetSpec>, ExecError> {
        self.statuses
            .update(index, |s| {
                s.phase = TaskPhase::Preparing;
                s.started_at = Some(Utc::now());
            })
            .await;

        let result = match TaskLog::create(&self.temp_dir, index, task).await {
            Ok(mut log) => {
                let path = log.path().to_path_buf();
                self.statuses
                    .update(index, |s| s.log_file = Some(path))
                    .await;

                let result = self.execute(index, task, &mut log, cancel).await;
                if let Err(err) = &result {
                    if let Err(write_err) = log.line(&format!("error: {err}")).await {
                        tracing::warn!(task = %task.label(), error = %write_err, "writing task log failed");
                    }
                }
                match log.finish(self.keep_logs || result.is_err()).await {
                    Ok(kept) => self.statuses.update(index, |s| s.log_file = kept).await,
                    Err(err) => tracing::warn!(task = %task.label(), error = %err, "closing task log failed"),
                }
                result
            }
            Err(err) => Err(err),
        };

        self.statuses
            .update(index, |s| {
                s.finished_at = Some(Utc::now());
                match &result {
                    Ok(spec) => {
                        s.phase = TaskPhase::Completed;
                        s.produced_spec = spec.is_some();
                    }
                    Err(err) => {
                        s.phase = TaskPhase::Failed;
                        s.error = Some(err.to_string());
                    }
                }
            })
            .await;
        result
    }

    /// Prepare the workspace, run the steps, then always clean up. The
    /// timeout covers preparation and steps but never the cleanup.
    async fn execute(
        &self,
        index: usize,
        task: &Task,
        log: &mut TaskLog,
        cancel: &CancellationToken,
    ) -> Result<Option<ChangesetSpec>, ExecError> {
        let deadline = self.timeout.map(|after| (Instant::now() + after, after));

        let workdir = within(
            deadline,
            guard(cancel, async {
                self.workspaces
                    .prepare(task)
                    .await
                    .map_err(ExecError::Workspace)
            }),
        )
        .await?;
        log.line(&format!("workspace: {}", workdir.display())).await?;

        let result = within(deadline, self.run_steps(index, task, &workdir, log, cancel)).await;

        if let Err(err) = self.workspaces.cleanup(&workdir).await {
            tracing::warn!(task = %task.label(), error = %err, "workspace cleanup failed");
        }
        result
    }

    async fn run_steps(
        &self,
        index: usize,
        task: &Task,
        workdir: &Path,
        log: &mut TaskLog,
        cancel: &CancellationToken,
    ) -> Result<Option<ChangesetSpec>, ExecError> {
        let total = task.steps.len();
        let mut outputs: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut previous: Option<CacheKey> = None;

        for (i, step) in task.steps.iter().enumerate() {
            self.statuses
                .update(index, |s| {
                    s.phase = TaskPhase::Running {
                        step: i + 1,
                        of: total,
                    }
                })
                .await;

            let key = CacheKey::for_step(task, i, previous.as_ref())?;
            log.line(&format!("step {}/{total}: {}", i + 1, step.run)).await?;

            let outcome = match self.cache_get(&key).await? {
                Some(hit) => {
                    tracing::debug!(task = %task.label(), step = i + 1, "step result cached");
                    guard(cancel, async {
                        self.workspaces
                            .apply_diff(workdir, &hit.diff)
                            .await
                            .map_err(ExecError::Workspace)
                    })
                    .await?;
                    self.statuses.update(index, |s| s.cached_steps += 1).await;
                    log.line("(cached)").await?;
                    hit
                }
                None => {
                    tracing::debug!(task = %task.label(), step = i + 1, image = step.image(), "running step");
                    let result = guard(cancel, async {
                        self.runtime
                            .run_step(step, workdir)
                            .await
                            .map_err(|source| ExecError::Step {
                                step: i + 1,
                                run: step.run.clone(),
                                source,
                            })
                    })
                    .await?;
                    let step_outputs = render_step_outputs(task, step, &result, &outputs)?;
                    let outcome = StepOutcome {
                        diff: result.diff,
                        stdout: result.stdout,
                        stderr: result.stderr,
                        outputs: step_outputs,
                    };
                    self.cache_put(&key, outcome).await?
                }
            };

            log.section("stdout", &outcome.stdout).await?;
            log.section("stderr", &outcome.stderr).await?;
            outputs.extend(outcome.outputs);
            previous = Some(key);
        }

        let diff = guard(cancel, async {
            self.workspaces
                .diff(workdir)
                .await
                .map_err(ExecError::Workspace)
        })
        .await?;
        if diff.trim().is_empty() {
            log.line("no changes").await?;
            return Ok(None);
        }
        render_changeset_spec(task, &diff, &outputs).map(Some)
    }

    async fn cache_get(&self, key: &CacheKey) -> Result<Option<StepOutcome>, ExecError> {
        let cache = self.cache.clone();
        let key = key.clone();
        let hit = tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .map_err(|e| ExecError::Join(e.to_string()))??;
        Ok(hit)
    }

    /// Record `outcome` under `key` and hand it back.
    async fn cache_put(&self, key: &CacheKey, outcome: StepOutcome) -> Result<StepOutcome, ExecError> {
        let cache = self.cache.clone();
        let key = key.clone();
        let outcome = tokio::task::spawn_blocking(move || cache.put(&key, &outcome).map(|()| outcome))
            .await
            .map_err(|e| ExecError::Join(e.to_string()))??;
        Ok(outcome)
    }
}

/// Bound `fut` by the task deadline, if any.
async fn within<T>(
    deadline: Option<(Instant, Duration)>,
    fut: impl Future<Output = Result<T, ExecError>>,
) -> Result<T, ExecError> {
    match deadline {
        Some((at, after)) => tokio::time::timeout_at(at, fut)
            .await
            .unwrap_or(Err(ExecError::Timeout { after })),
        None => fut.await,
    }
}

/// Race `fut` against cancellation.
async fn guard<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ExecError>>,
) -> Result<T, ExecError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        result = fut => result,
    }
}

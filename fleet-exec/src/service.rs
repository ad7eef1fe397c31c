//! Service façade tying resolution, image pinning, execution and assembly
//! together over one set of capabilities.
//!
//! A typical run:
//!
//! 1. [`Service::resolve_repositories`]
//! 2. [`Service::set_images`] (digests must be pinned before tasks are built)
//! 3. [`Service::build_tasks`]
//! 4. [`Service::execute_batch_spec`]
//! 5. [`Service::validate_changeset_specs`]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleet_core::{BatchSpec, ChangesetSpec, Repository, Task};
use fleet_plan::{RepositoryResolver, ResolvedRepositories, SourceClient};

use crate::assemble::{import_changesets, validate_changeset_specs};
use crate::cache::ExecutionCache;
use crate::error::{ErrorList, ExecError};
use crate::executor::{ExecutionReport, Executor, ExecutorOpts, StatusTable, TaskStatus};
use crate::images::{resolve_images, ImageCache};
use crate::runtime::{ContainerRuntime, WorkspaceManager, WorkspaceMode};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Receives status snapshots while a batch executes.
pub type ProgressFn = Arc<dyn Fn(&[TaskStatus]) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOpts {
    /// Keep repositories on code hosts outside the supported set.
    #[serde(default)]
    pub allow_unsupported: bool,
    #[serde(default)]
    pub workspace_mode: WorkspaceMode,
}

/// Everything a batch execution produced.
#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Branch specs in task order, followed by imported changesets.
    pub specs: Vec<ChangesetSpec>,
    pub log_files: Vec<PathBuf>,
    /// Tolerated failures when running with `skip_errors`.
    pub errors: Option<ErrorList>,
}

pub struct Service {
    client: Arc<dyn SourceClient>,
    runtime: Arc<dyn ContainerRuntime>,
    workspaces: Arc<dyn WorkspaceManager>,
    images: ImageCache,
    opts: ServiceOpts,
}

impl Service {
    pub fn new(
        client: Arc<dyn SourceClient>,
        runtime: Arc<dyn ContainerRuntime>,
        workspaces: Arc<dyn WorkspaceManager>,
        opts: ServiceOpts,
    ) -> Self {
        Self {
            images: ImageCache::new(runtime.clone()),
            client,
            runtime,
            workspaces,
            opts,
        }
    }

    pub fn opts(&self) -> &ServiceOpts {
        &self.opts
    }

    fn resolver(&self) -> RepositoryResolver<'_> {
        RepositoryResolver::new(self.client.as_ref(), self.opts.allow_unsupported)
    }

    pub async fn resolve_repositories(
        &self,
        spec: &BatchSpec,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRepositories, ExecError> {
        let resolved = self.resolver().resolve(&spec.on, cancel).await?;
        if !resolved.unsupported.is_empty() {
            tracing::warn!(unsupported = %resolved.unsupported, "skipping repositories on unsupported code hosts");
        }
        Ok(resolved)
    }

    /// Pull every image the spec's steps and the workspace mode need, and pin
    /// each step to its digest.
    pub async fn set_images(
        &self,
        spec: &mut BatchSpec,
        cancel: &CancellationToken,
        progress: impl FnMut(f64),
    ) -> Result<(), ExecError> {
        resolve_images(
            &self.images,
            &mut spec.steps,
            self.opts.workspace_mode.utility_images(),
            cancel,
            progress,
        )
        .await
    }

    pub async fn build_tasks(
        &self,
        repos: &[Repository],
        spec: &BatchSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<Task>, ExecError> {
        let tasks = fleet_plan::build_tasks(self.client.as_ref(), repos, spec, cancel).await?;
        tracing::info!(tasks = tasks.len(), "tasks built");
        Ok(tasks)
    }

    /// Run `tasks`, then append the spec's imported changesets.
    ///
    /// `progress`, when given, is called with a status snapshot every second
    /// and once more after the last task finishes.
    pub async fn execute_batch_spec(
        &self,
        tasks: Vec<Task>,
        spec: &BatchSpec,
        opts: ExecutorOpts,
        cache: Arc<dyn ExecutionCache>,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, ExecError> {
        let skip_errors = opts.skip_errors;
        let mut executor = Executor::new(
            opts,
            self.runtime.clone(),
            self.workspaces.clone(),
            cache,
        );
        for task in tasks {
            executor.add_task(Arc::new(task)).await;
        }

        let stop = CancellationToken::new();
        let ticker = progress
            .clone()
            .map(|callback| spawn_progress_ticker(executor.statuses(), callback, stop.clone()));

        executor.start(cancel);
        let report = executor.wait().await;

        stop.cancel();
        if let Some(ticker) = ticker {
            if let Err(err) = ticker.await {
                tracing::warn!(error = %err, "progress reporter stopped abnormally");
            }
        }
        if let Some(callback) = &progress {
            executor.locked_task_statuses(|statuses| callback(statuses)).await;
        }

        let ExecutionReport {
            mut specs,
            failures,
            log_files,
        } = report?;
        let mut errors = failures;

        let (imported, import_errors) =
            import_changesets(&self.resolver(), &spec.import_changesets, skip_errors, cancel)
                .await?;
        specs.extend(imported);
        errors.0.extend(import_errors.0);

        Ok(BatchOutput {
            specs,
            log_files,
            errors: errors.into_option(),
        })
    }

    /// Reject outputs where two changesets target the same branch of one repository.
    pub fn validate_changeset_specs(
        &self,
        repos: &[Repository],
        specs: &[ChangesetSpec],
    ) -> Result<(), ExecError> {
        Ok(validate_changeset_specs(repos, specs)?)
    }
}

fn spawn_progress_ticker(
    statuses: StatusTable,
    callback: ProgressFn,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    statuses.locked_task_statuses(|s| callback(s)).await;
                }
            }
        }
    })
}

//! # fleet-exec
//!
//! Runs a built task set and turns the results into changeset specs.
//!
//! - [`images`] pulls and pins every container image before anything runs.
//! - [`executor`] runs tasks concurrently, consulting the [`cache`] per step.
//! - [`changeset`] renders step outputs and changeset templates with tera.
//! - [`assemble`] merges imported changesets and rejects duplicate branches.
//! - [`service::Service`] ties the pipeline together.
//!
//! Containers and workspaces are reached only through the
//! [`runtime::ContainerRuntime`] and [`runtime::WorkspaceManager`] traits.

pub mod assemble;
pub mod cache;
pub mod changeset;
pub mod error;
pub mod executor;
pub mod images;
pub mod runtime;
pub mod service;
mod task_log;

pub use assemble::{import_changesets, validate_changeset_specs, DuplicateBranch, DuplicateBranches};
pub use cache::{execution_cache, CacheKey, DiskCache, ExecutionCache, NoOpCache, StepOutcome};
pub use error::{CacheError, ErrorList, ExecError, RuntimeError};
pub use executor::{ExecutionReport, Executor, ExecutorOpts, StatusTable, TaskPhase, TaskStatus};
pub use images::{resolve_images, ImageCache};
pub use runtime::{ContainerRuntime, StepResult, WorkspaceManager, WorkspaceMode, VOLUME_WORKSPACE_IMAGE};
pub use service::{BatchOutput, ProgressFn, Service, ServiceOpts};
pub use task_log::log_file_prefix;

//! Capabilities the executor drives: containers and workspaces.
//!
//! Both are consumed as trait objects so the engine never depends on a
//! particular container engine or checkout strategy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_core::{Step, Task};

use crate::error::RuntimeError;

/// Image the volume workspace strategy needs for copying files in and out.
pub const VOLUME_WORKSPACE_IMAGE: &str = "fleet/volume-workspace:0.1";

/// How task workspaces are made available to step containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// Bind-mount a host directory.
    #[default]
    Bind,
    /// Copy into a container volume.
    Volume,
}

impl WorkspaceMode {
    /// Utility images this mode needs in addition to the step images.
    pub fn utility_images(&self) -> &'static [&'static str] {
        match self {
            WorkspaceMode::Bind => &[],
            WorkspaceMode::Volume => &[VOLUME_WORKSPACE_IMAGE],
        }
    }
}

/// What one container run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Diff of the changes this step made on top of the workspace it received.
    pub diff: String,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` if needed and return its content digest.
    async fn ensure_image(&self, image: &str) -> Result<String, RuntimeError>;

    /// Run `step` with `workdir` mounted as its working directory.
    async fn run_step(&self, step: &Step, workdir: &Path) -> Result<StepResult, RuntimeError>;
}

#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Check out the task's repository at its base revision and return the
    /// directory the steps should run in.
    async fn prepare(&self, task: &Task) -> Result<PathBuf, RuntimeError>;

    /// Apply a previously recorded step diff, used on cache hits.
    async fn apply_diff(&self, workdir: &Path, diff: &str) -> Result<(), RuntimeError>;

    /// Full diff of the workspace against the base revision.
    async fn diff(&self, workdir: &Path) -> Result<String, RuntimeError>;

    async fn cleanup(&self, workdir: &Path) -> Result<(), RuntimeError>;
}

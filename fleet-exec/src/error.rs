//! Error types for fleet-exec.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use fleet_plan::PlanError;

use crate::assemble::DuplicateBranches;

/// Opaque failure reported by a container runtime or workspace manager.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RuntimeError {
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

/// Errors from the execution cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task {task} has no step {index}")]
    MissingStep { task: String, index: usize },
}

pub(crate) fn cache_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.into(),
        source,
    }
}

/// All errors that can arise while preparing, running and assembling a batch.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Repository resolution or task building failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("pulling image {image:?}: {source}")]
    PullImage {
        image: String,
        #[source]
        source: RuntimeError,
    },

    /// Workspace preparation, diff application or diff collection failed.
    #[error("workspace error: {0}")]
    Workspace(#[source] RuntimeError),

    #[error("step {step} ({run:?}) failed: {source}")]
    Step {
        step: usize,
        run: String,
        #[source]
        source: RuntimeError,
    },

    #[error("execution cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("rendering template: {0}")]
    Template(#[from] tera::Error),

    #[error("step output {name:?}: {message}")]
    Output { name: String, message: String },

    #[error("task log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no changesetTemplate given but the steps produced a diff")]
    MissingTemplate,

    #[error("execution timed out after {after:?}")]
    Timeout { after: Duration },

    /// Context wrapper naming the task that failed.
    #[error("{repository}{}: {source}", display_path(.path))]
    Task {
        repository: String,
        path: String,
        #[source]
        source: Box<ExecError>,
    },

    #[error("resolving repository name {repository:?}: {source}")]
    Import {
        repository: String,
        #[source]
        source: PlanError,
    },

    #[error(transparent)]
    DuplicateBranches(#[from] DuplicateBranches),

    #[error(transparent)]
    Multiple(#[from] ErrorList),

    #[error("worker panicked: {0}")]
    Join(String),

    #[error("execution cancelled")]
    Cancelled,
}

impl ExecError {
    /// True when the error was caused by cancellation, however deeply wrapped.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ExecError::Cancelled => true,
            ExecError::Plan(e) | ExecError::Import { source: e, .. } => e.is_cancelled(),
            ExecError::Task { source, .. } => source.is_cancelled(),
            ExecError::Multiple(list) => !list.0.is_empty() && list.0.iter().all(Self::is_cancelled),
            _ => false,
        }
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" ({path})")
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ExecError {
    ExecError::Io {
        path: path.into(),
        source,
    }
}

/// Several independent failures reported together.
#[derive(Debug, Default)]
pub struct ErrorList(pub Vec<ExecError>);

impl ErrorList {
    /// `None` when there is nothing to report.
    pub fn into_option(self) -> Option<ErrorList> {
        if self.0.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    pub fn push(&mut self, err: ExecError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecError> {
        self.0.iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [only] => only.fmt(f),
            all => {
                writeln!(f, "{} errors occurred:", all.len())?;
                for err in all {
                    writeln!(f, "\t* {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ErrorList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_names_repository_and_path() {
        let err = ExecError::Task {
            repository: "github.com/a/b".into(),
            path: "svc".into(),
            source: Box::new(ExecError::Timeout {
                after: Duration::from_secs(1),
            }),
        };
        assert_eq!(
            err.to_string(),
            "github.com/a/b (svc): execution timed out after 1s"
        );
    }

    #[test]
    fn error_list_enumerates_entries() {
        let list = ErrorList(vec![ExecError::Cancelled, ExecError::MissingTemplate]);
        let text = list.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("\t* execution cancelled"));
    }

    #[test]
    fn cancellation_is_detected_through_wrappers() {
        let err = ExecError::Task {
            repository: "r".into(),
            path: String::new(),
            source: Box::new(ExecError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(ExecError::Plan(PlanError::Cancelled).is_cancelled());
        assert!(!ExecError::MissingTemplate.is_cancelled());
    }
}

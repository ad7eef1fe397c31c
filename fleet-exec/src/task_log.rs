//! Per-task log files under the executor's temp directory.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use fleet_core::Task;

use crate::error::{io_err, ExecError};

/// `fleet-<n>-<repo>-`, with the repository name flattened to one segment.
/// Log files get a random suffix after it and end in `.log`.
pub fn log_file_prefix(index: usize, task: &Task) -> String {
    let repo: String = task
        .repository
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    format!("fleet-{index}-{repo}-")
}

pub(crate) struct TaskLog {
    path: PathBuf,
    file: File,
}

impl TaskLog {
    pub(crate) async fn create(dir: &Path, index: usize, task: &Task) -> Result<Self, ExecError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_err(dir, e))?;
        let prefix = log_file_prefix(index, task);
        let owned = dir.to_path_buf();
        let (file, path) = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".log")
                .tempfile_in(&owned)
                .map_err(|e| io_err(&owned, e))?
                .keep()
                .map_err(|e| io_err(&owned, e.error))
        })
        .await
        .map_err(|e| ExecError::Join(e.to_string()))??;
        Ok(Self {
            path,
            file: File::from_std(file),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn line(&mut self, text: &str) -> Result<(), ExecError> {
        self.file
            .write_all(text.as_bytes())
            .await
            .map_err(|e| io_err(&self.path, e))?;
        self.file
            .write_all(b"\n")
            .await
            .map_err(|e| io_err(&self.path, e))
    }

    /// Write a titled block, skipped when `body` is empty.
    pub(crate) async fn section(&mut self, title: &str, body: &str) -> Result<(), ExecError> {
        if body.is_empty() {
            return Ok(());
        }
        self.line(&format!("--- {title}")).await?;
        self.line(body.trim_end()).await
    }

    /// Flush and close; the file is deleted unless `keep`. Returns the kept path.
    pub(crate) async fn finish(mut self, keep: bool) -> Result<Option<PathBuf>, ExecError> {
        self.file.flush().await.map_err(|e| io_err(&self.path, e))?;
        drop(self.file);
        if keep {
            return Ok(Some(self.path));
        }
        tokio::fs::remove_file(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{BatchChangeMeta, Repository};
    use tempfile::TempDir;

    fn task() -> Task {
        Task {
            repository: Repository::new("1", "github.com/acme/api", "github"),
            path: String::new(),
            steps: vec![],
            template: None,
            batch_change: BatchChangeMeta::default(),
            only_fetch_workspace: false,
        }
    }

    #[test]
    fn prefix_is_flat() {
        assert_eq!(log_file_prefix(3, &task()), "fleet-3-github.com-acme-api-");
    }

    #[tokio::test]
    async fn same_task_index_never_reuses_a_file() {
        let tmp = TempDir::new().unwrap();

        let mut first = TaskLog::create(tmp.path(), 0, &task()).await.unwrap();
        first.line("first run").await.unwrap();
        let first = first.finish(true).await.unwrap().unwrap();

        let mut second = TaskLog::create(tmp.path(), 0, &task()).await.unwrap();
        second.line("second run").await.unwrap();
        let second = second.finish(true).await.unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "first run\n");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "second run\n");
        let name = second.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("fleet-0-github.com-acme-api-"));
        assert!(name.ends_with(".log"));
    }

    #[tokio::test]
    async fn finish_removes_unless_kept() {
        let tmp = TempDir::new().unwrap();

        let mut log = TaskLog::create(tmp.path(), 0, &task()).await.unwrap();
        log.section("stdout", "hello\n").await.unwrap();
        let kept = log.finish(true).await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&kept).unwrap(), "--- stdout\nhello\n");

        let log = TaskLog::create(tmp.path(), 1, &task()).await.unwrap();
        let path = log.path().to_path_buf();
        assert!(log.finish(false).await.unwrap().is_none());
        assert!(!path.exists());
    }
}

//! Execution cache: content-addressed records of step results.
//!
//! Entries live at `<dir>/<key[0..2]>/<key>.json`. Writes use the atomic
//! `.tmp` + rename pattern so a reader never sees a half-written entry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use fleet_core::{OutputDefinition, Step, Task};

use crate::error::{cache_io_err, CacheError};

const ENTRY_VERSION: u32 = 1;

/// Recorded effect of one step: its diff, captured streams and rendered outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub diff: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// SHA-256 hex digest identifying one step of one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyInput<'a> {
    repository: &'a str,
    commit: &'a str,
    path: &'a str,
    index: usize,
    step: StepKey<'a>,
    previous: Option<&'a str>,
}

#[derive(Serialize)]
struct StepKey<'a> {
    run: &'a str,
    container: &'a str,
    digest: Option<&'a str>,
    env: &'a BTreeMap<String, String>,
    files: &'a BTreeMap<String, String>,
    outputs: &'a BTreeMap<String, OutputDefinition>,
}

impl<'a> From<&'a Step> for StepKey<'a> {
    fn from(step: &'a Step) -> Self {
        Self {
            run: &step.run,
            container: &step.container,
            digest: step.image_digest.as_deref(),
            env: &step.env,
            files: &step.files,
            outputs: &step.outputs,
        }
    }
}

impl CacheKey {
    /// Key for step `index` of `task`, chained onto the key of the step before it.
    pub fn for_step(task: &Task, index: usize, previous: Option<&CacheKey>) -> Result<Self, CacheError> {
        let step = task.steps.get(index).ok_or_else(|| CacheError::MissingStep {
            task: task.label(),
            index,
        })?;
        let input = KeyInput {
            repository: &task.repository.id.0,
            commit: task.repository.base_rev(),
            path: &task.path,
            index,
            step: StepKey::from(step),
            previous: previous.map(|k| k.as_str()),
        };
        let bytes = serde_json::to_vec(&input)?;
        Ok(Self(hex::encode(Sha256::digest(&bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

pub trait ExecutionCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<StepOutcome>, CacheError>;

    fn put(&self, key: &CacheKey, outcome: &StepOutcome) -> Result<(), CacheError>;

    /// Drop every entry; returns how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;
}

/// Pick a cache for `dir`: no directory means no caching.
pub fn execution_cache(dir: Option<&Path>) -> Arc<dyn ExecutionCache> {
    match dir {
        Some(dir) if !dir.as_os_str().is_empty() => Arc::new(DiskCache::new(dir)),
        _ => Arc::new(NoOpCache),
    }
}

/// Always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpCache;

impl ExecutionCache for NoOpCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<StepOutcome>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _outcome: &StepOutcome) -> Result<(), CacheError> {
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    version: u32,
    key: CacheKey,
    cached_at: DateTime<Utc>,
    outcome: StepOutcome,
}

/// One JSON file per key under a cache directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<key[0..2]>/<key>.json`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let shard = key.as_str().get(..2).unwrap_or("__");
        self.dir.join(shard).join(format!("{key}.json"))
    }
}

impl ExecutionCache for DiskCache {
    fn get(&self, key: &CacheKey) -> Result<Option<StepOutcome>, CacheError> {
        let path = self.entry_path(key);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                return Ok(None);
            }
        };
        match serde_json::from_slice::<CacheEntry>(&contents) {
            Ok(entry) if entry.version == ENTRY_VERSION && entry.key == *key => {
                tracing::debug!(key = %key, "cache hit");
                Ok(Some(entry.outcome))
            }
            Ok(entry) => {
                tracing::warn!(
                    path = %path.display(),
                    version = entry.version,
                    "ignoring cache entry written for a different key or version"
                );
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt cache entry");
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, outcome: &StepOutcome) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let Some(dir) = path.parent() else {
            return Err(cache_io_err(
                path,
                std::io::Error::other("invalid cache entry path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| cache_io_err(dir, e))?;

        let entry = CacheEntry {
            version: ENTRY_VERSION,
            key: key.clone(),
            cached_at: Utc::now(),
            outcome: outcome.clone(),
        };
        let json = serde_json::to_string_pretty(&entry)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| cache_io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| cache_io_err(&path, e))?;
        tracing::debug!(key = %key, "cache entry written");
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let shards = std::fs::read_dir(&self.dir).map_err(|e| cache_io_err(&self.dir, e))?;
        for shard in shards {
            let shard = shard.map_err(|e| cache_io_err(&self.dir, e))?.path();
            if !shard.is_dir() {
                continue;
            }
            let entries = std::fs::read_dir(&shard).map_err(|e| cache_io_err(&shard, e))?;
            for entry in entries {
                let path = entry.map_err(|e| cache_io_err(&shard, e))?.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    removed += 1;
                }
            }
            std::fs::remove_dir_all(&shard).map_err(|e| cache_io_err(&shard, e))?;
        }
        Ok(removed)
    }
}

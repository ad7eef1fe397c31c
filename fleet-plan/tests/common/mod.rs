//! In-memory [`SourceClient`] shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fleet_core::Repository;
use fleet_plan::{AliasedQuery, ClientError, SearchResult, SourceClient};

/// Serves repositories, revisions and marker-file locations from maps.
#[derive(Default)]
pub struct FakeClient {
    pub repos: HashMap<String, Repository>,
    /// `(repo name, rev)` → commit.
    pub revisions: HashMap<(String, String), String>,
    /// query → rows.
    pub searches: HashMap<String, Vec<SearchResult>>,
    /// repo name → files present in it.
    pub files: HashMap<String, Vec<String>>,
    pub aliased_calls: AtomicUsize,
    pub aliased_batch_sizes: Mutex<Vec<usize>>,
}

impl FakeClient {
    pub fn with_repo(mut self, repo: Repository) -> Self {
        self.repos.insert(repo.name.clone(), repo);
        self
    }

    pub fn with_revision(mut self, name: &str, rev: &str, commit: &str) -> Self {
        self.revisions
            .insert((name.to_string(), rev.to_string()), commit.to_string());
        self
    }

    pub fn with_search(mut self, query: &str, rows: Vec<SearchResult>) -> Self {
        self.searches.insert(query.to_string(), rows);
        self
    }

    pub fn with_files(mut self, name: &str, files: &[&str]) -> Self {
        self.files
            .insert(name.to_string(), files.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn aliased_calls(&self) -> usize {
        self.aliased_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for FakeClient {
    async fn repository(
        &self,
        name: &str,
        rev: Option<&str>,
    ) -> Result<Option<Repository>, ClientError> {
        let Some(mut repo) = self.repos.get(name).cloned() else {
            return Ok(None);
        };
        if let Some(rev) = rev {
            repo.commit = self
                .revisions
                .get(&(name.to_string(), rev.to_string()))
                .cloned();
        }
        Ok(Some(repo))
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ClientError> {
        self.searches
            .get(query)
            .cloned()
            .ok_or_else(|| ClientError::new(format!("unexpected query {query:?}")))
    }

    async fn search_aliased(
        &self,
        queries: &[AliasedQuery],
    ) -> Result<HashMap<String, Vec<SearchResult>>, ClientError> {
        self.aliased_calls.fetch_add(1, Ordering::SeqCst);
        self.aliased_batch_sizes
            .lock()
            .expect("lock")
            .push(queries.len());

        let mut out = HashMap::new();
        for q in queries {
            let Some(repo) = self
                .repos
                .values()
                .find(|r| q.query.contains(&format!("repo:^{}$", regex::escape(&r.name))))
            else {
                out.insert(q.alias.clone(), vec![]);
                continue;
            };
            let marker = q
                .query
                .split_whitespace()
                .next()
                .and_then(|f| f.strip_prefix("file:(^|/)"))
                .and_then(|f| f.strip_suffix('$'))
                .map(|f| f.replace('\\', ""))
                .unwrap_or_default();
            let rows = self
                .files
                .get(&repo.name)
                .into_iter()
                .flatten()
                .filter(|f| f.rsplit('/').next() == Some(marker.as_str()))
                .map(|f| SearchResult::FileMatch {
                    repository: repo.clone(),
                    path: f.clone(),
                })
                .collect();
            out.insert(q.alias.clone(), rows);
        }
        Ok(out)
    }
}

pub fn repo(id: &str, name: &str) -> Repository {
    Repository::new(id, name, "github").with_branch("main", format!("commit-{id}"))
}

//! Domain types shared by every fleet crate.
//!
//! Repositories and tasks are built once per invocation and never mutated
//! afterwards; changeset specs are the serialisable output of a run.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::spec::{ChangesetTemplate, Step};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of a repository on the code host (GraphQL node ID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub String);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of an existing changeset on the code host, e.g. a PR number.
///
/// Spec documents may carry strings, integers or floats; all of them are
/// normalised to their canonical string form on deserialisation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "serde_yaml::Value", into = "String")]
pub struct ExternalId(String);

impl ExternalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ExternalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for ExternalId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        id.0
    }
}

impl TryFrom<serde_yaml::Value> for ExternalId {
    type Error = SpecError;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        match value {
            serde_yaml::Value::String(s) => Ok(Self(s)),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self(i.to_string()))
                } else if let Some(u) = n.as_u64() {
                    Ok(Self(u.to_string()))
                } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    // f64's Display never uses exponent notation.
                    Ok(Self(f.to_string()))
                } else {
                    Err(SpecError::ExternalId(n.to_string()))
                }
            }
            other => Err(SpecError::ExternalId(format!("{other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// A named branch pointing at a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: String,
}

/// A repository as resolved from the code host.
///
/// Identity is [`Repository::id`]; two values with the same id describe the
/// same repository even if their branch information differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: RepoId,
    pub name: String,
    /// Code host kind, e.g. `github`.
    pub service_type: String,
    /// The branch the pipeline runs against (default branch unless pinned).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    /// Commit a requested revision resolved to, when one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Files matched by the content search that surfaced this repository.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub file_matches: BTreeSet<String>,
}

impl Repository {
    pub fn new(id: impl Into<RepoId>, name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service_type: service_type.into(),
            branch: None,
            commit: None,
            file_matches: BTreeSet::new(),
        }
    }

    /// Builder-style helper to attach a branch.
    pub fn with_branch(mut self, name: impl Into<String>, commit: impl Into<String>) -> Self {
        self.branch = Some(Branch {
            name: name.into(),
            commit: commit.into(),
        });
        self
    }

    /// True when the repository has a branch with a resolved commit.
    pub fn has_branch(&self) -> bool {
        self.branch
            .as_ref()
            .is_some_and(|b| !b.name.is_empty() && !b.commit.is_empty())
    }

    /// Fully-qualified ref of the branch, e.g. `refs/heads/main`.
    pub fn base_ref(&self) -> String {
        self.branch
            .as_ref()
            .map(|b| ensure_ref_prefix(&b.name))
            .unwrap_or_default()
    }

    /// Commit the branch points at, or the empty string.
    pub fn base_rev(&self) -> &str {
        self.branch.as_ref().map(|b| b.commit.as_str()).unwrap_or("")
    }
}

/// Prefix `refs/heads/` onto a branch name unless it is already a full ref.
pub fn ensure_ref_prefix(branch: &str) -> String {
    if branch.starts_with("refs/heads/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Name and description of the batch change, exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchChangeMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One unit of work: a repository, a directory within it, and the pipeline
/// to run there. `path == ""` is the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub repository: Repository,
    pub path: String,
    pub steps: Vec<Step>,
    pub template: Option<ChangesetTemplate>,
    pub batch_change: BatchChangeMeta,
    pub only_fetch_workspace: bool,
}

impl Task {
    /// Short human label, `repo` or `repo:path`.
    pub fn label(&self) -> String {
        if self.path.is_empty() {
            self.repository.name.clone()
        } else {
            format!("{}:{}", self.repository.name, self.path)
        }
    }
}

// ---------------------------------------------------------------------------
// Changeset specs
// ---------------------------------------------------------------------------

/// A single commit carried by a branch changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDescription {
    pub message: String,
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
}

/// A changeset produced by running the pipeline, pushed to `head_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchChangeset {
    pub base_ref: String,
    pub base_rev: String,
    pub head_repository: RepoId,
    pub head_ref: String,
    pub title: String,
    pub body: String,
    pub commits: Vec<CommitDescription>,
    pub published: bool,
}

/// The two shapes a changeset spec can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangesetKind {
    /// An existing changeset on the code host, imported unmodified.
    External {
        #[serde(rename = "externalID")]
        external_id: ExternalId,
    },
    Branch(BranchChangeset),
}

/// Output artifact describing one proposed or imported change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetSpec {
    pub base_repository: RepoId,
    #[serde(flatten)]
    pub kind: ChangesetKind,
}

impl ChangesetSpec {
    pub fn external(base_repository: RepoId, external_id: ExternalId) -> Self {
        Self {
            base_repository,
            kind: ChangesetKind::External { external_id },
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, ChangesetKind::External { .. })
    }

    /// `(headRepository, headRef)` for branch changesets, `None` for imports.
    pub fn head(&self) -> Option<(&RepoId, &str)> {
        match &self.kind {
            ChangesetKind::Branch(b) => Some((&b.head_repository, b.head_ref.as_str())),
            ChangesetKind::External { .. } => None,
        }
    }

    pub fn external_id(&self) -> Option<&ExternalId> {
        match &self.kind {
            ChangesetKind::External { external_id } => Some(external_id),
            ChangesetKind::Branch(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Batch spec document: the declarative input of a run.
//!
//! # Document shape
//!
//! ```yaml
//! name: bump-lodash
//! description: Bump lodash everywhere
//! on:
//!   - repositoriesMatchingQuery: file:package.json lodash
//!   - repository: github.com/acme/api
//!     branch: release
//! workspaces:
//!   - in: github.com/acme/monorepo
//!     rootAtLocationOf: package.json
//!     onlyFetchWorkspace: true
//! steps:
//!   - run: npm install lodash@4.17.21
//!     container: node:18
//! changesetTemplate:
//!   title: Bump lodash
//!   branch: bump-lodash
//!   commit:
//!     message: Bump lodash
//! importChangesets:
//!   - repository: github.com/acme/web
//!     externalIDs: [123, "456"]
//! ```
//!
//! [`BatchSpec::parse`] and [`BatchSpec::load_at`] always validate after
//! deserialising; a returned spec is structurally sound.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SpecError};
use crate::types::{BatchChangeMeta, ExternalId};

// ---------------------------------------------------------------------------
// `on` declarations
// ---------------------------------------------------------------------------

/// Where to find target repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOn", into = "RawOn")]
pub enum OnDeclaration {
    /// Every repository returned by a code search.
    Query(String),
    /// A single repository, on its default branch unless `branch` is set.
    Repository { name: String, branch: Option<String> },
}

impl fmt::Display for OnDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnDeclaration::Query(q) => write!(f, "repositoriesMatchingQuery:{q}"),
            OnDeclaration::Repository { name, branch: None } => write!(f, "repository:{name}"),
            OnDeclaration::Repository {
                name,
                branch: Some(branch),
            } => write!(f, "repository:{name}@{branch}"),
        }
    }
}

/// Wire form of an `on` entry before it is checked for exactly one shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawOn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repositories_matching_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
}

impl TryFrom<RawOn> for OnDeclaration {
    type Error = SpecError;

    fn try_from(raw: RawOn) -> Result<Self, Self::Error> {
        let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        match (
            non_empty(raw.repositories_matching_query),
            non_empty(raw.repository),
            non_empty(raw.branch),
        ) {
            (Some(query), None, None) => Ok(OnDeclaration::Query(query)),
            (None, Some(name), branch) => Ok(OnDeclaration::Repository { name, branch }),
            (Some(_), Some(_), _) => Err(SpecError::Invalid(
                "an 'on' entry must set either repositoriesMatchingQuery or repository, not both"
                    .to_string(),
            )),
            (Some(_), None, Some(_)) => Err(SpecError::Invalid(
                "'branch' can only be used together with 'repository'".to_string(),
            )),
            (None, None, _) => Err(SpecError::MalformedOn),
        }
    }
}

impl From<OnDeclaration> for RawOn {
    fn from(on: OnDeclaration) -> Self {
        match on {
            OnDeclaration::Query(q) => RawOn {
                repositories_matching_query: Some(q),
                ..RawOn::default()
            },
            OnDeclaration::Repository { name, branch } => RawOn {
                repository: Some(name),
                branch,
                ..RawOn::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Workspaces, steps, templates
// ---------------------------------------------------------------------------

/// A rule assigning repositories whose name matches `glob` to sub-directory
/// workspaces rooted wherever `root_at_location_of` is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfiguration {
    #[serde(rename = "in")]
    pub glob: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_at_location_of: Option<String>,
    #[serde(default)]
    pub only_fetch_workspace: bool,
}

/// How a step output value is interpreted after rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// A named value captured from a step, rendered from its stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDefinition {
    pub value: String,
    #[serde(default)]
    pub format: OutputFormat,
}

/// One command run inside a container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub run: String,
    pub container: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Files mounted into the container: path → content.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputDefinition>,
    /// Content digest the container reference was pinned to before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
}

impl Step {
    pub fn new(run: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            container: container.into(),
            env: BTreeMap::new(),
            files: BTreeMap::new(),
            outputs: BTreeMap::new(),
            image_digest: None,
        }
    }

    /// The image reference to hand to the container runtime: the pinned
    /// digest when resolved, the declared reference otherwise.
    pub fn image(&self) -> &str {
        self.image_digest.as_deref().unwrap_or(&self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTemplate {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<CommitAuthor>,
}

/// Template every produced branch changeset is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetTemplate {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub branch: String,
    pub commit: CommitTemplate,
    #[serde(default)]
    pub published: bool,
}

/// Existing changesets to track alongside the produced ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportChangeset {
    pub repository: String,
    #[serde(rename = "externalIDs")]
    pub external_ids: Vec<ExternalId>,
}

// ---------------------------------------------------------------------------
// Batch spec
// ---------------------------------------------------------------------------

/// Root of a batch spec document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub on: Vec<OnDeclaration>,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfiguration>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset_template: Option<ChangesetTemplate>,
    #[serde(default)]
    pub import_changesets: Vec<ImportChangeset>,
}

impl BatchSpec {
    /// Parse and validate a spec from YAML (or JSON) text.
    pub fn parse(input: &str) -> Result<Self, SpecError> {
        let spec: BatchSpec = serde_yaml::from_str(input)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load, parse and validate a spec file. Parse errors carry the path.
    pub fn load_at(path: &Path) -> Result<Self, SpecError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let spec: BatchSpec = serde_yaml::from_str(&contents).map_err(|e| SpecError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check structural rules serde cannot express.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(SpecError::Invalid(format!(
                "name {:?} must be non-empty and contain only letters, digits, '_', '.' or '-'",
                self.name
            )));
        }

        if self.on.is_empty() && self.import_changesets.is_empty() {
            return Err(SpecError::Invalid(
                "at least one 'on' entry or 'importChangesets' entry is required".to_string(),
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.run.trim().is_empty() {
                return Err(SpecError::Invalid(format!("steps[{i}].run must not be empty")));
            }
            if step.container.trim().is_empty() {
                return Err(SpecError::Invalid(format!(
                    "steps[{i}].container must not be empty"
                )));
            }
        }

        if !self.steps.is_empty() && self.changeset_template.is_none() {
            return Err(SpecError::Invalid(
                "changesetTemplate is required when steps are given".to_string(),
            ));
        }

        for ws in &self.workspaces {
            glob::Pattern::new(&ws.glob).map_err(|e| SpecError::InvalidGlob {
                glob: ws.glob.clone(),
                message: e.msg.to_string(),
            })?;
            if ws.root_at_location_of.as_deref().is_some_and(|f| f.contains('/')) {
                return Err(SpecError::Invalid(format!(
                    "workspaces.rootAtLocationOf {:?} must be a file name, not a path",
                    ws.root_at_location_of.as_deref().unwrap_or_default()
                )));
            }
        }

        for ic in &self.import_changesets {
            if ic.repository.trim().is_empty() {
                return Err(SpecError::Invalid(
                    "importChangesets[].repository must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Name and description as exposed to changeset templates.
    pub fn batch_change_meta(&self) -> BatchChangeMeta {
        BatchChangeMeta {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: hello
on:
  - repository: github.com/a/b
"#;

    #[test]
    fn parses_minimal_spec() {
        let spec = BatchSpec::parse(MINIMAL).unwrap();
        assert_eq!(spec.name, "hello");
        assert_eq!(
            spec.on,
            vec![OnDeclaration::Repository {
                name: "github.com/a/b".into(),
                branch: None
            }]
        );
    }

    #[test]
    fn on_variants_are_exclusive() {
        let doc = r#"
name: x
on:
  - repositoriesMatchingQuery: foo
    repository: github.com/a/b
"#;
        let err = BatchSpec::parse(doc).unwrap_err();
        assert!(err.to_string().contains("not both"), "got: {err}");
    }

    #[test]
    fn empty_on_entry_is_malformed() {
        let doc = "name: x\non:\n  - {}\n";
        let err = BatchSpec::parse(doc).unwrap_err();
        assert!(err.to_string().contains("malformed 'on' field"), "got: {err}");
    }

    #[test]
    fn on_display_matches_declaration() {
        let on = OnDeclaration::Repository {
            name: "r".into(),
            branch: Some("b".into()),
        };
        assert_eq!(on.to_string(), "repository:r@b");
        assert_eq!(
            OnDeclaration::Query("q".into()).to_string(),
            "repositoriesMatchingQuery:q"
        );
    }

    #[test]
    fn steps_require_template() {
        let doc = r#"
name: x
on:
  - repository: r
steps:
  - run: echo hi
    container: alpine
"#;
        let err = BatchSpec::parse(doc).unwrap_err();
        assert!(err.to_string().contains("changesetTemplate"), "got: {err}");
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let doc = r#"
name: x
on:
  - repository: r
workspaces:
  - in: "github.com/[a"
    rootAtLocationOf: go.mod
"#;
        let err = BatchSpec::parse(doc).unwrap_err();
        assert!(matches!(err, SpecError::InvalidGlob { .. }), "got: {err}");
    }

    #[test]
    fn step_image_prefers_digest() {
        let mut step = Step::new("true", "alpine:3");
        assert_eq!(step.image(), "alpine:3");
        step.image_digest = Some("sha256:abc".into());
        assert_eq!(step.image(), "sha256:abc");
    }

    #[test]
    fn on_declaration_serialises_back_to_wire_shape() {
        let yaml = serde_yaml::to_string(&OnDeclaration::Query("lang:go".into())).unwrap();
        assert!(yaml.contains("repositoriesMatchingQuery: lang:go"), "got: {yaml}");
    }
}

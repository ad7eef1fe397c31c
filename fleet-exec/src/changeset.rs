//! Tera rendering of step outputs and changeset templates.
//!
//! Templates see a [`TemplateContext`]:
//!
//! | key             | value                                          |
//! |-----------------|------------------------------------------------|
//! | `repository`    | `{ name, id }`                                 |
//! | `path`          | workspace path, `""` for the repository root   |
//! | `batch_change`  | `{ name, description }`                        |
//! | `outputs`       | every step output captured so far              |
//! | `steps`         | `{ modified_files }` from the final diff       |
//! | `step`          | `{ stdout, stderr, modified_files }` (outputs only) |

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tera::{Context, Tera};

use fleet_core::{
    ensure_ref_prefix, BatchChangeMeta, BranchChangeset, ChangesetKind, ChangesetSpec,
    CommitDescription, OutputFormat, Step, Task,
};

use crate::error::ExecError;
use crate::runtime::StepResult;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext<'a> {
    pub repository: RepositoryCtx<'a>,
    pub path: &'a str,
    pub batch_change: &'a BatchChangeMeta,
    pub outputs: &'a BTreeMap<String, serde_json::Value>,
    pub steps: StepsCtx,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepCtx<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryCtx<'a> {
    pub name: &'a str,
    pub id: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StepsCtx {
    pub modified_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepCtx<'a> {
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub modified_files: Vec<String>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(task: &'a Task, outputs: &'a BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            repository: RepositoryCtx {
                name: &task.repository.name,
                id: &task.repository.id.0,
            },
            path: &task.path,
            batch_change: &task.batch_change,
            outputs,
            steps: StepsCtx::default(),
            step: None,
        }
    }

    fn into_tera(self) -> Result<Context, ExecError> {
        Ok(Context::from_serialize(self)?)
    }
}

/// Paths touched by a unified diff, sorted and deduplicated.
pub fn modified_files(diff: &str) -> Vec<String> {
    let mut files = BTreeSet::new();
    for line in diff.lines() {
        let path = line
            .strip_prefix("+++ b/")
            .or_else(|| line.strip_prefix("--- a/"));
        if let Some(path) = path {
            files.insert(path.trim_end().to_string());
        }
    }
    files.into_iter().collect()
}

fn render_all(
    templates: &[(&str, &str)],
    context: &Context,
) -> Result<BTreeMap<String, String>, ExecError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(templates.iter().copied())?;
    let mut rendered = BTreeMap::new();
    for (name, _) in templates {
        rendered.insert(name.to_string(), tera.render(name, context)?);
    }
    Ok(rendered)
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

/// Render the outputs `step` declares from what it just printed.
pub fn render_step_outputs(
    task: &Task,
    step: &Step,
    result: &StepResult,
    previous: &BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, serde_json::Value>, ExecError> {
    if step.outputs.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut ctx = TemplateContext::new(task, previous);
    ctx.step = Some(StepCtx {
        stdout: &result.stdout,
        stderr: &result.stderr,
        modified_files: modified_files(&result.diff),
    });
    let context = ctx.into_tera()?;

    let templates: Vec<(&str, &str)> = step
        .outputs
        .iter()
        .map(|(name, def)| (name.as_str(), def.value.as_str()))
        .collect();
    let rendered = render_all(&templates, &context)?;

    let mut values = BTreeMap::new();
    for (name, def) in &step.outputs {
        let text = rendered.get(name).map(String::as_str).unwrap_or_default();
        let value = match def.format {
            OutputFormat::Text => serde_json::Value::String(text.to_string()),
            OutputFormat::Json => serde_json::from_str(text).map_err(|e| ExecError::Output {
                name: name.clone(),
                message: format!("invalid JSON: {e}"),
            })?,
            OutputFormat::Yaml => serde_yaml::from_str(text).map_err(|e| ExecError::Output {
                name: name.clone(),
                message: format!("invalid YAML: {e}"),
            })?,
        };
        values.insert(name.clone(), value);
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// Changeset specs
// ---------------------------------------------------------------------------

/// Build the branch changeset spec for a finished task.
pub fn render_changeset_spec(
    task: &Task,
    diff: &str,
    outputs: &BTreeMap<String, serde_json::Value>,
) -> Result<ChangesetSpec, ExecError> {
    let template = task.template.as_ref().ok_or(ExecError::MissingTemplate)?;

    let mut ctx = TemplateContext::new(task, outputs);
    ctx.steps.modified_files = modified_files(diff);
    let context = ctx.into_tera()?;

    let rendered = render_all(
        &[
            ("title", template.title.as_str()),
            ("body", template.body.as_str()),
            ("branch", template.branch.as_str()),
            ("message", template.commit.message.as_str()),
        ],
        &context,
    )?;
    let field = |name: &str| rendered.get(name).cloned().unwrap_or_default();

    let (author_name, author_email) = match &template.commit.author {
        Some(author) => (Some(author.name.clone()), Some(author.email.clone())),
        None => (None, None),
    };

    Ok(ChangesetSpec {
        base_repository: task.repository.id.clone(),
        kind: ChangesetKind::Branch(BranchChangeset {
            base_ref: task.repository.base_ref(),
            base_rev: task.repository.base_rev().to_string(),
            head_repository: task.repository.id.clone(),
            head_ref: ensure_ref_prefix(field("branch").trim()),
            title: field("title"),
            body: field("body"),
            commits: vec![CommitDescription {
                message: field("message"),
                diff: diff.to_string(),
                author_name,
                author_email,
            }],
            published: template.published,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{ChangesetTemplate, CommitTemplate, OutputDefinition, Repository};

    fn task() -> Task {
        Task {
            repository: Repository::new("R1", "github.com/acme/api", "github")
                .with_branch("main", "c0ffee"),
            path: "svc".into(),
            steps: vec![],
            template: Some(ChangesetTemplate {
                title: "Bump {{ outputs.version }} in {{ repository.name }}".into(),
                body: "Touched: {{ steps.modified_files | join(sep=\", \") }}".into(),
                branch: "{{ batch_change.name }}-{{ path }}".into(),
                commit: CommitTemplate {
                    message: "bump".into(),
                    author: None,
                },
                published: false,
            }),
            batch_change: BatchChangeMeta {
                name: "bump".into(),
                description: String::new(),
            },
            only_fetch_workspace: false,
        }
    }

    const DIFF: &str = "diff --git a/go.mod b/go.mod\n--- a/go.mod\n+++ b/go.mod\n@@ -1 +1 @@\n-a\n+b\n";

    #[test]
    fn parses_modified_files() {
        let diff = "--- a/x.txt\n+++ b/x.txt\n--- /dev/null\n+++ b/new.txt\n";
        assert_eq!(modified_files(diff), vec!["new.txt", "x.txt"]);
    }

    #[test]
    fn renders_branch_changeset() {
        let mut outputs = BTreeMap::new();
        outputs.insert("version".to_string(), serde_json::json!("1.2"));

        let spec = render_changeset_spec(&task(), DIFF, &outputs).unwrap();
        let ChangesetKind::Branch(branch) = &spec.kind else {
            panic!("expected branch changeset");
        };
        assert_eq!(branch.title, "Bump 1.2 in github.com/acme/api");
        assert_eq!(branch.body, "Touched: go.mod");
        assert_eq!(branch.head_ref, "refs/heads/bump-svc");
        assert_eq!(branch.base_ref, "refs/heads/main");
        assert_eq!(branch.base_rev, "c0ffee");
        assert_eq!(branch.head_repository, spec.base_repository);
        assert_eq!(branch.commits[0].diff, DIFF);
    }

    #[test]
    fn missing_template_is_an_error() {
        let mut t = task();
        t.template = None;
        assert!(matches!(
            render_changeset_spec(&t, DIFF, &BTreeMap::new()),
            Err(ExecError::MissingTemplate)
        ));
    }

    #[test]
    fn undefined_variable_fails_rendering() {
        let mut t = task();
        if let Some(tpl) = t.template.as_mut() {
            tpl.title = "{{ outputs.nope }}".into();
        }
        assert!(matches!(
            render_changeset_spec(&t, DIFF, &BTreeMap::new()),
            Err(ExecError::Template(_))
        ));
    }

    #[test]
    fn step_outputs_follow_their_format() {
        let mut step = Step::new("echo", "alpine");
        step.outputs.insert(
            "raw".into(),
            OutputDefinition {
                value: "{{ step.stdout | trim }}".into(),
                format: OutputFormat::Text,
            },
        );
        step.outputs.insert(
            "parsed".into(),
            OutputDefinition {
                value: "{{ step.stdout }}".into(),
                format: OutputFormat::Json,
            },
        );
        let result = StepResult {
            stdout: "{\"n\": 3}\n".into(),
            ..Default::default()
        };

        let values = render_step_outputs(&task(), &step, &result, &BTreeMap::new()).unwrap();
        assert_eq!(values["raw"], serde_json::json!("{\"n\": 3}"));
        assert_eq!(values["parsed"], serde_json::json!({"n": 3}));
    }

    #[test]
    fn invalid_json_output_names_the_output() {
        let mut step = Step::new("echo", "alpine");
        step.outputs.insert(
            "parsed".into(),
            OutputDefinition {
                value: "{{ step.stdout }}".into(),
                format: OutputFormat::Json,
            },
        );
        let result = StepResult {
            stdout: "not json".into(),
            ..Default::default()
        };
        let err = render_step_outputs(&task(), &step, &result, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("\"parsed\""));
    }
}

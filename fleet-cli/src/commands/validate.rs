//! `fleet validate`: parse a batch spec and summarise what it would do.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleet_core::BatchSpec;

/// Arguments for `fleet validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the batch spec (YAML or JSON).
    pub spec: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let spec = BatchSpec::load_at(&self.spec)
            .with_context(|| format!("invalid batch spec {}", self.spec.display()))?;
        tracing::debug!(name = %spec.name, "batch spec is valid");

        if self.json {
            let summary = Summary::from(&spec);
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize summary JSON")?
            );
            return Ok(());
        }

        print_table(&spec);
        Ok(())
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    name: &'a str,
    description: &'a str,
    on: Vec<String>,
    workspaces: Vec<WorkspaceSummary<'a>>,
    steps: Vec<StepSummary<'a>>,
    imported_changesets: usize,
    has_changeset_template: bool,
}

#[derive(Serialize)]
struct WorkspaceSummary<'a> {
    glob: &'a str,
    root_at_location_of: Option<&'a str>,
    only_fetch_workspace: bool,
}

#[derive(Serialize)]
struct StepSummary<'a> {
    run: &'a str,
    container: &'a str,
    outputs: Vec<&'a str>,
}

impl<'a> From<&'a BatchSpec> for Summary<'a> {
    fn from(spec: &'a BatchSpec) -> Self {
        Self {
            name: &spec.name,
            description: &spec.description,
            on: spec.on.iter().map(ToString::to_string).collect(),
            workspaces: spec
                .workspaces
                .iter()
                .map(|ws| WorkspaceSummary {
                    glob: &ws.glob,
                    root_at_location_of: ws.root_at_location_of.as_deref(),
                    only_fetch_workspace: ws.only_fetch_workspace,
                })
                .collect(),
            steps: spec
                .steps
                .iter()
                .map(|s| StepSummary {
                    run: &s.run,
                    container: &s.container,
                    outputs: s.outputs.keys().map(String::as_str).collect(),
                })
                .collect(),
            imported_changesets: spec
                .import_changesets
                .iter()
                .map(|ic| ic.external_ids.len())
                .sum(),
            has_changeset_template: spec.changeset_template.is_some(),
        }
    }
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "section")]
    section: String,
    #[tabled(rename = "entry")]
    entry: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn row(section: &str, entry: impl Into<String>, detail: impl Into<String>) -> Row {
    Row {
        section: section.to_string(),
        entry: entry.into(),
        detail: detail.into(),
    }
}

fn print_table(spec: &BatchSpec) {
    println!("{} {}", "✓".green(), spec.name.bold());
    if !spec.description.is_empty() {
        println!("{}", spec.description.trim_end().bright_black());
    }

    let mut rows = Vec::new();
    for on in &spec.on {
        rows.push(row("on", on.to_string(), ""));
    }
    for ws in &spec.workspaces {
        let detail = match &ws.root_at_location_of {
            Some(marker) => format!("root at {marker}"),
            None => "repository root".to_string(),
        };
        let detail = if ws.only_fetch_workspace {
            format!("{detail}, fetch workspace only")
        } else {
            detail
        };
        rows.push(row("workspace", ws.glob.clone(), detail));
    }
    for (i, step) in spec.steps.iter().enumerate() {
        rows.push(row(
            "step",
            format!("{}. {}", i + 1, step.run.lines().next().unwrap_or_default()),
            step.container.clone(),
        ));
    }
    for ic in &spec.import_changesets {
        let ids: Vec<&str> = ic.external_ids.iter().map(|id| id.as_str()).collect();
        rows.push(row("import", ic.repository.clone(), ids.join(", ")));
    }
    if let Some(template) = &spec.changeset_template {
        rows.push(row("changeset", "branch", template.branch.clone()));
        rows.push(row("changeset", "title", template.title.clone()));
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

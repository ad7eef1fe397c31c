//! Batch spec loading, error-message and normalisation tests.

use assert_fs::prelude::*;
use fleet_core::{BatchSpec, OnDeclaration, SpecError};
use predicates::prelude::predicate;
use rstest::rstest;

const FULL_SPEC: &str = r#"
name: bump-lodash
description: Bump lodash everywhere
on:
  - repositoriesMatchingQuery: file:package.json lodash
  - repository: github.com/acme/api
    branch: release
workspaces:
  - in: github.com/acme/monorepo
    rootAtLocationOf: package.json
    onlyFetchWorkspace: true
steps:
  - run: npm install lodash@4.17.21
    container: node:18
    env:
      CI: "true"
    outputs:
      version:
        value: "{{ step.stdout }}"
changesetTemplate:
  title: Bump lodash
  body: Automated
  branch: bump-lodash
  commit:
    message: Bump lodash
    author:
      name: Fleet
      email: fleet@example.com
  published: false
importChangesets:
  - repository: github.com/acme/web
    externalIDs: [123, "456"]
"#;

// ---------------------------------------------------------------------------
// 1. Loading from disk
// ---------------------------------------------------------------------------

#[test]
fn load_full_spec_from_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("batch.yaml");
    file.write_str(FULL_SPEC).expect("write");

    let spec = BatchSpec::load_at(file.path()).expect("load");
    assert_eq!(spec.on.len(), 2);
    assert_eq!(
        spec.on[1],
        OnDeclaration::Repository {
            name: "github.com/acme/api".into(),
            branch: Some("release".into())
        }
    );
    assert!(spec.workspaces[0].only_fetch_workspace);
    assert_eq!(spec.steps[0].env.get("CI").map(String::as_str), Some("true"));
    assert_eq!(spec.steps[0].outputs["version"].value, "{{ step.stdout }}");

    let ids: Vec<&str> = spec.import_changesets[0]
        .external_ids
        .iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(ids, vec!["123", "456"]);
    file.assert(predicate::path::exists());
}

#[test]
fn load_missing_file_reports_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = BatchSpec::load_at(&dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(err, SpecError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains("nope.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("broken.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = BatchSpec::load_at(file.path()).unwrap_err();
    assert!(matches!(err, SpecError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("broken.yaml"));
}

// ---------------------------------------------------------------------------
// 2. Validation
// ---------------------------------------------------------------------------

#[rstest]
#[case("name: ''\non:\n  - repository: r\n", "name")]
#[case("name: 'has space'\non:\n  - repository: r\n", "name")]
#[case("name: x\n", "at least one")]
#[case("name: x\non:\n  - branch: main\n", "malformed")]
#[case(
    "name: x\non:\n  - repositoriesMatchingQuery: q\n    branch: main\n",
    "only be used together"
)]
#[case(
    "name: x\non:\n  - repository: r\nworkspaces:\n  - in: '*'\n    rootAtLocationOf: a/go.mod\n",
    "file name"
)]
#[case(
    "name: x\non:\n  - repository: r\nsteps:\n  - run: ''\n    container: alpine\nchangesetTemplate:\n  title: t\n  branch: b\n  commit:\n    message: m\n",
    "steps[0].run"
)]
fn invalid_specs_are_rejected(#[case] doc: &str, #[case] needle: &str) {
    let err = BatchSpec::parse(doc).unwrap_err();
    assert!(err.to_string().contains(needle), "expected {needle:?} in: {err}");
}

#[test]
fn import_only_spec_is_valid() {
    let doc = "name: x\nimportChangesets:\n  - repository: r\n    externalIDs: [1]\n";
    let spec = BatchSpec::parse(doc).expect("parse");
    assert!(spec.on.is_empty());
    assert_eq!(spec.import_changesets[0].external_ids[0].as_str(), "1");
}

#[test]
fn json_documents_are_accepted() {
    let doc = r#"{"name": "x", "on": [{"repository": "r", "branch": "b"}]}"#;
    let spec = BatchSpec::parse(doc).expect("parse json");
    assert_eq!(spec.on[0].to_string(), "repository:r@b");
}

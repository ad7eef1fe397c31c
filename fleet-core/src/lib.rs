//! Fleet core library: batch spec model, parsing and validation, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, repositories, tasks and changeset specs
//! - [`spec`]: batch spec document, load / parse / validate
//! - [`error`]: [`SpecError`]

pub mod error;
pub mod spec;
pub mod types;

pub use error::SpecError;
pub use spec::{
    BatchSpec, ChangesetTemplate, CommitAuthor, CommitTemplate, ImportChangeset, OnDeclaration,
    OutputDefinition, OutputFormat, Step, WorkspaceConfiguration,
};
pub use types::{
    ensure_ref_prefix, BatchChangeMeta, Branch, BranchChangeset, ChangesetKind, ChangesetSpec,
    CommitDescription, ExternalId, RepoId, Repository, Task,
};

//! # fleet-plan
//!
//! Turns a batch spec into the immutable task set an executor runs.
//!
//! 1. [`resolve::RepositoryResolver`] expands `on` declarations into
//!    repositories with a resolvable branch.
//! 2. [`tasks::assign_workspaces`] maps repositories onto workspace rules.
//! 3. [`discover::find_directories_in_repos`] finds workspace roots in
//!    batched, aliased searches.
//! 4. [`tasks::build_tasks`] combines everything into [`fleet_core::Task`]s.
//!
//! Every remote call goes through the [`client::SourceClient`] capability and
//! is raced against a [`tokio_util::sync::CancellationToken`].

pub mod client;
pub mod discover;
pub mod error;
pub mod resolve;
pub mod tasks;

pub use client::{AliasedQuery, ClientError, SearchResult, SourceClient};
pub use discover::find_directories_in_repos;
pub use error::PlanError;
pub use resolve::{RepositoryResolver, ResolvedRepositories, UnsupportedRepos};
pub use tasks::{assign_workspaces, build_tasks, WorkspaceAssignment};

//! git-backup - Mirror every repository you own to local disk
//!
//! git-backup lists the repositories of your GitHub and Bitbucket accounts
//! into a local catalog, then initializes and fetches a local mirror for each
//! of them with bounded parallelism.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration with environment fallback for credentials
//! - [`discovery`]: Repository descriptors and the provider contract
//! - [`github`] / [`bitbucket`]: Provider integrations
//! - [`catalog`]: JSON Lines catalog written by the listing phase
//! - [`git`]: The git process boundary
//! - [`sync`]: Materialize and refresh local mirrors in parallel
//! - [`runner`]: Sequences the listing and sync phases

pub mod bitbucket;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod git;
pub mod github;
pub mod runner;
pub mod sync;

pub use catalog::{Catalog, CatalogError};
pub use config::{CloneProtocol, Config};
pub use discovery::{Provider, ProviderError, ProviderNamespace, RepositoryDescriptor};
pub use git::{GitCli, GitError, VersionControl};
pub use runner::{ListingReport, RunPhases, RunReport, Runner};
pub use sync::{
    PlanEntry, PlannedAction, SyncEngine, SyncError, SyncMode, SyncOutcome, SyncPhase,
    SyncSettings, SyncStatus, SyncSummary,
};

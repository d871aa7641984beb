//! Run Coordinator - sequences the listing and sync phases
//!
//! The listing phase asks every configured provider for its repositories and
//! streams them into a fresh catalog. The sync phase reads that catalog back
//! and hands it to the [`SyncEngine`].

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bitbucket::BitbucketProvider;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::discovery::{Provider, ProviderError, ProviderNamespace};
use crate::git::{GitCli, VersionControl};
use crate::github::GitHubProvider;
use crate::sync::{PlanEntry, SyncEngine, SyncMode, SyncSettings, SyncSummary};

/// Listing result of a single provider
#[derive(Debug)]
pub struct ProviderListing {
    pub provider: ProviderNamespace,
    /// Number of repositories reported, or why the provider contributed none
    pub result: Result<usize, ProviderError>,
}

#[derive(Debug)]
pub struct ListingReport {
    pub providers: Vec<ProviderListing>,
    /// Records actually written to the catalog after validation and dedup
    pub written: usize,
}

impl ListingReport {
    pub fn warnings(&self) -> impl Iterator<Item = &ProviderError> {
        self.providers.iter().filter_map(|p| p.result.as_ref().err())
    }
}

/// Which phases to execute
#[derive(Debug, Clone, Copy)]
pub struct RunPhases {
    pub list: bool,
    pub sync: bool,
    pub mode: SyncMode,
}

impl Default for RunPhases {
    fn default() -> Self {
        Self {
            list: true,
            sync: true,
            mode: SyncMode::Full,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub listing: Option<ListingReport>,
    pub sync: Option<SyncSummary>,
}

impl RunReport {
    /// Process exit code: 1 if any repository failed, 130 if the run was
    /// interrupted before every repository was attempted, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        match &self.sync {
            Some(summary) if summary.has_failures() => 1,
            Some(summary) if summary.interrupted() > 0 => 130,
            _ => 0,
        }
    }
}

pub struct Runner {
    config: Config,
    providers: Vec<Arc<dyn Provider>>,
    vcs: Arc<dyn VersionControl>,
    git: Option<GitCli>,
    interrupted: Arc<AtomicBool>,
}

impl Runner {
    /// Build providers from whichever credential sets are complete
    pub fn from_config(config: Config) -> Result<Self> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        match config.github_credentials() {
            Some(credentials) => {
                let provider = GitHubProvider::new(
                    credentials,
                    config.clone_protocol,
                    config.github_api_url.as_deref(),
                )
                .context("Failed to create GitHub client")?;
                providers.push(Arc::new(provider));
            }
            None => debug!("GitHub credentials incomplete, provider disabled"),
        }

        match config.bitbucket_credentials() {
            Some(credentials) => providers.push(Arc::new(BitbucketProvider::new(
                credentials,
                config.clone_protocol,
                config.bitbucket_api_url.as_deref(),
            ))),
            None => debug!("Bitbucket credentials incomplete, provider disabled"),
        }

        let git = GitCli::new(Duration::from_secs(config.timeout));
        let mut runner = Self::new(config, providers, Arc::new(git.clone()));
        runner.git = Some(git);
        Ok(runner)
    }

    /// Assemble a runner from explicit parts; no git preflight is performed
    pub fn new(
        config: Config,
        providers: Vec<Arc<dyn Provider>>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        Self {
            config,
            providers,
            vcs,
            git: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that, once set, stops new repositories from being started
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.config.catalog_file())
    }

    pub fn active_providers(&self) -> Vec<ProviderNamespace> {
        self.providers.iter().map(|p| p.namespace()).collect()
    }

    /// Rebuild the catalog from every active provider
    pub async fn refresh_listing(&self) -> Result<ListingReport> {
        if self.providers.is_empty() {
            bail!(
                "No provider credentials configured; set GITHUB_EMAIL and GITHUB_TOKEN, \
                 or BITBUCKET_USER, BITBUCKET_EMAIL and BITBUCKET_PASS"
            );
        }

        let catalog = self.catalog();
        info!("Refreshing repository catalog at {}", catalog.path().display());

        let writer = catalog
            .begin_refresh()
            .await
            .context("Failed to start catalog refresh")?;

        let mut namespaces = Vec::new();
        let mut tasks = Vec::new();

        for provider in &self.providers {
            let provider = provider.clone();
            let sender = writer.sender();
            namespaces.push(provider.namespace());

            tasks.push(tokio::spawn(async move {
                let repositories = provider.list_repositories().await?;
                let count = repositories.len();

                for repository in repositories {
                    if let Err(e) = sender.append(repository).await {
                        warn!("Stopped appending {} repositories: {}", provider.namespace(), e);
                        break;
                    }
                }

                Ok::<usize, ProviderError>(count)
            }));
        }

        let mut providers = Vec::new();
        for (provider, joined) in namespaces.into_iter().zip(join_all(tasks).await) {
            let result = joined.unwrap_or_else(|e| {
                Err(ProviderError::Unavailable {
                    provider,
                    message: format!("listing task failed: {}", e),
                })
            });

            match &result {
                Ok(count) => info!("{} listed {} repositories", provider, count),
                Err(e) => warn!("Listing failed for {}: {}", provider, e),
            }

            providers.push(ProviderListing { provider, result });
        }

        let written = writer.finish().await.context("Failed to write catalog")?;

        Ok(ListingReport { providers, written })
    }

    /// Sync every catalogued repository; needs no provider access
    pub async fn sync_content(&self, mode: SyncMode) -> Result<SyncSummary> {
        let descriptors = self.catalog().read_all().await?;

        if let Some(git) = &self.git {
            let version = git
                .version()
                .await
                .context("git is required for syncing but could not be run")?;
            info!("Using {}", version);
        }

        Ok(self.engine().sync_all(descriptors, mode).await)
    }

    /// What `sync_content` would do, without running git
    pub async fn plan_content(&self, mode: SyncMode) -> Result<Vec<PlanEntry>> {
        let descriptors = self.catalog().read_all().await?;
        Ok(self.engine().plan(&descriptors, mode))
    }

    /// Run the requested phases, listing first
    pub async fn run(&self, phases: RunPhases) -> Result<RunReport> {
        let mut report = RunReport::default();

        if phases.list {
            report.listing = Some(self.refresh_listing().await?);
        }

        if phases.sync {
            report.sync = Some(self.sync_content(phases.mode).await?);
        }

        Ok(report)
    }

    fn engine(&self) -> SyncEngine {
        SyncEngine::new(self.vcs.clone(), SyncSettings::from_config(&self.config))
            .with_interrupt_flag(self.interrupted.clone())
    }
}

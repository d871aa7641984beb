//! Sync Engine - Drives bounded-concurrency git work over the catalog
//!
//! Each repository is materialized (directory created, `git init`, remote
//! registered) and/or refreshed (stale refs pruned, remote fetched). Failures
//! are recorded per repository and never stop the rest of the run.

use crate::config::Config;
use crate::discovery::RepositoryDescriptor;
use crate::git::{GitError, VersionControl};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Which phases a sync run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Materialize missing repositories, then refresh everything
    #[default]
    Full,
    MaterializeOnly,
    RefreshOnly,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::MaterializeOnly => "materialize",
            SyncMode::RefreshOnly => "refresh",
        }
    }

    fn first_phase(&self) -> SyncPhase {
        match self {
            SyncMode::Full | SyncMode::MaterializeOnly => SyncPhase::Materialize,
            SyncMode::RefreshOnly => SyncPhase::Refresh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Materialize,
    Refresh,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Materialize => "materialize",
            SyncPhase::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Skipped,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Skipped => "skipped",
            SyncStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no local repository at {0:?}; run a materialize pass first")]
    LocalRepositoryMissing(PathBuf),

    #[error("{0:?} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("{0:?} is not a git repository; remove it and materialize again")]
    NotARepository(PathBuf),

    #[error(transparent)]
    VersionControl(#[from] GitError),

    #[error("filesystem operation failed for {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted before this repository was started")]
    Interrupted,
}

/// Result of one repository in one run
#[derive(Debug)]
pub struct SyncOutcome {
    pub descriptor: RepositoryDescriptor,
    /// Last phase attempted
    pub phase: SyncPhase,
    pub status: SyncStatus,
    pub error: Option<SyncError>,
}

#[derive(Debug)]
pub struct SyncSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncSummary {
    fn compile(mut outcomes: Vec<SyncOutcome>, duration: Duration) -> Self {
        outcomes.sort_by_key(|outcome| outcome.descriptor.key());

        let count = |status: SyncStatus| outcomes.iter().filter(|o| o.status == status).count();
        let succeeded = count(SyncStatus::Success);
        let skipped = count(SyncStatus::Skipped);
        let failed = count(SyncStatus::Failed);

        Self {
            total: outcomes.len(),
            succeeded,
            skipped,
            failed,
            duration,
            outcomes,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Repositories left unsynced because the run was interrupted
    pub fn interrupted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.error, Some(SyncError::Interrupted)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == SyncStatus::Failed)
    }
}

/// What a dry run predicts for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    MaterializeAndRefresh,
    Materialize,
    Refresh,
    Skip(&'static str),
}

impl PlannedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlannedAction::MaterializeAndRefresh => "materialize+refresh",
            PlannedAction::Materialize => "materialize",
            PlannedAction::Refresh => "refresh",
            PlannedAction::Skip(_) => "skip",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub descriptor: RepositoryDescriptor,
    pub local_path: PathBuf,
    pub action: PlannedAction,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub backup_root: PathBuf,
    pub max_parallel: usize,
    pub remote_name: String,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backup_root: config.backup_root(),
            max_parallel: config.max_parallel,
            remote_name: config.remote_name.clone(),
        }
    }
}

/// Per-phase result before it is folded into an outcome
enum PhaseResult {
    Worked,
    Skipped(Option<SyncError>),
    Failed(SyncError),
}

/// The engine that applies git operations to catalogued repositories
#[derive(Clone)]
pub struct SyncEngine {
    vcs: Arc<dyn VersionControl>,
    settings: SyncSettings,
    interrupted: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(vcs: Arc<dyn VersionControl>, settings: SyncSettings) -> Self {
        Self {
            vcs,
            settings,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an interrupt flag; once set, repositories not yet started are skipped
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run `mode` over every descriptor with at most `max_parallel` in flight
    pub async fn sync_all(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
        mode: SyncMode,
    ) -> SyncSummary {
        let start_time = Instant::now();
        let permits = self.settings.max_parallel.max(1);

        info!(
            "Syncing {} repositories ({} mode, {} parallel)",
            descriptors.len(),
            mode.as_str(),
            permits
        );

        let semaphore = Semaphore::new(permits);
        let mut futures = FuturesUnordered::new();

        for descriptor in descriptors {
            let semaphore = &semaphore;
            futures.push(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return self.interrupted_outcome(descriptor, mode),
                };

                if self.interrupted.load(Ordering::SeqCst) {
                    return self.interrupted_outcome(descriptor, mode);
                }

                self.sync_one(descriptor, mode).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(outcome) = futures.next().await {
            match outcome.status {
                SyncStatus::Failed => error!(
                    "Sync failed for {} ({}): {}",
                    outcome.descriptor.key(),
                    outcome.phase.as_str(),
                    outcome
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default()
                ),
                status => debug!(
                    "Sync {} for {} ({})",
                    status.as_str(),
                    outcome.descriptor.key(),
                    outcome.phase.as_str()
                ),
            }
            outcomes.push(outcome);
        }

        let summary = SyncSummary::compile(outcomes, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} successful, {} failed, {} skipped",
            summary.duration.as_secs_f64(),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );

        summary
    }

    /// Predict the work `sync_all` would do, without invoking git
    pub fn plan(&self, descriptors: &[RepositoryDescriptor], mode: SyncMode) -> Vec<PlanEntry> {
        descriptors
            .iter()
            .map(|descriptor| {
                let local_path = descriptor.local_path(&self.settings.backup_root);
                let is_dir = local_path.is_dir();
                let exists = local_path.exists();
                let is_repo = local_path.join(".git").is_dir();

                let action = match mode {
                    _ if exists && !is_dir => PlannedAction::Skip("not a directory"),
                    SyncMode::Full | SyncMode::RefreshOnly if is_dir && !is_repo => {
                        PlannedAction::Skip("not a git repository")
                    }
                    SyncMode::Full if is_dir => PlannedAction::Refresh,
                    SyncMode::Full => PlannedAction::MaterializeAndRefresh,
                    SyncMode::MaterializeOnly if is_dir => {
                        PlannedAction::Skip("already materialized")
                    }
                    SyncMode::MaterializeOnly => PlannedAction::Materialize,
                    SyncMode::RefreshOnly if is_dir => PlannedAction::Refresh,
                    SyncMode::RefreshOnly => PlannedAction::Skip("not materialized"),
                };

                PlanEntry {
                    descriptor: descriptor.clone(),
                    local_path,
                    action,
                }
            })
            .collect()
    }

    async fn sync_one(&self, descriptor: RepositoryDescriptor, mode: SyncMode) -> SyncOutcome {
        let path = descriptor.local_path(&self.settings.backup_root);

        match mode {
            SyncMode::MaterializeOnly => {
                let result = self.materialize(&descriptor, &path).await;
                finish(descriptor, SyncPhase::Materialize, result)
            }
            SyncMode::RefreshOnly => {
                let result = self.refresh(&descriptor, &path).await;
                finish(descriptor, SyncPhase::Refresh, result)
            }
            SyncMode::Full => match self.materialize(&descriptor, &path).await {
                PhaseResult::Failed(e) => {
                    finish(descriptor, SyncPhase::Materialize, PhaseResult::Failed(e))
                }
                PhaseResult::Worked => {
                    let result = self.fetch(&descriptor, &path).await;
                    finish(descriptor, SyncPhase::Refresh, result)
                }
                PhaseResult::Skipped(_) => {
                    let result = self.refresh(&descriptor, &path).await;
                    finish(descriptor, SyncPhase::Refresh, result)
                }
            },
        }
    }

    async fn materialize(&self, descriptor: &RepositoryDescriptor, path: &Path) -> PhaseResult {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => {
                debug!("Already materialized: {}", path.display());
                return PhaseResult::Skipped(None);
            }
            Ok(_) => return PhaseResult::Failed(SyncError::NotADirectory(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return PhaseResult::Failed(SyncError::Filesystem {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        info!("Materializing {} at {}", descriptor.key(), path.display());

        if let Err(source) = tokio::fs::create_dir_all(path).await {
            return PhaseResult::Failed(SyncError::Filesystem {
                path: path.to_path_buf(),
                source,
            });
        }

        let result = async {
            self.vcs.init(path).await?;
            self.vcs
                .add_remote(path, &self.settings.remote_name, &descriptor.clone_url)
                .await
        }
        .await;

        match result {
            Ok(()) => PhaseResult::Worked,
            Err(e) => {
                // Leave nothing behind so the next run retries from scratch
                if let Err(cleanup) = tokio::fs::remove_dir_all(path).await {
                    warn!(
                        "Failed to remove partially materialized {}: {}",
                        path.display(),
                        cleanup
                    );
                }
                PhaseResult::Failed(e.into())
            }
        }
    }

    async fn refresh(&self, descriptor: &RepositoryDescriptor, path: &Path) -> PhaseResult {
        if !tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            warn!(
                "Skipping refresh of {}: no local repository at {}",
                descriptor.key(),
                path.display()
            );
            return PhaseResult::Skipped(Some(SyncError::LocalRepositoryMissing(
                path.to_path_buf(),
            )));
        }

        if !tokio::fs::metadata(path.join(".git"))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return PhaseResult::Failed(SyncError::NotARepository(path.to_path_buf()));
        }

        self.fetch(descriptor, path).await
    }

    /// Prune and fetch a repository already known to be in place
    async fn fetch(&self, descriptor: &RepositoryDescriptor, path: &Path) -> PhaseResult {
        debug!("Refreshing {} at {}", descriptor.key(), path.display());

        let remote = &self.settings.remote_name;
        let result = async {
            self.vcs.prune_remote(path, remote).await?;
            self.vcs.fetch_remote(path, remote).await
        }
        .await;

        match result {
            Ok(()) => PhaseResult::Worked,
            Err(e) => PhaseResult::Failed(e.into()),
        }
    }

    fn interrupted_outcome(&self, descriptor: RepositoryDescriptor, mode: SyncMode) -> SyncOutcome {
        SyncOutcome {
            descriptor,
            phase: mode.first_phase(),
            status: SyncStatus::Skipped,
            error: Some(SyncError::Interrupted),
        }
    }
}

fn finish(descriptor: RepositoryDescriptor, phase: SyncPhase, result: PhaseResult) -> SyncOutcome {
    let (status, error) = match result {
        PhaseResult::Worked => (SyncStatus::Success, None),
        PhaseResult::Skipped(error) => (SyncStatus::Skipped, error),
        PhaseResult::Failed(error) => (SyncStatus::Failed, Some(error)),
    };

    SyncOutcome {
        descriptor,
        phase,
        status,
        error,
    }
}

//! Repository discovery abstraction layer
//!
//! Every hosting provider is hidden behind the [`Provider`] trait and reports
//! its repositories as [`RepositoryDescriptor`] values, so the catalog and the
//! sync engine never see provider-specific API types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Hosting provider a repository was listed from
///
/// The lowercase name doubles as the first directory level under the backup
/// root, which keeps same-named repositories from different providers apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderNamespace {
    GitHub,
    Bitbucket,
}

impl ProviderNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderNamespace::GitHub => "github",
            ProviderNamespace::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for ProviderNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-agnostic description of one remote repository
///
/// `(provider, full_name)` identifies a repository. The local checkout path is
/// derived from that key and the backup root, so it is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Provider the repository was listed from
    pub provider: ProviderNamespace,

    /// Canonical `owner/name` as reported by the provider
    pub full_name: String,

    /// URL handed to `git remote add`
    pub clone_url: String,
}

impl RepositoryDescriptor {
    pub fn new(
        provider: ProviderNamespace,
        full_name: impl Into<String>,
        clone_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            full_name: full_name.into(),
            clone_url: clone_url.into(),
        }
    }

    /// Unique key, e.g. `github/alice/foo`
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.full_name)
    }

    /// Directory this repository is mirrored into: `root/provider/owner/name`
    pub fn local_path(&self, backup_root: &Path) -> PathBuf {
        self.full_name
            .split('/')
            .fold(backup_root.join(self.provider.as_str()), |path, segment| {
                path.join(segment)
            })
    }

    /// Check that the descriptor cannot escape the backup root
    pub fn validate(&self) -> Result<(), String> {
        if self.clone_url.trim().is_empty() {
            return Err(format!("{} has an empty clone URL", self.full_name));
        }

        if self.full_name.is_empty() {
            return Err("empty repository name".to_string());
        }

        for segment in self.full_name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(format!("invalid repository name: {:?}", self.full_name));
            }
        }

        Ok(())
    }
}

/// Errors a provider integration reports while listing repositories
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} rejected the configured credentials: {message}")]
    Authentication {
        provider: ProviderNamespace,
        message: String,
    },

    #[error("{provider} is unavailable: {message}")]
    Unavailable {
        provider: ProviderNamespace,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderNamespace {
        match self {
            ProviderError::Authentication { provider, .. }
            | ProviderError::Unavailable { provider, .. } => *provider,
        }
    }
}

/// A hosting service that can list the authenticated account's repositories
///
/// Implement this trait to add another provider; the runner spawns one
/// listing task per active provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Namespace written into every descriptor this provider yields
    fn namespace(&self) -> ProviderNamespace;

    /// List every repository owned by or accessible to the account
    async fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, ProviderError>;
}

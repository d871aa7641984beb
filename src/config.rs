use anyhow::{anyhow, Context, Result};
use dirs::cache_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Main configuration structure for git-backup
///
/// The file uses flat upper-case keys (`GITHUB_EMAIL`, `BACKUP_PATH`, ...).
/// Credential keys that are absent or empty fall back to the environment
/// variable of the same name.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    /// GitHub account email
    #[serde(default)]
    pub github_email: Option<String>,

    /// GitHub personal access token
    #[serde(default, alias = "GITHUB_PASS")]
    pub github_token: Option<String>,

    /// Bitbucket username
    #[serde(default)]
    pub bitbucket_user: Option<String>,

    /// Bitbucket account email
    #[serde(default)]
    pub bitbucket_email: Option<String>,

    /// Bitbucket app password
    #[serde(default)]
    pub bitbucket_pass: Option<String>,

    /// Root under which `provider/owner/name` directories are created
    pub backup_path: String,

    /// Location of the repository catalog (defaults to the user cache dir)
    #[serde(default)]
    pub catalog_path: Option<String>,

    /// Maximum repositories synchronized at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single git invocation in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Which clone URL to record for each repository
    #[serde(default)]
    pub clone_protocol: CloneProtocol,

    /// Name of the remote registered in every mirror
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// GitHub API base URL override (GitHub Enterprise)
    #[serde(default)]
    pub github_api_url: Option<String>,

    /// Bitbucket API base URL override
    #[serde(default)]
    pub bitbucket_api_url: Option<String>,
}

/// Clone URL preference for listed repositories
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    /// Use SSH (git@github.com:user/repo.git)
    #[default]
    Ssh,
    /// Use HTTPS (https://github.com/user/repo.git)
    Https,
}

/// Credentials that activate the GitHub integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubCredentials {
    pub email: String,
    pub token: String,
}

/// Credentials that activate the Bitbucket integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitbucketCredentials {
    pub user: String,
    pub email: String,
    pub password: String,
}

// Default value functions
fn default_max_parallel() -> usize {
    4
}
fn default_timeout() -> u64 {
    600
}
fn default_remote_name() -> String {
    "origin".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_email: None,
            github_token: None,
            bitbucket_user: None,
            bitbucket_email: None,
            bitbucket_pass: None,
            backup_path: "${HOME}/git-backup".to_string(),
            catalog_path: None,
            max_parallel: default_max_parallel(),
            timeout: default_timeout(),
            clone_protocol: CloneProtocol::default(),
            remote_name: default_remote_name(),
            github_api_url: None,
            bitbucket_api_url: None,
        }
    }
}

impl Config {
    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.apply_env_fallback(|key| std::env::var(key).ok());
        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from YAML without touching the environment
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Fill missing credentials from `lookup` (the process environment in production)
    pub fn apply_env_fallback<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let slots = [
            ("GITHUB_EMAIL", &mut self.github_email),
            ("GITHUB_TOKEN", &mut self.github_token),
            ("BITBUCKET_USER", &mut self.bitbucket_user),
            ("BITBUCKET_EMAIL", &mut self.bitbucket_email),
            ("BITBUCKET_PASS", &mut self.bitbucket_pass),
        ];

        for (key, slot) in slots {
            if non_empty(slot).is_some() {
                continue;
            }
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                debug!("Using {} from the environment", key);
                *slot = Some(value);
            }
        }
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.backup_path = expand_path(&self.backup_path)
            .context("Failed to expand BACKUP_PATH")?;

        if let Some(catalog_path) = &self.catalog_path {
            self.catalog_path =
                Some(expand_path(catalog_path).context("Failed to expand CATALOG_PATH")?);
        }

        Ok(())
    }

    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.backup_path.trim().is_empty() {
            return Err(anyhow!("BACKUP_PATH must not be empty"));
        }
        if self.max_parallel == 0 {
            return Err(anyhow!("MAX_PARALLEL must be at least 1"));
        }
        if self.timeout == 0 {
            return Err(anyhow!("TIMEOUT must be at least 1 second"));
        }
        if self.remote_name.trim().is_empty() {
            return Err(anyhow!("REMOTE_NAME must not be empty"));
        }
        Ok(())
    }

    /// GitHub credentials, if every required key is present
    pub fn github_credentials(&self) -> Option<GitHubCredentials> {
        Some(GitHubCredentials {
            email: non_empty(&self.github_email)?,
            token: non_empty(&self.github_token)?,
        })
    }

    /// Bitbucket credentials, if every required key is present
    pub fn bitbucket_credentials(&self) -> Option<BitbucketCredentials> {
        Some(BitbucketCredentials {
            user: non_empty(&self.bitbucket_user)?,
            email: non_empty(&self.bitbucket_email)?,
            password: non_empty(&self.bitbucket_pass)?,
        })
    }

    /// Root directory for repository mirrors
    pub fn backup_root(&self) -> PathBuf {
        PathBuf::from(&self.backup_path)
    }

    /// Catalog file location, falling back to the XDG cache directory
    pub fn catalog_file(&self) -> PathBuf {
        match &self.catalog_path {
            Some(path) => PathBuf::from(path),
            None => Self::default_catalog_path(),
        }
    }

    /// Default catalog location (XDG compliant)
    pub fn default_catalog_path() -> PathBuf {
        match cache_dir() {
            Some(dir) => dir.join("git-backup").join("catalog.jsonl"),
            None => PathBuf::from("git-backup-catalog.jsonl"),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn expand_path(raw: &str) -> Result<String> {
    let expanded = shellexpand::full(raw)?;
    let cleaned = path_clean::clean(expanded.as_ref());
    Ok(cleaned.to_string_lossy().into_owned())
}

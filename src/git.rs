use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::debug;

/// Failure of a single git invocation
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run `git {command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`git {command}` timed out after {}s", .after.as_secs())]
    TimedOut { command: String, after: Duration },
}

/// The version-control operations the sync engine needs
///
/// Every call blocks its caller until git finishes; implementations report
/// success or a [`GitError`] carrying stderr for diagnostics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Create an empty repository in `path`
    async fn init(&self, path: &Path) -> Result<(), GitError>;

    /// Register `url` as remote `name`
    async fn add_remote(&self, path: &Path, name: &str, url: &str) -> Result<(), GitError>;

    /// Drop remote-tracking refs that no longer exist upstream
    async fn prune_remote(&self, path: &Path, name: &str) -> Result<(), GitError>;

    /// Download new objects and refs from remote `name`
    async fn fetch_remote(&self, path: &Path, name: &str) -> Result<(), GitError>;
}

/// [`VersionControl`] backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    /// Create a git client whose invocations are killed after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Preflight check: the installed git version string
    pub async fn version(&self) -> Result<String, GitError> {
        let stdout = self.run(None, &["--version"]).await?;
        Ok(stdout.trim().to_string())
    }

    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let command = args.join(" ");

        let mut cmd = AsyncCommand::new("git");
        cmd.args(args)
            // never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
            // only `dir` itself may be the repository, never an enclosing one
            if let Some(parent) = dir.parent().filter(|p| p.is_absolute()) {
                cmd.env("GIT_CEILING_DIRECTORIES", parent);
            }
        }

        debug!("Running git {} in {:?}", command, dir);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(GitError::TimedOut {
                    command,
                    after: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GitError::Failed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn init(&self, path: &Path) -> Result<(), GitError> {
        self.run(Some(path), &["init", "--quiet"]).await.map(drop)
    }

    async fn add_remote(&self, path: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.run(Some(path), &["remote", "add", name, url])
            .await
            .map(drop)
    }

    async fn prune_remote(&self, path: &Path, name: &str) -> Result<(), GitError> {
        self.run(Some(path), &["remote", "prune", name])
            .await
            .map(drop)
    }

    async fn fetch_remote(&self, path: &Path, name: &str) -> Result<(), GitError> {
        self.run(Some(path), &["fetch", "--tags", name]).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn git() -> GitCli {
        GitCli::new(Duration::from_secs(30))
    }

    async fn git_available() -> bool {
        git().version().await.is_ok()
    }

    #[tokio::test]
    async fn test_init_and_add_remote() {
        if !git_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let git = git();

        git.init(temp_dir.path()).await.unwrap();
        git.add_remote(temp_dir.path(), "origin", "https://example.com/alice/foo.git")
            .await
            .unwrap();

        assert!(temp_dir.path().join(".git").is_dir());
        let url = git
            .run(Some(temp_dir.path()), &["remote", "get-url", "origin"])
            .await
            .unwrap();
        assert_eq!(url.trim(), "https://example.com/alice/foo.git");
    }

    #[tokio::test]
    async fn test_duplicate_remote_fails_with_stderr() {
        if !git_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let git = git();
        git.init(temp_dir.path()).await.unwrap();
        git.add_remote(temp_dir.path(), "origin", "a").await.unwrap();

        let err = git.add_remote(temp_dir.path(), "origin", "b").await.unwrap_err();

        assert_matches!(err, GitError::Failed { ref stderr, .. } if !stderr.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_from_missing_remote_fails() {
        if !git_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let remote_dir = temp_dir.path().join("does-not-exist");
        let repo_dir = temp_dir.path().join("repo");
        std::fs::create_dir(&repo_dir).unwrap();

        let git = git();
        git.init(&repo_dir).await.unwrap();
        git.add_remote(&repo_dir, "origin", remote_dir.to_str().unwrap())
            .await
            .unwrap();

        let err = git.fetch_remote(&repo_dir, "origin").await.unwrap_err();
        assert_matches!(err, GitError::Failed { .. });
    }

    #[tokio::test]
    async fn test_prune_and_fetch_from_local_remote() {
        if !git_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let upstream = temp_dir.path().join("upstream.git");
        let mirror = temp_dir.path().join("mirror");
        std::fs::create_dir(&upstream).unwrap();
        std::fs::create_dir(&mirror).unwrap();

        let git = git();
        git.run(Some(&upstream), &["init", "--bare", "--quiet"]).await.unwrap();
        git.init(&mirror).await.unwrap();
        git.add_remote(&mirror, "origin", upstream.to_str().unwrap())
            .await
            .unwrap();

        git.prune_remote(&mirror, "origin").await.unwrap();
        git.fetch_remote(&mirror, "origin").await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_does_not_reach_enclosing_repository() {
        if !git_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let outer = temp_dir.path();
        let upstream = outer.join("upstream.git");
        let leaf = outer.join("backup/github/alice/foo");
        std::fs::create_dir(&upstream).unwrap();
        std::fs::create_dir_all(&leaf).unwrap();

        let git = git();
        git.run(Some(&upstream), &["init", "--bare", "--quiet"]).await.unwrap();
        git.init(outer).await.unwrap();
        git.add_remote(outer, "origin", upstream.to_str().unwrap())
            .await
            .unwrap();

        let prune = git.prune_remote(&leaf, "origin").await;
        let fetch = git.fetch_remote(&leaf, "origin").await;

        assert_matches!(prune, Err(GitError::Failed { .. }));
        assert_matches!(fetch, Err(GitError::Failed { .. }));
        assert!(!leaf.join(".git").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_spawn_error() {
        let err = git()
            .init(Path::new("/nonexistent/git-backup/dir"))
            .await
            .unwrap_err();

        assert_matches!(err, GitError::Spawn { .. });
    }
}

//! Common test utilities and helpers for git-backup tests
#![allow(dead_code)]

use git_backup::{ProviderNamespace, RepositoryDescriptor};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Credential variables the binary would otherwise pick up from the host
pub const CREDENTIAL_VARS: [&str; 6] = [
    "GITHUB_EMAIL",
    "GITHUB_TOKEN",
    "GITHUB_PASS",
    "BITBUCKET_USER",
    "BITBUCKET_EMAIL",
    "BITBUCKET_PASS",
];

/// Scratch directory holding a config, a catalog and a backup root
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path().join("backup")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.path().join("cache").join("catalog.jsonl")
    }

    /// Write a config pointing at this environment, plus any extra YAML lines
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let config_path = self.path().join("config.yml");
        let content = format!(
            "BACKUP_PATH: {}\nCATALOG_PATH: {}\nTIMEOUT: 60\n{}",
            self.backup_dir().display(),
            self.catalog_path().display(),
            extra
        );
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    pub fn write_catalog(&self, descriptors: &[RepositoryDescriptor]) {
        let path = self.catalog_path();
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create cache dir");

        let content: String = descriptors
            .iter()
            .map(|d| serde_json::to_string(d).unwrap() + "\n")
            .collect();
        std::fs::write(path, content).expect("Failed to write catalog");
    }

    /// Mirror location for a GitHub repository
    pub fn mirror(&self, full_name: &str) -> PathBuf {
        self.backup_dir().join("github").join(full_name)
    }
}

/// Run the git-backup binary with host credentials removed
pub fn run_cli(args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_git-backup"));
    command.args(args).env("RUST_LOG", "warn");
    for var in CREDENTIAL_VARS {
        command.env_remove(var);
    }
    command.output().expect("Failed to execute git-backup")
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Create a local upstream repository with one commit and one tag
pub fn create_upstream(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).expect("Failed to create upstream dir");
    git(dir, &["init", "--quiet"]);
    std::fs::write(dir.join("README.md"), "# upstream\n").unwrap();
    git(dir, &["add", "README.md"]);
    git(dir, &["commit", "--quiet", "-m", "Initial commit"]);
    git(dir, &["tag", "v1.0.0"]);
    dir.to_path_buf()
}

pub fn github_repo(full_name: &str, clone_url: &str) -> RepositoryDescriptor {
    RepositoryDescriptor::new(ProviderNamespace::GitHub, full_name, clone_url)
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}

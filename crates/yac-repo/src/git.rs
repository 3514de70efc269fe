//! Non-blocking git command runner with per-call timeouts, killing the
//! child process on expiry. Grounded on `original_source/app/lib/git.py`.
//! Subprocess-timeout pattern follows `agenticlaw-tools/src/tools/bash.rs`'s
//! `tokio::time::timeout` wrapping.

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::Command;

#[derive(Debug, Clone)]
pub enum GitError {
    Timeout(String),
    Failed(String),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::Timeout(m) | GitError::Failed(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for GitError {}

pub struct Repo {
    pub loaded: bool,
    path: String,
    env: HashMap<String, String>,
}

impl Repo {
    pub fn new(path: impl Into<String>, env: HashMap<String, String>) -> Self {
        Repo { loaded: false, path: path.into(), env }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn run(&self, args: &[&str], timeout_secs: u64) -> Result<String, GitError> {
        let mut cmd = Command::new("/usr/bin/git");
        cmd.args(args).current_dir(&self.path).env_clear().envs(&self.env);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| GitError::Timeout(format!("Timeout of {timeout_secs} seconds exceeded")))?
            .map_err(|e| GitError::Failed(format!("Command git {} failed to spawn: {e}", args.join(" "))))?;

        if !output.status.success() {
            return Err(GitError::Failed(format!(
                "Command git {} failed with: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn load(&mut self) -> Result<(), GitError> {
        self.run(&["rev-parse"], 1).await?;
        self.loaded = true;
        Ok(())
    }

    pub async fn clone(&mut self, url: &str, branch: &str, depth: u32, timeout_secs: u64) -> Result<(), GitError> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| GitError::Failed(format!("Unable to create {}: {e}", self.path)))?;
        self.run(&["clone", "--depth", &depth.to_string(), "--branch", branch, url, "."], timeout_secs)
            .await?;
        self.loaded = true;
        Ok(())
    }

    pub async fn pull(&self, timeout_secs: u64) -> Result<(), GitError> {
        self.run(&["pull"], timeout_secs).await.map(|_| ())
    }

    pub async fn add(&self, files: &[String]) -> Result<(), GitError> {
        let mut args = vec!["add"];
        args.extend(files.iter().map(|s| s.as_str()));
        self.run(&args, 3).await.map(|_| ())
    }

    pub async fn commit(&self, msg: &str) -> Result<(), GitError> {
        self.run(&["commit", "-m", msg], 3).await.map(|_| ())
    }

    pub async fn push(&self, timeout_secs: u64) -> Result<(), GitError> {
        self.run(&["push"], timeout_secs).await.map(|_| ())
    }

    pub async fn is_dirty(&self) -> bool {
        match self.run(&["status", "--short"], 3).await {
            Ok(status) => !status.is_empty(),
            Err(_) => true,
        }
    }

    pub async fn reset(&self, target: &str, hard: bool) -> Result<(), GitError> {
        let mut args = vec!["reset"];
        if hard {
            args.push("--hard");
        }
        args.push(target);
        self.run(&args, 3).await.map(|_| ())
    }

    pub async fn clean(&self, recursive: bool, force: bool) -> Result<(), GitError> {
        let mut args = vec!["clean"];
        if recursive {
            args.push("-d");
        }
        if force {
            args.push("-ff");
        }
        self.run(&args, 3).await.map(|_| ())
    }

    pub async fn get_hash(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "HEAD"], 3).await?.trim().to_string())
    }

    /// Unix timestamp (seconds) of `.git/FETCH_HEAD`'s mtime, or `0` if it
    /// hasn't been fetched yet.
    pub async fn get_fetch_time(&self) -> Result<u64, GitError> {
        let file = format!("{}/.git/FETCH_HEAD", self.path);
        match tokio::fs::metadata(&file).await {
            Ok(meta) => Ok(meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("File {file} not found, so returning fetch time of 0");
                Ok(0)
            }
            Err(e) => Err(GitError::Failed(format!("Error accessing file {file}: {e}"))),
        }
    }
}

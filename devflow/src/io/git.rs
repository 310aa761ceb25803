//! Shell git workflow for the local clone.
//!
//! The pipeline clones, switches to the feature branch, and publishes the
//! builder's local edits through plain `git` subprocess calls. Each call is
//! bounded by a timeout; failures surface as errors that abort only the
//! current stage.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{GitConfig, RepoConfig};
use crate::io::process::{CommandOutput, run_command_with_timeout};

const REJECTED_PUSH_MARKER: &str = "Updates were rejected";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of publishing local edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The worktree was clean; nothing was committed or pushed.
    NoChanges,
    /// Edits were committed (or were already committed) and pushed.
    Pushed { commit_message: String },
}

/// Git operations the pipeline depends on.
pub trait GitWorkflow {
    /// Clone the remote into the local path unless a directory already exists there.
    fn clone_if_absent(&self) -> Result<()>;

    /// Fetch and switch to `branch`, creating a local tracking branch from
    /// `origin/{branch}` when it does not exist yet.
    fn checkout_feature_branch(&self, branch: &str) -> Result<()>;

    /// Stage everything, commit with a timestamped message, then pull and push
    /// `branch`. A clean worktree is reported as `NoChanges`.
    fn publish(&self, branch: &str, message_prefix: &str) -> Result<PublishOutcome>;
}

/// `git` subprocess wrapper rooted at the local clone.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    remote_url: String,
    base_branch: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(repo: &RepoConfig, git: &GitConfig) -> Self {
        Self {
            workdir: repo.local_path.clone(),
            remote_url: repo.remote_url(),
            base_branch: repo.base_branch.clone(),
            timeout: Duration::from_secs(git.command_timeout_secs),
            output_limit_bytes: git.output_limit_bytes,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.stdout_text().lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True when the worktree has staged, unstaged, or untracked changes.
    #[instrument(skip_all)]
    pub fn has_changes(&self) -> Result<bool> {
        let entries = self.status_porcelain()?;
        debug!(changed = entries.len(), "detected worktree changes");
        Ok(!entries.is_empty())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", branch])?;
        Ok(out.success())
    }

    /// Stage all changes (respects .gitignore).
    pub fn stage_all(&self) -> Result<()> {
        self.run_checked(&["add", "."])?;
        Ok(())
    }

    /// Commit staged changes. "nothing to commit" is not an error.
    ///
    /// Returns whether a commit was created.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<bool> {
        let out = self.run(&["commit", "-m", message])?;
        if out.success() {
            info!(message, "committed changes");
            return Ok(true);
        }
        if is_nothing_to_commit(&out) {
            info!("nothing to commit");
            return Ok(false);
        }
        Err(failure("commit -m <message>", &out))
    }

    /// Pull `branch` from origin, then push it. A rejected push is reported, not retried.
    #[instrument(skip_all, fields(branch))]
    pub fn pull_then_push(&self, branch: &str) -> Result<()> {
        self.run_checked(&["pull", "origin", branch])?;
        let out = self.run(&["push", "origin", branch])?;
        if out.success() {
            info!(branch, "pushed");
            return Ok(());
        }
        if out.stderr_text().contains(REJECTED_PUSH_MARKER) {
            warn!(branch, "push rejected; remote contains work that is not local");
            return Err(anyhow!(
                "push to origin/{branch} rejected: remote contains work that is not present locally"
            ));
        }
        Err(failure("push", &out))
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(failure(&args.join(" "), &output));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        self.spawn(cmd, args)
    }

    fn spawn(&self, cmd: Command, args: &[&str]) -> Result<CommandOutput> {
        debug!(args = %args.join(" "), "git");
        run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .map_err(|err| err.context(format!("spawn git {}", args.join(" "))))
    }
}

impl GitWorkflow for Git {
    #[instrument(skip_all, fields(path = %self.workdir.display()))]
    fn clone_if_absent(&self) -> Result<()> {
        if self.workdir.is_dir() {
            info!("repository already present, skipping clone");
            return Ok(());
        }
        let target = self.workdir.to_string_lossy().into_owned();
        let args = [
            "clone",
            "-b",
            self.base_branch.as_str(),
            self.remote_url.as_str(),
            target.as_str(),
        ];
        let mut cmd = Command::new("git");
        cmd.args(args);
        let out = self.spawn(cmd, &args)?;
        if !out.success() {
            return Err(failure("clone", &out));
        }
        info!(remote = %self.remote_url, "cloned repository");
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout_feature_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["fetch", "origin"])?;
        if self.branch_exists(branch)? {
            self.run_checked(&["checkout", branch])?;
            info!(branch, "switched to existing local branch");
        } else {
            let upstream = format!("origin/{branch}");
            self.run_checked(&["checkout", "-b", branch, &upstream])?;
            info!(branch, "created local branch tracking origin");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn publish(&self, branch: &str, message_prefix: &str) -> Result<PublishOutcome> {
        if !self.has_changes()? {
            info!("no local changes to publish");
            return Ok(PublishOutcome::NoChanges);
        }
        self.stage_all()?;
        let message = commit_message(message_prefix, Local::now());
        self.commit(&message)?;
        self.pull_then_push(branch)?;
        Ok(PublishOutcome::Pushed {
            commit_message: message,
        })
    }
}

/// `{prefix} - {YYYY-MM-DD HH:MM:SS}` in local time.
pub fn commit_message(prefix: &str, now: DateTime<Local>) -> String {
    format!("{prefix} - {}", now.format("%Y-%m-%d %H:%M:%S"))
}

fn is_nothing_to_commit(out: &CommandOutput) -> bool {
    out.stdout_text().contains("nothing to commit") || out.stderr_text().contains("nothing to commit")
}

fn failure(what: &str, out: &CommandOutput) -> anyhow::Error {
    if out.timed_out {
        return anyhow!("git {what} timed out");
    }
    anyhow!("git {what} failed: {}", out.combined_text("git").trim())
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

//! Source-control tools.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde_json::{Map, Value, json};

use super::{
    COMMIT_FILE, GET_PR_DIFF, GET_REPO_CONTENT, MERGE_PR, Tool, optional_str, required_str,
    required_u64,
};
use crate::io::source_control::{MergeOutcome, SourceControl};

pub struct GetRepoContent {
    source_control: Arc<dyn SourceControl>,
}

impl GetRepoContent {
    pub fn new(source_control: Arc<dyn SourceControl>) -> Self {
        Self { source_control }
    }
}

impl Tool for GetRepoContent {
    fn name(&self) -> &str {
        GET_REPO_CONTENT
    }

    fn describe(&self) -> &str {
        "Reads file contents from the hosted repository. Input: path (optional, defaults to the root)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let path = optional_str(params, "path").unwrap_or_default();
        let files = self.source_control.get_repo_content(path)?;
        Ok(json!(files))
    }
}

pub struct GetPrDiff {
    source_control: Arc<dyn SourceControl>,
}

impl GetPrDiff {
    pub fn new(source_control: Arc<dyn SourceControl>) -> Self {
        Self { source_control }
    }
}

impl Tool for GetPrDiff {
    fn name(&self) -> &str {
        GET_PR_DIFF
    }

    fn describe(&self) -> &str {
        "Retrieves the diff of a pull request. Input: pr_number (int)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let number = required_u64(params, "pr_number")?;
        Ok(Value::String(self.source_control.get_pr_diff(number)?))
    }
}

pub struct CommitFile {
    source_control: Arc<dyn SourceControl>,
    default_branch: String,
}

impl CommitFile {
    pub fn new(source_control: Arc<dyn SourceControl>, default_branch: impl Into<String>) -> Self {
        Self {
            source_control,
            default_branch: default_branch.into(),
        }
    }
}

impl Tool for CommitFile {
    fn name(&self) -> &str {
        COMMIT_FILE
    }

    fn describe(&self) -> &str {
        "Commits a file to the hosted repository, creating or updating it. Input: file_path, content, message, branch (optional, defaults to the base branch)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let path = required_str(params, "file_path")?;
        let content = required_str(params, "content")?;
        let message = required_str(params, "message")?;
        let branch = optional_str(params, "branch").unwrap_or(&self.default_branch);
        let outcome = self
            .source_control
            .commit_file(branch, path, content, message)?;
        Ok(json!({"file_path": path, "branch": branch, "outcome": outcome}))
    }
}

/// Merges performed through [`MergePr`], as `(pr_number, outcome)`.
#[derive(Debug, Clone, Default)]
pub struct MergeLog(Arc<Mutex<Vec<(u64, MergeOutcome)>>>);

impl MergeLog {
    fn entries(&self) -> MutexGuard<'_, Vec<(u64, MergeOutcome)>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most recent outcome recorded for `pr_number`.
    pub fn last_for(&self, pr_number: u64) -> Option<MergeOutcome> {
        self.entries()
            .iter()
            .rev()
            .find(|(number, _)| *number == pr_number)
            .map(|(_, outcome)| outcome.clone())
    }
}

pub struct MergePr {
    source_control: Arc<dyn SourceControl>,
    log: MergeLog,
}

impl MergePr {
    pub fn new(source_control: Arc<dyn SourceControl>) -> Self {
        Self::with_log(source_control, MergeLog::default())
    }

    /// Record every merge outcome into `log`.
    pub fn with_log(source_control: Arc<dyn SourceControl>, log: MergeLog) -> Self {
        Self {
            source_control,
            log,
        }
    }
}

impl Tool for MergePr {
    fn name(&self) -> &str {
        MERGE_PR
    }

    fn describe(&self) -> &str {
        "Merges a pull request. Input: pr_number (int), commit_title (str)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let number = required_u64(params, "pr_number")?;
        let default_title = format!("Merge pull request #{number}");
        let title = optional_str(params, "commit_title").unwrap_or(&default_title);
        let outcome = self.source_control.merge_pull_request(number, title)?;
        self.log.entries().push((number, outcome.clone()));
        Ok(serde_json::to_value(outcome)?)
    }
}

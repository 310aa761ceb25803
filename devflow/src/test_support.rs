//! Scripted and in-memory stand-ins for the external capabilities.
//!
//! Compiled for unit tests and behind the `test-support` feature so the
//! integration tests can drive whole cycles without a network or a model.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};

use crate::core::types::{FeatureTicket, PrDetails, Priority, PullRequest};
use crate::io::browser::{BrowserTester, TestRun, UiAction, UiRun};
use crate::io::git::{GitWorkflow, PublishOutcome, commit_message};
use crate::io::log_sink::{LogSink, matches_filter};
use crate::io::model::{GenerationOptions, Model, ModelError, ModelResponse};
use crate::io::retry::Sleeper;
use crate::io::source_control::{BranchOutcome, CommitOutcome, MergeOutcome, SourceControl};
use crate::tools::{Tool, required_str};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a [`ScriptedModel`] answers once its queue is empty.
#[derive(Debug, Clone)]
enum Fallback {
    Fail,
    Text(String),
    RateLimited,
}

/// Model that replays queued responses and records every prompt.
pub struct ScriptedModel {
    queue: RefCell<VecDeque<Result<ModelResponse, ModelError>>>,
    fallback: Fallback,
    prompts: RefCell<Vec<String>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    /// Empty script; calls past the end fail with an invalid-response error.
    pub fn new() -> Self {
        Self::with_fallback(Fallback::Fail)
    }

    /// Answers `text` forever once the queue is drained.
    pub fn repeating(text: &str) -> Self {
        Self::with_fallback(Fallback::Text(text.to_string()))
    }

    pub fn always_rate_limited() -> Self {
        Self::with_fallback(Fallback::RateLimited)
    }

    fn with_fallback(fallback: Fallback) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            fallback,
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn push_text(&self, text: &str) {
        self.queue
            .borrow_mut()
            .push_back(Ok(ModelResponse::text(text)));
    }

    /// A response with no text, as when every candidate was filtered.
    pub fn push_empty(&self) {
        self.queue.borrow_mut().push_back(Ok(ModelResponse::empty()));
    }

    pub fn push_error(&self, err: ModelError) {
        self.queue.borrow_mut().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Model for ScriptedModel {
    fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<ModelResponse, ModelError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        if let Some(next) = self.queue.borrow_mut().pop_front() {
            return next;
        }
        match &self.fallback {
            Fallback::Fail => Err(ModelError::InvalidResponse(
                "scripted model has no responses left".to_string(),
            )),
            Fallback::Text(text) => Ok(ModelResponse::text(text.clone())),
            Fallback::RateLimited => Err(ModelError::RateLimited { retry_after: None }),
        }
    }
}

/// Records requested delays instead of sleeping. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct NoSleep {
    recorded: Arc<Mutex<Vec<Duration>>>,
}

impl NoSleep {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.recorded).clone()
    }
}

impl Sleeper for NoSleep {
    fn sleep(&self, duration: Duration) {
        lock(&self.recorded).push(duration);
    }
}

/// Returns its `text` parameter.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn describe(&self) -> &str {
        "Echoes its `text` parameter back. Input: text (str)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        Ok(Value::String(required_str(params, "text")?.to_string()))
    }
}

#[derive(Debug, Default)]
struct HostState {
    branches: BTreeSet<String>,
    /// `(branch, path) -> content`
    files: BTreeMap<(String, String), String>,
    diffs: HashMap<u64, String>,
    /// Open pull requests keyed by head branch.
    pulls: BTreeMap<String, PullRequest>,
    merged: Vec<(u64, String)>,
    created_pulls: usize,
    /// Merges are answered with `merged: false`.
    unmergeable: bool,
}

/// In-memory repository host with idempotent branch and PR creation.
pub struct MemorySourceControl {
    base_branch: String,
    state: Mutex<HostState>,
}

impl Default for MemorySourceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySourceControl {
    /// A host whose only branch is `main`.
    pub fn new() -> Self {
        let mut state = HostState::default();
        state.branches.insert("main".to_string());
        Self {
            base_branch: "main".to_string(),
            state: Mutex::new(state),
        }
    }

    pub fn seed_file(&self, branch: &str, path: &str, content: &str) {
        lock(&self.state)
            .files
            .insert((branch.to_string(), path.to_string()), content.to_string());
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        lock(&self.state)
            .files
            .get(&(branch.to_string(), path.to_string()))
            .cloned()
    }

    pub fn set_diff(&self, number: u64, diff: &str) {
        lock(&self.state).diffs.insert(number, diff.to_string());
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        lock(&self.state).branches.contains(name)
    }

    /// `(number, commit title)` of every merge, in order.
    pub fn merged(&self) -> Vec<(u64, String)> {
        lock(&self.state).merged.clone()
    }

    /// Every later merge request is declined by the host.
    pub fn refuse_merges(&self) {
        lock(&self.state).unmergeable = true;
    }

    /// Pull requests actually created (reuses excluded).
    pub fn created_pull_requests(&self) -> usize {
        lock(&self.state).created_pulls
    }
}

impl SourceControl for MemorySourceControl {
    fn get_repo_content(&self, path: &str) -> Result<BTreeMap<String, String>> {
        let prefix = path.trim_matches('/');
        Ok(lock(&self.state)
            .files
            .iter()
            .filter(|((branch, file), _)| *branch == self.base_branch && file.starts_with(prefix))
            .map(|((_, file), content)| (file.clone(), content.clone()))
            .collect())
    }

    fn get_pr_diff(&self, number: u64) -> Result<String> {
        lock(&self.state)
            .diffs
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("pull request #{number} not found"))
    }

    fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        _message: &str,
    ) -> Result<CommitOutcome> {
        let mut state = lock(&self.state);
        if !state.branches.contains(branch) {
            bail!("branch '{branch}' not found");
        }
        let previous = state
            .files
            .insert((branch.to_string(), path.to_string()), content.to_string());
        Ok(match previous {
            Some(_) => CommitOutcome::Updated,
            None => CommitOutcome::Created,
        })
    }

    fn create_branch(&self, name: &str, base: &str) -> Result<BranchOutcome> {
        let mut state = lock(&self.state);
        if !state.branches.contains(base) {
            bail!("base branch '{base}' not found");
        }
        if !state.branches.insert(name.to_string()) {
            return Ok(BranchOutcome::AlreadyExists);
        }
        let copied: Vec<_> = state
            .files
            .iter()
            .filter(|((branch, _), _)| branch == base)
            .map(|((_, path), content)| ((name.to_string(), path.clone()), content.clone()))
            .collect();
        state.files.extend(copied);
        Ok(BranchOutcome::Created)
    }

    fn create_pull_request(
        &self,
        _title: &str,
        _body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.pulls.get(head) {
            return Ok(existing.clone());
        }
        if !state.branches.contains(head) || !state.branches.contains(base) {
            bail!("cannot open a pull request from '{head}' into '{base}'");
        }
        state.created_pulls += 1;
        let number = state.created_pulls as u64;
        let pr = PullRequest {
            url: format!("https://github.com/owner/repo/pull/{number}"),
            number,
        };
        state.pulls.insert(head.to_string(), pr.clone());
        Ok(pr)
    }

    fn merge_pull_request(&self, number: u64, title: &str) -> Result<MergeOutcome> {
        let mut state = lock(&self.state);
        if state.unmergeable {
            return Ok(MergeOutcome {
                merged: false,
                sha: None,
                message: "Pull Request is not mergeable".to_string(),
            });
        }
        state.merged.push((number, title.to_string()));
        Ok(MergeOutcome {
            merged: true,
            sha: Some(format!("{number:040x}")),
            message: "Pull Request successfully merged".to_string(),
        })
    }
}

/// Log sink backed by a map of collections.
#[derive(Default)]
pub struct MemoryLogSink {
    collections: Mutex<BTreeMap<String, Vec<Value>>>,
    unavailable: bool,
}

impl MemoryLogSink {
    /// A sink whose every call fails.
    pub fn unavailable() -> Self {
        Self {
            collections: Mutex::default(),
            unavailable: true,
        }
    }

    pub fn records(&self, collection: &str) -> Vec<Value> {
        lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn insert(&self, collection: &str, record: &Value) -> Result<()> {
        if self.unavailable {
            bail!("log sink unavailable");
        }
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn query(&self, collection: &str, filter: &Map<String, Value>) -> Result<Vec<Value>> {
        if self.unavailable {
            bail!("log sink unavailable");
        }
        Ok(self
            .records(collection)
            .into_iter()
            .filter(|record| matches_filter(record, filter))
            .collect())
    }
}

/// Browser tester with fixed results that records its calls.
pub struct ScriptedBrowser {
    tests_pass: bool,
    test_calls: Mutex<Vec<String>>,
    ui_calls: Mutex<Vec<(String, Vec<UiAction>)>>,
}

impl ScriptedBrowser {
    pub fn passing() -> Self {
        Self::new(true)
    }

    pub fn failing() -> Self {
        Self::new(false)
    }

    fn new(tests_pass: bool) -> Self {
        Self {
            tests_pass,
            test_calls: Mutex::default(),
            ui_calls: Mutex::default(),
        }
    }

    pub fn test_calls(&self) -> Vec<String> {
        lock(&self.test_calls).clone()
    }

    pub fn ui_calls(&self) -> Vec<(String, Vec<UiAction>)> {
        lock(&self.ui_calls).clone()
    }
}

impl BrowserTester for ScriptedBrowser {
    fn run_tests(&self, test_file_path: &str) -> Result<TestRun> {
        lock(&self.test_calls).push(test_file_path.to_string());
        let verdict = if self.tests_pass { "passed" } else { "failed" };
        Ok(TestRun {
            success: self.tests_pass,
            output: format!("1 {verdict} in {test_file_path}"),
        })
    }

    fn deploy_and_interact(&self, url: &str, actions: &[UiAction]) -> Result<UiRun> {
        lock(&self.ui_calls).push((url.to_string(), actions.to_vec()));
        Ok(UiRun {
            success: self.tests_pass,
            screenshots: (1..=actions.len())
                .map(|n| format!("screenshot_{n}.png"))
                .collect(),
            logs: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishBehavior {
    Push,
    Clean,
    Reject,
}

/// Git workflow fake recording checkouts and publishes.
pub struct MemoryGit {
    clone_fails: bool,
    publish: PublishBehavior,
    checkouts: RefCell<Vec<String>>,
    published: RefCell<Vec<(String, String)>>,
}

impl Default for MemoryGit {
    fn default() -> Self {
        Self::with(false, PublishBehavior::Push)
    }
}

impl MemoryGit {
    fn with(clone_fails: bool, publish: PublishBehavior) -> Self {
        Self {
            clone_fails,
            publish,
            checkouts: RefCell::default(),
            published: RefCell::default(),
        }
    }

    pub fn failing_clone() -> Self {
        Self::with(true, PublishBehavior::Push)
    }

    /// Publishing finds nothing to commit.
    pub fn clean_worktree() -> Self {
        Self::with(false, PublishBehavior::Clean)
    }

    /// The push is rejected by the remote.
    pub fn rejecting_push() -> Self {
        Self::with(false, PublishBehavior::Reject)
    }

    pub fn checkouts(&self) -> Vec<String> {
        self.checkouts.borrow().clone()
    }

    /// `(branch, commit message prefix)` per successful publish.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.borrow().clone()
    }
}

impl GitWorkflow for MemoryGit {
    fn clone_if_absent(&self) -> Result<()> {
        if self.clone_fails {
            bail!("git clone failed: repository not found");
        }
        Ok(())
    }

    fn checkout_feature_branch(&self, branch: &str) -> Result<()> {
        self.checkouts.borrow_mut().push(branch.to_string());
        Ok(())
    }

    fn publish(&self, branch: &str, message_prefix: &str) -> Result<PublishOutcome> {
        match self.publish {
            PublishBehavior::Clean => Ok(PublishOutcome::NoChanges),
            PublishBehavior::Reject => bail!("git push rejected: non-fast-forward"),
            PublishBehavior::Push => {
                self.published
                    .borrow_mut()
                    .push((branch.to_string(), message_prefix.to_string()));
                Ok(PublishOutcome::Pushed {
                    commit_message: commit_message(message_prefix, chrono::Local::now()),
                })
            }
        }
    }
}

pub fn sample_ticket() -> FeatureTicket {
    FeatureTicket {
        feature_id: "F101".to_string(),
        title: "Implement Light/Dark Mode Toggle".to_string(),
        description: "Let users switch between light and dark mode and remember the choice."
            .to_string(),
        priority: Priority::High,
        acceptance_criteria: vec![
            "Toggle visible in navbar".to_string(),
            "Mode persisted in local storage".to_string(),
        ],
    }
}

pub fn sample_pr(number: u64) -> PrDetails {
    PrDetails {
        id: number,
        title: sample_ticket().title,
        author: "builder-agent".to_string(),
        url: format!("https://github.com/owner/repo/pull/{number}"),
    }
}

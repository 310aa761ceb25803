//! Source-control host capability and its GitHub REST implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::core::types::PullRequest;
use crate::io::config::RepoConfig;

const USER_AGENT: &str = "devflow";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub merged: bool,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Operations on the hosted repository.
pub trait SourceControl: Send + Sync {
    /// Every file under `path` (recursively), keyed by repository path.
    fn get_repo_content(&self, path: &str) -> Result<BTreeMap<String, String>>;

    /// Unified diff of a pull request.
    fn get_pr_diff(&self, number: u64) -> Result<String>;

    /// Create or update a single file on `branch`.
    fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitOutcome>;

    /// Create `name` from the tip of `base`; an existing branch is left alone.
    fn create_branch(&self, name: &str, base: &str) -> Result<BranchOutcome>;

    /// Open a pull request, or return the open one that already has `head`.
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest>;

    fn merge_pull_request(&self, number: u64, title: &str) -> Result<MergeOutcome>;
}

/// GitHub REST v3 client.
#[derive(Debug)]
pub struct GitHub {
    http: Client,
    token: String,
    api_base: String,
    repo: String,
    owner: String,
}

impl GitHub {
    /// Build a client from config, reading the token from the configured
    /// environment variable.
    pub fn from_config(cfg: &RepoConfig, timeout: Duration) -> Result<Self> {
        let token = std::env::var(&cfg.token_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("{} is required for source control", cfg.token_env))?;
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("build GitHub HTTP client")?;
        Ok(Self {
            http,
            token,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            repo: cfg.name.clone(),
            owner: cfg.owner().to_string(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repo, tail.trim_start_matches('/'))
    }

    fn get(&self, tail: &str) -> RequestBuilder {
        self.authed(self.http.get(self.url(tail)))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn send_json(&self, req: RequestBuilder, what: &str) -> Result<Value> {
        let resp = req.send().with_context(|| format!("send {what}"))?;
        let resp = ensure_success(resp, what)?;
        resp.json().with_context(|| format!("decode {what} response"))
    }

    /// `None` on 404.
    fn get_optional(&self, tail: &str, what: &str) -> Result<Option<Value>> {
        let resp = self.get(tail).send().with_context(|| format!("send {what}"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, what)?;
        Ok(Some(
            resp.json().with_context(|| format!("decode {what} response"))?,
        ))
    }

    fn collect_contents(&self, path: &str, files: &mut BTreeMap<String, String>) -> Result<()> {
        let tail = format!("contents/{}", path.trim_matches('/'));
        let listing = self.send_json(self.get(&tail), "get contents")?;
        match listing {
            Value::Array(entries) => {
                for entry in entries {
                    let kind = entry.get("type").and_then(Value::as_str).unwrap_or_default();
                    let Some(entry_path) = entry.get("path").and_then(Value::as_str) else {
                        continue;
                    };
                    match kind {
                        "file" | "dir" => self.collect_contents(entry_path, files)?,
                        _ => debug!(path = entry_path, kind, "skipping content entry"),
                    }
                }
            }
            file @ Value::Object(_) => {
                if let Some((path, text)) = decode_file_entry(&file)? {
                    files.insert(path, text);
                }
            }
            other => bail!("unexpected contents payload: {other}"),
        }
        Ok(())
    }
}

impl SourceControl for GitHub {
    #[instrument(skip_all, fields(path))]
    fn get_repo_content(&self, path: &str) -> Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        self.collect_contents(path, &mut files)?;
        debug!(files = files.len(), "fetched repository content");
        Ok(files)
    }

    #[instrument(skip_all, fields(number))]
    fn get_pr_diff(&self, number: u64) -> Result<String> {
        let resp = self
            .get(&format!("pulls/{number}"))
            .header("Accept", "application/vnd.github.diff")
            .send()
            .context("send get pull request diff")?;
        let resp = ensure_success(resp, "get pull request diff")?;
        resp.text().context("read pull request diff")
    }

    #[instrument(skip_all, fields(branch, path))]
    fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitOutcome> {
        let tail = format!("contents/{}", path.trim_matches('/'));
        let existing = self.get_optional(&format!("{tail}?ref={branch}"), "get file")?;
        let sha = existing
            .as_ref()
            .and_then(|v| v.get("sha"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = &sha {
            body["sha"] = json!(sha);
        }
        let req = self.authed(self.http.put(self.url(&tail))).json(&body);
        self.send_json(req, "commit file")?;
        let outcome = if sha.is_some() {
            CommitOutcome::Updated
        } else {
            CommitOutcome::Created
        };
        info!(?outcome, "committed file");
        Ok(outcome)
    }

    #[instrument(skip_all, fields(name, base))]
    fn create_branch(&self, name: &str, base: &str) -> Result<BranchOutcome> {
        if self
            .get_optional(&format!("git/ref/heads/{name}"), "get branch ref")?
            .is_some()
        {
            info!("branch exists, skipping creation");
            return Ok(BranchOutcome::AlreadyExists);
        }
        let base_ref = self.send_json(self.get(&format!("git/ref/heads/{base}")), "get base ref")?;
        let sha = base_ref
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("base ref {base} carries no sha"))?;
        let req = self
            .authed(self.http.post(self.url("git/refs")))
            .json(&json!({"ref": format!("refs/heads/{name}"), "sha": sha}));
        self.send_json(req, "create branch")?;
        info!("created branch");
        Ok(BranchOutcome::Created)
    }

    #[instrument(skip_all, fields(head, base))]
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest> {
        let qualified_head = format!("{}:{head}", self.owner);
        let existing = self.send_json(
            self.get("pulls")
                .query(&[("state", "open"), ("head", qualified_head.as_str())]),
            "list pull requests",
        )?;
        if let Some(first) = existing.as_array().and_then(|prs| prs.first()) {
            info!("pull request already open for head, reusing");
            return pull_request_from(first);
        }
        if self
            .get_optional(&format!("branches/{head}"), "get branch")?
            .is_none()
        {
            bail!("branch {head} not found in repo");
        }
        let req = self
            .authed(self.http.post(self.url("pulls")))
            .json(&json!({"title": title, "body": body, "head": head, "base": base}));
        let created = self.send_json(req, "create pull request")?;
        let pr = pull_request_from(&created)?;
        info!(number = pr.number, url = %pr.url, "created pull request");
        Ok(pr)
    }

    #[instrument(skip_all, fields(number))]
    fn merge_pull_request(&self, number: u64, title: &str) -> Result<MergeOutcome> {
        let req = self
            .authed(self.http.put(self.url(&format!("pulls/{number}/merge"))))
            .json(&json!({"commit_title": title}));
        let value = self.send_json(req, "merge pull request")?;
        let outcome: MergeOutcome =
            serde_json::from_value(value).context("decode merge outcome")?;
        info!(merged = outcome.merged, "merge requested");
        Ok(outcome)
    }
}

fn ensure_success(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_else(|_| "(no body)".into());
    Err(anyhow!("{what} failed with status {status}: {}", body.trim()))
}

fn pull_request_from(value: &Value) -> Result<PullRequest> {
    let url = value
        .get("html_url")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("pull request payload missing html_url"))?;
    let number = value
        .get("number")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("pull request payload missing number"))?;
    Ok(PullRequest {
        url: url.to_string(),
        number,
    })
}

/// Decode a contents-API file object into `(path, text)`. Non-file objects
/// yield `None`.
fn decode_file_entry(value: &Value) -> Result<Option<(String, String)>> {
    if value.get("type").and_then(Value::as_str) != Some("file") {
        return Ok(None);
    }
    let path = value
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("file entry missing path"))?;
    let encoded: String = value
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(encoded)
        .with_context(|| format!("decode base64 content of {path}"))?;
    Ok(Some((
        path.to_string(),
        String::from_utf8_lossy(&bytes).into_owned(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wrapped_base64_file() {
        let entry = json!({
            "type": "file",
            "path": "src/index.html",
            "content": "PGh0bWw+\nPC9odG1sPg==\n",
        });
        let (path, text) = decode_file_entry(&entry).expect("decode").expect("file");
        assert_eq!(path, "src/index.html");
        assert_eq!(text, "<html></html>");
    }

    #[test]
    fn directory_object_is_not_a_file() {
        let entry = json!({"type": "dir", "path": "src"});
        assert!(decode_file_entry(&entry).expect("decode").is_none());
    }

    #[test]
    fn pull_request_requires_number_and_url() {
        let pr = pull_request_from(&json!({"html_url": "https://x/pull/7", "number": 7}))
            .expect("pr");
        assert_eq!(pr.number, 7);
        assert!(pull_request_from(&json!({"number": 7})).is_err());
    }

    #[test]
    fn merge_outcome_tolerates_missing_fields() {
        let outcome: MergeOutcome =
            serde_json::from_value(json!({"merged": true})).expect("decode");
        assert!(outcome.merged);
        assert!(outcome.sha.is_none());
    }
}

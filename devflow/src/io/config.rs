//! Pipeline configuration stored under `.devflow/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffPolicy;
use crate::io::deploy::DeployTarget;

pub const DEFAULT_CONFIG_PATH: &str = ".devflow/config.toml";

/// Pipeline configuration (TOML).
///
/// Built once at startup and passed down explicitly. Missing fields default to
/// the values the agents were tuned with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevflowConfig {
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    pub repo: RepoConfig,
    pub pipeline: PipelineConfig,
    pub browser: BrowserConfig,
    pub deploy: DeployConfig,
    pub logs: LogsConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider identifier. Only `gemini` is built in.
    pub provider: String,
    pub name: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub api_base: String,
    /// Sampling temperature for the working agents.
    pub temperature: f32,
    /// Sampling temperature for ticket intake.
    pub intake_temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            name: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.7,
            intake_temperature: 0.3,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub multiplier_secs: u64,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier_secs: 1,
            min_delay_secs: 4,
            max_delay_secs: 10,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            multiplier: Duration::from_secs(self.multiplier_secs),
            min_delay: Duration::from_secs(self.min_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Round bound for the working agents.
    pub max_iterations: u32,
    /// Round bound for ticket intake.
    pub intake_max_iterations: u32,
    /// Wall-clock bound for one tool invocation.
    pub tool_timeout_secs: u64,
    /// Validate final answers against the per-agent JSON Schema.
    pub strict_final_answers: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            intake_max_iterations: 3,
            tool_timeout_secs: 10 * 60,
            strict_final_answers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepoConfig {
    /// `owner/name` on the source-control host.
    pub name: String,
    pub base_branch: String,
    /// Local clone location.
    pub local_path: PathBuf,
    pub token_env: String,
    pub api_base: String,
    /// Clone URL; derived from `name` when unset.
    pub remote_url: Option<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: "owner/repo".to_string(),
            base_branch: "main".to_string(),
            local_path: PathBuf::from("repo"),
            token_env: "GITHUB_TOKEN".to_string(),
            api_base: "https://api.github.com".to_string(),
            remote_url: None,
        }
    }
}

impl RepoConfig {
    pub fn remote_url(&self) -> String {
        self.remote_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}.git", self.name))
    }

    pub fn web_url(&self) -> String {
        format!("https://github.com/{}", self.name)
    }

    pub fn owner(&self) -> &str {
        self.name.split('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Skip the merge decision when an evaluation agent failed, and run
    /// post-merge docs only after a merge. `false` runs every stage.
    pub gate_on_failure: bool,
    /// Minimum reviewer `code_quality_score` that counts as approval.
    pub review_approval_min_quality: f64,
    pub deploy_method: DeployTarget,
    pub project_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gate_on_failure: true,
            review_approval_min_quality: 7.0,
            deploy_method: DeployTarget::Vercel,
            project_path: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserConfig {
    /// Test runner invoked as `<cmd...> <test_file_path>`.
    pub test_command: Vec<String>,
    /// UI driver invoked with a JSON request on stdin; unset disables UI runs.
    pub driver_command: Option<Vec<String>>,
    pub output_limit_bytes: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            test_command: vec!["pytest".to_string()],
            driver_command: None,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployConfig {
    pub preview_url: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            preview_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogsConfig {
    pub dir: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".devflow/logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl DevflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature)
            || !(0.0..=2.0).contains(&self.model.intake_temperature)
        {
            return Err(anyhow!("model temperatures must be within 0.0..=2.0"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.min_delay_secs > self.retry.max_delay_secs {
            return Err(anyhow!("retry.min_delay_secs must be <= retry.max_delay_secs"));
        }
        if self.agent.max_iterations == 0 || self.agent.intake_max_iterations == 0 {
            return Err(anyhow!("agent iteration bounds must be > 0"));
        }
        if self.agent.tool_timeout_secs == 0 {
            return Err(anyhow!("agent.tool_timeout_secs must be > 0"));
        }
        if !self.repo.name.contains('/') {
            return Err(anyhow!("repo.name must look like 'owner/name'"));
        }
        if self.repo.base_branch.trim().is_empty() {
            return Err(anyhow!("repo.base_branch must be non-empty"));
        }
        if self.browser.test_command.is_empty() || self.browser.test_command[0].trim().is_empty()
        {
            return Err(anyhow!("browser.test_command must be a non-empty array"));
        }
        if self.git.command_timeout_secs == 0 {
            return Err(anyhow!("git.command_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.tool_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DevflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<DevflowConfig> {
    if !path.exists() {
        let cfg = DevflowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DevflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DevflowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

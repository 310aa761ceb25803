//! Browser test capability backed by external commands.
//!
//! Test files are run with the configured test runner; UI interaction is
//! delegated to a driver process that reads a JSON request on stdin and
//! prints a JSON report on stdout.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::io::config::BrowserConfig;
use crate::io::process::run_command_with_timeout;

/// Action verb. Verbs the driver knows beyond click and type pass through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UiActionKind {
    Click,
    Type,
    Other(String),
}

impl From<String> for UiActionKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "click" => UiActionKind::Click,
            "type" => UiActionKind::Type,
            _ => UiActionKind::Other(raw),
        }
    }
}

impl From<UiActionKind> for String {
    fn from(kind: UiActionKind) -> Self {
        match kind {
            UiActionKind::Click => "click".to_string(),
            UiActionKind::Type => "type".to_string(),
            UiActionKind::Other(raw) => raw,
        }
    }
}

/// One step of a UI interaction script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiAction {
    #[serde(rename = "type")]
    pub kind: UiActionKind,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiRun {
    pub success: bool,
    #[serde(default)]
    pub screenshots: Vec<String>,
    #[serde(default)]
    pub logs: Vec<Value>,
}

pub trait BrowserTester: Send + Sync {
    fn run_tests(&self, test_file_path: &str) -> Result<TestRun>;

    fn deploy_and_interact(&self, url: &str, actions: &[UiAction]) -> Result<UiRun>;
}

#[derive(Debug, Clone)]
pub struct CommandBrowser {
    test_command: Vec<String>,
    driver_command: Option<Vec<String>>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandBrowser {
    pub fn new(cfg: &BrowserConfig, timeout: Duration) -> Self {
        Self {
            test_command: cfg.test_command.clone(),
            driver_command: cfg.driver_command.clone(),
            timeout,
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

fn command_from(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command line"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

impl BrowserTester for CommandBrowser {
    #[instrument(skip_all, fields(test_file_path))]
    fn run_tests(&self, test_file_path: &str) -> Result<TestRun> {
        let mut cmd = command_from(&self.test_command)?;
        cmd.arg(test_file_path);
        let out = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .context("run test command")?;
        let mut output = out.combined_text("tests");
        if out.timed_out {
            output.push_str(&format!(
                "\n[tests timed out after {}s]\n",
                self.timeout.as_secs()
            ));
        }
        let success = out.success();
        info!(success, "test run finished");
        Ok(TestRun { success, output })
    }

    #[instrument(skip_all, fields(url, actions = actions.len()))]
    fn deploy_and_interact(&self, url: &str, actions: &[UiAction]) -> Result<UiRun> {
        let Some(driver) = &self.driver_command else {
            bail!("no UI driver configured (set browser.driver_command)");
        };
        let request = serde_json::to_vec(&serde_json::json!({"url": url, "actions": actions}))
            .context("encode UI driver request")?;
        let out = run_command_with_timeout(
            command_from(driver)?,
            Some(&request),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run UI driver")?;
        if !out.success() {
            warn!(timed_out = out.timed_out, "UI driver failed");
            bail!("UI driver failed: {}", out.combined_text("driver").trim());
        }
        serde_json::from_slice(&out.stdout).context("decode UI driver report")
    }
}

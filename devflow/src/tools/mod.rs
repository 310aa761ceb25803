//! Model-facing tools and the registry that dispatches them.
//!
//! A registry is built once per agent run and never mutated afterwards. Each
//! invocation runs on a helper thread so a hanging capability cannot block
//! the loop past the configured timeout.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::scoring::number_from;

pub mod browser;
pub mod deploy;
pub mod files;
pub mod log_sink;
pub mod risk;
pub mod source_control;

pub const GET_REPO_CONTENT: &str = "SourceControl_GetRepoContent";
pub const GET_PR_DIFF: &str = "SourceControl_GetPRDiff";
pub const COMMIT_FILE: &str = "SourceControl_CommitFile";
pub const MERGE_PR: &str = "SourceControl_MergePR";
pub const LOCAL_FILE_WRITE: &str = "LocalFile_Write";
pub const RUN_TESTS: &str = "Browser_RunTests";
pub const DEPLOY_AND_TEST_UI: &str = "Browser_DeployAndTestUI";
pub const DEPLOY_VERCEL: &str = "Deploy_Vercel";
pub const DEPLOY_DOCKER: &str = "Deploy_Docker";
pub const ANALYZE_DIFF: &str = "RiskAnalyzer_AnalyzeDiff";
pub const INSERT_LOG: &str = "LogSink_InsertLog";

/// A named capability the model may invoke mid-conversation.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown to the model, including the expected parameters.
    fn describe(&self) -> &str;

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value>;
}

/// Ordered, name-unique set of tools for one agent.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            timeout,
        }
    }

    /// Add a tool; duplicate names are rejected.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Result<Self> {
        if self.contains(tool.name()) {
            bail!("duplicate tool name '{}'", tool.name());
        }
        self.tools.push(tool);
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Available-actions listing: one `- {name}: {description}` line per tool.
    pub fn listing(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.describe()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Invoke `name` and render its result as text.
    #[instrument(skip_all, fields(tool = name))]
    pub fn invoke(&self, name: &str, params: &Map<String, Value>) -> Result<String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown tool '{name}'"))?;
        let params = params.clone();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("tool-{name}"))
            .spawn(move || {
                let _ = tx.send(tool.invoke(&params));
            })
            .context("spawn tool thread")?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => {
                debug!("tool succeeded");
                Ok(render_output(&value))
            }
            Ok(Err(err)) => {
                warn!(err = %format!("{err:#}"), "tool failed");
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_secs = self.timeout.as_secs(), "tool timed out");
                Err(anyhow!(
                    "tool timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("tool panicked")),
        }
    }
}

/// Strings verbatim, everything else as pretty JSON.
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub(crate) fn required_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string parameter '{key}'"))
}

pub(crate) fn optional_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Accepts integers and numeric strings.
pub(crate) fn required_u64(params: &Map<String, Value>, key: &str) -> Result<u64> {
    let value = params
        .get(key)
        .ok_or_else(|| anyhow!("missing parameter '{key}'"))?;
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    number_from(value)
        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as u64)
        .ok_or_else(|| anyhow!("parameter '{key}' must be a non-negative integer"))
}

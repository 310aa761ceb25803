//! Builder: implements a ticket in the local clone and tests it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use minijinja::context;
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use super::{AgentEnv, into_report, setup_failure};
use crate::core::types::{AgentKind, AgentReport, FeatureTicket, object};
use crate::io::browser::BrowserTester;
use crate::io::log_sink::LogSink;
use crate::io::source_control::SourceControl;
use crate::io::workspace::LocalFiles;
use crate::tools::ToolRegistry;
use crate::tools::browser::RunTests;
use crate::tools::files::LocalFileWrite;
use crate::tools::log_sink::InsertLog;
use crate::tools::source_control::GetRepoContent;

const KIND: AgentKind = AgentKind::Builder;

/// Keys the builder may report but must not: the orchestrator owns the PR.
const STRIPPED_KEYS: [&str; 2] = ["pr_url", "pr_number"];

pub struct Builder<'a> {
    env: AgentEnv<'a>,
    source_control: Arc<dyn SourceControl>,
    files: Arc<dyn LocalFiles>,
    browser: Arc<dyn BrowserTester>,
    log_sink: Arc<dyn LogSink>,
    local_repo_path: PathBuf,
}

impl<'a> Builder<'a> {
    pub fn new(
        env: AgentEnv<'a>,
        source_control: Arc<dyn SourceControl>,
        files: Arc<dyn LocalFiles>,
        browser: Arc<dyn BrowserTester>,
        log_sink: Arc<dyn LogSink>,
        local_repo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            env,
            source_control,
            files,
            browser,
            log_sink,
            local_repo_path: local_repo_path.into(),
        }
    }

    fn tools(&self) -> Result<ToolRegistry> {
        self.env
            .registry()
            .with(Arc::new(GetRepoContent::new(self.source_control.clone())))?
            .with(Arc::new(LocalFileWrite::new(self.files.clone())))?
            .with(Arc::new(RunTests::new(self.browser.clone())))?
            .with(Arc::new(InsertLog::new(self.log_sink.clone())))
    }

    fn prompt(&self, ticket: &FeatureTicket, tools: &ToolRegistry) -> Result<String> {
        let files = self
            .source_control
            .get_repo_content("")
            .context("fetch repository content")?;
        let repo_context =
            serde_json::to_string_pretty(&files).context("render repository content")?;
        self.env.prompts.render(
            KIND,
            context! {
                tools => tools.listing(),
                feature_ticket => ticket.to_pretty_json(),
                repo_context => repo_context,
                local_repo_path => self.local_repo_path.display().to_string(),
            },
        )
    }

    /// Implement `ticket` locally. Success payload: `status, message, local_changes_made`.
    #[instrument(skip_all, fields(feature_id = %ticket.feature_id))]
    pub fn run(&self, ticket: &FeatureTicket) -> AgentReport {
        let prepared = self
            .tools()
            .and_then(|tools| self.prompt(ticket, &tools).map(|prompt| (tools, prompt)));
        let (tools, prompt) = match prepared {
            Ok(pair) => pair,
            Err(err) => return setup_failure(KIND, &err, failure_defaults()),
        };

        let mut report = into_report(
            KIND,
            self.env.run_tool_loop(KIND, &tools, prompt),
            |_| failure_defaults(),
        );
        for key in STRIPPED_KEYS {
            report.payload.remove(key);
        }
        info!(success = report.is_success(), "builder finished");
        report
    }
}

fn failure_defaults() -> Map<String, Value> {
    object([("local_changes_made", json!(false))])
}

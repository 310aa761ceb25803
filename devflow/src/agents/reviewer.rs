//! Reviewer: scores a pull request diff.

use std::sync::Arc;

use anyhow::{Context, Result};
use minijinja::context;
use tracing::instrument;

use super::{AgentEnv, empty_raw_response, into_report, raw_response_defaults, setup_failure};
use crate::core::types::{AgentKind, AgentReport, PrDetails};
use crate::io::log_sink::LogSink;
use crate::io::source_control::SourceControl;
use crate::tools::ToolRegistry;
use crate::tools::log_sink::InsertLog;
use crate::tools::source_control::{CommitFile, GetPrDiff};

const KIND: AgentKind = AgentKind::Reviewer;

pub struct Reviewer<'a> {
    env: AgentEnv<'a>,
    source_control: Arc<dyn SourceControl>,
    log_sink: Arc<dyn LogSink>,
    base_branch: String,
}

impl<'a> Reviewer<'a> {
    pub fn new(
        env: AgentEnv<'a>,
        source_control: Arc<dyn SourceControl>,
        log_sink: Arc<dyn LogSink>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            env,
            source_control,
            log_sink,
            base_branch: base_branch.into(),
        }
    }

    fn tools(&self) -> Result<ToolRegistry> {
        self.env
            .registry()
            .with(Arc::new(GetPrDiff::new(self.source_control.clone())))?
            .with(Arc::new(CommitFile::new(
                self.source_control.clone(),
                self.base_branch.clone(),
            )))?
            .with(Arc::new(InsertLog::new(self.log_sink.clone())))
    }

    fn prompt(&self, pr_number: u64, pr_details: &PrDetails, tools: &ToolRegistry) -> Result<String> {
        let diff = self
            .source_control
            .get_pr_diff(pr_number)
            .with_context(|| format!("fetch diff for PR #{pr_number}"))?;
        self.env.prompts.render(
            KIND,
            context! {
                tools => tools.listing(),
                pr_details => pr_details.to_pretty_json(),
                commit_diff => diff,
                pr_number => pr_number,
            },
        )
    }

    /// Success payload: `pr_number, review_summary, suggestions,
    /// code_quality_score, complexity_score, test_logic_validation`.
    #[instrument(skip_all, fields(pr_number))]
    pub fn run_review(&self, pr_number: u64, pr_details: &PrDetails) -> AgentReport {
        let prepared = self.tools().and_then(|tools| {
            self.prompt(pr_number, pr_details, &tools)
                .map(|prompt| (tools, prompt))
        });
        match prepared {
            Ok((tools, prompt)) => into_report(
                KIND,
                self.env.run_tool_loop(KIND, &tools, prompt),
                raw_response_defaults,
            ),
            Err(err) => setup_failure(KIND, &err, empty_raw_response()),
        }
    }
}

//! Impact analyzer: estimates change risk.

use std::sync::Arc;

use anyhow::{Context, Result};
use minijinja::context;
use serde_json::Value;
use tracing::instrument;

use super::{AgentEnv, empty_raw_response, into_report, raw_response_defaults, setup_failure};
use crate::core::types::{AgentKind, AgentReport, PrDetails};
use crate::io::log_sink::LogSink;
use crate::io::source_control::SourceControl;
use crate::tools::ToolRegistry;
use crate::tools::log_sink::InsertLog;
use crate::tools::risk::RiskAnalyzer;
use crate::tools::source_control::GetPrDiff;

const KIND: AgentKind = AgentKind::ImpactAnalyzer;

pub struct ImpactAnalyzer<'a> {
    env: AgentEnv<'a>,
    source_control: Arc<dyn SourceControl>,
    log_sink: Arc<dyn LogSink>,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(
        env: AgentEnv<'a>,
        source_control: Arc<dyn SourceControl>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            env,
            source_control,
            log_sink,
        }
    }

    fn tools(&self) -> Result<ToolRegistry> {
        self.env
            .registry()
            .with(Arc::new(GetPrDiff::new(self.source_control.clone())))?
            .with(Arc::new(RiskAnalyzer))?
            .with(Arc::new(InsertLog::new(self.log_sink.clone())))
    }

    /// `repo_memory` is free-form context rendered into the prompt; an empty
    /// object when nothing is known. Success payload: `pr_number,
    /// files_changed, tests_affected, historical_failure_rate,
    /// estimated_risk_score`.
    #[instrument(skip_all, fields(pr_number))]
    pub fn run_analysis(
        &self,
        pr_number: u64,
        pr_details: &PrDetails,
        repo_memory: &Value,
    ) -> AgentReport {
        let prepared = self.tools().and_then(|tools| {
            let memory =
                serde_json::to_string_pretty(repo_memory).context("render repository memory")?;
            let prompt = self.env.prompts.render(
                KIND,
                context! {
                    tools => tools.listing(),
                    pr_details => pr_details.to_pretty_json(),
                    repo_memory => memory,
                    pr_number => pr_number,
                },
            )?;
            Ok((tools, prompt))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentLimits;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{MemoryLogSink, MemorySourceControl, ScriptedModel, sample_pr};
    use serde_json::json;

    #[test]
    fn risk_tool_output_reaches_the_model() {
        let model = ScriptedModel::new();
        let diff = "+a\n".repeat(20);
        model.push_text(&format!(
            "<tool_code>{}</tool_code>",
            json!({"tool_name": "RiskAnalyzer_AnalyzeDiff", "parameters": {"commit_diff": diff}})
        ));
        model.push_text(
            r#"<final_answer>{"pr_number": 5, "files_changed": ["a"], "tests_affected": [], "historical_failure_rate": 0.0, "estimated_risk_score": 2.0}</final_answer>"#,
        );
        let prompts = PromptEngine::new();
        let env = AgentEnv::new(&model, &prompts, AgentLimits::default());

        let report = ImpactAnalyzer::new(
            env,
            Arc::new(MemorySourceControl::new()),
            Arc::new(MemoryLogSink::default()),
        )
        .run_analysis(5, &sample_pr(5), &json!({}));

        assert!(report.is_success());
        assert!(model.prompts()[1].contains("\"estimated_risk_score\": 2.0"));
    }
}

//! QA: deploys a preview and drives its UI.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use minijinja::context;
use tracing::instrument;

use super::{AgentEnv, empty_raw_response, into_report, raw_response_defaults, setup_failure};
use crate::core::types::{AgentKind, AgentReport, FeatureTicket};
use crate::io::browser::BrowserTester;
use crate::io::deploy::{DeployTarget, Deployer};
use crate::io::log_sink::LogSink;
use crate::tools::ToolRegistry;
use crate::tools::browser::DeployAndTestUi;
use crate::tools::deploy::DeployTool;
use crate::tools::log_sink::InsertLog;

const KIND: AgentKind = AgentKind::Qa;

pub struct Qa<'a> {
    env: AgentEnv<'a>,
    deployer: Arc<dyn Deployer>,
    browser: Arc<dyn BrowserTester>,
    log_sink: Arc<dyn LogSink>,
}

impl<'a> Qa<'a> {
    pub fn new(
        env: AgentEnv<'a>,
        deployer: Arc<dyn Deployer>,
        browser: Arc<dyn BrowserTester>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            env,
            deployer,
            browser,
            log_sink,
        }
    }

    fn tools(&self, project_path: &Path) -> Result<ToolRegistry> {
        self.env
            .registry()
            .with(Arc::new(DeployTool::new(
                self.deployer.clone(),
                DeployTarget::Vercel,
                project_path,
            )))?
            .with(Arc::new(DeployTool::new(
                self.deployer.clone(),
                DeployTarget::Docker,
                project_path,
            )))?
            .with(Arc::new(DeployAndTestUi::new(self.browser.clone())))?
            .with(Arc::new(InsertLog::new(self.log_sink.clone())))
    }

    /// Success payload: `feature_ticket_id, deploy_url, test_actions,
    /// screenshots, browser_logs, ui_bugs_detected, qa_summary`.
    #[instrument(skip_all, fields(feature_id = %ticket.feature_id, deploy_method = deploy_method.as_str()))]
    pub fn run_qa(
        &self,
        ticket: &FeatureTicket,
        deploy_method: DeployTarget,
        project_path: &Path,
    ) -> AgentReport {
        let prepared = self.tools(project_path).and_then(|tools| {
            let prompt = self.env.prompts.render(
                KIND,
                context! {
                    tools => tools.listing(),
                    feature_ticket => ticket.to_pretty_json(),
                    deploy_method => deploy_method.as_str(),
                    project_path => project_path.display().to_string(),
                    deploy_tool => DeployTool::tool_name(deploy_method),
                    feature_id => ticket.feature_id.as_str(),
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
    use crate::io::deploy::PreviewDeployer;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{MemoryLogSink, ScriptedBrowser, ScriptedModel, sample_ticket};
    use serde_json::json;

    #[test]
    fn deploys_with_configured_method_then_answers() {
        let model = ScriptedModel::new();
        model.push_text(r#"<tool_code>{"tool_name": "Deploy_Docker", "parameters": {}}</tool_code>"#);
        model.push_text(
            r#"<final_answer>{"feature_ticket_id": "F101", "deploy_url": "http://localhost:3000", "test_actions": [], "screenshots": [], "browser_logs": [], "ui_bugs_detected": false, "qa_summary": "ok"}</final_answer>"#,
        );
        let prompts = PromptEngine::new();
        let env = AgentEnv::new(&model, &prompts, AgentLimits::default());
        let qa = Qa::new(
            env,
            Arc::new(PreviewDeployer::new("http://localhost:3000")),
            Arc::new(ScriptedBrowser::passing()),
            Arc::new(MemoryLogSink::default()),
        );

        let report = qa.run_qa(&sample_ticket(), DeployTarget::Docker, Path::new("."));

        assert!(report.is_success());
        assert_eq!(report.get("ui_bugs_detected"), Some(&json!(false)));
        let prompts = model.prompts();
        assert!(prompts[0].contains("Deploy the project with `Deploy_Docker`"));
        assert!(prompts[1].contains("Tool Output for Deploy_Docker:"));
        assert!(prompts[1].contains("http://localhost:3000"));
    }
}

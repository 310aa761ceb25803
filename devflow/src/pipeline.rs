//! One feature request, end to end.
//!
//! Stages run strictly in order:
//!
//! ```text
//! GitInit -> Intake -> Branch -> Build -> Publish -> DocsAfterPr
//!   -> Evaluate (review, qa, impact) -> MergeDecision -> DocsAfterMerge
//! ```
//!
//! Any failure up to and including Publish ends the cycle. Documentation after
//! the PR and the three evaluation agents always run once a PR exists. With
//! `gate_on_failure` a failed evaluation agent skips the merge decision, and
//! post-merge documentation runs only after a merge; without it every stage
//! runs. A merge decision the host did not carry out fails the cycle. Every
//! cycle that produced a ticket is recorded to the log sink.

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::agents::builder::Builder;
use crate::agents::documentation::Documentation;
use crate::agents::impact::ImpactAnalyzer;
use crate::agents::merge_controller::{MergeController, UpstreamReports};
use crate::agents::product_manager::ProductManager;
use crate::agents::qa::Qa;
use crate::agents::reviewer::Reviewer;
use crate::agents::{AgentEnv, AgentLimits};
use crate::core::branch::feature_branch_name;
use crate::core::scoring::MergeDecision;
use crate::core::types::{AgentReport, FeatureTicket, PrDetails, PullRequest};
use crate::io::browser::BrowserTester;
use crate::io::config::DevflowConfig;
use crate::io::deploy::Deployer;
use crate::io::git::{GitWorkflow, PublishOutcome};
use crate::io::log_sink::{self, LogSink};
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;
use crate::io::schema::AnswerSchemas;
use crate::io::source_control::SourceControl;
use crate::io::workspace::LocalFiles;

pub const CYCLES_COLLECTION: &str = "orchestration_cycles";
const PR_AUTHOR: &str = "builder-agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    GitInit,
    Intake,
    Branch,
    Build,
    Publish,
    DocsAfterPr,
    Evaluate,
    MergeDecision,
    DocsAfterMerge,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::GitInit => "git_init",
            Stage::Intake => "intake",
            Stage::Branch => "branch",
            Stage::Build => "build",
            Stage::Publish => "publish",
            Stage::DocsAfterPr => "docs_after_pr",
            Stage::Evaluate => "evaluate",
            Stage::MergeDecision => "merge_decision",
            Stage::DocsAfterMerge => "docs_after_merge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Ran through the merge decision (merged or rejected).
    Completed,
    /// The builder left nothing to publish.
    NoChanges,
    /// An evaluation agent failed and the merge decision was skipped.
    Gated,
    Failed,
}

impl CycleStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, CycleStatus::Gated | CycleStatus::Failed)
    }
}

/// Every agent report produced during a cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReports {
    #[serde(rename = "product_manager_response", skip_serializing_if = "Option::is_none")]
    pub intake: Option<AgentReport>,
    #[serde(rename = "builder_response", skip_serializing_if = "Option::is_none")]
    pub builder: Option<AgentReport>,
    #[serde(rename = "documentation_after_pr_response", skip_serializing_if = "Option::is_none")]
    pub docs_after_pr: Option<AgentReport>,
    #[serde(rename = "reviewer_response", skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<AgentReport>,
    #[serde(rename = "qa_response", skip_serializing_if = "Option::is_none")]
    pub qa: Option<AgentReport>,
    #[serde(rename = "impact_analyzer_response", skip_serializing_if = "Option::is_none")]
    pub impact: Option<AgentReport>,
    #[serde(rename = "merge_controller_response", skip_serializing_if = "Option::is_none")]
    pub merge_controller: Option<AgentReport>,
    #[serde(rename = "auto_documentation_response", skip_serializing_if = "Option::is_none")]
    pub docs_after_merge: Option<AgentReport>,
}

/// What a cycle did. Printed by the CLI and flattened into the cycle record.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    /// Last stage reached.
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_ticket: Option<FeatureTicket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_decision: Option<MergeDecision>,
    pub reports: CycleReports,
    /// Sequence number of the persisted record, when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_sequence: Option<usize>,
}

impl CycleOutcome {
    fn new() -> Self {
        Self {
            status: CycleStatus::Failed,
            stage: Stage::GitInit,
            message: String::new(),
            feature_ticket: None,
            branch: None,
            pull_request: None,
            merge_decision: None,
            reports: CycleReports::default(),
            recorded_sequence: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        info!(stage = stage.as_str(), "stage started");
        self.stage = stage;
    }

    fn halt(&mut self, status: CycleStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        if status.is_failure() {
            warn!(stage = self.stage.as_str(), message = %self.message, "cycle halted");
        } else {
            info!(stage = self.stage.as_str(), message = %self.message, "cycle ended");
        }
    }
}

/// Persisted summary of one cycle. Append-only.
#[derive(Debug, Serialize)]
pub struct CycleRecord<'a> {
    pub feature_ticket_id: &'a str,
    #[serde(flatten)]
    pub outcome: &'a CycleOutcome,
    /// Count of earlier records plus one.
    pub sequence: usize,
    pub recorded_at: String,
}

/// External capabilities a cycle drives. The model should already retry.
pub struct Capabilities<'a> {
    pub model: &'a dyn Model,
    pub git: &'a dyn GitWorkflow,
    pub source_control: Arc<dyn SourceControl>,
    pub browser: Arc<dyn BrowserTester>,
    pub deployer: Arc<dyn Deployer>,
    pub log_sink: Arc<dyn LogSink>,
    pub files: Arc<dyn LocalFiles>,
}

/// Configured orchestrator.
pub struct Pipeline<'a> {
    caps: Capabilities<'a>,
    config: &'a DevflowConfig,
    prompts: PromptEngine,
    schemas: Option<AnswerSchemas>,
}

impl<'a> Pipeline<'a> {
    /// Validates the configuration and compiles answer schemas in strict mode.
    pub fn new(caps: Capabilities<'a>, config: &'a DevflowConfig) -> Result<Self> {
        config.validate()?;
        let schemas = if config.agent.strict_final_answers {
            Some(AnswerSchemas::load()?)
        } else {
            None
        };
        Ok(Self {
            caps,
            config,
            prompts: PromptEngine::new(),
            schemas,
        })
    }

    fn env(&self) -> AgentEnv<'_> {
        AgentEnv::new(
            self.caps.model,
            &self.prompts,
            AgentLimits::from_config(self.config),
        )
        .with_schemas(self.schemas.as_ref())
    }

    fn documentation(&self) -> Documentation<'_> {
        Documentation::new(
            self.env(),
            self.caps.source_control.clone(),
            self.caps.log_sink.clone(),
            self.config.repo.base_branch.clone(),
        )
    }

    /// Run one cycle for a free-text feature request.
    #[instrument(skip_all, fields(repo = %self.config.repo.name))]
    pub fn run_cycle(&self, request: &str) -> Result<CycleOutcome> {
        if request.trim().is_empty() {
            bail!("feature request is empty");
        }
        let mut cycle = CycleOutcome::new();
        self.drive(request, &mut cycle);
        if let Some(ticket) = cycle.feature_ticket.clone() {
            cycle.recorded_sequence = self.record(&ticket, &cycle);
        }
        Ok(cycle)
    }

    fn drive(&self, request: &str, cycle: &mut CycleOutcome) {
        let repo = &self.config.repo;

        cycle.enter(Stage::GitInit);
        if let Err(err) = self.caps.git.clone_if_absent() {
            return cycle.halt(
                CycleStatus::Failed,
                format!("Git workflow initialization failed: {err:#}"),
            );
        }

        cycle.enter(Stage::Intake);
        let intake = ProductManager::new(self.env()).process_comment(request);
        let parsed = intake
            .is_success()
            .then(|| FeatureTicket::from_payload(&intake.payload));
        let intake_message = intake.message().unwrap_or_default().to_string();
        cycle.reports.intake = Some(intake);
        let ticket = match parsed {
            Some(Ok(ticket)) => ticket,
            Some(Err(err)) => {
                return cycle.halt(CycleStatus::Failed, format!("Invalid feature ticket: {err:#}"));
            }
            None => return cycle.halt(CycleStatus::Failed, intake_message),
        };
        info!(feature_id = %ticket.feature_id, title = %ticket.title, "ticket created");
        cycle.feature_ticket = Some(ticket.clone());

        cycle.enter(Stage::Branch);
        let branch = feature_branch_name(&ticket.feature_id, &ticket.title);
        cycle.branch = Some(branch.clone());
        if let Err(err) = self
            .caps
            .source_control
            .create_branch(&branch, &repo.base_branch)
        {
            return cycle.halt(
                CycleStatus::Failed,
                format!("Failed to create feature branch: {err:#}"),
            );
        }
        if let Err(err) = self.caps.git.checkout_feature_branch(&branch) {
            return cycle.halt(
                CycleStatus::Failed,
                format!("Failed to checkout local branch: {err:#}"),
            );
        }

        cycle.enter(Stage::Build);
        let builder = Builder::new(
            self.env(),
            self.caps.source_control.clone(),
            self.caps.files.clone(),
            self.caps.browser.clone(),
            self.caps.log_sink.clone(),
            repo.local_path.clone(),
        )
        .run(&ticket);
        let built = builder.is_success();
        let changed = builder.get("local_changes_made").and_then(Value::as_bool) == Some(true);
        let builder_message = builder.message().unwrap_or("Builder Agent failed.").to_string();
        cycle.reports.builder = Some(builder);
        if !built {
            return cycle.halt(CycleStatus::Failed, builder_message);
        }
        if !changed {
            return cycle.halt(CycleStatus::NoChanges, "No changes made by Builder Agent.");
        }

        cycle.enter(Stage::Publish);
        let title = format!("feat({}): {}", ticket.feature_id, ticket.title);
        match self.caps.git.publish(&branch, &title) {
            Ok(PublishOutcome::Pushed { commit_message }) => {
                info!(%commit_message, "changes pushed");
            }
            Ok(PublishOutcome::NoChanges) => {
                return cycle.halt(
                    CycleStatus::NoChanges,
                    "Builder Agent reported changes but the worktree is clean.",
                );
            }
            Err(err) => {
                return cycle.halt(
                    CycleStatus::Failed,
                    format!("Git workflow commit/push failed: {err:#}"),
                );
            }
        }
        let body = format!(
            "Implements feature: {}\n\nGenerated by the Builder Agent for feature ticket: {}",
            ticket.description, ticket.feature_id
        );
        let pr = match self.caps.source_control.create_pull_request(
            &title,
            &body,
            &branch,
            &repo.base_branch,
        ) {
            Ok(pr) => pr,
            Err(err) => {
                return cycle.halt(CycleStatus::Failed, format!("Failed to create PR: {err:#}"));
            }
        };
        info!(pr_number = pr.number, url = %pr.url, "pull request ready");
        cycle.pull_request = Some(pr.clone());
        let details = PrDetails {
            id: pr.number,
            title: ticket.title.clone(),
            author: PR_AUTHOR.to_string(),
            url: pr.url.clone(),
        };

        cycle.enter(Stage::DocsAfterPr);
        cycle.reports.docs_after_pr = Some(self.documentation().run_documentation(pr.number, &details));

        cycle.enter(Stage::Evaluate);
        let reviewer = Reviewer::new(
            self.env(),
            self.caps.source_control.clone(),
            self.caps.log_sink.clone(),
            repo.base_branch.clone(),
        )
        .run_review(pr.number, &details);
        let qa = Qa::new(
            self.env(),
            self.caps.deployer.clone(),
            self.caps.browser.clone(),
            self.caps.log_sink.clone(),
        )
        .run_qa(
            &ticket,
            self.config.pipeline.deploy_method,
            &self.config.pipeline.project_path,
        );
        let impact = ImpactAnalyzer::new(
            self.env(),
            self.caps.source_control.clone(),
            self.caps.log_sink.clone(),
        )
        .run_analysis(pr.number, &details, &json!({}));

        let failed: Vec<&str> = [("reviewer", &reviewer), ("qa", &qa), ("impact_analyzer", &impact)]
            .into_iter()
            .filter(|(_, report)| !report.is_success())
            .map(|(name, _)| name)
            .collect();
        let gate = self.config.pipeline.gate_on_failure;
        if gate && !failed.is_empty() {
            let message = format!("Evaluation failed ({}); merge skipped.", failed.join(", "));
            cycle.reports.reviewer = Some(reviewer);
            cycle.reports.qa = Some(qa);
            cycle.reports.impact = Some(impact);
            return cycle.halt(CycleStatus::Gated, message);
        }

        cycle.enter(Stage::MergeDecision);
        let builder_report = cycle.reports.builder.clone().unwrap_or_else(|| {
            AgentReport::failure("builder report missing", serde_json::Map::new())
        });
        let upstream = UpstreamReports {
            builder: &builder_report,
            reviewer: &reviewer,
            qa: &qa,
            impact: &impact,
        };
        let decision = upstream
            .signals(self.config.pipeline.review_approval_min_quality)
            .decision();
        let merge = MergeController::new(
            self.env(),
            self.caps.source_control.clone(),
            self.caps.log_sink.clone(),
            self.config.pipeline.review_approval_min_quality,
        )
        .run_merge_decision(&upstream, &details);
        cycle.merge_decision = Some(decision);
        cycle.reports.reviewer = Some(reviewer);
        cycle.reports.qa = Some(qa);
        cycle.reports.impact = Some(impact);
        let merged = merge.get("merged").and_then(Value::as_bool) == Some(true);
        let merge_message = merge
            .get("merge_message")
            .and_then(Value::as_str)
            .unwrap_or("no merge outcome")
            .to_string();
        cycle.reports.merge_controller = Some(merge);

        if merged || !gate {
            cycle.enter(Stage::DocsAfterMerge);
            cycle.reports.docs_after_merge =
                Some(self.documentation().run_documentation(pr.number, &details));
        } else {
            info!(decision = decision.as_str(), "post-merge documentation skipped");
        }

        match decision {
            MergeDecision::Merged if !merged => cycle.halt(
                CycleStatus::Failed,
                format!(
                    "PR #{} was approved for merge but not merged: {merge_message}",
                    pr.number
                ),
            ),
            _ => cycle.halt(
                CycleStatus::Completed,
                format!("PR #{} {}.", pr.number, decision.as_str()),
            ),
        }
    }

    /// Append the cycle record; returns its sequence number when written.
    fn record(&self, ticket: &FeatureTicket, cycle: &CycleOutcome) -> Option<usize> {
        let sink = self.caps.log_sink.as_ref();
        let sequence = log_sink::count(sink, CYCLES_COLLECTION) + 1;
        let record = CycleRecord {
            feature_ticket_id: &ticket.feature_id,
            outcome: cycle,
            sequence,
            recorded_at: Utc::now().to_rfc3339(),
        };
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(err) => {
                warn!(err = %err, "cycle record could not be encoded");
                return None;
            }
        };
        log_sink::record(sink, CYCLES_COLLECTION, &value).then_some(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        MemoryGit, MemoryLogSink, MemorySourceControl, ScriptedBrowser, ScriptedModel,
    };
    use crate::io::deploy::PreviewDeployer;
    use crate::io::workspace::Workspace;

    const TICKET: &str = r#"<json_output>{"feature_id": "F101", "title": "Dark Mode", "description": "toggle", "priority": "high", "acceptance_criteria": ["toggle"]}</json_output>"#;

    fn caps<'a>(
        model: &'a ScriptedModel,
        git: &'a MemoryGit,
        sc: Arc<MemorySourceControl>,
        sink: Arc<MemoryLogSink>,
        root: &std::path::Path,
    ) -> Capabilities<'a> {
        Capabilities {
            model,
            git,
            source_control: sc,
            browser: Arc::new(ScriptedBrowser::passing()),
            deployer: Arc::new(PreviewDeployer::new("http://localhost:3000")),
            log_sink: sink,
            files: Arc::new(Workspace::new(root)),
        }
    }

    #[test]
    fn empty_request_is_a_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new();
        let git = MemoryGit::default();
        let config = DevflowConfig::default();
        let pipeline = Pipeline::new(
            caps(
                &model,
                &git,
                Arc::new(MemorySourceControl::new()),
                Arc::new(MemoryLogSink::default()),
                temp.path(),
            ),
            &config,
        )
        .expect("pipeline");
        assert!(pipeline.run_cycle("   \n").is_err());
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn clone_failure_stops_before_intake_and_is_not_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new();
        let git = MemoryGit::failing_clone();
        let sink = Arc::new(MemoryLogSink::default());
        let config = DevflowConfig::default();
        let pipeline = Pipeline::new(
            caps(&model, &git, Arc::new(MemorySourceControl::new()), sink.clone(), temp.path()),
            &config,
        )
        .expect("pipeline");

        let outcome = pipeline.run_cycle("add dark mode").expect("cycle");

        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.stage, Stage::GitInit);
        assert_eq!(model.calls(), 0);
        assert!(sink.records(CYCLES_COLLECTION).is_empty());
    }

    #[test]
    fn builder_without_changes_ends_cycle_and_records_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new();
        model.push_text(TICKET);
        model.push_text(
            r#"<final_answer>{"status": "success", "message": "nothing to do", "local_changes_made": false}</final_answer>"#,
        );
        let git = MemoryGit::default();
        let sc = Arc::new(MemorySourceControl::new());
        let sink = Arc::new(MemoryLogSink::default());
        let config = DevflowConfig::default();
        let pipeline = Pipeline::new(caps(&model, &git, sc.clone(), sink.clone(), temp.path()), &config)
            .expect("pipeline");

        let outcome = pipeline.run_cycle("add dark mode").expect("cycle");

        assert_eq!(outcome.status, CycleStatus::NoChanges);
        assert_eq!(outcome.branch.as_deref(), Some("feature-F101-dark-mode"));
        assert!(sc.branch_exists("feature-F101-dark-mode"));
        assert_eq!(git.checkouts(), vec!["feature-F101-dark-mode".to_string()]);
        assert!(git.published().is_empty());
        let records = sink.records(CYCLES_COLLECTION);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["status"], "no_changes");
        assert_eq!(records[0]["sequence"], 1);
        assert_eq!(records[0]["feature_ticket_id"], "F101");
        assert_eq!(outcome.recorded_sequence, Some(1));
    }
}

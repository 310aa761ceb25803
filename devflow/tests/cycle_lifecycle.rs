//! Cycle-level tests driving `Pipeline::run_cycle` end to end.
//!
//! Every capability is an in-memory fake; the model is scripted with one
//! response per agent round, in pipeline order:
//!
//! ```text
//! intake -> builder (tool, answer) -> docs -> reviewer -> qa -> impact
//!        -> merge controller (tool, answer) -> docs
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use devflow::core::scoring::MergeDecision;
use devflow::io::config::DevflowConfig;
use devflow::io::deploy::PreviewDeployer;
use devflow::io::model::{Model, ModelError};
use devflow::io::retry::RetryingModel;
use devflow::io::source_control::SourceControl;
use devflow::io::workspace::Workspace;
use devflow::pipeline::{CYCLES_COLLECTION, Capabilities, CycleStatus, Pipeline, Stage};
use devflow::test_support::{
    MemoryGit, MemoryLogSink, MemorySourceControl, NoSleep, ScriptedBrowser, ScriptedModel,
};

const BRANCH: &str = "feature-F101-implement-light-dark-mode-toggle";

const INTAKE: &str = r#"<json_output>{"feature_id": "F101", "title": "Implement Light/Dark Mode Toggle", "description": "Let users switch themes.", "priority": "high", "acceptance_criteria": ["Toggle visible in navbar"]}</json_output>"#;
const BUILDER_WRITE: &str = r#"<tool_code>{"tool_name": "LocalFile_Write", "parameters": {"file_path": "src/theme.js", "content": "export const dark = true;\n"}}</tool_code>"#;
const BUILDER_DONE: &str = r#"<final_answer>{"status": "success", "message": "toggle implemented", "local_changes_made": true}</final_answer>"#;
const DOCS_DONE: &str = r#"<final_answer>{"pr_number": 1, "updated_files": [], "summary_of_changes": "nothing to document"}</final_answer>"#;
const REVIEW_DONE: &str = r#"<final_answer>{"pr_number": 1, "review_summary": "small and focused", "suggestions": [], "code_quality_score": 9, "complexity_score": 2, "test_logic_validation": "toggle covered"}</final_answer>"#;
const QA_DONE: &str = r#"<final_answer>{"feature_ticket_id": "F101", "deploy_url": "http://localhost:3000", "test_actions": [], "screenshots": [], "browser_logs": [], "ui_bugs_detected": false, "qa_summary": "clean"}</final_answer>"#;
const IMPACT_DONE: &str = r#"<final_answer>{"pr_number": 1, "files_changed": ["src/theme.js"], "tests_affected": [], "historical_failure_rate": 0.0, "estimated_risk_score": 0}</final_answer>"#;
const MERGE_CALL: &str = r#"<tool_code>{"tool_name": "SourceControl_MergePR", "parameters": {"pr_number": 1}}</tool_code>"#;
const MERGE_DONE: &str = r#"<final_answer>{"pr_number": 1, "confidence_score": 0.9, "merge_decision": "merged", "reason": "all green", "explainable_merge_log": "tests, review and qa passed"}</final_answer>"#;

fn caps<'a>(
    model: &'a dyn Model,
    git: &'a MemoryGit,
    sc: Arc<MemorySourceControl>,
    sink: Arc<MemoryLogSink>,
    root: &Path,
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

fn host_with_diff() -> Arc<MemorySourceControl> {
    let sc = Arc::new(MemorySourceControl::new());
    sc.seed_file("main", "README.md", "# app\n");
    sc.set_diff(1, "+export const dark = true;\n");
    sc
}

/// Happy path: ticket, build, PR, evaluation, merge, post-merge docs.
#[test]
fn full_cycle_merges_and_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new();
    for text in [
        INTAKE,
        BUILDER_WRITE,
        BUILDER_DONE,
        DOCS_DONE,
        REVIEW_DONE,
        QA_DONE,
        IMPACT_DONE,
        MERGE_CALL,
        MERGE_DONE,
        DOCS_DONE,
    ] {
        model.push_text(text);
    }
    let git = MemoryGit::default();
    let sc = host_with_diff();
    let sink = Arc::new(MemoryLogSink::default());
    let config = DevflowConfig::default();
    let pipeline = Pipeline::new(caps(&model, &git, sc.clone(), sink.clone(), temp.path()), &config)
        .expect("pipeline");

    let outcome = pipeline
        .run_cycle("I want a dark mode toggle in the navbar.")
        .expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Completed, "{}", outcome.message);
    assert_eq!(outcome.stage, Stage::DocsAfterMerge);
    assert_eq!(outcome.message, "PR #1 merged.");
    assert_eq!(outcome.merge_decision, Some(MergeDecision::Merged));
    assert_eq!(outcome.branch.as_deref(), Some(BRANCH));
    assert_eq!(model.remaining(), 0);

    assert_eq!(
        fs::read_to_string(temp.path().join("src/theme.js")).expect("read"),
        "export const dark = true;\n"
    );
    assert_eq!(git.checkouts(), vec![BRANCH.to_string()]);
    assert_eq!(
        git.published(),
        vec![(
            BRANCH.to_string(),
            "feat(F101): Implement Light/Dark Mode Toggle".to_string()
        )]
    );
    assert_eq!(sc.created_pull_requests(), 1);
    assert_eq!(sc.merged().len(), 1);
    assert_eq!(sc.merged()[0].0, 1);

    let merge = outcome.reports.merge_controller.as_ref().expect("merge report");
    assert!(merge.is_success());
    assert_eq!(merge.get("merge_decision"), Some(&json!("merged")));
    assert_eq!(merge.get("merged"), Some(&json!(true)));
    assert!(outcome.reports.docs_after_merge.is_some());

    let records = sink.records(CYCLES_COLLECTION);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "completed");
    assert_eq!(records[0]["feature_ticket_id"], "F101");
    assert_eq!(records[0]["sequence"], 1);
    assert_eq!(outcome.recorded_sequence, Some(1));
}

/// A failed evaluation agent gates the merge decision and post-merge docs.
#[test]
fn failed_review_gates_the_merge() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new();
    model.push_text(INTAKE);
    model.push_text(BUILDER_WRITE);
    model.push_text(BUILDER_DONE);
    model.push_text(DOCS_DONE);
    model.push_error(ModelError::Api {
        status: 500,
        message: "internal error".to_string(),
    });
    model.push_text(QA_DONE);
    model.push_text(IMPACT_DONE);
    let git = MemoryGit::default();
    let sc = host_with_diff();
    let sink = Arc::new(MemoryLogSink::default());
    let config = DevflowConfig::default();
    let pipeline = Pipeline::new(caps(&model, &git, sc.clone(), sink.clone(), temp.path()), &config)
        .expect("pipeline");

    let outcome = pipeline.run_cycle("dark mode please").expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Gated);
    assert!(outcome.status.is_failure());
    assert_eq!(outcome.stage, Stage::Evaluate);
    assert!(outcome.message.contains("reviewer"), "{}", outcome.message);
    assert_eq!(outcome.merge_decision, None);
    assert!(outcome.reports.merge_controller.is_none());
    assert!(outcome.reports.docs_after_merge.is_none());
    assert!(outcome.reports.qa.as_ref().is_some_and(|r| r.is_success()));
    assert!(sc.merged().is_empty());
    assert_eq!(model.remaining(), 0);
    assert_eq!(sink.records(CYCLES_COLLECTION)[0]["status"], "gated");
}

fn script(model: &ScriptedModel, texts: &[&str]) {
    for text in texts {
        model.push_text(text);
    }
}

/// A merge decision is carried out even when the model never calls the
/// merge tool. Fixtures also satisfy the strict answer schemas.
#[test]
fn merge_happens_when_the_model_skips_the_merge_tool() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new();
    script(
        &model,
        &[
            INTAKE,
            BUILDER_WRITE,
            BUILDER_DONE,
            DOCS_DONE,
            REVIEW_DONE,
            QA_DONE,
            IMPACT_DONE,
            MERGE_DONE,
            DOCS_DONE,
        ],
    );
    let git = MemoryGit::default();
    let sc = host_with_diff();
    let sink = Arc::new(MemoryLogSink::default());
    let mut config = DevflowConfig::default();
    config.agent.strict_final_answers = true;
    let pipeline = Pipeline::new(caps(&model, &git, sc.clone(), sink, temp.path()), &config)
        .expect("pipeline");

    let outcome = pipeline.run_cycle("dark mode").expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Completed, "{}", outcome.message);
    assert_eq!(outcome.message, "PR #1 merged.");
    assert_eq!(sc.merged(), vec![(1, "Merge pull request #1".to_string())]);
    assert!(outcome.reports.docs_after_merge.is_some());
    assert_eq!(model.remaining(), 0);
}

/// A host that declines the merge fails the cycle and skips post-merge docs.
#[test]
fn declined_merge_fails_the_cycle() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new();
    script(
        &model,
        &[
            INTAKE,
            BUILDER_WRITE,
            BUILDER_DONE,
            DOCS_DONE,
            REVIEW_DONE,
            QA_DONE,
            IMPACT_DONE,
            MERGE_CALL,
            MERGE_DONE,
        ],
    );
    let git = MemoryGit::default();
    let sc = host_with_diff();
    sc.refuse_merges();
    let sink = Arc::new(MemoryLogSink::default());
    let config = DevflowConfig::default();
    let pipeline = Pipeline::new(caps(&model, &git, sc.clone(), sink.clone(), temp.path()), &config)
        .expect("pipeline");

    let outcome = pipeline.run_cycle("dark mode").expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Failed);
    assert_eq!(outcome.stage, Stage::MergeDecision);
    assert!(
        outcome.message.contains("approved for merge but not merged"),
        "{}",
        outcome.message
    );
    assert_eq!(outcome.merge_decision, Some(MergeDecision::Merged));
    assert!(outcome.reports.docs_after_merge.is_none());
    assert!(sc.merged().is_empty());
    assert_eq!(model.remaining(), 0);
    assert_eq!(sink.records(CYCLES_COLLECTION)[0]["status"], "failed");
}

/// Without gating every stage runs: a failed review still reaches the merge
/// decision, and post-merge docs run after a rejection.
#[test]
fn ungated_cycle_runs_every_stage_after_a_failed_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new();
    script(&model, &[INTAKE, BUILDER_WRITE, BUILDER_DONE, DOCS_DONE]);
    model.push_error(ModelError::Api {
        status: 500,
        message: "internal error".to_string(),
    });
    script(
        &model,
        &[
            QA_DONE,
            IMPACT_DONE,
            r#"<final_answer>{"pr_number": 1, "confidence_score": 0.6, "merge_decision": "rejected", "reason": "review missing", "explainable_merge_log": "no approval"}</final_answer>"#,
            DOCS_DONE,
        ],
    );
    let git = MemoryGit::default();
    let sc = host_with_diff();
    let sink = Arc::new(MemoryLogSink::default());
    let mut config = DevflowConfig::default();
    config.pipeline.gate_on_failure = false;
    let pipeline = Pipeline::new(caps(&model, &git, sc.clone(), sink, temp.path()), &config)
        .expect("pipeline");

    let outcome = pipeline.run_cycle("dark mode").expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Completed, "{}", outcome.message);
    assert_eq!(outcome.stage, Stage::DocsAfterMerge);
    assert_eq!(outcome.message, "PR #1 rejected.");
    assert_eq!(outcome.merge_decision, Some(MergeDecision::Rejected));
    assert!(outcome.reports.reviewer.as_ref().is_some_and(|r| !r.is_success()));
    let merge = outcome.reports.merge_controller.as_ref().expect("merge report");
    assert_eq!(merge.get("merged"), Some(&json!(false)));
    assert!(outcome.reports.docs_after_merge.is_some());
    assert!(sc.merged().is_empty());
    assert_eq!(model.remaining(), 0);
}

/// Rate limits are retried a bounded number of times, then intake fails.
#[test]
fn rate_limited_model_exhausts_retries_and_fails_intake() {
    let temp = tempfile::tempdir().expect("tempdir");
    let inner = ScriptedModel::always_rate_limited();
    let sleeper = NoSleep::default();
    let config = DevflowConfig::default();
    let model = RetryingModel::with_sleeper(&inner, config.retry.policy(), Box::new(sleeper.clone()));
    let git = MemoryGit::default();
    let sink = Arc::new(MemoryLogSink::default());
    let pipeline = Pipeline::new(
        caps(&model, &git, host_with_diff(), sink.clone(), temp.path()),
        &config,
    )
    .expect("pipeline");

    let outcome = pipeline.run_cycle("dark mode").expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Failed);
    assert_eq!(outcome.stage, Stage::Intake);
    assert!(outcome.message.contains("quota exhaustion"), "{}", outcome.message);
    assert_eq!(inner.calls(), 3);
    assert_eq!(sleeper.recorded().len(), 2);
    assert!(outcome.feature_ticket.is_none());
    assert!(sink.records(CYCLES_COLLECTION).is_empty());
}

/// An unreachable log sink never stops a cycle; the agent sees a tool error.
#[test]
fn unavailable_log_sink_is_not_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new();
    model.push_text(INTAKE);
    model.push_text(
        r#"<tool_code>{"tool_name": "LogSink_InsertLog", "parameters": {"collection_name": "agent_logs", "log_entry": {"step": "start"}}}</tool_code>"#,
    );
    model.push_text(
        r#"<final_answer>{"status": "success", "message": "already done", "local_changes_made": false}</final_answer>"#,
    );
    let git = MemoryGit::default();
    let sink = Arc::new(MemoryLogSink::unavailable());
    let config = DevflowConfig::default();
    let pipeline = Pipeline::new(
        caps(&model, &git, host_with_diff(), sink, temp.path()),
        &config,
    )
    .expect("pipeline");

    let outcome = pipeline.run_cycle("dark mode").expect("cycle");

    assert_eq!(outcome.status, CycleStatus::NoChanges);
    assert_eq!(outcome.recorded_sequence, None);
    let prompts = model.prompts();
    assert!(
        prompts[2].contains("Tool Error for LogSink_InsertLog:"),
        "{}",
        prompts[2]
    );
}

/// A second cycle for the same ticket reuses the branch and the open PR.
#[test]
fn rerun_reuses_branch_and_pull_request() {
    let temp = tempfile::tempdir().expect("tempdir");
    let sc = host_with_diff();
    let sink = Arc::new(MemoryLogSink::default());
    let config = DevflowConfig::default();

    for _ in 0..2 {
        let model = ScriptedModel::new();
        for text in [
            INTAKE,
            BUILDER_WRITE,
            BUILDER_DONE,
            DOCS_DONE,
            REVIEW_DONE,
            QA_DONE,
        ] {
            model.push_text(text);
        }
        // Impact reports maximal risk, so the merge is rejected.
        model.push_text(
            r#"<final_answer>{"pr_number": 1, "files_changed": ["src/theme.js"], "tests_affected": ["ui"], "historical_failure_rate": 0.4, "estimated_risk_score": 10}</final_answer>"#,
        );
        model.push_text(
            r#"<final_answer>{"pr_number": 1, "confidence_score": 0.6, "merge_decision": "rejected", "reason": "risky", "explainable_merge_log": "risk too high"}</final_answer>"#,
        );
        let git = MemoryGit::default();
        let pipeline =
            Pipeline::new(caps(&model, &git, sc.clone(), sink.clone(), temp.path()), &config)
                .expect("pipeline");

        let outcome = pipeline.run_cycle("dark mode").expect("cycle");

        assert_eq!(outcome.status, CycleStatus::Completed);
        assert_eq!(outcome.message, "PR #1 rejected.");
        assert_eq!(outcome.pull_request.as_ref().map(|pr| pr.number), Some(1));
    }

    assert_eq!(sc.created_pull_requests(), 1);
    assert!(sc.merged().is_empty());
    let again = sc
        .create_pull_request("t", "b", BRANCH, "main")
        .expect("reuse");
    assert_eq!(again.number, 1);
    let sequences: Vec<_> = sink
        .records(CYCLES_COLLECTION)
        .iter()
        .map(|record| record["sequence"].clone())
        .collect();
    assert_eq!(sequences, vec![json!(1), json!(2)]);
}

//! Confidence & merge controller.
//!
//! The decision is computed here, not by the model: signals are derived from
//! the upstream reports, the confidence formula decides, and the merge tool
//! is only offered when the decision is merge. The model explains the
//! decision and performs it; the computed `confidence_score` and
//! `merge_decision` always replace whatever it reports.
//!
//! `merged` reports what the host actually did. A merge decision the model
//! did not act on is carried out directly.

use std::sync::Arc;

use anyhow::Result;
use minijinja::context;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use super::{AgentEnv, into_report, setup_failure};
use crate::core::scoring::{MERGE_THRESHOLD, MergeDecision, MergeSignals};
use crate::core::types::{AgentKind, AgentReport, PrDetails, object};
use crate::io::log_sink::LogSink;
use crate::io::source_control::{MergeOutcome, SourceControl};
use crate::tools::ToolRegistry;
use crate::tools::log_sink::InsertLog;
use crate::tools::source_control::{MergeLog, MergePr};

const KIND: AgentKind = AgentKind::MergeController;

/// Reports the decision is derived from.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamReports<'r> {
    pub builder: &'r AgentReport,
    pub reviewer: &'r AgentReport,
    pub qa: &'r AgentReport,
    pub impact: &'r AgentReport,
}

impl UpstreamReports<'_> {
    pub fn signals(&self, min_quality: f64) -> MergeSignals {
        MergeSignals::from_reports(self.builder, self.reviewer, self.qa, self.impact, min_quality)
    }
}

pub struct MergeController<'a> {
    env: AgentEnv<'a>,
    source_control: Arc<dyn SourceControl>,
    log_sink: Arc<dyn LogSink>,
    min_quality: f64,
}

impl<'a> MergeController<'a> {
    pub fn new(
        env: AgentEnv<'a>,
        source_control: Arc<dyn SourceControl>,
        log_sink: Arc<dyn LogSink>,
        min_quality: f64,
    ) -> Self {
        Self {
            env,
            source_control,
            log_sink,
            min_quality,
        }
    }

    fn tools(&self, decision: MergeDecision, merges: &MergeLog) -> Result<ToolRegistry> {
        let mut tools = self.env.registry();
        if decision == MergeDecision::Merged {
            tools = tools.with(Arc::new(MergePr::with_log(
                self.source_control.clone(),
                merges.clone(),
            )))?;
        }
        tools.with(Arc::new(InsertLog::new(self.log_sink.clone())))
    }

    /// Success payload: `pr_number, confidence_score, merge_decision, reason,
    /// explainable_merge_log, merged`. Failure reports still carry the computed
    /// score, decision and `merged`.
    #[instrument(skip_all, fields(pr_number = pr_details.id))]
    pub fn run_merge_decision(
        &self,
        upstream: &UpstreamReports<'_>,
        pr_details: &PrDetails,
    ) -> AgentReport {
        let signals = upstream.signals(self.min_quality);
        let confidence = signals.confidence();
        let decision = signals.decision();
        info!(confidence, decision = decision.as_str(), ?signals, "merge decision computed");

        let merges = MergeLog::default();
        let defaults = || decision_fields(pr_details.id, confidence, decision);
        let prepared = self.tools(decision, &merges).and_then(|tools| {
            let prompt = self.env.prompts.render(
                KIND,
                context! {
                    tools => tools.listing(),
                    test_results => pretty(upstream.builder),
                    review_feedback => pretty(upstream.reviewer),
                    qa_report => pretty(upstream.qa),
                    risk_score => signals.risk_score,
                    pr_details => pr_details.to_pretty_json(),
                    threshold => MERGE_THRESHOLD,
                    confidence => confidence,
                    decision => decision.as_str(),
                    can_merge => decision == MergeDecision::Merged,
                    pr_number => pr_details.id,
                },
            )?;
            Ok((tools, prompt))
        });
        let (tools, prompt) = match prepared {
            Ok(pair) => pair,
            Err(err) => {
                let mut report = setup_failure(KIND, &err, defaults());
                report.payload.extend(self.settle(pr_details.id, decision, &merges));
                return report;
            }
        };

        let mut report = into_report(
            KIND,
            self.env.run_tool_loop(KIND, &tools, prompt),
            |failure| {
                let mut fields = defaults();
                fields.insert("raw_response".to_string(), json!(failure.raw_response()));
                fields
            },
        );
        report.payload.extend(decision_fields(pr_details.id, confidence, decision));
        report.payload.extend(self.settle(pr_details.id, decision, &merges));
        report
    }

    /// Make the host state match `decision`; returns the `merged` fields.
    fn settle(
        &self,
        pr_number: u64,
        decision: MergeDecision,
        merges: &MergeLog,
    ) -> Map<String, Value> {
        if decision != MergeDecision::Merged {
            return object([("merged", json!(false))]);
        }
        let outcome = match merges.last_for(pr_number) {
            Some(outcome) => outcome,
            None => self.merge_directly(pr_number),
        };
        if !outcome.merged {
            warn!(pr_number, message = %outcome.message, "merge decided but not performed");
        }
        object([
            ("merged", json!(outcome.merged)),
            ("merge_message", json!(outcome.message)),
        ])
    }

    fn merge_directly(&self, pr_number: u64) -> MergeOutcome {
        info!(pr_number, "merge tool not used; merging directly");
        let title = format!("Merge pull request #{pr_number}");
        match self.source_control.merge_pull_request(pr_number, &title) {
            Ok(outcome) => outcome,
            Err(err) => MergeOutcome {
                merged: false,
                sha: None,
                message: format!("{err:#}"),
            },
        }
    }
}

fn decision_fields(pr_number: u64, confidence: f64, decision: MergeDecision) -> Map<String, Value> {
    object([
        ("pr_number", json!(pr_number)),
        ("confidence_score", json!(confidence)),
        ("merge_decision", json!(decision.as_str())),
    ])
}

fn pretty(report: &AgentReport) -> String {
    serde_json::to_string_pretty(&report.to_value()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentLimits;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{MemoryLogSink, MemorySourceControl, ScriptedModel, sample_pr};

    fn reports(quality: i64, risk: f64) -> [AgentReport; 4] {
        [
            AgentReport::success(object([("status", json!("success"))])),
            AgentReport::success(object([("code_quality_score", json!(quality))])),
            AgentReport::success(object([("ui_bugs_detected", json!(false))])),
            AgentReport::success(object([("estimated_risk_score", json!(risk))])),
        ]
    }

    fn upstream(r: &[AgentReport; 4]) -> UpstreamReports<'_> {
        UpstreamReports {
            builder: &r[0],
            reviewer: &r[1],
            qa: &r[2],
            impact: &r[3],
        }
    }

    #[test]
    fn merges_when_confident_and_overrides_model_numbers() {
        let sc = Arc::new(MemorySourceControl::new());
        let model = ScriptedModel::new();
        model.push_text(
            r#"<tool_code>{"tool_name": "SourceControl_MergePR", "parameters": {"pr_number": 3}}</tool_code>"#,
        );
        model.push_text(
            r#"<final_answer>{"pr_number": 3, "confidence_score": 0.1, "merge_decision": "rejected", "reason": "r", "explainable_merge_log": "l"}</final_answer>"#,
        );
        let prompts = PromptEngine::new();
        let env = AgentEnv::new(&model, &prompts, AgentLimits::default());
        let r = reports(9, 0.0);

        let report = MergeController::new(env, sc.clone(), Arc::new(MemoryLogSink::default()), 7.0)
            .run_merge_decision(&upstream(&r), &sample_pr(3));

        assert!(report.is_success());
        assert_eq!(report.get("merge_decision"), Some(&json!("merged")));
        let confidence = report
            .get("confidence_score")
            .and_then(Value::as_f64)
            .expect("confidence");
        assert!((confidence - 0.9).abs() < 1e-9);
        assert_eq!(sc.merged(), vec![(3, "Merge pull request #3".to_string())]);
        assert_eq!(report.get("merged"), Some(&json!(true)));
        assert!(model.prompts()[0].contains("- SourceControl_MergePR:"));
    }

    #[test]
    fn merge_decision_is_carried_out_when_the_model_skips_the_tool() {
        let sc = Arc::new(MemorySourceControl::new());
        let model = ScriptedModel::new();
        model.push_text(
            r#"<final_answer>{"pr_number": 3, "confidence_score": 0.9, "merge_decision": "merged", "reason": "r", "explainable_merge_log": "l"}</final_answer>"#,
        );
        let prompts = PromptEngine::new();
        let env = AgentEnv::new(&model, &prompts, AgentLimits::default());
        let r = reports(9, 0.0);

        let report = MergeController::new(env, sc.clone(), Arc::new(MemoryLogSink::default()), 7.0)
            .run_merge_decision(&upstream(&r), &sample_pr(3));

        assert!(report.is_success());
        assert_eq!(sc.merged(), vec![(3, "Merge pull request #3".to_string())]);
        assert_eq!(report.get("merged"), Some(&json!(true)));
    }

    #[test]
    fn refused_merge_is_reported_as_not_merged() {
        let sc = Arc::new(MemorySourceControl::new());
        sc.refuse_merges();
        let model = ScriptedModel::new();
        model.push_text(
            r#"<tool_code>{"tool_name": "SourceControl_MergePR", "parameters": {"pr_number": 3}}</tool_code>"#,
        );
        model.push_text(
            r#"<final_answer>{"pr_number": 3, "confidence_score": 0.9, "merge_decision": "merged", "reason": "r", "explainable_merge_log": "l"}</final_answer>"#,
        );
        let prompts = PromptEngine::new();
        let env = AgentEnv::new(&model, &prompts, AgentLimits::default());
        let r = reports(9, 0.0);

        let report = MergeController::new(env, sc.clone(), Arc::new(MemoryLogSink::default()), 7.0)
            .run_merge_decision(&upstream(&r), &sample_pr(3));

        assert!(sc.merged().is_empty());
        assert_eq!(report.get("merge_decision"), Some(&json!("merged")));
        assert_eq!(report.get("merged"), Some(&json!(false)));
        assert_eq!(
            report.get("merge_message"),
            Some(&json!("Pull Request is not mergeable"))
        );
    }

    #[test]
    fn rejection_withholds_the_merge_tool() {
        let sc = Arc::new(MemorySourceControl::new());
        let model = ScriptedModel::new();
        model.push_text(
            r#"<tool_code>{"tool_name": "SourceControl_MergePR", "parameters": {"pr_number": 3}}</tool_code>"#,
        );
        let prompts = PromptEngine::new();
        let env = AgentEnv {
            limits: AgentLimits {
                max_iterations: 1,
                ..AgentLimits::default()
            },
            ..AgentEnv::new(&model, &prompts, AgentLimits::default())
        };
        let r = reports(9, 10.0);

        let report = MergeController::new(env, sc.clone(), Arc::new(MemoryLogSink::default()), 7.0)
            .run_merge_decision(&upstream(&r), &sample_pr(3));

        assert!(!report.is_success());
        assert!(sc.merged().is_empty());
        assert_eq!(report.get("merge_decision"), Some(&json!("rejected")));
        assert_eq!(report.get("merged"), Some(&json!(false)));
        assert!(!model.prompts()[0].contains("- SourceControl_MergePR:"));
    }
}

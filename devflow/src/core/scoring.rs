//! Confidence scoring that gates automatic merges.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::AgentReport;

/// Merge only when confidence is strictly above this value.
pub const MERGE_THRESHOLD: f64 = 0.85;

const TESTS_WEIGHT: f64 = 0.4;
const REVIEW_WEIGHT: f64 = 0.3;
const QA_WEIGHT: f64 = 0.2;
const RISK_WEIGHT: f64 = 0.3;
const MAX_RISK: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeDecision {
    Merged,
    Rejected,
}

impl MergeDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeDecision::Merged => "merged",
            MergeDecision::Rejected => "rejected",
        }
    }
}

/// Inputs to the confidence formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeSignals {
    pub tests_pass: bool,
    pub review_approved: bool,
    pub qa_pass: bool,
    /// Estimated risk in `[0, 10]`.
    pub risk_score: f64,
}

impl MergeSignals {
    /// `0.4·tests + 0.3·review + 0.2·qa − 0.3·(risk/10)`, in `[-0.3, 0.9]`.
    pub fn confidence(&self) -> f64 {
        confidence(
            indicator(self.tests_pass),
            indicator(self.review_approved),
            indicator(self.qa_pass),
            self.risk_score,
        )
    }

    pub fn decision(&self) -> MergeDecision {
        decide(self.confidence())
    }

    /// Derive signals from the upstream agent reports.
    ///
    /// Review counts as approved when the reviewer succeeded with a
    /// `code_quality_score` of at least `min_quality`. Missing or unparsable
    /// risk is treated as maximal.
    pub fn from_reports(
        builder: &AgentReport,
        reviewer: &AgentReport,
        qa: &AgentReport,
        impact: &AgentReport,
        min_quality: f64,
    ) -> Self {
        let review_approved = reviewer.is_success()
            && reviewer
                .get("code_quality_score")
                .and_then(number_from)
                .is_some_and(|score| score >= min_quality);
        let qa_pass = qa.is_success()
            && qa.get("ui_bugs_detected").and_then(bool_from) == Some(false);
        let risk_score = if impact.is_success() {
            impact
                .get("estimated_risk_score")
                .and_then(number_from)
                .map(|risk| risk.clamp(0.0, MAX_RISK))
                .unwrap_or(MAX_RISK)
        } else {
            MAX_RISK
        };
        Self {
            tests_pass: builder.is_success(),
            review_approved,
            qa_pass,
            risk_score,
        }
    }
}

pub fn confidence(tests_pass: f64, review_score: f64, qa_pass: f64, risk_score: f64) -> f64 {
    TESTS_WEIGHT * tests_pass + REVIEW_WEIGHT * review_score + QA_WEIGHT * qa_pass
        - RISK_WEIGHT * (risk_score / MAX_RISK)
}

pub fn decide(confidence: f64) -> MergeDecision {
    if confidence > MERGE_THRESHOLD {
        MergeDecision::Merged
    } else {
        MergeDecision::Rejected
    }
}

/// Size heuristic for diff risk: ten points per hundred lines, capped at 10.
pub fn diff_risk_score(diff: &str) -> f64 {
    (diff.lines().count() as f64 / 100.0 * 10.0).min(MAX_RISK)
}

fn indicator(flag: bool) -> f64 {
    if flag { 1.0 } else { 0.0 }
}

/// Accept JSON numbers and numeric strings (models emit both).
pub fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn bool_from(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

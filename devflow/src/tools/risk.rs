use anyhow::Result;
use serde_json::{Map, Value, json};

use super::{ANALYZE_DIFF, Tool, required_str};
use crate::core::scoring::diff_risk_score;

/// Heuristic diff risk. `repo_vector_memory` is accepted and ignored.
pub struct RiskAnalyzer;

impl Tool for RiskAnalyzer {
    fn name(&self) -> &str {
        ANALYZE_DIFF
    }

    fn describe(&self) -> &str {
        "Analyzes a diff and returns an estimated risk score from 0 to 10. Input: commit_diff (str), repo_vector_memory (dict, optional)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let diff = required_str(params, "commit_diff")?;
        Ok(json!({"estimated_risk_score": diff_risk_score(diff)}))
    }
}

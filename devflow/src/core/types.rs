//! Shared deterministic types for the agent pipeline.
//!
//! These types define the contracts between agents and the orchestrator. They
//! carry no I/O and serialize to stable JSON so cycle records stay comparable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// The seven agent roles in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ProductManager,
    Builder,
    Reviewer,
    Qa,
    ImpactAnalyzer,
    MergeController,
    Documentation,
}

impl AgentKind {
    pub const ALL: [AgentKind; 7] = [
        AgentKind::ProductManager,
        AgentKind::Builder,
        AgentKind::Reviewer,
        AgentKind::Qa,
        AgentKind::ImpactAnalyzer,
        AgentKind::MergeController,
        AgentKind::Documentation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::ProductManager => "product_manager",
            AgentKind::Builder => "builder",
            AgentKind::Reviewer => "reviewer",
            AgentKind::Qa => "qa",
            AgentKind::ImpactAnalyzer => "impact_analyzer",
            AgentKind::MergeController => "merge_controller",
            AgentKind::Documentation => "documentation",
        }
    }
}

/// Feature priority as assigned during intake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Structured feature request produced once per cycle by the intake agent.
///
/// Read-only for every downstream agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTicket {
    pub feature_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl FeatureTicket {
    /// Decode a ticket from an intake answer payload.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self> {
        let ticket: FeatureTicket = serde_json::from_value(Value::Object(payload.clone()))
            .context("decode feature ticket")?;
        if ticket.feature_id.trim().is_empty() {
            anyhow::bail!("feature ticket has an empty feature_id");
        }
        if ticket.title.trim().is_empty() {
            anyhow::bail!("feature ticket has an empty title");
        }
        Ok(ticket)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// A pull request reference returned by the source-control host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
}

/// PR metadata handed to the post-build agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrDetails {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub url: String,
}

impl PrDetails {
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Outcome of a single agent entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failure,
}

/// Result value returned by every agent entry point.
///
/// A success report carries the model's final answer verbatim. A failure
/// report carries a diagnostic message plus the agent's empty defaults, so
/// downstream consumers always see the same key set.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub status: ReportStatus,
    pub message: Option<String>,
    pub payload: Map<String, Value>,
}

impl AgentReport {
    pub fn success(payload: Map<String, Value>) -> Self {
        Self {
            status: ReportStatus::Success,
            message: None,
            payload,
        }
    }

    pub fn failure(message: impl Into<String>, defaults: Map<String, Value>) -> Self {
        Self {
            status: ReportStatus::Failure,
            message: Some(message.into()),
            payload: defaults,
        }
    }

    /// True when the loop produced an answer and the answer does not itself
    /// declare `"status": "failure"` (the builder reports its own status).
    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
            && self.payload.get("status").and_then(Value::as_str) != Some("failure")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Best available diagnostic: the failure message, or the answer's own `message`.
    pub fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| self.payload.get("message").and_then(Value::as_str))
    }

    /// Flat JSON view: success answers as-is, failures as
    /// `{status: "failure", message, ...defaults}`.
    pub fn to_value(&self) -> Value {
        match self.status {
            ReportStatus::Success => Value::Object(self.payload.clone()),
            ReportStatus::Failure => {
                let mut out = Map::new();
                out.insert("status".to_string(), Value::from("failure"));
                out.insert(
                    "message".to_string(),
                    Value::from(self.message.clone().unwrap_or_default()),
                );
                for (key, value) in &self.payload {
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
                Value::Object(out)
            }
        }
    }
}

impl Serialize for AgentReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Build a JSON object from `(key, value)` pairs.
pub fn object<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

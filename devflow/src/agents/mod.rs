//! The seven pipeline agents and the loop they share.
//!
//! Each agent is a thin configuration of [`agent_loop::AgentLoop`]: a prompt
//! template, a tool subset built fresh per run, and the defaults its failure
//! reports carry.

use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::core::types::{AgentKind, AgentReport, object};
use crate::io::config::DevflowConfig;
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;
use crate::io::schema::AnswerSchemas;
use crate::tools::ToolRegistry;

use self::agent_loop::{AgentLoop, LoopFailure, LoopOutcome, LoopSettings};

pub mod agent_loop;
pub mod builder;
pub mod documentation;
pub mod impact;
pub mod merge_controller;
pub mod product_manager;
pub mod qa;
pub mod reviewer;

/// Iteration, temperature and timeout limits for agent runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentLimits {
    pub max_iterations: u32,
    pub intake_max_iterations: u32,
    pub temperature: f32,
    pub intake_temperature: f32,
    pub tool_timeout: Duration,
}

impl AgentLimits {
    pub fn from_config(cfg: &DevflowConfig) -> Self {
        Self {
            max_iterations: cfg.agent.max_iterations,
            intake_max_iterations: cfg.agent.intake_max_iterations,
            temperature: cfg.model.temperature,
            intake_temperature: cfg.model.intake_temperature,
            tool_timeout: cfg.tool_timeout(),
        }
    }
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self::from_config(&DevflowConfig::default())
    }
}

/// What every agent needs besides its own capabilities.
#[derive(Clone, Copy)]
pub struct AgentEnv<'a> {
    pub model: &'a dyn Model,
    pub prompts: &'a PromptEngine,
    /// Present when final answers are checked strictly.
    pub schemas: Option<&'a AnswerSchemas>,
    pub limits: AgentLimits,
}

impl<'a> AgentEnv<'a> {
    pub fn new(model: &'a dyn Model, prompts: &'a PromptEngine, limits: AgentLimits) -> Self {
        Self {
            model,
            prompts,
            schemas: None,
            limits,
        }
    }

    pub fn with_schemas(mut self, schemas: Option<&'a AnswerSchemas>) -> Self {
        self.schemas = schemas;
        self
    }

    pub(crate) fn registry(&self) -> ToolRegistry {
        ToolRegistry::new(self.limits.tool_timeout)
    }

    /// Run a `<final_answer>` loop with `tools`.
    pub(crate) fn run_tool_loop(
        &self,
        kind: AgentKind,
        tools: &ToolRegistry,
        prompt: String,
    ) -> LoopOutcome {
        let settings = LoopSettings::tool_agent(self.limits.max_iterations, self.limits.temperature);
        AgentLoop::new(kind, self.model, tools, settings)
            .strict(self.schemas)
            .run(prompt)
            .outcome
    }
}

/// Human-readable agent name used in failure messages.
pub fn agent_label(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::ProductManager => "Product Manager Agent",
        AgentKind::Builder => "Builder Agent",
        AgentKind::Reviewer => "Reviewer Agent",
        AgentKind::Qa => "QA Agent",
        AgentKind::ImpactAnalyzer => "Impact Analyzer Agent",
        AgentKind::MergeController => "Confidence & Merge Controller Agent",
        AgentKind::Documentation => "Auto Documentation Agent",
    }
}

/// Turn a loop outcome into a report. `defaults` builds the failure payload.
pub(crate) fn into_report(
    kind: AgentKind,
    outcome: LoopOutcome,
    defaults: impl FnOnce(&LoopFailure) -> Map<String, Value>,
) -> AgentReport {
    match outcome {
        LoopOutcome::Answer(answer) => AgentReport::success(answer),
        LoopOutcome::Failed(failure) => {
            AgentReport::failure(failure.message(agent_label(kind)), defaults(&failure))
        }
    }
}

/// Failure payload carrying the last model text.
pub(crate) fn raw_response_defaults(failure: &LoopFailure) -> Map<String, Value> {
    object([("raw_response", json!(failure.raw_response()))])
}

/// Report for a failure before the loop could start (context fetch, tool setup, template).
pub(crate) fn setup_failure(
    kind: AgentKind,
    err: &anyhow::Error,
    defaults: Map<String, Value>,
) -> AgentReport {
    warn!(agent = kind.as_str(), err = %format!("{err:#}"), "agent setup failed");
    AgentReport::failure(
        format!("{} failed to prepare its run: {err:#}", agent_label(kind)),
        defaults,
    )
}

pub(crate) fn empty_raw_response() -> Map<String, Value> {
    object([("raw_response", json!(""))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn exhausted_failures_carry_label_and_raw_text() {
        let report = into_report(
            AgentKind::Reviewer,
            LoopOutcome::Failed(LoopFailure::Exhausted {
                iterations: 10,
                last_response: "hmm".to_string(),
            }),
            raw_response_defaults,
        );
        assert_eq!(
            report.to_value(),
            json!({
                "status": "failure",
                "message": "Reviewer Agent reached max iterations (10) without providing a final answer.",
                "raw_response": "hmm"
            })
        );
    }

    #[test]
    fn setup_failures_keep_defaults() {
        let report = setup_failure(
            AgentKind::Documentation,
            &anyhow!("diff unavailable"),
            empty_raw_response(),
        );
        assert!(!report.is_success());
        assert!(report.message().unwrap_or_default().contains("diff unavailable"));
        assert_eq!(report.get("raw_response"), Some(&json!("")));
    }
}

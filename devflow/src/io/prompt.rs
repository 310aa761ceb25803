//! Prompt templates for the agents.

use anyhow::{Context, Result};
use minijinja::{Environment, Value};

use crate::core::types::AgentKind;

const PROTOCOL_TEMPLATE: &str = include_str!("prompts/protocol.md");
const PRODUCT_MANAGER_TEMPLATE: &str = include_str!("prompts/product_manager.md");
const BUILDER_TEMPLATE: &str = include_str!("prompts/builder.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const QA_TEMPLATE: &str = include_str!("prompts/qa.md");
const IMPACT_ANALYZER_TEMPLATE: &str = include_str!("prompts/impact_analyzer.md");
const MERGE_CONTROLLER_TEMPLATE: &str = include_str!("prompts/merge_controller.md");
const DOCUMENTATION_TEMPLATE: &str = include_str!("prompts/documentation.md");

fn template_source(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::ProductManager => PRODUCT_MANAGER_TEMPLATE,
        AgentKind::Builder => BUILDER_TEMPLATE,
        AgentKind::Reviewer => REVIEWER_TEMPLATE,
        AgentKind::Qa => QA_TEMPLATE,
        AgentKind::ImpactAnalyzer => IMPACT_ANALYZER_TEMPLATE,
        AgentKind::MergeController => MERGE_CONTROLLER_TEMPLATE,
        AgentKind::Documentation => DOCUMENTATION_TEMPLATE,
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("protocol", PROTOCOL_TEMPLATE)
            .expect("protocol template should be valid");
        for kind in AgentKind::ALL {
            env.add_template(kind.as_str(), template_source(kind))
                .expect("agent template should be valid");
        }
        Self { env }
    }

    /// Render the initial prompt for `kind` with the given context
    /// (built with `minijinja::context!`).
    pub fn render(&self, kind: AgentKind, ctx: Value) -> Result<String> {
        let template = self
            .env
            .get_template(kind.as_str())
            .with_context(|| format!("load {} template", kind.as_str()))?;
        template
            .render(ctx)
            .with_context(|| format!("render {} template", kind.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn tool_agents_embed_protocol_and_listing() {
        let engine = PromptEngine::new();
        for kind in AgentKind::ALL {
            if kind == AgentKind::ProductManager {
                continue;
            }
            let rendered = engine
                .render(kind, context! { tools => "- Echo: echoes", pr_number => 7 })
                .expect("render");
            assert!(rendered.contains("- Echo: echoes"), "{kind:?}");
            assert!(rendered.contains("<tool_code>"), "{kind:?}");
            assert!(rendered.contains("<final_answer>"), "{kind:?}");
            assert!(rendered.trim_end().ends_with("Begin!"), "{kind:?}");
        }
    }

    #[test]
    fn intake_uses_json_output_tags() {
        let rendered = PromptEngine::new()
            .render(
                AgentKind::ProductManager,
                context! { user_comment => "Add a dark mode toggle" },
            )
            .expect("render");
        assert!(rendered.contains("Add a dark mode toggle"));
        assert!(rendered.contains("<json_output>"));
        assert!(!rendered.contains("<tool_code>"));
    }

    #[test]
    fn merge_prompt_only_offers_merge_when_allowed() {
        let engine = PromptEngine::new();
        let allowed = engine
            .render(
                AgentKind::MergeController,
                context! { can_merge => true, decision => "merged", confidence => 0.9 },
            )
            .expect("render");
        assert!(allowed.contains("Merge the pull request with `SourceControl_MergePR`"));

        let denied = engine
            .render(
                AgentKind::MergeController,
                context! { can_merge => false, decision => "rejected", confidence => 0.6 },
            )
            .expect("render");
        assert!(denied.contains("Do not merge"));
        assert!(denied.contains("\"merge_decision\": \"rejected\""));
    }
}

//! JSON Schema checks for agent final answers.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};

use crate::core::types::AgentKind;

fn schema_source(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::ProductManager => include_str!("../../schemas/product_manager.schema.json"),
        AgentKind::Builder => include_str!("../../schemas/builder.schema.json"),
        AgentKind::Reviewer => include_str!("../../schemas/reviewer.schema.json"),
        AgentKind::Qa => include_str!("../../schemas/qa.schema.json"),
        AgentKind::ImpactAnalyzer => include_str!("../../schemas/impact_analyzer.schema.json"),
        AgentKind::MergeController => include_str!("../../schemas/merge_controller.schema.json"),
        AgentKind::Documentation => include_str!("../../schemas/documentation.schema.json"),
    }
}

/// Compiled answer schemas, one per agent.
pub struct AnswerSchemas {
    validators: HashMap<AgentKind, Validator>,
}

impl AnswerSchemas {
    pub fn load() -> Result<Self> {
        let mut validators = HashMap::new();
        for kind in AgentKind::ALL {
            let schema: Value = serde_json::from_str(schema_source(kind))
                .with_context(|| format!("parse {} answer schema", kind.as_str()))?;
            let compiled = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&schema)
                .with_context(|| format!("compile {} answer schema", kind.as_str()))?;
            validators.insert(kind, compiled);
        }
        Ok(Self { validators })
    }

    /// Validate an answer against the agent's schema.
    pub fn validate(&self, kind: AgentKind, answer: &Map<String, Value>) -> Result<()> {
        let Some(validator) = self.validators.get(&kind) else {
            bail!("no answer schema for {}", kind.as_str());
        };
        let instance = Value::Object(answer.clone());
        let messages: Vec<String> = validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("schema validation failed:\n- {}", messages.join("\n- "));
        }
        Ok(())
    }
}

//! Intake: free-text feature request to structured ticket.

use minijinja::context;
use tracing::{info, instrument};

use super::agent_loop::{AgentLoop, LoopSettings};
use super::{AgentEnv, empty_raw_response, into_report, raw_response_defaults, setup_failure};
use crate::core::types::{AgentKind, AgentReport};

const KIND: AgentKind = AgentKind::ProductManager;

pub struct ProductManager<'a> {
    env: AgentEnv<'a>,
}

impl<'a> ProductManager<'a> {
    pub fn new(env: AgentEnv<'a>) -> Self {
        Self { env }
    }

    /// Turn a raw comment into a ticket payload. Uses `<json_output>` tags and
    /// correction segments instead of tools.
    #[instrument(skip_all, fields(chars = raw.len()))]
    pub fn process_comment(&self, raw: &str) -> AgentReport {
        let prompt = match self
            .env
            .prompts
            .render(KIND, context! { user_comment => raw })
        {
            Ok(prompt) => prompt,
            Err(err) => return setup_failure(KIND, &err, empty_raw_response()),
        };
        let tools = self.env.registry();
        let settings = LoopSettings::intake(
            self.env.limits.intake_max_iterations,
            self.env.limits.intake_temperature,
        );
        let run = AgentLoop::new(KIND, self.env.model, &tools, settings)
            .strict(self.env.schemas)
            .run(prompt);
        info!(rounds = run.rounds, "intake finished");
        into_report(KIND, run.outcome, raw_response_defaults)
    }
}

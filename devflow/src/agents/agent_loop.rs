//! The tool-augmented conversation loop every agent runs.
//!
//! One run owns its [`Conversation`]. Each round sends the whole conversation
//! to the model, then looks for a final answer, then for a tool call, and
//! otherwise keeps the raw text (or a correction) and asks again.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::conversation::{Conversation, tail};
use crate::core::parser::{Block, Delimiter, parse_object_block, try_extract_tool_call};
use crate::core::types::AgentKind;
use crate::io::model::{GenerationOptions, Model, ModelError, ModelResponse};
use crate::io::schema::AnswerSchemas;
use crate::tools::ToolRegistry;

const EMPTY_RESPONSE_CORRECTION: &str =
    "Error: LLM did not return any text. Please provide a valid JSON output.";
const LOG_TAIL_CHARS: usize = 500;

/// Per-agent loop parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub answer_delimiter: Delimiter,
    pub temperature: f32,
    /// Append `Error: ...` corrections instead of the raw text when the
    /// answer block is missing or malformed.
    pub corrections: bool,
}

impl LoopSettings {
    /// `<final_answer>` answers with plain accumulation.
    pub fn tool_agent(max_iterations: u32, temperature: f32) -> Self {
        Self {
            max_iterations,
            answer_delimiter: Delimiter::FinalAnswer,
            temperature,
            corrections: false,
        }
    }

    /// `<json_output>` answers with correction segments.
    pub fn intake(max_iterations: u32, temperature: f32) -> Self {
        Self {
            max_iterations,
            answer_delimiter: Delimiter::JsonOutput,
            temperature,
            corrections: true,
        }
    }
}

/// Why a run ended without an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopFailure {
    QuotaExhausted(String),
    Model(String),
    Exhausted {
        iterations: u32,
        last_response: String,
    },
    MalformedAnswer {
        error: String,
        raw_response: String,
    },
}

impl LoopFailure {
    fn from_model_error(err: &ModelError) -> Self {
        match err {
            ModelError::QuotaExhausted { .. } => LoopFailure::QuotaExhausted(err.to_string()),
            other => LoopFailure::Model(other.to_string()),
        }
    }

    /// Failure message attributed to `agent` (e.g. "Builder Agent").
    pub fn message(&self, agent: &str) -> String {
        match self {
            LoopFailure::QuotaExhausted(err) => {
                format!("{agent} failed due to model API quota exhaustion: {err}")
            }
            LoopFailure::Model(err) => {
                format!("{agent} failed due to an unexpected error: {err}")
            }
            LoopFailure::Exhausted { iterations, .. } => format!(
                "{agent} reached max iterations ({iterations}) without providing a final answer."
            ),
            LoopFailure::MalformedAnswer { error, .. } => {
                format!("{agent} returned a malformed final answer: {error}")
            }
        }
    }

    /// Last model text, when there was one.
    pub fn raw_response(&self) -> &str {
        match self {
            LoopFailure::Exhausted { last_response, .. } => last_response,
            LoopFailure::MalformedAnswer { raw_response, .. } => raw_response,
            LoopFailure::QuotaExhausted(_) | LoopFailure::Model(_) => "",
        }
    }
}

impl fmt::Display for LoopFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message("agent"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Answer(Map<String, Value>),
    Failed(LoopFailure),
}

/// Result of one run, with the conversation it produced.
#[derive(Debug, Clone)]
pub struct LoopRun {
    pub outcome: LoopOutcome,
    /// Model calls made, including the one that produced the answer.
    pub rounds: u32,
    pub conversation: Conversation,
}

/// What one round decided.
enum Step {
    Finish(LoopOutcome),
    Continue,
}

/// A configured loop: model, tools, settings and an optional strict schema.
pub struct AgentLoop<'a> {
    kind: AgentKind,
    model: &'a dyn Model,
    tools: &'a ToolRegistry,
    settings: LoopSettings,
    schemas: Option<&'a AnswerSchemas>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        kind: AgentKind,
        model: &'a dyn Model,
        tools: &'a ToolRegistry,
        settings: LoopSettings,
    ) -> Self {
        Self {
            kind,
            model,
            tools,
            settings,
            schemas: None,
        }
    }

    /// Validate answers against the agent's schema before accepting them.
    pub fn strict(mut self, schemas: Option<&'a AnswerSchemas>) -> Self {
        self.schemas = schemas;
        self
    }

    #[instrument(skip_all, fields(agent = self.kind.as_str(), max_iterations = self.settings.max_iterations))]
    pub fn run(&self, prompt: String) -> LoopRun {
        let mut conversation = Conversation::new(prompt);
        let options = GenerationOptions {
            temperature: self.settings.temperature,
        };
        let mut last_response = String::new();

        for round in 1..=self.settings.max_iterations {
            let rendered = conversation.render();
            debug!(round, prompt_tail = tail(&rendered, LOG_TAIL_CHARS), "calling model");

            let response = match self.model.generate(&rendered, &options) {
                Ok(response) => response,
                Err(err @ ModelError::Blocked(_)) => {
                    warn!(round, err = %err, "model response blocked; counting an empty round");
                    ModelResponse::empty()
                }
                Err(err) => {
                    warn!(round, err = %err, "model call failed; stopping");
                    return LoopRun {
                        outcome: LoopOutcome::Failed(LoopFailure::from_model_error(&err)),
                        rounds: round,
                        conversation,
                    };
                }
            };
            debug!(round, empty = response.is_empty, response = tail(&response.text, LOG_TAIL_CHARS), "model responded");
            last_response.clone_from(&response.text);

            let step = if self.settings.corrections {
                self.correcting_round(&mut conversation, &response.text, response.is_empty)
            } else {
                self.tool_round(&mut conversation, &response.text)
            };
            if let Step::Finish(outcome) = step {
                info!(round, answered = matches!(outcome, LoopOutcome::Answer(_)), "loop finished");
                return LoopRun {
                    outcome,
                    rounds: round,
                    conversation,
                };
            }
        }

        warn!(iterations = self.settings.max_iterations, "iteration cap reached without an answer");
        LoopRun {
            outcome: LoopOutcome::Failed(LoopFailure::Exhausted {
                iterations: self.settings.max_iterations,
                last_response,
            }),
            rounds: self.settings.max_iterations,
            conversation,
        }
    }

    fn tool_round(&self, conversation: &mut Conversation, text: &str) -> Step {
        if let Block::Decoded(answer) = parse_object_block(text, self.settings.answer_delimiter) {
            return Step::Finish(self.accept(answer, text));
        }

        match try_extract_tool_call(text) {
            Some(call) if self.tools.contains(&call.tool_name) => {
                match self.tools.invoke(&call.tool_name, &call.parameters) {
                    Ok(output) => conversation.push_tool_output(&call.tool_name, output),
                    Err(err) => conversation.push_tool_error(&call.tool_name, format!("{err:#}")),
                }
            }
            Some(call) => {
                debug!(tool = %call.tool_name, "unregistered tool requested");
                conversation.push_assistant(text);
            }
            None => conversation.push_assistant(text),
        }
        Step::Continue
    }

    fn correcting_round(&self, conversation: &mut Conversation, text: &str, is_empty: bool) -> Step {
        if is_empty || text.trim().is_empty() {
            conversation.push_correction(EMPTY_RESPONSE_CORRECTION);
            return Step::Continue;
        }
        let delimiter = self.settings.answer_delimiter;
        match parse_object_block(text, delimiter) {
            Block::Decoded(answer) => Step::Finish(self.accept(answer, text)),
            Block::Malformed { raw, error } => {
                conversation.push_correction(format!(
                    "Error: Invalid JSON format. Please ensure the output is valid JSON. Error: {error}\nInvalid JSON: {raw}"
                ));
                Step::Continue
            }
            Block::Absent => {
                conversation.push_correction(format!(
                    "Error: JSON output not enclosed in {} tags. Please use the specified format.",
                    delimiter.open()
                ));
                Step::Continue
            }
        }
    }

    fn accept(&self, answer: Map<String, Value>, raw: &str) -> LoopOutcome {
        if let Some(schemas) = self.schemas
            && let Err(err) = schemas.validate(self.kind, &answer)
        {
            warn!(err = %err, "final answer violates schema");
            return LoopOutcome::Failed(LoopFailure::MalformedAnswer {
                error: format!("{err:#}"),
                raw_response: raw.to_string(),
            });
        }
        LoopOutcome::Answer(answer)
    }
}

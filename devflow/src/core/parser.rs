//! Extraction of tool calls and final answers from raw model text.
//!
//! The wire convention is a JSON payload wrapped in a fixed tag pair:
//!
//! ```text
//! <tool_code>{"tool_name": "...", "parameters": {...}}</tool_code>
//! <final_answer>{...}</final_answer>
//! ```
//!
//! Both extractors are total. A missing tag pair and an undecodable payload
//! both come back as `None`, so malformed model output degrades to "keep
//! talking" instead of aborting the loop.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Tag pairs recognised in model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    ToolCode,
    FinalAnswer,
    JsonOutput,
}

impl Delimiter {
    pub fn open(self) -> &'static str {
        match self {
            Delimiter::ToolCode => "<tool_code>",
            Delimiter::FinalAnswer => "<final_answer>",
            Delimiter::JsonOutput => "<json_output>",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Delimiter::ToolCode => "</tool_code>",
            Delimiter::FinalAnswer => "</final_answer>",
            Delimiter::JsonOutput => "</json_output>",
        }
    }

    fn regex(self) -> &'static Regex {
        static TOOL_CODE: LazyLock<Regex> =
            LazyLock::new(|| block_regex(Delimiter::ToolCode));
        static FINAL_ANSWER: LazyLock<Regex> =
            LazyLock::new(|| block_regex(Delimiter::FinalAnswer));
        static JSON_OUTPUT: LazyLock<Regex> =
            LazyLock::new(|| block_regex(Delimiter::JsonOutput));
        match self {
            Delimiter::ToolCode => &TOOL_CODE,
            Delimiter::FinalAnswer => &FINAL_ANSWER,
            Delimiter::JsonOutput => &JSON_OUTPUT,
        }
    }
}

fn block_regex(delimiter: Delimiter) -> Regex {
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(delimiter.open()),
        regex::escape(delimiter.close())
    );
    Regex::new(&pattern).expect("delimiter pattern should be valid")
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Three-way parse result, for callers that want to react to malformed blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum Block<T> {
    Absent,
    Malformed { raw: String, error: String },
    Decoded(T),
}

impl<T> Block<T> {
    pub fn decoded(self) -> Option<T> {
        match self {
            Block::Decoded(value) => Some(value),
            Block::Absent | Block::Malformed { .. } => None,
        }
    }
}

/// Return the trimmed text between the first opening tag and the first
/// closing tag after it.
pub fn find_block(text: &str, delimiter: Delimiter) -> Option<&str> {
    delimiter
        .regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Locate and decode a block as a JSON object.
pub fn parse_object_block(text: &str, delimiter: Delimiter) -> Block<Map<String, Value>> {
    let Some(raw) = find_block(text, delimiter) else {
        return Block::Absent;
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Block::Decoded(map),
        Ok(other) => {
            debug!(delimiter = delimiter.open(), "block is valid JSON but not an object");
            Block::Malformed {
                raw: raw.to_string(),
                error: format!("expected a JSON object, got {}", json_kind(&other)),
            }
        }
        Err(err) => {
            debug!(delimiter = delimiter.open(), err = %err, "block is not valid JSON");
            Block::Malformed {
                raw: raw.to_string(),
                error: err.to_string(),
            }
        }
    }
}

/// Decode the first final-answer block, if any.
pub fn try_extract_final_answer(text: &str, delimiter: Delimiter) -> Option<Map<String, Value>> {
    parse_object_block(text, delimiter).decoded()
}

/// Decode the first tool-call block, if any.
///
/// A block without a string `tool_name` counts as absent.
pub fn try_extract_tool_call(text: &str) -> Option<ToolCall> {
    let map = parse_object_block(text, Delimiter::ToolCode).decoded()?;
    match serde_json::from_value::<ToolCall>(Value::Object(map)) {
        Ok(call) => Some(call),
        Err(err) => {
            debug!(err = %err, "tool call block has the wrong shape");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Append-only conversation state for one agent loop run.
//!
//! The whole conversation is resubmitted as the next prompt, in order. Nothing
//! is ever removed, so the rendered length never shrinks during a run.

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// The rendered agent template that seeds the run.
    Prompt(String),
    /// Text returned by a successful tool invocation.
    ToolOutput { tool: String, output: String },
    /// Failure message from a tool invocation.
    ToolError { tool: String, error: String },
    /// Model text that contained no recognised block.
    Assistant(String),
    /// Corrective instruction appended after an unusable response.
    Correction(String),
}

impl Segment {
    fn render_into(&self, buf: &mut String) {
        match self {
            Segment::Prompt(text) => buf.push_str(text),
            Segment::ToolOutput { tool, output } => {
                buf.push_str(&format!("\n\nTool Output for {tool}:\n{output}\n\n"));
            }
            Segment::ToolError { tool, error } => {
                buf.push_str(&format!("\n\nTool Error for {tool}: {error}\n\n"));
            }
            Segment::Assistant(text) => {
                buf.push_str(&format!("\n\nLLM Thought/Response:\n{text}\n\n"));
            }
            Segment::Correction(text) => {
                buf.push_str("\n\n");
                buf.push_str(text);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    segments: Vec<Segment>,
}

impl Conversation {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Prompt(prompt.into())],
        }
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn push_tool_output(&mut self, tool: &str, output: impl Into<String>) {
        self.push(Segment::ToolOutput {
            tool: tool.to_string(),
            output: output.into(),
        });
    }

    pub fn push_tool_error(&mut self, tool: &str, error: impl Into<String>) {
        self.push(Segment::ToolError {
            tool: tool.to_string(),
            error: error.into(),
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Segment::Assistant(text.into()));
    }

    pub fn push_correction(&mut self, text: impl Into<String>) {
        self.push(Segment::Correction(text.into()));
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Full prompt text for the next model call.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        for segment in &self.segments {
            segment.render_into(&mut buf);
        }
        buf
    }
}

/// Last `max_chars` characters of `text`, for log lines.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_segments_in_order_with_labels() {
        let mut convo = Conversation::new("PROMPT");
        convo.push_tool_output("echo", "hi");
        convo.push_tool_error("write", "disk full");
        convo.push_assistant("thinking");
        let text = convo.render();

        let output_pos = text.find("Tool Output for echo:\nhi").expect("output");
        let error_pos = text.find("Tool Error for write: disk full").expect("error");
        let thought_pos = text.find("LLM Thought/Response:\nthinking").expect("thought");
        assert!(text.starts_with("PROMPT"));
        assert!(output_pos < error_pos && error_pos < thought_pos);
    }

    #[test]
    fn rendered_length_never_shrinks() {
        let mut convo = Conversation::new("seed");
        let mut last = convo.render().len();
        for text in ["", "a", "", "longer text"] {
            convo.push_assistant(text);
            let now = convo.render().len();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(convo.len(), 5);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo wörld", 5), "wörld");
        assert_eq!(tail("abc", 10), "abc");
    }
}

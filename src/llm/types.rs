//! Request and response types for the generation service

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generation request: system instruction, tool manifest and turns
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Vec<SystemContent>,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// System prompt content
#[derive(Debug, Clone)]
pub struct SystemContent {
    pub text: String,
    pub cache: bool,
}

impl SystemContent {
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: true,
        }
    }
}

/// Message in conversation
#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

/// Message role. Only two roles exist at the generation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text { text: s.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Tool manifest entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Why the generation service stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// Raw response from the generation service
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Terminal indicator of a response: either final text or tool requests
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Final assistant text, one entry per text segment
    Final { segments: Vec<String> },
    /// One or more tool invocations, in model order
    NeedsTool { calls: Vec<ToolCall> },
}

impl LlmResponse {
    /// Build a final text response (mainly for tests and stubs)
    pub fn final_text(segments: &[&str]) -> Self {
        Self {
            content: segments.iter().map(|s| ContentBlock::text(*s)).collect(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    /// Build a tool-use response (mainly for tests and stubs)
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: calls
                .into_iter()
                .map(|c| ContentBlock::tool_use(c.id, c.name, c.input))
                .collect(),
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        }
    }

    /// Extract all tool use requests from the response
    pub fn tool_uses(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Text segments in response order, empty segments dropped
    pub fn text_segments(&self) -> Vec<String> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Classify the response as final or needs-tool.
    ///
    /// Any tool request makes the response `NeedsTool`; text that
    /// accompanies tool requests is not part of the outcome. A response
    /// with neither text nor tool requests, or one that stopped for tool
    /// use without naming a tool, is malformed.
    pub fn outcome(&self) -> Result<GenerationOutcome, super::LlmError> {
        let calls = self.tool_uses();
        if !calls.is_empty() {
            return Ok(GenerationOutcome::NeedsTool { calls });
        }
        if self.stop_reason == StopReason::ToolUse {
            return Err(super::LlmError::malformed(
                "model stopped for tool use without requesting a tool",
            ));
        }
        let segments = self.text_segments();
        if segments.is_empty() {
            return Err(super::LlmError::malformed("model returned an empty response"));
        }
        Ok(GenerationOutcome::Final { segments })
    }
}

/// Usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

//! Conversation turns and their projection onto the generation service
//!
//! Stored turns use four kinds; the generation service only knows two
//! roles. [`normalize_history`] maps one onto the other and repairs the
//! shapes a failed previous run can leave behind.

use crate::llm::{ContentBlock, LlmMessage, MessageRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator used when two same-role text turns are coalesced
pub const COALESCE_SEPARATOR: &str = "\n\n";

/// One immutable entry of a conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    AssistantToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::UserText { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Turn::AssistantText { text: text.into() }
    }

    /// Role this turn takes when presented to the generation service.
    /// Tool results are spoken by the user at that boundary.
    pub fn role(&self) -> MessageRole {
        match self {
            Turn::UserText { .. } | Turn::ToolResult { .. } => MessageRole::User,
            Turn::AssistantText { .. } | Turn::AssistantToolCall { .. } => MessageRole::Assistant,
        }
    }

    pub fn to_model_turn(&self) -> ModelTurn {
        let content = match self {
            Turn::UserText { text } | Turn::AssistantText { text } => {
                ModelContent::Text(text.clone())
            }
            Turn::AssistantToolCall {
                tool_call_id,
                tool_name,
                input,
            } => ModelContent::ToolCall {
                id: tool_call_id.clone(),
                name: tool_name.clone(),
                input: input.clone(),
            },
            Turn::ToolResult {
                tool_call_id,
                tool_name,
                output,
                is_error,
            } => ModelContent::ToolResult {
                id: tool_call_id.clone(),
                name: tool_name.clone(),
                output: output.clone(),
                is_error: *is_error,
            },
        };
        ModelTurn {
            role: self.role(),
            content,
        }
    }
}

/// Payload of a model turn: plain text or one structured tool payload
#[derive(Debug, Clone, PartialEq)]
pub enum ModelContent {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: Value,
        is_error: bool,
    },
}

/// A turn as the generation service sees it
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTurn {
    pub role: MessageRole,
    pub content: ModelContent,
}

impl ModelTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: ModelContent::Text(text.into()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: ModelContent::Text(text.into()),
        }
    }

    pub fn to_llm_message(&self) -> LlmMessage {
        let block = match &self.content {
            ModelContent::Text(text) => ContentBlock::text(text),
            ModelContent::ToolCall { id, name, input } => {
                ContentBlock::tool_use(id, name, input.clone())
            }
            ModelContent::ToolResult {
                id,
                output,
                is_error,
                ..
            } => ContentBlock::tool_result(id, render_tool_output(output), *is_error),
        };
        LlmMessage {
            role: self.role,
            content: vec![block],
        }
    }

    /// Plain-text rendering of any payload
    fn to_text_message(&self) -> LlmMessage {
        let text = match &self.content {
            ModelContent::Text(text) => text.clone(),
            ModelContent::ToolCall { name, input, .. } => {
                format!("[called tool {name} with input {input}]")
            }
            ModelContent::ToolResult { name, output, .. } => {
                format!("[tool {name} returned {}]", render_tool_output(output))
            }
        };
        LlmMessage {
            role: self.role,
            content: vec![ContentBlock::text(text)],
        }
    }
}

/// Render turns for a generation request.
///
/// A tool call goes out as structured content only when the next turn is
/// its result, and a result only when the previous turn is its call.
/// Unpaired halves, left behind by the history window or an interrupted
/// run, go out as plain text so the provider accepts the request.
pub fn to_llm_messages(turns: &[ModelTurn]) -> Vec<LlmMessage> {
    turns
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            let paired = match &turn.content {
                ModelContent::Text(_) => true,
                ModelContent::ToolCall { id, .. } => turns.get(i + 1).is_some_and(|next| {
                    matches!(&next.content, ModelContent::ToolResult { id: result_id, .. } if result_id == id)
                }),
                ModelContent::ToolResult { id, .. } => i
                    .checked_sub(1)
                    .and_then(|prev| turns.get(prev))
                    .is_some_and(|prev| {
                        matches!(&prev.content, ModelContent::ToolCall { id: call_id, .. } if call_id == id)
                    }),
            };
            if paired {
                turn.to_llm_message()
            } else {
                turn.to_text_message()
            }
        })
        .collect()
}

/// Tool output is JSON; the generation service receives it as text.
fn render_tool_output(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the model-facing turn sequence for one new user message.
///
/// The new message takes part in coalescing like any stored turn, so a
/// stored user turn left behind by a failed send is merged with it.
pub fn normalize_history(stored: &[Turn], new_message: &str) -> Vec<ModelTurn> {
    let turns = stored
        .iter()
        .map(Turn::to_model_turn)
        .chain(std::iter::once(ModelTurn::user_text(new_message)))
        .collect();
    normalize(turns)
}

/// Coalesce same-role neighbours, then trim to a leading user turn.
///
/// Idempotent: the output has no adjacent same-role turns and starts with
/// a user turn, so a second pass changes nothing.
pub fn normalize(turns: Vec<ModelTurn>) -> Vec<ModelTurn> {
    trim_to_user_start(coalesce_same_role(turns))
}

/// Merge adjacent turns that share a role.
///
/// Two text turns are concatenated in order. When either side carries a
/// structured payload the later turn replaces the earlier one; structured
/// payloads are never merged.
pub fn coalesce_same_role(turns: Vec<ModelTurn>) -> Vec<ModelTurn> {
    let mut out: Vec<ModelTurn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match out.last_mut() {
            Some(prev) if prev.role == turn.role => {
                if let (ModelContent::Text(earlier), ModelContent::Text(later)) =
                    (&mut prev.content, &turn.content)
                {
                    earlier.push_str(COALESCE_SEPARATOR);
                    earlier.push_str(later);
                } else {
                    *prev = turn;
                }
            }
            _ => out.push(turn),
        }
    }
    out
}

/// Drop leading turns until the sequence opens with a user turn.
///
/// Covers a corrupted head such as an assistant tool call whose result was
/// never written.
pub fn trim_to_user_start(turns: Vec<ModelTurn>) -> Vec<ModelTurn> {
    let start = turns
        .iter()
        .position(|t| t.role == MessageRole::User)
        .unwrap_or(turns.len());
    turns.into_iter().skip(start).collect()
}

//! Loop state types

use crate::llm::ToolCall;
use serde::Serialize;

/// Immutable facts about one loop run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopContext {
    pub conversation_id: String,
    /// Completed tool rounds allowed before the loop gives up
    pub max_tool_rounds: u32,
}

impl LoopContext {
    pub fn new(conversation_id: impl Into<String>, max_tool_rounds: u32) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            max_tool_rounds,
        }
    }
}

/// How a loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopOutcome {
    Completed,
    Failed { message: String },
    Cancelled,
}

/// Loop state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopState {
    /// Generation request in flight. `round` counts tool rounds completed so far.
    InvokingModel { round: u32 },

    /// Executing the tools of one model response, serially and in model order
    ExecutingTools {
        round: u32,
        /// The tool being dispatched
        current: ToolCall,
        /// Tools still to run after `current` completes
        remaining: Vec<ToolCall>,
    },

    /// Final text received; being emitted and persisted
    StreamingFinal { segments: Vec<String> },

    /// A failure is being reported to the caller
    Errored { message: String },

    /// Nothing more will happen
    Terminated { outcome: LoopOutcome },
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Terminated { .. })
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::InvokingModel { .. } => "invoking_model",
            LoopState::ExecutingTools { .. } => "executing_tools",
            LoopState::StreamingFinal { .. } => "streaming_final",
            LoopState::Errored { .. } => "errored",
            LoopState::Terminated { .. } => "terminated",
        }
    }

    pub fn outcome(&self) -> Option<&LoopOutcome> {
        match self {
            LoopState::Terminated { outcome } => Some(outcome),
            _ => None,
        }
    }
}

impl Default for LoopState {
    fn default() -> Self {
        LoopState::InvokingModel { round: 0 }
    }
}

//! Events that drive the loop

use crate::llm::GenerationOutcome;
use serde_json::Value;

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    // Generation events
    ModelResponded {
        outcome: GenerationOutcome,
    },
    ModelFailed {
        message: String,
    },

    // Tool events
    ToolCompleted {
        tool_call_id: String,
        output: Value,
        is_error: bool,
    },

    // Internal follow-ups
    FinalStreamed,
    ErrorReported,

    /// Loop-level failure outside the model call: a transcript write that
    /// did not land or a dispatcher task that crashed
    Failed {
        message: String,
    },

    Cancelled,
}

impl LoopEvent {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::ModelResponded { .. } => "model_responded",
            LoopEvent::ModelFailed { .. } => "model_failed",
            LoopEvent::ToolCompleted { .. } => "tool_completed",
            LoopEvent::FinalStreamed => "final_streamed",
            LoopEvent::ErrorReported => "error_reported",
            LoopEvent::Failed { .. } => "failed",
            LoopEvent::Cancelled => "cancelled",
        }
    }
}

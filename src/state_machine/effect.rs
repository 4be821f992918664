//! Effects produced by state transitions

use crate::history::Turn;
use crate::llm::ToolCall;
use crate::state_machine::LoopEvent;
use serde_json::{json, Value};

/// One unit of the caller-facing stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ToolCall { id: String, name: String, input: Value },
    ToolResult { id: String, name: String, result: Value },
    Text { text: String },
    Done { conversation_id: String },
    Error { message: String },
}

impl StreamEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Text { .. } => "text",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// JSON payload on the wire
    pub fn payload(&self) -> Value {
        match self {
            StreamEvent::ToolCall { id, name, input } => {
                json!({ "id": id, "name": name, "input": input })
            }
            StreamEvent::ToolResult { id, name, result } => {
                json!({ "id": id, "name": name, "result": result })
            }
            StreamEvent::Text { text } => json!({ "text": text }),
            StreamEvent::Done { conversation_id } => json!({ "conversationId": conversation_id }),
            StreamEvent::Error { message } => json!({ "message": message }),
        }
    }

    /// `done` and `error` end the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }
}

/// Effects to be executed after a state transition, in order.
///
/// `RequestModel`, `DispatchTool` and `Advance` produce the next event and
/// always close an effect batch. `CheckCancelled` closes it only when the
/// caller has cancelled.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Persist a turn to the transcript
    AppendTurn(Turn),

    /// Push an event to the caller
    Emit(StreamEvent),

    /// Call the generation service with the current turn sequence
    RequestModel,

    /// Stop with `Cancelled` if the caller has gone away, otherwise continue
    CheckCancelled,

    /// Run one tool through the dispatcher
    DispatchTool(ToolCall),

    /// Feed an event straight back into the state machine
    Advance(LoopEvent),
}

impl Effect {
    pub fn emit_tool_call(call: &ToolCall) -> Self {
        Effect::Emit(StreamEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        })
    }

    pub fn emit_text(text: impl Into<String>) -> Self {
        Effect::Emit(StreamEvent::Text { text: text.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_payload_uses_camel_case() {
        let event = StreamEvent::Done {
            conversation_id: "c1".to_string(),
        };
        assert_eq!(event.name(), "done");
        assert_eq!(event.payload(), json!({"conversationId": "c1"}));
        assert!(event.is_terminal());
    }

    #[test]
    fn test_tool_result_payload() {
        let event = StreamEvent::ToolResult {
            id: "t1".to_string(),
            name: "list_orders".to_string(),
            result: json!({"orders": []}),
        };
        assert_eq!(
            event.payload(),
            json!({"id": "t1", "name": "list_orders", "result": {"orders": []}})
        );
        assert!(!event.is_terminal());
    }
}

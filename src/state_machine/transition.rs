//! Pure state transition function

use super::{Effect, LoopContext, LoopEvent, LoopOutcome, LoopState, StreamEvent};
use crate::history::Turn;
use crate::llm::{GenerationOutcome, ToolCall};
use serde_json::Value;
use thiserror::Error;

/// Message emitted when the caller aborts a running loop
pub const CANCELLED_MESSAGE: &str = "Request cancelled";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: LoopState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: LoopState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {event} in state {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

/// Entry point of a loop run: persist the user's message, then ask the model.
pub fn start(message: &str) -> TransitionResult {
    TransitionResult::new(LoopState::InvokingModel { round: 0 })
        .with_effect(Effect::AppendTurn(Turn::user(message)))
        .with_effect(Effect::RequestModel)
}

/// Pure transition function
pub fn transition(
    state: &LoopState,
    context: &LoopContext,
    event: LoopEvent,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Generation responses
        // ============================================================
        (
            LoopState::InvokingModel { .. },
            LoopEvent::ModelResponded {
                outcome: GenerationOutcome::Final { segments },
            },
        ) => {
            let text = segments.concat();
            Ok(
                TransitionResult::new(LoopState::StreamingFinal {
                    segments: segments.clone(),
                })
                .with_effects(segments.into_iter().map(Effect::emit_text))
                .with_effect(Effect::AppendTurn(Turn::assistant(text)))
                .with_effect(Effect::Advance(LoopEvent::FinalStreamed)),
            )
        }

        (
            LoopState::InvokingModel { round },
            LoopEvent::ModelResponded {
                outcome: GenerationOutcome::NeedsTool { calls },
            },
        ) => {
            if *round >= context.max_tool_rounds {
                return Ok(errored(format!(
                    "Stopped after {} tool rounds without a final answer",
                    context.max_tool_rounds
                )));
            }
            let mut calls = calls.into_iter();
            let Some(first) = calls.next() else {
                return Ok(errored("Model requested tools without naming any"));
            };
            Ok(begin_tool(*round + 1, first, calls.collect()))
        }

        (LoopState::InvokingModel { .. }, LoopEvent::ModelFailed { message }) => {
            Ok(errored(message))
        }

        // ============================================================
        // Tool execution
        // ============================================================
        (
            LoopState::ExecutingTools {
                round,
                current,
                remaining,
            },
            LoopEvent::ToolCompleted {
                tool_call_id,
                output,
                is_error,
            },
        ) if tool_call_id == current.id => {
            let finished = TransitionResult::new(LoopState::InvokingModel { round: *round })
                .with_effects(record_result(current, output, is_error));

            match remaining.split_first() {
                None => Ok(finished.with_effect(Effect::RequestModel)),
                Some((next, rest)) => {
                    let advanced = begin_tool(*round, next.clone(), rest.to_vec());
                    Ok(TransitionResult::new(advanced.new_state)
                        .with_effects(finished.effects)
                        .with_effects(advanced.effects))
                }
            }
        }

        // ============================================================
        // Final answer
        // ============================================================
        (LoopState::StreamingFinal { .. }, LoopEvent::FinalStreamed) => Ok(TransitionResult::new(
            LoopState::Terminated {
                outcome: LoopOutcome::Completed,
            },
        )
        .with_effect(Effect::Emit(StreamEvent::Done {
            conversation_id: context.conversation_id.clone(),
        }))),

        // ============================================================
        // Failure and cancellation
        // ============================================================
        (
            LoopState::InvokingModel { .. }
            | LoopState::ExecutingTools { .. }
            | LoopState::StreamingFinal { .. },
            LoopEvent::Failed { message },
        ) => Ok(errored(message)),

        (LoopState::Errored { message }, LoopEvent::ErrorReported) => {
            Ok(TransitionResult::new(LoopState::Terminated {
                outcome: LoopOutcome::Failed {
                    message: message.clone(),
                },
            }))
        }

        (LoopState::InvokingModel { .. } | LoopState::ExecutingTools { .. }, LoopEvent::Cancelled) => {
            Ok(TransitionResult::new(LoopState::Terminated {
                outcome: LoopOutcome::Cancelled,
            })
            .with_effect(Effect::Emit(StreamEvent::error(CANCELLED_MESSAGE))))
        }

        (state, event) => Err(TransitionError::InvalidTransition {
            state: state.name(),
            event: event.name(),
        }),
    }
}

/// Persist, announce and dispatch one tool call. Nothing is written or
/// announced once the caller has cancelled.
fn begin_tool(round: u32, call: ToolCall, remaining: Vec<ToolCall>) -> TransitionResult {
    TransitionResult::new(LoopState::ExecutingTools {
        round,
        current: call.clone(),
        remaining,
    })
    .with_effect(Effect::CheckCancelled)
    .with_effect(Effect::AppendTurn(Turn::AssistantToolCall {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        input: call.input.clone(),
    }))
    .with_effect(Effect::emit_tool_call(&call))
    .with_effect(Effect::DispatchTool(call))
}

fn record_result(call: &ToolCall, output: Value, is_error: bool) -> [Effect; 2] {
    [
        Effect::AppendTurn(Turn::ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: output.clone(),
            is_error,
        }),
        Effect::Emit(StreamEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            result: output,
        }),
    ]
}

fn errored(message: impl Into<String>) -> TransitionResult {
    let message = message.into();
    TransitionResult::new(LoopState::Errored {
        message: message.clone(),
    })
    .with_effect(Effect::Emit(StreamEvent::error(message)))
    .with_effect(Effect::Advance(LoopEvent::ErrorReported))
}

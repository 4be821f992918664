//! Property-based tests for the loop state machine
//!
//! A symbolic driver runs whole loops against scripted model responses and
//! checks the ordering guarantees of the stream and the transcript.

use super::transition::*;
use super::*;
use crate::history::Turn;
use crate::llm::{GenerationOutcome, ToolCall};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{HashSet, VecDeque};

// ============================================================================
// Test Helpers
// ============================================================================

/// What a scripted model call does
#[derive(Debug, Clone)]
enum Scripted {
    Respond(GenerationOutcome),
    Fail(String),
}

#[derive(Debug, Default)]
struct Trace {
    emitted: Vec<StreamEvent>,
    turns: Vec<Turn>,
    model_calls: usize,
    outcome: Option<LoopOutcome>,
}

/// Run a loop to completion with no I/O. Model calls pop from `script`
/// (an exhausted script answers with final text), tool calls succeed or
/// fail according to `tool_errors`, and `cancel_after` cancels before the
/// n-th model or tool call.
fn drive(
    message: &str,
    max_tool_rounds: u32,
    script: Vec<Scripted>,
    tool_errors: &[bool],
    cancel_after: Option<usize>,
) -> Trace {
    let context = LoopContext::new("conv-prop", max_tool_rounds);
    let mut script: VecDeque<_> = script.into();
    let mut tool_errors = tool_errors.iter().copied().cycle();
    let mut trace = Trace::default();
    let mut io_calls = 0usize;

    let started = start(message);
    let mut state = started.new_state;
    let mut pending = started.effects;

    for _ in 0..1000 {
        let mut next = None;
        for effect in pending.drain(..) {
            let event = match effect {
                Effect::AppendTurn(turn) => {
                    trace.turns.push(turn);
                    None
                }
                Effect::Emit(event) => {
                    trace.emitted.push(event);
                    None
                }
                Effect::RequestModel | Effect::DispatchTool(_) | Effect::CheckCancelled
                    if cancel_after.is_some_and(|n| io_calls >= n) =>
                {
                    Some(LoopEvent::Cancelled)
                }
                Effect::CheckCancelled => None,
                Effect::RequestModel => {
                    io_calls += 1;
                    trace.model_calls += 1;
                    Some(match script.pop_front() {
                        Some(Scripted::Respond(outcome)) => LoopEvent::ModelResponded { outcome },
                        Some(Scripted::Fail(message)) => LoopEvent::ModelFailed { message },
                        None => LoopEvent::ModelResponded {
                            outcome: GenerationOutcome::Final {
                                segments: vec!["ok".to_string()],
                            },
                        },
                    })
                }
                Effect::DispatchTool(call) => {
                    io_calls += 1;
                    let is_error = tool_errors.next().unwrap_or(false);
                    Some(LoopEvent::ToolCompleted {
                        tool_call_id: call.id,
                        output: json!({"ok": !is_error}),
                        is_error,
                    })
                }
                Effect::Advance(event) => Some(event),
            };
            if event.is_some() {
                next = event;
                break;
            }
        }

        let Some(event) = next else { break };
        let result = transition(&state, &context, event).expect("driver only sends valid events");
        state = result.new_state;
        pending = result.effects;
    }

    // Effects of the terminal transition
    for effect in pending {
        if let Effect::Emit(event) = effect {
            trace.emitted.push(event);
        }
    }
    trace.outcome = state.outcome().cloned();
    trace
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    (
        "[a-z]{8}",
        prop_oneof![
            Just("search_inventory"),
            Just("create_order"),
            Just("list_suppliers"),
            Just("launch_rockets"),
        ],
    )
        .prop_map(|(id, name)| ToolCall::new(id, name, json!({})))
}

fn arb_scripted() -> impl Strategy<Value = Scripted> {
    prop_oneof![
        3 => proptest::collection::vec(arb_tool_call(), 1..4)
            .prop_map(|calls| Scripted::Respond(GenerationOutcome::NeedsTool { calls })),
        1 => proptest::collection::vec("[a-zA-Z ]{1,12}", 1..4)
            .prop_map(|segments| Scripted::Respond(GenerationOutcome::Final { segments })),
        1 => "[a-z ]{1,20}".prop_map(Scripted::Fail),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// The stream ends with exactly one terminal event and it is the last one
    #[test]
    fn prop_exactly_one_terminal_event_last(
        script in proptest::collection::vec(arb_scripted(), 0..6),
        errors in proptest::collection::vec(any::<bool>(), 1..4),
        max_rounds in 0u32..5,
        cancel_after in proptest::option::of(0usize..8),
    ) {
        let trace = drive("find tomatoes", max_rounds, script, &errors, cancel_after);
        prop_assert!(trace.outcome.is_some());
        let terminal: Vec<_> = trace.emitted.iter().filter(|e| e.is_terminal()).collect();
        prop_assert_eq!(terminal.len(), 1);
        prop_assert!(trace.emitted.last().is_some_and(StreamEvent::is_terminal));
    }

    /// `done` means Completed, `error` means Failed or Cancelled
    #[test]
    fn prop_terminal_event_matches_outcome(
        script in proptest::collection::vec(arb_scripted(), 0..6),
        max_rounds in 0u32..5,
        cancel_after in proptest::option::of(0usize..8),
    ) {
        let trace = drive("hi", max_rounds, script, &[false], cancel_after);
        let last = trace.emitted.last().cloned();
        match trace.outcome {
            Some(LoopOutcome::Completed) => {
                prop_assert!(matches!(last, Some(StreamEvent::Done { .. })), "last event must be done");
            }
            Some(LoopOutcome::Failed { message }) => {
                prop_assert_eq!(last, Some(StreamEvent::Error { message }));
            }
            Some(LoopOutcome::Cancelled) => {
                prop_assert_eq!(last, Some(StreamEvent::error(CANCELLED_MESSAGE)));
            }
            None => prop_assert!(false, "loop did not terminate"),
        }
    }

    /// Every tool result follows its own tool call, in both stream and transcript
    #[test]
    fn prop_tool_results_follow_their_calls(
        script in proptest::collection::vec(arb_scripted(), 0..6),
        errors in proptest::collection::vec(any::<bool>(), 1..4),
        cancel_after in proptest::option::of(0usize..8),
    ) {
        let trace = drive("order basil", 8, script, &errors, cancel_after);

        let mut announced = HashSet::new();
        let mut answered = HashSet::new();
        for event in &trace.emitted {
            match event {
                StreamEvent::ToolCall { id, .. } => { announced.insert(id.clone()); }
                StreamEvent::ToolResult { id, .. } => {
                    prop_assert!(announced.contains(id));
                    answered.insert(id.clone());
                }
                _ => {}
            }
        }
        // Cancellation never leaves an announced tool without its result
        prop_assert_eq!(announced, answered);

        let mut written = HashSet::new();
        for turn in &trace.turns {
            match turn {
                Turn::AssistantToolCall { tool_call_id, .. } => { written.insert(tool_call_id.clone()); }
                Turn::ToolResult { tool_call_id, .. } => prop_assert!(written.contains(tool_call_id)),
                _ => {}
            }
        }
    }

    /// The user turn is written first; assistant text is written at most once, and only on success
    #[test]
    fn prop_transcript_shape(
        script in proptest::collection::vec(arb_scripted(), 0..6),
        max_rounds in 0u32..5,
    ) {
        let trace = drive("need tomatoes", max_rounds, script, &[false, true], None);
        prop_assert_eq!(trace.turns.first(), Some(&Turn::user("need tomatoes")));

        let texts = trace.turns.iter().filter(|t| matches!(t, Turn::AssistantText { .. })).count();
        if trace.outcome == Some(LoopOutcome::Completed) {
            prop_assert_eq!(texts, 1);
            prop_assert!(matches!(trace.turns.last(), Some(Turn::AssistantText { .. })), "transcript must end with the answer");
        } else {
            prop_assert_eq!(texts, 0);
        }
    }

    /// Tool rounds never exceed the cap
    #[test]
    fn prop_round_cap_bounds_model_calls(
        calls in proptest::collection::vec(arb_tool_call(), 1..3),
        max_rounds in 0u32..6,
    ) {
        let script = vec![Scripted::Respond(GenerationOutcome::NeedsTool { calls }); 20];
        let trace = drive("loop forever", max_rounds, script, &[false], None);
        prop_assert_eq!(trace.model_calls, max_rounds as usize + 1);
        prop_assert!(matches!(trace.outcome, Some(LoopOutcome::Failed { .. })), "loop must fail");
    }

    /// Every terminated state rejects further events
    #[test]
    fn prop_terminated_is_absorbing(
        script in proptest::collection::vec(arb_scripted(), 0..4),
    ) {
        let trace = drive("hi", 3, script, &[false], None);
        let state = LoopState::Terminated { outcome: trace.outcome.unwrap_or(LoopOutcome::Cancelled) };
        let context = LoopContext::new("conv-prop", 3);
        prop_assert!(transition(&state, &context, LoopEvent::Cancelled).is_err());
        prop_assert!(transition(&state, &context, LoopEvent::ErrorReported).is_err());
    }
}

#[test]
fn test_unknown_tool_result_continues_loop() {
    let script = vec![
        Scripted::Respond(GenerationOutcome::NeedsTool {
            calls: vec![ToolCall::new("t1", "launch_rockets", json!({}))],
        }),
        Scripted::Respond(GenerationOutcome::Final {
            segments: vec!["That tool does not exist.".to_string()],
        }),
    ];
    let trace = drive("launch", 8, script, &[true], None);
    assert_eq!(trace.outcome, Some(LoopOutcome::Completed));
    let names: Vec<_> = trace.emitted.iter().map(StreamEvent::name).collect();
    assert_eq!(names, vec!["tool_call", "tool_result", "text", "done"]);
}

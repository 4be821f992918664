//! Conversation loop executor
//!
//! Runs the effects the state machine asks for and feeds the resulting
//! events back in until the loop terminates.

use super::emitter::{EmitError, EventEmitter};
use super::traits::{ToolDispatcher, TranscriptStore};
use crate::history::{to_llm_messages, ModelTurn, Turn};
use crate::llm::{LlmRequest, LlmService, SystemContent, ToolCall, ToolDefinition};
use crate::state_machine::{
    start, transition, Effect, LoopContext, LoopEvent, LoopOutcome, LoopState, StreamEvent,
};
use crate::tools::ToolContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// One loop run over one user message
pub struct ConversationLoop<L, S, D>
where
    L: LlmService,
    S: TranscriptStore,
    D: ToolDispatcher + 'static,
{
    context: LoopContext,
    tool_context: ToolContext,
    state: LoopState,
    llm: L,
    transcript: S,
    dispatcher: Arc<D>,
    system: Vec<SystemContent>,
    tools: Vec<ToolDefinition>,
    /// Model-facing turns for the next generation request
    turns: Vec<ModelTurn>,
    emitter: EventEmitter,
    cancel: CancellationToken,
    generation_timeout: Duration,
}

impl<L, S, D> ConversationLoop<L, S, D>
where
    L: LlmService,
    S: TranscriptStore,
    D: ToolDispatcher + 'static,
{
    pub fn new(
        context: LoopContext,
        tool_context: ToolContext,
        llm: L,
        transcript: S,
        dispatcher: Arc<D>,
        emitter: EventEmitter,
        cancel: CancellationToken,
    ) -> Self {
        let tools = dispatcher.definitions(tool_context.scope);
        Self {
            context,
            tool_context,
            state: LoopState::default(),
            llm,
            transcript,
            dispatcher,
            system: Vec::new(),
            tools,
            turns: Vec::new(),
            emitter,
            cancel,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    /// Normalized history, already ending with the new user message
    pub fn with_history(mut self, turns: Vec<ModelTurn>) -> Self {
        self.turns = turns;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system = vec![SystemContent::cached(prompt)];
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Drive the loop to a terminal state
    pub async fn run(mut self, message: &str) -> LoopOutcome {
        let conv_id = self.context.conversation_id.clone();
        tracing::info!(conv_id = %conv_id, tools = self.tools.len(), "Starting conversation loop");

        let started = start(message);
        self.state = started.new_state;
        let mut next = self.execute_effects(started.effects).await;

        while let Some(event) = next {
            let event_name = event.name();
            match transition(&self.state, &self.context, event) {
                Ok(result) => {
                    tracing::debug!(
                        conv_id = %conv_id,
                        from = self.state.name(),
                        to = result.new_state.name(),
                        event = event_name,
                        "Loop transition"
                    );
                    self.state = result.new_state;
                    next = self.execute_effects(result.effects).await;
                }
                Err(e) => {
                    tracing::error!(conv_id = %conv_id, error = %e, "Loop transition rejected");
                    let message = "Internal error while processing the request".to_string();
                    self.emit(StreamEvent::error(message.clone())).await;
                    self.state = LoopState::Terminated {
                        outcome: LoopOutcome::Failed { message },
                    };
                    next = None;
                }
            }
        }

        let outcome = self.state.outcome().cloned().unwrap_or_else(|| LoopOutcome::Failed {
            message: format!("Loop stopped in state {}", self.state.name()),
        });
        tracing::info!(conv_id = %conv_id, outcome = ?outcome, "Conversation loop finished");
        outcome
    }

    /// Run effects in order. An effect that yields an event ends the batch.
    async fn execute_effects(&mut self, effects: Vec<Effect>) -> Option<LoopEvent> {
        for effect in effects {
            if let Some(event) = self.execute_effect(effect).await {
                return Some(event);
            }
        }
        None
    }

    async fn execute_effect(&mut self, effect: Effect) -> Option<LoopEvent> {
        match effect {
            Effect::AppendTurn(turn) => {
                if let Err(e) = self
                    .transcript
                    .append_turn(&self.context.conversation_id, &turn)
                    .await
                {
                    tracing::error!(conv_id = %self.context.conversation_id, error = %e, "Failed to append turn");
                    return Some(LoopEvent::Failed {
                        message: format!("Failed to save conversation: {e}"),
                    });
                }
                // The user message is already part of the normalized history,
                // and nothing is requested after the final text.
                if matches!(turn, Turn::AssistantToolCall { .. } | Turn::ToolResult { .. }) {
                    self.turns.push(turn.to_model_turn());
                }
                None
            }

            Effect::Emit(event) => {
                self.emit(event).await;
                None
            }

            Effect::RequestModel => Some(if self.should_stop() {
                LoopEvent::Cancelled
            } else {
                self.request_model().await
            }),

            Effect::CheckCancelled => self.should_stop().then_some(LoopEvent::Cancelled),

            Effect::DispatchTool(call) => Some(if self.should_stop() {
                LoopEvent::Cancelled
            } else {
                self.dispatch_tool(call).await
            }),

            Effect::Advance(event) => Some(event),
        }
    }

    async fn emit(&mut self, event: StreamEvent) {
        let name = event.name();
        match self.emitter.emit(event).await {
            Ok(()) => {}
            Err(EmitError::Disconnected) => {
                tracing::info!(conv_id = %self.context.conversation_id, "Stream consumer went away, cancelling loop");
                self.cancel.cancel();
            }
            Err(EmitError::Closed) => {
                tracing::debug!(conv_id = %self.context.conversation_id, event = name, "Dropped event after stream close");
            }
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.emitter.is_disconnected()
    }

    async fn request_model(&self) -> LoopEvent {
        let request = LlmRequest {
            system: self.system.clone(),
            messages: to_llm_messages(&self.turns),
            tools: self.tools.clone(),
            max_tokens: None,
        };
        let call = tokio::time::timeout(self.generation_timeout, self.llm.complete(&request));

        tokio::select! {
            biased;

            () = self.cancel.cancelled() => LoopEvent::Cancelled,
            () = self.emitter.disconnected() => LoopEvent::Cancelled,

            result = call => match result {
                Err(_) => {
                    tracing::warn!(
                        conv_id = %self.context.conversation_id,
                        timeout_secs = self.generation_timeout.as_secs(),
                        "Generation request timed out"
                    );
                    LoopEvent::ModelFailed {
                        message: format!(
                            "The assistant did not respond within {} seconds",
                            self.generation_timeout.as_secs()
                        ),
                    }
                }
                Ok(Err(e)) => LoopEvent::ModelFailed { message: e.message },
                Ok(Ok(response)) => match response.outcome() {
                    Ok(outcome) => LoopEvent::ModelResponded { outcome },
                    Err(e) => LoopEvent::ModelFailed { message: e.message },
                },
            },
        }
    }

    /// Run one tool on its own task so a panicking handler cannot take the loop down
    async fn dispatch_tool(&self, call: ToolCall) -> LoopEvent {
        let ToolCall { id, name, input } = call;
        let dispatcher = Arc::clone(&self.dispatcher);
        let ctx = self.tool_context.clone();
        let tool_name = name.clone();

        let handle =
            tokio::spawn(async move { dispatcher.dispatch(&tool_name, input, &ctx).await });

        match handle.await {
            Ok(Ok(output)) => LoopEvent::ToolCompleted {
                tool_call_id: id,
                output,
                is_error: false,
            },
            Ok(Err(err)) => {
                tracing::info!(tool = %name, kind = ?err.kind, error = %err, "Tool returned an error");
                LoopEvent::ToolCompleted {
                    tool_call_id: id,
                    output: err.to_output(),
                    is_error: true,
                }
            }
            Err(join_error) => {
                tracing::error!(tool = %name, error = %join_error, "Tool task failed");
                LoopEvent::Failed {
                    message: format!("Tool {name} failed unexpectedly"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::normalize_history;
    use crate::llm::{LlmError, LlmResponse};
    use crate::runtime::testing::{MockDispatcher, MockLlmClient, MockTranscript};
    use crate::tools::{AccessScope, ToolError};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        llm: Arc<MockLlmClient>,
        transcript: Arc<MockTranscript>,
        dispatcher: Arc<MockDispatcher>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                llm: Arc::new(MockLlmClient::new("mock-model")),
                transcript: Arc::new(MockTranscript::new()),
                dispatcher: Arc::new(MockDispatcher::new()),
                cancel: CancellationToken::new(),
            }
        }

        fn build(
            &self,
            max_tool_rounds: u32,
        ) -> (
            ConversationLoop<Arc<MockLlmClient>, Arc<MockTranscript>, MockDispatcher>,
            mpsc::Receiver<StreamEvent>,
        ) {
            let (emitter, rx) = EventEmitter::channel(64);
            let tool_context = ToolContext {
                user_id: "u1".to_string(),
                restaurant_id: "r1".to_string(),
                scope: AccessScope::Staff,
                conversation_id: "c1".to_string(),
            };
            let conversation_loop = ConversationLoop::new(
                LoopContext::new("c1", max_tool_rounds),
                tool_context,
                Arc::clone(&self.llm),
                Arc::clone(&self.transcript),
                Arc::clone(&self.dispatcher),
                emitter,
                self.cancel.clone(),
            )
            .with_history(normalize_history(&[], "find tomatoes"))
            .with_system_prompt("You help restaurants buy things.");
            (conversation_loop, rx)
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::name).collect()
    }

    #[tokio::test]
    async fn test_final_response_streams_text_then_done() {
        let h = Harness::new();
        h.llm
            .queue_response(LlmResponse::final_text(&["Tomatoes are ", "in stock."]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(outcome, LoopOutcome::Completed);
        assert_eq!(names(&events), vec!["text", "text", "done"]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                conversation_id: "c1".to_string()
            })
        );
        assert_eq!(
            h.transcript.turns("c1"),
            vec![Turn::user("find tomatoes"), Turn::assistant("Tomatoes are in stock.")]
        );
    }

    #[tokio::test]
    async fn test_tool_round_then_final() {
        let h = Harness::new();
        h.dispatcher
            .respond("search_inventory", Ok(json!({"items": [{"id": 1, "name": "Roma tomatoes"}]})));
        h.llm.queue_response(LlmResponse::tool_calls(vec![ToolCall::new(
            "t1",
            "search_inventory",
            json!({"query": "tomato"}),
        )]));
        h.llm
            .queue_response(LlmResponse::final_text(&["You have Roma tomatoes."]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(outcome, LoopOutcome::Completed);
        assert_eq!(names(&events), vec!["tool_call", "tool_result", "text", "done"]);

        let kinds: Vec<_> = h
            .transcript
            .turns("c1")
            .iter()
            .map(|t| match t {
                Turn::UserText { .. } => "user",
                Turn::AssistantText { .. } => "assistant",
                Turn::AssistantToolCall { .. } => "tool_call",
                Turn::ToolResult { .. } => "tool_result",
            })
            .collect();
        assert_eq!(kinds, vec!["user", "tool_call", "tool_result", "assistant"]);

        // Second request carries the tool call and its result
        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].tools.len(), h.dispatcher.definitions(AccessScope::Staff).len());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_handed_back_to_model() {
        let h = Harness::new();
        h.llm.queue_response(LlmResponse::tool_calls(vec![ToolCall::new(
            "t1",
            "launch_rockets",
            json!({}),
        )]));
        h.llm
            .queue_response(LlmResponse::final_text(&["I can't do that."]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(outcome, LoopOutcome::Completed);
        assert_eq!(
            events[1],
            StreamEvent::ToolResult {
                id: "t1".to_string(),
                name: "launch_rockets".to_string(),
                result: ToolError::unknown_tool("launch_rockets").to_output(),
            }
        );
        assert_eq!(names(&events), vec!["tool_call", "tool_result", "text", "done"]);
    }

    #[tokio::test]
    async fn test_generation_failure_emits_only_error() {
        let h = Harness::new();
        h.llm.queue_error(LlmError::server_error("overloaded"));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(events, vec![StreamEvent::error("overloaded")]);
        assert!(matches!(outcome, LoopOutcome::Failed { .. }));
        assert!(!h
            .transcript
            .turns("c1")
            .iter()
            .any(|t| matches!(t, Turn::AssistantText { .. })));
    }

    #[tokio::test]
    async fn test_malformed_response_is_generation_error() {
        let h = Harness::new();
        h.llm.queue_response(LlmResponse::default());
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(names(&events), vec!["error"]);
        assert!(matches!(outcome, LoopOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_round_cap_stops_runaway_tool_use() {
        let h = Harness::new();
        for i in 0..5 {
            h.llm.queue_response(LlmResponse::tool_calls(vec![ToolCall::new(
                format!("t{i}"),
                "list_orders",
                json!({}),
            )]));
        }
        let (conversation_loop, rx) = h.build(2);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert!(matches!(outcome, LoopOutcome::Failed { .. }));
        assert_eq!(
            names(&events),
            vec!["tool_call", "tool_result", "tool_call", "tool_result", "error"]
        );
        assert_eq!(h.llm.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_generation_timeout_is_generation_error() {
        let h = Harness::new();
        h.llm.set_delay(Duration::from_secs(5));
        h.llm.queue_response(LlmResponse::final_text(&["too late"]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop
            .with_generation_timeout(Duration::from_millis(20))
            .run("find tomatoes")
            .await;
        let events = drain(rx).await;

        assert_eq!(names(&events), vec!["error"]);
        assert!(matches!(outcome, LoopOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_before_model_call() {
        let h = Harness::new();
        h.llm.queue_response(LlmResponse::final_text(&["unused"]));
        h.cancel.cancel();
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(outcome, LoopOutcome::Cancelled);
        assert_eq!(events, vec![StreamEvent::error("Request cancelled")]);
        assert!(h.llm.recorded_requests().is_empty());
        // The user's message stays persisted
        assert_eq!(h.transcript.turns("c1"), vec![Turn::user("find tomatoes")]);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_keeps_completed_turns() {
        let h = Harness::new();
        h.dispatcher.cancel_on_dispatch(h.cancel.clone());
        h.llm.queue_response(LlmResponse::tool_calls(vec![
            ToolCall::new("t1", "create_order", json!({"supplier_id": 1})),
            ToolCall::new("t2", "list_orders", json!({})),
        ]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("order tomatoes").await;
        let events = drain(rx).await;

        assert_eq!(outcome, LoopOutcome::Cancelled);
        assert_eq!(names(&events), vec!["tool_call", "tool_result", "error"]);
        assert_eq!(h.dispatcher.recorded_calls(), vec!["create_order".to_string()]);
        let announced: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(announced, vec!["t1"]);

        // The finished tool's result is kept; the second call is never written
        let turns = h.transcript.turns("c1");
        assert_eq!(turns.len(), 3);
        assert!(matches!(turns[2], Turn::ToolResult { ref tool_call_id, .. } if tool_call_id == "t1"));
        assert!(!turns.iter().any(
            |t| matches!(t, Turn::AssistantToolCall { tool_call_id, .. } if tool_call_id == "t2")
        ));
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_loop() {
        let h = Harness::new();
        h.llm.queue_response(LlmResponse::final_text(&["nobody listens"]));
        let (conversation_loop, rx) = h.build(8);
        drop(rx);

        let outcome = conversation_loop.run("find tomatoes").await;
        assert_eq!(outcome, LoopOutcome::Cancelled);
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_tool_fails_loop() {
        let h = Harness::new();
        h.dispatcher.panic_on("adjust_inventory");
        h.llm.queue_response(LlmResponse::tool_calls(vec![ToolCall::new(
            "t1",
            "adjust_inventory",
            json!({"item_id": 1, "delta": -2}),
        )]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("used two").await;
        let events = drain(rx).await;

        assert!(matches!(outcome, LoopOutcome::Failed { .. }));
        assert_eq!(names(&events), vec!["tool_call", "error"]);
    }

    #[tokio::test]
    async fn test_transcript_failure_fails_loop() {
        let h = Harness::new();
        h.transcript.fail_appends();
        h.llm.queue_response(LlmResponse::final_text(&["unused"]));
        let (conversation_loop, rx) = h.build(8);

        let outcome = conversation_loop.run("find tomatoes").await;
        let events = drain(rx).await;

        assert!(matches!(outcome, LoopOutcome::Failed { .. }));
        assert_eq!(names(&events), vec!["error"]);
        assert!(h.llm.recorded_requests().is_empty());
    }
}

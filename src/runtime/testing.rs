//! Mock implementations for testing
//!
//! These mocks enable loop testing without real I/O.

use super::traits::{ToolDispatcher, TranscriptStore};
use crate::history::Turn;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ToolDefinition};
use crate::tools::{AccessScope, ToolContext, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock generation service that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    delay: Mutex<Option<Duration>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Sleep this long before answering each request
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Transcript
// ============================================================================

/// In-memory transcript keyed by conversation
#[derive(Default)]
pub struct MockTranscript {
    turns: Mutex<HashMap<String, Vec<Turn>>>,
    fail_appends: AtomicBool,
}

impl MockTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later append fail
    pub fn fail_appends(&self) {
        self.fail_appends.store(true, Ordering::SeqCst);
    }

    pub fn turns(&self, conversation_id: &str) -> Vec<Turn> {
        self.turns
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TranscriptStore for MockTranscript {
    async fn append_turn(&self, conversation_id: &str, turn: &Turn) -> Result<(), String> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err("disk full".to_string());
        }
        self.turns
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn load_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>, String> {
        let turns = self.turns(conversation_id);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }
}

// ============================================================================
// Mock Dispatcher
// ============================================================================

/// Dispatcher with canned results per tool name.
/// Names without a canned result dispatch as `UNKNOWN_TOOL`.
#[derive(Default)]
pub struct MockDispatcher {
    results: Mutex<HashMap<String, Result<Value, ToolError>>>,
    panics: Mutex<HashSet<String>>,
    cancel_on_dispatch: Mutex<Option<CancellationToken>>,
    /// Tool names in dispatch order
    pub calls: Mutex<Vec<String>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, name: &str, result: Result<Value, ToolError>) {
        self.results
            .lock()
            .unwrap()
            .insert(name.to_string(), result);
    }

    pub fn panic_on(&self, name: &str) {
        self.panics.lock().unwrap().insert(name.to_string());
    }

    /// Cancel `token` from inside the first dispatch, simulating an abort
    /// that arrives while a tool is running
    pub fn cancel_on_dispatch(&self, token: CancellationToken) {
        *self.cancel_on_dispatch.lock().unwrap() = Some(token);
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolDispatcher for MockDispatcher {
    async fn dispatch(&self, name: &str, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push(name.to_string());
        if let Some(token) = self.cancel_on_dispatch.lock().unwrap().take() {
            token.cancel();
        }
        assert!(!self.panics.lock().unwrap().contains(name), "tool {name} exploded");
        self.results
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(ToolError::unknown_tool(name)))
    }

    fn definitions(&self, _scope: AccessScope) -> Vec<ToolDefinition> {
        let mut names: Vec<_> = self.results.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolDefinition {
                description: format!("Mock {name}"),
                name,
                input_schema: json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }
}

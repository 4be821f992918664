//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, TurnRecord};
use crate::history::Turn;
use crate::llm::ToolDefinition;
use crate::tools::{AccessScope, ToolContext, ToolError, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Append-only transcript storage
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Persist one turn at the end of the conversation
    async fn append_turn(&self, conversation_id: &str, turn: &Turn) -> Result<(), String>;

    /// The most recent `limit` turns, oldest first
    async fn load_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>, String>;
}

/// Executes tool calls on behalf of the loop
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Run a tool by name. Unknown names come back as `UNKNOWN_TOOL`.
    async fn dispatch(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Tool manifest for the given scope
    fn definitions(&self, scope: AccessScope) -> Vec<ToolDefinition>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: TranscriptStore + ?Sized> TranscriptStore for Arc<T> {
    async fn append_turn(&self, conversation_id: &str, turn: &Turn) -> Result<(), String> {
        (**self).append_turn(conversation_id, turn).await
    }

    async fn load_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>, String> {
        (**self).load_recent(conversation_id, limit).await
    }
}

#[async_trait]
impl<T: ToolDispatcher + ?Sized> ToolDispatcher for Arc<T> {
    async fn dispatch(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        (**self).dispatch(name, input, ctx).await
    }

    fn definitions(&self, scope: AccessScope) -> Vec<ToolDefinition> {
        (**self).definitions(scope)
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as the transcript store
#[derive(Clone)]
pub struct DatabaseTranscript {
    db: Database,
}

impl DatabaseTranscript {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TranscriptStore for DatabaseTranscript {
    async fn append_turn(&self, conversation_id: &str, turn: &Turn) -> Result<(), String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .append_turn(&id, conversation_id, turn)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn load_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>, String> {
        self.db
            .get_recent_turns(conversation_id, limit)
            .map_err(|e| e.to_string())?
            .iter()
            .map(TurnRecord::to_turn)
            .collect()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        ToolRegistry::dispatch(self, name, input, ctx).await
    }

    fn definitions(&self, scope: AccessScope) -> Vec<ToolDefinition> {
        ToolRegistry::definitions(self, scope)
    }
}

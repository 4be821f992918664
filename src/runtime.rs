//! Runtime for executing conversation loops
//!
//! One loop runs per inbound user message. [`RuntimeManager`] starts them,
//! keeps at most one running per conversation, and lets callers cancel.

mod emitter;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use emitter::EventEmitter;
pub use executor::{ConversationLoop, DEFAULT_GENERATION_TIMEOUT};
pub use traits::*;

use crate::db::{Database, DbError};
use crate::history::normalize_history;
use crate::llm::{LlmService, ToolDefinition};
use crate::state_machine::{LoopContext, StreamEvent};
use crate::system_prompt::build_system_prompt;
use crate::tools::{AccessScope, ToolContext, ToolRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Stream buffer per loop; the loop waits when the consumer falls behind
const EVENT_BUFFER: usize = 64;

/// Knobs for every loop the manager starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub max_tool_rounds: u32,
    pub generation_timeout: Duration,
    /// Stored turns loaded as history for each new message
    pub history_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            history_limit: 100,
        }
    }
}

/// Who is talking, as established by the surrounding session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub restaurant_id: String,
    pub scope: AccessScope,
}

impl Caller {
    pub fn tool_context(&self, conversation_id: &str) -> ToolContext {
        ToolContext {
            user_id: self.user_id.clone(),
            restaurant_id: self.restaurant_id.clone(),
            scope: self.scope,
            conversation_id: conversation_id.to_string(),
        }
    }
}

/// Failures surfaced before any loop starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("{0}")]
    Input(String),
    #[error("The assistant is not configured")]
    Configuration,
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("A reply is already being generated for conversation {0}")]
    Busy(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// A started loop: the conversation it writes to and its event stream
#[derive(Debug)]
pub struct ChatStream {
    pub conversation_id: String,
    pub events: mpsc::Receiver<StreamEvent>,
}

type ActiveLoops = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Marks a conversation busy until dropped
struct ActiveGuard {
    active: ActiveLoops,
    conversation_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.conversation_id);
    }
}

/// Manager for all conversation loops
pub struct RuntimeManager {
    db: Database,
    llm: Option<Arc<dyn LlmService>>,
    tools: Arc<ToolRegistry>,
    config: RuntimeConfig,
    active: ActiveLoops,
}

impl RuntimeManager {
    pub fn new(
        db: Database,
        llm: Option<Arc<dyn LlmService>>,
        tools: Arc<ToolRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            db,
            llm,
            tools,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate a new user message and start a loop for it.
    ///
    /// Without a conversation id a new conversation is created for the
    /// caller. Conversations owned by someone else are reported as missing.
    pub async fn start_chat(
        &self,
        caller: &Caller,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatStream, StartError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(StartError::Input("Message must not be empty".to_string()));
        }
        let llm = self.llm.clone().ok_or(StartError::Configuration)?;

        let conversation_id = match conversation_id {
            Some(id) => self.owned_conversation(caller, id)?,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.db
                    .create_conversation(&id, &caller.user_id, &caller.restaurant_id)
                    .map_err(|e| StartError::Storage(e.to_string()))?;
                tracing::info!(conv_id = %id, user_id = %caller.user_id, "Created conversation");
                id
            }
        };

        let cancel = CancellationToken::new();
        let guard = self.claim(&conversation_id, cancel.clone())?;

        let transcript = DatabaseTranscript::new(self.db.clone());
        let stored = transcript
            .load_recent(&conversation_id, self.config.history_limit)
            .await
            .map_err(StartError::Storage)?;
        let history = normalize_history(&stored, message);

        let (emitter, events) = EventEmitter::channel(EVENT_BUFFER);
        let conversation_loop = ConversationLoop::new(
            LoopContext::new(&conversation_id, self.config.max_tool_rounds),
            caller.tool_context(&conversation_id),
            llm,
            transcript,
            Arc::clone(&self.tools),
            emitter,
            cancel,
        )
        .with_history(history)
        .with_system_prompt(build_system_prompt(&caller.restaurant_id, caller.scope))
        .with_generation_timeout(self.config.generation_timeout);

        let message = message.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            conversation_loop.run(&message).await;
        });

        Ok(ChatStream {
            conversation_id,
            events,
        })
    }

    /// Cancel the running loop of a conversation. Returns false when none runs.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(conversation_id) {
            Some(token) => {
                tracing::info!(conv_id = %conversation_id, "Cancelling conversation loop");
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(conversation_id)
    }

    /// Tool manifest visible to a caller
    pub fn tool_definitions(&self, scope: AccessScope) -> Vec<ToolDefinition> {
        self.tools.definitions(scope)
    }

    pub fn is_configured(&self) -> bool {
        self.llm.is_some()
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Look up a conversation the caller may write to
    pub fn owned_conversation(&self, caller: &Caller, id: &str) -> Result<String, StartError> {
        match self.db.get_conversation(id) {
            Ok(conv) if conv.is_owned_by(&caller.user_id, &caller.restaurant_id) => Ok(conv.id),
            Ok(_) | Err(DbError::ConversationNotFound(_)) => {
                Err(StartError::ConversationNotFound(id.to_string()))
            }
            Err(e) => Err(StartError::Storage(e.to_string())),
        }
    }

    /// Single-writer guard: at most one loop per conversation
    fn claim(&self, conversation_id: &str, cancel: CancellationToken) -> Result<ActiveGuard, StartError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(conversation_id) {
            tracing::warn!(conv_id = %conversation_id, "Rejected message while a loop is running");
            return Err(StartError::Busy(conversation_id.to_string()));
        }
        active.insert(conversation_id.to_string(), cancel);
        Ok(ActiveGuard {
            active: Arc::clone(&self.active),
            conversation_id: conversation_id.to_string(),
        })
    }
}

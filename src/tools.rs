//! Tools the assistant can call on the operator's procurement data
//!
//! Tools are stateless singletons keyed by name. Everything a call needs
//! about the caller arrives through [`ToolContext`]; tools never emit
//! stream events or write transcript turns.

mod inventory;
mod orders;
mod suppliers;

pub use inventory::{AdjustInventoryTool, SearchInventoryTool};
pub use orders::{CreateOrderTool, ListOrdersTool, UpdateOrderStatusTool};
pub use suppliers::{AddSupplierTool, ListSuppliersTool};

use crate::db::{Database, DbError};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// What a caller is allowed to see and do through tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    #[default]
    Staff,
    Manager,
}

impl AccessScope {
    pub fn allows(self, required: AccessScope) -> bool {
        self >= required
    }
}

/// Caller context passed into every tool call. Never mutated by tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub user_id: String,
    pub restaurant_id: String,
    pub scope: AccessScope,
    pub conversation_id: String,
}

/// Classification of a tool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidInput,
    NotFound,
    Failed,
}

/// A structured tool failure handed back to the model
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ToolErrorKind::UnknownTool, format!("Unknown tool: {name}"))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidInput, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Failed, message)
    }

    /// Encode as tool output, the form the model and the client receive
    pub fn to_output(&self) -> Value {
        json!({ "error": self })
    }
}

impl From<DbError> for ToolError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) | DbError::ConversationNotFound(_) => {
                ToolError::new(ToolErrorKind::NotFound, err.to_string())
            }
            DbError::Invalid(message) => ToolError::invalid_input(message),
            DbError::Sqlite(_) | DbError::Serialization(_) => ToolError::failed(err.to_string()),
        }
    }
}

/// Deserialize a tool's typed input
pub(crate) fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::invalid_input(format!("Invalid input: {e}")))
}

/// Serialize a tool's typed output
pub(crate) fn to_output<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::failed(format!("Unserializable output: {e}")))
}

/// Trait for tools that can be executed by the assistant
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &'static str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Lowest scope that may see and call this tool
    fn required_scope(&self) -> AccessScope {
        AccessScope::Staff
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Static name-to-handler mapping
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard procurement tool set over the given database
    pub fn procurement(db: &Database) -> Self {
        Self::new()
            .with_tool(SearchInventoryTool::new(db.clone()))
            .with_tool(AdjustInventoryTool::new(db.clone()))
            .with_tool(ListSuppliersTool::new(db.clone()))
            .with_tool(AddSupplierTool::new(db.clone()))
            .with_tool(CreateOrderTool::new(db.clone()))
            .with_tool(ListOrdersTool::new(db.clone()))
            .with_tool(UpdateOrderStatusTool::new(db.clone()))
    }

    /// Register a tool; a later tool with the same name replaces the earlier one
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.insert(tool.name(), Arc::new(tool));
        self
    }

    fn visible(&self, name: &str, scope: AccessScope) -> Option<&Arc<dyn Tool>> {
        self.tools
            .get(name)
            .filter(|tool| scope.allows(tool.required_scope()))
    }

    /// Manifest of tools visible to a caller scope, ordered by name
    pub fn definitions(&self, scope: AccessScope) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|tool| scope.allows(tool.required_scope()))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name.
    ///
    /// Names that are not registered, or not visible to the caller's scope,
    /// yield `UNKNOWN_TOOL` instead of failing the caller.
    pub async fn dispatch(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let Some(tool) = self.visible(name, ctx.scope) else {
            tracing::warn!(tool = %name, scope = ?ctx.scope, "Rejected unknown tool");
            return Err(ToolError::unknown_tool(name));
        };

        let start = std::time::Instant::now();
        let result = tool.run(input, ctx).await;
        tracing::info!(
            tool = %name,
            conv_id = %ctx.conversation_id,
            duration_ms = %start.elapsed().as_millis(),
            success = result.is_ok(),
            "Tool executed"
        );
        result
    }
}

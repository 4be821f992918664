//! Database schema and record types

use crate::history::Turn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    restaurant_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(restaurant_id, user_id);

CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    text_content TEXT,
    tool_call_id TEXT,
    tool_name TEXT,
    tool_input TEXT,
    tool_result TEXT,
    is_error BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id),
    UNIQUE (conversation_id, sequence_id)
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, sequence_id);

CREATE TABLE IF NOT EXISTS suppliers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    contact_email TEXT,
    phone TEXT
);

CREATE TABLE IF NOT EXISTS inventory_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    unit TEXT NOT NULL,
    quantity REAL NOT NULL DEFAULT 0,
    par_level REAL NOT NULL DEFAULT 0,
    supplier_id INTEGER,

    FOREIGN KEY (supplier_id) REFERENCES suppliers(id)
);

CREATE INDEX IF NOT EXISTS idx_inventory_restaurant ON inventory_items(restaurant_id);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id TEXT NOT NULL,
    supplier_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    note TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (supplier_id) REFERENCES suppliers(id)
);

CREATE TABLE IF NOT EXISTS order_lines (
    order_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    quantity REAL NOT NULL,

    FOREIGN KEY (order_id) REFERENCES orders(id),
    FOREIGN KEY (item_id) REFERENCES inventory_items(id)
);
";

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub restaurant_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_owned_by(&self, user_id: &str, restaurant_id: &str) -> bool {
        self.user_id == user_id && self.restaurant_id == restaurant_id
    }
}

/// Role column of a persisted turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            "tool" => Ok(TurnRole::Tool),
            other => Err(format!("unknown turn role: {other}")),
        }
    }
}

/// Persisted transcript record, one per turn.
///
/// An assistant record with a tool name is a tool call; without one it is
/// assistant text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub id: String,
    pub conversation_id: String,
    pub sequence_id: i64,
    pub role: TurnRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

/// Column values for one turn, before an id and sequence are assigned
#[derive(Debug, Clone, PartialEq)]
pub struct TurnColumns {
    pub role: TurnRole,
    pub text_content: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_result: Option<Value>,
    pub is_error: bool,
}

impl From<&Turn> for TurnColumns {
    fn from(turn: &Turn) -> Self {
        let empty = |role| TurnColumns {
            role,
            text_content: None,
            tool_call_id: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            is_error: false,
        };
        match turn {
            Turn::UserText { text } => TurnColumns {
                text_content: Some(text.clone()),
                ..empty(TurnRole::User)
            },
            Turn::AssistantText { text } => TurnColumns {
                text_content: Some(text.clone()),
                ..empty(TurnRole::Assistant)
            },
            Turn::AssistantToolCall {
                tool_call_id,
                tool_name,
                input,
            } => TurnColumns {
                tool_call_id: Some(tool_call_id.clone()),
                tool_name: Some(tool_name.clone()),
                tool_input: Some(input.clone()),
                ..empty(TurnRole::Assistant)
            },
            Turn::ToolResult {
                tool_call_id,
                tool_name,
                output,
                is_error,
            } => TurnColumns {
                tool_call_id: Some(tool_call_id.clone()),
                tool_name: Some(tool_name.clone()),
                tool_result: Some(output.clone()),
                is_error: *is_error,
                ..empty(TurnRole::Tool)
            },
        }
    }
}

impl TurnRecord {
    /// Rebuild the turn this record was written from
    pub fn to_turn(&self) -> Result<Turn, String> {
        let missing = |field: &str| format!("turn {} is missing {field}", self.id);
        match (self.role, &self.tool_name) {
            (TurnRole::User, _) => Ok(Turn::UserText {
                text: self.text_content.clone().unwrap_or_default(),
            }),
            (TurnRole::Assistant, None) => Ok(Turn::AssistantText {
                text: self.text_content.clone().unwrap_or_default(),
            }),
            (TurnRole::Assistant, Some(name)) => Ok(Turn::AssistantToolCall {
                tool_call_id: self.tool_call_id.clone().ok_or_else(|| missing("tool_call_id"))?,
                tool_name: name.clone(),
                input: self.tool_input.clone().unwrap_or(Value::Null),
            }),
            (TurnRole::Tool, name) => Ok(Turn::ToolResult {
                tool_call_id: self.tool_call_id.clone().ok_or_else(|| missing("tool_call_id"))?,
                tool_name: name.clone().ok_or_else(|| missing("tool_name"))?,
                output: self.tool_result.clone().unwrap_or(Value::Null),
                is_error: self.is_error,
            }),
        }
    }
}

// ============================================================
// Procurement records
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
    pub id: i64,
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub par_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<i64>,
}

impl InventoryItem {
    pub fn is_below_par(&self) -> bool {
        self.quantity < self.par_level
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Submitted,
    Received,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Received => "received",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(OrderStatus::Draft),
            "submitted" => Ok(OrderStatus::Submitted),
            "received" => Ok(OrderStatus::Received),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    pub item_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub supplier_id: i64,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

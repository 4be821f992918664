//! Database module
//!
//! Persistence for conversations, their append-only transcripts, and the
//! restaurant procurement data the tools operate on.

mod procurement;
mod schema;

pub use procurement::NewOrderLine;
pub use schema::*;

use crate::history::Turn;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// A panic while holding the lock cannot leave a half-applied
    /// statement behind, so a poisoned connection is still usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Conversation Operations ====================

    /// Create a new conversation owned by a user of a restaurant
    pub fn create_conversation(
        &self,
        id: &str,
        user_id: &str,
        restaurant_id: &str,
    ) -> DbResult<Conversation> {
        let now = Utc::now();
        self.lock().execute(
            "INSERT INTO conversations (id, user_id, restaurant_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, user_id, restaurant_id, now.to_rfc3339()],
        )?;

        Ok(Conversation {
            id: id.to_string(),
            user_id: user_id.to_string(),
            restaurant_id: restaurant_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        self.lock()
            .query_row(
                "SELECT id, user_id, restaurant_id, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        restaurant_id: row.get(2)?,
                        created_at: parse_datetime(&row.get::<_, String>(3)?),
                        updated_at: parse_datetime(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| DbError::ConversationNotFound(id.to_string()))
    }

    // ==================== Transcript Operations ====================

    /// Append a turn to the end of a conversation's transcript
    pub fn append_turn(&self, id: &str, conversation_id: &str, turn: &Turn) -> DbResult<TurnRecord> {
        let columns = TurnColumns::from(turn);
        let tool_input = columns.tool_input.as_ref().map(serde_json::to_string).transpose()?;
        let tool_result = columns.tool_result.as_ref().map(serde_json::to_string).transpose()?;
        let now = Utc::now();

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), conversation_id],
        )?;
        if updated == 0 {
            return Err(DbError::ConversationNotFound(conversation_id.to_string()));
        }

        let sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM turns WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO turns (id, conversation_id, sequence_id, role, text_content, tool_call_id,
                                tool_name, tool_input, tool_result, is_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                conversation_id,
                sequence_id,
                columns.role.to_string(),
                columns.text_content,
                columns.tool_call_id,
                columns.tool_name,
                tool_input,
                tool_result,
                columns.is_error,
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(TurnRecord {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sequence_id,
            role: columns.role,
            text_content: columns.text_content,
            tool_call_id: columns.tool_call_id,
            tool_name: columns.tool_name,
            tool_input: columns.tool_input,
            tool_result: columns.tool_result,
            is_error: columns.is_error,
            created_at: now,
        })
    }

    /// All turns of a conversation in append order
    pub fn get_turns(&self, conversation_id: &str) -> DbResult<Vec<TurnRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, role, text_content, tool_call_id,
                    tool_name, tool_input, tool_result, is_error, created_at
             FROM turns WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], turn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// The most recent `limit` turns of a conversation, oldest first
    pub fn get_recent_turns(&self, conversation_id: &str, limit: usize) -> DbResult<Vec<TurnRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM (
                SELECT id, conversation_id, sequence_id, role, text_content, tool_call_id,
                       tool_name, tool_input, tool_result, is_error, created_at
                FROM turns WHERE conversation_id = ?1
                ORDER BY sequence_id DESC LIMIT ?2
             ) ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit], turn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<TurnRecord> {
    let role: String = row.get(3)?;
    let role = role.parse::<TurnRole>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(TurnRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence_id: row.get(2)?,
        role,
        text_content: row.get(4)?,
        tool_call_id: row.get(5)?,
        tool_name: row.get(6)?,
        tool_input: parse_json_column(row, 7)?,
        tool_result: parse_json_column(row, 8)?,
        is_error: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn parse_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
            })
        })
        .transpose()
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

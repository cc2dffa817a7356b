//! Ledger store for the finance bot
//!
//! Durable users and operations, plus the optional session table used by
//! the persistent session backend. Every write touches a single row.

mod schema;

pub use schema::*;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("User already registered: {0}")]
    UserExists(ChatId),
    #[error("Operation not found: {0}")]
    OperationNotFound(i64),
    #[error("Required table unavailable: {table}: {source}")]
    TableUnavailable {
        table: &'static str,
        source: rusqlite::Error,
    },
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type DbResult<T> = Result<T, DbError>;

const OPERATION_COLUMNS: &str = "id, chat_id, type_operation, sum, date";

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

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Probe every table the bot needs. Called once at startup; a failure
    /// means the process must not start serving.
    pub fn verify_tables(&self) -> DbResult<()> {
        let conn = self.conn()?;
        for table in REQUIRED_TABLES {
            conn.query_row(&format!("SELECT 1 FROM {table} LIMIT 1"), [], |_| Ok(()))
                .optional()
                .map_err(|source| DbError::TableUnavailable { table, source })?;
        }
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn user_exists(&self, chat_id: ChatId) -> DbResult<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE chat_id = ?1)",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Register a user. Fails with `UserExists` if the chat is already known.
    pub fn create_user(&self, chat_id: ChatId, name: &str) -> DbResult<User> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO users (chat_id, name) VALUES (?1, ?2) ON CONFLICT (chat_id) DO NOTHING",
            params![chat_id, name],
        )?;

        if inserted == 0 {
            return Err(DbError::UserExists(chat_id));
        }
        Ok(User {
            chat_id,
            name: name.to_string(),
        })
    }

    // ==================== Ledger Operations ====================

    pub fn create_operation(
        &self,
        chat_id: ChatId,
        kind: OperationKind,
        amount: Decimal,
        date: NaiveDate,
    ) -> DbResult<Operation> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO operations (chat_id, type_operation, sum, date) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, kind.as_str(), amount.to_string(), date],
        )?;

        Ok(Operation {
            id: conn.last_insert_rowid(),
            chat_id,
            kind,
            amount,
            date,
        })
    }

    /// Most recent operations first; same-day entries in reverse insertion order
    pub fn list_recent_operations(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> DbResult<Vec<Operation>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operations
             WHERE chat_id = ?1 ORDER BY date DESC, id DESC LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![chat_id, limit], parse_operation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Ownership check: true only if `id` exists and belongs to `chat_id`
    pub fn operation_exists(&self, id: i64, chat_id: ChatId) -> DbResult<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM operations WHERE id = ?1 AND chat_id = ?2)",
            params![id, chat_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_operation(&self, id: i64, chat_id: ChatId) -> DbResult<Operation> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?1 AND chat_id = ?2"),
            params![id, chat_id],
            parse_operation_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::OperationNotFound(id),
            other => DbError::Sqlite(other),
        })
    }

    /// Change the amount of an owned operation and return the updated row.
    /// A row owned by another chat is left untouched and reported as not found.
    pub fn update_operation_amount(
        &self,
        id: i64,
        chat_id: ChatId,
        amount: Decimal,
    ) -> DbResult<Operation> {
        let updated = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE operations SET sum = ?1 WHERE id = ?2 AND chat_id = ?3",
                params![amount.to_string(), id, chat_id],
            )?
        };

        if updated == 0 {
            return Err(DbError::OperationNotFound(id));
        }
        self.get_operation(id, chat_id)
    }

    /// Operations dated on or after `since`, newest first. `None` means all time.
    pub fn list_operations_since(
        &self,
        chat_id: ChatId,
        since: Option<NaiveDate>,
    ) -> DbResult<Vec<Operation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operations
             WHERE chat_id = ?1 AND (?2 IS NULL OR date >= ?2)
             ORDER BY date DESC, id DESC"
        ))?;

        let rows = stmt.query_map(params![chat_id, since], parse_operation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Session Rows ====================

    /// Load the serialized session state for a chat
    pub fn get_session_row(&self, chat_id: ChatId) -> DbResult<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT state, updated_at FROM sessions WHERE chat_id = ?1",
            params![chat_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn upsert_session_row(
        &self,
        chat_id: ChatId,
        state_json: &str,
        updated_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (chat_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (chat_id) DO UPDATE SET
                 state = excluded.state,
                 updated_at = excluded.updated_at",
            params![chat_id, state_json, updated_at],
        )?;
        Ok(())
    }

    pub fn delete_session_row(&self, chat_id: ChatId) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE chat_id = ?1", params![chat_id])?;
        Ok(())
    }

    /// Remove sessions untouched since `cutoff`, returning how many were dropped
    pub fn delete_sessions_before(&self, cutoff: DateTime<Utc>) -> DbResult<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE updated_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

/// Parse an operation row selected with `OPERATION_COLUMNS`
fn parse_operation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
    let kind_str: String = row.get(2)?;
    let kind = OperationKind::from_db(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown operation type {kind_str:?}").into(),
        )
    })?;

    let sum: String = row.get(3)?;
    let amount = Decimal::from_str(&sum).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Operation {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        kind,
        amount,
        date: row.get(4)?,
    })
}

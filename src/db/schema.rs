//! Database schema and ledger types

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram-style chat identifier; one per end user.
pub type ChatId = i64;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    chat_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    type_operation TEXT NOT NULL CHECK (type_operation IN ('income', 'expense')),
    sum TEXT NOT NULL,
    date TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES users(chat_id)
);

CREATE INDEX IF NOT EXISTS idx_operations_chat_date ON operations(chat_id, date DESC, id DESC);

CREATE TABLE IF NOT EXISTS sessions (
    chat_id INTEGER PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Tables that must answer a probe query before the bot accepts traffic
pub const REQUIRED_TABLES: [&str; 2] = ["users", "operations"];

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub chat_id: ChatId,
    pub name: String,
}

/// Direction of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Income,
    Expense,
}

impl OperationKind {
    /// Value stored in `operations.type_operation`
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Income => "income",
            OperationKind::Expense => "expense",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "income" => Some(OperationKind::Income),
            "expense" => Some(OperationKind::Expense),
            _ => None,
        }
    }

    /// Human-facing label, also the button text
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Income => "Income",
            OperationKind::Expense => "Expense",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ledger entry. Amounts are always in the base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub chat_id: ChatId,
    pub kind: OperationKind,
    pub amount: Decimal,
    pub date: NaiveDate,
}

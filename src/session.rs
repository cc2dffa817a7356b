//! Session state store
//!
//! One session per chat: the active flow, its step and whatever the earlier
//! steps collected. A session untouched for longer than the TTL reads back
//! as idle and is eventually purged.

use crate::db::{ChatId, Database, DbError};
use crate::state_machine::FlowState;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Storage(#[from] DbError),
    #[error("Corrupt session for chat {chat_id}: {source}")]
    Corrupt {
        chat_id: ChatId,
        source: serde_json::Error,
    },
    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub state: FlowState,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.updated_at >= ttl
    }
}

fn ttl_delta(ttl: Duration) -> TimeDelta {
    TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX)
}

/// Where sessions live. The engine only ever talks to this contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state; missing and expired sessions are `Idle`
    async fn get(&self, chat_id: ChatId) -> Result<FlowState, SessionError>;

    /// Store the state, touching `updated_at`. Storing `Idle` clears.
    async fn set(&self, chat_id: ChatId, state: FlowState) -> Result<(), SessionError>;

    async fn clear(&self, chat_id: ChatId) -> Result<(), SessionError>;

    /// Drop every expired session, returning how many went
    async fn purge_expired(&self) -> Result<usize, SessionError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<ChatId, Session>>,
    ttl: TimeDelta,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: ttl_delta(ttl),
        }
    }

    #[cfg(test)]
    async fn backdate(&self, chat_id: ChatId, by: TimeDelta) {
        if let Some(session) = self.sessions.lock().await.get_mut(&chat_id) {
            session.updated_at -= by;
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, chat_id: ChatId) -> Result<FlowState, SessionError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(&chat_id)
            .filter(|s| !s.is_expired(Utc::now(), self.ttl))
            .map(|s| s.state.clone())
            .unwrap_or_default())
    }

    async fn set(&self, chat_id: ChatId, state: FlowState) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if state.is_idle() {
            sessions.remove(&chat_id);
        } else {
            sessions.insert(
                chat_id,
                Session {
                    state,
                    updated_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn clear(&self, chat_id: ChatId) -> Result<(), SessionError> {
        self.sessions.lock().await.remove(&chat_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.ttl));
        Ok(before - sessions.len())
    }
}

// ============================================================================
// SQLite backend
// ============================================================================

/// Sessions as JSON rows in the ledger database, surviving restarts
pub struct DatabaseSessionStore {
    db: Database,
    ttl: TimeDelta,
}

impl DatabaseSessionStore {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            ttl: ttl_delta(ttl),
        }
    }
}

#[async_trait]
impl SessionStore for DatabaseSessionStore {
    async fn get(&self, chat_id: ChatId) -> Result<FlowState, SessionError> {
        let db = self.db.clone();
        let Some((json, updated_at)) =
            tokio::task::spawn_blocking(move || db.get_session_row(chat_id)).await??
        else {
            return Ok(FlowState::Idle);
        };

        let session = Session {
            state: serde_json::from_str(&json)
                .map_err(|source| SessionError::Corrupt { chat_id, source })?,
            updated_at,
        };
        if session.is_expired(Utc::now(), self.ttl) {
            return Ok(FlowState::Idle);
        }
        Ok(session.state)
    }

    async fn set(&self, chat_id: ChatId, state: FlowState) -> Result<(), SessionError> {
        if state.is_idle() {
            return self.clear(chat_id).await;
        }
        let json = serde_json::to_string(&state)
            .map_err(|source| SessionError::Corrupt { chat_id, source })?;
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.upsert_session_row(chat_id, &json, Utc::now()))
            .await??;
        Ok(())
    }

    async fn clear(&self, chat_id: ChatId) -> Result<(), SessionError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.delete_session_row(chat_id)).await??;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, SessionError> {
        let db = self.db.clone();
        let cutoff = Utc::now() - self.ttl;
        Ok(tokio::task::spawn_blocking(move || db.delete_sessions_before(cutoff)).await??)
    }
}

/// Purge expired sessions on a fixed interval for the life of the process
pub fn spawn_sweeper(store: Arc<dyn SessionStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session purge failed"),
            }
        }
    })
}

//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{ChatId, Database, DbResult, Operation, OperationKind, User};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Ledger operations the conversation engine needs
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn user_exists(&self, chat_id: ChatId) -> DbResult<bool>;

    /// Fails with `DbError::UserExists` if the chat is already registered
    async fn create_user(&self, chat_id: ChatId, name: &str) -> DbResult<User>;

    async fn create_operation(
        &self,
        chat_id: ChatId,
        kind: OperationKind,
        amount: Decimal,
        date: NaiveDate,
    ) -> DbResult<Operation>;

    async fn list_recent_operations(&self, chat_id: ChatId, limit: usize)
        -> DbResult<Vec<Operation>>;

    async fn operation_exists(&self, id: i64, chat_id: ChatId) -> DbResult<bool>;

    /// Fails with `DbError::OperationNotFound` unless `chat_id` owns `id`
    async fn update_operation_amount(
        &self,
        id: i64,
        chat_id: ChatId,
        amount: Decimal,
    ) -> DbResult<Operation>;

    async fn list_operations_since(
        &self,
        chat_id: ChatId,
        since: Option<NaiveDate>,
    ) -> DbResult<Vec<Operation>>;
}

// ============================================================================
// Arc implementation for trait objects
// ============================================================================

#[async_trait]
impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    async fn user_exists(&self, chat_id: ChatId) -> DbResult<bool> {
        (**self).user_exists(chat_id).await
    }

    async fn create_user(&self, chat_id: ChatId, name: &str) -> DbResult<User> {
        (**self).create_user(chat_id, name).await
    }

    async fn create_operation(
        &self,
        chat_id: ChatId,
        kind: OperationKind,
        amount: Decimal,
        date: NaiveDate,
    ) -> DbResult<Operation> {
        (**self).create_operation(chat_id, kind, amount, date).await
    }

    async fn list_recent_operations(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> DbResult<Vec<Operation>> {
        (**self).list_recent_operations(chat_id, limit).await
    }

    async fn operation_exists(&self, id: i64, chat_id: ChatId) -> DbResult<bool> {
        (**self).operation_exists(id, chat_id).await
    }

    async fn update_operation_amount(
        &self,
        id: i64,
        chat_id: ChatId,
        amount: Decimal,
    ) -> DbResult<Operation> {
        (**self).update_operation_amount(id, chat_id, amount).await
    }

    async fn list_operations_since(
        &self,
        chat_id: ChatId,
        since: Option<NaiveDate>,
    ) -> DbResult<Vec<Operation>> {
        (**self).list_operations_since(chat_id, since).await
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

/// Adapter to use Database as Ledger. SQLite calls block, so each one runs
/// on the blocking pool.
#[derive(Clone)]
pub struct DatabaseLedger {
    db: Database,
}

impl DatabaseLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Useful for tests
    pub fn inner(&self) -> &Database {
        &self.db
    }

    async fn blocking<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl Ledger for DatabaseLedger {
    async fn user_exists(&self, chat_id: ChatId) -> DbResult<bool> {
        self.blocking(move |db| db.user_exists(chat_id)).await
    }

    async fn create_user(&self, chat_id: ChatId, name: &str) -> DbResult<User> {
        let name = name.to_string();
        self.blocking(move |db| db.create_user(chat_id, &name)).await
    }

    async fn create_operation(
        &self,
        chat_id: ChatId,
        kind: OperationKind,
        amount: Decimal,
        date: NaiveDate,
    ) -> DbResult<Operation> {
        self.blocking(move |db| db.create_operation(chat_id, kind, amount, date))
            .await
    }

    async fn list_recent_operations(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> DbResult<Vec<Operation>> {
        self.blocking(move |db| db.list_recent_operations(chat_id, limit))
            .await
    }

    async fn operation_exists(&self, id: i64, chat_id: ChatId) -> DbResult<bool> {
        self.blocking(move |db| db.operation_exists(id, chat_id)).await
    }

    async fn update_operation_amount(
        &self,
        id: i64,
        chat_id: ChatId,
        amount: Decimal,
    ) -> DbResult<Operation> {
        self.blocking(move |db| db.update_operation_amount(id, chat_id, amount))
            .await
    }

    async fn list_operations_since(
        &self,
        chat_id: ChatId,
        since: Option<NaiveDate>,
    ) -> DbResult<Vec<Operation>> {
        self.blocking(move |db| db.list_operations_since(chat_id, since))
            .await
    }
}

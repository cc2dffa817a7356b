//! Per-chat runtime executor

use super::traits::Ledger;
use super::{Envelope, InboundMessage};

use crate::currency::CurrencyGateway;
use crate::db::{ChatId, DbError};
use crate::replies::{self, OutboundMessage};
use crate::report;
use crate::session::{SessionError, SessionStore};
use crate::state_machine::{transition, ChatContext, Effect, Event, FlowState};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Tunables shared by every chat runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on one ledger or session call (or one report build)
    pub store_timeout: Duration,
    /// A runtime with no traffic for this long shuts down
    pub idle_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Processes one chat's messages strictly in arrival order
pub struct ChatRuntime<L, G>
where
    L: Ledger + 'static,
    G: CurrencyGateway + ?Sized + 'static,
{
    chat_id: ChatId,
    ledger: Arc<L>,
    gateway: Arc<G>,
    sessions: Arc<dyn SessionStore>,
    config: RuntimeConfig,
    inbox: mpsc::Receiver<Envelope>,
}

impl<L, G> ChatRuntime<L, G>
where
    L: Ledger + 'static,
    G: CurrencyGateway + ?Sized + 'static,
{
    pub fn new(
        chat_id: ChatId,
        ledger: Arc<L>,
        gateway: Arc<G>,
        sessions: Arc<dyn SessionStore>,
        config: RuntimeConfig,
        inbox: mpsc::Receiver<Envelope>,
    ) -> Self {
        Self {
            chat_id,
            ledger,
            gateway,
            sessions,
            config,
            inbox,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(chat_id = %self.chat_id, "Starting chat runtime");

        loop {
            match tokio::time::timeout(self.config.idle_timeout, self.inbox.recv()).await {
                Ok(Some(envelope)) => self.deliver(envelope).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new sends, then finish what was already queued
                    self.inbox.close();
                    while let Some(envelope) = self.inbox.recv().await {
                        self.deliver(envelope).await;
                    }
                    break;
                }
            }
        }

        tracing::debug!(chat_id = %self.chat_id, "Chat runtime stopped");
    }

    async fn deliver(&self, envelope: Envelope) {
        let Envelope { message, reply_tx } = envelope;
        let outbound = self.handle_message(message).await;
        if reply_tx.send(outbound).is_err() {
            tracing::debug!(chat_id = %self.chat_id, "Caller went away before the reply");
        }
    }

    /// Run one inbound message through the state machine to completion
    pub async fn handle_message(&self, message: InboundMessage) -> Vec<OutboundMessage> {
        let chat_id = self.chat_id;
        let context = ChatContext::new(chat_id, chrono::Local::now().naive_local())
            .with_sender_name(message.sender_name);

        let mut state = match self.store(self.sessions.get(chat_id)).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Failed to load session");
                // Start over rather than replay a session that cannot be read
                if let Err(e) = self.store(self.sessions.clear(chat_id)).await {
                    tracing::error!(chat_id = %chat_id, error = %e, "Failed to clear session");
                }
                return vec![try_later(chat_id)];
            }
        };

        let mut outbox = Vec::new();
        let mut events = VecDeque::from([Event::user_message(message.text)]);

        while let Some(event) = events.pop_front() {
            let result = match transition(&state, &context, event) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(chat_id = %chat_id, error = %e, "Transition failed");
                    outbox.push(try_later(chat_id));
                    state = FlowState::Idle;
                    break;
                }
            };

            if result.new_state != state {
                tracing::debug!(
                    chat_id = %chat_id,
                    from = %format!("{}/{}", state.flow_name(), state.step_name()),
                    to = %format!(
                        "{}/{}",
                        result.new_state.flow_name(),
                        result.new_state.step_name()
                    ),
                    "Flow transition"
                );
            }
            state = result.new_state;

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect, &mut outbox).await {
                    events.push_back(generated);
                }
            }
        }

        if let Err(e) = self.store(self.sessions.set(chat_id, state)).await {
            tracing::error!(chat_id = %chat_id, error = %e, "Failed to save session");
        }

        outbox
    }

    /// Execute one effect; everything but a reply yields a follow-up event
    async fn execute_effect(
        &self,
        effect: Effect,
        outbox: &mut Vec<OutboundMessage>,
    ) -> Option<Event> {
        let chat_id = self.chat_id;

        let event = match effect {
            Effect::Reply(message) => {
                outbox.push(message);
                return None;
            }

            Effect::CheckRegistration { intent } => {
                match self.store(self.ledger.user_exists(chat_id)).await {
                    Ok(registered) => Event::RegistrationChecked { intent, registered },
                    Err(e) => self.dependency_failed("user_exists", &e),
                }
            }

            Effect::CreateUser { name } => {
                match self.store(self.ledger.create_user(chat_id, &name)).await {
                    Ok(user) => {
                        tracing::info!(chat_id = %chat_id, "User registered");
                        Event::UserCreated { user }
                    }
                    Err(StoreError::Db(DbError::UserExists(_))) => Event::UserAlreadyExists,
                    Err(e) => self.dependency_failed("create_user", &e),
                }
            }

            Effect::LoadRecentOperations { limit } => {
                match self
                    .store(self.ledger.list_recent_operations(chat_id, limit))
                    .await
                {
                    Ok(operations) => Event::RecentOperationsLoaded { operations },
                    Err(e) => self.dependency_failed("list_recent_operations", &e),
                }
            }

            Effect::CheckOwnership { operation_id } => {
                match self
                    .store(self.ledger.operation_exists(operation_id, chat_id))
                    .await
                {
                    Ok(owned) => Event::OwnershipChecked {
                        operation_id,
                        owned,
                    },
                    Err(e) => self.dependency_failed("operation_exists", &e),
                }
            }

            Effect::CreateOperation { kind, amount, date } => {
                match self
                    .store(self.ledger.create_operation(chat_id, kind, amount, date))
                    .await
                {
                    Ok(operation) => {
                        tracing::info!(
                            chat_id = %chat_id,
                            operation_id = operation.id,
                            kind = %kind,
                            "Operation recorded"
                        );
                        Event::OperationCreated { operation }
                    }
                    Err(e) => self.dependency_failed("create_operation", &e),
                }
            }

            Effect::UpdateAmount {
                operation_id,
                amount,
            } => {
                match self
                    .store(self.ledger.update_operation_amount(operation_id, chat_id, amount))
                    .await
                {
                    Ok(operation) => {
                        tracing::info!(
                            chat_id = %chat_id,
                            operation_id,
                            "Operation amount updated"
                        );
                        Event::OperationUpdated { operation }
                    }
                    Err(StoreError::Db(DbError::OperationNotFound(_))) => {
                        tracing::warn!(
                            chat_id = %chat_id,
                            operation_id,
                            "Update matched no owned row"
                        );
                        Event::OperationNotFound
                    }
                    Err(e) => self.dependency_failed("update_operation_amount", &e),
                }
            }

            Effect::BuildReport { request } => {
                let build = report::generate(&*self.ledger, &*self.gateway, chat_id, &request);
                match self.store(build).await {
                    Ok(report) => Event::ReportReady { report },
                    Err(e) => self.dependency_failed("build_report", &e),
                }
            }
        };

        Some(event)
    }

    /// Bound a ledger or session call by the store timeout
    async fn store<T, E>(&self, call: impl Future<Output = Result<T, E>>) -> Result<T, StoreError>
    where
        E: Into<StoreError>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        }
    }

    fn dependency_failed(&self, call: &str, error: &StoreError) -> Event {
        tracing::error!(chat_id = %self.chat_id, call, error = %error, "Ledger call failed");
        Event::DependencyFailed
    }
}

fn try_later(chat_id: ChatId) -> OutboundMessage {
    OutboundMessage::new(chat_id, replies::TRY_LATER).with_keyboard(replies::main_keyboard())
}

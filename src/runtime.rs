//! Runtime for executing chat conversations
//!
//! One actor per chat id: messages for the same chat are handled strictly
//! in arrival order, different chats run concurrently.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ChatRuntime, RuntimeConfig};
pub use traits::*;

use crate::currency::CurrencyGateway;
use crate::db::ChatId;
use crate::replies::OutboundMessage;
use crate::session::SessionStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

/// Type alias for the production manager with concrete implementations
pub type ProductionManager = RuntimeManager<DatabaseLedger, dyn CurrencyGateway>;

const INBOX_CAPACITY: usize = 32;

/// Message from the inbound bus
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    /// Display name from the transport, offered during registration
    pub sender_name: Option<String>,
}

/// Inbound message plus the channel its replies go back on
pub struct Envelope {
    pub message: InboundMessage,
    pub reply_tx: oneshot::Sender<Vec<OutboundMessage>>,
}

/// Handle to a running chat runtime
struct ChatHandle {
    inbox: mpsc::Sender<Envelope>,
    /// Distinguishes a replacement runtime from the one it replaced
    generation: u64,
    /// Held by a runtime for as long as it runs, shared with its replacement
    turn: Arc<Mutex<()>>,
}

/// Manager for all chat runtimes
pub struct RuntimeManager<L, G>
where
    L: Ledger + 'static,
    G: CurrencyGateway + ?Sized + 'static,
{
    ledger: Arc<L>,
    gateway: Arc<G>,
    sessions: Arc<dyn SessionStore>,
    config: RuntimeConfig,
    runtimes: Arc<RwLock<HashMap<ChatId, ChatHandle>>>,
    next_generation: AtomicU64,
}

impl<L, G> RuntimeManager<L, G>
where
    L: Ledger + 'static,
    G: CurrencyGateway + ?Sized + 'static,
{
    pub fn new(
        ledger: Arc<L>,
        gateway: Arc<G>,
        sessions: Arc<dyn SessionStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            sessions,
            config,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Hand a message to its chat's runtime and wait for the replies
    pub async fn dispatch(&self, message: InboundMessage) -> Result<Vec<OutboundMessage>, String> {
        let chat_id = message.chat_id;
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut envelope = Envelope { message, reply_tx };

        // A runtime shutting down for idleness refuses sends; retry once on a fresh one
        for _ in 0..2 {
            let (inbox, generation) = self.get_or_create(chat_id).await;
            match inbox.send(envelope).await {
                Ok(()) => {
                    return reply_rx
                        .await
                        .map_err(|_| format!("Chat {chat_id} runtime dropped the message"));
                }
                Err(mpsc::error::SendError(returned)) => {
                    tracing::debug!(chat_id = %chat_id, generation, "Runtime closed, recreating");
                    envelope = returned;
                }
            }
        }

        Err(format!("Chat {chat_id} runtime unavailable"))
    }

    /// Number of chats with a live runtime
    pub async fn active_chats(&self) -> usize {
        self.runtimes.read().await.len()
    }

    /// Get or create the runtime for a chat
    async fn get_or_create(&self, chat_id: ChatId) -> (mpsc::Sender<Envelope>, u64) {
        // Check if already running
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(&chat_id) {
                if !handle.inbox.is_closed() {
                    return (handle.inbox.clone(), handle.generation);
                }
            }
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started one while we waited for the lock
        if let Some(handle) = runtimes.get(&chat_id) {
            if !handle.inbox.is_closed() {
                return (handle.inbox.clone(), handle.generation);
            }
        }

        // A closed runtime may still be draining; its replacement waits its turn
        let turn = runtimes
            .get(&chat_id)
            .map_or_else(|| Arc::new(Mutex::new(())), |handle| Arc::clone(&handle.turn));

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let runtime = ChatRuntime::new(
            chat_id,
            Arc::clone(&self.ledger),
            Arc::clone(&self.gateway),
            Arc::clone(&self.sessions),
            self.config.clone(),
            inbox_rx,
        );

        // Start runtime in background; it deregisters itself when it stops
        let registry = Arc::clone(&self.runtimes);
        let runtime_turn = Arc::clone(&turn);
        tokio::spawn(async move {
            let _turn = runtime_turn.lock_owned().await;
            runtime.run().await;
            let mut runtimes = registry.write().await;
            if runtimes
                .get(&chat_id)
                .is_some_and(|handle| handle.generation == generation)
            {
                runtimes.remove(&chat_id);
            }
            tracing::debug!(chat_id = %chat_id, generation, "Chat runtime deregistered");
        });

        runtimes.insert(
            chat_id,
            ChatHandle {
                inbox: inbox_tx.clone(),
                generation,
                turn,
            },
        );
        (inbox_tx, generation)
    }
}

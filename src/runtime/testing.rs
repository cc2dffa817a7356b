//! Mock implementations for testing
//!
//! These mocks enable integration testing of the chat runtime without a
//! rate service and with a ledger that can be made to fail or stall.

use super::traits::*;
use super::{InboundMessage, RuntimeConfig, RuntimeManager};
use crate::currency::{Currency, CurrencyGateway, RateError};
use crate::db::{ChatId, Database, DbError, DbResult, Operation, OperationKind, User};
use crate::replies::OutboundMessage;
use crate::session::{InMemorySessionStore, SessionError, SessionStore};
use crate::state_machine::FlowState;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock Gateways
// ============================================================================

/// Gateway answering every foreign currency with the same rate
pub struct FixedRateGateway {
    rate: f64,
    /// Currencies that were looked up remotely
    pub lookups: Mutex<Vec<Currency>>,
}

impl FixedRateGateway {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            lookups: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CurrencyGateway for FixedRateGateway {
    async fn fetch_rate(&self, currency: Currency) -> Result<f64, RateError> {
        self.lookups.lock().unwrap().push(currency);
        Ok(self.rate)
    }
}

/// Gateway whose remote side is always down
pub struct UnavailableGateway;

#[async_trait]
impl CurrencyGateway for UnavailableGateway {
    async fn fetch_rate(&self, _currency: Currency) -> Result<f64, RateError> {
        Err(RateError::Timeout)
    }
}

// ============================================================================
// Flaky Ledger
// ============================================================================

/// Real in-memory ledger that can be switched to failing or stalling
pub struct FlakyLedger {
    inner: DatabaseLedger,
    failing: AtomicBool,
    stall: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl FlakyLedger {
    pub fn new(db: Database) -> Self {
        Self {
            inner: DatabaseLedger::new(db),
            failing: AtomicBool::new(false),
            stall: Mutex::new(None),
        }
    }

    pub fn db(&self) -> &Database {
        self.inner.inner()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_stall(&self, stall: Option<Duration>) {
        *self.stall.lock().unwrap() = stall;
    }

    async fn gate(&self) -> DbResult<()> {
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                Some("unable to open database file".to_string()),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn user_exists(&self, chat_id: ChatId) -> DbResult<bool> {
        self.gate().await?;
        self.inner.user_exists(chat_id).await
    }

    async fn create_user(&self, chat_id: ChatId, name: &str) -> DbResult<User> {
        self.gate().await?;
        self.inner.create_user(chat_id, name).await
    }

    async fn create_operation(
        &self,
        chat_id: ChatId,
        kind: OperationKind,
        amount: Decimal,
        date: NaiveDate,
    ) -> DbResult<Operation> {
        self.gate().await?;
        self.inner.create_operation(chat_id, kind, amount, date).await
    }

    async fn list_recent_operations(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> DbResult<Vec<Operation>> {
        self.gate().await?;
        self.inner.list_recent_operations(chat_id, limit).await
    }

    async fn operation_exists(&self, id: i64, chat_id: ChatId) -> DbResult<bool> {
        self.gate().await?;
        self.inner.operation_exists(id, chat_id).await
    }

    async fn update_operation_amount(
        &self,
        id: i64,
        chat_id: ChatId,
        amount: Decimal,
    ) -> DbResult<Operation> {
        self.gate().await?;
        self.inner.update_operation_amount(id, chat_id, amount).await
    }

    async fn list_operations_since(
        &self,
        chat_id: ChatId,
        since: Option<NaiveDate>,
    ) -> DbResult<Vec<Operation>> {
        self.gate().await?;
        self.inner.list_operations_since(chat_id, since).await
    }
}

// ============================================================================
// Slow Sessions
// ============================================================================

/// In-memory session store with adjustable latency that records how many
/// messages of one chat were between `get` and `set` at the same time
pub struct SlowSessions {
    inner: InMemorySessionStore,
    get_delay: Mutex<Duration>,
    set_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    /// Highest number of overlapping get/set pairs seen
    pub max_in_flight: AtomicUsize,
}

impl SlowSessions {
    pub fn new() -> Self {
        Self {
            inner: InMemorySessionStore::new(Duration::from_secs(900)),
            get_delay: Mutex::new(Duration::ZERO),
            set_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = delay;
    }

    pub fn set_set_delay(&self, delay: Duration) {
        *self.set_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl SessionStore for SlowSessions {
    async fn get(&self, chat_id: ChatId) -> Result<FlowState, SessionError> {
        let delay = *self.get_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.get(chat_id).await
    }

    async fn set(&self, chat_id: ChatId, state: FlowState) -> Result<(), SessionError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let delay = *self.set_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.inner.set(chat_id, state).await
    }

    // Shares the load delay: a store too slow to read is too slow to clear
    async fn clear(&self, chat_id: ChatId) -> Result<(), SessionError> {
        let delay = *self.get_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.inner.clear(chat_id).await
    }

    async fn purge_expired(&self) -> Result<usize, SessionError> {
        self.inner.purge_expired().await
    }
}

// ============================================================================
// Test Harness
// ============================================================================

/// A runtime manager wired to mocks, driven one message at a time
pub struct TestBot {
    pub manager: RuntimeManager<FlakyLedger, dyn CurrencyGateway>,
    pub ledger: Arc<FlakyLedger>,
    pub sessions: Arc<InMemorySessionStore>,
}

impl TestBot {
    pub fn new(gateway: Arc<dyn CurrencyGateway>) -> Self {
        Self::with_config(gateway, RuntimeConfig::default())
    }

    pub fn with_config(gateway: Arc<dyn CurrencyGateway>, config: RuntimeConfig) -> Self {
        let ledger = Arc::new(FlakyLedger::new(Database::open_in_memory().unwrap()));
        let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(900)));
        let manager = RuntimeManager::new(
            Arc::clone(&ledger),
            gateway,
            Arc::clone(&sessions) as Arc<dyn SessionStore>,
            config,
        );
        Self {
            manager,
            ledger,
            sessions,
        }
    }

    pub async fn send(&self, chat_id: ChatId, text: &str) -> Vec<OutboundMessage> {
        self.manager
            .dispatch(InboundMessage {
                chat_id,
                text: text.to_string(),
                sender_name: None,
            })
            .await
            .unwrap()
    }

    /// Send and return only the reply texts
    pub async fn say(&self, chat_id: ChatId, text: &str) -> Vec<String> {
        self.send(chat_id, text)
            .await
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    pub async fn register(&self, chat_id: ChatId, name: &str) {
        self.say(chat_id, "/register").await;
        let replies = self.say(chat_id, name).await;
        assert!(replies[0].starts_with("Registration complete"), "{replies:?}");
    }

    pub async fn add_operation(&self, chat_id: ChatId, kind: &str, amount: &str, date: &str) {
        self.say(chat_id, "Add operation").await;
        self.say(chat_id, kind).await;
        self.say(chat_id, amount).await;
        let replies = self.say(chat_id, date).await;
        assert!(replies[0].starts_with("Operation added"), "{replies:?}");
    }

    pub async fn report(&self, chat_id: ChatId, currency: &str, period: &str) -> Vec<String> {
        self.say(chat_id, "Reports").await;
        self.say(chat_id, currency).await;
        self.say(chat_id, period).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replies;
    use crate::state_machine::input::AmountError;

    fn today() -> String {
        chrono::Local::now().date_naive().format("%d.%m.%Y").to_string()
    }

    fn bot() -> TestBot {
        TestBot::new(Arc::new(FixedRateGateway::new(100.0)))
    }

    async fn session_of(bot: &TestBot, chat_id: ChatId) -> FlowState {
        bot.sessions.get(chat_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_register_add_and_report_in_base_currency() {
        let bot = bot();
        bot.register(1, "Alice").await;
        bot.add_operation(1, "Income", "1000", "Today").await;

        let replies = bot.report(1, "RUB", "All time").await;
        assert_eq!(
            replies,
            vec![format!(
                "Report for all time (RUB):\n\n⬆️ {} - 1000.00 RUB",
                today()
            )]
        );
        assert!(session_of(&bot, 1).await.is_idle());
    }

    #[tokio::test]
    async fn test_update_changes_reported_amount() {
        let bot = bot();
        bot.register(1, "Alice").await;
        bot.add_operation(1, "Expense", "50", "01.01.2024").await;
        let op = &bot.ledger.db().list_recent_operations(1, 1).unwrap()[0];

        let listing = bot.say(1, "/update_operation").await;
        assert!(listing[0].contains(&format!("#{} - 01.01.2024 - 50.00 RUB - Expense", op.id)));

        let replies = bot.say(1, &op.id.to_string()).await;
        assert_eq!(replies, vec![replies::ASK_NEW_AMOUNT]);
        let replies = bot.say(1, "75").await;
        assert!(replies[0].starts_with("Operation updated"));
        assert!(replies[0].contains("75.00 RUB"));

        let report = bot.report(1, "RUB", "All time").await;
        assert!(report[0].contains("⬇️ 01.01.2024 - 75.00 RUB"));
        assert!(!report[0].contains("50.00"));
    }

    #[tokio::test]
    async fn test_unregistered_add_operation_is_refused() {
        let bot = bot();
        let replies = bot.say(9, "Add operation").await;
        assert_eq!(replies, vec![replies::REGISTER_FIRST]);
        assert!(session_of(&bot, 9).await.is_idle());

        let replies = bot.say(9, "/update_operation").await;
        assert_eq!(replies, vec![replies::REGISTER_FIRST]);
    }

    #[tokio::test]
    async fn test_update_of_foreign_operation_changes_nothing() {
        let bot = bot();
        bot.register(1, "Alice").await;
        bot.register(2, "Bob").await;
        bot.add_operation(1, "Expense", "50", "01.01.2024").await;
        bot.add_operation(2, "Income", "10", "02.01.2024").await;
        let alice_op = bot.ledger.db().list_recent_operations(1, 1).unwrap()[0].clone();

        bot.say(2, "/update_operation").await;
        let replies = bot.say(2, &alice_op.id.to_string()).await;
        assert_eq!(replies, vec![replies::OPERATION_NOT_FOUND]);
        assert!(session_of(&bot, 2).await.is_idle());

        let after = bot.ledger.db().get_operation(alice_op.id, 1).unwrap();
        assert_eq!(after, alice_op);
    }

    #[tokio::test]
    async fn test_unavailable_rate_falls_back_with_notice() {
        let bot = TestBot::new(Arc::new(UnavailableGateway));
        bot.register(1, "Alice").await;
        bot.add_operation(1, "Income", "1000", "Today").await;
        bot.add_operation(1, "Expense", "250.5", "01.01.2024").await;

        let replies = bot.report(1, "USD", "All time").await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], replies::rate_fallback(Currency::Usd));
        assert!(replies[1].starts_with("Report for all time (RUB):"));
        assert!(replies[1].contains("1000.00 RUB"));
        assert!(replies[1].contains("⬇️ 01.01.2024 - 250.50 RUB"));
    }

    #[tokio::test]
    async fn test_foreign_currency_conversion() {
        let gateway = Arc::new(FixedRateGateway::new(100.0));
        let bot = TestBot::new(Arc::clone(&gateway) as Arc<dyn CurrencyGateway>);
        bot.register(1, "Alice").await;
        bot.add_operation(1, "Income", "1000", "Today").await;

        let replies = bot.report(1, "usd", "today").await;
        assert_eq!(
            replies,
            vec![format!("Report for today (USD):\n\n⬆️ {} - 10.00 USD", today())]
        );
        assert_eq!(*gateway.lookups.lock().unwrap(), vec![Currency::Usd]);

        // Base currency never reaches the gateway
        bot.report(1, "RUB", "today").await;
        assert_eq!(gateway.lookups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_flow_commits_nothing() {
        let bot = bot();
        bot.register(1, "Alice").await;
        bot.say(1, "Add operation").await;
        bot.say(1, "Income").await;
        bot.say(1, "500").await;

        let replies = bot.say(1, "Cancel").await;
        assert_eq!(replies, vec!["Adding the operation was cancelled"]);
        assert!(session_of(&bot, 1).await.is_idle());
        assert!(bot.ledger.db().list_recent_operations(1, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_step_input_reprompts() {
        let bot = bot();
        bot.register(1, "Alice").await;
        bot.say(1, "Add operation").await;
        bot.say(1, "Expense").await;

        let replies = bot.say(1, "-5").await;
        assert_eq!(replies, vec![replies::invalid_amount(&AmountError::NotPositive)]);
        let replies = bot.say(1, "12,5").await;
        assert_eq!(replies, vec![replies::ASK_DATE]);
        let replies = bot.say(1, "32.01.2024").await;
        assert_eq!(replies, vec![replies::INVALID_DATE]);
        bot.say(1, "15.01.2024").await;

        let ops = bot.ledger.db().list_recent_operations(1, 10).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].amount, Decimal::new(125, 1));
    }

    #[tokio::test]
    async fn test_registration_edge_cases() {
        let bot = bot();
        let replies = bot.say(1, "/start").await;
        assert_eq!(replies, vec![replies::WELCOME_UNREGISTERED]);

        bot.register(1, "Alice").await;
        assert_eq!(bot.say(1, "/register").await, vec![replies::ALREADY_REGISTERED]);
        assert_eq!(bot.say(1, "/start").await, vec![replies::ALREADY_RUNNING]);
        assert_eq!(bot.say(1, "what?").await, vec![replies::UNRECOGNIZED]);
    }

    #[tokio::test]
    async fn test_ledger_failure_resets_session() {
        let bot = bot();
        bot.register(1, "Alice").await;
        bot.say(1, "Add operation").await;
        bot.say(1, "Income").await;
        bot.say(1, "10").await;

        bot.ledger.set_failing(true);
        let replies = bot.say(1, "Today").await;
        assert_eq!(replies, vec![replies::TRY_LATER]);
        assert!(session_of(&bot, 1).await.is_idle());

        bot.ledger.set_failing(false);
        assert!(bot.ledger.db().list_recent_operations(1, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_ledger_times_out() {
        let config = RuntimeConfig {
            store_timeout: Duration::from_millis(50),
            ..RuntimeConfig::default()
        };
        let bot = TestBot::with_config(Arc::new(UnavailableGateway), config);
        bot.ledger.set_stall(Some(Duration::from_secs(5)));

        let replies = bot.say(1, "/start").await;
        assert_eq!(replies, vec![replies::TRY_LATER]);
    }

    fn slow_session_manager(
        sessions: &Arc<SlowSessions>,
        config: RuntimeConfig,
    ) -> RuntimeManager<FlakyLedger, dyn CurrencyGateway> {
        let gateway: Arc<dyn CurrencyGateway> = Arc::new(UnavailableGateway);
        RuntimeManager::new(
            Arc::new(FlakyLedger::new(Database::open_in_memory().unwrap())),
            gateway,
            Arc::clone(sessions) as Arc<dyn SessionStore>,
            config,
        )
    }

    fn help(chat_id: ChatId) -> InboundMessage {
        InboundMessage {
            chat_id,
            text: "/help".to_string(),
            sender_name: None,
        }
    }

    #[tokio::test]
    async fn test_stalled_session_load_times_out() {
        let sessions = Arc::new(SlowSessions::new());
        sessions.set_get_delay(Duration::from_secs(3600));
        let config = RuntimeConfig {
            store_timeout: Duration::from_millis(50),
            ..RuntimeConfig::default()
        };
        let manager = slow_session_manager(&sessions, config);

        // Both the load and the follow-up clear time out
        let replies = tokio::time::timeout(Duration::from_secs(2), manager.dispatch(help(1)))
            .await
            .expect("a stalled session store must not block the chat")
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, replies::TRY_LATER);

        // The chat recovers once the store does
        sessions.set_get_delay(Duration::ZERO);
        let replies = manager.dispatch(help(1)).await.unwrap();
        assert_eq!(replies[0].text, replies::HELP_TEXT);
    }

    #[tokio::test]
    async fn test_stalled_session_save_still_replies() {
        let sessions = Arc::new(SlowSessions::new());
        sessions.set_set_delay(Duration::from_secs(3600));
        let config = RuntimeConfig {
            store_timeout: Duration::from_millis(50),
            ..RuntimeConfig::default()
        };
        let manager = slow_session_manager(&sessions, config);

        let replies = tokio::time::timeout(Duration::from_secs(2), manager.dispatch(help(1)))
            .await
            .expect("a stalled session save must not block the chat")
            .unwrap();
        assert_eq!(replies[0].text, replies::HELP_TEXT);
    }

    #[tokio::test]
    async fn test_restarting_runtime_never_overlaps_its_predecessor() {
        let sessions = Arc::new(SlowSessions::new());
        sessions.set_get_delay(Duration::from_millis(2));
        let config = RuntimeConfig {
            idle_timeout: Duration::from_millis(10),
            ..RuntimeConfig::default()
        };
        let manager = Arc::new(slow_session_manager(&sessions, config));

        // Bursts separated by roughly the idle timeout, so sends keep racing
        // with runtimes shutting down
        for round in 0..20u64 {
            let mut tasks = Vec::new();
            for _ in 0..4 {
                let manager = Arc::clone(&manager);
                tasks.push(tokio::spawn(async move { manager.dispatch(help(1)).await }));
            }
            for task in tasks {
                let replies = task.await.unwrap().unwrap();
                assert_eq!(replies[0].text, replies::HELP_TEXT);
            }
            tokio::time::sleep(Duration::from_millis(8 + round % 5)).await;
        }

        assert_eq!(sessions.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chats_are_isolated() {
        let bot = Arc::new(bot());
        bot.register(1, "Alice").await;
        bot.say(1, "Reports").await;

        // Another chat's failure leaves chat 1 mid-flow
        bot.ledger.set_failing(true);
        assert_eq!(bot.say(2, "/start").await, vec![replies::TRY_LATER]);
        bot.ledger.set_failing(false);

        let replies = bot.say(1, "EUR").await;
        assert_eq!(replies, vec![replies::ASK_PERIOD]);
    }

    #[tokio::test]
    async fn test_concurrent_chats_all_register() {
        let bot = Arc::new(bot());
        let mut tasks = Vec::new();
        for chat_id in 1..=20 {
            let bot = Arc::clone(&bot);
            tasks.push(tokio::spawn(async move {
                bot.register(chat_id, &format!("user{chat_id}")).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for chat_id in 1..=20 {
            assert!(bot.ledger.db().user_exists(chat_id).unwrap());
        }
        assert_eq!(bot.manager.active_chats().await, 20);
    }

    #[tokio::test]
    async fn test_same_chat_messages_are_fifo() {
        let bot = Arc::new(bot());
        bot.register(1, "Alice").await;

        // Fire a whole flow without awaiting each step; order must hold
        let steps = ["Add operation", "Income", "42", "01.02.2024"];
        let mut pending = Vec::new();
        for text in steps {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            let (inbox, _) = bot.manager.get_or_create(1).await;
            inbox
                .send(crate::runtime::Envelope {
                    message: InboundMessage {
                        chat_id: 1,
                        text: text.to_string(),
                        sender_name: None,
                    },
                    reply_tx,
                })
                .await
                .unwrap();
            pending.push(reply_rx);
        }

        let mut last = Vec::new();
        for rx in pending {
            last = rx.await.unwrap();
        }
        assert!(last[0].text.starts_with("Operation added"));
        assert_eq!(
            bot.ledger.db().list_recent_operations(1, 10).unwrap()[0].amount,
            Decimal::new(42, 0)
        );
    }

    #[tokio::test]
    async fn test_idle_runtime_stops_and_restarts() {
        let config = RuntimeConfig {
            idle_timeout: Duration::from_millis(50),
            ..RuntimeConfig::default()
        };
        let bot = TestBot::with_config(Arc::new(UnavailableGateway), config);
        bot.say(1, "Reports").await;
        assert_eq!(bot.manager.active_chats().await, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bot.manager.active_chats().await, 0);

        // The session outlives the runtime
        assert_eq!(bot.say(1, "CNY").await, vec![replies::ASK_PERIOD]);
        assert_eq!(bot.manager.active_chats().await, 1);
    }

    #[tokio::test]
    async fn test_sender_name_is_offered() {
        let bot = bot();
        let replies = bot
            .manager
            .dispatch(InboundMessage {
                chat_id: 3,
                text: "/register".to_string(),
                sender_name: Some("Carol".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(replies[0].text, replies::ASK_NAME);
        assert_eq!(
            replies[0].suggested_replies.as_ref().unwrap()[0],
            vec!["Carol".to_string()]
        );
    }
}

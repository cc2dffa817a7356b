//! Finance Bot - conversational personal finance tracker
//!
//! Users register, record incomes and expenses, correct past entries and
//! request reports converted into a currency of their choice, all through
//! a chat conversation driven by a per-chat state machine.

mod api;
mod config;
mod currency;
mod db;
mod replies;
mod report;
mod runtime;
mod session;
mod state_machine;

use api::{create_router, AppState};
use config::{BotConfig, SessionBackend};
use currency::{CurrencyGateway, HttpCurrencyGateway, LoggingGateway};
use db::Database;
use runtime::{DatabaseLedger, ProductionManager, RuntimeConfig};
use session::{DatabaseSessionStore, InMemorySessionStore, SessionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finance_bot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = BotConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database; refuse to serve without the ledger tables
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)
        .and_then(|db| db.verify_tables().map(|()| db))
        .inspect_err(|e| {
            tracing::error!(error = %e, "Ledger tables unreachable, refusing to start");
        })?;

    // Currency gateway
    if config.currency_service_url.is_none() {
        tracing::warn!("CURRENCY_SERVICE_URL not set, reports will use the base currency only");
    }
    let http_gateway =
        HttpCurrencyGateway::new(config.currency_service_url.clone(), config.currency_timeout)?;
    let gateway: Arc<dyn CurrencyGateway> = Arc::new(LoggingGateway::new(Arc::new(http_gateway)));

    // Session store
    let sessions: Arc<dyn SessionStore> = match config.session_backend {
        SessionBackend::Memory => Arc::new(InMemorySessionStore::new(config.session_ttl)),
        SessionBackend::Sqlite => {
            Arc::new(DatabaseSessionStore::new(db.clone(), config.session_ttl))
        }
    };
    session::spawn_sweeper(Arc::clone(&sessions), SESSION_SWEEP_INTERVAL);

    let runtime: ProductionManager = ProductionManager::new(
        Arc::new(DatabaseLedger::new(db)),
        gateway,
        sessions,
        RuntimeConfig {
            store_timeout: config.store_timeout,
            idle_timeout: config.session_ttl,
        },
    );

    let app = create_router(AppState::new(runtime));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        backend = ?config.session_backend,
        "Finance bot listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

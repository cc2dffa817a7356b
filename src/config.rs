//! Runtime configuration from environment variables

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Where sessions are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Base URL of the rate service; `None` makes every foreign rate unavailable
    pub currency_service_url: Option<String>,
    pub currency_timeout: Duration,
    pub store_timeout: Duration,
    pub session_ttl: Duration,
    pub session_backend: SessionBackend,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("FINANCE_BOT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.finance-bot/ledger.db"))
            },
            PathBuf::from,
        );

        let port = parse_var(&lookup, "FINANCE_BOT_PORT", "a port number", 8080)?;
        let currency_service_url =
            lookup("CURRENCY_SERVICE_URL").filter(|url| !url.trim().is_empty());

        let currency_timeout = secs_var(&lookup, "CURRENCY_TIMEOUT_SECS", 3)?;
        let store_timeout = secs_var(&lookup, "STORE_TIMEOUT_SECS", 5)?;
        let session_ttl = secs_var(&lookup, "SESSION_TTL_SECS", 900)?;

        let session_backend = match lookup("SESSION_BACKEND").as_deref().map(str::trim) {
            None | Some("" | "memory") => SessionBackend::Memory,
            Some("sqlite") => SessionBackend::Sqlite,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SESSION_BACKEND",
                    expected: "memory or sqlite",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            db_path,
            port,
            currency_service_url,
            currency_timeout,
            store_timeout,
            session_ttl,
            session_backend,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
    }
}

/// Whole seconds, at least one
fn secs_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(lookup, var, "a positive number of seconds", default)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            expected: "a positive number of seconds",
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

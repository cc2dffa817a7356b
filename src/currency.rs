//! Currency allow-list and rate gateway
//!
//! Amounts live in the base currency; a rate is the number of base units
//! per one unit of the requested currency.

mod http;

pub use http::HttpCurrencyGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Currencies a report can be requested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Rub,
    Usd,
    Eur,
    Cny,
}

/// Currency every amount is stored in
pub const BASE_CURRENCY: Currency = Currency::Rub;

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::Rub, Currency::Usd, Currency::Eur, Currency::Cny];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Rub => "RUB",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Cny => "CNY",
        }
    }

    /// Case-insensitive lookup against the allow-list
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|currency| currency.code().eq_ignore_ascii_case(code))
    }

    pub fn is_base(self) -> bool {
        self == BASE_CURRENCY
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a rate could not be obtained. Callers treat every variant as
/// "unavailable"; the classification only feeds logging.
#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate service not configured")]
    NotConfigured,
    #[error("rate request timed out")]
    Timeout,
    #[error("rate service returned status {0}")]
    Status(u16),
    #[error("rate request failed: {0}")]
    Transport(String),
    #[error("malformed rate payload: {0}")]
    Malformed(String),
}

impl RateError {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            RateError::Timeout
        } else if err.is_decode() {
            RateError::Malformed(err.to_string())
        } else {
            RateError::Transport(err.to_string())
        }
    }
}

/// Remote lookup of conversion rates
#[async_trait]
pub trait CurrencyGateway: Send + Sync {
    /// Query the remote service for a non-base currency
    async fn fetch_rate(&self, currency: Currency) -> Result<f64, RateError>;

    /// Rate for `currency`; the base currency never leaves the process
    async fn rate(&self, currency: Currency) -> Result<f64, RateError> {
        if currency.is_base() {
            return Ok(1.0);
        }
        let rate = self.fetch_rate(currency).await?;
        if rate.is_finite() && rate > 0.0 {
            Ok(rate)
        } else {
            Err(RateError::Malformed(format!("non-positive rate {rate}")))
        }
    }
}

#[async_trait]
impl<T: CurrencyGateway + ?Sized> CurrencyGateway for Arc<T> {
    async fn fetch_rate(&self, currency: Currency) -> Result<f64, RateError> {
        (**self).fetch_rate(currency).await
    }
}

/// Logging wrapper for rate gateways
pub struct LoggingGateway {
    inner: Arc<dyn CurrencyGateway>,
}

impl LoggingGateway {
    pub fn new(inner: Arc<dyn CurrencyGateway>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CurrencyGateway for LoggingGateway {
    async fn fetch_rate(&self, currency: Currency) -> Result<f64, RateError> {
        let start = std::time::Instant::now();
        let result = self.inner.fetch_rate(currency).await;
        let duration = start.elapsed();

        match &result {
            Ok(rate) => {
                tracing::info!(
                    currency = %currency,
                    rate = %rate,
                    duration_ms = %duration.as_millis(),
                    "Rate lookup completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    currency = %currency,
                    duration_ms = %duration.as_millis(),
                    error = %e,
                    "Rate lookup failed"
                );
            }
        }

        result
    }
}

//! HTTP client for the currency rate service (`GET /rate?currency=<code>`)

use super::{Currency, CurrencyGateway, RateError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: f64,
}

pub struct HttpCurrencyGateway {
    client: Client,
    base_url: Option<String>,
}

impl HttpCurrencyGateway {
    /// Build a gateway whose every request is bounded by `timeout`.
    /// With no `base_url` each foreign rate reports `NotConfigured`.
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }
}

#[async_trait]
impl CurrencyGateway for HttpCurrencyGateway {
    async fn fetch_rate(&self, currency: Currency) -> Result<f64, RateError> {
        let base_url = self.base_url.as_deref().ok_or(RateError::NotConfigured)?;

        let response = self
            .client
            .get(format!("{base_url}/rate"))
            .query(&[("currency", currency.code())])
            .send()
            .await
            .map_err(|e| RateError::from_reqwest(&e))?;

        if response.status() != StatusCode::OK {
            return Err(RateError::Status(response.status().as_u16()));
        }

        let body: RateResponse = response
            .json()
            .await
            .map_err(|e| RateError::from_reqwest(&e))?;
        Ok(body.rate)
    }
}

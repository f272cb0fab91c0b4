//! Finnhub quote provider implementation.
//!
//! Finnhub's `/quote` endpoint reports current price, absolute and percent
//! change, OHLC, previous close, and a unix timestamp. A zero price means
//! the symbol has no data, not that the instrument is worthless.

use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::models::{MarketState, Quote};

use super::symbols::currency_for_symbol;
use super::{QuoteError, QuoteProvider};

const FINNHUB_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Finnhub `/quote` response.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price.
    c: Option<f64>,
    /// Absolute change.
    d: Option<f64>,
    /// Percent change.
    dp: Option<f64>,
    /// Unix timestamp of the observation.
    t: Option<i64>,
}

pub struct FinnhubQuoteSource {
    api_key: SecretString,
    base_url: String,
    client: Client,
}

impl FinnhubQuoteSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: FINNHUB_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Override the API base URL. Used by tests to point at a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn decimal_from(value: f64) -> Result<Decimal, QuoteError> {
        Decimal::try_from(value)
            .map_err(|e| QuoteError::provider(format!("unrepresentable number {value}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        symbol: &str,
    ) -> Result<T, QuoteError> {
        let url = format!(
            "{}/{}?symbol={}&token={}",
            self.base_url,
            path,
            symbol,
            self.api_key.expose_secret()
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 5xx and 429 are worth retrying; other client errors are not.
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(QuoteError::transient(format!(
                    "finnhub {status}: {body}"
                )));
            }
            return Err(QuoteError::provider(format!("finnhub {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| QuoteError::provider(format!("finnhub payload: {e}")))
    }
}

#[async_trait::async_trait]
impl QuoteProvider for FinnhubQuoteSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let payload: QuoteResponse = self.get_json("quote", symbol).await?;

        // Zero, negative, or absent price is "no data", never a valid quote.
        let price = match payload.c {
            Some(c) if c > 0.0 => Self::decimal_from(c)?,
            _ => return Err(QuoteError::no_data(symbol)),
        };

        let observed_at = payload
            .t
            .filter(|t| *t > 0)
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);
        let market_state = match payload.t {
            Some(t) if t > 0 => MarketState::Regular,
            _ => MarketState::Closed,
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            absolute_change: Self::decimal_from(payload.d.unwrap_or(0.0))?,
            percent_change: Self::decimal_from(payload.dp.unwrap_or(0.0))?,
            currency: currency_for_symbol(symbol).to_string(),
            observed_at,
            market_state,
        })
    }

    async fn fetch_profile(&self, symbol: &str) -> Result<serde_json::Value, QuoteError> {
        let profile: serde_json::Value = self.get_json("stock/profile2", symbol).await?;
        if profile.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Err(QuoteError::no_data(symbol));
        }
        Ok(profile)
    }

    fn name(&self) -> &str {
        "finnhub"
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::QuoteError;
use crate::models::Quote;

/// Seam to the upstream market-data vendor.
///
/// Implementations receive already-normalized symbols and must report a
/// missing/zero price as `QuoteError::NoData`, not as a valid quote.
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError>;

    async fn fetch_profile(&self, symbol: &str) -> Result<serde_json::Value, QuoteError>;

    fn name(&self) -> &str;
}

/// Canned provider for tests: serves fixed quotes and counts calls, so tests
/// can assert that cache hits issue zero provider calls.
pub struct StaticQuoteSource {
    quotes: Mutex<HashMap<String, Quote>>,
    calls: AtomicUsize,
}

impl StaticQuoteSource {
    pub fn new(quotes: impl IntoIterator<Item = Quote>) -> Self {
        Self {
            quotes: Mutex::new(
                quotes
                    .into_iter()
                    .map(|q| (q.symbol.clone(), q))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_quote(&self, quote: Quote) {
        let mut quotes = self.quotes.lock().expect("static source lock poisoned");
        quotes.insert(quote.symbol.clone(), quote);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QuoteProvider for StaticQuoteSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let quotes = self.quotes.lock().expect("static source lock poisoned");
        quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| QuoteError::no_data(symbol))
    }

    async fn fetch_profile(&self, symbol: &str) -> Result<serde_json::Value, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "symbol": symbol }))
    }

    fn name(&self) -> &str {
        "static"
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::models::Quote;

use super::symbols::normalize_symbol;
use super::{CacheKind, QuoteCache, QuoteError, QuoteProvider, RateLimiter};

/// Per-call fetch options.
#[derive(Debug, Clone, Copy)]
pub struct QuoteOptions {
    pub use_cache: bool,
    /// Skip the rate limiter and call the provider directly. Bypassed calls
    /// get no retry budget either.
    pub bypass_rate_limit: bool,
}

impl Default for QuoteOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            bypass_rate_limit: false,
        }
    }
}

/// A failed lookup, keyed by the symbol that failed.
#[derive(Debug)]
pub struct SymbolError {
    pub symbol: String,
    pub error: QuoteError,
}

/// Result of a batch lookup. Partial failures are explicit and never abort
/// sibling lookups.
#[derive(Debug, Default)]
pub struct QuoteBatch {
    pub quotes: Vec<Quote>,
    pub errors: Vec<SymbolError>,
}

/// Cache-first quote lookups over a rate-limited provider.
///
/// All collaborators are constructed by the owner and injected; the client
/// holds no global state.
pub struct QuoteClient {
    provider: Arc<dyn QuoteProvider>,
    limiter: Arc<RateLimiter>,
    quotes: Arc<QuoteCache<Quote>>,
    documents: Arc<QuoteCache<serde_json::Value>>,
}

impl QuoteClient {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        limiter: Arc<RateLimiter>,
        quotes: Arc<QuoteCache<Quote>>,
        documents: Arc<QuoteCache<serde_json::Value>>,
    ) -> Self {
        Self {
            provider,
            limiter,
            quotes,
            documents,
        }
    }

    /// Fetch the latest quotes for a set of symbols.
    ///
    /// Symbols fully present in cache (with unexpired TTL) issue zero
    /// provider calls. Misses fan out concurrently; each symbol's failure is
    /// reported in `errors` without affecting its siblings.
    pub async fn get_quotes(&self, symbols: &[String], opts: QuoteOptions) -> QuoteBatch {
        let mut seen = HashSet::new();
        let unique: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        let lookups = unique.iter().map(|symbol| self.get_quote(symbol, opts));
        let results = join_all(lookups).await;

        let mut batch = QuoteBatch::default();
        for (symbol, result) in unique.into_iter().zip(results) {
            match result {
                Ok(quote) => batch.quotes.push(quote),
                Err(error) => batch.errors.push(SymbolError { symbol, error }),
            }
        }
        batch
    }

    async fn get_quote(&self, symbol: &str, opts: QuoteOptions) -> Result<Quote, QuoteError> {
        if opts.use_cache {
            if let Some(quote) = self.quotes.get(CacheKind::Quote, symbol) {
                debug!(symbol, "quote served from cache");
                return Ok(quote);
            }
        }

        let quote = if opts.bypass_rate_limit {
            self.provider.fetch_quote(symbol).await?
        } else {
            self.limiter
                .throttle(|| self.provider.fetch_quote(symbol))
                .await?
        };

        // Providers should already reject unusable prices, but a misbehaving
        // payload must become a per-symbol error, not a cached zero.
        if !quote.has_usable_price() {
            return Err(QuoteError::no_data(symbol));
        }

        info!(
            symbol,
            price = %quote.price,
            source = self.provider.name(),
            "quote fetched"
        );
        self.quotes.insert(CacheKind::Quote, symbol, quote.clone());
        Ok(quote)
    }

    /// Serve the most recent cached quote without touching the network.
    /// Returns `None` when nothing fresh is cached.
    pub fn latest_quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(CacheKind::Quote, &normalize_symbol(symbol))
    }

    /// Company profile lookup through the long-TTL document cache.
    pub async fn company_profile(&self, symbol: &str) -> Result<serde_json::Value, QuoteError> {
        let symbol = normalize_symbol(symbol);
        if let Some(profile) = self.documents.get(CacheKind::Profile, &symbol) {
            debug!(symbol, "profile served from cache");
            return Ok(profile);
        }

        let profile = self
            .limiter
            .throttle(|| self.provider.fetch_profile(&symbol))
            .await?;
        self.documents
            .insert(CacheKind::Profile, &symbol, profile.clone());
        Ok(profile)
    }
}

mod cache;
mod client;
mod error;
mod finnhub;
mod provider;
mod rate_limiter;
mod symbols;

pub use cache::{CacheKind, QuoteCache};
pub use client::{QuoteBatch, QuoteClient, QuoteOptions, SymbolError};
pub use error::QuoteError;
pub use finnhub::FinnhubQuoteSource;
pub use provider::{QuoteProvider, StaticQuoteSource};
pub use rate_limiter::RateLimiter;
pub use symbols::{currency_for_symbol, normalize_symbol};

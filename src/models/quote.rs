use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market session state reported alongside a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    Regular,
    Closed,
    Pre,
    Post,
}

impl MarketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::Regular => "regular",
            MarketState::Closed => "closed",
            MarketState::Pre => "pre",
            MarketState::Post => "post",
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single point-in-time price observation for an instrument.
///
/// Quotes are immutable once constructed; a newer quote for the same symbol
/// supersedes an older one, nothing is ever mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Provider-normalized symbol, always uppercase.
    pub symbol: String,
    pub price: Decimal,
    pub absolute_change: Decimal,
    pub percent_change: Decimal,
    /// ISO currency code, derived from the symbol's exchange suffix.
    pub currency: String,
    pub observed_at: DateTime<Utc>,
    pub market_state: MarketState,
}

impl Quote {
    /// A quote is usable only when its price is strictly positive. Providers
    /// signal "no data" with zero or absent prices.
    pub fn has_usable_price(&self) -> bool {
        self.price > Decimal::ZERO
    }
}

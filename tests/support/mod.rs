#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use foliosync::models::{HoldingRecord, Id, MarketState, Quote};

/// Install a tracing subscriber for the test binary. Safe to call from every
/// test; only the first call wins. Enable output with RUST_LOG.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal literal")
}

pub fn march_2_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

pub fn quote(symbol: &str, price: &str) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price: dec(price),
        absolute_change: Decimal::ZERO,
        percent_change: Decimal::ZERO,
        currency: "USD".to_string(),
        observed_at: march_2_noon(),
        market_state: MarketState::Regular,
    }
}

pub fn holding(
    id: &str,
    broker: &str,
    portfolio: &str,
    symbol: &str,
    quantity: &str,
    cost_basis: &str,
) -> HoldingRecord {
    HoldingRecord {
        id: Id::from(id),
        broker_id: Id::from(broker),
        account_id: Id::from(format!("{broker}-main")),
        portfolio_id: Id::from(portfolio),
        symbol: symbol.to_string(),
        quantity: dec(quantity),
        cost_basis: dec(cost_basis),
        current_price: None,
        updated_at: march_2_noon(),
    }
}

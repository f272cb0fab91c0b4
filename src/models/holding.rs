use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;

/// A position reported by one broker connection.
///
/// Holdings are a derived projection of upstream broker data; this engine
/// never owns their system of record. `current_price` is the last known
/// quote price, carried so a holding can be valued even while the quote
/// path is degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingRecord {
    pub id: Id,
    pub broker_id: Id,
    pub account_id: Id,
    pub portfolio_id: Id,
    /// Normalized instrument symbol, uppercase.
    pub symbol: String,
    pub quantity: Decimal,
    /// Per-unit acquisition cost.
    pub cost_basis: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl HoldingRecord {
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.current_price = Some(price);
        self
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Id;

/// Derived metrics for a single holding.
///
/// `current_value`, `gain_loss` and `gain_loss_percent` are `None` when no
/// price is known for the symbol; such holdings are excluded from portfolio
/// totals rather than counted as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingMetrics {
    pub holding_id: Id,
    pub symbol: String,
    pub broker_id: Id,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub priced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_loss: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_loss_percent: Option<Decimal>,
    /// Share of the portfolio's priced value, 0 to 1.
    pub weight: Decimal,
}

/// Aggregated view of one portfolio at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub portfolio_id: Id,
    pub total_value: Decimal,
    pub total_cost: Decimal,
    pub total_gain_loss: Decimal,
    pub total_gain_loss_percent: Decimal,
    pub holdings: Vec<HoldingMetrics>,
    /// Holdings with no known price, excluded from the totals above.
    pub unpriced_count: usize,
    pub computed_at: DateTime<Utc>,
}

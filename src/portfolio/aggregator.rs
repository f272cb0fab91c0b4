use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{HoldingRecord, Id, Quote};

use super::models::{HoldingMetrics, PortfolioSnapshot};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Compute derived metrics for a single holding against the latest quotes.
///
/// Cost basis is per unit; total cost of the position is
/// `quantity * cost_basis`. Prices come from the quote map first, falling back
/// to the price recorded on the holding itself.
///
/// The `weight` field is left at zero here; only `portfolio_snapshot` knows
/// the portfolio total needed to fill it in.
pub fn holding_metrics(
    holding: &HoldingRecord,
    quotes: &HashMap<String, Quote>,
) -> HoldingMetrics {
    let price = quotes
        .get(&holding.symbol)
        .filter(|q| q.has_usable_price())
        .map(|q| q.price)
        .or(holding.current_price);

    let total_cost = holding.quantity * holding.cost_basis;
    let (current_value, gain_loss, gain_loss_percent) = match price {
        Some(price) => {
            let value = holding.quantity * price;
            let gain = value - total_cost;
            let percent = if total_cost.is_zero() {
                Decimal::ZERO
            } else {
                gain / total_cost * HUNDRED
            };
            (Some(value), Some(gain), Some(percent))
        }
        None => (None, None, None),
    };

    HoldingMetrics {
        holding_id: holding.id.clone(),
        symbol: holding.symbol.clone(),
        broker_id: holding.broker_id.clone(),
        quantity: holding.quantity,
        cost_basis: holding.cost_basis,
        priced: price.is_some(),
        current_value,
        gain_loss,
        gain_loss_percent,
        weight: Decimal::ZERO,
    }
}

/// Aggregate a portfolio's holdings into a snapshot.
///
/// Pure and deterministic: the same holdings, quotes and timestamp always
/// produce an identical snapshot. Unpriced holdings appear in the holding list
/// with `priced: false` but contribute nothing to totals or weights.
pub fn portfolio_snapshot(
    portfolio_id: Id,
    holdings: &[HoldingRecord],
    quotes: &HashMap<String, Quote>,
    computed_at: DateTime<Utc>,
) -> PortfolioSnapshot {
    let mut metrics: Vec<HoldingMetrics> = holdings
        .iter()
        .map(|h| holding_metrics(h, quotes))
        .collect();

    let total_value: Decimal = metrics.iter().filter_map(|m| m.current_value).sum();
    let total_cost: Decimal = metrics
        .iter()
        .filter(|m| m.priced)
        .map(|m| m.quantity * m.cost_basis)
        .sum();
    let total_gain_loss = total_value - total_cost;
    let total_gain_loss_percent = if total_cost.is_zero() {
        Decimal::ZERO
    } else {
        total_gain_loss / total_cost * HUNDRED
    };

    for m in &mut metrics {
        m.weight = match m.current_value {
            Some(value) if !total_value.is_zero() => value / total_value,
            _ => Decimal::ZERO,
        };
    }

    let unpriced_count = metrics.iter().filter(|m| !m.priced).count();
    if unpriced_count > 0 {
        debug!(
            portfolio_id = %portfolio_id,
            unpriced_count,
            "holdings without a known price excluded from totals"
        );
    }

    PortfolioSnapshot {
        portfolio_id,
        total_value,
        total_cost,
        total_gain_loss,
        total_gain_loss_percent,
        holdings: metrics,
        unpriced_count,
        computed_at,
    }
}

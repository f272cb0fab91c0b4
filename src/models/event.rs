use serde::{Deserialize, Serialize};

use super::{HoldingRecord, Id, Quote};

/// Key identifying which logical entity an update touches. Events for the
/// same key within one batch collapse last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    Symbol(String),
    Holding(Id),
    Portfolio(Id),
}

/// A typed change event flowing from the ingestion paths toward the
/// aggregation pipeline.
///
/// `sequence` is assigned by the subscription manager and increases
/// monotonically per manager instance; it orders events that carry the same
/// entity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateEvent {
    PriceUpdate {
        sequence: u64,
        quote: Quote,
    },
    HoldingUpdate {
        sequence: u64,
        holding: HoldingRecord,
        deleted: bool,
    },
    PortfolioUpdate {
        sequence: u64,
        portfolio_id: Id,
    },
}

impl UpdateEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            UpdateEvent::PriceUpdate { sequence, .. }
            | UpdateEvent::HoldingUpdate { sequence, .. }
            | UpdateEvent::PortfolioUpdate { sequence, .. } => *sequence,
        }
    }

    pub fn entity_key(&self) -> EntityKey {
        match self {
            UpdateEvent::PriceUpdate { quote, .. } => EntityKey::Symbol(quote.symbol.clone()),
            UpdateEvent::HoldingUpdate { holding, .. } => EntityKey::Holding(holding.id.clone()),
            UpdateEvent::PortfolioUpdate { portfolio_id, .. } => {
                EntityKey::Portfolio(portfolio_id.clone())
            }
        }
    }
}

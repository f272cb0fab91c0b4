use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{HoldingRecord, Id};

/// Lifecycle of a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Detected,
    Resolved,
    Ignored,
}

/// What to do with a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Treat the holdings as one position split across brokers.
    Merge,
    /// The holdings are genuinely separate positions.
    Separate,
    /// Stop surfacing this group.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOrigin {
    Manual,
    Automatic,
}

/// Record of how a group was resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    /// Holding whose data wins when merging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_source: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub resolved_at: DateTime<Utc>,
    pub origin: ResolutionOrigin,
}

/// Holdings for one symbol reported by more than one broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: Id,
    pub symbol: String,
    pub holdings: Vec<HoldingRecord>,
    /// Combined quantity if the group were merged into one position.
    pub total_quantity: Decimal,
    /// 0 to 100; deterministic for a given set of holdings and timestamp.
    pub confidence: u8,
    pub status: GroupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub detected_at: DateTime<Utc>,
}

impl DuplicateGroup {
    pub fn broker_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.holdings.iter().map(|h| h.broker_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("duplicate group {id} not found")]
    GroupNotFound { id: Id },

    #[error("duplicate group {id} is already resolved")]
    AlreadyResolved { id: Id },

    #[error("preferred source is not a member of group {id}")]
    UnknownPreferredSource { id: Id },
}

mod memory;

pub use memory::MemoryHoldingsStore;

use async_trait::async_trait;

use crate::models::{HoldingRecord, Id};

/// Narrow persistence seam for holdings. The engine reads through this trait
/// so tests and embedders can swap the backing store.
#[async_trait]
pub trait HoldingsStore: Send + Sync {
    async fn all_holdings(&self) -> Vec<HoldingRecord>;

    async fn holdings_for_portfolio(&self, portfolio_id: &Id) -> Vec<HoldingRecord>;

    /// Insert or replace by holding id.
    async fn upsert(&self, holding: HoldingRecord);

    /// Remove by id. Removing an unknown id is a no-op.
    async fn remove(&self, id: &Id);
}

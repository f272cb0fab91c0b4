use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{HoldingRecord, Id};

use super::HoldingsStore;

/// In-memory holdings store keyed by holding id.
#[derive(Default)]
pub struct MemoryHoldingsStore {
    holdings: Mutex<HashMap<Id, HoldingRecord>>,
}

impl MemoryHoldingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_holdings(holdings: Vec<HoldingRecord>) -> Self {
        let store = Self::new();
        for holding in holdings {
            store.upsert(holding).await;
        }
        store
    }
}

#[async_trait]
impl HoldingsStore for MemoryHoldingsStore {
    async fn all_holdings(&self) -> Vec<HoldingRecord> {
        let mut all: Vec<HoldingRecord> = self.holdings.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    async fn holdings_for_portfolio(&self, portfolio_id: &Id) -> Vec<HoldingRecord> {
        let mut matching: Vec<HoldingRecord> = self
            .holdings
            .lock()
            .await
            .values()
            .filter(|h| &h.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }

    async fn upsert(&self, holding: HoldingRecord) {
        self.holdings
            .lock()
            .await
            .insert(holding.id.clone(), holding);
    }

    async fn remove(&self, id: &Id) {
        self.holdings.lock().await.remove(id);
    }
}

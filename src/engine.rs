use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::market_data::{
    normalize_symbol, CacheKind, QuoteBatch, QuoteCache, QuoteClient, QuoteOptions, QuoteProvider,
    RateLimiter,
};
use crate::models::{HoldingRecord, Id, Quote, UpdateEvent};
use crate::portfolio::{portfolio_snapshot, PortfolioSnapshot};
use crate::reconcile::{DuplicateGroup, ReconcileError, ReconciliationEngine, ResolutionAction};
use crate::store::HoldingsStore;
use crate::subscription::{
    BatcherHandle, Changefeed, ConnectionState, FeedKey, SubscriptionError, SubscriptionEvent,
    SubscriptionHandle, SubscriptionManager, UpdateBatcher,
};

/// Engine-level notifications for embedders.
#[derive(Debug)]
pub enum EngineEvent {
    ConnectionChanged(ConnectionState),
    /// Reconnect budget exhausted; live updates have stopped until the next
    /// explicit `connect`.
    ConnectivityLost { attempts: u32 },
    /// Snapshots for these portfolios were recomputed from a flushed batch.
    PortfoliosRecomputed(Vec<Id>),
}

/// Top-level composition of the sync pipeline.
///
/// Owns every collaborator explicitly: quote cache, rate limiter, quote
/// client, subscription manager, update batcher, reconciliation engine. No
/// process-global state; dropping the engine (or calling `shutdown`) tears
/// the whole pipeline down.
pub struct SyncEngine {
    client: Arc<QuoteClient>,
    quotes: Arc<QuoteCache<Quote>>,
    subscription: SubscriptionHandle,
    batcher: BatcherHandle,
    reconciler: Arc<Mutex<ReconciliationEngine>>,
    store: Arc<dyn HoldingsStore>,
    snapshots: Arc<Mutex<HashMap<Id, PortfolioSnapshot>>>,
    clock: Arc<dyn Clock>,
    pipe_task: JoinHandle<()>,
    apply_task: JoinHandle<()>,
}

impl SyncEngine {
    /// Build the pipeline and spawn its background tasks. The returned
    /// receiver carries engine events; dropping it only mutes notifications,
    /// the pipeline keeps running.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn QuoteProvider>,
        feed: Arc<dyn Changefeed>,
        store: Arc<dyn HoldingsStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let quotes = Arc::new(QuoteCache::new(&config.quotes, clock.clone()));
        let documents = Arc::new(QuoteCache::new(&config.quotes, clock.clone()));
        let limiter = Arc::new(RateLimiter::new(&config.quotes));
        let client = Arc::new(QuoteClient::new(
            provider,
            limiter,
            quotes.clone(),
            documents,
        ));

        let (subscription, subscription_events) =
            SubscriptionManager::spawn(config.subscription, feed, clock.clone());
        let (batcher, batches) = UpdateBatcher::spawn(config.batching);

        let reconciler = Arc::new(Mutex::new(ReconciliationEngine::new(
            config.reconcile,
            clock.clone(),
        )));
        let snapshots: Arc<Mutex<HashMap<Id, PortfolioSnapshot>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (event_tx, event_rx) = mpsc::channel(256);

        let pipe_task = tokio::spawn(pipe_subscription_events(
            subscription_events,
            batcher.clone(),
            event_tx.clone(),
        ));

        let applier = BatchApplier {
            quotes: quotes.clone(),
            store: store.clone(),
            reconciler: reconciler.clone(),
            snapshots: snapshots.clone(),
            clock: clock.clone(),
            events: event_tx,
        };
        let apply_task = tokio::spawn(applier.run(batches));

        let engine = Self {
            client,
            quotes,
            subscription,
            batcher,
            reconciler,
            store,
            snapshots,
            clock,
            pipe_task,
            apply_task,
        };
        (engine, event_rx)
    }

    pub async fn connect(&self) -> Result<(), SubscriptionError> {
        self.subscription.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), SubscriptionError> {
        self.subscription.disconnect().await
    }

    pub async fn subscribe(&self, key: FeedKey) -> Result<(), SubscriptionError> {
        self.subscription.subscribe(key).await
    }

    pub async fn unsubscribe(&self, key: FeedKey) -> Result<(), SubscriptionError> {
        self.subscription.unsubscribe(key).await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, SubscriptionError> {
        self.subscription.state().await
    }

    /// Pull-path quote refresh through the cache-first client.
    pub async fn refresh_quotes(&self, symbols: &[String]) -> QuoteBatch {
        self.client.get_quotes(symbols, QuoteOptions::default()).await
    }

    /// Most recent known quote, cache only.
    pub fn latest_quote(&self, symbol: &str) -> Option<Quote> {
        self.client.latest_quote(symbol)
    }

    /// Last computed snapshot for a portfolio, if any batch has touched it.
    pub fn portfolio_snapshot(&self, portfolio_id: &Id) -> Option<PortfolioSnapshot> {
        self.snapshots
            .lock()
            .expect("snapshot lock poisoned")
            .get(portfolio_id)
            .cloned()
    }

    /// Recompute one portfolio from the store and cached quotes on demand.
    pub async fn recompute_portfolio(&self, portfolio_id: &Id) -> PortfolioSnapshot {
        let holdings = self.store.holdings_for_portfolio(portfolio_id).await;
        let snapshot =
            compute_snapshot(portfolio_id.clone(), &holdings, &self.quotes, self.clock.now());
        self.snapshots
            .lock()
            .expect("snapshot lock poisoned")
            .insert(portfolio_id.clone(), snapshot.clone());
        snapshot
    }

    /// Re-run duplicate detection over everything in the store.
    pub async fn detect_duplicates(&self) -> Vec<DuplicateGroup> {
        let holdings = self.store.all_holdings().await;
        self.reconciler
            .lock()
            .expect("reconciler lock poisoned")
            .detect(&holdings)
    }

    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        self.reconciler
            .lock()
            .expect("reconciler lock poisoned")
            .groups()
    }

    pub fn resolve_duplicate(
        &self,
        id: &Id,
        action: ResolutionAction,
        preferred_source: Option<Id>,
        reason: Option<String>,
    ) -> Result<DuplicateGroup, ReconcileError> {
        self.reconciler
            .lock()
            .expect("reconciler lock poisoned")
            .resolve(id, action, preferred_source, reason)
    }

    pub fn auto_resolve_duplicates(&self) -> Vec<DuplicateGroup> {
        self.reconciler
            .lock()
            .expect("reconciler lock poisoned")
            .auto_resolve()
    }

    /// Graceful teardown: stops the subscription manager and the batcher,
    /// then waits for the pipeline tasks to drain. No snapshot is mutated
    /// after this returns.
    pub async fn shutdown(self) {
        info!("sync engine shutting down");
        let _ = self.subscription.disconnect().await;
        let Self {
            subscription,
            batcher,
            pipe_task,
            apply_task,
            ..
        } = self;
        drop(subscription);
        drop(batcher);
        let _ = pipe_task.await;
        let _ = apply_task.await;
    }
}

async fn pipe_subscription_events(
    mut events: mpsc::Receiver<SubscriptionEvent>,
    batcher: BatcherHandle,
    out: mpsc::Sender<EngineEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SubscriptionEvent::Update(update) => {
                if !batcher.add(update).await {
                    break;
                }
            }
            SubscriptionEvent::StateChanged(state) => {
                let _ = out.send(EngineEvent::ConnectionChanged(state)).await;
            }
            SubscriptionEvent::FatalConnectivity { attempts } => {
                warn!(attempts, "live connectivity lost");
                let _ = out.send(EngineEvent::ConnectivityLost { attempts }).await;
            }
        }
    }
    debug!("subscription event pipe stopped");
}

struct BatchApplier {
    quotes: Arc<QuoteCache<Quote>>,
    store: Arc<dyn HoldingsStore>,
    reconciler: Arc<Mutex<ReconciliationEngine>>,
    snapshots: Arc<Mutex<HashMap<Id, PortfolioSnapshot>>>,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<EngineEvent>,
}

impl BatchApplier {
    async fn run(self, mut batches: mpsc::Receiver<Vec<UpdateEvent>>) {
        while let Some(batch) = batches.recv().await {
            if !batch.is_empty() {
                self.apply(batch).await;
            }
        }
        debug!("batch applier stopped");
    }

    async fn apply(&self, batch: Vec<UpdateEvent>) {
        debug!(events = batch.len(), "applying update batch");
        let mut affected: BTreeSet<Id> = BTreeSet::new();
        let mut touched_symbols: HashSet<String> = HashSet::new();
        let mut holdings_changed = false;

        for event in batch {
            match event {
                UpdateEvent::PriceUpdate { quote, .. } => {
                    let symbol = normalize_symbol(&quote.symbol);
                    self.quotes.insert(CacheKind::Quote, &symbol, quote);
                    touched_symbols.insert(symbol);
                }
                UpdateEvent::HoldingUpdate {
                    holding, deleted, ..
                } => {
                    affected.insert(holding.portfolio_id.clone());
                    if deleted {
                        self.store.remove(&holding.id).await;
                    } else {
                        self.store.upsert(holding).await;
                    }
                    holdings_changed = true;
                }
                UpdateEvent::PortfolioUpdate { portfolio_id, .. } => {
                    affected.insert(portfolio_id);
                }
            }
        }

        if !touched_symbols.is_empty() || holdings_changed {
            let all = self.store.all_holdings().await;
            for holding in &all {
                if touched_symbols.contains(&normalize_symbol(&holding.symbol)) {
                    affected.insert(holding.portfolio_id.clone());
                }
            }
            if holdings_changed {
                self.reconciler
                    .lock()
                    .expect("reconciler lock poisoned")
                    .detect(&all);
            }
        }

        if affected.is_empty() {
            return;
        }
        let now = self.clock.now();
        for portfolio_id in &affected {
            let holdings = self.store.holdings_for_portfolio(portfolio_id).await;
            let snapshot = compute_snapshot(portfolio_id.clone(), &holdings, &self.quotes, now);
            self.snapshots
                .lock()
                .expect("snapshot lock poisoned")
                .insert(portfolio_id.clone(), snapshot);
        }
        let _ = self
            .events
            .send(EngineEvent::PortfoliosRecomputed(
                affected.into_iter().collect(),
            ))
            .await;
    }
}

fn compute_snapshot(
    portfolio_id: Id,
    holdings: &[HoldingRecord],
    quotes: &QuoteCache<Quote>,
    now: chrono::DateTime<chrono::Utc>,
) -> PortfolioSnapshot {
    let mut latest: HashMap<String, Quote> = HashMap::new();
    for holding in holdings {
        if let Some(quote) = quotes.get(CacheKind::Quote, &normalize_symbol(&holding.symbol)) {
            latest.insert(holding.symbol.clone(), quote);
        }
    }
    portfolio_snapshot(portfolio_id, holdings, &latest, now)
}

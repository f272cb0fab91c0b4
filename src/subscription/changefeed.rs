use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{HoldingRecord, Id, Quote};

use super::SubscriptionError;

/// Kind of change delivered on the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Subscription key: changefeed entities are addressed per symbol or per
/// portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedKey {
    Symbol(String),
    Portfolio(Id),
}

/// The changed record carried by a notification.
#[derive(Debug, Clone)]
pub enum ChangeRecord {
    Quote(Quote),
    Holding(HoldingRecord),
    Portfolio(Id),
}

/// A raw change notification from the upstream feed.
///
/// Feeds may be shared channels that deliver unrelated records; the
/// subscription manager filters by key itself.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub record: ChangeRecord,
}

impl ChangeNotification {
    /// The subscription key this notification belongs to. Holding changes
    /// route to their owning portfolio.
    pub fn feed_key(&self) -> FeedKey {
        match &self.record {
            ChangeRecord::Quote(quote) => FeedKey::Symbol(quote.symbol.clone()),
            ChangeRecord::Holding(holding) => FeedKey::Portfolio(holding.portfolio_id.clone()),
            ChangeRecord::Portfolio(id) => FeedKey::Portfolio(id.clone()),
        }
    }
}

/// Seam to the push-based changefeed transport.
#[async_trait::async_trait]
pub trait Changefeed: Send + Sync {
    /// Establish the feed and return its notification stream. A previous
    /// stream, if any, is superseded.
    async fn connect(&self) -> Result<mpsc::Receiver<ChangeNotification>, SubscriptionError>;

    /// Lightweight round-trip probe. Returns the observed latency.
    async fn heartbeat(&self) -> Result<Duration, SubscriptionError>;
}

/// In-process changefeed used by tests and local wiring.
///
/// `set_offline(true)` makes both heartbeats and reconnects fail, simulating
/// OS-level network loss.
pub struct MemoryChangefeed {
    sender: Mutex<Option<mpsc::Sender<ChangeNotification>>>,
    offline: AtomicBool,
    heartbeat_latency: Mutex<Duration>,
}

impl Default for MemoryChangefeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChangefeed {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            offline: AtomicBool::new(false),
            heartbeat_latency: Mutex::new(Duration::from_millis(50)),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_heartbeat_latency(&self, latency: Duration) {
        *self
            .heartbeat_latency
            .lock()
            .expect("changefeed lock poisoned") = latency;
    }

    /// Push a notification onto the currently connected stream. Returns false
    /// when nothing is connected or the stream is full/closed.
    pub fn push(&self, notification: ChangeNotification) -> bool {
        let sender = self.sender.lock().expect("changefeed lock poisoned");
        match sender.as_ref() {
            Some(tx) => tx.try_send(notification).is_ok(),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl Changefeed for MemoryChangefeed {
    async fn connect(&self) -> Result<mpsc::Receiver<ChangeNotification>, SubscriptionError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SubscriptionError::connect("network unreachable"));
        }
        let (tx, rx) = mpsc::channel(256);
        *self.sender.lock().expect("changefeed lock poisoned") = Some(tx);
        Ok(rx)
    }

    async fn heartbeat(&self) -> Result<Duration, SubscriptionError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SubscriptionError::heartbeat("network unreachable"));
        }
        Ok(*self
            .heartbeat_latency
            .lock()
            .expect("changefeed lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::models::MarketState;

    fn price_notification(symbol: &str) -> ChangeNotification {
        ChangeNotification {
            kind: ChangeKind::Update,
            record: ChangeRecord::Quote(Quote {
                symbol: symbol.to_string(),
                price: Decimal::ONE,
                absolute_change: Decimal::ZERO,
                percent_change: Decimal::ZERO,
                currency: "USD".to_string(),
                observed_at: Utc::now(),
                market_state: MarketState::Regular,
            }),
        }
    }

    #[tokio::test]
    async fn push_delivers_to_connected_stream() {
        let feed = MemoryChangefeed::new();
        assert!(!feed.push(price_notification("AAPL")), "no stream yet");

        let mut rx = feed.connect().await.unwrap();
        assert!(feed.push(price_notification("AAPL")));
        let note = rx.recv().await.unwrap();
        assert_eq!(note.feed_key(), FeedKey::Symbol("AAPL".to_string()));
    }

    #[tokio::test]
    async fn offline_fails_connect_and_heartbeat() {
        let feed = MemoryChangefeed::new();
        feed.set_offline(true);
        assert!(feed.connect().await.is_err());
        assert!(feed.heartbeat().await.is_err());

        feed.set_offline(false);
        assert!(feed.connect().await.is_ok());
        assert!(feed.heartbeat().await.is_ok());
    }
}

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::config::BatchConfig;
use crate::models::UpdateEvent;

/// Handle for feeding events into a running batcher.
#[derive(Clone)]
pub struct BatcherHandle {
    input: mpsc::Sender<UpdateEvent>,
}

impl BatcherHandle {
    /// Queue an event for the current window. Returns false when the batcher
    /// has shut down.
    pub async fn add(&self, event: UpdateEvent) -> bool {
        self.input.send(event).await.is_ok()
    }
}

/// Coalesces bursts of update events into windowed batches.
///
/// The window deadline is armed when the first event of a window arrives and
/// is NOT extended by later events, so a steady stream still flushes every
/// window instead of starving consumers. Within a window, events for the same
/// entity collapse to the one with the highest sequence number; the batch
/// keeps each entity's first-arrival position.
pub struct UpdateBatcher;

impl UpdateBatcher {
    /// Spawn the batching task. Each message on the returned receiver is one
    /// complete flushed batch.
    pub fn spawn(config: BatchConfig) -> (BatcherHandle, mpsc::Receiver<Vec<UpdateEvent>>) {
        let (input_tx, input_rx) = mpsc::channel(1024);
        let (output_tx, output_rx) = mpsc::channel(64);
        tokio::spawn(run(config, input_rx, output_tx));
        (BatcherHandle { input: input_tx }, output_rx)
    }
}

async fn run(
    config: BatchConfig,
    mut input: mpsc::Receiver<UpdateEvent>,
    output: mpsc::Sender<Vec<UpdateEvent>>,
) {
    let mut buffer: Vec<UpdateEvent> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            event = input.recv() => {
                match event {
                    Some(event) => {
                        if !config.enabled {
                            // Pass-through mode: every event is its own batch.
                            if output.send(vec![event]).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + config.window);
                        }
                        coalesce(&mut buffer, event);
                    }
                    None => {
                        // Producers gone: flush what remains and stop.
                        if !buffer.is_empty() {
                            let _ = output.send(std::mem::take(&mut buffer)).await;
                        }
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let batch = std::mem::take(&mut buffer);
                debug!(events = batch.len(), "flushing update batch");
                if output.send(batch).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("update batcher stopped");
}

/// Insert an event, replacing an earlier event for the same entity when the
/// newcomer's sequence is higher. Replacement preserves the entity's original
/// position in the batch.
fn coalesce(buffer: &mut Vec<UpdateEvent>, event: UpdateEvent) {
    let key = event.entity_key();
    match buffer.iter_mut().find(|e| e.entity_key() == key) {
        Some(existing) => {
            if event.sequence() >= existing.sequence() {
                *existing = event;
            }
        }
        None => buffer.push(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::models::{MarketState, Quote};

    fn price_event(sequence: u64, symbol: &str, price: &str) -> UpdateEvent {
        UpdateEvent::PriceUpdate {
            sequence,
            quote: Quote {
                symbol: symbol.to_string(),
                price: price.parse().unwrap(),
                absolute_change: Decimal::ZERO,
                percent_change: Decimal::ZERO,
                currency: "USD".to_string(),
                observed_at: Utc::now(),
                market_state: MarketState::Regular,
            },
        }
    }

    fn enabled(window: Duration) -> BatchConfig {
        BatchConfig {
            enabled: true,
            window,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_for_one_symbol_flushes_as_single_latest_event() {
        let (handle, mut batches) = UpdateBatcher::spawn(enabled(Duration::from_millis(300)));

        for (i, price) in ["100", "101", "102", "103", "104"].iter().enumerate() {
            assert!(handle.add(price_event(i as u64 + 1, "AAPL", price)).await);
        }

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        match &batch[0] {
            UpdateEvent::PriceUpdate { sequence, quote } => {
                assert_eq!(*sequence, 5);
                assert_eq!(quote.price, "104".parse().unwrap());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_symbols_share_one_batch() {
        let (handle, mut batches) = UpdateBatcher::spawn(enabled(Duration::from_millis(300)));

        handle.add(price_event(1, "AAPL", "100")).await;
        handle.add(price_event(2, "MSFT", "200")).await;
        handle.add(price_event(3, "AAPL", "101")).await;

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        // AAPL arrived first and keeps its slot despite being updated later.
        match &batch[0] {
            UpdateEvent::PriceUpdate { quote, .. } => assert_eq!(quote.symbol, "AAPL"),
            other => panic!("unexpected event {other:?}"),
        }
        match &batch[1] {
            UpdateEvent::PriceUpdate { quote, .. } => assert_eq!(quote.symbol, "MSFT"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_armed_by_first_event_not_extended_by_later_ones() {
        let (handle, mut batches) = UpdateBatcher::spawn(enabled(Duration::from_millis(300)));

        handle.add(price_event(1, "AAPL", "100")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Arrives mid-window; must not push the deadline out.
        handle.add(price_event(2, "MSFT", "200")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);

        // A fresh event after the flush starts a new window.
        handle.add(price_event(3, "AAPL", "101")).await;
        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sequence_does_not_overwrite_newer_event() {
        let (handle, mut batches) = UpdateBatcher::spawn(enabled(Duration::from_millis(300)));

        handle.add(price_event(7, "AAPL", "110")).await;
        // Out-of-order arrival with a lower sequence.
        handle.add(price_event(4, "AAPL", "90")).await;

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        match &batch[0] {
            UpdateEvent::PriceUpdate { sequence, quote } => {
                assert_eq!(*sequence, 7);
                assert_eq!(quote.price, "110".parse().unwrap());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_batching_passes_events_through_immediately() {
        let config = BatchConfig {
            enabled: false,
            window: Duration::from_secs(60),
        };
        let (handle, mut batches) = UpdateBatcher::spawn(config);

        handle.add(price_event(1, "AAPL", "100")).await;
        handle.add(price_event(2, "AAPL", "101")).await;

        let first = batches.recv().await.unwrap();
        let second = batches.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].sequence(), 1);
        assert_eq!(second[0].sequence(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_events_flush_when_input_closes() {
        let (handle, mut batches) = UpdateBatcher::spawn(enabled(Duration::from_secs(60)));

        handle.add(price_event(1, "AAPL", "100")).await;
        handle.add(price_event(2, "MSFT", "200")).await;
        drop(handle);

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batches.recv().await.is_none());
    }
}

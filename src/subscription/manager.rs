use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SubscriptionConfig;
use crate::models::UpdateEvent;

use super::changefeed::{ChangeKind, ChangeNotification, ChangeRecord, Changefeed, FeedKey};
use super::quality::{ConnectionHealth, ConnectionState};
use super::{ReconnectPolicy, SubscriptionError};

/// Events emitted by the manager on its outbound channel.
#[derive(Debug)]
pub enum SubscriptionEvent {
    Update(UpdateEvent),
    /// Emitted on connection phase transitions, not per heartbeat.
    StateChanged(ConnectionState),
    /// Reconnect budget exhausted. Emitted exactly once per outage.
    FatalConnectivity { attempts: u32 },
}

enum Command {
    Connect(oneshot::Sender<Result<(), SubscriptionError>>),
    Disconnect(oneshot::Sender<()>),
    Subscribe(FeedKey, oneshot::Sender<Result<(), SubscriptionError>>),
    Unsubscribe(FeedKey, oneshot::Sender<()>),
    State(oneshot::Sender<ConnectionState>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Handle to a running subscription manager actor.
///
/// Dropping every handle shuts the actor down; pending timers die with it,
/// so no event can fire after teardown.
#[derive(Clone)]
pub struct SubscriptionHandle {
    commands: mpsc::Sender<Command>,
}

impl SubscriptionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SubscriptionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SubscriptionError::ChannelClosed)?;
        rx.await.map_err(|_| SubscriptionError::ChannelClosed)
    }

    pub async fn connect(&self) -> Result<(), SubscriptionError> {
        self.request(Command::Connect).await?
    }

    /// Idempotent: disconnecting a disconnected manager is a no-op.
    pub async fn disconnect(&self) -> Result<(), SubscriptionError> {
        self.request(Command::Disconnect).await
    }

    /// Reference-counted: repeated subscriptions to the same key are no-ops
    /// beyond the first.
    pub async fn subscribe(&self, key: FeedKey) -> Result<(), SubscriptionError> {
        self.request(|tx| Command::Subscribe(key, tx)).await?
    }

    pub async fn unsubscribe(&self, key: FeedKey) -> Result<(), SubscriptionError> {
        self.request(|tx| Command::Unsubscribe(key, tx)).await
    }

    pub async fn state(&self) -> Result<ConnectionState, SubscriptionError> {
        self.request(Command::State).await
    }
}

/// Owns one changefeed connection and converts raw notifications into typed,
/// sequenced update events.
///
/// All connection/quality state is mutated on a single actor task; timers
/// (heartbeat, reconnect backoff) are arms of the same select loop, so there
/// is no free-threaded shared mutation.
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    feed: Arc<dyn Changefeed>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SubscriptionEvent>,

    phase: Phase,
    feed_rx: Option<mpsc::Receiver<ChangeNotification>>,
    subscriptions: HashMap<FeedKey, usize>,
    health: ConnectionHealth,
    policy: ReconnectPolicy,
    reconnect_at: Option<Instant>,
    next_sequence: u64,
}

impl SubscriptionManager {
    /// Spawn the actor. Returns the command handle and the outbound event
    /// stream.
    pub fn spawn(
        config: SubscriptionConfig,
        feed: Arc<dyn Changefeed>,
        clock: Arc<dyn Clock>,
    ) -> (SubscriptionHandle, mpsc::Receiver<SubscriptionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(1024);

        let policy = ReconnectPolicy::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.max_reconnect_attempts,
        );
        let manager = Self {
            config,
            feed,
            clock,
            commands: command_rx,
            events: event_tx,
            phase: Phase::Disconnected,
            feed_rx: None,
            subscriptions: HashMap::new(),
            health: ConnectionHealth::new(),
            policy,
            reconnect_at: None,
            next_sequence: 0,
        };
        tokio::spawn(manager.run());

        (SubscriptionHandle { commands: command_tx }, event_rx)
    }

    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval is immediate; consume it so the
        // first probe happens one full interval after connect.
        heartbeat.tick().await;

        loop {
            // select! needs a concrete deadline even when no reconnect is
            // pending; the guard keeps the idle arm from ever firing.
            let reconnect_deadline = self
                .reconnect_at
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        // Every handle dropped: tear down.
                        None => break,
                    }
                }
                notification = Self::recv_feed(&mut self.feed_rx), if self.feed_rx.is_some() => {
                    match notification {
                        Some(notification) => self.handle_notification(notification).await,
                        None => {
                            // Stream ended unexpectedly: treat as network loss.
                            warn!("changefeed stream closed unexpectedly");
                            self.health
                                .record_error("changefeed stream closed", self.clock.now());
                            self.begin_reconnect().await;
                        }
                    }
                }
                _ = heartbeat.tick(), if self.phase == Phase::Connected => {
                    self.run_heartbeat().await;
                }
                _ = tokio::time::sleep_until(reconnect_deadline), if self.reconnect_at.is_some() => {
                    self.attempt_reconnect().await;
                }
            }
        }
        debug!("subscription manager stopped");
    }

    async fn recv_feed(
        rx: &mut Option<mpsc::Receiver<ChangeNotification>>,
    ) -> Option<ChangeNotification> {
        match rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Subscribe(key, reply) => {
                let result = self.subscribe(key);
                let _ = reply.send(result);
            }
            Command::Unsubscribe(key, reply) => {
                self.unsubscribe(&key);
                let _ = reply.send(());
            }
            Command::State(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn connect(&mut self) -> Result<(), SubscriptionError> {
        if self.phase == Phase::Connected {
            return Ok(());
        }
        match self.feed.connect().await {
            Ok(rx) => {
                info!("changefeed connected");
                self.feed_rx = Some(rx);
                self.phase = Phase::Connected;
                self.reconnect_at = None;
                self.policy.reset();
                self.health.reset();
                self.emit_state().await;
                Ok(())
            }
            Err(err) => {
                self.health.record_error(err.to_string(), self.clock.now());
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.phase == Phase::Disconnected && self.feed_rx.is_none() {
            return;
        }
        info!("changefeed disconnected");
        self.feed_rx = None;
        self.subscriptions.clear();
        self.reconnect_at = None;
        self.phase = Phase::Disconnected;
        self.emit_state().await;
    }

    fn subscribe(&mut self, key: FeedKey) -> Result<(), SubscriptionError> {
        if !self.subscriptions.contains_key(&key)
            && self.subscriptions.len() >= self.config.max_subscriptions
        {
            return Err(SubscriptionError::SubscriptionLimit {
                max: self.config.max_subscriptions,
                key,
            });
        }
        let count = self.subscriptions.entry(key.clone()).or_insert(0);
        *count += 1;
        debug!(?key, refcount = *count, "subscribed");
        Ok(())
    }

    fn unsubscribe(&mut self, key: &FeedKey) {
        if let Some(count) = self.subscriptions.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.subscriptions.remove(key);
                debug!(?key, "last reference removed, subscription torn down");
            }
        }
    }

    async fn handle_notification(&mut self, notification: ChangeNotification) {
        // Shared channel: drop records nobody subscribed to.
        if !self.subscriptions.contains_key(&notification.feed_key()) {
            return;
        }

        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let event = match notification.record {
            ChangeRecord::Quote(quote) => UpdateEvent::PriceUpdate { sequence, quote },
            ChangeRecord::Holding(holding) => UpdateEvent::HoldingUpdate {
                sequence,
                holding,
                deleted: notification.kind == ChangeKind::Delete,
            },
            ChangeRecord::Portfolio(portfolio_id) => UpdateEvent::PortfolioUpdate {
                sequence,
                portfolio_id,
            },
        };

        if self.events.send(SubscriptionEvent::Update(event)).await.is_err() {
            debug!("event receiver dropped, discarding update");
        }
    }

    async fn run_heartbeat(&mut self) {
        let probe = tokio::time::timeout(self.config.heartbeat_timeout, self.feed.heartbeat());
        match probe.await {
            Ok(Ok(latency)) => {
                self.health.record_heartbeat(latency, self.clock.now());
            }
            Ok(Err(err)) => {
                warn!(error = %err, "heartbeat probe failed");
                self.health.record_error(err.to_string(), self.clock.now());
            }
            Err(_) => {
                warn!(timeout = ?self.config.heartbeat_timeout, "heartbeat probe timed out");
                self.health
                    .record_error("heartbeat timed out", self.clock.now());
            }
        }

        if self.phase == Phase::Connected
            && self.health.failure_streak() >= self.config.heartbeat_failure_streak
        {
            warn!(
                streak = self.health.failure_streak(),
                "heartbeat failure streak, reconnecting"
            );
            self.begin_reconnect().await;
        }
    }

    async fn begin_reconnect(&mut self) {
        self.feed_rx = None;
        self.phase = Phase::Reconnecting;
        self.emit_state().await;
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(&mut self) {
        match self.policy.next_delay() {
            Some(delay) => {
                debug!(?delay, attempt = self.policy.attempt_count(), "reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                let attempts = self.policy.attempt_count();
                let err = SubscriptionError::ReconnectExhausted { attempts };
                warn!(error = %err, "giving up");
                // The terminal StateChanged carries the reason in its error
                // history.
                self.health.record_error(err.to_string(), self.clock.now());
                self.reconnect_at = None;
                self.phase = Phase::Disconnected;
                let _ = self
                    .events
                    .send(SubscriptionEvent::FatalConnectivity { attempts })
                    .await;
                self.emit_state().await;
            }
        }
    }

    async fn attempt_reconnect(&mut self) {
        self.reconnect_at = None;
        match self.feed.connect().await {
            Ok(rx) => {
                info!(
                    attempts = self.policy.attempt_count(),
                    "changefeed reconnected"
                );
                self.feed_rx = Some(rx);
                self.phase = Phase::Connected;
                self.policy.reset();
                self.health.reset();
                self.emit_state().await;
            }
            Err(err) => {
                warn!(error = %err, "reconnect attempt failed");
                self.health.record_error(err.to_string(), self.clock.now());
                self.schedule_reconnect().await;
            }
        }
    }

    fn snapshot(&self) -> ConnectionState {
        self.health.snapshot(
            self.phase == Phase::Connected,
            self.phase == Phase::Reconnecting,
            self.subscriptions.len(),
        )
    }

    async fn emit_state(&mut self) {
        let _ = self
            .events
            .send(SubscriptionEvent::StateChanged(self.snapshot()))
            .await;
    }
}

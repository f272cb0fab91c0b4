use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling window sizes for latency and error history.
const LATENCY_WINDOW: usize = 10;
const ERROR_WINDOW: usize = 16;

/// Coarse classification of connection health, derived from recent heartbeat
/// latencies and error counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Poor,
    Disconnected,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Poor => "poor",
            QualityTier::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded connection error, kept in a bounded ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Consumer-visible snapshot of a subscription manager's connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_reconnecting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub quality_tier: QualityTier,
    pub active_subscription_count: usize,
    pub recent_errors: Vec<RecordedError>,
}

/// Mutable latency/error history owned by the manager actor. All mutation
/// happens on the actor task; consumers only ever see `ConnectionState`
/// snapshots.
#[derive(Debug)]
pub struct ConnectionHealth {
    latencies: VecDeque<Duration>,
    errors: VecDeque<RecordedError>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    /// Consecutive heartbeat failures; reset by any success.
    failure_streak: u32,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            errors: VecDeque::with_capacity(ERROR_WINDOW),
            last_heartbeat_at: None,
            failure_streak: 0,
        }
    }

    pub fn record_heartbeat(&mut self, latency: Duration, at: DateTime<Utc>) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        self.last_heartbeat_at = Some(at);
        self.failure_streak = 0;
    }

    pub fn record_error(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        if self.errors.len() == ERROR_WINDOW {
            self.errors.pop_front();
        }
        self.errors.push_back(RecordedError {
            at,
            message: message.into(),
        });
        self.failure_streak += 1;
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at
    }

    /// Clear histories after a successful reconnect; stale latencies from the
    /// old connection should not color the new one.
    pub fn reset(&mut self) {
        self.latencies.clear();
        self.errors.clear();
        self.failure_streak = 0;
    }

    fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    /// Derive the quality tier for a connected manager.
    ///
    /// Thresholds: excellent below 1s average latency with at most 2 recent
    /// errors; good below 2s with at most 5; anything worse is poor.
    pub fn tier(&self, connected: bool) -> QualityTier {
        if !connected {
            return QualityTier::Disconnected;
        }
        let avg = self.average_latency().unwrap_or(Duration::ZERO);
        let errors = self.errors.len();

        if avg < Duration::from_millis(1000) && errors <= 2 {
            QualityTier::Excellent
        } else if avg < Duration::from_millis(2000) && errors <= 5 {
            QualityTier::Good
        } else {
            QualityTier::Poor
        }
    }

    pub fn snapshot(
        &self,
        connected: bool,
        reconnecting: bool,
        active_subscription_count: usize,
    ) -> ConnectionState {
        ConnectionState {
            is_connected: connected,
            is_reconnecting: reconnecting,
            last_heartbeat_at: self.last_heartbeat_at,
            quality_tier: self.tier(connected),
            active_subscription_count,
            recent_errors: self.errors.iter().cloned().collect(),
        }
    }
}

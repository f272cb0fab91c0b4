use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

/// Default sustained provider call rate (requests per second).
fn default_requests_per_second() -> u32 {
    10
}

/// Default cap on concurrent in-flight provider calls.
fn default_max_concurrent_requests() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

/// Live quotes go stale quickly.
fn default_quote_ttl() -> Duration {
    Duration::from_secs(60)
}

/// Company profiles barely change; cache for a day.
fn default_profile_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_financials_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_news_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_max_cache_entries() -> usize {
    1024
}

/// Quote fetching, caching, and rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    pub requests_per_second: u32,
    pub max_concurrent_requests: usize,
    /// Retry budget for transient provider failures, per operation.
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub quote_ttl: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub profile_ttl: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub financials_ttl: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub news_ttl: Duration,
    /// Entry cap; oldest-inserted entries are evicted beyond this.
    pub max_cache_entries: usize,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            quote_ttl: default_quote_ttl(),
            profile_ttl: default_profile_ttl(),
            financials_ttl: default_financials_ttl(),
            news_ttl: default_news_ttl(),
            max_cache_entries: default_max_cache_entries(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_failure_streak() -> u32 {
    3
}

fn default_reconnect_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(64)
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_subscriptions() -> usize {
    256
}

/// Changefeed connection, heartbeat, and reconnection behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub heartbeat_interval: Duration,
    /// A heartbeat probe that has not completed within this window counts as
    /// a failure.
    #[serde(deserialize_with = "deserialize_duration")]
    pub heartbeat_timeout: Duration,
    /// Consecutive heartbeat failures before reconnection is attempted.
    pub heartbeat_failure_streak: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub reconnect_base_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub reconnect_max_delay: Duration,
    /// Reconnect attempts before giving up with a fatal connectivity error.
    pub max_reconnect_attempts: u32,
    /// Ceiling on distinct subscription keys; beyond this, subscribe requests
    /// are rejected explicitly.
    pub max_subscriptions: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            heartbeat_failure_streak: default_heartbeat_failure_streak(),
            reconnect_base_delay: default_reconnect_base_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_subscriptions: default_max_subscriptions(),
        }
    }
}

fn default_batch_window() -> Duration {
    Duration::from_millis(300)
}

fn default_batching_enabled() -> bool {
    true
}

/// Update coalescing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// When false, every event flushes immediately as a singleton batch.
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_batching_enabled(),
            window: default_batch_window(),
        }
    }
}

fn default_auto_resolve_threshold() -> u8 {
    90
}

fn default_quantity_tolerance() -> Decimal {
    // Relative tolerance: 1%.
    Decimal::new(1, 2)
}

fn default_recency_horizon() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Cross-broker duplicate detection and resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum confidence (0-100) for automatic resolution.
    pub auto_resolve_threshold: u8,
    /// Relative quantity delta below which a resolved group is not re-flagged.
    pub quantity_tolerance: Decimal,
    /// Holdings older than this score zero on the recency signal.
    #[serde(deserialize_with = "deserialize_duration")]
    pub recency_horizon: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            auto_resolve_threshold: default_auto_resolve_threshold(),
            quantity_tolerance: default_quantity_tolerance(),
            recency_horizon: default_recency_horizon(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quotes: QuoteConfig,
    pub subscription: SubscriptionConfig,
    pub batching: BatchConfig,
    pub reconcile: ReconcileConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse engine config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

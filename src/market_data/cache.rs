use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::config::QuoteConfig;

/// TTL class a cached value belongs to. Keys are namespaced by kind, so a
/// quote for "AAPL" and a profile for "AAPL" never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Quote,
    Profile,
    Financials,
    News,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Quote => "quote",
            CacheKind::Profile => "profile",
            CacheKind::Financials => "financials",
            CacheKind::News => "news",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: CacheKind,
    key: String,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    generation: u64,
    expires_at: DateTime<Utc>,
}

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// Insertion order for eviction, tagged with the entry's generation.
    /// Entries superseded by a re-insert leave a stale marker here; the sweep
    /// on insert purges those so the queue stays proportional to the live
    /// entry count.
    insertion_order: VecDeque<(CacheKey, u64)>,
    next_generation: u64,
}

/// TTL-based in-memory cache with per-kind expiry and bounded size.
///
/// Expiry is lazy (checked on read) and swept opportunistically on writes.
/// When the entry count exceeds the configured maximum, the oldest-inserted
/// entries are evicted first (insertion order, not access order).
///
/// Callers only ever receive clones of the payload; entries themselves are
/// never exposed.
pub struct QuoteCache<V> {
    state: Mutex<CacheState<V>>,
    quote_ttl: Duration,
    profile_ttl: Duration,
    financials_ttl: Duration,
    news_ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> QuoteCache<V> {
    pub fn new(config: &QuoteConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
                next_generation: 0,
            }),
            quote_ttl: config.quote_ttl,
            profile_ttl: config.profile_ttl,
            financials_ttl: config.financials_ttl,
            news_ttl: config.news_ttl,
            max_entries: config.max_cache_entries,
            clock,
        }
    }

    fn ttl_for(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Quote => self.quote_ttl,
            CacheKind::Profile => self.profile_ttl,
            CacheKind::Financials => self.financials_ttl,
            CacheKind::News => self.news_ttl,
        }
    }

    pub fn insert(&self, kind: CacheKind, key: &str, payload: V) {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl_for(kind))
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cache_key = CacheKey {
            kind,
            key: key.to_string(),
        };

        let mut state = self.state.lock().expect("cache lock poisoned");
        let state = &mut *state;

        // Opportunistic sweep: drop anything already expired, then purge
        // markers whose entry is gone or was superseded by a re-insert.
        state.entries.retain(|_, entry| entry.expires_at > now);
        let entries = &state.entries;
        state.insertion_order.retain(|(key, generation)| {
            entries
                .get(key)
                .map(|entry| entry.generation == *generation)
                .unwrap_or(false)
        });

        let generation = state.next_generation;
        state.next_generation += 1;
        state.insertion_order.push_back((cache_key.clone(), generation));
        state.entries.insert(
            cache_key,
            CacheEntry {
                payload,
                generation,
                expires_at: now + ttl,
            },
        );

        while state.entries.len() > self.max_entries {
            let Some((oldest_key, generation)) = state.insertion_order.pop_front() else {
                break;
            };
            // An entry this insert just superseded still has its old marker
            // queued until the next sweep; skip stale markers.
            let matches = state
                .entries
                .get(&oldest_key)
                .map(|entry| entry.generation == generation)
                .unwrap_or(false);
            if matches {
                debug!(kind = %oldest_key.kind, key = %oldest_key.key, "evicting oldest cache entry");
                state.entries.remove(&oldest_key);
            }
        }
    }

    pub fn get(&self, kind: CacheKind, key: &str) -> Option<V> {
        let now = self.clock.now();
        let cache_key = CacheKey {
            kind,
            key: key.to_string(),
        };

        let mut state = self.state.lock().expect("cache lock poisoned");
        match state.entries.get(&cache_key) {
            Some(entry) if entry.expires_at > now => Some(entry.payload.clone()),
            Some(_) => {
                // Lazy expiry on read.
                state.entries.remove(&cache_key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, kind: CacheKind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.clear();
        state.insertion_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
        ))
    }

    fn cache_with(max_entries: usize, clock: Arc<ManualClock>) -> QuoteCache<String> {
        let config = QuoteConfig {
            max_cache_entries: max_entries,
            ..QuoteConfig::default()
        };
        QuoteCache::new(&config, clock)
    }

    #[test]
    fn get_returns_fresh_and_drops_expired() {
        let clock = manual_clock();
        let cache = cache_with(16, clock.clone());

        cache.insert(CacheKind::Quote, "AAPL", "187.33".to_string());
        assert_eq!(
            cache.get(CacheKind::Quote, "AAPL"),
            Some("187.33".to_string())
        );

        // Quote TTL is 60s; at t+30 still fresh, at t+90 expired.
        clock.advance(chrono::Duration::seconds(30));
        assert!(cache.contains(CacheKind::Quote, "AAPL"));

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(cache.get(CacheKind::Quote, "AAPL"), None);
        // Lazy expiry removed the entry.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn kinds_do_not_collide_and_have_own_ttls() {
        let clock = manual_clock();
        let cache = cache_with(16, clock.clone());

        cache.insert(CacheKind::Quote, "AAPL", "quote".to_string());
        cache.insert(CacheKind::Profile, "AAPL", "profile".to_string());

        assert_eq!(cache.get(CacheKind::Quote, "AAPL"), Some("quote".to_string()));
        assert_eq!(
            cache.get(CacheKind::Profile, "AAPL"),
            Some("profile".to_string())
        );

        // Past the quote TTL but well within the profile TTL.
        clock.advance(chrono::Duration::seconds(120));
        assert_eq!(cache.get(CacheKind::Quote, "AAPL"), None);
        assert_eq!(
            cache.get(CacheKind::Profile, "AAPL"),
            Some("profile".to_string())
        );
    }

    #[test]
    fn eviction_removes_oldest_inserted_first() {
        let clock = manual_clock();
        let cache = cache_with(2, clock.clone());

        cache.insert(CacheKind::Quote, "A", "1".to_string());
        clock.advance(chrono::Duration::seconds(1));
        cache.insert(CacheKind::Quote, "B", "2".to_string());
        clock.advance(chrono::Duration::seconds(1));

        // Reading A does not protect it; eviction is by insertion, not access.
        assert!(cache.contains(CacheKind::Quote, "A"));

        cache.insert(CacheKind::Quote, "C", "3".to_string());
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(CacheKind::Quote, "A"));
        assert!(cache.contains(CacheKind::Quote, "B"));
        assert!(cache.contains(CacheKind::Quote, "C"));
    }

    #[test]
    fn reinsert_refreshes_insertion_position() {
        let clock = manual_clock();
        let cache = cache_with(2, clock.clone());

        cache.insert(CacheKind::Quote, "A", "1".to_string());
        clock.advance(chrono::Duration::seconds(1));
        cache.insert(CacheKind::Quote, "B", "2".to_string());
        clock.advance(chrono::Duration::seconds(1));
        // Re-insert A; B is now the oldest.
        cache.insert(CacheKind::Quote, "A", "1b".to_string());
        clock.advance(chrono::Duration::seconds(1));
        cache.insert(CacheKind::Quote, "C", "3".to_string());

        assert!(cache.contains(CacheKind::Quote, "A"));
        assert!(!cache.contains(CacheKind::Quote, "B"));
        assert!(cache.contains(CacheKind::Quote, "C"));
    }

    #[test]
    fn reinserting_a_key_does_not_grow_the_eviction_queue() {
        let clock = manual_clock();
        let cache = cache_with(16, clock);

        // A live price feed re-inserts the same symbol on every tick; the
        // eviction queue must not accumulate a marker per tick.
        for i in 0..10_000 {
            cache.insert(CacheKind::Quote, "AAPL", format!("{i}"));
        }

        assert_eq!(cache.len(), 1);
        let markers = cache
            .state
            .lock()
            .expect("cache lock poisoned")
            .insertion_order
            .len();
        assert!(markers <= 2, "eviction queue retained {markers} markers");
    }

    #[test]
    fn insert_sweeps_expired_entries() {
        let clock = manual_clock();
        let cache = cache_with(16, clock.clone());

        cache.insert(CacheKind::Quote, "A", "1".to_string());
        cache.insert(CacheKind::Quote, "B", "2".to_string());
        assert_eq!(cache.len(), 2);

        clock.advance(chrono::Duration::seconds(120));
        cache.insert(CacheKind::Quote, "C", "3".to_string());
        // The write swept both expired quotes.
        assert_eq!(cache.len(), 1);
    }
}

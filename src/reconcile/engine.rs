use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ReconcileConfig;
use crate::market_data::normalize_symbol;
use crate::models::{HoldingRecord, Id};

use super::models::{
    DuplicateGroup, GroupStatus, ReconcileError, Resolution, ResolutionAction, ResolutionOrigin,
};

/// Per-broker quantities a group was last scored against. Used to decide
/// whether a resolved group must be re-surfaced.
type Fingerprint = Vec<(String, Decimal)>;

struct TrackedGroup {
    group: DuplicateGroup,
    fingerprint: Fingerprint,
}

/// Detects holdings reported by more than one broker for the same symbol and
/// tracks their resolution lifecycle.
///
/// Confidence scoring is deterministic: the same holdings and clock reading
/// always produce the same score. Signals and weights: number of distinct
/// brokers (up to 40), share of holdings updated within the recency horizon
/// (up to 40), directional quantity agreement (20 when all quantities point
/// the same way, 10 otherwise).
pub struct ReconciliationEngine {
    config: ReconcileConfig,
    clock: Arc<dyn Clock>,
    groups: HashMap<String, TrackedGroup>,
}

impl ReconciliationEngine {
    pub fn new(config: ReconcileConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            groups: HashMap::new(),
        }
    }

    /// Re-run detection over the current holdings.
    ///
    /// Groups keep their identity (and any resolution) across runs. A
    /// resolved or ignored group reverts to detected only when its broker set
    /// changed or a per-broker quantity moved beyond the configured
    /// tolerance. Groups whose symbol no longer spans multiple brokers are
    /// dropped.
    pub fn detect(&mut self, holdings: &[HoldingRecord]) -> Vec<DuplicateGroup> {
        let now = self.clock.now();

        let mut by_symbol: HashMap<String, Vec<HoldingRecord>> = HashMap::new();
        for holding in holdings {
            by_symbol
                .entry(normalize_symbol(&holding.symbol))
                .or_default()
                .push(holding.clone());
        }
        by_symbol.retain(|_, members| distinct_brokers(members) > 1);

        self.groups.retain(|symbol, tracked| {
            if by_symbol.contains_key(symbol) {
                true
            } else {
                debug!(symbol = %symbol, group_id = %tracked.group.id, "duplicate group dissolved");
                false
            }
        });

        for (symbol, mut members) in by_symbol {
            // Stable member order keeps output independent of input order.
            members.sort_by(|a, b| (&a.broker_id, &a.id).cmp(&(&b.broker_id, &b.id)));
            let fingerprint = fingerprint_of(&members);
            let confidence = self.score(&members, now);
            let total_quantity: Decimal = members.iter().map(|h| h.quantity).sum();

            match self.groups.get_mut(&symbol) {
                Some(tracked) => {
                    let material = material_change(
                        &tracked.fingerprint,
                        &fingerprint,
                        self.config.quantity_tolerance,
                    );
                    tracked.group.holdings = members;
                    tracked.group.total_quantity = total_quantity;
                    tracked.group.confidence = confidence;
                    tracked.fingerprint = fingerprint;
                    if material && tracked.group.status != GroupStatus::Detected {
                        info!(
                            symbol = %symbol,
                            group_id = %tracked.group.id,
                            "material change, re-surfacing resolved group"
                        );
                        tracked.group.status = GroupStatus::Detected;
                        tracked.group.resolution = None;
                        tracked.group.detected_at = now;
                    }
                }
                None => {
                    let group = DuplicateGroup {
                        id: Id::new(),
                        symbol: symbol.clone(),
                        holdings: members,
                        total_quantity,
                        confidence,
                        status: GroupStatus::Detected,
                        resolution: None,
                        detected_at: now,
                    };
                    debug!(
                        symbol = %symbol,
                        group_id = %group.id,
                        confidence,
                        "duplicate group detected"
                    );
                    self.groups.insert(symbol, TrackedGroup { group, fingerprint });
                }
            }
        }

        self.groups()
    }

    /// All tracked groups, ordered by symbol.
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        let mut groups: Vec<DuplicateGroup> =
            self.groups.values().map(|t| t.group.clone()).collect();
        groups.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        groups
    }

    pub fn group(&self, id: &Id) -> Option<DuplicateGroup> {
        self.groups
            .values()
            .find(|t| &t.group.id == id)
            .map(|t| t.group.clone())
    }

    /// Apply a manual resolution to a detected group.
    pub fn resolve(
        &mut self,
        id: &Id,
        action: ResolutionAction,
        preferred_source: Option<Id>,
        reason: Option<String>,
    ) -> Result<DuplicateGroup, ReconcileError> {
        let now = self.clock.now();
        let tracked = self
            .groups
            .values_mut()
            .find(|t| &t.group.id == id)
            .ok_or_else(|| ReconcileError::GroupNotFound { id: id.clone() })?;

        if tracked.group.status != GroupStatus::Detected {
            return Err(ReconcileError::AlreadyResolved { id: id.clone() });
        }
        if let Some(source) = &preferred_source {
            if !tracked.group.holdings.iter().any(|h| &h.id == source) {
                return Err(ReconcileError::UnknownPreferredSource { id: id.clone() });
            }
        }

        tracked.group.status = match action {
            ResolutionAction::Ignore => GroupStatus::Ignored,
            ResolutionAction::Merge | ResolutionAction::Separate => GroupStatus::Resolved,
        };
        tracked.group.resolution = Some(Resolution {
            action,
            preferred_source,
            reason,
            resolved_at: now,
            origin: ResolutionOrigin::Manual,
        });
        info!(group_id = %id, ?action, "duplicate group resolved manually");
        Ok(tracked.group.clone())
    }

    /// Merge every detected group whose confidence meets the configured
    /// threshold. The most recently updated holding becomes the preferred
    /// source. Manually resolved groups are never touched.
    pub fn auto_resolve(&mut self) -> Vec<DuplicateGroup> {
        let now = self.clock.now();
        let threshold = self.config.auto_resolve_threshold;
        let mut resolved = Vec::new();

        for tracked in self.groups.values_mut() {
            if tracked.group.status != GroupStatus::Detected
                || tracked.group.confidence < threshold
            {
                continue;
            }
            let preferred = tracked
                .group
                .holdings
                .iter()
                .max_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)))
                .map(|h| h.id.clone());

            tracked.group.status = GroupStatus::Resolved;
            tracked.group.resolution = Some(Resolution {
                action: ResolutionAction::Merge,
                preferred_source: preferred,
                reason: None,
                resolved_at: now,
                origin: ResolutionOrigin::Automatic,
            });
            info!(
                group_id = %tracked.group.id,
                confidence = tracked.group.confidence,
                "duplicate group auto-merged"
            );
            resolved.push(tracked.group.clone());
        }

        resolved.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        resolved
    }

    fn score(&self, members: &[HoldingRecord], now: chrono::DateTime<chrono::Utc>) -> u8 {
        let sources = match distinct_brokers(members) {
            0 | 1 => 0u32,
            2 => 25,
            3 => 35,
            _ => 40,
        };

        let horizon = chrono::Duration::from_std(self.config.recency_horizon)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let fresh = members
            .iter()
            .filter(|h| now.signed_duration_since(h.updated_at) <= horizon)
            .count() as u32;
        let recency = 40 * fresh / members.len() as u32;

        let all_long = members.iter().all(|h| h.quantity > Decimal::ZERO);
        let all_short = members.iter().all(|h| h.quantity < Decimal::ZERO);
        let agreement = if all_long || all_short { 20 } else { 10 };

        (sources + recency + agreement).min(100) as u8
    }

}

/// A change is material when the broker set differs or any broker's quantity
/// moved by more than the relative tolerance.
fn material_change(before: &Fingerprint, after: &Fingerprint, tolerance: Decimal) -> bool {
    let before_brokers: Vec<&String> = before.iter().map(|(b, _)| b).collect();
    let after_brokers: Vec<&String> = after.iter().map(|(b, _)| b).collect();
    if before_brokers != after_brokers {
        return true;
    }
    before.iter().zip(after.iter()).any(|((_, old), (_, new))| {
        if old.is_zero() {
            old != new
        } else {
            ((new - old) / old).abs() > tolerance
        }
    })
}

fn distinct_brokers(members: &[HoldingRecord]) -> usize {
    let mut brokers: Vec<&str> = members.iter().map(|h| h.broker_id.as_str()).collect();
    brokers.sort_unstable();
    brokers.dedup();
    brokers.len()
}

/// Total quantity per broker, sorted by broker id.
fn fingerprint_of(members: &[HoldingRecord]) -> Fingerprint {
    let mut totals: HashMap<&str, Decimal> = HashMap::new();
    for h in members {
        *totals.entry(h.broker_id.as_str()).or_default() += h.quantity;
    }
    let mut fingerprint: Fingerprint = totals
        .into_iter()
        .map(|(b, q)| (b.to_string(), q))
        .collect();
    fingerprint.sort_by(|a, b| a.0.cmp(&b.0));
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use crate::clock::FixedClock;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn config() -> ReconcileConfig {
        ReconcileConfig {
            auto_resolve_threshold: 90,
            quantity_tolerance: dec("0.01"),
            recency_horizon: Duration::from_secs(24 * 3600),
        }
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(config(), Arc::new(FixedClock::new(at())))
    }

    fn holding(broker: &str, symbol: &str, quantity: &str) -> HoldingRecord {
        HoldingRecord {
            id: Id::from(format!("{broker}-{symbol}")),
            broker_id: Id::from(broker),
            account_id: Id::from(format!("{broker}-acc")),
            portfolio_id: Id::from("pf-1"),
            symbol: symbol.to_string(),
            quantity: dec(quantity),
            cost_basis: dec("100"),
            current_price: None,
            updated_at: at(),
        }
    }

    #[test]
    fn single_broker_produces_no_group() {
        let mut engine = engine();
        let groups = engine.detect(&[
            holding("nordnet", "AAPL", "10"),
            holding("nordnet", "MSFT", "5"),
        ]);
        assert!(groups.is_empty());
    }

    #[test]
    fn cross_broker_symbol_is_grouped_with_deterministic_confidence() {
        let holdings = vec![
            holding("nordnet", "EQNR", "10"),
            holding("schwab", "EQNR", "20"),
            holding("ibkr", "EQNR", "5"),
        ];

        let mut engine = engine();
        let first = engine.detect(&holdings);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].symbol, "EQNR");
        assert_eq!(first[0].total_quantity, dec("35"));
        assert_eq!(first[0].confidence, 95);
        assert_eq!(first[0].broker_ids(), vec!["ibkr", "nordnet", "schwab"]);

        // Re-running without changes yields identical groups and scores.
        let second = engine.detect(&holdings);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].confidence, 95);
        assert_eq!(second[0].status, GroupStatus::Detected);
    }

    #[test]
    fn stale_holdings_lower_the_confidence() {
        let mut stale = holding("schwab", "EQNR", "20");
        stale.updated_at = at() - chrono::Duration::days(10);
        let holdings = vec![holding("nordnet", "EQNR", "10"), stale];

        let mut engine = engine();
        let groups = engine.detect(&holdings);
        // 25 (two sources) + 20 (one of two fresh) + 20 (all long).
        assert_eq!(groups[0].confidence, 65);
    }

    #[test]
    fn mixed_direction_quantities_lower_agreement() {
        let holdings = vec![
            holding("nordnet", "EQNR", "10"),
            holding("schwab", "EQNR", "-20"),
            holding("ibkr", "EQNR", "5"),
        ];
        let mut engine = engine();
        let groups = engine.detect(&holdings);
        assert_eq!(groups[0].confidence, 85);
    }

    #[test]
    fn auto_resolve_merges_high_confidence_groups() {
        let mut newest = holding("schwab", "EQNR", "20");
        newest.updated_at = at() - chrono::Duration::minutes(1);
        let mut older = holding("nordnet", "EQNR", "10");
        older.updated_at = at() - chrono::Duration::hours(2);
        let mut oldest = holding("ibkr", "EQNR", "5");
        oldest.updated_at = at() - chrono::Duration::hours(5);

        let mut engine = engine();
        engine.detect(&[newest.clone(), older, oldest]);

        let resolved = engine.auto_resolve();
        assert_eq!(resolved.len(), 1);
        let group = &resolved[0];
        assert_eq!(group.status, GroupStatus::Resolved);
        assert_eq!(group.total_quantity, dec("35"));

        let resolution = group.resolution.as_ref().unwrap();
        assert_eq!(resolution.action, ResolutionAction::Merge);
        assert_eq!(resolution.origin, ResolutionOrigin::Automatic);
        assert_eq!(resolution.preferred_source, Some(newest.id));

        // A second pass finds nothing left to resolve.
        assert!(engine.auto_resolve().is_empty());
    }

    #[test]
    fn auto_resolve_skips_below_threshold() {
        let holdings = vec![
            holding("nordnet", "EQNR", "10"),
            holding("schwab", "EQNR", "20"),
        ];
        let mut engine = engine();
        let groups = engine.detect(&holdings);
        assert_eq!(groups[0].confidence, 85);
        assert!(engine.auto_resolve().is_empty());
    }

    #[test]
    fn manual_resolution_validates_inputs() {
        let holdings = vec![
            holding("nordnet", "EQNR", "10"),
            holding("schwab", "EQNR", "20"),
        ];
        let mut engine = engine();
        let groups = engine.detect(&holdings);
        let id = groups[0].id.clone();

        let err = engine
            .resolve(&Id::from("missing"), ResolutionAction::Merge, None, None)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::GroupNotFound { .. }));

        let err = engine
            .resolve(
                &id,
                ResolutionAction::Merge,
                Some(Id::from("not-a-member")),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownPreferredSource { .. }));

        let group = engine
            .resolve(
                &id,
                ResolutionAction::Separate,
                None,
                Some("two real positions".to_string()),
            )
            .unwrap();
        assert_eq!(group.status, GroupStatus::Resolved);
        assert_eq!(
            group.resolution.as_ref().unwrap().origin,
            ResolutionOrigin::Manual
        );

        let err = engine
            .resolve(&id, ResolutionAction::Merge, None, None)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::AlreadyResolved { .. }));
    }

    #[test]
    fn resolved_group_is_not_resurfaced_without_material_change() {
        let holdings = vec![
            holding("nordnet", "EQNR", "100"),
            holding("schwab", "EQNR", "200"),
        ];
        let mut engine = engine();
        let id = engine.detect(&holdings)[0].id.clone();
        engine
            .resolve(&id, ResolutionAction::Separate, None, None)
            .unwrap();

        // Tiny drift within tolerance.
        let drifted = vec![
            holding("nordnet", "EQNR", "100.5"),
            holding("schwab", "EQNR", "200"),
        ];
        let groups = engine.detect(&drifted);
        assert_eq!(groups[0].status, GroupStatus::Resolved);

        // Auto-resolve must not touch it either.
        assert!(engine.auto_resolve().is_empty());
    }

    #[test]
    fn material_quantity_change_resurfaces_group() {
        let holdings = vec![
            holding("nordnet", "EQNR", "100"),
            holding("schwab", "EQNR", "200"),
        ];
        let mut engine = engine();
        let id = engine.detect(&holdings)[0].id.clone();
        engine
            .resolve(&id, ResolutionAction::Ignore, None, None)
            .unwrap();
        assert_eq!(engine.group(&id).unwrap().status, GroupStatus::Ignored);

        let changed = vec![
            holding("nordnet", "EQNR", "150"),
            holding("schwab", "EQNR", "200"),
        ];
        let groups = engine.detect(&changed);
        assert_eq!(groups[0].id, id);
        assert_eq!(groups[0].status, GroupStatus::Detected);
        assert!(groups[0].resolution.is_none());
    }

    #[test]
    fn new_broker_resurfaces_group() {
        let holdings = vec![
            holding("nordnet", "EQNR", "100"),
            holding("schwab", "EQNR", "200"),
        ];
        let mut engine = engine();
        let id = engine.detect(&holdings)[0].id.clone();
        engine
            .resolve(&id, ResolutionAction::Separate, None, None)
            .unwrap();

        let mut with_new_broker = holdings;
        with_new_broker.push(holding("ibkr", "EQNR", "5"));
        let groups = engine.detect(&with_new_broker);
        assert_eq!(groups[0].status, GroupStatus::Detected);
    }

    #[test]
    fn dissolved_group_is_dropped() {
        let holdings = vec![
            holding("nordnet", "EQNR", "100"),
            holding("schwab", "EQNR", "200"),
        ];
        let mut engine = engine();
        assert_eq!(engine.detect(&holdings).len(), 1);

        let remaining = vec![holding("nordnet", "EQNR", "100")];
        assert!(engine.detect(&remaining).is_empty());
        assert!(engine.groups().is_empty());
    }
}

//! Tier classification and per-tier admission policy.
//!
//! Tiers are enumerated in ascending `max_count` order. [`TierTable::classify`]
//! returns the first tier whose bound covers the requested count, falling back
//! to the last (unbounded) tier otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cost bucket derived from requested record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Small,
    Medium,
    Large,
    Xl,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Small => "SMALL",
            Tier::Medium => "MEDIUM",
            Tier::Large => "LARGE",
            Tier::Xl => "XL",
        }
    }

    /// Parse a tier from its wire/key name. Used by the expiry listener when
    /// splitting a safety key, which carries no other type information.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SMALL" => Some(Tier::Small),
            "MEDIUM" => Some(Tier::Medium),
            "LARGE" => Some(Tier::Large),
            "XL" => Some(Tier::Xl),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-tier limits: the upper bound on requested users that routes to this
/// tier, the concurrency ceiling, and the cooldown duration applied when a
/// reservation at this tier is rejected for being over the ceiling.
#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub tier: Tier,
    pub max_count: Option<u64>,
    pub max_concurrent: u32,
    pub cooldown_seconds: u64,
}

/// Immutable table of tier limits, ordered ascending by `max_count` (XL last,
/// with `max_count = None` meaning unbounded).
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: Vec<TierLimits>,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierLimits {
                    tier: Tier::Small,
                    max_count: Some(100),
                    max_concurrent: 10,
                    cooldown_seconds: 5,
                },
                TierLimits {
                    tier: Tier::Medium,
                    max_count: Some(10_000),
                    max_concurrent: 5,
                    cooldown_seconds: 10,
                },
                TierLimits {
                    tier: Tier::Large,
                    max_count: Some(100_000),
                    max_concurrent: 3,
                    cooldown_seconds: 20,
                },
                TierLimits {
                    tier: Tier::Xl,
                    max_count: None,
                    max_concurrent: 1,
                    cooldown_seconds: 30,
                },
            ],
        }
    }
}

impl TierTable {
    /// Build a table from explicit overrides (e.g. loaded from config).
    /// `tiers` must be supplied in ascending `max_count` order with the last
    /// entry unbounded; this is not validated beyond a length check since the
    /// table is assembled once at startup from trusted configuration.
    pub fn new(tiers: Vec<TierLimits>) -> Self {
        assert!(!tiers.is_empty(), "tier table must not be empty");
        Self { tiers }
    }

    /// Classify a requested count into the smallest tier whose `max_count`
    /// covers it; falls back to the last (unbounded) tier.
    pub fn classify(&self, requested_count: u64) -> Tier {
        for limits in &self.tiers {
            if let Some(max) = limits.max_count {
                if requested_count <= max {
                    return limits.tier;
                }
            }
        }
        self.tiers.last().expect("tier table must not be empty").tier
    }

    pub fn limits(&self, tier: Tier) -> TierLimits {
        self.tiers
            .iter()
            .find(|t| t.tier == tier)
            .copied()
            .unwrap_or_else(|| panic!("tier {tier} missing from tier table"))
    }

    pub fn max_concurrent(&self, tier: Tier) -> u32 {
        self.limits(tier).max_concurrent
    }

    pub fn cooldown_seconds(&self, tier: Tier) -> u64 {
        self.limits(tier).cooldown_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_respects_boundaries() {
        let table = TierTable::default();
        assert_eq!(table.classify(1), Tier::Small);
        assert_eq!(table.classify(100), Tier::Small);
        assert_eq!(table.classify(101), Tier::Medium);
        assert_eq!(table.classify(10_000), Tier::Medium);
        assert_eq!(table.classify(10_001), Tier::Large);
        assert_eq!(table.classify(100_000), Tier::Large);
        assert_eq!(table.classify(100_001), Tier::Xl);
        assert_eq!(table.classify(u64::MAX), Tier::Xl);
    }

    #[test]
    fn classify_is_monotonic() {
        let table = TierTable::default();
        let samples = [1, 50, 100, 101, 5_000, 10_000, 10_001, 99_999, 100_000, 100_001, 1_000_000];
        for w in samples.windows(2) {
            let (n1, n2) = (w[0], w[1]);
            assert!(n1 <= n2);
            assert!(table.classify(n1) <= table.classify(n2));
        }
    }

    #[test]
    fn tier_parse_round_trips_name() {
        for tier in [Tier::Small, Tier::Medium, Tier::Large, Tier::Xl] {
            assert_eq!(Tier::parse(tier.name()), Some(tier));
        }
        assert_eq!(Tier::parse("BOGUS"), None);
    }

    #[test]
    fn default_limits_match_spec() {
        let table = TierTable::default();
        assert_eq!(table.max_concurrent(Tier::Small), 10);
        assert_eq!(table.cooldown_seconds(Tier::Small), 5);
        assert_eq!(table.max_concurrent(Tier::Xl), 1);
        assert_eq!(table.cooldown_seconds(Tier::Xl), 30);
    }
}

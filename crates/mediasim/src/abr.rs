//! # Adaptive Bitrate Selection
//!
//! Picks a quality level for the next send batch from the bandwidth
//! estimate and the jitter buffer's health.
//!
//! ## Policy
//!
//! The buffer-based policy scales the bandwidth estimate by a factor that
//! depends on how full the playout buffer is, then takes the highest level
//! that fits:
//!
//! | Health    | Zone         | Budget           |
//! |-----------|--------------|------------------|
//! | < 30%     | conservative | 0.5 × bandwidth  |
//! | 30%–70%   | moderate     | 0.7 × bandwidth  |
//! | > 70%     | aggressive   | 0.95 × bandwidth |
//!
//! The simple policy ignores the buffer and budgets 0.8 × bandwidth. When no
//! level fits, the lowest is used. A change (up or down) is only accepted
//! after `min_dwell_ticks` have passed since the previous one.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── Quality Levels ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    pub name: String,
    pub bitrate_kbps: u32,
    #[serde(default)]
    pub resolution_tier: u32,
}

impl QualityLevel {
    pub fn new(name: impl Into<String>, bitrate_kbps: u32, resolution_tier: u32) -> Self {
        QualityLevel {
            name: name.into(),
            bitrate_kbps,
            resolution_tier,
        }
    }
}

impl Ord for QualityLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bitrate_kbps
            .cmp(&other.bitrate_kbps)
            .then(self.resolution_tier.cmp(&other.resolution_tier))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for QualityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 240p through 1080p.
pub fn default_ladder() -> Vec<QualityLevel> {
    vec![
        QualityLevel::new("240p", 300, 240),
        QualityLevel::new("360p", 500, 360),
        QualityLevel::new("480p", 1_000, 480),
        QualityLevel::new("720p", 2_500, 720),
        QualityLevel::new("1080p", 4_000, 1080),
    ]
}

// ─── Policy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbrPolicy {
    BufferBased,
    Simple,
}

impl AbrPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AbrPolicy::BufferBased => "buffer-based",
            AbrPolicy::Simple => "simple",
        }
    }
}

impl fmt::Display for AbrPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AbrPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer-based" | "buffer" => Ok(AbrPolicy::BufferBased),
            "simple" | "throughput" => Ok(AbrPolicy::Simple),
            _ => Err(ConfigError::UnknownAbrPolicy(s.to_string())),
        }
    }
}

/// Share of bandwidth the simple policy budgets.
pub const SIMPLE_POLICY_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferZone {
    Conservative,
    Moderate,
    Aggressive,
}

impl BufferZone {
    pub fn for_health(health_percent: f64) -> Self {
        if health_percent < 30.0 {
            BufferZone::Conservative
        } else if health_percent > 70.0 {
            BufferZone::Aggressive
        } else {
            BufferZone::Moderate
        }
    }

    pub fn bandwidth_factor(self) -> f64 {
        match self {
            BufferZone::Conservative => 0.5,
            BufferZone::Moderate => 0.7,
            BufferZone::Aggressive => 0.95,
        }
    }
}

// ─── Decision ───────────────────────────────────────────────────────────────

/// A selection together with the signals that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbrDecision {
    pub level: QualityLevel,
    pub previous: Option<QualityLevel>,
    pub bandwidth_estimate_kbps: f64,
    pub buffer_health_percent: f64,
    /// `None` under the simple policy.
    pub zone: Option<BufferZone>,
    /// Bitrate budget the policy computed (kbps).
    pub budget_kbps: f64,
    /// Level the policy wanted before dwell gating.
    pub target: QualityLevel,
    pub changed: bool,
    pub held_by_dwell: bool,
}

// ─── Selector ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BitrateSelector {
    /// Ascending by bitrate.
    levels: Vec<QualityLevel>,
    policy: AbrPolicy,
    min_dwell_ticks: u32,
    current: Option<usize>,
    ticks_since_change: u32,
}

impl BitrateSelector {
    pub fn new(
        mut levels: Vec<QualityLevel>,
        policy: AbrPolicy,
        min_dwell_ticks: u32,
    ) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::NoQualityLevels);
        }
        if let Some(bad) = levels.iter().find(|l| l.bitrate_kbps == 0) {
            return Err(ConfigError::InvalidQualityLevel {
                name: bad.name.clone(),
                bitrate_kbps: bad.bitrate_kbps,
            });
        }
        levels.sort();
        Ok(BitrateSelector {
            levels,
            policy,
            min_dwell_ticks,
            current: None,
            ticks_since_change: 0,
        })
    }

    /// Start from `name` instead of letting the first selection choose.
    pub fn with_initial(mut self, name: &str) -> Self {
        if let Some(idx) = self.levels.iter().position(|l| l.name == name) {
            self.current = Some(idx);
            self.ticks_since_change = self.min_dwell_ticks;
        }
        self
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.levels
    }

    pub fn policy(&self) -> AbrPolicy {
        self.policy
    }

    pub fn min_dwell_ticks(&self) -> u32 {
        self.min_dwell_ticks
    }

    pub fn current(&self) -> Option<&QualityLevel> {
        self.current.map(|i| &self.levels[i])
    }

    pub fn lowest(&self) -> &QualityLevel {
        &self.levels[0]
    }

    /// Bitrate budget and zone for the given signals. Pure.
    pub fn budget(&self, bandwidth_kbps: f64, health_percent: f64) -> (f64, Option<BufferZone>) {
        let bandwidth = sanitize(bandwidth_kbps, f64::MAX);
        match self.policy {
            AbrPolicy::BufferBased => {
                let zone = BufferZone::for_health(sanitize(health_percent, 100.0));
                (bandwidth * zone.bandwidth_factor(), Some(zone))
            }
            AbrPolicy::Simple => (bandwidth * SIMPLE_POLICY_FACTOR, None),
        }
    }

    /// Index of the highest level within `budget_kbps`, else the lowest.
    pub fn target_index(&self, budget_kbps: f64) -> usize {
        self.levels
            .iter()
            .rposition(|l| l.bitrate_kbps as f64 <= budget_kbps)
            .unwrap_or(0)
    }

    /// Choose the level for the next batch.
    pub fn select(&mut self, bandwidth_kbps: f64, health_percent: f64) -> AbrDecision {
        let (budget_kbps, zone) = self.budget(bandwidth_kbps, health_percent);
        let target = self.target_index(budget_kbps);
        let previous = self.current;

        let (chosen, changed, held_by_dwell) = match previous {
            None => (target, true, false),
            Some(cur) => {
                self.ticks_since_change = self.ticks_since_change.saturating_add(1);
                if target == cur {
                    (cur, false, false)
                } else if self.ticks_since_change >= self.min_dwell_ticks {
                    (target, true, false)
                } else {
                    (cur, false, true)
                }
            }
        };

        if changed {
            self.ticks_since_change = 0;
            self.current = Some(chosen);
            if let Some(prev) = previous {
                tracing::debug!(
                    from = %self.levels[prev].name,
                    to = %self.levels[chosen].name,
                    bandwidth_kbps,
                    health_percent,
                    "quality level changed"
                );
            }
        }

        AbrDecision {
            level: self.levels[chosen].clone(),
            previous: previous.map(|i| self.levels[i].clone()),
            bandwidth_estimate_kbps: bandwidth_kbps,
            buffer_health_percent: health_percent,
            zone,
            budget_kbps,
            target: self.levels[target].clone(),
            changed,
            held_by_dwell,
        }
    }

    /// Forget the current level; the next selection is free again.
    pub fn reset(&mut self) {
        self.current = None;
        self.ticks_since_change = 0;
    }
}

fn sanitize(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(dwell: u32) -> BitrateSelector {
        BitrateSelector::new(default_ladder(), AbrPolicy::BufferBased, dwell).unwrap()
    }

    #[test]
    fn aggressive_zone_picks_2500_at_3000() {
        let mut abr = selector(2);
        let d = abr.select(3_000.0, 80.0);
        assert_eq!(d.level.bitrate_kbps, 2_500);
        assert_eq!(d.zone, Some(BufferZone::Aggressive));
        assert!((d.budget_kbps - 2_850.0).abs() < 1e-9);
    }

    #[test]
    fn zones_scale_budget() {
        let abr = selector(2);
        assert_eq!(abr.target_index(abr.budget(3_000.0, 10.0).0), 2); // 1500 → 1000
        assert_eq!(abr.target_index(abr.budget(3_000.0, 50.0).0), 2); // 2100 → 1000
        assert_eq!(abr.target_index(abr.budget(3_000.0, 30.0).0), 2);
        assert_eq!(BufferZone::for_health(70.0), BufferZone::Moderate);
        assert_eq!(BufferZone::for_health(70.1), BufferZone::Aggressive);
    }

    #[test]
    fn nothing_fits_picks_lowest() {
        let mut abr = selector(2);
        assert_eq!(abr.select(50.0, 90.0).level.name, "240p");
        assert_eq!(abr.select(f64::NAN, f64::NAN).level.name, "240p");
    }

    #[test]
    fn simple_policy_uses_eighty_percent() {
        let mut abr = BitrateSelector::new(default_ladder(), AbrPolicy::Simple, 0).unwrap();
        let d = abr.select(1_250.0, 0.0);
        assert_eq!(d.level.bitrate_kbps, 1_000);
        assert_eq!(d.zone, None);
    }

    #[test]
    fn dwell_gates_changes() {
        let mut abr = selector(3);
        assert!(abr.select(3_000.0, 80.0).changed); // first is immediate
        let held = abr.select(400.0, 80.0);
        assert!(held.held_by_dwell);
        assert_eq!(held.level.bitrate_kbps, 2_500);
        assert!(abr.select(400.0, 80.0).held_by_dwell);
        let d = abr.select(400.0, 80.0);
        assert!(d.changed);
        assert_eq!(d.level.bitrate_kbps, 300);
        assert_eq!(d.previous.map(|l| l.bitrate_kbps), Some(2_500));
    }

    #[test]
    fn levels_are_sorted_on_construction() {
        let mut ladder = default_ladder();
        ladder.reverse();
        let abr = BitrateSelector::new(ladder, AbrPolicy::BufferBased, 2).unwrap();
        let rates: Vec<u32> = abr.levels().iter().map(|l| l.bitrate_kbps).collect();
        assert_eq!(rates, vec![300, 500, 1_000, 2_500, 4_000]);
    }

    #[test]
    fn rejects_bad_ladders() {
        assert!(matches!(
            BitrateSelector::new(Vec::new(), AbrPolicy::Simple, 2),
            Err(ConfigError::NoQualityLevels)
        ));
        assert!(matches!(
            BitrateSelector::new(vec![QualityLevel::new("0p", 0, 0)], AbrPolicy::Simple, 2),
            Err(ConfigError::InvalidQualityLevel { .. })
        ));
    }

    #[test]
    fn initial_level_can_change_immediately() {
        let mut abr = selector(5).with_initial("1080p");
        assert_eq!(abr.current().map(|l| l.bitrate_kbps), Some(4_000));
        assert!(abr.select(400.0, 80.0).changed);
    }
}

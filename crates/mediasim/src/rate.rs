//! # Bounded Rates and Windows
//!
//! Sending rates and congestion windows only come into existence through
//! clamping constructors, so a negative or over-ceiling value cannot be
//! represented. NaN collapses to the floor.

use serde::Serialize;

/// A sending rate in kbps, always within `[floor, ceiling]` with `floor >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Kbps(f64);

impl Kbps {
    pub const ZERO: Kbps = Kbps(0.0);

    /// Build a rate clamped into `[floor, ceiling]`.
    pub fn clamped(value: f64, floor: f64, ceiling: f64) -> Self {
        Kbps(clamp_non_negative(value, floor, ceiling))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The lower of two rates.
    pub fn min(self, other: Kbps) -> Kbps {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }
}

/// A congestion window in abstract packet units, always within
/// `[floor, ceiling]` with `floor >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Window(f64);

impl Window {
    pub fn clamped(value: f64, floor: f64, ceiling: f64) -> Self {
        Window(clamp_non_negative(value, floor, ceiling))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

fn clamp_non_negative(value: f64, floor: f64, ceiling: f64) -> f64 {
    let ceiling = if ceiling.is_nan() { 0.0 } else { ceiling.max(0.0) };
    let floor = if floor.is_nan() {
        0.0
    } else {
        floor.max(0.0).min(ceiling)
    };
    if value.is_nan() {
        return floor;
    }
    value.clamp(floor, ceiling)
}

// ─── Limits ─────────────────────────────────────────────────────────────────

/// Configured bounds shared by every congestion strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimits {
    /// Lowest rate the delay-based strategy may settle at (kbps).
    pub floor_kbps: f64,
    /// Hard ceiling on any strategy's output rate (kbps).
    pub ceiling_kbps: f64,
    /// Rate represented by one window unit (kbps).
    pub kbps_per_window_unit: f64,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            floor_kbps: 100.0,
            ceiling_kbps: 5_000.0,
            kbps_per_window_unit: 10.0,
        }
    }
}

impl RateLimits {
    /// Rate clamped to `[floor, ceiling]`.
    pub fn rate(&self, kbps: f64) -> Kbps {
        Kbps::clamped(kbps, self.floor_kbps, self.ceiling_kbps)
    }

    /// Largest window whose rate stays within the ceiling.
    pub fn window_ceiling(&self) -> f64 {
        if self.kbps_per_window_unit <= 0.0 {
            return 0.0;
        }
        self.ceiling_kbps / self.kbps_per_window_unit
    }

    /// Window clamped to `[floor, window_ceiling]`.
    pub fn window(&self, units: f64, floor: f64) -> Window {
        Window::clamped(units, floor, self.window_ceiling())
    }

    /// Rate implied by a window. Only the ceiling applies here.
    pub fn window_rate(&self, window: Window) -> Kbps {
        Kbps::clamped(
            window.value() * self.kbps_per_window_unit,
            0.0,
            self.ceiling_kbps,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_clamp_to_floor() {
        assert_eq!(Kbps::clamped(-50.0, 0.0, 100.0).value(), 0.0);
        assert_eq!(Window::clamped(-1.0, 2.0, 10.0).value(), 2.0);
    }

    #[test]
    fn ceiling_is_enforced() {
        assert_eq!(Kbps::clamped(1e9, 0.0, 1000.0).value(), 1000.0);
    }

    #[test]
    fn nan_collapses_to_floor() {
        assert_eq!(Kbps::clamped(f64::NAN, 100.0, 1000.0).value(), 100.0);
    }

    #[test]
    fn floor_above_ceiling_is_pinned_to_ceiling() {
        let r = Kbps::clamped(50.0, 500.0, 200.0);
        assert_eq!(r.value(), 200.0);
    }

    #[test]
    fn window_rate_respects_ceiling() {
        let limits = RateLimits::default();
        assert_eq!(limits.window_ceiling(), 500.0);
        let w = limits.window(10_000.0, 2.0);
        assert_eq!(w.value(), 500.0);
        assert_eq!(limits.window_rate(w).value(), 5_000.0);
    }
}

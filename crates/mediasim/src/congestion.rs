//! # Congestion Control
//!
//! One controller, three interchangeable strategies. Each tick the
//! controller consumes the channel's observations and produces a
//! [`SendBudget`]:
//!
//! ```text
//!  AIMD (loss-based)          Delay-based (GCC-like)      Model-based (BBR-like)
//!  ┌───────────┐              ┌────────┐                  ┌─────────┐
//!  │ SLOWSTART │ ×1.1/tick    │ STEADY │ ×0.95 delay>hi   │ STARTUP │ ×1.25/tick
//!  └─────┬─────┘              │        │ ×1.05 delay<lo   └────┬────┘
//!   w ≥ ssthresh              │        │ ×0.85 on loss     w ≥ 2·bdp
//!  ┌─────▼─────┐              └────────┘                  ┌────▼────┐
//!  │ CONG_AVOID│ +0.1/tick                                │  DRAIN  │ ×0.75/tick
//!  └───────────┘                                          └────┬────┘
//!   loss: ssthresh = max(w/2, floor), w = ssthresh         w ≤ bdp
//!                                                         ┌────▼────┐
//!                                                         │ PROBEBW │ gain cycle
//!                                                         └─────────┘
//! ```
//!
//! Windows are abstract packet units; a window's rate is
//! `window × kbps_per_window_unit`. Every rate and window is built through
//! [`RateLimits`], so nothing here can go negative or exceed the ceiling.
//! Switching strategy discards all strategy-local state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rate::{Kbps, RateLimits, Window};

// ─── Strategy ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CongestionStrategy {
    /// Loss-based additive-increase/multiplicative-decrease.
    Aimd,
    /// Delay-gradient rate control.
    DelayBased,
    /// Bottleneck-bandwidth model with a probing cycle.
    ModelBased,
}

impl CongestionStrategy {
    pub const ALL: [CongestionStrategy; 3] = [
        CongestionStrategy::Aimd,
        CongestionStrategy::DelayBased,
        CongestionStrategy::ModelBased,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CongestionStrategy::Aimd => "aimd",
            CongestionStrategy::DelayBased => "delay-based",
            CongestionStrategy::ModelBased => "model-based",
        }
    }
}

impl fmt::Display for CongestionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CongestionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aimd" | "reno" | "loss-based" => Ok(CongestionStrategy::Aimd),
            "delay-based" | "delay" | "gcc" => Ok(CongestionStrategy::DelayBased),
            "model-based" | "model" | "bbr" => Ok(CongestionStrategy::ModelBased),
            _ => Err(ConfigError::UnknownCongestionStrategy(s.to_string())),
        }
    }
}

// ─── Inputs & Outputs ───────────────────────────────────────────────────────

/// Per-tick feedback consumed by every strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observations {
    pub measured_delay_ms: f64,
    pub loss_event_occurred: bool,
    /// Capacity sample from the channel (kbps).
    pub bandwidth_estimate_kbps: f64,
}

/// What the sender may use for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SendBudget {
    pub rate: Kbps,
    /// Present for window-based strategies.
    pub window: Option<Window>,
}

/// Tunables for all three strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionParams {
    pub limits: RateLimits,

    // ─── AIMD ───
    pub initial_window: f64,
    pub initial_ssthresh: f64,
    /// Lowest window any window-based strategy may reach.
    pub min_window: f64,
    pub slow_start_factor: f64,
    pub additive_increase: f64,

    // ─── Delay-based ───
    pub initial_rate_kbps: f64,
    /// Watermarks apply to the smoothed one-way delay (ms). `None` until
    /// derived from the link's propagation delay.
    pub delay_high_watermark_ms: Option<f64>,
    pub delay_low_watermark_ms: Option<f64>,
    pub delay_decrease_factor: f64,
    pub delay_increase_factor: f64,
    pub loss_decrease_factor: f64,

    // ─── Model-based ───
    pub startup_gain: f64,
    pub drain_gain: f64,
    /// Startup ends once the window reaches this multiple of the BDP window.
    pub startup_exit_multiple: f64,
    pub probe_phase_ticks: u32,
    pub bw_filter_len: usize,
}

impl Default for CongestionParams {
    fn default() -> Self {
        CongestionParams {
            limits: RateLimits::default(),

            initial_window: 10.0,
            initial_ssthresh: 64.0,
            min_window: 2.0,
            slow_start_factor: 1.1,
            additive_increase: 0.1,

            initial_rate_kbps: 500.0,
            delay_high_watermark_ms: None,
            delay_low_watermark_ms: None,
            delay_decrease_factor: 0.95,
            delay_increase_factor: 1.05,
            loss_decrease_factor: 0.85,

            startup_gain: 1.25,
            drain_gain: 0.75,
            startup_exit_multiple: 2.0,
            probe_phase_ticks: 4,
            bw_filter_len: 10,
        }
    }
}

/// Default watermarks sit this far above the one-way propagation delay (ms).
pub const HIGH_WATERMARK_MARGIN_MS: f64 = 10.0;
pub const LOW_WATERMARK_MARGIN_MS: f64 = 5.0;

/// Propagation delay assumed when the watermarks were never derived (ms).
const FALLBACK_ONE_WAY_MS: f64 = 50.0;

impl CongestionParams {
    /// Fill unset watermarks from the link's one-way propagation delay.
    pub fn with_one_way_delay(mut self, one_way_ms: f64) -> Self {
        self.delay_high_watermark_ms =
            Some(self.delay_high_watermark_ms.unwrap_or(one_way_ms + HIGH_WATERMARK_MARGIN_MS));
        self.delay_low_watermark_ms =
            Some(self.delay_low_watermark_ms.unwrap_or(one_way_ms + LOW_WATERMARK_MARGIN_MS));
        self
    }

    pub fn high_watermark_ms(&self) -> f64 {
        self.delay_high_watermark_ms
            .unwrap_or(FALLBACK_ONE_WAY_MS + HIGH_WATERMARK_MARGIN_MS)
    }

    pub fn low_watermark_ms(&self) -> f64 {
        self.delay_low_watermark_ms
            .unwrap_or(FALLBACK_ONE_WAY_MS + LOW_WATERMARK_MARGIN_MS)
    }
}

/// ProbeBW pacing gains: probe up, drain the probe, then cruise.
pub const PROBE_BW_GAINS: [f64; 8] = [1.25, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];

// ─── Strategy State ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AimdPhase {
    SlowStart,
    CongestionAvoidance,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimdState {
    pub phase: AimdPhase,
    pub window: Window,
    pub ssthresh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayBasedState {
    pub rate: Kbps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BbrPhase {
    Startup,
    Drain,
    ProbeBw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BbrState {
    pub phase: BbrPhase,
    pub window: Window,
    /// Max-filtered bottleneck bandwidth (kbps).
    pub btl_bw_kbps: f64,
    bw_samples: Vec<f64>,
    pub cycle_index: usize,
    ticks_in_phase: u32,
}

impl BbrState {
    /// Window that exactly fills the estimated bottleneck.
    fn bdp_window(&self, limits: &RateLimits) -> f64 {
        if limits.kbps_per_window_unit <= 0.0 {
            return 0.0;
        }
        self.btl_bw_kbps / limits.kbps_per_window_unit
    }

    fn on_bandwidth_sample(&mut self, kbps: f64, filter_len: usize) {
        if !kbps.is_finite() || kbps < 0.0 {
            return;
        }
        self.bw_samples.push(kbps);
        if self.bw_samples.len() > filter_len.max(1) {
            self.bw_samples.remove(0);
        }
        // BtlBw = max of recent samples
        self.btl_bw_kbps = self.bw_samples.iter().cloned().fold(0.0f64, f64::max);
    }
}

/// Strategy-local state; exactly one strategy is active.
#[derive(Debug, Clone, PartialEq)]
pub enum CongestionState {
    Aimd(AimdState),
    DelayBased(DelayBasedState),
    ModelBased(BbrState),
}

impl CongestionState {
    fn initial(strategy: CongestionStrategy, params: &CongestionParams) -> Self {
        let limits = &params.limits;
        match strategy {
            CongestionStrategy::Aimd => CongestionState::Aimd(AimdState {
                phase: AimdPhase::SlowStart,
                window: limits.window(params.initial_window, params.min_window),
                ssthresh: params.initial_ssthresh.max(params.min_window),
            }),
            CongestionStrategy::DelayBased => CongestionState::DelayBased(DelayBasedState {
                rate: limits.rate(params.initial_rate_kbps),
            }),
            CongestionStrategy::ModelBased => CongestionState::ModelBased(BbrState {
                phase: BbrPhase::Startup,
                window: limits.window(params.initial_window, params.min_window),
                btl_bw_kbps: 0.0,
                bw_samples: Vec::with_capacity(params.bw_filter_len),
                cycle_index: 0,
                ticks_in_phase: 0,
            }),
        }
    }

    fn strategy(&self) -> CongestionStrategy {
        match self {
            CongestionState::Aimd(_) => CongestionStrategy::Aimd,
            CongestionState::DelayBased(_) => CongestionStrategy::DelayBased,
            CongestionState::ModelBased(_) => CongestionStrategy::ModelBased,
        }
    }

    fn phase_name(&self) -> &'static str {
        match self {
            CongestionState::Aimd(s) => match s.phase {
                AimdPhase::SlowStart => "slow-start",
                AimdPhase::CongestionAvoidance => "congestion-avoidance",
            },
            CongestionState::DelayBased(_) => "steady",
            CongestionState::ModelBased(s) => match s.phase {
                BbrPhase::Startup => "startup",
                BbrPhase::Drain => "drain",
                BbrPhase::ProbeBw => "probe-bw",
            },
        }
    }

    fn budget(&self, limits: &RateLimits) -> SendBudget {
        match self {
            CongestionState::Aimd(s) => SendBudget {
                rate: limits.window_rate(s.window),
                window: Some(s.window),
            },
            CongestionState::DelayBased(s) => SendBudget {
                rate: s.rate,
                window: None,
            },
            CongestionState::ModelBased(s) => SendBudget {
                rate: limits.window_rate(s.window),
                window: Some(s.window),
            },
        }
    }
}

// ─── Controller ─────────────────────────────────────────────────────────────

/// Strategy-agnostic congestion controller.
#[derive(Debug, Clone)]
pub struct CongestionController {
    params: CongestionParams,
    state: CongestionState,
    ticks: u64,
}

impl CongestionController {
    pub fn new(strategy: CongestionStrategy, params: CongestionParams) -> Self {
        CongestionController {
            state: CongestionState::initial(strategy, &params),
            params,
            ticks: 0,
        }
    }

    pub fn strategy(&self) -> CongestionStrategy {
        self.state.strategy()
    }

    pub fn params(&self) -> &CongestionParams {
        &self.params
    }

    pub fn state(&self) -> &CongestionState {
        &self.state
    }

    /// Replace the active strategy. Always starts from fresh state.
    pub fn switch_to(&mut self, strategy: CongestionStrategy) {
        tracing::debug!(from = %self.strategy(), to = %strategy, "congestion strategy switched");
        self.state = CongestionState::initial(strategy, &self.params);
        self.ticks = 0;
    }

    /// Return the active strategy to its initial state.
    pub fn reset(&mut self) {
        self.switch_to(self.strategy());
    }

    pub fn budget(&self) -> SendBudget {
        self.state.budget(&self.params.limits)
    }

    pub fn rate(&self) -> Kbps {
        self.budget().rate
    }

    pub fn window(&self) -> Option<Window> {
        self.budget().window
    }

    pub fn phase_name(&self) -> &'static str {
        self.state.phase_name()
    }

    /// Advance one tick on the given feedback.
    pub fn tick(&mut self, obs: &Observations) -> SendBudget {
        self.ticks += 1;
        let params = self.params;
        let tick = self.ticks;
        match &mut self.state {
            CongestionState::Aimd(s) => aimd_tick(s, obs, &params, tick),
            CongestionState::DelayBased(s) => delay_tick(s, obs, &params),
            CongestionState::ModelBased(s) => bbr_tick(s, obs, &params, tick),
        }
        self.budget()
    }
}

// ─── AIMD ───────────────────────────────────────────────────────────────────

fn aimd_tick(s: &mut AimdState, obs: &Observations, p: &CongestionParams, tick: u64) {
    let limits = &p.limits;
    if obs.loss_event_occurred {
        let w = s.window.value();
        s.ssthresh = (w / 2.0).max(p.min_window);
        s.window = limits.window(s.ssthresh, p.min_window);
        if s.phase != AimdPhase::CongestionAvoidance {
            tracing::debug!(tick, from = "slow-start", to = "congestion-avoidance", window = w, "aimd loss exit");
        }
        s.phase = AimdPhase::CongestionAvoidance;
        return;
    }

    match s.phase {
        AimdPhase::SlowStart => {
            let grown = s.window.value() * p.slow_start_factor;
            s.window = limits.window(grown, p.min_window);
            // A window pinned below ssthresh by the ceiling would never leave.
            if s.window.value() >= s.ssthresh || s.window.value() >= limits.window_ceiling() {
                tracing::debug!(
                    tick,
                    from = "slow-start",
                    to = "congestion-avoidance",
                    window = s.window.value(),
                    ssthresh = s.ssthresh,
                    "aimd phase transition"
                );
                s.phase = AimdPhase::CongestionAvoidance;
            }
        }
        AimdPhase::CongestionAvoidance => {
            let grown = s.window.value() + p.additive_increase;
            s.window = limits.window(grown, p.min_window);
        }
    }
}

// ─── Delay-based ────────────────────────────────────────────────────────────

fn delay_tick(s: &mut DelayBasedState, obs: &Observations, p: &CongestionParams) {
    let mut rate = s.rate.value();
    if obs.measured_delay_ms > p.high_watermark_ms() {
        rate *= p.delay_decrease_factor;
    } else if obs.measured_delay_ms < p.low_watermark_ms()
        && rate < obs.bandwidth_estimate_kbps
    {
        rate *= p.delay_increase_factor;
    }
    if obs.loss_event_occurred {
        rate *= p.loss_decrease_factor;
    }
    let clamped = p.limits.rate(rate);
    if clamped.value() != rate {
        tracing::trace!(requested = rate, applied = clamped.value(), "delay-based rate clamped");
    }
    s.rate = clamped;
}

// ─── Model-based ────────────────────────────────────────────────────────────

fn bbr_tick(s: &mut BbrState, obs: &Observations, p: &CongestionParams, tick: u64) {
    let limits = &p.limits;
    s.on_bandwidth_sample(obs.bandwidth_estimate_kbps, p.bw_filter_len);
    let bdp = s.bdp_window(limits);
    s.ticks_in_phase += 1;

    match s.phase {
        BbrPhase::Startup => {
            let grown = s.window.value() * p.startup_gain;
            s.window = limits.window(grown, p.min_window);
            let found = s.window.value() >= bdp * p.startup_exit_multiple;
            let plateau = s.window.value() >= limits.window_ceiling();
            if found || plateau {
                tracing::debug!(
                    tick,
                    from = "startup",
                    to = "drain",
                    window = s.window.value(),
                    btl_bw_kbps = s.btl_bw_kbps,
                    plateau,
                    "bbr phase transition"
                );
                s.phase = BbrPhase::Drain;
                s.ticks_in_phase = 0;
            }
        }
        BbrPhase::Drain => {
            let shrunk = s.window.value() * p.drain_gain;
            s.window = limits.window(shrunk, p.min_window);
            if s.window.value() <= bdp.max(p.min_window) {
                tracing::debug!(
                    tick,
                    from = "drain",
                    to = "probe-bw",
                    window = s.window.value(),
                    btl_bw_kbps = s.btl_bw_kbps,
                    "bbr phase transition"
                );
                s.phase = BbrPhase::ProbeBw;
                s.cycle_index = 0;
                // The entry tick already runs at the first gain.
                s.ticks_in_phase = 1;
                s.window = limits.window(bdp * PROBE_BW_GAINS[0], p.min_window);
            }
        }
        BbrPhase::ProbeBw => {
            if s.ticks_in_phase > p.probe_phase_ticks.max(1) {
                s.cycle_index = (s.cycle_index + 1) % PROBE_BW_GAINS.len();
                s.ticks_in_phase = 1;
            }
            let gain = PROBE_BW_GAINS[s.cycle_index];
            s.window = limits.window(bdp * gain, p.min_window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(delay: f64, loss: bool, bw: f64) -> Observations {
        Observations {
            measured_delay_ms: delay,
            loss_event_occurred: loss,
            bandwidth_estimate_kbps: bw,
        }
    }

    fn quiet(bw: f64) -> Observations {
        obs(40.0, false, bw)
    }

    fn aimd_state(cc: &CongestionController) -> AimdState {
        match cc.state() {
            CongestionState::Aimd(s) => *s,
            other => panic!("expected AIMD, got {other:?}"),
        }
    }

    fn bbr_phase(cc: &CongestionController) -> BbrPhase {
        match cc.state() {
            CongestionState::ModelBased(s) => s.phase,
            other => panic!("expected BBR, got {other:?}"),
        }
    }

    // ─── Strategy Parsing ───────────────────────────────────────────────

    #[test]
    fn strategy_names_round_trip() {
        for s in CongestionStrategy::ALL {
            assert_eq!(s.as_str().parse::<CongestionStrategy>().unwrap(), s);
        }
        assert_eq!("BBR".parse::<CongestionStrategy>().unwrap(), CongestionStrategy::ModelBased);
    }

    #[test]
    fn unknown_strategy_fails() {
        let err = "cubic".parse::<CongestionStrategy>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCongestionStrategy(ref s) if s == "cubic"));
    }

    // ─── AIMD Tests ─────────────────────────────────────────────────────

    #[test]
    fn aimd_slow_start_grows_multiplicatively() {
        let mut cc = CongestionController::new(CongestionStrategy::Aimd, CongestionParams::default());
        assert_eq!(cc.rate().value(), 100.0);
        cc.tick(&quiet(800.0));
        let s = aimd_state(&cc);
        assert_eq!(s.phase, AimdPhase::SlowStart);
        assert!((s.window.value() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn aimd_reaches_congestion_avoidance_at_ssthresh() {
        let mut cc = CongestionController::new(CongestionStrategy::Aimd, CongestionParams::default());
        let mut ticks = 0;
        while aimd_state(&cc).phase == AimdPhase::SlowStart {
            cc.tick(&quiet(800.0));
            ticks += 1;
            assert!(ticks < 100, "slow start never ended");
        }
        let s = aimd_state(&cc);
        assert!(s.window.value() >= 64.0);

        let before = s.window.value();
        cc.tick(&quiet(800.0));
        assert!((aimd_state(&cc).window.value() - (before + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn aimd_loss_halves_window() {
        let mut cc = CongestionController::new(CongestionStrategy::Aimd, CongestionParams::default());
        for _ in 0..5 {
            cc.tick(&quiet(800.0));
        }
        let w = aimd_state(&cc).window.value();
        cc.tick(&obs(40.0, true, 800.0));
        let s = aimd_state(&cc);
        assert!((s.ssthresh - w / 2.0).abs() < 1e-9);
        assert_eq!(s.window.value(), s.ssthresh);
        assert_eq!(s.phase, AimdPhase::CongestionAvoidance);
    }

    #[test]
    fn aimd_loss_respects_floor() {
        let mut cc = CongestionController::new(CongestionStrategy::Aimd, CongestionParams::default());
        for _ in 0..20 {
            cc.tick(&obs(40.0, true, 800.0));
        }
        let s = aimd_state(&cc);
        assert_eq!(s.window.value(), 2.0);
        assert_eq!(s.ssthresh, 2.0);
    }

    // ─── Delay-based Tests ──────────────────────────────────────────────

    #[test]
    fn delay_based_backs_off_on_high_delay() {
        let mut cc = CongestionController::new(CongestionStrategy::DelayBased, CongestionParams::default());
        cc.tick(&obs(80.0, false, 800.0));
        assert!((cc.rate().value() - 475.0).abs() < 1e-9);
        assert_eq!(cc.window(), None);
    }

    #[test]
    fn delay_based_grows_only_below_estimate() {
        let mut cc = CongestionController::new(CongestionStrategy::DelayBased, CongestionParams::default());
        cc.tick(&obs(30.0, false, 800.0));
        assert!((cc.rate().value() - 525.0).abs() < 1e-9);

        let mut capped = CongestionController::new(CongestionStrategy::DelayBased, CongestionParams::default());
        capped.tick(&obs(30.0, false, 400.0));
        assert_eq!(capped.rate().value(), 500.0);
    }

    #[test]
    fn delay_based_loss_compounds_cut() {
        let mut cc = CongestionController::new(CongestionStrategy::DelayBased, CongestionParams::default());
        cc.tick(&obs(80.0, true, 800.0));
        assert!((cc.rate().value() - 500.0 * 0.95 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn delay_based_never_below_floor() {
        let mut cc = CongestionController::new(CongestionStrategy::DelayBased, CongestionParams::default());
        for _ in 0..200 {
            cc.tick(&obs(500.0, true, 800.0));
        }
        assert_eq!(cc.rate().value(), 100.0);
    }

    // ─── Model-based Tests ──────────────────────────────────────────────

    #[test]
    fn bbr_walks_startup_drain_probe() {
        let mut cc = CongestionController::new(CongestionStrategy::ModelBased, CongestionParams::default());
        assert_eq!(bbr_phase(&cc), BbrPhase::Startup);
        let mut seen = vec![BbrPhase::Startup];
        for _ in 0..60 {
            cc.tick(&quiet(800.0));
            let phase = bbr_phase(&cc);
            if seen.last() != Some(&phase) {
                seen.push(phase);
            }
        }
        assert_eq!(seen, vec![BbrPhase::Startup, BbrPhase::Drain, BbrPhase::ProbeBw]);
    }

    #[test]
    fn bbr_probe_cycle_follows_gains() {
        let mut cc = CongestionController::new(CongestionStrategy::ModelBased, CongestionParams::default());
        while bbr_phase(&cc) != BbrPhase::ProbeBw {
            cc.tick(&quiet(800.0));
        }
        let mut rates = Vec::new();
        for _ in 0..32 {
            rates.push(cc.tick(&quiet(800.0)).rate.value());
        }
        assert!(rates.iter().any(|r| (r - 1000.0).abs() < 1e-6), "probe-up at 1.25×");
        assert!(rates.iter().any(|r| (r - 600.0).abs() < 1e-6), "probe-down at 0.75×");
        assert!(rates.iter().any(|r| (r - 800.0).abs() < 1e-6), "cruise at 1×");
    }

    #[test]
    fn bbr_every_probe_phase_lasts_the_same() {
        let params = CongestionParams::default();
        let mut cc = CongestionController::new(CongestionStrategy::ModelBased, params);
        while bbr_phase(&cc) != BbrPhase::ProbeBw {
            cc.tick(&quiet(800.0));
        }
        let cycle = |cc: &CongestionController| match cc.state() {
            CongestionState::ModelBased(s) => s.cycle_index,
            other => panic!("expected BBR, got {other:?}"),
        };
        let mut indices = vec![cycle(&cc)];
        for _ in 0..(params.probe_phase_ticks * 3 - 1) {
            cc.tick(&quiet(800.0));
            indices.push(cycle(&cc));
        }
        let n = params.probe_phase_ticks as usize;
        assert!(indices[..n].iter().all(|&i| i == 0), "{indices:?}");
        assert!(indices[n..2 * n].iter().all(|&i| i == 1), "{indices:?}");
        assert!(indices[2 * n..].iter().all(|&i| i == 2), "{indices:?}");
    }

    #[test]
    fn delay_watermarks_follow_one_way_delay() {
        let p = CongestionParams::default();
        assert_eq!(p.high_watermark_ms(), 60.0);
        assert_eq!(p.low_watermark_ms(), 55.0);

        let p = p.with_one_way_delay(150.0);
        assert_eq!(p.high_watermark_ms(), 160.0);
        assert_eq!(p.low_watermark_ms(), 155.0);

        let pinned = CongestionParams {
            delay_high_watermark_ms: Some(90.0),
            ..CongestionParams::default()
        }
        .with_one_way_delay(150.0);
        assert_eq!(pinned.high_watermark_ms(), 90.0);
        assert_eq!(pinned.low_watermark_ms(), 155.0);
    }

    #[test]
    fn bbr_exits_startup_on_ceiling_plateau() {
        let mut cc = CongestionController::new(CongestionStrategy::ModelBased, CongestionParams::default());
        for _ in 0..200 {
            cc.tick(&quiet(1_000_000.0));
        }
        assert_ne!(bbr_phase(&cc), BbrPhase::Startup);
        assert!(cc.rate().value() <= 5_000.0);
    }

    // ─── Switching ──────────────────────────────────────────────────────

    #[test]
    fn switching_resets_state() {
        let mut cc = CongestionController::new(CongestionStrategy::Aimd, CongestionParams::default());
        for _ in 0..10 {
            cc.tick(&quiet(800.0));
        }
        cc.switch_to(CongestionStrategy::ModelBased);
        assert_eq!(bbr_phase(&cc), BbrPhase::Startup);
        cc.switch_to(CongestionStrategy::Aimd);
        let s = aimd_state(&cc);
        assert_eq!(s.window.value(), 10.0);
        assert_eq!(s.phase, AimdPhase::SlowStart);
    }
}

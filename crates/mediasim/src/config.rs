//! # Simulation Configuration
//!
//! Two layers: [`SimConfigInput`] mirrors the TOML file with every field
//! optional, and [`SimConfig`] is the typed form the simulation runs on.
//! [`SimConfig::validate`] is the single place values are clamped and
//! derived defaults are filled in, so a config built in code and one
//! loaded from TOML resolve the same way.
//!
//! ```toml
//! version = 1
//! seed = 7
//!
//! [network]
//! bandwidth = "constant"
//! bandwidth_kbps = 2000
//! loss_probability = 0.05
//!
//! [congestion]
//! strategy = "model-based"
//!
//! [recovery]
//! method = "both"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::abr::{default_ladder, AbrPolicy, QualityLevel};
use crate::channel::{BandwidthProfile, NetworkConditionProfile, TraceStep};
use crate::congestion::{CongestionParams, CongestionStrategy};
use crate::error::ConfigError;
use crate::rate::RateLimits;
use crate::recovery::{RecoveryConfig, RecoveryMode};

pub const CONFIG_VERSION: u32 = 1;

/// Default number of samples [`crate::Simulation`] keeps in its history.
pub const DEFAULT_HISTORY_LEN: usize = 100;

// ─── TOML Input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfigInput {
    pub version: u32,
    pub seed: Option<u64>,
    pub tick_ms: Option<f64>,
    pub history_len: Option<usize>,
    pub network: NetworkConfigInput,
    pub congestion: CongestionConfigInput,
    pub recovery: RecoveryConfigInput,
    pub jitter_buffer: JitterBufferConfigInput,
    pub abr: AbrConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfigInput {
    /// `stable`, `fluctuating`, `congested`, `constant` or `trace`.
    pub bandwidth: Option<String>,
    /// Capacity for the `constant` profile.
    pub bandwidth_kbps: Option<f64>,
    pub trace: Vec<TraceStepInput>,
    pub base_rtt_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub loss_probability: Option<f64>,
    pub packet_size_bytes: Option<u32>,
    pub parity_lossy: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TraceStepInput {
    pub at_ms: f64,
    pub kbps: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CongestionConfigInput {
    pub strategy: Option<String>,
    pub floor_kbps: Option<f64>,
    pub ceiling_kbps: Option<f64>,
    pub initial_window: Option<f64>,
    pub initial_ssthresh: Option<f64>,
    pub min_window: Option<f64>,
    pub initial_rate_kbps: Option<f64>,
    pub delay_high_watermark_ms: Option<f64>,
    pub delay_low_watermark_ms: Option<f64>,
    pub probe_phase_ticks: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecoveryConfigInput {
    /// `none`, `fec`, `nack` or `both`.
    pub method: Option<String>,
    pub fec_ratio: Option<u32>,
    pub fec_block_size: Option<u32>,
    pub nack_grace_ms: Option<f64>,
    pub max_nack_retries: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfigInput {
    pub target_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AbrConfigInput {
    /// `buffer-based` or `simple`.
    pub policy: Option<String>,
    pub min_dwell_ticks: Option<u32>,
    pub levels: Vec<QualityLevel>,
    pub initial_level: Option<String>,
}

// ─── Typed Config ───────────────────────────────────────────────────────────

/// Fully typed simulation configuration. Values may still be out of range
/// until [`SimConfig::validate`] runs.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub seed: u64,
    pub tick_ms: f64,
    /// Most recent samples kept by the simulation.
    pub history_len: usize,
    pub packet_size_bytes: u32,
    pub network: NetworkConditionProfile,
    pub strategy: CongestionStrategy,
    pub congestion: CongestionParams,
    pub recovery: RecoveryConfig,
    pub jitter_target_ms: f64,
    pub abr_policy: AbrPolicy,
    pub min_dwell_ticks: u32,
    pub quality_levels: Vec<QualityLevel>,
    pub initial_level: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            seed: 0,
            tick_ms: 20.0,
            history_len: DEFAULT_HISTORY_LEN,
            packet_size_bytes: 1200,
            network: NetworkConditionProfile::default(),
            strategy: CongestionStrategy::DelayBased,
            congestion: CongestionParams::default(),
            recovery: RecoveryConfig::default(),
            jitter_target_ms: 100.0,
            abr_policy: AbrPolicy::BufferBased,
            min_dwell_ticks: 2,
            quality_levels: default_ladder(),
            initial_level: None,
        }
    }
}

/// A numeric input that was moved to the nearest valid bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClampNotice {
    pub field: &'static str,
    pub requested: f64,
    pub applied: f64,
}

impl fmt::Display for ClampNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} clamped to {}", self.field, self.requested, self.applied)
    }
}

/// A validated config plus every clamp applied on the way.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: SimConfig,
    pub clamps: Vec<ClampNotice>,
}

#[derive(Default)]
struct Clamper {
    notices: Vec<ClampNotice>,
}

impl Clamper {
    fn range(&mut self, field: &'static str, value: f64, min: f64, max: f64) -> f64 {
        let applied = if value.is_nan() { min } else { value.clamp(min, max) };
        if applied != value {
            tracing::warn!(field, requested = value, applied, "config value clamped");
            self.notices.push(ClampNotice {
                field,
                requested: value,
                applied,
            });
        }
        applied
    }

    fn at_least(&mut self, field: &'static str, value: f64, min: f64) -> f64 {
        self.range(field, value, min, f64::MAX)
    }

    fn count(&mut self, field: &'static str, value: u32, min: u32, max: u32) -> u32 {
        self.range(field, value as f64, min as f64, max as f64) as u32
    }
}

impl SimConfig {
    pub fn from_toml_str(input: &str) -> Result<ResolvedConfig, ConfigError> {
        if input.trim().is_empty() {
            return SimConfig::default().validate();
        }
        let parsed: SimConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Clamp every numeric field into range and check structural validity.
    pub fn validate(mut self) -> Result<ResolvedConfig, ConfigError> {
        if self.quality_levels.is_empty() {
            return Err(ConfigError::NoQualityLevels);
        }
        if let Some(bad) = self.quality_levels.iter().find(|l| l.bitrate_kbps == 0) {
            return Err(ConfigError::InvalidQualityLevel {
                name: bad.name.clone(),
                bitrate_kbps: bad.bitrate_kbps,
            });
        }
        if let BandwidthProfile::Trace(steps) = &mut self.network.bandwidth {
            validate_trace(steps)?;
        }

        let mut c = Clamper::default();

        self.tick_ms = c.range("tick_ms", self.tick_ms, 1.0, 1_000.0);
        self.history_len = c.range("history_len", self.history_len as f64, 1.0, 1_000_000.0) as usize;
        self.packet_size_bytes = c.count("network.packet_size_bytes", self.packet_size_bytes, 64, 9_000);

        let net = &mut self.network;
        net.loss_probability = c.range("network.loss_probability", net.loss_probability, 0.0, 1.0);
        net.jitter_range_ms = c.at_least("network.jitter_ms", net.jitter_range_ms, 0.0);
        net.base_rtt_ms = c.at_least("network.base_rtt_ms", net.base_rtt_ms, 0.0);
        if let BandwidthProfile::Constant { kbps } = &mut net.bandwidth {
            *kbps = c.at_least("network.bandwidth_kbps", *kbps, 1.0);
        }

        let limits = &mut self.congestion.limits;
        limits.floor_kbps = c.at_least("congestion.floor_kbps", limits.floor_kbps, 0.0);
        limits.ceiling_kbps = c.at_least("congestion.ceiling_kbps", limits.ceiling_kbps, limits.floor_kbps.max(1.0));
        limits.kbps_per_window_unit = c.at_least("congestion.kbps_per_window_unit", limits.kbps_per_window_unit, 0.001);
        let cc = &mut self.congestion;
        cc.min_window = c.at_least("congestion.min_window", cc.min_window, 0.0);
        cc.initial_window = c.at_least("congestion.initial_window", cc.initial_window, cc.min_window);
        cc.initial_ssthresh = c.at_least("congestion.initial_ssthresh", cc.initial_ssthresh, cc.min_window);
        cc.initial_rate_kbps = c.at_least("congestion.initial_rate_kbps", cc.initial_rate_kbps, 0.0);
        // Unset watermarks sit just above the propagation delay.
        *cc = cc.with_one_way_delay(self.network.one_way_delay_ms());
        let high = c.at_least("congestion.delay_high_watermark_ms", cc.high_watermark_ms(), 0.0);
        let low = c.range("congestion.delay_low_watermark_ms", cc.low_watermark_ms(), 0.0, high);
        cc.delay_high_watermark_ms = Some(high);
        cc.delay_low_watermark_ms = Some(low);
        cc.probe_phase_ticks = c.count("congestion.probe_phase_ticks", cc.probe_phase_ticks, 1, 1_000);

        let rc = &mut self.recovery;
        rc.fec_ratio = c.count("recovery.fec_ratio", rc.fec_ratio, 2, 64);
        rc.fec_block_size = Some(c.count("recovery.fec_block_size", rc.block_size(), 1, 256));
        rc.nack_grace_ms = c.at_least("recovery.nack_grace_ms", rc.nack_grace_ms, 0.0);
        rc.base_rtt_ms = self.network.base_rtt_ms;

        self.jitter_target_ms = c.at_least("jitter_buffer.target_ms", self.jitter_target_ms, 0.0);

        Ok(ResolvedConfig {
            config: self,
            clamps: c.notices,
        })
    }
}

fn validate_trace(steps: &mut [TraceStep]) -> Result<(), ConfigError> {
    if steps.is_empty() {
        return Err(ConfigError::InvalidTrace("trace has no steps".into()));
    }
    if let Some(bad) = steps
        .iter()
        .find(|s| !s.at_ms.is_finite() || !s.kbps.is_finite() || s.kbps < 0.0)
    {
        return Err(ConfigError::InvalidTrace(format!(
            "step at {} ms has invalid rate {}",
            bad.at_ms, bad.kbps
        )));
    }
    steps.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));
    Ok(())
}

impl SimConfigInput {
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let d = SimConfig::default();

        let net = self.network;
        let bandwidth = match net.bandwidth.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            None => d.network.bandwidth.clone(),
            Some(name) => match name.as_str() {
                "stable" => BandwidthProfile::Stable,
                "fluctuating" => BandwidthProfile::Fluctuating,
                "congested" => BandwidthProfile::Congested,
                "constant" => BandwidthProfile::Constant {
                    kbps: net.bandwidth_kbps.unwrap_or(1_000.0),
                },
                "trace" => BandwidthProfile::Trace(
                    net.trace
                        .iter()
                        .map(|s| TraceStep {
                            at_ms: s.at_ms,
                            kbps: s.kbps,
                        })
                        .collect(),
                ),
                other => return Err(ConfigError::UnknownBandwidthPreset(other.to_string())),
            },
        };
        let network = NetworkConditionProfile {
            bandwidth,
            base_rtt_ms: net.base_rtt_ms.unwrap_or(d.network.base_rtt_ms),
            jitter_range_ms: net.jitter_ms.unwrap_or(d.network.jitter_range_ms),
            loss_probability: net.loss_probability.unwrap_or(d.network.loss_probability),
            parity_lossy: net.parity_lossy.unwrap_or(d.network.parity_lossy),
        };

        let strategy = match self.congestion.strategy.as_deref() {
            Some(s) => CongestionStrategy::from_str(s)?,
            None => d.strategy,
        };
        let cc_in = self.congestion;
        let dc = d.congestion;
        let congestion = CongestionParams {
            limits: RateLimits {
                floor_kbps: cc_in.floor_kbps.unwrap_or(dc.limits.floor_kbps),
                ceiling_kbps: cc_in.ceiling_kbps.unwrap_or(dc.limits.ceiling_kbps),
                ..dc.limits
            },
            initial_window: cc_in.initial_window.unwrap_or(dc.initial_window),
            initial_ssthresh: cc_in.initial_ssthresh.unwrap_or(dc.initial_ssthresh),
            min_window: cc_in.min_window.unwrap_or(dc.min_window),
            initial_rate_kbps: cc_in.initial_rate_kbps.unwrap_or(dc.initial_rate_kbps),
            delay_high_watermark_ms: cc_in.delay_high_watermark_ms,
            delay_low_watermark_ms: cc_in.delay_low_watermark_ms,
            probe_phase_ticks: cc_in.probe_phase_ticks.unwrap_or(dc.probe_phase_ticks),
            ..dc
        };

        let rc_in = self.recovery;
        let mode = match rc_in.method.as_deref() {
            Some(s) => RecoveryMode::from_str(s)?,
            None => d.recovery.mode,
        };
        let recovery = RecoveryConfig {
            mode,
            fec_ratio: rc_in.fec_ratio.unwrap_or(d.recovery.fec_ratio),
            fec_block_size: rc_in.fec_block_size,
            nack_grace_ms: rc_in.nack_grace_ms.unwrap_or(d.recovery.nack_grace_ms),
            max_nack_retries: rc_in.max_nack_retries.unwrap_or(d.recovery.max_nack_retries),
            base_rtt_ms: network.base_rtt_ms,
        };

        let abr_policy = match self.abr.policy.as_deref() {
            Some(s) => AbrPolicy::from_str(s)?,
            None => d.abr_policy,
        };
        let quality_levels = if self.abr.levels.is_empty() {
            d.quality_levels
        } else {
            self.abr.levels
        };

        SimConfig {
            seed: self.seed.unwrap_or(d.seed),
            tick_ms: self.tick_ms.unwrap_or(d.tick_ms),
            history_len: self.history_len.unwrap_or(d.history_len),
            packet_size_bytes: net.packet_size_bytes.unwrap_or(d.packet_size_bytes),
            network,
            strategy,
            congestion,
            recovery,
            jitter_target_ms: self.jitter_buffer.target_ms.unwrap_or(d.jitter_target_ms),
            abr_policy,
            min_dwell_ticks: self.abr.min_dwell_ticks.unwrap_or(d.min_dwell_ticks),
            quality_levels,
            initial_level: self.abr.initial_level,
        }
        .validate()
    }
}

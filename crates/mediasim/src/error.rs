//! Configuration errors.
//!
//! Unknown enumerated values and structurally invalid inputs fail fast at
//! setup time. Out-of-range numbers are not errors; they are clamped and
//! reported through [`crate::config::ClampNotice`].

use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown congestion strategy {0:?} (expected aimd, delay-based or model-based)")]
    UnknownCongestionStrategy(String),
    #[error("unknown recovery method {0:?} (expected none, fec, nack or both)")]
    UnknownRecoveryMethod(String),
    #[error("unknown bandwidth profile {0:?} (expected stable, fluctuating, congested, constant or trace)")]
    UnknownBandwidthPreset(String),
    #[error("unknown ABR policy {0:?} (expected buffer-based or simple)")]
    UnknownAbrPolicy(String),
    #[error("at least one quality level is required")]
    NoQualityLevels,
    #[error("quality level {name:?} has invalid bitrate {bitrate_kbps} kbps")]
    InvalidQualityLevel { name: String, bitrate_kbps: u32 },
    #[error("invalid bandwidth trace: {0}")]
    InvalidTrace(String),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

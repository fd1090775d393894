//! # mediasim
//!
//! Deterministic, discrete-tick simulation of real-time media transport over
//! a constrained, lossy, jittery link.
//!
//! A packet stream is sent each tick, pushed through a modelled bottleneck,
//! paced by a pluggable congestion controller, repaired by FEC and/or NACK
//! retransmission, smoothed by a jitter buffer, and rate-adapted by an ABR
//! quality selector. Given a configuration and a seed, every run produces
//! the same metrics trajectory.
//!
//! ## Crate structure
//!
//! - [`config`] — TOML input, validation and clamping
//! - [`error`] — Configuration errors
//! - [`rate`] — Non-negative bounded rates and windows
//! - [`packet`] — Packet model and the packet-accounting ledger
//! - [`channel`] — Lossy, jittery, bandwidth-limited link model
//! - [`congestion`] — AIMD, delay-based and model-based congestion control
//! - [`recovery`] — FEC block recovery and NACK retransmission
//! - [`jitter`] — Playout jitter buffer and buffer-health classification
//! - [`abr`] — Adaptive bitrate quality selection with dwell-time hysteresis
//! - [`stats`] — Smoothing helpers, per-tick metrics and run summaries
//! - [`sim`] — Simulation clock, state aggregate and the tick pipeline

pub mod abr;
pub mod channel;
pub mod config;
pub mod congestion;
pub mod error;
pub mod jitter;
pub mod packet;
pub mod rate;
pub mod recovery;
pub mod sim;
pub mod stats;

pub use config::{ClampNotice, ResolvedConfig, SimConfig};
pub use error::ConfigError;
pub use sim::Simulation;
pub use stats::MetricsSample;

//! # Simulation Statistics
//!
//! Per-tick metrics handed to the presentation layer, an end-of-run
//! summary, and the smoothing helper used by the channel's observation
//! window. Everything here serializes to JSON.

use serde::Serialize;

use crate::jitter::BufferCategory;
use crate::packet::PacketLedger;

// ─── Metrics Sample ─────────────────────────────────────────────────────────

/// One row of the metrics trajectory, produced once per tick. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSample {
    pub tick: u64,
    pub time_ms: f64,

    // ─── Packet accounting ───
    pub sent_count: u64,
    pub received_count: u64,
    /// Lost and not (yet) recovered.
    pub lost_count: u64,
    pub recovered_count: u64,
    pub on_time_count: u64,
    pub late_count: u64,
    pub unrecoverable_count: u64,
    pub fec_recovered_count: u64,
    pub nack_recovered_count: u64,
    pub retransmissions: u64,
    pub parity_sent: u64,

    // ─── Jitter buffer ───
    pub buffer_category: BufferCategory,
    pub buffer_duration_ms: f64,
    pub buffer_health_percent: f64,
    pub played_count: u64,

    // ─── Congestion control ───
    pub current_congestion_rate_kbps: f64,
    pub congestion_window: Option<f64>,
    pub congestion_phase: &'static str,
    pub available_bandwidth_kbps: f64,

    // ─── ABR ───
    pub selected_quality_level: String,
    pub selected_bitrate_kbps: u32,
}

impl MetricsSample {
    /// Copy the ledger counters into the sample's accounting fields.
    pub(crate) fn with_ledger(mut self, ledger: &PacketLedger) -> Self {
        self.sent_count = ledger.sent();
        self.received_count = ledger.received();
        self.lost_count = ledger.lost();
        self.recovered_count = ledger.recovered();
        self.on_time_count = ledger.on_time();
        self.late_count = ledger.late();
        self.unrecoverable_count = ledger.unrecoverable();
        self.fec_recovered_count = ledger.recovered_fec();
        self.nack_recovered_count = ledger.recovered_nack();
        self.retransmissions = ledger.retransmissions();
        self.parity_sent = ledger.parity_sent();
        self
    }

    /// Render as a single JSON line.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

// ─── Run Summary ────────────────────────────────────────────────────────────

/// Aggregate view of a run, built from the ledger and a [`RunTally`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub sent: u64,
    pub received: u64,
    pub lost: u64,
    pub recovered: u64,
    pub unrecoverable: u64,
    pub late: u64,
    pub retransmissions: u64,
    pub parity_sent: u64,
    /// `(channel losses - recovered) / sent`.
    pub residual_loss_rate: f64,
    pub mean_rate_kbps: f64,
    pub mean_bitrate_kbps: f64,
    pub quality_switches: u64,
    pub ticks_empty: u64,
    pub ticks_filling: u64,
    pub ticks_stable: u64,
    pub ticks_overflow: u64,
}

impl RunSummary {
    pub fn from_tally(ledger: &PacketLedger, tally: &RunTally) -> Self {
        let mut summary = RunSummary {
            ticks: tally.ticks,
            sent: ledger.sent(),
            received: ledger.received(),
            lost: ledger.lost(),
            recovered: ledger.recovered(),
            unrecoverable: ledger.unrecoverable(),
            late: ledger.late(),
            retransmissions: ledger.retransmissions(),
            parity_sent: ledger.parity_sent(),
            residual_loss_rate: ledger.residual_loss_rate(),
            quality_switches: tally.quality_switches,
            ticks_empty: tally.ticks_empty,
            ticks_filling: tally.ticks_filling,
            ticks_stable: tally.ticks_stable,
            ticks_overflow: tally.ticks_overflow,
            ..RunSummary::default()
        };
        if tally.ticks > 0 {
            let n = tally.ticks as f64;
            summary.mean_rate_kbps = tally.rate_sum_kbps / n;
            summary.mean_bitrate_kbps = tally.bitrate_sum_kbps / n;
        }
        summary
    }

    /// Summarize a full trajectory.
    pub fn from_run(ledger: &PacketLedger, samples: &[MetricsSample]) -> Self {
        let mut tally = RunTally::default();
        for s in samples {
            tally.record(s);
        }
        RunSummary::from_tally(ledger, &tally)
    }
}

// ─── Run Tally ──────────────────────────────────────────────────────────────

/// Per-tick aggregates folded in as samples are produced, so the summary
/// covers the whole run however little history is retained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTally {
    ticks: u64,
    rate_sum_kbps: f64,
    bitrate_sum_kbps: f64,
    quality_switches: u64,
    last_level: Option<String>,
    ticks_empty: u64,
    ticks_filling: u64,
    ticks_stable: u64,
    ticks_overflow: u64,
}

impl RunTally {
    pub fn record(&mut self, sample: &MetricsSample) {
        self.ticks += 1;
        self.rate_sum_kbps += sample.current_congestion_rate_kbps;
        self.bitrate_sum_kbps += sample.selected_bitrate_kbps as f64;

        match &self.last_level {
            Some(last) if *last == sample.selected_quality_level => {}
            Some(_) => {
                self.quality_switches += 1;
                self.last_level = Some(sample.selected_quality_level.clone());
            }
            None => self.last_level = Some(sample.selected_quality_level.clone()),
        }

        match sample.buffer_category {
            BufferCategory::Empty => self.ticks_empty += 1,
            BufferCategory::Filling => self.ticks_filling += 1,
            BufferCategory::Stable => self.ticks_stable += 1,
            BufferCategory::Overflow => self.ticks_overflow += 1,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

// ─── EWMA ───────────────────────────────────────────────────────────────────

/// Exponentially weighted moving average.
#[derive(Debug, Clone)]
pub struct Ewma {
    /// Smoothing factor (0.0 - 1.0). Higher = more responsive.
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0, 1]");
        Ewma {
            alpha,
            value: 0.0,
            initialized: false,
        }
    }

    /// Update with a new sample and return the smoothed value.
    pub fn update(&mut self, sample: f64) -> f64 {
        if !self.initialized {
            self.value = sample;
            self.initialized = true;
        } else {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.initialized = false;
    }
}

//! # Network Channel
//!
//! Models a single lossy, jittery, bandwidth-limited path. Each submitted
//! packet is resolved immediately into an arrival time or a loss:
//!
//! ```text
//! delay = baseRTT/2 + queueing(backlog, bandwidth(t)) + uniform(-jitter, +jitter)
//! ```
//!
//! The bottleneck is a FIFO that drains at `bandwidth(t)` kbps; a packet
//! waits for the bytes queued ahead of it. Its byte
//! limit is `max(2 × BDP, 20 packets)`; a packet that would overflow it is
//! tail-dropped. Independently, each packet is lost with `loss_probability`.
//! FEC parity packets are exempt from loss unless `parity_lossy` is set.
//!
//! The channel never retries; retransmission is the recovery coordinator's
//! job. Every submission feeds an [`ObservationWindow`] whose per-tick
//! summary drives congestion control.

use rand::RngExt as _;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::packet::Packet;
use crate::stats::Ewma;

/// Bandwidth presets never report less than this (kbps).
pub const MIN_PRESET_BANDWIDTH_KBPS: f64 = 100.0;

/// Any profile is floored here so queueing delay stays finite (kbps).
const MIN_BANDWIDTH_KBPS: f64 = 1.0;

// ─── Bandwidth Profiles ─────────────────────────────────────────────────────

/// One step of a piecewise-constant bandwidth trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceStep {
    pub at_ms: f64,
    pub kbps: f64,
}

/// Available bottleneck bandwidth as a function of simulated time.
#[derive(Clone)]
pub enum BandwidthProfile {
    /// Fixed capacity.
    Constant { kbps: f64 },
    /// ~800 kbps with a slow ±50 kbps swell.
    Stable,
    /// ~600 kbps with fast ±400 kbps swings.
    Fluctuating,
    /// ~400 kbps with periodic dips toward the floor.
    Congested,
    /// Piecewise-constant steps, sorted by `at_ms`. Before the first step the
    /// first step's rate applies.
    Trace(Vec<TraceStep>),
    /// Arbitrary function of time in ms.
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl BandwidthProfile {
    /// Capacity in kbps at `time_ms`.
    pub fn kbps_at(&self, time_ms: f64) -> f64 {
        let t = time_ms / 1000.0;
        let kbps = match self {
            BandwidthProfile::Constant { kbps } => *kbps,
            BandwidthProfile::Stable => {
                (800.0 + (t * 0.5).sin() * 50.0).max(MIN_PRESET_BANDWIDTH_KBPS)
            }
            BandwidthProfile::Fluctuating => {
                (600.0 + (t * 2.0).sin() * 300.0 + (t * 5.0).sin() * 100.0)
                    .max(MIN_PRESET_BANDWIDTH_KBPS)
            }
            BandwidthProfile::Congested => {
                (400.0 + (t * 0.3).sin() * 100.0 - t.sin().abs() * 200.0)
                    .max(MIN_PRESET_BANDWIDTH_KBPS)
            }
            BandwidthProfile::Trace(steps) => {
                let idx = steps.partition_point(|s| s.at_ms <= time_ms);
                match idx {
                    0 => steps.first().map(|s| s.kbps).unwrap_or(0.0),
                    i => steps[i - 1].kbps,
                }
            }
            BandwidthProfile::Custom(f) => f(time_ms),
        };
        if kbps.is_nan() {
            MIN_BANDWIDTH_KBPS
        } else {
            kbps.max(MIN_BANDWIDTH_KBPS)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BandwidthProfile::Constant { .. } => "constant",
            BandwidthProfile::Stable => "stable",
            BandwidthProfile::Fluctuating => "fluctuating",
            BandwidthProfile::Congested => "congested",
            BandwidthProfile::Trace(_) => "trace",
            BandwidthProfile::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for BandwidthProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandwidthProfile::Constant { kbps } => {
                f.debug_struct("Constant").field("kbps", kbps).finish()
            }
            BandwidthProfile::Trace(steps) => f.debug_tuple("Trace").field(steps).finish(),
            BandwidthProfile::Custom(_) => f.write_str("Custom(<fn>)"),
            other => f.write_str(other.name()),
        }
    }
}

// ─── Condition Profile ──────────────────────────────────────────────────────

/// Network conditions for one run. Immutable while the run lasts.
#[derive(Debug, Clone)]
pub struct NetworkConditionProfile {
    pub bandwidth: BandwidthProfile,
    /// Propagation round trip without queueing (ms).
    pub base_rtt_ms: f64,
    /// Uniform jitter half-range (ms).
    pub jitter_range_ms: f64,
    /// Independent per-packet loss probability (0..1).
    pub loss_probability: f64,
    /// Subject FEC parity packets to loss as well.
    pub parity_lossy: bool,
}

impl Default for NetworkConditionProfile {
    fn default() -> Self {
        NetworkConditionProfile {
            bandwidth: BandwidthProfile::Stable,
            base_rtt_ms: 100.0,
            jitter_range_ms: 20.0,
            loss_probability: 0.02,
            parity_lossy: false,
        }
    }
}

impl NetworkConditionProfile {
    pub fn one_way_delay_ms(&self) -> f64 {
        self.base_rtt_ms / 2.0
    }
}

// ─── Outcomes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossCause {
    /// Independent random loss.
    Random,
    /// Tail drop at the bottleneck queue.
    QueueOverflow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelOutcome {
    Delivered { arrival_time_ms: f64 },
    Lost(LossCause),
}

/// Channel feedback for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelObservation {
    /// Mean one-way delay of packets delivered this tick (ms). Falls back to
    /// the smoothed delay when nothing was delivered.
    pub measured_delay_ms: f64,
    /// EWMA (1/8) of one-way delay across ticks (ms).
    pub smoothed_delay_ms: f64,
    pub loss_event_occurred: bool,
    /// Bottleneck capacity sampled at the end of the tick (kbps).
    pub capacity_kbps: f64,
    pub delivered: u32,
    pub lost: u32,
}

// ─── Observation Window ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Sample {
    delay_ms: Option<f64>,
}

/// Rolling record of recent deliveries and losses.
#[derive(Debug, Clone)]
pub struct ObservationWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
    smoothed_delay: Ewma,
    tick_delay_sum: f64,
    tick_delivered: u32,
    tick_lost: u32,
}

impl ObservationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ObservationWindow {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            smoothed_delay: Ewma::new(0.125),
            tick_delay_sum: 0.0,
            tick_delivered: 0,
            tick_lost: 0,
        }
    }

    fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn record_delivery(&mut self, delay_ms: f64) {
        self.push(Sample {
            delay_ms: Some(delay_ms),
        });
        self.smoothed_delay.update(delay_ms);
        self.tick_delay_sum += delay_ms;
        self.tick_delivered += 1;
    }

    pub fn record_loss(&mut self) {
        self.push(Sample { delay_ms: None });
        self.tick_lost += 1;
    }

    /// Share of windowed samples that were lost.
    pub fn loss_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let lost = self.samples.iter().filter(|s| s.delay_ms.is_none()).count();
        lost as f64 / self.samples.len() as f64
    }

    pub fn smoothed_delay_ms(&self) -> Option<f64> {
        self.smoothed_delay
            .is_initialized()
            .then(|| self.smoothed_delay.value())
    }

    /// Summarize the current tick and start a new one.
    fn close_tick(&mut self, capacity_kbps: f64, fallback_delay_ms: f64) -> ChannelObservation {
        let smoothed_delay_ms = self.smoothed_delay_ms().unwrap_or(fallback_delay_ms);
        let measured_delay_ms = if self.tick_delivered > 0 {
            self.tick_delay_sum / self.tick_delivered as f64
        } else {
            smoothed_delay_ms
        };
        let obs = ChannelObservation {
            measured_delay_ms,
            smoothed_delay_ms,
            loss_event_occurred: self.tick_lost > 0,
            capacity_kbps,
            delivered: self.tick_delivered,
            lost: self.tick_lost,
        };
        self.tick_delay_sum = 0.0;
        self.tick_delivered = 0;
        self.tick_lost = 0;
        obs
    }
}

// ─── Channel ────────────────────────────────────────────────────────────────

/// Lossy, jittery, bandwidth-limited link.
#[derive(Debug, Clone)]
pub struct NetworkChannel {
    profile: NetworkConditionProfile,
    /// Bytes waiting at the bottleneck.
    backlog_bytes: f64,
    /// Time up to which the backlog has been drained.
    drained_until_ms: f64,
    window: ObservationWindow,
}

impl NetworkChannel {
    pub fn new(profile: NetworkConditionProfile) -> Self {
        NetworkChannel {
            profile,
            backlog_bytes: 0.0,
            drained_until_ms: 0.0,
            window: ObservationWindow::new(64),
        }
    }

    pub fn profile(&self) -> &NetworkConditionProfile {
        &self.profile
    }

    pub fn window(&self) -> &ObservationWindow {
        &self.window
    }

    pub fn backlog_bytes(&self) -> f64 {
        self.backlog_bytes
    }

    /// Capacity at `time_ms` (kbps).
    pub fn bandwidth_kbps(&self, time_ms: f64) -> f64 {
        self.profile.bandwidth.kbps_at(time_ms)
    }

    /// Resolve a packet into an arrival or a loss.
    ///
    /// Exactly two random draws are made per call, whatever the outcome,
    /// so a run's random stream does not depend on earlier outcomes.
    pub fn submit(
        &mut self,
        packet: &Packet,
        send_time_ms: f64,
        rng: &mut StdRng,
    ) -> ChannelOutcome {
        let loss_roll = rng.random::<f64>();
        let jitter_roll = rng.random::<f64>();

        let kbps = self.drain_to(send_time_ms);
        let exempt = packet.is_redundant && !self.profile.parity_lossy;
        let size = packet.size_bytes as f64;

        if !exempt && loss_roll < self.profile.loss_probability {
            self.window.record_loss();
            return ChannelOutcome::Lost(LossCause::Random);
        }
        if !exempt && self.backlog_bytes + size > self.queue_limit_bytes(kbps, size) {
            self.window.record_loss();
            return ChannelOutcome::Lost(LossCause::QueueOverflow);
        }

        // Wait behind the bytes already queued.
        let queueing_ms = self.backlog_bytes * 8.0 / kbps;
        self.backlog_bytes += size;
        let delay = (self.profile.one_way_delay_ms() + queueing_ms + self.jitter(jitter_roll)).max(0.0);

        self.window.record_delivery(delay);
        ChannelOutcome::Delivered {
            arrival_time_ms: send_time_ms + delay,
        }
    }

    /// Resolve a retransmission requested at `request_ms`.
    ///
    /// The request travels to the sender and the repair travels back, so the
    /// repair lands one full round trip (plus current queueing and jitter)
    /// after the request. Only random loss applies. Retransmissions are not
    /// fed into the observation window.
    pub fn retransmit(&mut self, request_ms: f64, size_bytes: u32, rng: &mut StdRng) -> ChannelOutcome {
        let loss_roll = rng.random::<f64>();
        let jitter_roll = rng.random::<f64>();

        let kbps = self.drain_to(request_ms);
        if loss_roll < self.profile.loss_probability {
            return ChannelOutcome::Lost(LossCause::Random);
        }

        let queueing_ms = self.backlog_bytes * 8.0 / kbps;
        self.backlog_bytes += size_bytes as f64;
        let delay = (self.profile.base_rtt_ms + queueing_ms + self.jitter(jitter_roll)).max(0.0);
        ChannelOutcome::Delivered {
            arrival_time_ms: request_ms + delay,
        }
    }

    /// Close the current tick's observation.
    pub fn observe(&mut self, now_ms: f64) -> ChannelObservation {
        let capacity = self.bandwidth_kbps(now_ms);
        let fallback = self.profile.one_way_delay_ms();
        self.window.close_tick(capacity, fallback)
    }

    /// Drain the bottleneck up to `time_ms` and return the capacity there.
    fn drain_to(&mut self, time_ms: f64) -> f64 {
        let kbps = self.bandwidth_kbps(time_ms);
        let elapsed = time_ms - self.drained_until_ms;
        if elapsed > 0.0 {
            // kbps × ms = bits
            self.backlog_bytes = (self.backlog_bytes - kbps * elapsed / 8.0).max(0.0);
            self.drained_until_ms = time_ms;
        }
        kbps
    }

    /// `max(2 × BDP, 20 packets)` in bytes.
    fn queue_limit_bytes(&self, kbps: f64, packet_size: f64) -> f64 {
        let bdp_bytes = kbps * self.profile.base_rtt_ms / 8.0;
        (2.0 * bdp_bytes).max(20.0 * packet_size)
    }

    fn jitter(&self, roll: f64) -> f64 {
        (roll * 2.0 - 1.0) * self.profile.jitter_range_ms
    }
}

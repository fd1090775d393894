//! # Simulation Driver
//!
//! [`Simulation::tick`] advances the clock by one quantum and steps every
//! component in a fixed order:
//!
//! ```text
//! clock → send (channel) → congestion → recovery → jitter buffer → ABR → metrics
//! ```
//!
//! All mutable state lives in one [`SimulationState`] owned by the
//! simulation. Components never reach into each other; the driver passes
//! each one the previous stage's output. The only randomness is the seeded
//! generator in the state, lent to the channel, so a configuration and a
//! seed fully determine the trajectory.

use std::collections::VecDeque;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::abr::{BitrateSelector, QualityLevel};
use crate::channel::{ChannelObservation, ChannelOutcome, NetworkChannel};
use crate::config::{ClampNotice, SimConfig};
use crate::congestion::{CongestionController, CongestionStrategy, Observations};
use crate::error::ConfigError;
use crate::jitter::JitterBuffer;
use crate::packet::{Packet, PacketLedger};
use crate::recovery::{FecLayout, LossRecoveryCoordinator, Resolution};
use crate::stats::{MetricsSample, RunSummary, RunTally};

// ─── Clock ──────────────────────────────────────────────────────────────────

/// Discrete simulated clock. Tick `k` ends at `k × tick_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    tick: u64,
    tick_ms: f64,
}

impl SimulationClock {
    pub fn new(tick_ms: f64) -> Self {
        SimulationClock { tick: 0, tick_ms }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tick_ms(&self) -> f64 {
        self.tick_ms
    }

    /// Current simulated time (ms).
    pub fn now_ms(&self) -> f64 {
        self.tick as f64 * self.tick_ms
    }

    /// Move to the next tick and return its end time.
    pub fn advance(&mut self) -> f64 {
        self.tick += 1;
        self.now_ms()
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Sender-side pacing and sequencing.
#[derive(Debug, Clone)]
pub struct SenderState {
    /// Unspent send budget (bytes). Parity may push it negative.
    credit_bytes: f64,
    next_id: u64,
    next_data_seq: u64,
    pub selected: QualityLevel,
}

/// Everything that changes while a simulation runs.
#[derive(Debug)]
pub struct SimulationState {
    pub clock: SimulationClock,
    pub channel: NetworkChannel,
    pub controller: CongestionController,
    pub recovery: LossRecoveryCoordinator,
    pub jitter: JitterBuffer,
    pub abr: BitrateSelector,
    pub ledger: PacketLedger,
    pub sender: SenderState,
    /// Delivered packets whose arrival time is still ahead.
    in_flight: Vec<Packet>,
    fec: Option<FecLayout>,
    last_observation: Option<ChannelObservation>,
    rng: StdRng,
}

impl SimulationState {
    fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        let mut abr = BitrateSelector::new(
            config.quality_levels.clone(),
            config.abr_policy,
            config.min_dwell_ticks,
        )?;
        if let Some(name) = &config.initial_level {
            abr = abr.with_initial(name);
        }
        let selected = abr.current().unwrap_or(abr.lowest()).clone();
        let recovery = LossRecoveryCoordinator::new(config.recovery);

        Ok(SimulationState {
            clock: SimulationClock::new(config.tick_ms),
            channel: NetworkChannel::new(config.network.clone()),
            controller: CongestionController::new(config.strategy, config.congestion),
            fec: config.recovery.mode.uses_fec().then(|| recovery.layout()),
            recovery,
            jitter: JitterBuffer::new(config.jitter_target_ms),
            abr,
            ledger: PacketLedger::new(),
            sender: SenderState {
                credit_bytes: 0.0,
                next_id: 0,
                next_data_seq: 0,
                selected,
            },
            in_flight: Vec::new(),
            last_observation: None,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    pub fn in_flight(&self) -> &[Packet] {
        &self.in_flight
    }

    pub fn last_observation(&self) -> Option<&ChannelObservation> {
        self.last_observation.as_ref()
    }
}

// ─── Simulation ─────────────────────────────────────────────────────────────

/// A steppable transport simulation.
pub struct Simulation {
    config: SimConfig,
    clamps: Vec<ClampNotice>,
    state: SimulationState,
    /// The most recent `history_len` samples.
    history: VecDeque<MetricsSample>,
    tally: RunTally,
}

impl Simulation {
    /// Validate `config` and build fresh state.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        let resolved = config.validate()?;
        let state = SimulationState::new(&resolved.config)?;
        log_created(&resolved.config, resolved.clamps.len());
        let history = VecDeque::with_capacity(resolved.config.history_len);
        Ok(Simulation {
            config: resolved.config,
            clamps: resolved.clamps,
            state,
            history,
            tally: RunTally::default(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Clamps applied when the current configuration was validated.
    pub fn clamps(&self) -> &[ClampNotice] {
        &self.clamps
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Recent samples, oldest first. Bounded by `history_len`.
    pub fn samples(&self) -> &VecDeque<MetricsSample> {
        &self.history
    }

    /// Replace the configuration. All state and history are discarded.
    pub fn reconfigure(&mut self, config: SimConfig) -> Result<(), ConfigError> {
        let resolved = config.validate()?;
        self.state = SimulationState::new(&resolved.config)?;
        self.history.clear();
        self.tally = RunTally::default();
        tracing::info!(
            strategy = %resolved.config.strategy,
            recovery = %resolved.config.recovery.mode,
            seed = resolved.config.seed,
            clamps = resolved.clamps.len(),
            "simulation reconfigured"
        );
        self.config = resolved.config;
        self.clamps = resolved.clamps;
        Ok(())
    }

    /// Swap congestion strategy mid-run. Strategy state starts fresh; every
    /// other component keeps going.
    pub fn switch_strategy(&mut self, strategy: CongestionStrategy) {
        self.config.strategy = strategy;
        self.state.controller.switch_to(strategy);
        tracing::info!(tick = self.state.clock.tick(), %strategy, "congestion strategy switched");
    }

    /// Run `ticks` ticks and return their samples.
    pub fn run(&mut self, ticks: u64) -> Vec<MetricsSample> {
        (0..ticks).map(|_| self.tick()).collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_tally(&self.state.ledger, &self.tally)
    }

    /// Advance one tick.
    pub fn tick(&mut self) -> MetricsSample {
        let tick_ms = self.state.clock.tick_ms();
        let start_ms = self.state.clock.now_ms();
        let now_ms = self.state.clock.advance();

        self.send(start_ms, tick_ms);

        // ─── Congestion control ───
        let st = &mut self.state;
        let obs = st.channel.observe(now_ms);
        st.controller.tick(&Observations {
            measured_delay_ms: obs.smoothed_delay_ms,
            loss_event_occurred: obs.loss_event_occurred,
            bandwidth_estimate_kbps: obs.capacity_kbps,
        });
        st.last_observation = Some(obs);

        // ─── Loss recovery ───
        let step = st.recovery.resolve(now_ms);
        for req in step.retransmits {
            st.ledger.record_retransmission();
            let outcome = st.channel.retransmit(req.request_ms, req.size_bytes, &mut st.rng);
            st.recovery.on_retransmit_outcome(req.id, req.request_ms, outcome);
        }
        for resolution in step.resolutions {
            match resolution {
                Resolution::Recovered(packet) => {
                    st.ledger.record_recovered(packet.recovery_method);
                    st.in_flight.push(packet);
                }
                Resolution::Unrecoverable(packet) => {
                    st.ledger.record_unrecoverable();
                    tracing::debug!(
                        tick = st.clock.tick(),
                        id = packet.id,
                        deadline_ms = packet.deadline_ms,
                        "packet unrecoverable"
                    );
                }
            }
        }

        // ─── Jitter buffer ───
        let (arrived, pending): (Vec<Packet>, Vec<Packet>) = std::mem::take(&mut st.in_flight)
            .into_iter()
            .partition(|p| p.arrival_time_ms.is_some_and(|a| a <= now_ms));
        st.in_flight = pending;
        for packet in arrived {
            st.jitter.ingest(packet);
        }
        st.jitter.drain(now_ms);

        // ─── ABR ───
        let rate = st.controller.rate();
        let decision = st.abr.select(rate.value(), st.jitter.health_percent());
        st.sender.selected = decision.level;

        st.ledger.assert_conserved();

        let sample = MetricsSample {
            tick: st.clock.tick(),
            time_ms: now_ms,
            sent_count: 0,
            received_count: 0,
            lost_count: 0,
            recovered_count: 0,
            on_time_count: 0,
            late_count: 0,
            unrecoverable_count: 0,
            fec_recovered_count: 0,
            nack_recovered_count: 0,
            retransmissions: 0,
            parity_sent: 0,
            buffer_category: st.jitter.category(),
            buffer_duration_ms: st.jitter.queued_duration_ms(),
            buffer_health_percent: st.jitter.health_percent(),
            played_count: st.jitter.stats().played,
            current_congestion_rate_kbps: rate.value(),
            congestion_window: st.controller.window().map(|w| w.value()),
            congestion_phase: st.controller.phase_name(),
            available_bandwidth_kbps: obs.capacity_kbps,
            selected_quality_level: st.sender.selected.name.clone(),
            selected_bitrate_kbps: st.sender.selected.bitrate_kbps,
        }
        .with_ledger(&st.ledger);

        self.tally.record(&sample);
        if self.history.len() >= self.config.history_len {
            self.history.pop_front();
        }
        self.history.push_back(sample.clone());
        sample
    }

    /// Emit this tick's packets at `min(selected bitrate, controller rate)`,
    /// spread evenly across the tick.
    fn send(&mut self, start_ms: f64, tick_ms: f64) {
        let st = &mut self.state;
        let packet_size = self.config.packet_size_bytes;
        let one_way = self.config.network.one_way_delay_ms();
        let target = self.config.jitter_target_ms;

        let bitrate = st.sender.selected.bitrate_kbps as f64;
        let send_kbps = st.controller.rate().value().min(bitrate);
        // kbps × ms = bits
        st.sender.credit_bytes += send_kbps * tick_ms / 8.0;

        let count = (st.sender.credit_bytes / packet_size as f64).floor().max(0.0) as u64;
        if count == 0 {
            return;
        }
        st.sender.credit_bytes -= (count * packet_size as u64) as f64;
        let spacing = tick_ms / count as f64;
        // Media time a packet carries at the selected bitrate.
        let media_ms = packet_size as f64 * 8.0 / bitrate;

        for i in 0..count {
            let send_ms = start_ms + i as f64 * spacing;
            let data_seq = st.sender.next_data_seq;
            st.sender.next_data_seq += 1;

            let block = st.fec.map(|layout| layout.block_of(data_seq));
            let packet = Packet::data(next_id(&mut st.sender), send_ms, packet_size, send_ms + one_way + target)
                .with_media_duration(media_ms)
                .with_block(block);
            transmit(st, packet, send_ms);

            if let (Some(layout), Some(block)) = (st.fec, block) {
                if layout.closes_block(data_seq) {
                    for _ in 0..layout.parity_per_block {
                        let parity = Packet::parity(next_id(&mut st.sender), send_ms, packet_size, block);
                        st.sender.credit_bytes -= packet_size as f64;
                        transmit(st, parity, send_ms);
                    }
                }
            }
        }
    }
}

fn next_id(sender: &mut SenderState) -> u64 {
    let id = sender.next_id;
    sender.next_id += 1;
    id
}

/// Push one packet through the channel and hand it to accounting,
/// recovery and (if delivered data) the in-flight list.
fn transmit(st: &mut SimulationState, mut packet: Packet, send_ms: f64) {
    match st.channel.submit(&packet, send_ms, &mut st.rng) {
        ChannelOutcome::Delivered { arrival_time_ms } => packet.mark_delivered(arrival_time_ms),
        ChannelOutcome::Lost(_) => packet.mark_lost(),
    }
    st.ledger.record_sent(&packet);
    st.recovery.observe(&packet);
    if !packet.is_redundant && !packet.lost {
        st.in_flight.push(packet);
    }
}

fn log_created(config: &SimConfig, clamps: usize) {
    tracing::info!(
        strategy = %config.strategy,
        recovery = %config.recovery.mode,
        abr = %config.abr_policy,
        bandwidth = config.network.bandwidth.name(),
        seed = config.seed,
        clamps,
        "simulation created"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BandwidthProfile;
    use crate::recovery::RecoveryMode;

    fn config() -> SimConfig {
        SimConfig {
            seed: 11,
            ..SimConfig::default()
        }
    }

    #[test]
    fn clock_advances_by_quantum() {
        let mut clock = SimulationClock::new(20.0);
        assert_eq!(clock.now_ms(), 0.0);
        assert_eq!(clock.advance(), 20.0);
        assert_eq!(clock.advance(), 40.0);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn ticks_are_numbered_from_one() {
        let mut sim = Simulation::new(config()).unwrap();
        let s = sim.tick();
        assert_eq!(s.tick, 1);
        assert_eq!(s.time_ms, 20.0);
        assert_eq!(sim.run(9).last().map(|s| s.tick), Some(10));
        assert_eq!(sim.samples().len(), 10);
    }

    #[test]
    fn accounting_holds_every_tick() {
        let mut sim = Simulation::new(SimConfig {
            network: crate::channel::NetworkConditionProfile {
                loss_probability: 0.2,
                ..Default::default()
            },
            ..config()
        })
        .unwrap();
        for s in sim.run(300) {
            assert_eq!(s.sent_count, s.received_count + s.lost_count);
            assert_eq!(s.received_count, s.on_time_count + s.late_count + s.recovered_count);
        }
        assert!(sim.summary().sent > 0);
    }

    #[test]
    fn buffer_fills_on_a_clean_link() {
        let mut sim = Simulation::new(SimConfig {
            network: crate::channel::NetworkConditionProfile {
                bandwidth: BandwidthProfile::Constant { kbps: 5_000.0 },
                loss_probability: 0.0,
                jitter_range_ms: 0.0,
                ..Default::default()
            },
            ..config()
        })
        .unwrap();
        let samples = sim.run(200);
        let last = samples.last().unwrap();
        assert_eq!(last.lost_count, 0);
        assert!(last.played_count > 0);
        assert_ne!(last.buffer_category, crate::jitter::BufferCategory::Empty);
    }

    #[test]
    fn no_parity_without_fec() {
        let mut sim = Simulation::new(SimConfig {
            recovery: crate::recovery::RecoveryConfig {
                mode: RecoveryMode::Nack,
                ..Default::default()
            },
            ..config()
        })
        .unwrap();
        let last = sim.run(100).pop().unwrap();
        assert_eq!(last.parity_sent, 0);
        assert_eq!(last.fec_recovered_count, 0);
    }

    #[test]
    fn switch_strategy_keeps_other_state() {
        let mut sim = Simulation::new(config()).unwrap();
        sim.run(50);
        let sent = sim.state().ledger.sent();
        sim.switch_strategy(CongestionStrategy::Aimd);
        assert_eq!(sim.state().controller.phase_name(), "slow-start");
        assert_eq!(sim.state().ledger.sent(), sent);
        assert_eq!(sim.config().strategy, CongestionStrategy::Aimd);
    }

    #[test]
    fn history_is_bounded_but_summary_is_not() {
        let mut sim = Simulation::new(SimConfig {
            history_len: 25,
            ..config()
        })
        .unwrap();
        sim.run(400);
        assert_eq!(sim.samples().len(), 25);
        assert_eq!(sim.samples().front().map(|s| s.tick), Some(376));
        assert_eq!(sim.samples().back().map(|s| s.tick), Some(400));
        assert_eq!(sim.summary().ticks, 400);
    }

    #[test]
    fn reconfigure_resets_everything() {
        let mut sim = Simulation::new(config()).unwrap();
        sim.run(50);
        sim.reconfigure(SimConfig {
            strategy: CongestionStrategy::ModelBased,
            ..config()
        })
        .unwrap();
        assert_eq!(sim.state().clock.tick(), 0);
        assert_eq!(sim.state().ledger.sent(), 0);
        assert!(sim.samples().is_empty());
        assert_eq!(sim.summary().ticks, 0);
        assert_eq!(sim.state().controller.phase_name(), "startup");
    }
}

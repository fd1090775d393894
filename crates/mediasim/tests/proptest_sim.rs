//! Property-based tests for the simulation components and the tick pipeline.

use mediasim::abr::{default_ladder, AbrPolicy, BitrateSelector};
use mediasim::channel::NetworkConditionProfile;
use mediasim::congestion::{
    BbrPhase, CongestionController, CongestionParams, CongestionState, CongestionStrategy, Observations,
};
use mediasim::jitter::{health_percent, BufferCategory};
use mediasim::packet::Packet;
use mediasim::recovery::{LossRecoveryCoordinator, RecoveryConfig, RecoveryMode, Resolution};
use mediasim::{SimConfig, Simulation};
use proptest::prelude::*;

const MODES: [RecoveryMode; 4] = [
    RecoveryMode::None,
    RecoveryMode::Fec,
    RecoveryMode::Nack,
    RecoveryMode::Both,
];

fn lossy_config(seed: u64, loss: f64, strategy: usize, mode: usize) -> SimConfig {
    SimConfig {
        seed,
        network: NetworkConditionProfile {
            loss_probability: loss,
            ..Default::default()
        },
        strategy: CongestionStrategy::ALL[strategy % CongestionStrategy::ALL.len()],
        recovery: RecoveryConfig {
            mode: MODES[mode % MODES.len()],
            ..Default::default()
        },
        ..SimConfig::default()
    }
}

// ─── Packet Conservation ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every sent data packet is received or lost, on every tick.
    #[test]
    fn accounting_is_conserved(
        seed in any::<u64>(),
        loss in 0.0f64..0.5,
        strategy in 0usize..3,
        mode in 0usize..4,
        ticks in 20u64..150,
    ) {
        let mut sim = Simulation::new(lossy_config(seed, loss, strategy, mode)).unwrap();
        for s in sim.run(ticks) {
            prop_assert_eq!(s.sent_count, s.received_count + s.lost_count);
            prop_assert_eq!(
                s.received_count,
                s.on_time_count + s.late_count + s.recovered_count
            );
            prop_assert_eq!(
                s.recovered_count,
                s.fec_recovered_count + s.nack_recovered_count
            );
        }
    }

    /// Same config and seed, same trajectory.
    #[test]
    fn runs_are_deterministic(
        seed in any::<u64>(),
        loss in 0.0f64..0.3,
        strategy in 0usize..3,
        mode in 0usize..4,
    ) {
        let config = lossy_config(seed, loss, strategy, mode);
        let a: Vec<String> = Simulation::new(config.clone())
            .unwrap()
            .run(80)
            .iter()
            .map(|s| s.to_json_line())
            .collect();
        let b: Vec<String> = Simulation::new(config)
            .unwrap()
            .run(80)
            .iter()
            .map(|s| s.to_json_line())
            .collect();
        prop_assert_eq!(a, b);
    }
}

// ─── Congestion Control ─────────────────────────────────────────────────────

fn observations() -> impl Strategy<Value = Vec<(f64, bool, f64)>> {
    prop::collection::vec((0.0f64..500.0, any::<bool>(), 0.0f64..10_000.0), 1..200)
}

proptest! {
    /// Output rate stays inside the configured limits whatever the feedback.
    #[test]
    fn rate_stays_within_limits(strategy in 0usize..3, feedback in observations()) {
        let params = CongestionParams::default();
        let strategy = CongestionStrategy::ALL[strategy];
        let mut cc = CongestionController::new(strategy, params);
        for (delay, loss, bw) in feedback {
            let budget = cc.tick(&Observations {
                measured_delay_ms: delay,
                loss_event_occurred: loss,
                bandwidth_estimate_kbps: bw,
            });
            let rate = budget.rate.value();
            prop_assert!(rate >= 0.0 && rate <= params.limits.ceiling_kbps, "rate {}", rate);
            match budget.window {
                Some(w) => {
                    prop_assert!(w.value() >= params.min_window);
                    prop_assert!(w.value() <= params.limits.window_ceiling());
                }
                None => prop_assert!(rate >= params.limits.floor_kbps),
            }
        }
    }

    /// A loss event halves the AIMD window, never below the minimum.
    #[test]
    fn aimd_loss_halves_window(quiet_ticks in 0usize..80, bw in 100.0f64..5_000.0) {
        let params = CongestionParams::default();
        let mut cc = CongestionController::new(CongestionStrategy::Aimd, params);
        let quiet = Observations {
            measured_delay_ms: 40.0,
            loss_event_occurred: false,
            bandwidth_estimate_kbps: bw,
        };
        for _ in 0..quiet_ticks {
            cc.tick(&quiet);
        }
        let before = cc.window().unwrap().value();
        cc.tick(&Observations { loss_event_occurred: true, ..quiet });
        let CongestionState::Aimd(s) = cc.state() else {
            panic!("expected AIMD state");
        };
        let expected = (before / 2.0).max(params.min_window);
        prop_assert!((s.ssthresh - expected).abs() < 1e-9);
        prop_assert!((s.window.value() - expected).abs() < 1e-9);
    }

    /// Under constant bandwidth the model-based strategy walks
    /// Startup → Drain → ProbeBW and never goes back.
    #[test]
    fn bbr_phases_progress(bw in 200.0f64..4_000.0) {
        let mut cc = CongestionController::new(CongestionStrategy::ModelBased, CongestionParams::default());
        let order = |p: BbrPhase| match p {
            BbrPhase::Startup => 0,
            BbrPhase::Drain => 1,
            BbrPhase::ProbeBw => 2,
        };
        let mut last = 0;
        for _ in 0..200 {
            cc.tick(&Observations {
                measured_delay_ms: 50.0,
                loss_event_occurred: false,
                bandwidth_estimate_kbps: bw,
            });
            let CongestionState::ModelBased(s) = cc.state() else {
                panic!("expected model-based state");
            };
            let now = order(s.phase);
            prop_assert!(now >= last, "phase went backwards");
            last = now;
        }
        prop_assert_eq!(last, 2);
    }
}

// ─── FEC Recovery Bound ─────────────────────────────────────────────────────

proptest! {
    /// A block recovers every lost data packet iff its erasures fit the
    /// parity budget.
    #[test]
    fn fec_recovers_iff_within_parity_budget(
        fec_ratio in 2u32..=8,
        block_size in 1u32..=16,
        data_mask in prop::collection::vec(any::<bool>(), 16),
        parity_losses in 0u32..3,
    ) {
        let mut rc = LossRecoveryCoordinator::new(RecoveryConfig {
            mode: RecoveryMode::Fec,
            fec_ratio,
            fec_block_size: Some(block_size),
            ..RecoveryConfig::default()
        });
        let layout = rc.layout();
        let mut data_lost = 0u32;
        for i in 0..layout.data_per_block {
            let mut p = Packet::data(i as u64, 0.0, 1200, 10_000.0).with_block(Some(0));
            if data_mask[i as usize] {
                p.mark_lost();
                data_lost += 1;
            } else {
                p.mark_delivered(60.0);
            }
            rc.observe(&p);
        }
        let parity_lost = parity_losses.min(layout.parity_per_block);
        for j in 0..layout.parity_per_block {
            let mut p = Packet::parity((layout.data_per_block + j) as u64, 0.0, 1200, 0);
            if j < parity_lost {
                p.mark_lost();
            } else {
                p.mark_delivered(70.0);
            }
            rc.observe(&p);
        }

        let step = rc.resolve(100.0);
        let recovered = step
            .resolutions
            .iter()
            .filter(|r| matches!(r, Resolution::Recovered(_)))
            .count() as u32;
        let given_up = step.resolutions.len() as u32 - recovered;

        if data_lost + parity_lost <= layout.parity_per_block {
            prop_assert_eq!(recovered, data_lost);
            prop_assert_eq!(given_up, 0);
        } else {
            prop_assert_eq!(recovered, 0);
            prop_assert_eq!(given_up, data_lost);
        }
        prop_assert_eq!(rc.pending_count(), 0);
    }
}

// ─── ABR ────────────────────────────────────────────────────────────────────

proptest! {
    /// Consecutive quality changes are at least `min_dwell_ticks` apart, and
    /// an unheld decision always lands on the target level.
    #[test]
    fn abr_respects_dwell(
        dwell in 0u32..6,
        simple in any::<bool>(),
        signals in prop::collection::vec((0.0f64..6_000.0, 0.0f64..100.0), 1..80),
    ) {
        let policy = if simple { AbrPolicy::Simple } else { AbrPolicy::BufferBased };
        let mut abr = BitrateSelector::new(default_ladder(), policy, dwell).unwrap();
        let mut last_change: Option<usize> = None;
        for (i, (bw, health)) in signals.into_iter().enumerate() {
            let d = abr.select(bw, health);
            if d.held_by_dwell {
                prop_assert_eq!(Some(&d.level), d.previous.as_ref());
            } else {
                prop_assert_eq!(&d.level, &d.target);
            }
            if d.changed {
                if let Some(prev) = last_change {
                    prop_assert!(i - prev >= dwell as usize, "switched after {} ticks", i - prev);
                }
                last_change = Some(i);
            }
        }
    }

    /// Rising bandwidth at a fixed buffer health never lowers the level.
    #[test]
    fn abr_is_monotonic_in_bandwidth(
        dwell in 0u32..6,
        health in 0.0f64..100.0,
        steps in prop::collection::vec(0.0f64..300.0, 1..80),
    ) {
        let mut abr = BitrateSelector::new(default_ladder(), AbrPolicy::BufferBased, dwell).unwrap();
        let mut bw = 0.0;
        let mut last_bitrate = 0;
        for step in steps {
            bw += step;
            let level = abr.select(bw, health).level;
            prop_assert!(level.bitrate_kbps >= last_bitrate);
            last_bitrate = level.bitrate_kbps;
        }
    }
}

// ─── Jitter Buffer Classification ───────────────────────────────────────────

proptest! {
    #[test]
    fn buffer_category_matches_thresholds(queued in 0.0f64..1_000.0, target in 1.0f64..500.0) {
        let category = BufferCategory::classify(queued, target);
        let expected = if queued <= 0.0 {
            BufferCategory::Empty
        } else if queued < 0.5 * target {
            BufferCategory::Filling
        } else if queued <= 1.5 * target {
            BufferCategory::Stable
        } else {
            BufferCategory::Overflow
        };
        prop_assert_eq!(category, expected);

        let health = health_percent(queued, target);
        prop_assert!((0.0..=100.0).contains(&health));
    }
}

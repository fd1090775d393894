//! # Loss Recovery
//!
//! FEC block reconstruction and NACK-driven retransmission for lost data
//! packets.
//!
//! ## Key design decisions
//!
//! - **Erasure budget**: a block of `N` data packets carries
//!   `B = max(1, N / R)` parity packets. Every lost data packet in the block
//!   is rebuilt when total erasures (data plus parity) stay within `B`.
//! - **Reconstruction time**: a rebuilt packet appears when the block's last
//!   surviving packet arrives. Rebuilding after the playout deadline is a miss.
//! - **FEC first**: in combined mode only FEC misses fall through to NACK.
//! - **NACK suppression**: a request that cannot land before the deadline is
//!   never sent; the packet is declared unrecoverable instead.
//! - **Retry budget**: max retransmission attempts per packet (default 3)
//!
//! The coordinator never touches the channel. It emits
//! [`RetransmitRequest`]s; the driver resolves them and reports back through
//! [`LossRecoveryCoordinator::on_retransmit_outcome`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelOutcome;
use crate::error::ConfigError;
use crate::packet::{Packet, RecoveryMethod};

// ─── Mode ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    None,
    Fec,
    Nack,
    /// FEC first, NACK for what FEC misses.
    Both,
}

impl RecoveryMode {
    pub fn uses_fec(self) -> bool {
        matches!(self, RecoveryMode::Fec | RecoveryMode::Both)
    }

    pub fn uses_nack(self) -> bool {
        matches!(self, RecoveryMode::Nack | RecoveryMode::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryMode::None => "none",
            RecoveryMode::Fec => "fec",
            RecoveryMode::Nack => "nack",
            RecoveryMode::Both => "both",
        }
    }
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(RecoveryMode::None),
            "fec" => Ok(RecoveryMode::Fec),
            "nack" | "arq" => Ok(RecoveryMode::Nack),
            "both" | "fec+nack" | "combined" => Ok(RecoveryMode::Both),
            _ => Err(ConfigError::UnknownRecoveryMethod(s.to_string())),
        }
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryConfig {
    pub mode: RecoveryMode,
    /// One parity packet per `fec_ratio` data packets (≥ 2).
    pub fec_ratio: u32,
    /// Data packets per FEC block. `None` means one block per parity packet,
    /// i.e. `fec_ratio` data packets.
    pub fec_block_size: Option<u32>,
    /// Wait past the expected arrival before declaring a gap (ms).
    pub nack_grace_ms: f64,
    pub max_nack_retries: u8,
    pub base_rtt_ms: f64,
}

impl RecoveryConfig {
    /// Data packets per FEC block, falling back to `fec_ratio`.
    pub fn block_size(&self) -> u32 {
        self.fec_block_size.unwrap_or(self.fec_ratio)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            mode: RecoveryMode::Fec,
            fec_ratio: 4,
            fec_block_size: None,
            nack_grace_ms: 10.0,
            max_nack_retries: 3,
            base_rtt_ms: 100.0,
        }
    }
}

/// Block geometry shared by sender and coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecLayout {
    pub data_per_block: u32,
    pub parity_per_block: u32,
}

impl FecLayout {
    pub fn new(fec_ratio: u32, block_size: u32) -> Self {
        let data_per_block = block_size.max(1);
        FecLayout {
            data_per_block,
            parity_per_block: (data_per_block / fec_ratio.max(1)).max(1),
        }
    }

    /// Block index for the `data_seq`-th data packet.
    pub fn block_of(&self, data_seq: u64) -> u64 {
        data_seq / self.data_per_block as u64
    }

    /// Whether the `data_seq`-th data packet is the last of its block.
    pub fn closes_block(&self, data_seq: u64) -> bool {
        data_seq % self.data_per_block as u64 == self.data_per_block as u64 - 1
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Recovered(Packet),
    Unrecoverable(Packet),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetransmitRequest {
    pub id: u64,
    pub request_ms: f64,
    pub size_bytes: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryStep {
    pub resolutions: Vec<Resolution>,
    pub retransmits: Vec<RetransmitRequest>,
}

/// Running counters kept by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub fec_recovered: u64,
    pub fec_misses: u64,
    pub nack_recovered: u64,
    pub nack_requests: u64,
    pub nack_suppressed: u64,
    pub unrecoverable: u64,
}

// ─── Internal State ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum LossState {
    /// Held until its FEC block completes.
    AwaitingFec,
    /// Gap detected; request goes out at `request_at`.
    AwaitingNack { request_at: f64, attempts: u8 },
    /// Request sent, channel outcome not reported yet.
    Retransmitting { attempts: u8 },
    /// Retransmission delivered, lands at `arrival`.
    InFlight { arrival: f64 },
}

#[derive(Debug, Clone)]
struct PendingLoss {
    packet: Packet,
    state: LossState,
}

#[derive(Debug, Clone, Default)]
struct FecBlock {
    data_seen: u32,
    parity_seen: u32,
    parity_lost: u32,
    lost_ids: Vec<u64>,
    latest_arrival: f64,
}

// ─── Coordinator ────────────────────────────────────────────────────────────

/// Tracks every pending loss until it is recovered or given up on.
#[derive(Debug, Clone)]
pub struct LossRecoveryCoordinator {
    config: RecoveryConfig,
    layout: FecLayout,
    blocks: BTreeMap<u64, FecBlock>,
    pending: BTreeMap<u64, PendingLoss>,
    stats: RecoveryStats,
}

impl LossRecoveryCoordinator {
    pub fn new(config: RecoveryConfig) -> Self {
        LossRecoveryCoordinator {
            layout: FecLayout::new(config.fec_ratio, config.block_size()),
            config,
            blocks: BTreeMap::new(),
            pending: BTreeMap::new(),
            stats: RecoveryStats::default(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn mode(&self) -> RecoveryMode {
        self.config.mode
    }

    pub fn layout(&self) -> FecLayout {
        self.layout
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Losses not yet resolved either way.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Feed a packet whose channel outcome is known.
    pub fn observe(&mut self, packet: &Packet) {
        if self.config.mode.uses_fec() {
            if let Some(block_id) = packet.fec_block {
                let block = self.blocks.entry(block_id).or_default();
                if packet.is_redundant {
                    block.parity_seen += 1;
                    if packet.lost {
                        block.parity_lost += 1;
                    }
                } else {
                    block.data_seen += 1;
                    if packet.lost {
                        block.lost_ids.push(packet.id);
                    }
                }
                if let Some(arrival) = packet.arrival_time_ms {
                    block.latest_arrival = block.latest_arrival.max(arrival);
                }
            }
        }

        if packet.is_redundant || !packet.lost {
            return;
        }

        let state = if self.config.mode.uses_fec() && packet.fec_block.is_some() {
            LossState::AwaitingFec
        } else {
            // Without NACK this is given up once the gap is detected.
            LossState::AwaitingNack {
                request_at: self.detect_time(packet),
                attempts: 0,
            }
        };
        self.pending.insert(
            packet.id,
            PendingLoss {
                packet: packet.clone(),
                state,
            },
        );
    }

    /// Advance recovery to `now_ms`.
    pub fn resolve(&mut self, now_ms: f64) -> RecoveryStep {
        let mut step = RecoveryStep::default();
        self.resolve_blocks(now_ms, &mut step);
        self.expire_fec_waits(now_ms, &mut step);
        self.schedule_nacks(now_ms, &mut step);
        self.land_retransmissions(now_ms, &mut step);
        step
    }

    /// Report the channel outcome for a request emitted by [`Self::resolve`].
    pub fn on_retransmit_outcome(&mut self, id: u64, request_ms: f64, outcome: ChannelOutcome) {
        let Some(entry) = self.pending.get_mut(&id) else {
            return;
        };
        let LossState::Retransmitting { attempts } = entry.state else {
            return;
        };
        entry.state = match outcome {
            ChannelOutcome::Delivered { arrival_time_ms } if arrival_time_ms <= entry.packet.deadline_ms => {
                LossState::InFlight {
                    arrival: arrival_time_ms.max(request_ms),
                }
            }
            // Lost or too late: the receiver notices after one more round trip.
            _ => LossState::AwaitingNack {
                request_at: request_ms + self.config.base_rtt_ms + self.config.nack_grace_ms,
                attempts,
            },
        };
    }

    fn detect_time(&self, packet: &Packet) -> f64 {
        packet.send_time_ms + self.config.base_rtt_ms / 2.0 + self.config.nack_grace_ms
    }

    fn resolve_blocks(&mut self, now_ms: f64, step: &mut RecoveryStep) {
        let layout = self.layout;
        let ready: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, b)| {
                b.data_seen >= layout.data_per_block && b.parity_seen >= layout.parity_per_block
            })
            .filter(|(_, b)| {
                let erasures = b.lost_ids.len() as u32 + b.parity_lost;
                erasures > layout.parity_per_block || b.latest_arrival <= now_ms
            })
            .map(|(id, _)| *id)
            .collect();

        for block_id in ready {
            let Some(block) = self.blocks.remove(&block_id) else {
                continue;
            };
            let erasures = block.lost_ids.len() as u32 + block.parity_lost;
            let decodable = erasures <= layout.parity_per_block;

            for id in block.lost_ids {
                let Some(entry) = self.pending.get(&id) else {
                    continue;
                };
                if entry.state != LossState::AwaitingFec {
                    continue;
                }
                if decodable && block.latest_arrival <= entry.packet.deadline_ms {
                    if let Some(mut entry) = self.pending.remove(&id) {
                        entry.packet.mark_recovered(RecoveryMethod::Fec, block.latest_arrival);
                        self.stats.fec_recovered += 1;
                        step.resolutions.push(Resolution::Recovered(entry.packet));
                    }
                } else {
                    self.stats.fec_misses += 1;
                    self.fall_through(id, now_ms, step);
                }
            }
        }
    }

    /// A block that cannot complete before a packet's deadline is a miss.
    fn expire_fec_waits(&mut self, now_ms: f64, step: &mut RecoveryStep) {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, e)| e.state == LossState::AwaitingFec && e.packet.deadline_ms < now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.stats.fec_misses += 1;
            self.fall_through(id, now_ms, step);
        }
    }

    fn fall_through(&mut self, id: u64, now_ms: f64, step: &mut RecoveryStep) {
        if !self.config.mode.uses_nack() {
            self.give_up(id, step);
            return;
        }
        let request_at = match self.pending.get(&id) {
            Some(entry) => self.detect_time(&entry.packet).max(now_ms),
            None => return,
        };
        if let Some(entry) = self.pending.get_mut(&id) {
            entry.state = LossState::AwaitingNack {
                request_at,
                attempts: 0,
            };
        }
    }

    fn schedule_nacks(&mut self, now_ms: f64, step: &mut RecoveryStep) {
        let due: Vec<(u64, f64, u8)> = self
            .pending
            .iter()
            .filter_map(|(id, e)| match e.state {
                LossState::AwaitingNack { request_at, attempts } if request_at <= now_ms => {
                    Some((*id, request_at, attempts))
                }
                _ => None,
            })
            .collect();

        for (id, request_at, attempts) in due {
            if !self.config.mode.uses_nack() || attempts >= self.config.max_nack_retries {
                self.give_up(id, step);
                continue;
            }
            let Some(entry) = self.pending.get_mut(&id) else {
                continue;
            };
            // Suppress requests that cannot beat the playout deadline.
            if request_at + self.config.base_rtt_ms > entry.packet.deadline_ms {
                self.stats.nack_suppressed += 1;
                self.give_up(id, step);
                continue;
            }
            entry.state = LossState::Retransmitting {
                attempts: attempts + 1,
            };
            self.stats.nack_requests += 1;
            step.retransmits.push(RetransmitRequest {
                id,
                request_ms: request_at,
                size_bytes: entry.packet.size_bytes,
            });
        }
    }

    fn land_retransmissions(&mut self, now_ms: f64, step: &mut RecoveryStep) {
        let landed: Vec<(u64, f64)> = self
            .pending
            .iter()
            .filter_map(|(id, e)| match e.state {
                LossState::InFlight { arrival } if arrival <= now_ms => Some((*id, arrival)),
                _ => None,
            })
            .collect();
        for (id, arrival) in landed {
            if let Some(mut entry) = self.pending.remove(&id) {
                entry.packet.mark_recovered(RecoveryMethod::Nack, arrival);
                self.stats.nack_recovered += 1;
                step.resolutions.push(Resolution::Recovered(entry.packet));
            }
        }
    }

    fn give_up(&mut self, id: u64, step: &mut RecoveryStep) {
        if let Some(entry) = self.pending.remove(&id) {
            self.stats.unrecoverable += 1;
            step.resolutions.push(Resolution::Unrecoverable(entry.packet));
        }
    }
}

//! # Packet Model and Accounting
//!
//! A [`Packet`] is created by the sender each tick, resolved by the channel
//! (arrival or loss), possibly repaired by the recovery coordinator, and
//! retired once the jitter buffer plays it out or recovery gives up.
//!
//! [`PacketLedger`] holds the per-run counters. Every mutation moves exactly
//! one data packet between buckets, so
//! `sent == received + lost` and `received == on_time + late + recovered`
//! hold after every call.

use serde::Serialize;

/// How a lost packet was brought back, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMethod {
    None,
    Fec,
    Nack,
}

/// A single media or FEC parity packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    /// Sequence number, shared by data and parity packets.
    pub id: u64,
    /// Simulated send time (ms).
    pub send_time_ms: f64,
    /// Arrival (or reconstruction) time (ms). `None` while unresolved or lost.
    pub arrival_time_ms: Option<f64>,
    pub size_bytes: u32,
    /// FEC parity flag.
    pub is_redundant: bool,
    pub lost: bool,
    pub recovered: bool,
    pub recovery_method: RecoveryMethod,
    /// Original target playout time (ms).
    pub deadline_ms: f64,
    /// Media time this packet carries (ms). Zero for parity.
    pub media_duration_ms: f64,
    /// FEC block this packet belongs to, when FEC is active.
    pub fec_block: Option<u64>,
}

impl Packet {
    pub fn data(id: u64, send_time_ms: f64, size_bytes: u32, deadline_ms: f64) -> Self {
        Packet {
            id,
            send_time_ms,
            arrival_time_ms: None,
            size_bytes,
            is_redundant: false,
            lost: false,
            recovered: false,
            recovery_method: RecoveryMethod::None,
            deadline_ms,
            media_duration_ms: 0.0,
            fec_block: None,
        }
    }

    pub fn parity(id: u64, send_time_ms: f64, size_bytes: u32, block: u64) -> Self {
        Packet {
            is_redundant: true,
            fec_block: Some(block),
            ..Packet::data(id, send_time_ms, size_bytes, f64::INFINITY)
        }
    }

    pub fn with_media_duration(mut self, ms: f64) -> Self {
        self.media_duration_ms = ms.max(0.0);
        self
    }

    pub fn with_block(mut self, block: Option<u64>) -> Self {
        self.fec_block = block;
        self
    }

    /// Record a channel delivery. Arrival never precedes the send time.
    pub fn mark_delivered(&mut self, arrival_time_ms: f64) {
        self.arrival_time_ms = Some(arrival_time_ms.max(self.send_time_ms));
        self.lost = false;
    }

    pub fn mark_lost(&mut self) {
        self.arrival_time_ms = None;
        self.lost = true;
    }

    /// Record a successful repair. The packet stays flagged `lost` so the
    /// history is visible, with `recovered` set alongside.
    pub fn mark_recovered(&mut self, method: RecoveryMethod, arrival_time_ms: f64) {
        self.arrival_time_ms = Some(arrival_time_ms.max(self.send_time_ms));
        self.recovered = true;
        self.recovery_method = method;
    }

    /// Whether the packet may be handed to the playout buffer.
    pub fn is_playable(&self) -> bool {
        self.arrival_time_ms.is_some() && (!self.lost || self.recovered)
    }

    /// Arrived after its original target playout time.
    pub fn is_late(&self) -> bool {
        self.arrival_time_ms
            .map(|arrival| arrival > self.deadline_ms)
            .unwrap_or(false)
    }
}

// ─── Ledger ─────────────────────────────────────────────────────────────────

/// Data-packet accounting for one run. Parity packets are counted apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PacketLedger {
    sent: u64,
    on_time: u64,
    late: u64,
    recovered_fec: u64,
    recovered_nack: u64,
    lost_pending: u64,
    unrecoverable: u64,
    parity_sent: u64,
    parity_lost: u64,
    retransmissions: u64,
}

impl PacketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a packet whose channel outcome is already decided.
    pub fn record_sent(&mut self, packet: &Packet) {
        if packet.is_redundant {
            self.parity_sent += 1;
            if packet.lost {
                self.parity_lost += 1;
            }
            return;
        }
        self.sent += 1;
        if packet.lost {
            self.lost_pending += 1;
        } else if packet.is_late() {
            self.late += 1;
        } else {
            self.on_time += 1;
        }
    }

    /// Move one pending loss to the recovered bucket.
    pub fn record_recovered(&mut self, method: RecoveryMethod) {
        assert!(
            self.lost_pending > 0,
            "recovery reported with no pending loss (ledger {:?})",
            self
        );
        self.lost_pending -= 1;
        match method {
            RecoveryMethod::Fec => self.recovered_fec += 1,
            RecoveryMethod::Nack => self.recovered_nack += 1,
            RecoveryMethod::None => {
                panic!("recovery reported without a recovery method")
            }
        }
    }

    /// Move one pending loss to the unrecoverable bucket.
    pub fn record_unrecoverable(&mut self) {
        assert!(
            self.lost_pending > 0,
            "unrecoverable loss reported with no pending loss (ledger {:?})",
            self
        );
        self.lost_pending -= 1;
        self.unrecoverable += 1;
    }

    pub fn record_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    /// Fail fast on an accounting mismatch. A failure here is a core bug.
    pub fn assert_conserved(&self) {
        assert_eq!(
            self.sent,
            self.received() + self.lost(),
            "packet accounting broken: {:?}",
            self
        );
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.on_time + self.late + self.recovered()
    }

    /// Lost and not (yet) recovered.
    pub fn lost(&self) -> u64 {
        self.lost_pending + self.unrecoverable
    }

    pub fn lost_pending(&self) -> u64 {
        self.lost_pending
    }

    pub fn on_time(&self) -> u64 {
        self.on_time
    }

    pub fn late(&self) -> u64 {
        self.late
    }

    pub fn recovered(&self) -> u64 {
        self.recovered_fec + self.recovered_nack
    }

    pub fn recovered_fec(&self) -> u64 {
        self.recovered_fec
    }

    pub fn recovered_nack(&self) -> u64 {
        self.recovered_nack
    }

    pub fn unrecoverable(&self) -> u64 {
        self.unrecoverable
    }

    pub fn parity_sent(&self) -> u64 {
        self.parity_sent
    }

    pub fn parity_lost(&self) -> u64 {
        self.parity_lost
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Channel losses, recovered or not.
    pub fn channel_losses(&self) -> u64 {
        self.lost() + self.recovered()
    }

    /// Share of sent packets still missing after recovery.
    pub fn residual_loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost() as f64 / self.sent as f64
        }
    }
}

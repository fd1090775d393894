//! # Jitter Buffer
//!
//! Holds arrived packets for a fixed target delay and releases them in
//! playout order:
//!
//! ```text
//! playout_time = arrival_time + target_delay
//! ```
//!
//! The buffer's category is recomputed from the queue on every call; there
//! is no cached state to drift.

use serde::Serialize;

use crate::packet::{Packet, RecoveryMethod};

// ─── Category ───────────────────────────────────────────────────────────────

/// Coarse buffer fill level relative to the target delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferCategory {
    /// Nothing queued.
    Empty,
    /// Below 50% of target.
    Filling,
    /// 50%–150% of target, both bounds inclusive.
    Stable,
    /// Above 150% of target.
    Overflow,
}

impl BufferCategory {
    /// Classify a queued media duration against the target delay.
    pub fn classify(queued_ms: f64, target_ms: f64) -> Self {
        if queued_ms.is_nan() || queued_ms <= 0.0 {
            return BufferCategory::Empty;
        }
        let target = target_ms.max(0.0);
        if queued_ms < 0.5 * target {
            BufferCategory::Filling
        } else if queued_ms <= 1.5 * target {
            BufferCategory::Stable
        } else {
            BufferCategory::Overflow
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BufferCategory::Empty => "empty",
            BufferCategory::Filling => "filling",
            BufferCategory::Stable => "stable",
            BufferCategory::Overflow => "overflow",
        }
    }
}

/// Buffer health for ABR: queued duration as a share of target, capped at 100.
pub fn health_percent(queued_ms: f64, target_ms: f64) -> f64 {
    if queued_ms.is_nan() || queued_ms <= 0.0 {
        return 0.0;
    }
    if target_ms <= 0.0 {
        return 100.0;
    }
    (queued_ms / target_ms * 100.0).min(100.0)
}

// ─── Playout ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Playout {
    OnTime,
    /// Arrived after its original target playout time.
    Late,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayedPacket {
    pub packet: Packet,
    pub playout_time_ms: f64,
    pub playout: Playout,
}

/// Snapshot of playout statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JitterStats {
    pub ingested: u64,
    pub rejected: u64,
    pub played: u64,
    pub played_late: u64,
    pub played_recovered: u64,
}

#[derive(Debug, Clone)]
struct Queued {
    playout_time_ms: f64,
    packet: Packet,
}

// ─── Buffer ─────────────────────────────────────────────────────────────────

/// Fixed-delay playout buffer.
#[derive(Debug, Clone)]
pub struct JitterBuffer {
    target_delay_ms: f64,
    /// Sorted by `(playout_time_ms, id)`.
    queue: Vec<Queued>,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(target_delay_ms: f64) -> Self {
        JitterBuffer {
            target_delay_ms: target_delay_ms.max(0.0),
            queue: Vec::new(),
            stats: JitterStats::default(),
        }
    }

    pub fn target_delay_ms(&self) -> f64 {
        self.target_delay_ms
    }

    /// Enqueue an arrived packet. Packets that are lost and not recovered,
    /// or that have no arrival time, are refused.
    pub fn ingest(&mut self, packet: Packet) -> bool {
        let Some(arrival) = packet.arrival_time_ms.filter(|_| packet.is_playable()) else {
            tracing::warn!(id = packet.id, lost = packet.lost, "refusing unplayable packet");
            self.stats.rejected += 1;
            return false;
        };
        let playout_time_ms = arrival + self.target_delay_ms;
        let key = (playout_time_ms, packet.id);
        let idx = self
            .queue
            .partition_point(|q| (q.playout_time_ms, q.packet.id) <= key);
        self.queue.insert(
            idx,
            Queued {
                playout_time_ms,
                packet,
            },
        );
        self.stats.ingested += 1;
        true
    }

    /// Release every packet whose playout time is `<= now_ms`, in order.
    pub fn drain(&mut self, now_ms: f64) -> Vec<PlayedPacket> {
        let due = self.queue.partition_point(|q| q.playout_time_ms <= now_ms);
        let played: Vec<PlayedPacket> = self
            .queue
            .drain(..due)
            .map(|q| {
                let playout = if q.packet.is_late() {
                    Playout::Late
                } else {
                    Playout::OnTime
                };
                PlayedPacket {
                    playout_time_ms: q.playout_time_ms,
                    playout,
                    packet: q.packet,
                }
            })
            .collect();

        for p in &played {
            self.stats.played += 1;
            if p.playout == Playout::Late {
                self.stats.played_late += 1;
            }
            if p.packet.recovery_method != RecoveryMethod::None {
                self.stats.played_recovered += 1;
            }
        }
        played
    }

    /// Media time currently queued (ms).
    pub fn queued_duration_ms(&self) -> f64 {
        self.queue.iter().map(|q| q.packet.media_duration_ms).sum()
    }

    pub fn category(&self) -> BufferCategory {
        BufferCategory::classify(self.queued_duration_ms(), self.target_delay_ms)
    }

    pub fn health_percent(&self) -> f64 {
        health_percent(self.queued_duration_ms(), self.target_delay_ms)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }
}

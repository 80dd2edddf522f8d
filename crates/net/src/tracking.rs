use std::collections::VecDeque;

use crate::protocol::sequence_greater_than;

/// A state delta sent to a client and not yet covered by an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelta {
    pub sequence: u32,
    pub sent_ms: u64,
    /// World tick of the snapshot the delta was built from.
    pub snapshot_tick: u32,
    pub complete: bool,
    pub size: usize,
}

/// Cumulative acknowledgement tracking for one client's delta stream.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingDelta>,
    max_pending: usize,
    next_sequence: u32,
    last_acked: Option<u32>,
    /// Smoothed time from sending a delta to its exact acknowledgement.
    srtt: Option<f32>,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            next_sequence: 1,
            last_acked: None,
            srtt: None,
        }
    }

    /// Allocates the next sequence number for this client's delta stream.
    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    pub fn track(&mut self, delta: PendingDelta) {
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }
        self.pending.push_back(delta);
    }

    /// Applies a cumulative ack. Returns the pruned deltas, or `None` when the
    /// ack is stale, duplicated or references a sequence never sent.
    pub fn on_ack(&mut self, acked: u32, now_ms: u64) -> Option<Vec<PendingDelta>> {
        if let Some(last) = self.last_acked {
            if !sequence_greater_than(acked, last) {
                return None;
            }
        }
        if !sequence_greater_than(self.next_sequence, acked) {
            log::debug!("ignoring ack for unsent delta {}", acked);
            return None;
        }

        self.last_acked = Some(acked);

        let mut pruned = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|p| !sequence_greater_than(p.sequence, acked))
        {
            if let Some(delta) = self.pending.pop_front() {
                pruned.push(delta);
            }
        }

        if let Some(exact) = pruned.iter().find(|p| p.sequence == acked) {
            let rtt = now_ms.saturating_sub(exact.sent_ms) as f32;
            self.update_rtt(rtt);
        }

        Some(pruned)
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;

        self.srtt = Some(match self.srtt {
            Some(srtt) => (1.0 - ALPHA) * srtt + ALPHA * rtt,
            None => rtt,
        });
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingDelta> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn srtt_ms(&self) -> Option<u32> {
        self.srtt.map(|srtt| srtt.round() as u32)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

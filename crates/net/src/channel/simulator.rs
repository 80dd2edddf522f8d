use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::stats::rand_percent;

use super::{Incoming, PacketChannel};

/// One-way loss and latency applied to a link, in both directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkConditions {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl LinkConditions {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            (rand_percent() / 100.0 * self.jitter_ms as f32) as u32
        } else {
            0
        };
        base + (rand_percent() / 100.0 * range as f32) as u32 + jitter
    }
}

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    order: u64,
    addr: SocketAddr,
    bytes: Vec<u8>,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Wraps a channel and injects artificial loss and latency.
pub struct SimulatedChannel<C> {
    inner: C,
    global: LinkConditions,
    per_addr: HashMap<SocketAddr, LinkConditions>,
    inbound: BinaryHeap<DelayedDatagram>,
    outbound: BinaryHeap<DelayedDatagram>,
    order: u64,
}

impl<C: PacketChannel> SimulatedChannel<C> {
    pub fn new(inner: C, global: LinkConditions) -> Self {
        Self {
            inner,
            global,
            per_addr: HashMap::new(),
            inbound: BinaryHeap::new(),
            outbound: BinaryHeap::new(),
            order: 0,
        }
    }

    pub fn set_conditions(&mut self, addr: SocketAddr, conditions: LinkConditions) {
        if conditions.enabled {
            self.per_addr.insert(addr, conditions);
        } else {
            self.per_addr.remove(&addr);
        }
    }

    pub fn conditions_for(&self, addr: &SocketAddr) -> &LinkConditions {
        self.per_addr.get(addr).unwrap_or(&self.global)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn delayed(&mut self, addr: SocketAddr, bytes: Vec<u8>) -> DelayedDatagram {
        let delay = Duration::from_millis(self.conditions_for(&addr).delay_ms() as u64);
        self.order += 1;
        DelayedDatagram {
            release_time: Instant::now() + delay,
            order: self.order,
            addr,
            bytes,
        }
    }

    fn flush_outbound(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        while self.outbound.peek().is_some_and(|d| d.release_time <= now) {
            if let Some(delayed) = self.outbound.pop() {
                self.inner.send_to(delayed.addr, &delayed.bytes)?;
            }
        }
        Ok(())
    }
}

impl<C: PacketChannel> PacketChannel for SimulatedChannel<C> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        if self.conditions_for(&addr).should_drop() {
            log::debug!("simulated loss of outbound datagram to {}", addr);
            return Ok(());
        }
        let delayed = self.delayed(addr, bytes.to_vec());
        self.outbound.push(delayed);
        self.flush_outbound()
    }

    fn poll(&mut self) -> Result<Vec<Incoming>, TransportError> {
        self.flush_outbound()?;

        let mut ready = Vec::new();
        for incoming in self.inner.poll()? {
            match incoming {
                Incoming::Datagram { from, bytes } => {
                    if self.conditions_for(&from).should_drop() {
                        log::debug!("simulated loss of inbound datagram from {}", from);
                        continue;
                    }
                    let delayed = self.delayed(from, bytes);
                    self.inbound.push(delayed);
                }
                notice @ Incoming::Disconnected { .. } => ready.push(notice),
            }
        }

        let now = Instant::now();
        while self.inbound.peek().is_some_and(|d| d.release_time <= now) {
            if let Some(delayed) = self.inbound.pop() {
                ready.push(Incoming::Datagram {
                    from: delayed.addr,
                    bytes: delayed.bytes,
                });
            }
        }

        Ok(ready)
    }
}

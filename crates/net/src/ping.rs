use crate::bandwidth::BandwidthRater;
use crate::protocol::Payload;
use crate::registry::ClientConnection;

pub const PING_SAMPLES: usize = 8;

/// Sample value meaning "no response in time"; excluded from averages.
pub const NO_RESPONSE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutstandingPing {
    nonce: u32,
    sent_tick: u32,
    sent_ms: u64,
}

/// Ring buffer of recent round-trip times in milliseconds.
#[derive(Debug, Clone)]
pub struct PingState {
    samples: [i32; PING_SAMPLES],
    current: usize,
    total: u32,
    outstanding: Option<OutstandingPing>,
    next_nonce: u32,
    sent: u32,
    last_sent_tick: Option<u32>,
}

impl Default for PingState {
    fn default() -> Self {
        Self::new()
    }
}

impl PingState {
    pub fn new() -> Self {
        Self {
            samples: [NO_RESPONSE; PING_SAMPLES],
            current: 0,
            total: 0,
            outstanding: None,
            next_nonce: 1,
            sent: 0,
            last_sent_tick: None,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn last_sent_tick(&self) -> Option<u32> {
        self.last_sent_tick
    }

    pub fn samples(&self) -> &[i32; PING_SAMPLES] {
        &self.samples
    }

    /// Stores one measurement; anything over `timeout_ms` counts as no response.
    pub fn record(&mut self, rtt_ms: u32, timeout_ms: u32) {
        let sample = if rtt_ms > timeout_ms {
            NO_RESPONSE
        } else {
            rtt_ms.min(i32::MAX as u32) as i32
        };
        self.samples[self.current % PING_SAMPLES] = sample;
        self.current = (self.current + 1) % PING_SAMPLES;
        self.total += 1;
    }

    pub fn valid_samples(&self) -> usize {
        self.samples.iter().filter(|&&s| s >= 0).count()
    }

    pub fn has_valid_sample(&self) -> bool {
        self.valid_samples() > 0
    }

    pub fn average_ms(&self) -> Option<u32> {
        let valid: Vec<u32> = self
            .samples
            .iter()
            .filter(|&&s| s >= 0)
            .map(|&s| s as u32)
            .collect();
        if valid.is_empty() {
            return None;
        }
        Some((valid.iter().map(|&s| s as u64).sum::<u64>() / valid.len() as u64) as u32)
    }

    pub fn last_rtt_ms(&self) -> Option<u32> {
        if self.total == 0 {
            return None;
        }
        let last = self.samples[(self.current + PING_SAMPLES - 1) % PING_SAMPLES];
        (last >= 0).then_some(last as u32)
    }

    fn begin(&mut self, tick: u32, now_ms: u64) -> Option<(u32, u64)> {
        if self.outstanding.is_some() {
            return None;
        }
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1).max(1);
        self.outstanding = Some(OutstandingPing {
            nonce,
            sent_tick: tick,
            sent_ms: now_ms,
        });
        self.sent += 1;
        self.last_sent_tick = Some(tick);
        Some((nonce, now_ms))
    }

    fn resolve(&mut self, nonce: u32, now_ms: u64) -> Option<u32> {
        let outstanding = self.outstanding.filter(|p| p.nonce == nonce)?;
        self.outstanding = None;
        Some(now_ms.saturating_sub(outstanding.sent_ms).min(u32::MAX as u64) as u32)
    }

    fn expire(&mut self, now_ms: u64, timeout_ms: u32) -> bool {
        match self.outstanding {
            Some(p) if now_ms.saturating_sub(p.sent_ms) > timeout_ms as u64 => {
                log::debug!("ping {} sent at tick {} went unanswered", p.nonce, p.sent_tick);
                self.outstanding = None;
                self.record(timeout_ms.saturating_add(1), timeout_ms);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

/// Drives round-trip sampling and feeds the results to the bandwidth rater.
#[derive(Debug, Clone)]
pub struct Pinger {
    interval_ticks: u32,
    timeout_ms: u32,
    rater: BandwidthRater,
}

impl Pinger {
    pub fn new(interval_ticks: u32, timeout_ms: u32) -> Self {
        Self {
            interval_ticks,
            timeout_ms,
            rater: BandwidthRater,
        }
    }

    /// Returns the ping to transmit, or `None` if one is already in flight.
    pub fn send_ping(
        &self,
        client: &mut ClientConnection,
        tick: u32,
        now_ms: u64,
    ) -> Option<Payload> {
        let (nonce, sent_ms) = client.ping.begin(tick, now_ms)?;
        Some(Payload::Ping { nonce, sent_ms })
    }

    /// A ping is due when none is in flight and the interval has elapsed.
    pub fn is_due(&self, client: &ClientConnection, tick: u32) -> bool {
        if client.ping.is_outstanding() {
            return false;
        }
        match client.ping.last_sent_tick() {
            Some(last) => tick.wrapping_sub(last) >= self.interval_ticks,
            None => true,
        }
    }

    /// Matches a pong to the outstanding ping. Unknown nonces are ignored.
    pub fn on_pong(&self, client: &mut ClientConnection, nonce: u32, now_ms: u64) -> Option<u32> {
        let rtt = client.ping.resolve(nonce, now_ms)?;
        self.on_ping_response(client, rtt);
        Some(rtt)
    }

    pub fn on_ping_response(&self, client: &mut ClientConnection, observed_rtt_ms: u32) {
        client.ping.record(observed_rtt_ms, self.timeout_ms);
        let rating = self.rater.update(client.bandwidth, &client.ping);
        if rating != client.bandwidth {
            log::debug!(
                "client {} bandwidth rating {} -> {}",
                client.id,
                client.bandwidth.value(),
                rating.value()
            );
            client.bandwidth = rating;
        }
    }

    /// Gives up on a ping that has been in flight longer than the timeout.
    pub fn expire(&self, client: &mut ClientConnection, now_ms: u64) -> bool {
        if client.ping.expire(now_ms, self.timeout_ms) {
            client.bandwidth = self.rater.update(client.bandwidth, &client.ping);
            return true;
        }
        false
    }
}

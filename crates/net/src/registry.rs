use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::bandwidth::BandwidthRating;
use crate::context::NetConfig;
use crate::demo::DemoSink;
use crate::error::NetError;
use crate::ping::PingState;
use crate::reliable::{ReliableQueue, ReliableReceiver};
use crate::tracking::AckTracker;

/// Index into the registry's slot table. Doubles as the player number on the wire.
pub type SlotIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Leaving,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Leaving => "leaving",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a client's delta stream stands relative to its acknowledged world state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaCursor {
    /// Snapshot tick of the last complete delta the client acknowledged.
    pub base_tick: Option<u32>,
    /// Round-robin offset into the changed entity list for truncated deltas.
    pub rotation: usize,
    pub last_sent_tick: Option<u32>,
}

/// Per-slot connection state. Owned exclusively by [`ClientRegistry`].
pub struct ClientConnection {
    pub id: u32,
    pub addr: SocketAddr,
    pub name: String,
    state: ConnectionState,
    enter_time: Option<Instant>,
    pub bandwidth: BandwidthRating,
    /// Ticks since the last valid acknowledgement from this client.
    pub age_ticks: u32,
    /// Ticks spent in the handshake so far.
    pub handshake_ticks: u32,
    pub(crate) last_handshake_send: u32,
    pub ping: PingState,
    demo: Option<Box<dyn DemoSink>>,
    /// Slot whose viewpoint this connection is spectating, `None` for its own.
    pub viewing_console: Option<SlotIndex>,
    pub(crate) challenge_token: u64,
    pub malformed_count: u32,
    pub acks: AckTracker,
    pub outgoing: ReliableQueue,
    pub incoming: ReliableReceiver,
    pub delta: DeltaCursor,
    setup_acked: bool,
    wants_game_data: bool,
}

impl ClientConnection {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self::configured(id, addr, &NetConfig::default())
    }

    pub fn configured(id: u32, addr: SocketAddr, config: &NetConfig) -> Self {
        Self {
            id,
            addr,
            name: String::new(),
            state: ConnectionState::Connecting,
            enter_time: None,
            bandwidth: BandwidthRating::DEFAULT,
            age_ticks: 0,
            handshake_ticks: 0,
            last_handshake_send: 0,
            ping: PingState::new(),
            demo: None,
            viewing_console: None,
            challenge_token: 0,
            malformed_count: 0,
            acks: AckTracker::new(config.max_pending_deltas),
            outgoing: ReliableQueue::new(
                config.reliable_resend_ticks,
                config.reliable_max_attempts,
            ),
            incoming: ReliableReceiver::new(),
            delta: DeltaCursor::default(),
            setup_acked: false,
            wants_game_data: true,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// True until the client acknowledges the challenge.
    pub fn handshake_pending(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn in_handshake(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Handshaking
        )
    }

    /// Whether game-state deltas may be sent to this client.
    pub fn ready_for_game_data(&self) -> bool {
        self.is_ready() && self.wants_game_data
    }

    pub fn set_wants_game_data(&mut self, wanted: bool) {
        self.wants_game_data = wanted;
    }

    pub fn setup_acked(&self) -> bool {
        self.setup_acked
    }

    pub fn enter_time(&self) -> Option<Instant> {
        self.enter_time
    }

    /// Connecting -> Handshaking. Returns false from any other state.
    pub fn begin_handshake(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Handshaking;
        true
    }

    pub fn acknowledge_setup(&mut self) -> bool {
        if self.state != ConnectionState::Handshaking || self.setup_acked {
            return false;
        }
        self.setup_acked = true;
        true
    }

    /// Handshaking -> Ready, once setup is acknowledged and a ping has come back.
    pub fn try_become_ready(&mut self) -> bool {
        if self.state != ConnectionState::Handshaking
            || !self.setup_acked
            || !self.ping.has_valid_sample()
        {
            return false;
        }
        self.state = ConnectionState::Ready;
        self.enter_time = Some(Instant::now());
        self.age_ticks = 0;
        true
    }

    pub fn begin_leaving(&mut self) {
        self.state = ConnectionState::Leaving;
    }

    pub fn has_demo(&self) -> bool {
        self.demo.is_some()
    }

    pub fn attach_demo(&mut self, sink: Box<dyn DemoSink>) -> Option<Box<dyn DemoSink>> {
        self.demo.replace(sink)
    }

    pub fn detach_demo(&mut self) -> Option<Box<dyn DemoSink>> {
        self.demo.take()
    }

    /// Mirrors transmitted bytes into the attached demo sink. A sink that
    /// fails is closed and detached.
    pub fn record_demo(&mut self, bytes: &[u8]) {
        let Some(sink) = self.demo.as_mut() else {
            return;
        };
        if let Err(err) = sink.write(bytes) {
            log::warn!("demo recording for client {} failed: {}", self.id, err);
            if let Some(mut sink) = self.demo.take() {
                if let Err(err) = sink.close() {
                    log::warn!("closing failed demo sink: {}", err);
                }
            }
        }
    }

    /// Releases every owned sub-resource. Safe to call more than once.
    fn release(&mut self) {
        if let Some(mut sink) = self.demo.take() {
            if let Err(err) = sink.close() {
                log::warn!("closing demo sink for client {}: {}", self.id, err);
            }
        }
        let abandoned = self.outgoing.clear();
        if abandoned > 0 {
            log::debug!(
                "abandoned {} reliable messages for client {}",
                abandoned,
                self.id
            );
        }
        self.acks.clear();
        self.ping.clear();
        self.state = ConnectionState::Disconnected;
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("bandwidth", &self.bandwidth)
            .field("age_ticks", &self.age_ticks)
            .field("recording", &self.demo.is_some())
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity slot table owning every client connection.
///
/// Other components refer to connections by [`SlotIndex`] only; ids are
/// never reused so a recycled slot is always distinguishable.
#[derive(Debug)]
pub struct ClientRegistry {
    slots: Vec<Option<ClientConnection>>,
    by_addr: HashMap<SocketAddr, SlotIndex>,
    next_id: u32,
    config: NetConfig,
}

impl ClientRegistry {
    pub fn new(config: &NetConfig) -> Self {
        Self {
            slots: (0..config.max_clients).map(|_| None).collect(),
            by_addr: HashMap::new(),
            next_id: 1,
            config: config.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the lowest free slot for `addr`. An address that already holds
    /// a slot gets that slot back.
    pub fn allocate(&mut self, addr: SocketAddr) -> Result<SlotIndex, NetError> {
        if let Some(&slot) = self.by_addr.get(&addr) {
            return Ok(slot);
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::CapacityExceeded)?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        self.slots[slot] = Some(ClientConnection::configured(id, addr, &self.config));
        self.by_addr.insert(addr, slot);
        log::debug!("allocated slot {} to {} as client {}", slot, addr, id);
        Ok(slot)
    }

    /// Releases the slot and its resources. Freeing an empty slot is a no-op.
    pub fn free(&mut self, slot: SlotIndex) -> Option<ClientConnection> {
        let mut client = self.slots.get_mut(slot)?.take()?;
        self.by_addr.remove(&client.addr);
        client.release();
        log::debug!("freed slot {} (client {})", slot, client.id);
        Some(client)
    }

    pub fn get(&self, slot: SlotIndex) -> Option<&ClientConnection> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: SlotIndex) -> Option<&mut ClientConnection> {
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn slot_for_addr(&self, addr: &SocketAddr) -> Option<SlotIndex> {
        self.by_addr.get(addr).copied()
    }

    pub fn state_of(&self, slot: SlotIndex) -> ConnectionState {
        self.get(slot)
            .map_or(ConnectionState::Disconnected, ClientConnection::state)
    }

    /// Calls `f` for every READY slot in slot order, stopping at the first error.
    pub fn for_each_ready<F, E>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(SlotIndex, &mut ClientConnection) -> Result<(), E>,
    {
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if let Some(client) = entry.as_mut().filter(|c| c.is_ready()) {
                f(slot, client)?;
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &ClientConnection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|c| (slot, c)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotIndex, &mut ClientConnection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_mut().map(|c| (slot, c)))
    }

    pub fn occupied_slots(&self) -> Vec<SlotIndex> {
        self.iter().map(|(slot, _)| slot).collect()
    }

    pub fn ready_slots(&self) -> Vec<SlotIndex> {
        self.iter()
            .filter(|(_, c)| c.is_ready())
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.by_addr.len()
    }

    pub fn ready_count(&self) -> usize {
        self.iter().filter(|(_, c)| c.is_ready()).count()
    }

    pub fn is_full(&self) -> bool {
        self.occupied_count() >= self.capacity()
    }
}

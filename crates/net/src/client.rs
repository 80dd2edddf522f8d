use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

use crate::channel::{Incoming, PacketChannel};
use crate::context::{NetMode, NetworkContext};
use crate::error::{DisconnectReason, NetError, TransportError};
use crate::protocol::{
    EntityState, GameSetup, MAX_CHAT_LEN, Packet, PacketHeader, Payload, ReliableMessage,
    SERVER_SENDER, StateDelta, sequence_greater_than,
};
use crate::registry::{ConnectionState, SlotIndex};
use crate::reliable::{ReliableQueue, ReliableReceiver};
use crate::snapshot::EntityId;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        slot: SlotIndex,
        client_id: u32,
        server_name: String,
    },
    Refused {
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    Chat {
        from: Option<SlotIndex>,
        name: String,
        text: String,
    },
    ConsoleText {
        text: String,
    },
    PlayerJoined {
        slot: SlotIndex,
        name: String,
    },
    PlayerLeft {
        slot: SlotIndex,
        name: String,
    },
    /// A chat line we sent was never acknowledged.
    MessageDropped {
        message: ReliableMessage,
    },
}

type EntityView = BTreeMap<EntityId, EntityState>;

/// Client side of the synchronization core. Driven by [`NetClient::tick`].
pub struct NetClient<C: PacketChannel> {
    ctx: NetworkContext,
    channel: C,
    server: Option<SocketAddr>,
    name: String,
    state: ConnectionState,
    slot: Option<SlotIndex>,
    client_id: u32,
    token: Option<u64>,
    setup: Option<GameSetup>,
    players: BTreeMap<SlotIndex, String>,
    view: EntityView,
    complete_views: BTreeMap<u32, EntityView>,
    last_applied: Option<u32>,
    server_tick: Option<u32>,
    deltas_applied: u64,
    outgoing: ReliableQueue,
    incoming: ReliableReceiver,
    ticks: u32,
    handshake_ticks: u32,
    last_hello_tick: u32,
    silence_ticks: u32,
    events: VecDeque<ClientEvent>,
}

impl<C: PacketChannel> NetClient<C> {
    pub fn new(ctx: NetworkContext, channel: C) -> Result<Self, NetError> {
        if ctx.mode() != NetMode::Client {
            return Err(NetError::WrongMode);
        }
        let config = ctx.config();
        let outgoing =
            ReliableQueue::new(config.reliable_resend_ticks, config.reliable_max_attempts);

        Ok(Self {
            channel,
            server: None,
            name: String::new(),
            state: ConnectionState::Disconnected,
            slot: None,
            client_id: 0,
            token: None,
            setup: None,
            players: BTreeMap::new(),
            view: EntityView::new(),
            complete_views: BTreeMap::new(),
            last_applied: None,
            server_tick: None,
            deltas_applied: 0,
            outgoing,
            incoming: ReliableReceiver::new(),
            ticks: 0,
            handshake_ticks: 0,
            last_hello_tick: 0,
            silence_ticks: 0,
            events: VecDeque::new(),
            ctx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server
    }

    pub fn context_mut(&mut self) -> &mut NetworkContext {
        &mut self.ctx
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn slot(&self) -> Option<SlotIndex> {
        self.slot
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn setup(&self) -> Option<&GameSetup> {
        self.setup.as_ref()
    }

    pub fn players(&self) -> &BTreeMap<SlotIndex, String> {
        &self.players
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityState> {
        self.view.values()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.view.get(&id)
    }

    /// Sequence of the newest delta applied.
    pub fn last_applied(&self) -> Option<u32> {
        self.last_applied
    }

    pub fn server_tick(&self) -> Option<u32> {
        self.server_tick
    }

    pub fn deltas_applied(&self) -> u64 {
        self.deltas_applied
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn connect(&mut self, server: SocketAddr, name: &str) -> Result<(), TransportError> {
        self.reset_session();
        self.server = Some(server);
        self.name = name.to_string();
        self.state = ConnectionState::Connecting;
        self.last_hello_tick = self.ticks;
        log::info!("connecting to {} as {}", server, name);
        self.send(Payload::Hello {
            name: self.name.clone(),
        })
    }

    /// Queues a chat line; it goes out in order once the connection is ready.
    pub fn say(&mut self, text: &str) -> u32 {
        self.outgoing.push(ReliableMessage::Chat {
            from: self.slot.map(|s| s as u8),
            text: text.chars().take(MAX_CHAT_LEN).collect(),
        })
    }

    pub fn spectate(&mut self, slot: SlotIndex) -> Result<(), NetError> {
        if !self.is_ready() {
            return Err(NetError::WrongMode);
        }
        self.send(Payload::ViewConsole { slot: slot as u8 })?;
        Ok(())
    }

    pub fn set_ready_for_data(&mut self, ready: bool) -> Result<(), NetError> {
        if !self.is_ready() {
            return Err(NetError::WrongMode);
        }
        self.send(Payload::ReadyForData { ready })?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state = ConnectionState::Leaving;
        let result = self.send(Payload::Goodbye {
            reason: DisconnectReason::Graceful.to_string(),
        });
        self.end_session(DisconnectReason::Graceful.to_string());
        result
    }

    pub fn tick(&mut self) -> Result<(), TransportError> {
        if !self.ctx.net_enabled() {
            return Ok(());
        }

        for incoming in self.channel.poll()? {
            match incoming {
                Incoming::Datagram { from, bytes } if Some(from) == self.server => {
                    self.dispatch(&bytes)?;
                }
                Incoming::Datagram { from, .. } => {
                    log::debug!("ignoring datagram from {}", from);
                }
                Incoming::Disconnected { from } if Some(from) == self.server => {
                    if self.state != ConnectionState::Disconnected {
                        self.end_session(DisconnectReason::TransportClosed.to_string());
                    }
                }
                Incoming::Disconnected { .. } => {}
            }
        }

        self.maintain()?;
        self.ticks = self.ticks.wrapping_add(1);
        Ok(())
    }

    fn maintain(&mut self) -> Result<(), TransportError> {
        let config = self.ctx.config();
        let timeout = config.handshake_timeout_ticks;
        let resend = config.handshake_resend_ticks.max(1);
        let stale_after = config.stale_timeout_ticks;

        match self.state {
            ConnectionState::Connecting | ConnectionState::Handshaking => {
                self.handshake_ticks += 1;
                if self.handshake_ticks > timeout {
                    log::warn!("no answer from server, giving up");
                    self.end_session(DisconnectReason::HandshakeTimeout.to_string());
                    return Ok(());
                }
                if self.state == ConnectionState::Connecting
                    && self.ticks.wrapping_sub(self.last_hello_tick) >= resend
                {
                    self.last_hello_tick = self.ticks;
                    self.send(Payload::Hello {
                        name: self.name.clone(),
                    })?;
                }
            }
            ConnectionState::Ready => {
                self.silence_ticks += 1;
                if self.silence_ticks > stale_after {
                    log::warn!("server went silent");
                    self.end_session(DisconnectReason::Stale.to_string());
                    return Ok(());
                }

                let poll = self.outgoing.poll(self.ticks);
                for dropped in poll.dropped {
                    log::warn!(
                        "message {} was not acknowledged after {} attempts",
                        dropped.sequence,
                        dropped.attempts()
                    );
                    self.events.push_back(ClientEvent::MessageDropped {
                        message: dropped.message,
                    });
                }
                if let Some(payload) = poll.transmit {
                    self.send(payload)?;
                }
            }
            ConnectionState::Disconnected | ConnectionState::Leaving => {}
        }
        Ok(())
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("discarding malformed server packet: {}", err);
                return Ok(());
            }
        };
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.silence_ticks = 0;
        log::debug!("<- {}", packet.payload.kind());

        match packet.payload {
            Payload::Challenge {
                slot,
                client_id,
                token,
            } => self.on_challenge(slot as SlotIndex, client_id, token),
            Payload::Refused { reason } => {
                log::warn!("server refused connection: {}", reason);
                self.events.push_back(ClientEvent::Refused { reason });
                self.reset_session();
                Ok(())
            }
            Payload::Setup(setup) => self.on_setup(setup),
            Payload::Ping { nonce, sent_ms } => self.send(Payload::Pong { nonce, sent_ms }),
            Payload::PlayerInfo(info) => {
                let slot = info.slot as SlotIndex;
                let known = self.players.insert(slot, info.name.clone());
                if Some(slot) == self.slot {
                    self.become_ready();
                } else if known.as_deref() != Some(info.name.as_str()) {
                    self.events.push_back(ClientEvent::PlayerJoined {
                        slot,
                        name: info.name,
                    });
                }
                Ok(())
            }
            Payload::PlayerLeft { slot, name } => {
                self.players.remove(&(slot as SlotIndex));
                self.events.push_back(ClientEvent::PlayerLeft {
                    slot: slot as SlotIndex,
                    name,
                });
                Ok(())
            }
            Payload::StateDelta(delta) => {
                self.become_ready();
                let sequence = delta.sequence;
                if self.apply_delta(delta) {
                    self.send(Payload::DeltaAck { sequence })?;
                }
                Ok(())
            }
            Payload::Reliable { sequence, message } => {
                self.send(Payload::ReliableAck { sequence })?;
                if self.incoming.accept(sequence) {
                    self.deliver(message);
                }
                Ok(())
            }
            Payload::ReliableAck { sequence } => {
                self.outgoing.on_ack(sequence);
                Ok(())
            }
            Payload::Goodbye { reason } => {
                log::info!("server closed the connection: {}", reason);
                self.end_session(reason);
                Ok(())
            }
            other => {
                log::debug!("ignoring unexpected {} from server", other.kind());
                Ok(())
            }
        }
    }

    fn on_challenge(
        &mut self,
        slot: SlotIndex,
        client_id: u32,
        token: u64,
    ) -> Result<(), TransportError> {
        match self.state {
            ConnectionState::Connecting => {
                self.slot = Some(slot);
                self.client_id = client_id;
                self.token = Some(token);
                self.state = ConnectionState::Handshaking;
                log::debug!("challenged for slot {} as client {}", slot, client_id);
                self.send(Payload::HandshakeAck { token })
            }
            // Our ack got lost; repeat it.
            ConnectionState::Handshaking if self.token == Some(token) => {
                self.send(Payload::HandshakeAck { token })
            }
            _ => Ok(()),
        }
    }

    fn on_setup(&mut self, setup: GameSetup) -> Result<(), TransportError> {
        if !matches!(
            self.state,
            ConnectionState::Handshaking | ConnectionState::Ready
        ) {
            return Ok(());
        }
        if self.setup.is_none() {
            self.players = setup
                .players
                .iter()
                .map(|p| (p.slot as SlotIndex, p.name.clone()))
                .collect();
            log::info!(
                "joined '{}' ({} Hz, {} players present)",
                setup.server_name,
                setup.tick_rate,
                setup.players.len()
            );
            self.setup = Some(setup);
        }
        self.send(Payload::SetupAck)
    }

    fn become_ready(&mut self) {
        if self.state != ConnectionState::Handshaking || self.setup.is_none() {
            return;
        }
        let Some(slot) = self.slot else {
            return;
        };
        self.state = ConnectionState::Ready;
        let server_name = self
            .setup
            .as_ref()
            .map(|s| s.server_name.clone())
            .unwrap_or_default();
        log::info!("ready in slot {}", slot);
        self.events.push_back(ClientEvent::Connected {
            slot,
            client_id: self.client_id,
            server_name,
        });
    }

    /// Applies a delta if it is newer than anything applied so far. Complete
    /// deltas rebuild the view from their base; truncated ones patch the
    /// current view.
    fn apply_delta(&mut self, delta: StateDelta) -> bool {
        if self.state != ConnectionState::Ready {
            return false;
        }
        if let Some(last) = self.last_applied {
            if !sequence_greater_than(delta.sequence, last) {
                log::debug!("ignoring stale delta {} (have {})", delta.sequence, last);
                return false;
            }
        }

        if delta.complete {
            let mut next = match delta.base_tick {
                None => EntityView::new(),
                Some(base) => match self.complete_views.get(&base) {
                    Some(view) => view.clone(),
                    None => {
                        log::debug!("delta {} references unknown base {}", delta.sequence, base);
                        return false;
                    }
                },
            };
            patch(&mut next, &delta);
            self.complete_views.insert(delta.tick, next.clone());
            while self.complete_views.len() > self.ctx.config().snapshot_history {
                self.complete_views.pop_first();
            }
            self.view = next;
        } else {
            patch(&mut self.view, &delta);
        }

        self.last_applied = Some(delta.sequence);
        self.server_tick = Some(delta.tick);
        self.deltas_applied += 1;
        true
    }

    fn deliver(&mut self, message: ReliableMessage) {
        match message {
            ReliableMessage::Chat { from, text } => {
                let from = from.map(|s| s as SlotIndex);
                let name = match from {
                    Some(slot) => self
                        .players
                        .get(&slot)
                        .cloned()
                        .unwrap_or_else(|| format!("slot {}", slot)),
                    None => "server".to_string(),
                };
                self.events.push_back(ClientEvent::Chat { from, name, text });
            }
            ReliableMessage::ConsoleText { text } => {
                self.events.push_back(ClientEvent::ConsoleText { text });
            }
        }
    }

    fn end_session(&mut self, reason: String) {
        log::info!("disconnected: {}", reason);
        self.events.push_back(ClientEvent::Disconnected { reason });
        self.reset_session();
    }

    fn reset_session(&mut self) {
        let config = self.ctx.config();
        self.outgoing =
            ReliableQueue::new(config.reliable_resend_ticks, config.reliable_max_attempts);
        self.incoming = ReliableReceiver::new();
        self.state = ConnectionState::Disconnected;
        self.slot = None;
        self.client_id = 0;
        self.token = None;
        self.setup = None;
        self.players.clear();
        self.view.clear();
        self.complete_views.clear();
        self.last_applied = None;
        self.server_tick = None;
        self.handshake_ticks = 0;
        self.silence_ticks = 0;
    }

    fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        let Some(server) = self.server else {
            return Ok(());
        };
        let sender = self.slot.map_or(SERVER_SENDER, |s| s as u8);
        let kind = payload.kind();
        match Packet::new(PacketHeader::new(sender), payload).encode() {
            Ok(bytes) => {
                log::debug!("-> {} ({} bytes)", kind, bytes.len());
                self.channel.send_to(server, &bytes)
            }
            Err(err) => {
                log::warn!("dropping outgoing {}: {}", kind, err);
                Ok(())
            }
        }
    }
}

fn patch(view: &mut EntityView, delta: &StateDelta) {
    for id in &delta.removed {
        view.remove(id);
    }
    for entity in &delta.entities {
        view.insert(entity.entity_id, *entity);
    }
}

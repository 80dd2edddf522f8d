mod events;
mod handshake;

use std::collections::VecDeque;
use std::net::SocketAddr;

use glam::Vec3;

use crate::channel::{Incoming, PacketChannel};
use crate::context::{NetMode, NetworkContext};
use crate::demo::DemoSink;
use crate::error::{DisconnectReason, NetError, RejectReason, TransportError};
use crate::frame::FrameBuilder;
use crate::master::{MasterAnnouncer, ServerInfo};
use crate::ping::Pinger;
use crate::protocol::{GameSetup, MAX_CHAT_LEN, Packet, Payload, PlayerInfo, ReliableMessage};
use crate::registry::{ClientConnection, ClientRegistry, ConnectionState, SlotIndex};
use crate::snapshot::{SnapshotBuffer, World, WorldSnapshot};

pub use events::ServerEvent;
pub use handshake::{AckOutcome, HandshakeSequencer, Maintenance};

const MAX_SETUP_PLAYERS: usize = 16;

/// Called when a client becomes READY, before its first delta is built.
/// Returning a sink starts recording that client.
pub type DemoRecorder =
    Box<dyn FnMut(SlotIndex, &ClientConnection, u32) -> Option<Box<dyn DemoSink>>>;

/// Point-in-time view of one slot for monitoring.
#[derive(Debug, Clone)]
pub struct ClientSummary {
    pub slot: SlotIndex,
    pub client_id: u32,
    pub name: String,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub ping_ms: Option<u32>,
    /// Smoothed delta acknowledgement time.
    pub ack_rtt_ms: Option<u32>,
    pub bandwidth: u8,
    pub pending_deltas: usize,
    pub age_ticks: u32,
    pub connected_secs: u64,
    pub recording: bool,
}

/// Authoritative side of the synchronization core.
///
/// Everything happens inside [`NetServer::tick`]: drain the channel, advance
/// handshakes and timeouts, ping, resend reliable messages, capture the
/// world and send each READY client its delta.
pub struct NetServer<C: PacketChannel> {
    ctx: NetworkContext,
    channel: C,
    registry: ClientRegistry,
    handshake: HandshakeSequencer,
    pinger: Pinger,
    frames: FrameBuilder,
    world: World,
    history: SnapshotBuffer,
    announcer: Option<MasterAnnouncer>,
    recorder: Option<DemoRecorder>,
    events: VecDeque<ServerEvent>,
    tick: u32,
    shutting_down: bool,
}

impl<C: PacketChannel> NetServer<C> {
    pub fn new(ctx: NetworkContext, channel: C) -> Result<Self, NetError> {
        if ctx.mode() != NetMode::Server {
            return Err(NetError::WrongMode);
        }
        let config = ctx.config();
        log::info!(
            "server '{}' listening on {} ({} slots, {} Hz)",
            config.server_name,
            channel.local_addr(),
            config.max_clients,
            config.tick_rate
        );

        Ok(Self {
            registry: ClientRegistry::new(config),
            handshake: HandshakeSequencer::new(config),
            pinger: Pinger::new(config.ping_interval_ticks, config.ping_timeout_ms),
            frames: FrameBuilder,
            world: World::new(),
            history: SnapshotBuffer::new(config.snapshot_history),
            announcer: None,
            recorder: None,
            events: VecDeque::new(),
            tick: 0,
            shutting_down: false,
            channel,
            ctx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn context(&self) -> &NetworkContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut NetworkContext {
        &mut self.ctx
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn current_tick(&self) -> u32 {
        self.tick
    }

    pub fn set_announcer(&mut self, announcer: MasterAnnouncer) {
        self.announcer = Some(announcer);
    }

    pub fn set_demo_recorder(&mut self, recorder: DemoRecorder) {
        self.recorder = Some(recorder);
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    /// Runs one server tick. Only a transport failure is returned; every
    /// per-client problem is contained to that client's slot.
    pub fn tick(&mut self) -> Result<(), TransportError> {
        if !self.ctx.net_enabled() {
            return Ok(());
        }

        for incoming in self.channel.poll()? {
            match incoming {
                Incoming::Datagram { from, bytes } => self.dispatch(from, &bytes)?,
                Incoming::Disconnected { from } => {
                    if let Some(slot) = self.registry.slot_for_addr(&from) {
                        self.disconnect(slot, DisconnectReason::TransportClosed)?;
                    }
                }
            }
        }

        self.maintain()?;
        self.ping_clients()?;
        self.send_reliable()?;

        let snapshot = self.world.snapshot(self.tick);
        self.history.push(snapshot.clone());
        self.send_frames(&snapshot)?;

        self.announce();
        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    fn dispatch(&mut self, from: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        let slot = self.registry.slot_for_addr(&from);

        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                match slot {
                    Some(slot) => self.strike(slot, &err.to_string())?,
                    None => log::debug!("discarding {} bytes from {}: {}", bytes.len(), from, err),
                }
                return Ok(());
            }
        };

        log::debug!("<- {} from {}", packet.payload.kind(), from);
        match slot {
            Some(slot) => self.handle_client_packet(slot, packet.payload),
            None => self.handle_stranger_packet(from, packet.payload),
        }
    }

    fn handle_stranger_packet(
        &mut self,
        from: SocketAddr,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let Payload::Hello { name } = payload else {
            log::debug!("ignoring {} from unknown {}", payload.kind(), from);
            return Ok(());
        };

        if self.shutting_down {
            return self.refuse(from, RejectReason::ShuttingDown);
        }

        let slot = match self.registry.allocate(from) {
            Ok(slot) => slot,
            Err(NetError::CapacityExceeded) => return self.refuse(from, RejectReason::ServerFull),
            Err(err) => {
                log::warn!("could not allocate a slot for {}: {}", from, err);
                return Ok(());
            }
        };

        let tick = self.tick;
        let Some(client) = self.registry.get_mut(slot) else {
            return Ok(());
        };
        let challenge = self.handshake.begin(client, slot, &name, tick);
        let name = client.name.clone();
        log::info!("{} ({}) connecting in slot {}", name, from, slot);
        self.events.push_back(ServerEvent::ClientConnecting {
            slot,
            addr: from,
            name,
        });
        self.send_to_slot(slot, challenge)
    }

    fn refuse(&mut self, addr: SocketAddr, reason: RejectReason) -> Result<(), TransportError> {
        log::warn!("refusing connection from {}: {}", addr, reason);
        self.events.push_back(ServerEvent::ConnectionRejected {
            addr,
            reason: reason.to_string(),
        });
        transmit(
            &mut self.channel,
            addr,
            None,
            Payload::Refused {
                reason: reason.to_string(),
            },
        )
    }

    fn handle_client_packet(
        &mut self,
        slot: SlotIndex,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let now_ms = self.ctx.now_ms();
        let tick = self.tick;
        let state = self.registry.state_of(slot);

        match payload {
            Payload::Hello { .. } => {
                if state == ConnectionState::Connecting {
                    if let Some(client) = self.registry.get(slot) {
                        let challenge = self.handshake.challenge(client, slot);
                        return self.send_to_slot(slot, challenge);
                    }
                }
                Ok(())
            }
            Payload::HandshakeAck { token } => {
                let setup = self.game_setup(slot);
                let Some(client) = self.registry.get_mut(slot) else {
                    return Ok(());
                };
                match self
                    .handshake
                    .on_handshake_ack(client, token, setup, tick, now_ms)
                {
                    AckOutcome::Ignored => Ok(()),
                    AckOutcome::BadToken => self.strike(slot, "wrong challenge token"),
                    AckOutcome::Advanced(replies) => {
                        for reply in replies {
                            self.send_to_slot(slot, reply)?;
                        }
                        Ok(())
                    }
                }
            }
            Payload::SetupAck => {
                if let Some(client) = self.registry.get_mut(slot) {
                    self.handshake.on_setup_ack(client);
                }
                self.promote_if_ready(slot)
            }
            Payload::Pong { nonce, .. } => {
                if let Some(client) = self.registry.get_mut(slot) {
                    if let Some(rtt) = self.pinger.on_pong(client, nonce, now_ms) {
                        log::debug!("client {} rtt {} ms", client.id, rtt);
                        client.age_ticks = 0;
                    }
                }
                self.promote_if_ready(slot)
            }
            Payload::Ping { nonce, sent_ms } => {
                self.send_to_slot(slot, Payload::Pong { nonce, sent_ms })
            }
            Payload::DeltaAck { sequence } => {
                if let Some(client) = self.registry.get_mut(slot).filter(|c| c.is_ready()) {
                    if !self.frames.on_ack(client, sequence, now_ms) {
                        log::debug!("client {} sent stale ack {}", client.id, sequence);
                    }
                }
                Ok(())
            }
            Payload::Reliable { sequence, message } => {
                self.handle_reliable(slot, sequence, message)
            }
            Payload::ReliableAck { sequence } => {
                if let Some(client) = self.registry.get_mut(slot) {
                    if client.outgoing.on_ack(sequence) {
                        client.age_ticks = 0;
                    }
                }
                Ok(())
            }
            Payload::ReadyForData { ready } => {
                if let Some(client) = self.registry.get_mut(slot).filter(|c| c.is_ready()) {
                    log::info!(
                        "client {} {} game data",
                        client.id,
                        if ready { "resumed" } else { "paused" }
                    );
                    client.set_wants_game_data(ready);
                }
                Ok(())
            }
            Payload::ViewConsole { slot: target } => {
                let target = target as SlotIndex;
                let valid =
                    target == slot || self.registry.state_of(target) == ConnectionState::Ready;
                if let Some(client) = self.registry.get_mut(slot) {
                    if valid {
                        client.viewing_console = (target != slot).then_some(target);
                    } else {
                        log::debug!("client {} cannot view slot {}", client.id, target);
                    }
                }
                Ok(())
            }
            Payload::Goodbye { reason } => {
                log::debug!("slot {} said goodbye: {}", slot, reason);
                self.disconnect(slot, DisconnectReason::Graceful)
            }
            other => self.strike(slot, &format!("unexpected {} packet", other.kind())),
        }
    }

    fn handle_reliable(
        &mut self,
        slot: SlotIndex,
        sequence: u32,
        message: ReliableMessage,
    ) -> Result<(), TransportError> {
        let Some(client) = self.registry.get_mut(slot).filter(|c| c.is_ready()) else {
            return Ok(());
        };
        let deliver = client.incoming.accept(sequence);
        client.age_ticks = 0;
        let name = client.name.clone();
        self.send_to_slot(slot, Payload::ReliableAck { sequence })?;

        if !deliver {
            return Ok(());
        }

        match message {
            ReliableMessage::Chat { text, .. } => {
                let text: String = text.chars().take(MAX_CHAT_LEN).collect();
                log::info!("<{}> {}", name, text);
                for target in self.registry.ready_slots() {
                    if target == slot {
                        continue;
                    }
                    if let Some(peer) = self.registry.get_mut(target) {
                        peer.outgoing.push(ReliableMessage::Chat {
                            from: Some(slot as u8),
                            text: text.clone(),
                        });
                    }
                }
                self.events.push_back(ServerEvent::Chat { slot, name, text });
            }
            ReliableMessage::ConsoleText { .. } => {
                log::debug!("ignoring console text from slot {}", slot);
            }
        }
        Ok(())
    }

    fn promote_if_ready(&mut self, slot: SlotIndex) -> Result<(), TransportError> {
        let tick = self.tick;
        let Some(client) = self.registry.get_mut(slot) else {
            return Ok(());
        };
        if !self.handshake.try_ready(client) {
            return Ok(());
        }
        if let Some(record) = self.recorder.as_mut() {
            if let Some(sink) = record(slot, client, tick) {
                log::info!("recording demo for client {}", client.id);
                if let Some(mut previous) = client.attach_demo(sink) {
                    if let Err(err) = previous.close() {
                        log::warn!("closing replaced demo sink: {}", err);
                    }
                }
            }
        }
        let client_id = client.id;
        let name = client.name.clone();

        let spawn = Vec3::new(slot as f32 * 2.0, 0.0, 0.0);
        self.world.spawn_player(slot, spawn);

        let info = Payload::PlayerInfo(PlayerInfo {
            slot: slot as u8,
            name: name.clone(),
        });
        let ready = self.registry.ready_slots();
        for &target in &ready {
            self.send_to_slot(target, info.clone())?;
        }

        // The setup list is capped, so the newcomer also hears about everyone present.
        let present: Vec<Payload> = ready
            .iter()
            .filter(|&&other| other != slot)
            .filter_map(|&other| {
                self.registry.get(other).map(|c| {
                    Payload::PlayerInfo(PlayerInfo {
                        slot: other as u8,
                        name: c.name.clone(),
                    })
                })
            })
            .collect();
        for notice in present {
            self.send_to_slot(slot, notice)?;
        }

        self.events.push_back(ServerEvent::ClientReady {
            slot,
            client_id,
            name,
        });
        Ok(())
    }

    /// Counts a malformed packet against the slot, disconnecting past the limit.
    fn strike(&mut self, slot: SlotIndex, what: &str) -> Result<(), TransportError> {
        let limit = self.ctx.config().max_malformed;
        let Some(client) = self.registry.get_mut(slot) else {
            return Ok(());
        };
        client.malformed_count += 1;
        log::warn!(
            "malformed packet from client {} ({}/{}): {}",
            client.id,
            client.malformed_count,
            limit,
            what
        );
        if client.malformed_count > limit {
            return self.disconnect(slot, DisconnectReason::Malformed);
        }
        Ok(())
    }

    fn maintain(&mut self) -> Result<(), TransportError> {
        let tick = self.tick;
        let stale_after = self.ctx.config().stale_timeout_ticks;

        let mut actions = Vec::new();
        for (slot, client) in self.registry.iter_mut() {
            client.age_ticks = client.age_ticks.saturating_add(1);
            match self.handshake.maintain(client, tick) {
                Maintenance::Idle => {}
                action => actions.push((slot, action)),
            }
            if client.is_ready() && client.age_ticks > stale_after {
                actions.push((slot, Maintenance::TimedOut));
            }
        }

        for (slot, action) in actions {
            match action {
                Maintenance::ResendChallenge => {
                    if let Some(client) = self.registry.get(slot) {
                        let challenge = self.handshake.challenge(client, slot);
                        self.send_to_slot(slot, challenge)?;
                    }
                }
                Maintenance::ResendSetup => {
                    let setup = self.game_setup(slot);
                    self.send_to_slot(slot, Payload::Setup(setup))?;
                }
                Maintenance::TimedOut => {
                    let err = match self.registry.state_of(slot) {
                        ConnectionState::Ready => NetError::StaleConnection,
                        _ => NetError::HandshakeTimeout,
                    };
                    log::debug!("slot {}: {}", slot, err);
                    self.disconnect(slot, DisconnectReason::from(&err))?;
                }
                Maintenance::Idle => {}
            }
        }
        Ok(())
    }

    fn ping_clients(&mut self) -> Result<(), TransportError> {
        let tick = self.tick;
        let now_ms = self.ctx.now_ms();

        let mut pings = Vec::new();
        for (slot, client) in self.registry.iter_mut() {
            self.pinger.expire(client, now_ms);
            let ping = match client.state() {
                ConnectionState::Handshaking => self.handshake.ping(client, tick, now_ms),
                ConnectionState::Ready if self.pinger.is_due(client, tick) => {
                    self.pinger.send_ping(client, tick, now_ms)
                }
                _ => None,
            };
            if let Some(ping) = ping {
                pings.push((slot, ping));
            }
        }

        for (slot, ping) in pings {
            self.send_to_slot(slot, ping)?;
        }
        Ok(())
    }

    fn send_reliable(&mut self) -> Result<(), TransportError> {
        let tick = self.tick;
        let channel = &mut self.channel;
        let events = &mut self.events;

        self.registry.for_each_ready(|slot, client| {
            let poll = client.outgoing.poll(tick);
            for dropped in poll.dropped {
                log::warn!(
                    "gave up delivering message {} to client {} after {} attempts",
                    dropped.sequence,
                    client.id,
                    dropped.attempts()
                );
                events.push_back(ServerEvent::ReliableDropped {
                    slot,
                    client_id: client.id,
                    message: dropped.message,
                });
            }
            match poll.transmit {
                Some(payload) => transmit(&mut *channel, client.addr, Some(client), payload),
                None => Ok(()),
            }
        })
    }

    fn send_frames(&mut self, snapshot: &WorldSnapshot) -> Result<(), TransportError> {
        let tick = self.tick;
        let now_ms = self.ctx.now_ms();
        let channel = &mut self.channel;
        let world = &self.world;
        let history = &self.history;
        let frames = &self.frames;

        self.registry.for_each_ready(|slot, client| {
            let focus = world.player_entity(client.viewing_console.unwrap_or(slot));
            match frames.build(client, focus, snapshot, history, tick, now_ms) {
                Some(delta) => transmit(
                    &mut *channel,
                    client.addr,
                    Some(client),
                    Payload::StateDelta(delta),
                ),
                None => Ok(()),
            }
        })
    }

    fn announce(&mut self) {
        let tick = self.tick;
        let port = self.channel.local_addr().port();
        let registry = &self.registry;
        let ctx = &self.ctx;
        if let Some(announcer) = self.announcer.as_mut() {
            announcer.maybe_announce(tick, || build_server_info(ctx, registry, port, tick));
        }
    }

    fn game_setup(&self, slot: SlotIndex) -> GameSetup {
        let config = self.ctx.config();
        let mut setup = GameSetup {
            slot: slot as u8,
            client_id: self.registry.get(slot).map_or(0, |c| c.id),
            tick_rate: config.tick_rate,
            max_clients: self.registry.capacity() as u8,
            server_name: config.server_name.clone(),
            players: self
                .registry
                .iter()
                .filter(|(_, c)| c.is_ready())
                .take(MAX_SETUP_PLAYERS)
                .map(|(slot, c)| PlayerInfo {
                    slot: slot as u8,
                    name: c.name.clone(),
                })
                .collect(),
        };

        // Whoever does not fit is announced with a PlayerInfo once the client is ready.
        while !setup.players.is_empty()
            && Packet::from_server(Payload::Setup(setup.clone())).encode().is_err()
        {
            setup.players.pop();
        }
        setup
    }

    fn send_to_slot(&mut self, slot: SlotIndex, payload: Payload) -> Result<(), TransportError> {
        let Some(client) = self.registry.get_mut(slot) else {
            return Ok(());
        };
        let addr = client.addr;
        transmit(&mut self.channel, addr, Some(client), payload)
    }

    /// Tears a connection down: tells the client why (when appropriate),
    /// notifies the others and frees the slot.
    fn disconnect(
        &mut self,
        slot: SlotIndex,
        reason: DisconnectReason,
    ) -> Result<(), TransportError> {
        let Some(client) = self.registry.get_mut(slot) else {
            return Ok(());
        };
        let was_ready = client.is_ready();
        let addr = client.addr;
        client.begin_leaving();

        if reason.notify_client() {
            self.send_to_slot(
                slot,
                Payload::Goodbye {
                    reason: reason.to_string(),
                },
            )?;
        }

        let Some(client) = self.registry.free(slot) else {
            return Ok(());
        };
        self.world.despawn_owned_by(slot);
        for (_, other) in self.registry.iter_mut() {
            if other.viewing_console == Some(slot) {
                other.viewing_console = None;
            }
        }

        if reason == DisconnectReason::HandshakeTimeout {
            log::warn!("{} ({}) failed to complete the handshake", client.name, addr);
            self.events.push_back(ServerEvent::ConnectionRejected {
                addr,
                reason: reason.to_string(),
            });
            return Ok(());
        }

        log::info!("{} left slot {}: {}", client.name, slot, reason);
        if was_ready {
            let notice = Payload::PlayerLeft {
                slot: slot as u8,
                name: client.name.clone(),
            };
            for target in self.registry.ready_slots() {
                self.send_to_slot(target, notice.clone())?;
            }
        }
        self.events.push_back(ServerEvent::ClientLeft {
            slot,
            client_id: client.id,
            name: client.name,
            reason,
        });
        Ok(())
    }

    pub fn kick(&mut self, slot: SlotIndex, reason: &str) -> Result<(), NetError> {
        if self.registry.get(slot).is_none() {
            return Err(NetError::UnknownSlot(slot));
        }
        self.disconnect(slot, DisconnectReason::Kicked(reason.to_string()))?;
        Ok(())
    }

    /// Queues console text for reliable, ordered delivery to one client.
    pub fn send_console_text(&mut self, slot: SlotIndex, text: &str) -> Result<(), NetError> {
        let client = self
            .registry
            .get_mut(slot)
            .ok_or(NetError::UnknownSlot(slot))?;
        client.outgoing.push(ReliableMessage::ConsoleText {
            text: text.chars().take(MAX_CHAT_LEN).collect(),
        });
        Ok(())
    }

    /// Queues a server chat line for every READY client. Returns how many were addressed.
    pub fn broadcast_chat(&mut self, text: &str) -> usize {
        let text: String = text.chars().take(MAX_CHAT_LEN).collect();
        let mut addressed = 0;
        for (_, client) in self.registry.iter_mut().filter(|(_, c)| c.is_ready()) {
            client.outgoing.push(ReliableMessage::Chat {
                from: None,
                text: text.clone(),
            });
            addressed += 1;
        }
        addressed
    }

    /// Starts mirroring everything sent to `slot` into `sink`. A previously
    /// attached sink is closed.
    pub fn attach_demo(
        &mut self,
        slot: SlotIndex,
        sink: Box<dyn DemoSink>,
    ) -> Result<(), NetError> {
        let client = self
            .registry
            .get_mut(slot)
            .ok_or(NetError::UnknownSlot(slot))?;
        if let Some(mut previous) = client.attach_demo(sink) {
            if let Err(err) = previous.close() {
                log::warn!("closing replaced demo sink: {}", err);
            }
        }
        log::info!("recording demo for client {}", client.id);
        Ok(())
    }

    pub fn detach_demo(&mut self, slot: SlotIndex) -> Result<bool, NetError> {
        let client = self
            .registry
            .get_mut(slot)
            .ok_or(NetError::UnknownSlot(slot))?;
        let Some(mut sink) = client.detach_demo() else {
            return Ok(false);
        };
        if let Err(err) = sink.close() {
            log::warn!("closing demo sink for client {}: {}", client.id, err);
        }
        Ok(true)
    }

    /// Says goodbye to everyone and frees every slot. Later hellos are refused.
    pub fn shutdown(&mut self) -> Result<(), TransportError> {
        self.shutting_down = true;
        for slot in self.registry.occupied_slots() {
            self.disconnect(slot, DisconnectReason::ServerShutdown)?;
        }
        log::info!("server shut down at tick {}", self.tick);
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn server_info(&self) -> ServerInfo {
        build_server_info(
            &self.ctx,
            &self.registry,
            self.channel.local_addr().port(),
            self.tick,
        )
    }

    /// Publishes server metadata right away instead of waiting for the interval.
    pub fn announce_now(&mut self) -> bool {
        let info = self.server_info();
        self.announcer
            .as_mut()
            .is_some_and(|announcer| announcer.announce_now(&info))
    }

    pub fn client_summaries(&self) -> Vec<ClientSummary> {
        self.registry
            .iter()
            .map(|(slot, c)| ClientSummary {
                slot,
                client_id: c.id,
                name: c.name.clone(),
                addr: c.addr,
                state: c.state(),
                ping_ms: c.ping.average_ms(),
                ack_rtt_ms: c.acks.srtt_ms(),
                bandwidth: c.bandwidth.value(),
                pending_deltas: c.acks.pending_count(),
                age_ticks: c.age_ticks,
                connected_secs: c.enter_time().map_or(0, |t| t.elapsed().as_secs()),
                recording: c.has_demo(),
            })
            .collect()
    }
}

fn build_server_info(
    ctx: &NetworkContext,
    registry: &ClientRegistry,
    port: u16,
    tick: u32,
) -> ServerInfo {
    let config = ctx.config();
    let mut info = ServerInfo::new(config.server_name.clone(), port, registry.capacity());
    info.description = config.server_description.clone();
    info.players = registry
        .iter()
        .filter(|(_, c)| c.is_ready())
        .map(|(_, c)| c.name.clone())
        .collect();
    info.player_count = info.players.len();
    info.tick = tick;
    info
}

/// The single outbound path: encode once, send, and mirror the exact bytes
/// into the recipient's demo sink.
fn transmit<C: PacketChannel>(
    channel: &mut C,
    addr: SocketAddr,
    client: Option<&mut ClientConnection>,
    payload: Payload,
) -> Result<(), TransportError> {
    let kind = payload.kind();
    let bytes = match Packet::from_server(payload).encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("dropping outgoing {} for {}: {}", kind, addr, err);
            return Ok(());
        }
    };

    channel.send_to(addr, &bytes)?;
    log::debug!("-> {} to {} ({} bytes)", kind, addr, bytes.len());

    if let Some(client) = client {
        client.record_demo(&bytes);
    }
    Ok(())
}

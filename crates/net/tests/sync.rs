use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use tickwire::{
    AckTracker, BandwidthRater, BandwidthRating, ClientConnection, ClientEvent, ConnectionState,
    DemoSink,
    DisconnectReason, MasterAnnouncer, MemoryChannel, MemoryDirectory, MemoryNetwork, NetClient,
    NetConfig, NetServer, NetworkContext, Packet, PacketChannel, PacketHeader, Payload,
    PendingDelta, PingState, ServerEvent, SlotIndex, TransportError,
};
use tickwire::protocol::SERVER_SENDER;

struct Session {
    net: MemoryNetwork,
    server: NetServer<MemoryChannel>,
    clients: Vec<NetClient<MemoryChannel>>,
    config: NetConfig,
}

impl Session {
    fn new(config: NetConfig) -> Self {
        let net = MemoryNetwork::new();
        let server =
            NetServer::new(NetworkContext::server(config.clone()), net.channel()).unwrap();
        Self {
            net,
            server,
            clients: Vec::new(),
            config,
        }
    }

    fn join(&mut self, name: &str) -> usize {
        let mut client =
            NetClient::new(NetworkContext::client(self.config.clone()), self.net.channel())
                .unwrap();
        client.connect(self.server.local_addr(), name).unwrap();
        self.clients.push(client);
        self.clients.len() - 1
    }

    fn round(&mut self) {
        for client in &mut self.clients {
            client.tick().unwrap();
        }
        self.server.tick().unwrap();
    }

    /// One round in which only the listed clients run.
    fn round_only(&mut self, active: &[usize]) {
        for &i in active {
            self.clients[i].tick().unwrap();
        }
        self.server.tick().unwrap();
    }

    fn settle(&mut self) {
        for _ in 0..10 {
            if self.clients.iter().all(|c| c.is_ready()) {
                return;
            }
            self.round();
        }
        panic!("clients never became ready");
    }

    fn slot_of(&self, i: usize) -> SlotIndex {
        self.clients[i].slot().unwrap()
    }

    fn addr_of(&self, i: usize) -> SocketAddr {
        self.clients[i].local_addr()
    }

    fn server_events(&mut self) -> Vec<ServerEvent> {
        self.server.drain_events().collect()
    }

    fn client_events(&mut self, i: usize) -> Vec<ClientEvent> {
        self.clients[i].drain_events().collect()
    }

    fn payloads_to(&self, addr: SocketAddr) -> Vec<Payload> {
        self.net
            .sent_to(addr)
            .iter()
            .filter_map(|bytes| Packet::decode(bytes).ok())
            .map(|packet| packet.payload)
            .collect()
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    writes: Rc<RefCell<Vec<Vec<u8>>>>,
    closes: Rc<Cell<u32>>,
}

impl DemoSink for RecordingSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writes.borrow_mut().push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

fn is_delta(payload: &Payload) -> bool {
    matches!(payload, Payload::StateDelta(_))
}

#[test]
fn handshake_reaches_ready_with_a_single_ping() {
    let mut session = Session::new(NetConfig::default());
    session.join("alice");

    let mut rounds = 0;
    while session.server.registry().ready_count() == 0 {
        session.round();
        rounds += 1;
        assert!(rounds <= session.config.handshake_timeout_ticks);
    }

    assert_eq!(rounds, 3);
    assert_eq!(session.server.current_tick(), 3);

    let client = session.server.registry().get(0).unwrap();
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.ping.sent(), 1);
    assert!(client.ping.has_valid_sample());

    let events = session.server_events();
    assert!(matches!(events[0], ServerEvent::ClientConnecting { slot: 0, .. }));
    assert!(matches!(events[1], ServerEvent::ClientReady { slot: 0, .. }));

    session.round();
    assert!(session.clients[0].is_ready());
    assert!(session.clients[0].entities().count() > 0);
    assert!(
        session
            .client_events(0)
            .contains(&ClientEvent::Connected {
                slot: 0,
                client_id: 1,
                server_name: session.config.server_name.clone(),
            })
    );
}

#[test]
fn silent_client_goes_stale_while_acking_client_stays() {
    let mut session = Session::new(NetConfig::default());
    let acking = session.join("acking");
    let silent = session.join("silent");
    session.settle();
    let silent_slot = session.slot_of(silent);
    let acking_slot = session.slot_of(acking);
    session.server_events();

    for _ in 0..=session.config.stale_timeout_ticks {
        session.round_only(&[acking]);
    }

    assert!(session.server.registry().get(silent_slot).is_none());
    assert!(session.server_events().iter().any(|e| matches!(
        e,
        ServerEvent::ClientLeft { slot, reason: DisconnectReason::Stale, .. } if *slot == silent_slot
    )));

    let survivor = session.server.registry().get(acking_slot).unwrap();
    assert!(survivor.is_ready());
    assert!(survivor.acks.pending_count() <= 1);
    assert!(survivor.age_ticks <= 1);
}

#[test]
fn garbage_before_hello_does_not_prevent_handshake() {
    let mut session = Session::new(NetConfig::default());
    let client_channel = session.net.channel();
    let client_addr = client_channel.local_addr();
    let server_addr = session.server.local_addr();

    for garbage in [&[0u8; 3][..], &[0xAB; 40][..], b"GET / HTTP/1.1\r\n\r\n"] {
        session.net.inject(client_addr, server_addr, garbage);
    }

    let mut client =
        NetClient::new(NetworkContext::client(NetConfig::default()), client_channel).unwrap();
    client.connect(server_addr, "bob").unwrap();
    session.clients.push(client);
    session.settle();

    assert_eq!(session.server.registry().ready_count(), 1);
    assert_eq!(
        session
            .server
            .registry()
            .get(session.slot_of(0))
            .unwrap()
            .malformed_count,
        0
    );
}

#[test]
fn malformed_packets_from_a_client_escalate_to_disconnect() {
    let config = NetConfig {
        max_malformed: 3,
        ..Default::default()
    };
    let mut session = Session::new(config);
    let victim = session.join("noisy");
    let bystander = session.join("calm");
    session.settle();
    let slot = session.slot_of(victim);
    let (from, to) = (session.addr_of(victim), session.server.local_addr());

    for _ in 0..3 {
        session.net.inject(from, to, &[0xEE; 32]);
    }
    session.round();
    assert_eq!(
        session.server.registry().get(slot).unwrap().malformed_count,
        3
    );

    session.net.inject(from, to, &[0xEE; 32]);
    session.round();
    assert!(session.server.registry().get(slot).is_none());
    assert!(session.server.registry().get(session.slot_of(bystander)).is_some());

    session.round();
    assert!(session.client_events(victim).contains(&ClientEvent::Disconnected {
        reason: DisconnectReason::Malformed.to_string(),
    }));
    assert!(session.client_events(bystander).iter().any(|e| matches!(
        e,
        ClientEvent::PlayerLeft { name, .. } if name == "noisy"
    )));
}

#[test]
fn demo_sink_sees_exactly_the_wire_bytes() {
    let mut session = Session::new(NetConfig::default());
    session.join("recorded");
    session.settle();
    session.round();

    let sink = RecordingSink::default();
    let slot = session.slot_of(0);
    session
        .server
        .attach_demo(slot, Box::new(sink.clone()))
        .unwrap();
    session.net.clear_log();

    for _ in 0..10 {
        session.round();
    }

    let wire = session.net.sent_to(session.addr_of(0));
    let recorded = sink.writes.borrow().clone();
    assert_eq!(recorded.len(), 10);
    assert_eq!(recorded, wire);
    assert!(session.payloads_to(session.addr_of(0)).iter().all(is_delta));
    assert_eq!(sink.closes.get(), 0);
}

#[test]
fn recorded_demo_starts_with_a_full_snapshot() {
    let mut session = Session::new(NetConfig::default());
    let sink = RecordingSink::default();
    let recorder = sink.clone();
    session.server.set_demo_recorder(Box::new(
        move |_: SlotIndex, _: &ClientConnection, _: u32| {
            Some(Box::new(recorder.clone()) as Box<dyn DemoSink>)
        },
    ));

    session.join("recorded");
    session.settle();
    for _ in 0..3 {
        session.round();
    }

    let deltas: Vec<_> = sink
        .writes
        .borrow()
        .iter()
        .filter_map(|bytes| match Packet::decode(bytes).ok()?.payload {
            Payload::StateDelta(delta) => Some(delta),
            _ => None,
        })
        .collect();
    assert!(deltas.len() > 1);
    assert_eq!(deltas[0].base_tick, None);

    let first_on_wire = session
        .payloads_to(session.addr_of(0))
        .into_iter()
        .find_map(|p| match p {
            Payload::StateDelta(delta) => Some(delta),
            _ => None,
        })
        .unwrap();
    assert_eq!(deltas[0], first_on_wire);
}

#[test]
fn setup_still_fits_with_multibyte_names() {
    let mut session = Session::new(NetConfig {
        max_clients: 17,
        ..Default::default()
    });
    let wide = "\u{1F680}".repeat(24);
    for _ in 0..16 {
        session.join(&wide);
    }
    session.settle();
    assert_eq!(session.server.registry().ready_count(), 16);

    let newcomer = session.join(&wide);
    session.settle();
    session.round();
    assert!(session.clients[newcomer].is_ready());
    assert_eq!(session.clients[newcomer].players().len(), 17);
    assert!(
        !session
            .server_events()
            .iter()
            .any(|e| matches!(e, ServerEvent::ConnectionRejected { .. }))
    );
}

#[test]
fn ack_round_trip_is_reported_per_client() {
    let mut session = Session::new(NetConfig::default());
    session.join("measured");
    session.round();
    assert_eq!(session.server.client_summaries()[0].ack_rtt_ms, None);

    session.settle();
    for _ in 0..3 {
        session.round();
    }
    assert!(session.server.client_summaries()[0].ack_rtt_ms.is_some());
}

#[test]
fn cumulative_acks_keep_the_maximum() {
    let mut seed = 0x2545_F491_u32;
    for _ in 0..20 {
        let mut tracker = AckTracker::new(64);
        for _ in 0..20 {
            let sequence = tracker.next_sequence();
            tracker.track(PendingDelta {
                sequence,
                sent_ms: 0,
                snapshot_tick: sequence,
                complete: true,
                size: 1,
            });
        }

        let mut max = 0;
        for _ in 0..15 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let ack = (seed >> 16) % 20 + 1;
            tracker.on_ack(ack, 10);
            max = max.max(ack);
        }

        assert_eq!(tracker.last_acked(), Some(max));
        assert!(tracker.pending().all(|p| p.sequence > max));
        assert_eq!(tracker.pending_count(), (20 - max) as usize);
    }
}

#[test]
fn recycled_slot_starts_from_scratch() {
    let mut session = Session::new(NetConfig {
        max_clients: 1,
        ..Default::default()
    });
    let first = session.join("first");
    session.settle();
    let slot = session.slot_of(first);
    let old_id = session.server.registry().get(slot).unwrap().id;

    session.clients[first].disconnect().unwrap();
    session.server.tick().unwrap();
    assert!(session.server.registry().get(slot).is_none());

    let second = session.join("second");
    session.round_only(&[second]);

    let fresh = session.server.registry().get(slot).unwrap();
    assert_eq!(fresh.name, "second");
    assert!(fresh.id > old_id);
    assert_eq!(fresh.ping.sent(), 0);
    assert_eq!(fresh.ping.total(), 0);
    assert_eq!(fresh.acks.pending_count(), 0);
    assert!(!fresh.has_demo());
}

#[test]
fn no_deltas_reach_a_client_before_ready() {
    let mut session = Session::new(NetConfig::default());
    session.join("early");
    session.settle();

    let late = session.join("late");
    let late_addr = session.addr_of(late);
    for _ in 0..6 {
        session.net.clear_log();
        let was_ready = session
            .server
            .registry()
            .slot_for_addr(&late_addr)
            .is_some_and(|slot| session.server.registry().state_of(slot) == ConnectionState::Ready);
        session.round();
        let ready = session
            .server
            .registry()
            .slot_for_addr(&late_addr)
            .is_some_and(|slot| session.server.registry().state_of(slot) == ConnectionState::Ready);

        if !was_ready && !ready {
            assert!(!session.payloads_to(late_addr).iter().any(is_delta));
        }
    }
    assert!(session.clients[late].is_ready());
}

#[test]
fn paused_client_receives_no_game_data() {
    let mut session = Session::new(NetConfig::default());
    session.join("pauser");
    session.settle();

    session.clients[0].set_ready_for_data(false).unwrap();
    session.round();
    session.net.clear_log();
    for _ in 0..5 {
        session.round();
    }
    assert!(!session.payloads_to(session.addr_of(0)).iter().any(is_delta));

    session.clients[0].set_ready_for_data(true).unwrap();
    session.round();
    assert!(session.payloads_to(session.addr_of(0)).iter().any(is_delta));
}

#[test]
fn better_round_trips_never_rate_worse() {
    let window = |rtt: u32| {
        let mut ping = PingState::new();
        for jitter in 0..4 {
            ping.record(rtt + jitter, 1000);
        }
        ping.record(5000, 1000);
        ping
    };

    let rater = BandwidthRater;
    let mut previous = BandwidthRating::MAX;
    for rtt in (0..1200).step_by(7) {
        let rating = rater.update(BandwidthRating::DEFAULT, &window(rtt));
        assert!(rating <= previous, "rating improved at {} ms", rtt);
        previous = rating;
    }
}

#[test]
fn stale_connection_is_freed_next_tick_and_sink_closed_once() {
    let mut session = Session::new(NetConfig::default());
    session.join("doomed");
    session.settle();
    let slot = session.slot_of(0);

    let sink = RecordingSink::default();
    session
        .server
        .attach_demo(slot, Box::new(sink.clone()))
        .unwrap();
    let stale_after = session.config.stale_timeout_ticks;
    session
        .server
        .registry_mut()
        .get_mut(slot)
        .unwrap()
        .age_ticks = stale_after + 1;
    session.server_events();

    session.server.tick().unwrap();
    assert!(session.server.registry().get(slot).is_none());
    assert_eq!(sink.closes.get(), 1);

    for _ in 0..5 {
        session.server.tick().unwrap();
    }
    assert_eq!(sink.closes.get(), 1);
    assert!(session.server_events().iter().any(|e| matches!(
        e,
        ServerEvent::ClientLeft {
            reason: DisconnectReason::Stale,
            ..
        }
    )));

    let goodbye = sink.writes.borrow().last().cloned().unwrap();
    assert!(matches!(
        Packet::decode(&goodbye).unwrap().payload,
        Payload::Goodbye { .. }
    ));
}

#[test]
fn chat_is_relayed_to_other_players_in_order() {
    let mut session = Session::new(NetConfig::default());
    let alice = session.join("alice");
    let bob = session.join("bob");
    session.settle();
    session.round();
    session.client_events(bob);

    session.clients[alice].say("first");
    session.clients[alice].say("second");
    for _ in 0..6 {
        session.round();
    }

    let lines: Vec<String> = session
        .client_events(bob)
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::Chat { name, text, .. } if name == "alice" => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    assert!(
        !session
            .client_events(alice)
            .iter()
            .any(|e| matches!(e, ClientEvent::Chat { .. }))
    );
    assert_eq!(
        session
            .server_events()
            .iter()
            .filter(|e| matches!(e, ServerEvent::Chat { .. }))
            .count(),
        2
    );
}

#[test]
fn server_broadcast_and_console_text_arrive() {
    let mut session = Session::new(NetConfig::default());
    session.join("reader");
    session.settle();

    assert_eq!(session.server.broadcast_chat("welcome"), 1);
    session
        .server
        .send_console_text(session.slot_of(0), "motd")
        .unwrap();
    for _ in 0..6 {
        session.round();
    }

    let events = session.client_events(0);
    assert!(events.contains(&ClientEvent::Chat {
        from: None,
        name: "server".into(),
        text: "welcome".into(),
    }));
    assert!(events.contains(&ClientEvent::ConsoleText {
        text: "motd".into()
    }));
}

#[test]
fn spectator_receives_viewed_player_first() {
    let mut session = Session::new(NetConfig::default());
    let viewer = session.join("viewer");
    session.settle();
    let player = session.join("player");
    session.settle();
    let player_slot = session.slot_of(player);

    session.clients[viewer].spectate(player_slot).unwrap();
    session.round();
    for step in 1..4 {
        for entity in session.server.world_mut().entities_mut() {
            entity.position.x += step as f32;
        }
        session.net.clear_log();
        session.round();
    }

    let viewed = session.server.world().player_entity(player_slot).unwrap();
    let last_delta = session
        .payloads_to(session.addr_of(viewer))
        .into_iter()
        .rev()
        .find_map(|p| match p {
            Payload::StateDelta(delta) => Some(delta),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_delta.entities.len(), 2);
    assert_eq!(last_delta.entities[0].entity_id, viewed);
}

#[test]
fn spectator_is_reset_when_the_viewed_slot_is_freed() {
    let mut session = Session::new(NetConfig::default());
    let viewer = session.join("viewer");
    let player = session.join("player");
    session.settle();
    let viewer_slot = session.slot_of(viewer);
    let player_slot = session.slot_of(player);

    session.clients[viewer].spectate(player_slot).unwrap();
    session.round();
    let viewing = |s: &Session| {
        s.server
            .registry()
            .get(viewer_slot)
            .and_then(|c| c.viewing_console)
    };
    assert_eq!(viewing(&session), Some(player_slot));

    session.clients[player].disconnect().unwrap();
    session.clients.remove(player);
    session.round();
    assert_eq!(viewing(&session), None);

    let stranger = session.join("stranger");
    session.settle();
    assert_eq!(session.slot_of(stranger), player_slot);
    assert_eq!(viewing(&session), None);
}

#[test]
fn full_server_refuses_with_reason() {
    let mut session = Session::new(NetConfig {
        max_clients: 1,
        ..Default::default()
    });
    session.join("inside");
    session.settle();
    let outside = session.join("outside");
    session.round();
    session.round();

    assert!(session.client_events(outside).contains(&ClientEvent::Refused {
        reason: "server full".into()
    }));
    assert!(session.server_events().iter().any(|e| matches!(
        e,
        ServerEvent::ConnectionRejected { reason, .. } if reason == "server full"
    )));
    assert_eq!(session.server.registry().occupied_count(), 1);
}

#[test]
fn abandoned_handshake_times_out() {
    let config = NetConfig {
        handshake_timeout_ticks: 20,
        ..Default::default()
    };
    let mut session = Session::new(config);
    let mut raw = session.net.channel();
    let hello = Packet::new(
        PacketHeader::new(SERVER_SENDER),
        Payload::Hello {
            name: "ghost".into(),
        },
    );
    raw.send_to(session.server.local_addr(), &hello.encode().unwrap())
        .unwrap();

    for _ in 0..22 {
        session.server.tick().unwrap();
    }

    assert_eq!(session.server.registry().occupied_count(), 0);
    assert!(session.server_events().iter().any(|e| matches!(
        e,
        ServerEvent::ConnectionRejected { reason, .. } if reason == "handshake timed out"
    )));
    let challenges = session
        .payloads_to(raw.local_addr())
        .iter()
        .filter(|p| matches!(p, Payload::Challenge { .. }))
        .count();
    assert!(challenges >= 1);
}

#[test]
fn kicked_client_is_told_why() {
    let mut session = Session::new(NetConfig::default());
    session.join("rowdy");
    session.settle();

    session.server.kick(session.slot_of(0), "spamming").unwrap();
    session.round();

    assert!(session.client_events(0).contains(&ClientEvent::Disconnected {
        reason: "kicked: spamming".into()
    }));
    assert!(session.server.kick(0, "again").is_err());
}

#[test]
fn shutdown_says_goodbye_and_refuses_newcomers() {
    let mut session = Session::new(NetConfig::default());
    session.join("one");
    session.join("two");
    session.settle();

    session.server.shutdown().unwrap();
    assert_eq!(session.server.registry().occupied_count(), 0);

    session.round();
    for i in 0..2 {
        assert!(session.client_events(i).contains(&ClientEvent::Disconnected {
            reason: DisconnectReason::ServerShutdown.to_string(),
        }));
    }

    let late = session.join("late");
    session.round();
    session.round();
    assert!(session.client_events(late).contains(&ClientEvent::Refused {
        reason: "server is shutting down".into()
    }));
}

#[test]
fn graceful_goodbye_notifies_remaining_players() {
    let mut session = Session::new(NetConfig::default());
    let leaver = session.join("leaver");
    let stayer = session.join("stayer");
    session.settle();
    session.round();
    session.client_events(stayer);

    session.clients[leaver].disconnect().unwrap();
    session.round();
    session.round();

    assert_eq!(session.server.registry().occupied_count(), 1);
    assert!(session.server_events().iter().any(|e| matches!(
        e,
        ServerEvent::ClientLeft {
            reason: DisconnectReason::Graceful,
            ..
        }
    )));
    assert!(session.client_events(stayer).iter().any(|e| matches!(
        e,
        ClientEvent::PlayerLeft { name, .. } if name == "leaver"
    )));
}

#[test]
fn transport_disconnect_frees_the_slot() {
    let mut session = Session::new(NetConfig::default());
    session.join("flaky");
    session.settle();

    session
        .net
        .disconnect(session.addr_of(0), session.server.local_addr());
    session.server.tick().unwrap();

    assert_eq!(session.server.registry().occupied_count(), 0);
    assert!(session.server_events().iter().any(|e| matches!(
        e,
        ServerEvent::ClientLeft {
            reason: DisconnectReason::TransportClosed,
            ..
        }
    )));
}

#[test]
fn transport_failure_is_surfaced_to_the_caller() {
    let mut session = Session::new(NetConfig::default());
    session.net.fail(session.server.local_addr());

    assert!(matches!(
        session.server.tick(),
        Err(TransportError::Closed)
    ));
}

#[test]
fn disabled_networking_makes_tick_a_no_op() {
    let mut session = Session::new(NetConfig::default());
    session.server.context_mut().set_net_enabled(false);
    session.join("ignored");

    for _ in 0..5 {
        session.round();
    }

    assert_eq!(session.server.current_tick(), 0);
    assert_eq!(session.server.registry().occupied_count(), 0);
}

#[test]
fn announcer_publishes_population() {
    let mut session = Session::new(NetConfig {
        announce_interval_ticks: 5,
        server_name: "listed".into(),
        ..Default::default()
    });
    let directory = MemoryDirectory::new();
    session
        .server
        .set_announcer(MasterAnnouncer::new(Box::new(directory.clone()), 5));
    session.join("visible");
    session.settle();

    for _ in 0..5 {
        session.round();
    }

    let info = directory.latest("listed").unwrap();
    assert_eq!(info.player_count, 1);
    assert_eq!(info.players, vec!["visible".to_string()]);
    assert_eq!(info.max_players, session.config.max_clients);
    assert!(directory.announcements() >= 2);
}

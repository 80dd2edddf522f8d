use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tickwire::{
    ClientEvent, LinkConditions, NetClient, NetConfig, NetServer, NetworkContext, PacketChannel,
    ServerEvent, SimulatedChannel, UdpChannel,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn bind(port: u16) -> UdpChannel {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    UdpChannel::bind(addr).unwrap()
}

/// Ticks both ends until `done` holds or the timeout passes.
fn run_until<S: PacketChannel, C: PacketChannel>(
    server: &mut NetServer<S>,
    client: &mut NetClient<C>,
    timeout_ms: u64,
    mut done: impl FnMut(&mut NetServer<S>, &NetClient<C>) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        client.tick().unwrap();
        server.tick().unwrap();
        if done(server, client) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn handshake_over_loopback() {
    let port = next_port();
    let mut server =
        NetServer::new(NetworkContext::server(NetConfig::default()), bind(port)).unwrap();
    let mut client =
        NetClient::new(NetworkContext::client(NetConfig::default()), bind(port + 1)).unwrap();

    client.connect(server.local_addr(), "loopback").unwrap();
    let ready = run_until(&mut server, &mut client, 2000, |s, c| {
        s.registry().ready_count() == 1 && c.is_ready() && c.last_applied().is_some()
    });

    assert!(ready, "handshake did not finish over UDP");
    assert_eq!(client.slot(), Some(0));
    assert!(client.entities().count() >= 1);
    assert!(server.channel().stats().packets_sent > 0);
}

#[test]
fn chat_and_goodbye_over_loopback() {
    let port = next_port();
    let mut server =
        NetServer::new(NetworkContext::server(NetConfig::default()), bind(port)).unwrap();
    let mut client =
        NetClient::new(NetworkContext::client(NetConfig::default()), bind(port + 1)).unwrap();

    client.connect(server.local_addr(), "talker").unwrap();
    assert!(run_until(&mut server, &mut client, 2000, |s, _| {
        s.registry().ready_count() == 1
    }));

    client.say("over the wire");
    let mut heard = Vec::new();
    assert!(run_until(&mut server, &mut client, 2000, |s, _| {
        heard.extend(s.drain_events());
        heard.iter().any(|e| matches!(e, ServerEvent::Chat { .. }))
    }));
    assert!(heard.iter().any(|e| matches!(
        e,
        ServerEvent::Chat { name, text, .. } if name == "talker" && text == "over the wire"
    )));

    client.disconnect().unwrap();
    assert!(run_until(&mut server, &mut client, 2000, |s, _| {
        s.registry().occupied_count() == 0
    }));
    assert!(
        client
            .drain_events()
            .any(|e| e == ClientEvent::Disconnected {
                reason: "disconnected".into()
            })
    );
}

#[test]
fn handshake_survives_simulated_latency() {
    let port = next_port();
    let slow = LinkConditions {
        enabled: true,
        min_latency_ms: 5,
        max_latency_ms: 15,
        jitter_ms: 5,
        ..Default::default()
    };
    let mut server = NetServer::new(
        NetworkContext::server(NetConfig::default()),
        SimulatedChannel::new(bind(port), slow),
    )
    .unwrap();
    let mut client =
        NetClient::new(NetworkContext::client(NetConfig::default()), bind(port + 1)).unwrap();

    client.connect(server.local_addr(), "laggy").unwrap();
    assert!(run_until(&mut server, &mut client, 3000, |s, c| {
        s.registry().ready_count() == 1 && c.is_ready()
    }));

    let summary = &server.client_summaries()[0];
    assert_eq!(summary.name, "laggy");
    assert!(summary.ping_ms.is_some());
}

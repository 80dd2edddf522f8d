use crate::context::NetConfig;
use crate::ping::Pinger;
use crate::protocol::{GameSetup, Payload};
use crate::registry::{ClientConnection, SlotIndex};
use crate::stats::rand_u64;

/// Limit in encoded bytes, not chars.
const MAX_NAME_BYTES: usize = 24;
const DEFAULT_NAME: &str = "player";

/// Outcome of a handshake acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Duplicate or late ack; nothing to do.
    Ignored,
    /// Token does not match the challenge.
    BadToken,
    /// Handshake advanced; transmit these in order.
    Advanced(Vec<Payload>),
}

/// What per-tick maintenance wants done for a connection still in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maintenance {
    Idle,
    ResendChallenge,
    ResendSetup,
    TimedOut,
}

/// Drives a connection from hello to READY.
///
/// `CONNECTING` (challenge sent) -> `HANDSHAKING` (ack received, pinging,
/// setup sent) -> `READY` (setup acknowledged and one ping sample in).
#[derive(Debug, Clone)]
pub struct HandshakeSequencer {
    timeout_ticks: u32,
    resend_ticks: u32,
    pinger: Pinger,
}

impl HandshakeSequencer {
    pub fn new(config: &NetConfig) -> Self {
        Self {
            timeout_ticks: config.handshake_timeout_ticks,
            resend_ticks: config.handshake_resend_ticks.max(1),
            pinger: Pinger::new(config.handshake_resend_ticks.max(1), config.ping_timeout_ms),
        }
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    /// Starts the handshake for a freshly allocated slot and returns the challenge.
    pub fn begin(
        &self,
        client: &mut ClientConnection,
        slot: SlotIndex,
        name: &str,
        tick: u32,
    ) -> Payload {
        client.name = sanitize_name(name);
        client.challenge_token = rand_u64();
        client.last_handshake_send = tick;
        self.challenge(client, slot)
    }

    pub fn challenge(&self, client: &ClientConnection, slot: SlotIndex) -> Payload {
        Payload::Challenge {
            slot: slot as u8,
            client_id: client.id,
            token: client.challenge_token,
        }
    }

    pub fn on_handshake_ack(
        &self,
        client: &mut ClientConnection,
        token: u64,
        setup: GameSetup,
        tick: u32,
        now_ms: u64,
    ) -> AckOutcome {
        if !client.handshake_pending() {
            return AckOutcome::Ignored;
        }
        if token != client.challenge_token {
            return AckOutcome::BadToken;
        }

        client.begin_handshake();
        client.age_ticks = 0;
        client.last_handshake_send = tick;
        log::debug!("client {} acknowledged the challenge", client.id);

        let mut replies = Vec::with_capacity(2);
        if let Some(ping) = self.pinger.send_ping(client, tick, now_ms) {
            replies.push(ping);
        }
        replies.push(Payload::Setup(setup));
        AckOutcome::Advanced(replies)
    }

    /// Returns true if the setup ack was new.
    pub fn on_setup_ack(&self, client: &mut ClientConnection) -> bool {
        let accepted = client.acknowledge_setup();
        if accepted {
            client.age_ticks = 0;
        }
        accepted
    }

    /// Promotes the client to READY if every condition is met.
    pub fn try_ready(&self, client: &mut ClientConnection) -> bool {
        if !client.try_become_ready() {
            return false;
        }
        log::info!(
            "client {} ({}) is ready after {} ticks, bandwidth rating {}",
            client.id,
            client.name,
            client.handshake_ticks,
            client.bandwidth.value()
        );
        true
    }

    /// Handshake-phase pinging, faster than the in-game cadence.
    pub fn ping(&self, client: &mut ClientConnection, tick: u32, now_ms: u64) -> Option<Payload> {
        if client.state() != crate::registry::ConnectionState::Handshaking
            || !self.pinger.is_due(client, tick)
        {
            return None;
        }
        self.pinger.send_ping(client, tick, now_ms)
    }

    /// Advances handshake timers by one tick.
    pub fn maintain(&self, client: &mut ClientConnection, tick: u32) -> Maintenance {
        if !client.in_handshake() {
            return Maintenance::Idle;
        }

        client.handshake_ticks += 1;
        if client.handshake_ticks > self.timeout_ticks {
            return Maintenance::TimedOut;
        }

        if tick.wrapping_sub(client.last_handshake_send) < self.resend_ticks {
            return Maintenance::Idle;
        }

        if client.handshake_pending() {
            client.last_handshake_send = tick;
            Maintenance::ResendChallenge
        } else if !client.setup_acked() {
            client.last_handshake_send = tick;
            Maintenance::ResendSetup
        } else {
            Maintenance::Idle
        }
    }
}

fn sanitize_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(MAX_NAME_BYTES);
    for c in name.chars().filter(|c| !c.is_control()) {
        if cleaned.len() + c.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        cleaned.push(c);
    }
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> GameSetup {
        GameSetup {
            slot: 0,
            client_id: 1,
            tick_rate: 35,
            max_clients: 4,
            server_name: "test".into(),
            players: Vec::new(),
        }
    }

    fn connecting(sequencer: &HandshakeSequencer) -> ClientConnection {
        let mut client = ClientConnection::new(7, "127.0.0.1:6000".parse().unwrap());
        sequencer.begin(&mut client, 0, "alice", 0);
        client
    }

    fn token(client: &ClientConnection) -> u64 {
        client.challenge_token
    }

    #[test]
    fn challenge_carries_slot_and_id() {
        let sequencer = HandshakeSequencer::new(&NetConfig::default());
        let mut client = ClientConnection::new(7, "127.0.0.1:6000".parse().unwrap());

        let Payload::Challenge { slot, client_id, .. } = sequencer.begin(&mut client, 3, "", 0)
        else {
            panic!("expected challenge");
        };
        assert_eq!((slot, client_id), (3, 7));
        assert_eq!(client.name, DEFAULT_NAME);
    }

    #[test]
    fn ack_starts_pinging_and_sends_setup() {
        let sequencer = HandshakeSequencer::new(&NetConfig::default());
        let mut client = connecting(&sequencer);
        let token = token(&client);

        let AckOutcome::Advanced(replies) =
            sequencer.on_handshake_ack(&mut client, token, setup(), 1, 100)
        else {
            panic!("handshake should advance");
        };
        assert!(matches!(replies[0], Payload::Ping { .. }));
        assert!(matches!(replies[1], Payload::Setup(_)));
        assert_eq!(client.ping.sent(), 1);
        assert!(!client.handshake_pending());

        assert_eq!(
            sequencer.on_handshake_ack(&mut client, token, setup(), 2, 120),
            AckOutcome::Ignored
        );
    }

    #[test]
    fn wrong_token_is_reported() {
        let sequencer = HandshakeSequencer::new(&NetConfig::default());
        let mut client = connecting(&sequencer);
        let bad = token(&client).wrapping_add(1);

        assert_eq!(
            sequencer.on_handshake_ack(&mut client, bad, setup(), 1, 0),
            AckOutcome::BadToken
        );
        assert!(client.handshake_pending());
    }

    #[test]
    fn ready_needs_setup_ack_and_a_ping_sample() {
        let sequencer = HandshakeSequencer::new(&NetConfig::default());
        let mut client = connecting(&sequencer);
        let token = token(&client);
        sequencer.on_handshake_ack(&mut client, token, setup(), 1, 0);

        assert!(sequencer.on_setup_ack(&mut client));
        assert!(!sequencer.on_setup_ack(&mut client));
        assert!(!sequencer.try_ready(&mut client));

        client.ping.record(15, 1000);
        assert!(sequencer.try_ready(&mut client));
    }

    #[test]
    fn challenge_is_resent_then_times_out() {
        let config = NetConfig {
            handshake_timeout_ticks: 10,
            handshake_resend_ticks: 4,
            ..Default::default()
        };
        let sequencer = HandshakeSequencer::new(&config);
        let mut client = connecting(&sequencer);

        let mut resends = 0;
        let mut outcome = Maintenance::Idle;
        for tick in 1..=11 {
            outcome = sequencer.maintain(&mut client, tick);
            if outcome == Maintenance::ResendChallenge {
                resends += 1;
            }
        }

        assert_eq!(resends, 2);
        assert_eq!(outcome, Maintenance::TimedOut);
    }

    #[test]
    fn names_are_cleaned_up() {
        assert_eq!(sanitize_name("  bob\n "), "bob");
        assert_eq!(sanitize_name(&"x".repeat(100)).len(), MAX_NAME_BYTES);
    }

    #[test]
    fn multibyte_names_are_cut_on_a_char_boundary() {
        let name = sanitize_name(&"\u{1F680}".repeat(24));
        assert_eq!(name.len(), MAX_NAME_BYTES);
        assert_eq!(name.chars().count(), MAX_NAME_BYTES / 4);

        let mixed = sanitize_name(&format!("ab{}", "\u{e9}".repeat(30)));
        assert!(mixed.len() <= MAX_NAME_BYTES);
        assert!(mixed.starts_with("ab\u{e9}"));
    }
}

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u16 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5457_4952;
pub const DEFAULT_PORT: u16 = 13209;
pub const DEFAULT_TICK_RATE: u32 = 35;

/// Longest chat or console line, in chars; longer text is cut.
pub const MAX_CHAT_LEN: usize = 200;

/// Sender byte used by the server and by clients without a slot; clients
/// otherwise use their slot index.
pub const SERVER_SENDER: u8 = 0xFF;

const MIN_PACKET_SIZE: usize = 8;
const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

fn normalize_angle(angle: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut normalized = angle % two_pi;
    if normalized > std::f32::consts::PI {
        normalized -= two_pi;
    } else if normalized < -std::f32::consts::PI {
        normalized += two_pi;
    }
    normalized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u16,
    pub sender: u8,
}

impl PacketHeader {
    pub fn new(sender: u8) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sender,
        }
    }

    pub fn server() -> Self {
        Self::new(SERVER_SENDER)
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Payload {
    Hello {
        name: String,
    },
    Challenge {
        slot: u8,
        client_id: u32,
        token: u64,
    },
    HandshakeAck {
        token: u64,
    },
    Refused {
        reason: String,
    },
    Setup(GameSetup),
    SetupAck,
    ReadyForData {
        ready: bool,
    },
    Ping {
        nonce: u32,
        sent_ms: u64,
    },
    Pong {
        nonce: u32,
        sent_ms: u64,
    },
    StateDelta(StateDelta),
    DeltaAck {
        sequence: u32,
    },
    Reliable {
        sequence: u32,
        message: ReliableMessage,
    },
    ReliableAck {
        sequence: u32,
    },
    PlayerInfo(PlayerInfo),
    PlayerLeft {
        slot: u8,
        name: String,
    },
    ViewConsole {
        slot: u8,
    },
    Goodbye {
        reason: String,
    },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Challenge { .. } => "challenge",
            Self::HandshakeAck { .. } => "handshake-ack",
            Self::Refused { .. } => "refused",
            Self::Setup(_) => "setup",
            Self::SetupAck => "setup-ack",
            Self::ReadyForData { .. } => "ready-for-data",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::StateDelta(_) => "state-delta",
            Self::DeltaAck { .. } => "delta-ack",
            Self::Reliable { .. } => "reliable",
            Self::ReliableAck { .. } => "reliable-ack",
            Self::PlayerInfo(_) => "player-info",
            Self::PlayerLeft { .. } => "player-left",
            Self::ViewConsole { .. } => "view-console",
            Self::Goodbye { .. } => "goodbye",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInfo {
    pub slot: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct GameSetup {
    pub slot: u8,
    pub client_id: u32,
    pub tick_rate: u32,
    pub max_clients: u8,
    pub server_name: String,
    pub players: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ReliableMessage {
    Chat { from: Option<u8>, text: String },
    ConsoleText { text: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityState {
    pub entity_id: u32,
    pub kind: u8,
    pub owner: Option<u8>,
    pub position: [f32; 3],
    pub velocity: [i16; 3],
    pub yaw: i16,
    pub flags: u16,
}

impl EntityState {
    pub const MAX_VELOCITY: f32 = 327.67;

    pub fn new(entity_id: u32, kind: u8) -> Self {
        Self {
            entity_id,
            kind,
            ..Default::default()
        }
    }

    pub fn encode_velocity(&mut self, vel: [f32; 3]) {
        self.velocity = [
            (vel[0].clamp(-Self::MAX_VELOCITY, Self::MAX_VELOCITY) * 100.0) as i16,
            (vel[1].clamp(-Self::MAX_VELOCITY, Self::MAX_VELOCITY) * 100.0) as i16,
            (vel[2].clamp(-Self::MAX_VELOCITY, Self::MAX_VELOCITY) * 100.0) as i16,
        ];
    }

    pub fn decode_velocity(&self) -> [f32; 3] {
        [
            self.velocity[0] as f32 / 100.0,
            self.velocity[1] as f32 / 100.0,
            self.velocity[2] as f32 / 100.0,
        ]
    }

    pub fn encode_yaw(&mut self, yaw: f32) {
        self.yaw = (normalize_angle(yaw) * 10000.0) as i16;
    }

    pub fn decode_yaw(&self) -> f32 {
        self.yaw as f32 / 10000.0
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct StateDelta {
    pub sequence: u32,
    pub tick: u32,
    /// Tick of the acknowledged snapshot this delta is relative to. `None` means a full snapshot.
    pub base_tick: Option<u32>,
    /// False when the bandwidth budget truncated the entity list.
    pub complete: bool,
    pub entities: Vec<EntityState>,
    pub removed: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("datagram too short ({0} bytes)")]
    TooShort(usize),
    #[error("bad magic or protocol version")]
    BadHeader,
    #[error("packet of {0} bytes exceeds the MTU")]
    TooLarge(usize),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Payload) -> Self {
        Self { header, payload }
    }

    pub fn from_server(payload: Payload) -> Self {
        Self::new(PacketHeader::server(), payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let bytes = rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)?;

        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(bytes.len()));
        }

        Ok(bytes)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < MIN_PACKET_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        // Datagram buffers carry no alignment guarantee.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);

        let packet = rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(PacketError::Deserialize)?;

        if !packet.header.is_valid() {
            return Err(PacketError::BadHeader);
        }

        Ok(packet)
    }
}

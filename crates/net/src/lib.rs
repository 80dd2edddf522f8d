pub mod bandwidth;
pub mod channel;
pub mod client;
pub mod context;
pub mod demo;
pub mod error;
pub mod frame;
pub mod master;
pub mod ping;
pub mod protocol;
pub mod registry;
pub mod reliable;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod tracking;

pub use bandwidth::{BandwidthRater, BandwidthRating, DeltaBudget, rating_for_rtt};
pub use channel::{
    Incoming, LinkConditions, MemoryChannel, MemoryNetwork, PacketChannel, SentDatagram,
    SimulatedChannel, UdpChannel,
};
pub use client::{ClientEvent, NetClient};
pub use context::{MAX_SLOTS, NetConfig, NetMode, NetworkContext};
pub use demo::{DEMO_MAGIC, DemoReader, DemoSink, FileDemoSink, PendingDemos};
pub use error::{ConfigError, DisconnectReason, NetError, RejectReason, TransportError};
pub use frame::FrameBuilder;
pub use master::{MasterAnnouncer, MasterDirectory, MasterError, MemoryDirectory, ServerInfo};
pub use ping::{PING_SAMPLES, PingState, Pinger};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, EntityState, GameSetup, MAX_CHAT_LEN, MAX_PACKET_SIZE, Packet,
    PacketError, PacketHeader, Payload, PlayerInfo, ReliableMessage, StateDelta,
};
pub use registry::{ClientConnection, ClientRegistry, ConnectionState, SlotIndex};
pub use reliable::{ReliableQueue, ReliableReceiver};
pub use server::{ClientSummary, DemoRecorder, HandshakeSequencer, NetServer, ServerEvent};
pub use snapshot::{Entity, EntityFlags, EntityId, EntityKind, SnapshotBuffer, World, WorldSnapshot};
pub use stats::NetworkStats;
pub use tracking::{AckTracker, PendingDelta};

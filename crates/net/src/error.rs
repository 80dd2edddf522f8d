use std::fmt;
use std::io;

use crate::protocol::PacketError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("all client slots are occupied")]
    CapacityExceeded,
    #[error("handshake did not complete in time")]
    HandshakeTimeout,
    #[error("connection went stale")]
    StaleConnection,
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] PacketError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("slot {0} is not in use")]
    UnknownSlot(usize),
    #[error("operation not available in this network mode")]
    WrongMode,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Why a slot was released. The `Display` text is what the affected client is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    HandshakeTimeout,
    Stale,
    Malformed,
    Kicked(String),
    TransportClosed,
    ServerShutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Graceful => "disconnected",
            Self::HandshakeTimeout => "handshake timed out",
            Self::Stale => "connection timed out",
            Self::Malformed => "too many malformed packets",
            Self::Kicked(reason) => reason,
            Self::TransportClosed => "connection lost",
            Self::ServerShutdown => "server shutting down",
        }
    }

    /// Whether the client should be sent a goodbye explaining the drop.
    pub fn notify_client(&self) -> bool {
        !matches!(self, Self::Graceful | Self::TransportClosed)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kicked(reason) => write!(f, "kicked: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<&NetError> for DisconnectReason {
    fn from(err: &NetError) -> Self {
        match err {
            NetError::HandshakeTimeout => Self::HandshakeTimeout,
            NetError::StaleConnection => Self::Stale,
            NetError::MalformedPacket(_) => Self::Malformed,
            NetError::Transport(_) => Self::TransportClosed,
            _ => Self::Kicked(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ServerFull,
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerFull => f.write_str("server full"),
            Self::ShuttingDown => f.write_str("server is shutting down"),
        }
    }
}

use std::net::SocketAddr;

use crate::error::DisconnectReason;
use crate::protocol::ReliableMessage;
use crate::registry::SlotIndex;

/// Lifecycle notifications for the host, drained once per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnecting {
        slot: SlotIndex,
        addr: SocketAddr,
        name: String,
    },
    ClientReady {
        slot: SlotIndex,
        client_id: u32,
        name: String,
    },
    /// A connection attempt that never made it in: refused or timed out mid-handshake.
    ConnectionRejected {
        addr: SocketAddr,
        reason: String,
    },
    ClientLeft {
        slot: SlotIndex,
        client_id: u32,
        name: String,
        reason: DisconnectReason,
    },
    Chat {
        slot: SlotIndex,
        name: String,
        text: String,
    },
    ReliableDropped {
        slot: SlotIndex,
        client_id: u32,
        message: ReliableMessage,
    },
}

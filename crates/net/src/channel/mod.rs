mod memory;
mod simulator;
mod udp;

use std::net::SocketAddr;

use crate::error::TransportError;

pub use memory::{MemoryChannel, MemoryNetwork, SentDatagram};
pub use simulator::{LinkConditions, SimulatedChannel};
pub use udp::UdpChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Datagram { from: SocketAddr, bytes: Vec<u8> },
    /// Transport-level notice that the peer went away.
    Disconnected { from: SocketAddr },
}

/// Byte-level transport the synchronization core runs on.
///
/// `poll` must never block: it drains whatever arrived since the last call.
pub trait PacketChannel {
    fn local_addr(&self) -> SocketAddr;

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError>;

    fn poll(&mut self) -> Result<Vec<Incoming>, TransportError>;
}

impl<C: PacketChannel + ?Sized> PacketChannel for Box<C> {
    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send_to(addr, bytes)
    }

    fn poll(&mut self) -> Result<Vec<Incoming>, TransportError> {
        (**self).poll()
    }
}

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::error::TransportError;
use crate::protocol::MAX_PACKET_SIZE;
use crate::stats::NetworkStats;

use super::{Incoming, PacketChannel};

pub struct UdpChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
}

impl UdpChannel {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

impl PacketChannel for UdpChannel {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        match self.socket.send_to(bytes, addr) {
            Ok(sent) => {
                self.stats.record_sent(sent);
                Ok(())
            }
            // A full send buffer loses the datagram, same as the wire would.
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.packets_dropped += 1;
                Ok(())
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn poll(&mut self) -> Result<Vec<Incoming>, TransportError> {
        let mut incoming = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, from)) => {
                    self.stats.record_received(size);
                    incoming.push(Incoming::Datagram {
                        from,
                        bytes: self.recv_buffer[..size].to_vec(),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port-unreachable from some earlier send; not a socket failure.
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    log::debug!("ignoring ICMP error on {}: {}", self.local_addr, e);
                    continue;
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }

        Ok(incoming)
    }
}

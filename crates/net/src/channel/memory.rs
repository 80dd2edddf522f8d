use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use crate::error::TransportError;

use super::{Incoming, PacketChannel};

const FIRST_PORT: u16 = 20000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Hub {
    queues: HashMap<SocketAddr, VecDeque<Incoming>>,
    sent: Vec<SentDatagram>,
    failed: HashSet<SocketAddr>,
    next_port: u16,
}

/// In-process datagram hub for local games and deterministic tests.
///
/// Datagrams to an address nobody is bound to are dropped, like UDP.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> MemoryChannel {
        let addr = {
            let mut hub = self.hub.borrow_mut();
            let port = FIRST_PORT + hub.next_port;
            hub.next_port += 1;
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        };
        self.channel_at(addr)
    }

    pub fn channel_at(&self, addr: SocketAddr) -> MemoryChannel {
        self.hub.borrow_mut().queues.entry(addr).or_default();
        MemoryChannel {
            hub: Rc::clone(&self.hub),
            addr,
        }
    }

    /// Delivers raw bytes as if `from` had sent them.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        if let Some(queue) = self.hub.borrow_mut().queues.get_mut(&to) {
            queue.push_back(Incoming::Datagram {
                from,
                bytes: bytes.to_vec(),
            });
        }
    }

    /// Tells `to` that the transport lost its peer `from`.
    pub fn disconnect(&self, from: SocketAddr, to: SocketAddr) {
        if let Some(queue) = self.hub.borrow_mut().queues.get_mut(&to) {
            queue.push_back(Incoming::Disconnected { from });
        }
    }

    /// Every later send or poll on `addr` fails with `TransportError::Closed`.
    pub fn fail(&self, addr: SocketAddr) {
        self.hub.borrow_mut().failed.insert(addr);
    }

    pub fn sent_log(&self) -> Vec<SentDatagram> {
        self.hub.borrow().sent.clone()
    }

    pub fn sent_to(&self, addr: SocketAddr) -> Vec<Vec<u8>> {
        self.hub
            .borrow()
            .sent
            .iter()
            .filter(|d| d.to == addr)
            .map(|d| d.bytes.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.hub.borrow_mut().sent.clear();
    }
}

#[derive(Debug)]
pub struct MemoryChannel {
    hub: Rc<RefCell<Hub>>,
    addr: SocketAddr,
}

impl PacketChannel for MemoryChannel {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        if hub.failed.contains(&self.addr) {
            return Err(TransportError::Closed);
        }

        hub.sent.push(SentDatagram {
            from: self.addr,
            to: addr,
            bytes: bytes.to_vec(),
        });

        if let Some(queue) = hub.queues.get_mut(&addr) {
            queue.push_back(Incoming::Datagram {
                from: self.addr,
                bytes: bytes.to_vec(),
            });
        }

        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Incoming>, TransportError> {
        let mut hub = self.hub.borrow_mut();
        if hub.failed.contains(&self.addr) {
            return Err(TransportError::Closed);
        }

        Ok(hub
            .queues
            .get_mut(&self.addr)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if let Ok(mut hub) = self.hub.try_borrow_mut() {
            hub.queues.remove(&self.addr);
        }
    }
}

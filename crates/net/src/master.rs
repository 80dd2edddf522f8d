use std::cell::RefCell;
use std::rc::Rc;

use crate::protocol::PROTOCOL_VERSION;

/// Server metadata published to the master directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub protocol_version: u16,
    pub port: u16,
    pub player_count: usize,
    pub max_players: usize,
    pub players: Vec<String>,
    pub tick: u32,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, port: u16, max_players: usize) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            protocol_version: PROTOCOL_VERSION,
            port,
            player_count: 0,
            max_players,
            players: Vec::new(),
            tick: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.player_count >= self.max_players
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("master directory unreachable: {0}")]
    Unreachable(String),
    #[error("master directory rejected the request: {0}")]
    Rejected(String),
}

/// Directory service that lists running servers.
pub trait MasterDirectory {
    fn announce(&mut self, info: &ServerInfo) -> Result<(), MasterError>;

    fn request_server_list(&mut self) -> Result<Vec<ServerInfo>, MasterError>;

    /// `None` until a list has been fetched or when the index is out of range.
    fn get_server(&self, index: usize) -> Option<ServerInfo>;
}

#[derive(Debug, Default)]
struct Listing {
    announced: Vec<ServerInfo>,
    fetched: Vec<ServerInfo>,
    announcements: usize,
}

/// In-process directory. Clones share the same listing.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    listing: Rc<RefCell<Listing>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announcements(&self) -> usize {
        self.listing.borrow().announcements
    }

    pub fn latest(&self, name: &str) -> Option<ServerInfo> {
        self.listing
            .borrow()
            .announced
            .iter()
            .find(|info| info.name == name)
            .cloned()
    }
}

impl MasterDirectory for MemoryDirectory {
    fn announce(&mut self, info: &ServerInfo) -> Result<(), MasterError> {
        let mut listing = self.listing.borrow_mut();
        listing.announcements += 1;
        match listing
            .announced
            .iter_mut()
            .find(|known| known.name == info.name && known.port == info.port)
        {
            Some(known) => *known = info.clone(),
            None => listing.announced.push(info.clone()),
        }
        Ok(())
    }

    fn request_server_list(&mut self) -> Result<Vec<ServerInfo>, MasterError> {
        let mut listing = self.listing.borrow_mut();
        listing.fetched = listing.announced.clone();
        Ok(listing.fetched.clone())
    }

    fn get_server(&self, index: usize) -> Option<ServerInfo> {
        self.listing.borrow().fetched.get(index).cloned()
    }
}

/// Periodically publishes server metadata. Directory failures are logged and
/// retried on the next interval; they never reach the tick loop.
pub struct MasterAnnouncer {
    directory: Box<dyn MasterDirectory>,
    interval_ticks: u32,
    last_announce: Option<u32>,
    failures: u32,
}

impl MasterAnnouncer {
    pub fn new(directory: Box<dyn MasterDirectory>, interval_ticks: u32) -> Self {
        Self {
            directory,
            interval_ticks: interval_ticks.max(1),
            last_announce: None,
            failures: 0,
        }
    }

    pub fn is_due(&self, tick: u32) -> bool {
        match self.last_announce {
            Some(last) => tick.wrapping_sub(last) >= self.interval_ticks,
            None => true,
        }
    }

    /// Announces if the interval elapsed. Returns whether an announcement went out.
    pub fn maybe_announce(&mut self, tick: u32, info: impl FnOnce() -> ServerInfo) -> bool {
        if !self.is_due(tick) {
            return false;
        }
        self.last_announce = Some(tick);
        self.announce_now(&info())
    }

    pub fn announce_now(&mut self, info: &ServerInfo) -> bool {
        match self.directory.announce(info) {
            Ok(()) => {
                log::debug!(
                    "announced {} ({}/{} players)",
                    info.name,
                    info.player_count,
                    info.max_players
                );
                self.failures = 0;
                true
            }
            Err(err) => {
                self.failures += 1;
                log::warn!("master announce failed ({} in a row): {}", self.failures, err);
                false
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl std::fmt::Debug for MasterAnnouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterAnnouncer")
            .field("interval_ticks", &self.interval_ticks)
            .field("last_announce", &self.last_announce)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Offline;

    impl MasterDirectory for Offline {
        fn announce(&mut self, _info: &ServerInfo) -> Result<(), MasterError> {
            Err(MasterError::Unreachable("no route".into()))
        }

        fn request_server_list(&mut self) -> Result<Vec<ServerInfo>, MasterError> {
            Err(MasterError::Unreachable("no route".into()))
        }

        fn get_server(&self, _index: usize) -> Option<ServerInfo> {
            None
        }
    }

    #[test]
    fn server_list_is_unavailable_until_fetched() {
        let mut directory = MemoryDirectory::new();
        directory.announce(&ServerInfo::new("alpha", 1, 8)).unwrap();

        assert!(directory.get_server(0).is_none());
        assert_eq!(directory.request_server_list().unwrap().len(), 1);
        assert_eq!(directory.get_server(0).unwrap().name, "alpha");
        assert!(directory.get_server(1).is_none());
    }

    #[test]
    fn reannouncing_updates_the_entry() {
        let mut directory = MemoryDirectory::new();
        let mut info = ServerInfo::new("alpha", 1, 8);
        directory.announce(&info).unwrap();
        info.player_count = 3;
        directory.announce(&info).unwrap();

        assert_eq!(directory.request_server_list().unwrap().len(), 1);
        assert_eq!(directory.latest("alpha").unwrap().player_count, 3);
    }

    #[test]
    fn announcer_respects_interval() {
        let directory = MemoryDirectory::new();
        let mut announcer = MasterAnnouncer::new(Box::new(directory.clone()), 10);

        assert!(announcer.maybe_announce(0, || ServerInfo::new("alpha", 1, 8)));
        assert!(!announcer.maybe_announce(5, || ServerInfo::new("alpha", 1, 8)));
        assert!(announcer.maybe_announce(10, || ServerInfo::new("alpha", 1, 8)));
        assert_eq!(directory.announcements(), 2);
    }

    #[test]
    fn failures_are_counted_not_propagated() {
        let mut announcer = MasterAnnouncer::new(Box::new(Offline), 1);

        assert!(!announcer.maybe_announce(0, || ServerInfo::new("alpha", 1, 8)));
        assert!(!announcer.maybe_announce(1, || ServerInfo::new("alpha", 1, 8)));
        assert_eq!(announcer.failures(), 2);
    }
}

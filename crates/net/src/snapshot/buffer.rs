use super::world::WorldSnapshot;

/// Fixed window of recent world snapshots, looked up by tick when a client's
/// acknowledged base is needed. A tick older than the window is simply gone.
#[derive(Debug)]
pub struct SnapshotBuffer {
    ring: Box<[Option<WorldSnapshot>]>,
    newest: Option<u32>,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![None; capacity.max(1)].into_boxed_slice(),
            newest: None,
        }
    }

    fn slot(&self, tick: u32) -> usize {
        tick as usize % self.ring.len()
    }

    pub fn push(&mut self, snapshot: WorldSnapshot) {
        let slot = self.slot(snapshot.tick);
        self.newest = Some(snapshot.tick);
        self.ring[slot] = Some(snapshot);
    }

    pub fn get(&self, tick: u32) -> Option<&WorldSnapshot> {
        self.ring[self.slot(tick)]
            .as_ref()
            .filter(|snapshot| snapshot.tick == tick)
    }

    pub fn newest(&self) -> Option<&WorldSnapshot> {
        self.newest.and_then(|tick| self.get(tick))
    }

    pub fn capacity(&self) -> usize {
        self.ring.len()
    }
}

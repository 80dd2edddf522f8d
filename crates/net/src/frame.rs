use crate::bandwidth::DeltaBudget;
use crate::protocol::StateDelta;
use crate::registry::ClientConnection;
use crate::snapshot::{EntityId, SnapshotBuffer, WorldSnapshot};
use crate::tracking::PendingDelta;

/// Builds per-client state deltas and advances delta bases on acknowledgement.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameBuilder;

impl FrameBuilder {
    /// Produces this tick's delta for `client`, or `None` when the client is
    /// not accepting game data or its bandwidth budget says to wait.
    ///
    /// `focus` is the entity of the console the client is viewing; it always
    /// leads the entity list.
    pub fn build(
        &self,
        client: &mut ClientConnection,
        focus: Option<EntityId>,
        current: &WorldSnapshot,
        history: &SnapshotBuffer,
        tick: u32,
        now_ms: u64,
    ) -> Option<StateDelta> {
        if !client.ready_for_game_data() {
            return None;
        }

        let budget = DeltaBudget::for_rating(client.bandwidth);
        if let Some(last) = client.delta.last_sent_tick {
            if tick.wrapping_sub(last) < budget.interval_ticks {
                return None;
            }
        }

        let base = client.delta.base_tick.and_then(|t| history.get(t));
        if base.is_none() && client.delta.base_tick.is_some() {
            log::debug!(
                "client {} base snapshot fell out of history, sending full state",
                client.id
            );
            client.delta.base_tick = None;
        }

        let (mut changed, mut removed) = current.changes_since(base);

        let mut entities = Vec::with_capacity(budget.max_entities.min(changed.len()));
        if let Some(index) = focus.and_then(|id| changed.iter().position(|e| e.entity_id == id)) {
            entities.push(changed.remove(index));
        }

        let room = budget.max_entities.saturating_sub(entities.len());
        let complete = changed.len() <= room && removed.len() <= budget.max_removed;
        if changed.len() > room {
            let offset = client.delta.rotation % changed.len();
            changed.rotate_left(offset);
            changed.truncate(room);
            client.delta.rotation = offset + room;
        }
        entities.extend(changed);
        removed.truncate(budget.max_removed);

        let sequence = client.acks.next_sequence();
        client.acks.track(PendingDelta {
            sequence,
            sent_ms: now_ms,
            snapshot_tick: current.tick,
            complete,
            size: entities.len() + removed.len(),
        });
        client.delta.last_sent_tick = Some(tick);

        Some(StateDelta {
            sequence,
            tick: current.tick,
            base_tick: base.map(|b| b.tick),
            complete,
            entities,
            removed,
        })
    }

    /// Applies a cumulative delta ack. Returns false for stale, duplicate or
    /// unknown acks. The base advances only to a complete delta the client
    /// acknowledged by its exact sequence.
    pub fn on_ack(&self, client: &mut ClientConnection, sequence: u32, now_ms: u64) -> bool {
        let Some(pruned) = client.acks.on_ack(sequence, now_ms) else {
            return false;
        };

        if let Some(acked) = pruned
            .iter()
            .find(|p| p.sequence == sequence && p.complete)
        {
            client.delta.base_tick = Some(acked.snapshot_tick);
        }
        client.age_ticks = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::bandwidth::BandwidthRating;
    use crate::snapshot::{EntityKind, World};

    fn ready_client() -> ClientConnection {
        let mut client = ClientConnection::new(1, "127.0.0.1:4000".parse().unwrap());
        client.begin_handshake();
        client.acknowledge_setup();
        client.ping.record(20, 1000);
        assert!(client.try_become_ready());
        client.bandwidth = BandwidthRating::MAX;
        client
    }

    fn world_with(count: usize) -> World {
        let mut world = World::new();
        for i in 0..count {
            world.spawn(EntityKind::Item, Vec3::new(i as f32, 0.0, 0.0));
        }
        world
    }

    fn capture(world: &World, history: &mut SnapshotBuffer, tick: u32) -> WorldSnapshot {
        let snapshot = world.snapshot(tick);
        history.push(snapshot.clone());
        snapshot
    }

    #[test]
    fn nothing_is_built_before_ready() {
        let mut client = ClientConnection::new(1, "127.0.0.1:4000".parse().unwrap());
        let world = world_with(3);
        let mut history = SnapshotBuffer::new(8);
        let current = capture(&world, &mut history, 0);

        assert!(
            FrameBuilder
                .build(&mut client, None, &current, &history, 0, 0)
                .is_none()
        );
        assert_eq!(client.acks.pending_count(), 0);
    }

    #[test]
    fn paused_client_gets_nothing() {
        let mut client = ready_client();
        client.set_wants_game_data(false);
        let world = world_with(3);
        let mut history = SnapshotBuffer::new(8);
        let current = capture(&world, &mut history, 0);

        assert!(
            FrameBuilder
                .build(&mut client, None, &current, &history, 0, 0)
                .is_none()
        );
    }

    #[test]
    fn first_delta_is_full_then_only_changes() {
        let mut client = ready_client();
        let mut world = world_with(3);
        let mut history = SnapshotBuffer::new(8);

        let current = capture(&world, &mut history, 0);
        let first = FrameBuilder
            .build(&mut client, None, &current, &history, 0, 0)
            .unwrap();
        assert_eq!(first.base_tick, None);
        assert!(first.complete);
        assert_eq!(first.entities.len(), 3);

        assert!(FrameBuilder.on_ack(&mut client, first.sequence, 5));
        assert_eq!(client.delta.base_tick, Some(0));

        world.get_mut(2).unwrap().position = Vec3::new(9.0, 9.0, 9.0);
        let current = capture(&world, &mut history, 1);
        let second = FrameBuilder
            .build(&mut client, None, &current, &history, 1, 10)
            .unwrap();

        assert_eq!(second.base_tick, Some(0));
        assert!(sequence_after(second.sequence, first.sequence));
        assert_eq!(second.entities.len(), 1);
        assert_eq!(second.entities[0].entity_id, 2);
    }

    fn sequence_after(a: u32, b: u32) -> bool {
        crate::protocol::sequence_greater_than(a, b)
    }

    #[test]
    fn truncated_delta_rotates_and_keeps_focus_first() {
        let mut client = ready_client();
        client.bandwidth = BandwidthRating::MIN;
        let world = world_with(12);
        let mut history = SnapshotBuffer::new(8);
        let budget = DeltaBudget::for_rating(BandwidthRating::MIN);
        let focus = 12;

        let mut seen = std::collections::BTreeSet::new();
        let mut tick = 0;
        for _ in 0..6 {
            let current = capture(&world, &mut history, tick);
            let delta = FrameBuilder
                .build(&mut client, Some(focus), &current, &history, tick, 0)
                .unwrap();
            assert!(!delta.complete);
            assert_eq!(delta.entities.len(), budget.max_entities);
            assert_eq!(delta.entities[0].entity_id, focus);
            seen.extend(delta.entities.iter().map(|e| e.entity_id));
            tick += budget.interval_ticks;
        }

        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn base_does_not_advance_on_incomplete_ack() {
        let mut client = ready_client();
        client.bandwidth = BandwidthRating::MIN;
        let world = world_with(12);
        let mut history = SnapshotBuffer::new(8);
        let current = capture(&world, &mut history, 0);

        let delta = FrameBuilder
            .build(&mut client, None, &current, &history, 0, 0)
            .unwrap();
        assert!(FrameBuilder.on_ack(&mut client, delta.sequence, 1));

        assert_eq!(client.delta.base_tick, None);
        assert!(!FrameBuilder.on_ack(&mut client, delta.sequence, 2));
    }

    #[test]
    fn low_rating_sends_less_often() {
        let mut client = ready_client();
        client.bandwidth = BandwidthRating::MIN;
        let world = world_with(1);
        let mut history = SnapshotBuffer::new(8);

        let mut sent = 0;
        for tick in 0..9 {
            let current = capture(&world, &mut history, tick);
            if FrameBuilder
                .build(&mut client, None, &current, &history, tick, 0)
                .is_some()
            {
                sent += 1;
            }
        }

        assert_eq!(sent, 3);
    }

    #[test]
    fn more_bandwidth_never_sends_fewer_entities() {
        let world = world_with(40);
        let mut history = SnapshotBuffer::new(8);
        let current = capture(&world, &mut history, 0);

        let mut previous = 0;
        for value in BandwidthRating::MIN.value()..=BandwidthRating::MAX.value() {
            let mut client = ready_client();
            client.bandwidth = BandwidthRating::new(value);
            let delta = FrameBuilder
                .build(&mut client, None, &current, &history, 0, 0)
                .unwrap();
            assert!(delta.entities.len() >= previous);
            previous = delta.entities.len();
        }
    }
}

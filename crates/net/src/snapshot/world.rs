use std::collections::BTreeMap;

use glam::Vec3;

use crate::protocol::EntityState;
use crate::registry::SlotIndex;

use super::entity::{Entity, EntityId, EntityKind};

/// Quantized capture of every entity at one tick, as clients would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u32,
    pub entities: BTreeMap<EntityId, EntityState>,
}

impl WorldSnapshot {
    /// Entities that differ from `base` and ids that disappeared since it.
    /// Without a base every entity counts as changed.
    pub fn changes_since(&self, base: Option<&WorldSnapshot>) -> (Vec<EntityState>, Vec<EntityId>) {
        let Some(base) = base else {
            return (self.entities.values().copied().collect(), Vec::new());
        };

        let changed = self
            .entities
            .iter()
            .filter(|(id, state)| base.entities.get(id) != Some(state))
            .map(|(_, state)| *state)
            .collect();

        let removed = base
            .entities
            .keys()
            .filter(|id| !self.entities.contains_key(id))
            .copied()
            .collect();

        (changed, removed)
    }
}

/// Authoritative world state owned by the server host.
#[derive(Debug)]
pub struct World {
    entities: BTreeMap<EntityId, Entity>,
    next_entity_id: EntityId,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_entity_id: 1,
        }
    }

    pub fn spawn(&mut self, kind: EntityKind, position: Vec3) -> EntityId {
        let id = self.allocate_id();
        let mut entity = Entity::new(id, kind);
        entity.position = position;
        self.entities.insert(id, entity);
        id
    }

    pub fn spawn_player(&mut self, owner: SlotIndex, spawn_position: Vec3) -> EntityId {
        let id = self.allocate_id();
        self.entities
            .insert(id, Entity::player(id, owner, spawn_position));
        id
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Removes every entity owned by `slot`, returning how many went.
    pub fn despawn_owned_by(&mut self, slot: SlotIndex) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, e| e.owner != Some(slot));
        before - self.entities.len()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn player_entity(&self, slot: SlotIndex) -> Option<EntityId> {
        self.entities
            .values()
            .find(|e| e.kind == EntityKind::Player && e.owner == Some(slot))
            .map(|e| e.id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn snapshot(&self, tick: u32) -> WorldSnapshot {
        WorldSnapshot {
            tick,
            entities: self
                .entities
                .iter()
                .map(|(&id, entity)| (id, entity.to_network_state()))
                .collect(),
        }
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }
}

use bitflags::bitflags;
use glam::Vec3;

use crate::protocol::EntityState;
use crate::registry::SlotIndex;

pub type EntityId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Player = 0,
    Missile = 1,
    Item = 2,
    Scenery = 3,
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Player,
            1 => Self::Missile,
            2 => Self::Item,
            _ => Self::Scenery,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntityFlags: u16 {
        const SOLID = 1 << 0;
        const SHOOTABLE = 1 << 1;
        const INVISIBLE = 1 << 2;
        const DEAD = 1 << 3;
        const NO_GRAVITY = 1 << 4;
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub owner: Option<SlotIndex>,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub flags: EntityFlags,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            owner: None,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            flags: EntityFlags::SOLID,
        }
    }

    pub fn player(id: EntityId, owner: SlotIndex, spawn_position: Vec3) -> Self {
        Self {
            owner: Some(owner),
            position: spawn_position,
            flags: EntityFlags::SOLID | EntityFlags::SHOOTABLE,
            ..Self::new(id, EntityKind::Player)
        }
    }

    pub fn to_network_state(&self) -> EntityState {
        let mut state = EntityState::new(self.id, self.kind as u8);
        state.owner = self.owner.and_then(|slot| u8::try_from(slot).ok());
        state.position = self.position.into();
        state.encode_velocity(self.velocity.into());
        state.encode_yaw(self.yaw);
        state.flags = self.flags.bits();
        state
    }

    pub fn from_network_state(state: &EntityState) -> Self {
        Self {
            id: state.entity_id,
            kind: EntityKind::from(state.kind),
            owner: state.owner.map(SlotIndex::from),
            position: Vec3::from(state.position),
            velocity: Vec3::from(state.decode_velocity()),
            yaw: state.decode_yaw(),
            flags: EntityFlags::from_bits_truncate(state.flags),
        }
    }
}

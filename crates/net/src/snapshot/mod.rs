mod buffer;
mod entity;
mod world;

pub use buffer::SnapshotBuffer;
pub use entity::{Entity, EntityFlags, EntityId, EntityKind};
pub use world::{World, WorldSnapshot};

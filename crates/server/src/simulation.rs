use std::f32::consts::TAU;

use glam::Vec3;

use tickwire::{Entity, EntityFlags, EntityKind, World};

const PLAYER_SPEED: f32 = 3.0;
const TURN_RATE: f32 = 0.8;
const GRAVITY: f32 = 9.8;

/// Advances the demo world one step so connected clients have state to track.
pub fn simulate_world(world: &mut World, dt: f32) {
    for entity in world.entities_mut() {
        if entity.flags.contains(EntityFlags::DEAD) {
            continue;
        }
        match entity.kind {
            EntityKind::Player => wander(entity, dt),
            EntityKind::Missile => simulate_missile(entity, dt),
            EntityKind::Item | EntityKind::Scenery => {}
        }
    }
}

// Players walk in slow circles.
fn wander(entity: &mut Entity, dt: f32) {
    entity.yaw = (entity.yaw + TURN_RATE * dt) % TAU;
    let (sin_yaw, cos_yaw) = entity.yaw.sin_cos();
    entity.velocity = Vec3::new(cos_yaw, 0.0, sin_yaw) * PLAYER_SPEED;
    entity.position += entity.velocity * dt;
}

fn simulate_missile(entity: &mut Entity, dt: f32) {
    if !entity.flags.contains(EntityFlags::NO_GRAVITY) {
        entity.velocity.y -= GRAVITY * dt;
    }
    entity.position += entity.velocity * dt;

    if entity.position.y < 0.0 {
        entity.position.y = 0.0;
        entity.velocity = Vec3::ZERO;
    }
}

//! Types shared by the authority and its replicas: the wire protocol, the
//! replicated variable, entity kinds, configuration and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod config;
pub mod entity;
pub mod error;
pub mod protocol;
pub mod replicated;

pub use config::{GameConfig, WorldBounds};
pub use entity::{EntityId, EntityKind, EntitySnapshot, Field, FieldState, FieldValue};
pub use error::{ConfigError, CoreError};
pub use protocol::{
    Intent, Notification, NotificationKind, Packet, Replication, VarUpdate, DELTA_CHUNK,
    MAX_DATAGRAM, PROTOCOL_VERSION, SNAPSHOT_CHUNK,
};
pub use replicated::{ReadPolicy, Replicated, Role, WritePolicy};

/// Identifier the authority assigns to each connected participant.
pub type ClientId = u32;

pub const WORLD_MIN_X: f32 = -9.0;
pub const WORLD_MAX_X: f32 = 9.0;
pub const WORLD_MIN_Y: f32 = -5.0;
pub const WORLD_MAX_Y: f32 = 5.0;

pub const PICKUP_CAPACITY: usize = 50;
pub const INITIAL_PICKUPS: usize = 30;
pub const PICKUP_SPAWN_INTERVAL: Duration = Duration::from_secs(2);

/// Head movement in world units per second.
pub const MOVE_SPEED: f32 = 3.0;
pub const INTERPOLATION_RATE: f32 = 15.0;

pub const SEGMENT_SPACING: f32 = 0.3;
pub const HEAD_RADIUS: f32 = 0.3;
pub const SEGMENT_RADIUS: f32 = 0.25;
pub const PICKUP_RADIUS: f32 = 0.2;

/// A head does not turn toward targets closer than this.
pub const TURN_DEADZONE: f32 = 0.1;

/// A point or direction in arena space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalize(&self) -> Vec2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vec2::ZERO
        } else {
            self.scale(1.0 / mag)
        }
    }

    pub fn scale(&self, scalar: f32) -> Vec2 {
        Vec2::new(self.x * scalar, self.y * scalar)
    }

    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: &Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    pub fn distance(&self, other: &Vec2) -> f32 {
        self.sub(other).magnitude()
    }

    /// Moves toward `target` by at most `max_delta`, never overshooting.
    pub fn move_towards(&self, target: &Vec2, max_delta: f32) -> Vec2 {
        let delta = target.sub(self);
        let dist = delta.magnitude();
        if dist <= max_delta || dist == 0.0 {
            *target
        } else {
            self.add(&delta.scale(max_delta / dist))
        }
    }

    /// Linear interpolation, `t` clamped to `[0, 1]`.
    pub fn lerp(&self, target: &Vec2, t: f32) -> Vec2 {
        let t = t.clamp(0.0, 1.0);
        self.add(&target.sub(self).scale(t))
    }

    /// Heading angle in radians, measured from the +x axis.
    pub fn angle(&self) -> f32 {
        self.y.atan2(self.x)
    }
}

/// Position and heading of a spawned entity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec2,
    pub rotation: f32,
}

impl Pose {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            rotation: 0.0,
        }
    }
}

/// True when two circles intersect. Touching edges do not count.
pub fn circles_overlap(a: &Vec2, radius_a: f32, b: &Vec2, radius_b: f32) -> bool {
    let reach = radius_a + radius_b;
    let d = b.sub(a);
    d.x * d.x + d.y * d.y < reach * reach
}

/// Current wall-clock time in milliseconds.
pub fn timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_move_towards_clamps_distance() {
        let from = Vec2::new(0.0, 0.0);
        let to = Vec2::new(10.0, 0.0);

        let step = from.move_towards(&to, 3.0);
        assert_approx_eq!(step.x, 3.0, 0.0001);
        assert_approx_eq!(step.y, 0.0, 0.0001);
    }

    #[test]
    fn test_move_towards_does_not_overshoot() {
        let from = Vec2::new(1.0, 1.0);
        let to = Vec2::new(1.5, 1.0);

        assert_eq!(from.move_towards(&to, 3.0), to);
    }

    #[test]
    fn test_lerp_clamps_factor() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(2.0, 4.0);

        assert_eq!(a.lerp(&b, 2.0), b);
        let mid = a.lerp(&b, 0.5);
        assert_approx_eq!(mid.x, 1.0, 0.0001);
        assert_approx_eq!(mid.y, 2.0, 0.0001);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(Vec2::ZERO.normalize(), Vec2::ZERO);
    }

    #[test]
    fn test_circles_overlap() {
        let a = Vec2::new(0.0, 0.0);
        assert!(circles_overlap(&a, 0.3, &Vec2::new(0.5, 0.0), 0.3));
        assert!(!circles_overlap(&a, 0.3, &Vec2::new(0.7, 0.0), 0.3));
        assert!(!circles_overlap(&a, 0.3, &Vec2::new(2.0, 2.0), 0.3));
    }

    #[test]
    fn test_angle() {
        assert_approx_eq!(Vec2::new(0.0, 1.0).angle(), std::f32::consts::FRAC_PI_2, 0.0001);
    }
}

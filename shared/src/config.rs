//! Gameplay configuration supplied to the core from outside.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::Vec2;

/// Axis-aligned rectangle that spawn placement and movement stay within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl WorldBounds {
    pub fn contains(&self, p: &Vec2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn clamp(&self, p: &Vec2) -> Vec2 {
        Vec2::new(
            p.x.clamp(self.min_x, self.max_x),
            p.y.clamp(self.min_y, self.max_y),
        )
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_x: crate::WORLD_MIN_X,
            max_x: crate::WORLD_MAX_X,
            min_y: crate::WORLD_MIN_Y,
            max_y: crate::WORLD_MAX_Y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub bounds: WorldBounds,
    /// Maximum number of pickups alive at once; also the pool capacity
    pub pickup_capacity: usize,
    /// Pickups spawned when the authority starts
    pub initial_pickups: usize,
    pub spawn_interval: Duration,
    /// Head speed in world units per second
    pub move_speed: f32,
    /// Replica smoothing factor per second
    pub interpolation_rate: f32,
    pub segment_spacing: f32,
    pub head_radius: f32,
    pub segment_radius: f32,
    pub pickup_radius: f32,
    /// Full snapshot broadcast period, in ticks
    pub snapshot_interval_ticks: u32,
    /// Unacknowledged notifications are re-sent after this long
    pub notification_resend: Duration,
    pub client_timeout: Duration,
    pub max_clients: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            bounds: WorldBounds::default(),
            pickup_capacity: crate::PICKUP_CAPACITY,
            initial_pickups: crate::INITIAL_PICKUPS,
            spawn_interval: crate::PICKUP_SPAWN_INTERVAL,
            move_speed: crate::MOVE_SPEED,
            interpolation_rate: crate::INTERPOLATION_RATE,
            segment_spacing: crate::SEGMENT_SPACING,
            head_radius: crate::HEAD_RADIUS,
            segment_radius: crate::SEGMENT_RADIUS,
            pickup_radius: crate::PICKUP_RADIUS,
            snapshot_interval_ticks: 30,
            notification_resend: Duration::from_millis(250),
            client_timeout: Duration::from_secs(5),
            max_clients: 32,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.bounds;
        if b.min_x >= b.max_x || b.min_y >= b.max_y {
            return Err(ConfigError::EmptyBounds {
                min_x: b.min_x,
                max_x: b.max_x,
                min_y: b.min_y,
                max_y: b.max_y,
            });
        }

        let positive = [
            ("pickup_capacity", self.pickup_capacity > 0),
            ("spawn_interval", !self.spawn_interval.is_zero()),
            ("move_speed", self.move_speed > 0.0),
            ("interpolation_rate", self.interpolation_rate > 0.0),
            ("segment_spacing", self.segment_spacing > 0.0),
            ("head_radius", self.head_radius > 0.0),
            ("segment_radius", self.segment_radius > 0.0),
            ("pickup_radius", self.pickup_radius > 0.0),
            ("snapshot_interval_ticks", self.snapshot_interval_ticks > 0),
            ("max_clients", self.max_clients > 0),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(ConfigError::NotPositive { field: *field });
        }

        if self.initial_pickups > self.pickup_capacity {
            return Err(ConfigError::InitialBatchTooLarge {
                initial: self.initial_pickups,
                capacity: self.pickup_capacity,
            });
        }

        Ok(())
    }
}

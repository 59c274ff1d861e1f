//! Headless steering with intent sequencing

use crate::game::ReplicaWorld;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{timestamp_ms, EntityId, Intent, Vec2, WorldBounds};
use std::time::{Duration, Instant};

/// Distance at which a wander point counts as reached
const ARRIVAL_RADIUS: f32 = 0.3;

/// Picks a steering target for the own head and packages it as an intent.
///
/// Chases the closest active pickup the replica knows about and otherwise
/// wanders between random points inside the world bounds.
pub struct SteeringController {
    next_sequence: u32,
    bounds: WorldBounds,
    wander: Option<Vec2>,
    last_target: Option<Vec2>,
    last_intent_sent: Instant,
    keepalive: Duration,
    rng: StdRng,
}

impl SteeringController {
    pub fn new(bounds: WorldBounds) -> Self {
        Self::with_rng(bounds, StdRng::from_entropy())
    }

    pub fn with_seed(bounds: WorldBounds, seed: u64) -> Self {
        Self::with_rng(bounds, StdRng::seed_from_u64(seed))
    }

    fn with_rng(bounds: WorldBounds, rng: StdRng) -> Self {
        Self {
            next_sequence: 1,
            bounds,
            wander: None,
            last_target: None,
            last_intent_sent: Instant::now(),
            keepalive: Duration::from_millis(100),
            rng,
        }
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Target for the own head, if it is mirrored and alive.
    pub fn choose_target(&mut self, world: &ReplicaWorld) -> Option<Vec2> {
        if !world.is_alive() {
            return None;
        }
        let head = world.own_head()?;
        let position = head.position();

        if let Some((_, pickup)) = world.nearest_pickup(&position) {
            self.wander = None;
            return Some(pickup);
        }

        let reached = self
            .wander
            .map_or(true, |point| point.distance(&position) <= ARRIVAL_RADIUS);
        if reached {
            self.wander = Some(self.random_point());
        }
        self.wander
    }

    /// Builds the next intent when the target moved or the keep-alive elapsed.
    pub fn update(&mut self, world: &ReplicaWorld) -> Option<Intent> {
        let head = world.head?;
        let target = self.choose_target(world)?;

        let changed = self.last_target != Some(target);
        let time_to_send = self.last_intent_sent.elapsed() >= self.keepalive;
        if !changed && !time_to_send {
            return None;
        }

        Some(self.make_intent(head, target))
    }

    fn make_intent(&mut self, head: EntityId, target: Vec2) -> Intent {
        let intent = Intent {
            sequence: self.next_sequence,
            timestamp: timestamp_ms(),
            head,
            target,
        };
        self.next_sequence += 1;
        self.last_target = Some(target);
        self.last_intent_sent = Instant::now();
        intent
    }

    fn random_point(&mut self) -> Vec2 {
        Vec2::new(
            self.rng.gen_range(self.bounds.min_x..=self.bounds.max_x),
            self.rng.gen_range(self.bounds.min_y..=self.bounds.max_y),
        )
    }
}

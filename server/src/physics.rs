//! Circle-overlap detection standing in for a physics engine.
//!
//! Produces the `(initiator, other)` overlap events the collision resolver
//! consumes. Only identities and which side triggered leave this module.
//! Events come out in a fixed order so every run over the same state
//! resolves the same way:
//!
//! 1. head vs head, initiator is the head that moved further this tick
//!    (lower id on a tie)
//! 2. head vs another head's visible segment, initiator is the head
//! 3. active pickup vs the first alive head or visible segment touching it,
//!    initiator is the pickup

use shared::{circles_overlap, EntityId, GameConfig, Vec2};

use crate::collision::Overlap;
use crate::entity::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radii {
    pub head: f32,
    pub segment: f32,
    pub pickup: f32,
}

impl From<&GameConfig> for Radii {
    fn from(config: &GameConfig) -> Self {
        Self {
            head: config.head_radius,
            segment: config.segment_radius,
            pickup: config.pickup_radius,
        }
    }
}

struct Body {
    id: EntityId,
    head: EntityId,
    position: Vec2,
}

pub fn detect_overlaps(store: &EntityStore, radii: Radii) -> Vec<Overlap> {
    let heads: Vec<(EntityId, Vec2, f32)> = store
        .heads()
        .filter(|head| head.is_alive())
        .map(|head| (head.id, *head.position.get(), head.last_step))
        .collect();
    let bodies: Vec<Body> = store
        .segments()
        .filter(|segment| segment.is_visible())
        .map(|segment| Body {
            id: segment.id,
            head: segment.head,
            position: *segment.position.get(),
        })
        .collect();

    let mut overlaps = Vec::new();

    for (i, (a, pos_a, step_a)) in heads.iter().enumerate() {
        for (b, pos_b, step_b) in &heads[i + 1..] {
            if circles_overlap(pos_a, radii.head, pos_b, radii.head) {
                // Heads are visited in id order, so `a` wins the tie
                let overlap = if step_b > step_a {
                    Overlap::new(*b, *a)
                } else {
                    Overlap::new(*a, *b)
                };
                overlaps.push(overlap);
            }
        }
    }

    for (head, pos, _) in &heads {
        for body in bodies.iter().filter(|body| body.head != *head) {
            if circles_overlap(pos, radii.head, &body.position, radii.segment) {
                overlaps.push(Overlap::new(*head, body.id));
            }
        }
    }

    for pickup in store.pickups().filter(|pickup| pickup.is_active()) {
        let at = pickup.position.get();
        let toucher = heads
            .iter()
            .find(|(_, pos, _)| circles_overlap(at, radii.pickup, pos, radii.head))
            .map(|(id, _, _)| *id)
            .or_else(|| {
                bodies
                    .iter()
                    .find(|body| circles_overlap(at, radii.pickup, &body.position, radii.segment))
                    .map(|body| body.id)
            });
        if let Some(toucher) = toucher {
            overlaps.push(Overlap::new(pickup.id, toucher));
        }
    }

    overlaps
}

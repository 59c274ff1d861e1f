//! Turns overlap events into authoritative outcomes.
//!
//! Every event is resolved to completion before the next one is looked at.
//! All checks run before the first write, so an event either commits its
//! whole outcome or nothing. Once a head is dead it no longer counts as a
//! combatant, and later events naming it are discarded as stale.

use log::{debug, info, warn};
use shared::{CoreError, EntityId, NotificationKind, Role};

use crate::body;
use crate::entity::{Entity, EntityStore};
use crate::notifier::Notifier;
use crate::pool::EntityPool;

/// Two overlapping entities. `initiator` is the one whose trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub initiator: EntityId,
    pub other: EntityId,
}

impl Overlap {
    pub fn new(initiator: EntityId, other: EntityId) -> Self {
        Self { initiator, other }
    }

    /// Builds an overlap from a raw `(a, b, triggering)` event. Returns `None`
    /// when the triggering entity is neither side.
    pub fn from_event(a: EntityId, b: EntityId, triggering: EntityId) -> Option<Self> {
        if triggering == a {
            Some(Self::new(a, b))
        } else if triggering == b {
            Some(Self::new(b, a))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Kill { winner: EntityId, loser: EntityId },
    Consumed { head: EntityId, pickup: EntityId },
    /// The pair has no rule, such as a head touching its own body
    Ignored,
}

/// Head-vs-head rule. Strictly longer wins; on a tie the initiator wins.
/// Returns `(winner, loser)`.
pub fn head_to_head(initiator: (EntityId, u16), other: (EntityId, u16)) -> (EntityId, EntityId) {
    if other.1 > initiator.1 {
        (other.0, initiator.0)
    } else {
        (initiator.0, other.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolverStats {
    pub kills: u64,
    pub consumed: u64,
    pub ignored: u64,
    pub stale: u64,
}

/// Mutable state a resolution may touch.
pub struct ResolveContext<'a> {
    pub store: &'a mut EntityStore,
    pub pickups: &'a mut EntityPool<EntityId>,
    pub notifier: &'a mut Notifier,
}

#[derive(Debug, Clone, Copy)]
enum Party {
    Head { id: EntityId, length: u16 },
    Segment { id: EntityId, head: EntityId },
    Pickup { id: EntityId },
}

/// Classifies an entity as a live participant in a collision.
fn party(store: &EntityStore, id: EntityId) -> Result<Party, CoreError> {
    match store.get(id) {
        Some(Entity::Head(head)) if head.is_alive() => Ok(Party::Head {
            id,
            length: *head.length.get(),
        }),
        Some(Entity::Segment(segment)) if segment.is_visible() => Ok(Party::Segment {
            id,
            head: segment.head,
        }),
        Some(Entity::Pickup(pickup)) if pickup.is_active() => Ok(Party::Pickup { id }),
        _ => Err(CoreError::StaleReference(id)),
    }
}

/// Resolves a segment to its owning head, which must still be alive.
fn live_owner(store: &EntityStore, head: EntityId) -> Result<EntityId, CoreError> {
    match store.head(head) {
        Ok(owner) if owner.is_alive() => Ok(head),
        _ => Err(CoreError::StaleReference(head)),
    }
}

#[derive(Debug, Default)]
pub struct CollisionResolver {
    stats: ResolverStats,
}

impl CollisionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Resolves one overlap. A `StaleReference` error means the event was
    /// discarded without any state change.
    pub fn resolve(
        &mut self,
        ctx: &mut ResolveContext<'_>,
        overlap: Overlap,
    ) -> Result<Outcome, CoreError> {
        let result = self.decide(ctx.store, overlap).and_then(|outcome| {
            match outcome {
                Outcome::Kill { winner, loser } => Self::commit_kill(ctx, winner, loser)?,
                Outcome::Consumed { head, pickup } => Self::commit_consume(ctx, head, pickup)?,
                Outcome::Ignored => {}
            }
            Ok(outcome)
        });

        match &result {
            Ok(Outcome::Kill { .. }) => self.stats.kills += 1,
            Ok(Outcome::Consumed { .. }) => self.stats.consumed += 1,
            Ok(Outcome::Ignored) => self.stats.ignored += 1,
            Err(CoreError::StaleReference(id)) => {
                self.stats.stale += 1;
                debug!("Discarded stale overlap {:?} ({} out of play)", overlap, id);
            }
            Err(_) => {}
        }
        result
    }

    /// Picks the outcome without touching any state.
    fn decide(&self, store: &EntityStore, overlap: Overlap) -> Result<Outcome, CoreError> {
        let first = party(store, overlap.initiator)?;
        let second = party(store, overlap.other)?;

        let outcome = match (first, second) {
            (Party::Head { id: a, length: la }, Party::Head { id: b, length: lb }) => {
                if a == b {
                    Outcome::Ignored
                } else {
                    let (winner, loser) = head_to_head((a, la), (b, lb));
                    Outcome::Kill { winner, loser }
                }
            }
            (Party::Head { id: head, .. }, Party::Segment { head: owner, .. })
            | (Party::Segment { head: owner, .. }, Party::Head { id: head, .. }) => {
                if owner == head {
                    Outcome::Ignored
                } else {
                    Outcome::Kill {
                        winner: live_owner(store, owner)?,
                        loser: head,
                    }
                }
            }
            (Party::Head { id: head, .. }, Party::Pickup { id: pickup, .. })
            | (Party::Pickup { id: pickup, .. }, Party::Head { id: head, .. }) => {
                Outcome::Consumed { head, pickup }
            }
            (Party::Segment { head, .. }, Party::Pickup { id: pickup, .. })
            | (Party::Pickup { id: pickup, .. }, Party::Segment { head, .. }) => {
                Outcome::Consumed {
                    head: live_owner(store, head)?,
                    pickup,
                }
            }
            (Party::Segment { id: a, .. }, Party::Segment { id: b, .. }) => {
                debug!("No rule for segment {} touching segment {}", a, b);
                Outcome::Ignored
            }
            (Party::Pickup { id: a }, Party::Pickup { id: b }) => {
                debug!("No rule for pickup {} touching pickup {}", a, b);
                Outcome::Ignored
            }
        };
        Ok(outcome)
    }

    fn commit_kill(
        ctx: &mut ResolveContext<'_>,
        winner: EntityId,
        loser: EntityId,
    ) -> Result<(), CoreError> {
        let loser_alive_seq = match ctx.store.set_alive(loser, Role::Authority, false)? {
            Some(seq) => seq,
            None => return Err(CoreError::StaleReference(loser)),
        };
        body::set_visibility(ctx.store, loser, false)?;
        grow_capped(ctx.store, winner)?;

        let winner_owner = ctx.store.head(winner)?.owner;
        let loser_owner = ctx.store.head(loser)?.owner;
        ctx.notifier.notify(
            winner_owner,
            NotificationKind::AteOpponent,
            winner,
            loser,
            loser_alive_seq,
        );
        ctx.notifier.notify(
            loser_owner,
            NotificationKind::Eliminated,
            winner,
            loser,
            loser_alive_seq,
        );

        info!(
            "Head {} (client {}) eliminated head {} (client {})",
            winner, winner_owner, loser, loser_owner
        );
        Ok(())
    }

    fn commit_consume(
        ctx: &mut ResolveContext<'_>,
        head: EntityId,
        pickup: EntityId,
    ) -> Result<(), CoreError> {
        let slot = ctx.store.pickup(pickup)?.slot;
        grow_capped(ctx.store, head)?;
        ctx.pickups.release(slot, &mut *ctx.store)?;
        debug!("Head {} consumed pickup {}", head, pickup);
        Ok(())
    }
}

/// Grows `head` unless it is already at the maximum length, in which case the
/// rest of the outcome still commits.
fn grow_capped(store: &mut EntityStore, head: EntityId) -> Result<(), CoreError> {
    match body::grow(store, Role::Authority, head) {
        Ok(_) => Ok(()),
        Err(CoreError::LengthOverflow { max, .. }) => {
            warn!("Head {} is already at length {}, not growing", head, max);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

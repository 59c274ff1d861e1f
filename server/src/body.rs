//! Chain of segments trailing a head.
//!
//! A head's `length` counts the head itself, so a head of length `n` owns
//! `n - 1` segments. Each segment follows the entity directly ahead of it:
//! the first follows the head, every later one follows its predecessor.
//! Segments are only ever appended, which keeps the chain acyclic.

use log::debug;
use shared::{CoreError, EntityId, Role};

use crate::entity::{Entity, EntityStore, Segment};

/// Appends one segment to `head` and increments its length.
///
/// The new segment starts at the position of the current tail, or of the head
/// itself when the body is empty. Only the authority may grow a body.
pub fn grow(store: &mut EntityStore, caller: Role, head: EntityId) -> Result<EntityId, CoreError> {
    if caller != Role::Authority {
        return Err(CoreError::PermissionDenied {
            role: caller,
            operation: "grow a body",
        });
    }

    let (length, follow, index) = {
        let h = store.head(head)?;
        let follow = h.body.last().copied().unwrap_or(h.id);
        let overflow = CoreError::LengthOverflow {
            head,
            max: u16::MAX,
        };
        let length = h.length.get().checked_add(1).ok_or_else(|| overflow.clone())?;
        let index = u16::try_from(h.body.len() + 1).map_err(|_| overflow)?;
        (length, follow, index)
    };
    let spawn_at = store.position(follow)?;

    store.set_length(head, Role::Authority, length)?;

    let id = store.allocate_id();
    store.insert(Entity::Segment(Segment::new(id, head, follow, index, spawn_at)));
    store.head_mut(head)?.body.push(id);

    debug!("Head {} grew to length {} (segment {})", head, length, id);
    Ok(id)
}

/// Sets every segment of `head` visible or hidden. Returns how many changed.
pub fn set_visibility(
    store: &mut EntityStore,
    head: EntityId,
    visible: bool,
) -> Result<usize, CoreError> {
    let body = store.head(head)?.body.clone();
    let mut changed = 0;
    for segment in body {
        if store.set_visible(segment, Role::Authority, visible)?.is_some() {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Pulls each segment toward the entity it follows so that no gap in the
/// chain exceeds `spacing`. Segments are processed front to back, so a
/// segment always chases its leader's position from this tick.
pub fn follow(store: &mut EntityStore, head: EntityId, spacing: f32) -> Result<(), CoreError> {
    let body = store.head(head)?.body.clone();
    for id in body {
        let leader = store.segment(id)?.follow;
        let leader_pos = store.position(leader)?;
        let pos = store.position(id)?;

        if pos.distance(&leader_pos) > spacing {
            let offset = pos.sub(&leader_pos).normalize().scale(spacing);
            store.set_position(id, Role::Authority, leader_pos.add(&offset))?;
        }
    }
    Ok(())
}

/// The head followed by its segments in chain order.
pub fn chain(store: &EntityStore, head: EntityId) -> Result<Vec<EntityId>, CoreError> {
    let head = store.head(head)?;
    let mut chain = Vec::with_capacity(head.body.len() + 1);
    chain.push(head.id);
    chain.extend(head.body.iter().copied());
    Ok(chain)
}

/// Checks the follow links of `head`'s body: every segment follows the entry
/// directly ahead of it, carries its 1-based index, and was created after
/// its leader.
pub fn is_acyclic(store: &EntityStore, head: EntityId) -> Result<bool, CoreError> {
    let chain = chain(store, head)?;
    for (position, pair) in chain.windows(2).enumerate() {
        let (leader, id) = (pair[0], pair[1]);
        let segment = store.segment(id)?;
        if segment.head != head
            || segment.follow != leader
            || usize::from(segment.index) != position + 1
            || segment.id <= leader
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Despawns every segment of `head`. Returns how many were removed.
pub fn dissolve(store: &mut EntityStore, head: EntityId) -> Result<usize, CoreError> {
    let body = std::mem::take(&mut store.head_mut(head)?.body);
    let removed = body
        .into_iter()
        .filter(|segment| store.remove(*segment).is_some())
        .count();
    Ok(removed)
}

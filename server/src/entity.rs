//! Authoritative entity registry.
//!
//! Entities are a closed set of kinds held in one ordered map. Every write to
//! a replicated field goes through [`EntityStore`], which checks the field's
//! write policy and, for everyone-readable fields, queues the committed value
//! for fan-out. The queue is drained once per tick, so the order of the
//! replication stream is exactly the order of commits.

use log::error;
use shared::{
    ClientId, CoreError, EntityId, EntityKind, EntitySnapshot, FieldState, FieldValue, Pose,
    ReadPolicy, Replicated, Replication, Role, VarUpdate, Vec2, WritePolicy,
};
use std::collections::BTreeMap;

use crate::pool::{PoolHost, PoolSlot};

#[derive(Debug)]
pub struct Head {
    pub id: EntityId,
    pub owner: ClientId,
    pub position: Replicated<Vec2>,
    pub rotation: Replicated<f32>,
    pub alive: Replicated<bool>,
    pub length: Replicated<u16>,
    /// Steering target from the owner's last accepted intent. Never fanned out
    pub target: Replicated<Vec2>,
    /// Segment ids, nearest to the head first
    pub body: Vec<EntityId>,
    /// Distance moved during the last tick
    pub last_step: f32,
}

impl Head {
    pub fn new(id: EntityId, owner: ClientId, position: Vec2) -> Self {
        Self {
            id,
            owner,
            position: Replicated::server_owned(position),
            rotation: Replicated::server_owned(0.0),
            alive: Replicated::server_owned(true),
            length: Replicated::server_owned(1),
            target: Replicated::new(position, ReadPolicy::AuthorityOnly, WritePolicy::OwnerOnly)
                .owned_by(owner),
            body: Vec::new(),
            last_step: 0.0,
        }
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.get()
    }
}

#[derive(Debug)]
pub struct Segment {
    pub id: EntityId,
    pub head: EntityId,
    pub follow: EntityId,
    pub index: u16,
    pub position: Replicated<Vec2>,
    pub visible: Replicated<bool>,
}

impl Segment {
    pub fn new(id: EntityId, head: EntityId, follow: EntityId, index: u16, position: Vec2) -> Self {
        Self {
            id,
            head,
            follow,
            index,
            position: Replicated::server_owned(position),
            visible: Replicated::server_owned(true),
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.get()
    }
}

#[derive(Debug)]
pub struct Pickup {
    pub id: EntityId,
    pub slot: PoolSlot,
    pub position: Replicated<Vec2>,
    pub active: Replicated<bool>,
}

impl Pickup {
    pub fn is_active(&self) -> bool {
        *self.active.get()
    }
}

#[derive(Debug)]
pub enum Entity {
    Head(Head),
    Segment(Segment),
    Pickup(Pickup),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Head(head) => head.id,
            Entity::Segment(segment) => segment.id,
            Entity::Pickup(pickup) => pickup.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Head(head) => EntityKind::Head { owner: head.owner },
            Entity::Segment(segment) => EntityKind::Segment {
                head: segment.head,
                follow: segment.follow,
                index: segment.index,
            },
            Entity::Pickup(pickup) => EntityKind::Pickup {
                slot: pickup.slot.0,
            },
        }
    }

    pub fn position(&self) -> Vec2 {
        match self {
            Entity::Head(head) => *head.position.get(),
            Entity::Segment(segment) => *segment.position.get(),
            Entity::Pickup(pickup) => *pickup.position.get(),
        }
    }

    /// Everyone-readable fields with their current sequence numbers.
    pub fn snapshot(&self) -> EntitySnapshot {
        fn state<T: Clone + PartialEq>(
            var: &Replicated<T>,
            wire: fn(T) -> FieldValue,
        ) -> FieldState {
            FieldState {
                seq: var.seq(),
                value: wire(var.get().clone()),
            }
        }

        let fields = match self {
            Entity::Head(head) => vec![
                state(&head.position, FieldValue::Position),
                state(&head.rotation, FieldValue::Rotation),
                state(&head.alive, FieldValue::Alive),
                state(&head.length, FieldValue::Length),
            ],
            Entity::Segment(segment) => vec![
                state(&segment.position, FieldValue::Position),
                state(&segment.visible, FieldValue::Visible),
            ],
            Entity::Pickup(pickup) => vec![
                state(&pickup.position, FieldValue::Position),
                state(&pickup.active, FieldValue::Active),
            ],
        };

        EntitySnapshot {
            id: self.id(),
            kind: self.kind(),
            fields,
        }
    }
}

fn position_of(entity: &mut Entity) -> Option<&mut Replicated<Vec2>> {
    match entity {
        Entity::Head(head) => Some(&mut head.position),
        Entity::Segment(segment) => Some(&mut segment.position),
        Entity::Pickup(pickup) => Some(&mut pickup.position),
    }
}

fn rotation_of(entity: &mut Entity) -> Option<&mut Replicated<f32>> {
    match entity {
        Entity::Head(head) => Some(&mut head.rotation),
        _ => None,
    }
}

fn alive_of(entity: &mut Entity) -> Option<&mut Replicated<bool>> {
    match entity {
        Entity::Head(head) => Some(&mut head.alive),
        _ => None,
    }
}

fn length_of(entity: &mut Entity) -> Option<&mut Replicated<u16>> {
    match entity {
        Entity::Head(head) => Some(&mut head.length),
        _ => None,
    }
}

fn target_of(entity: &mut Entity) -> Option<&mut Replicated<Vec2>> {
    match entity {
        Entity::Head(head) => Some(&mut head.target),
        _ => None,
    }
}

fn visible_of(entity: &mut Entity) -> Option<&mut Replicated<bool>> {
    match entity {
        Entity::Segment(segment) => Some(&mut segment.visible),
        _ => None,
    }
}

fn active_of(entity: &mut Entity) -> Option<&mut Replicated<bool>> {
    match entity {
        Entity::Pickup(pickup) => Some(&mut pickup.active),
        _ => None,
    }
}

#[derive(Debug)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, Entity>,
    next_id: u32,
    outbox: Vec<Replication>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
            outbox: Vec::new(),
        }
    }

    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds an entity and queues its spawn for every participant.
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        let id = entity.id();
        self.outbox.push(Replication::Spawn(entity.snapshot()));
        self.entities.insert(id, entity);
        id
    }

    /// Removes an entity and queues its despawn.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            self.outbox.push(Replication::Despawn(id));
        }
        removed
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn position(&self, id: EntityId) -> Result<Vec2, CoreError> {
        self.get(id)
            .map(Entity::position)
            .ok_or(CoreError::StaleReference(id))
    }

    pub fn head(&self, id: EntityId) -> Result<&Head, CoreError> {
        match self.entities.get(&id) {
            Some(Entity::Head(head)) => Ok(head),
            Some(_) => Err(CoreError::WrongKind {
                entity: id,
                expected: "head",
            }),
            None => Err(CoreError::StaleReference(id)),
        }
    }

    /// Mutable access for fields that are not replicated (body list, step).
    pub(crate) fn head_mut(&mut self, id: EntityId) -> Result<&mut Head, CoreError> {
        match self.entities.get_mut(&id) {
            Some(Entity::Head(head)) => Ok(head),
            Some(_) => Err(CoreError::WrongKind {
                entity: id,
                expected: "head",
            }),
            None => Err(CoreError::StaleReference(id)),
        }
    }

    pub fn segment(&self, id: EntityId) -> Result<&Segment, CoreError> {
        match self.entities.get(&id) {
            Some(Entity::Segment(segment)) => Ok(segment),
            Some(_) => Err(CoreError::WrongKind {
                entity: id,
                expected: "segment",
            }),
            None => Err(CoreError::StaleReference(id)),
        }
    }

    pub fn pickup(&self, id: EntityId) -> Result<&Pickup, CoreError> {
        match self.entities.get(&id) {
            Some(Entity::Pickup(pickup)) => Ok(pickup),
            Some(_) => Err(CoreError::WrongKind {
                entity: id,
                expected: "pickup",
            }),
            None => Err(CoreError::StaleReference(id)),
        }
    }

    pub fn heads(&self) -> impl Iterator<Item = &Head> {
        self.entities.values().filter_map(|entity| match entity {
            Entity::Head(head) => Some(head),
            _ => None,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.entities.values().filter_map(|entity| match entity {
            Entity::Segment(segment) => Some(segment),
            _ => None,
        })
    }

    pub fn pickups(&self) -> impl Iterator<Item = &Pickup> {
        self.entities.values().filter_map(|entity| match entity {
            Entity::Pickup(pickup) => Some(pickup),
            _ => None,
        })
    }

    pub fn head_of(&self, owner: ClientId) -> Option<EntityId> {
        self.heads().find(|head| head.owner == owner).map(|head| head.id)
    }

    pub fn set_position(
        &mut self,
        id: EntityId,
        caller: Role,
        value: Vec2,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "positioned entity", position_of, FieldValue::Position)
    }

    pub fn set_rotation(
        &mut self,
        id: EntityId,
        caller: Role,
        value: f32,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "head", rotation_of, FieldValue::Rotation)
    }

    pub fn set_alive(
        &mut self,
        id: EntityId,
        caller: Role,
        value: bool,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "head", alive_of, FieldValue::Alive)
    }

    pub fn set_length(
        &mut self,
        id: EntityId,
        caller: Role,
        value: u16,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "head", length_of, FieldValue::Length)
    }

    /// Owner-written steering target. Not readable by participants, so it is
    /// never queued for fan-out.
    pub fn set_target(
        &mut self,
        id: EntityId,
        caller: Role,
        value: Vec2,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "head", target_of, FieldValue::Position)
    }

    pub fn set_visible(
        &mut self,
        id: EntityId,
        caller: Role,
        value: bool,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "segment", visible_of, FieldValue::Visible)
    }

    pub fn set_active(
        &mut self,
        id: EntityId,
        caller: Role,
        value: bool,
    ) -> Result<Option<u32>, CoreError> {
        self.commit(id, caller, value, "pickup", active_of, FieldValue::Active)
    }

    fn commit<T: Clone + PartialEq>(
        &mut self,
        id: EntityId,
        caller: Role,
        value: T,
        expected: &'static str,
        select: fn(&mut Entity) -> Option<&mut Replicated<T>>,
        wire: fn(T) -> FieldValue,
    ) -> Result<Option<u32>, CoreError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(CoreError::StaleReference(id))?;
        let var = select(entity).ok_or(CoreError::WrongKind {
            entity: id,
            expected,
        })?;

        let committed = var.set(caller, value.clone())?;
        if let Some(seq) = committed {
            if var.read_policy() == ReadPolicy::Everyone {
                self.outbox.push(Replication::Update(VarUpdate {
                    entity: id,
                    seq,
                    value: wire(value),
                }));
            }
        }
        Ok(committed)
    }

    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        self.entities.values().map(Entity::snapshot).collect()
    }

    /// Takes the replication events committed since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<Replication> {
        std::mem::take(&mut self.outbox)
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolHost<EntityId> for EntityStore {
    fn create(&mut self, slot: PoolSlot) -> EntityId {
        let id = self.allocate_id();
        self.insert(Entity::Pickup(Pickup {
            id,
            slot,
            position: Replicated::server_owned(Vec2::ZERO),
            active: Replicated::server_owned(false),
        }))
    }

    fn activate(&mut self, item: &EntityId, pose: Pose) {
        let result = self
            .set_position(*item, Role::Authority, pose.position)
            .and_then(|_| self.set_active(*item, Role::Authority, true));
        if let Err(e) = result {
            error!("Failed to activate pooled pickup {}: {}", item, e);
        }
    }

    fn deactivate(&mut self, item: &EntityId) {
        if let Err(e) = self.set_active(*item, Role::Authority, false) {
            error!("Failed to deactivate pooled pickup {}: {}", item, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_head(owner: ClientId) -> (EntityStore, EntityId) {
        let mut store = EntityStore::new();
        let id = store.allocate_id();
        store.insert(Entity::Head(Head::new(id, owner, Vec2::new(1.0, 1.0))));
        store.drain_outbox();
        (store, id)
    }

    #[test]
    fn test_insert_queues_spawn() {
        let mut store = EntityStore::new();
        let id = store.allocate_id();
        store.insert(Entity::Head(Head::new(id, 1, Vec2::ZERO)));

        let events = store.drain_outbox();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Replication::Spawn(snapshot) => {
                assert_eq!(snapshot.id, id);
                assert_eq!(snapshot.kind, EntityKind::Head { owner: 1 });
                assert_eq!(snapshot.fields.len(), 4);
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(store.drain_outbox().is_empty());
    }

    #[test]
    fn test_public_write_is_queued_in_commit_order() {
        let (mut store, id) = store_with_head(1);

        store.set_length(id, Role::Authority, 2).unwrap();
        store.set_alive(id, Role::Authority, false).unwrap();

        let events = store.drain_outbox();
        let values: Vec<FieldValue> = events
            .iter()
            .map(|event| match event {
                Replication::Update(update) => update.value,
                other => panic!("Unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            values,
            vec![FieldValue::Length(2), FieldValue::Alive(false)]
        );
    }

    #[test]
    fn test_target_is_owner_written_and_never_fanned_out() {
        let (mut store, id) = store_with_head(5);

        assert!(store
            .set_target(id, Role::Participant(5), Vec2::new(3.0, 3.0))
            .is_ok());
        assert!(matches!(
            store.set_target(id, Role::Participant(6), Vec2::ZERO),
            Err(CoreError::PermissionDenied { .. })
        ));
        assert!(store.drain_outbox().is_empty());
        assert_eq!(*store.head(id).unwrap().target.get(), Vec2::new(3.0, 3.0));
    }

    #[test]
    fn test_rejected_write_leaves_value_and_outbox_untouched() {
        let (mut store, id) = store_with_head(1);

        let result = store.set_alive(id, Role::Participant(1), false);

        assert!(matches!(result, Err(CoreError::PermissionDenied { .. })));
        assert!(store.head(id).unwrap().is_alive());
        assert!(store.drain_outbox().is_empty());
    }

    #[test]
    fn test_missing_and_wrong_kind_references() {
        let (mut store, id) = store_with_head(1);

        assert_eq!(
            store.set_alive(EntityId(99), Role::Authority, false),
            Err(CoreError::StaleReference(EntityId(99)))
        );
        assert!(matches!(
            store.set_visible(id, Role::Authority, false),
            Err(CoreError::WrongKind { .. })
        ));
        assert!(matches!(store.segment(id), Err(CoreError::WrongKind { .. })));
    }

    #[test]
    fn test_remove_queues_despawn() {
        let (mut store, id) = store_with_head(1);

        assert!(store.remove(id).is_some());
        assert!(store.remove(id).is_none());
        assert_eq!(store.drain_outbox(), vec![Replication::Despawn(id)]);
    }

    #[test]
    fn test_head_of_owner() {
        let (store, id) = store_with_head(8);

        assert_eq!(store.head_of(8), Some(id));
        assert_eq!(store.head_of(9), None);
    }
}

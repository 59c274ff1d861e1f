//! Read-only mirror of the authoritative world.
//!
//! Every mirrored field is a [`Replicated`] copy that only accepts updates
//! with a newer sequence number than the one it holds, so duplicated or
//! reordered datagrams never roll a field back. Change observers push into a
//! local queue that the client drains once per frame.
//!
//! Notifications are parked until the loser's `alive = false` commit has been
//! applied, so a replica never reports an outcome its own state does not
//! show yet. A loser this replica has never mirrored keeps its notification
//! parked until the loser is despawned here or a complete snapshot leaves it
//! out.

use log::debug;
use shared::{
    ClientId, EntityId, EntityKind, EntitySnapshot, Field, FieldValue, Notification, Replicated,
    Replication, Vec2,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::f32::consts::{PI, TAU};
use tokio::sync::mpsc;

/// Something a replica observed, in the order it was applied
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    Spawned {
        id: EntityId,
        kind: EntityKind,
    },
    Changed {
        id: EntityId,
        previous: FieldValue,
        current: FieldValue,
    },
    Despawned {
        id: EntityId,
    },
    /// A notification whose ordering gate has opened
    Notified(Notification),
}

#[derive(Debug)]
pub struct MirrorEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    fields: BTreeMap<Field, Replicated<FieldValue>>,
    /// Tick of the snapshot or delta that first created this mirror
    pub spawn_tick: u32,
    /// Smoothed position for presentation
    pub display_position: Vec2,
    pub display_rotation: f32,
}

impl MirrorEntity {
    fn new(
        snapshot: &EntitySnapshot,
        tick: u32,
        events: &mpsc::UnboundedSender<ReplicaEvent>,
    ) -> Self {
        let mut entity = Self {
            id: snapshot.id,
            kind: snapshot.kind,
            fields: BTreeMap::new(),
            spawn_tick: tick,
            display_position: Vec2::ZERO,
            display_rotation: 0.0,
        };
        for state in &snapshot.fields {
            entity.apply(state.seq, state.value, events);
        }
        entity.display_position = entity.position();
        entity.display_rotation = entity.rotation();
        entity
    }

    /// Applies one field update. Returns false if it was stale.
    fn apply(
        &mut self,
        seq: u32,
        value: FieldValue,
        events: &mpsc::UnboundedSender<ReplicaEvent>,
    ) -> bool {
        let field = value.field();
        match self.fields.get_mut(&field) {
            Some(var) => var.apply(seq, value),
            None => {
                let mut var = Replicated::mirrored(value, seq);
                let id = self.id;
                let events = events.clone();
                var.observe(move |previous, current| {
                    // The receiver lives as long as the world that owns this var
                    let _ = events.send(ReplicaEvent::Changed {
                        id,
                        previous: *previous,
                        current: *current,
                    });
                });
                self.fields.insert(field, var);
                true
            }
        }
    }

    pub fn field(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field).map(|var| var.get())
    }

    pub fn seq(&self, field: Field) -> Option<u32> {
        self.fields.get(&field).map(|var| var.seq())
    }

    pub fn position(&self) -> Vec2 {
        match self.field(Field::Position) {
            Some(FieldValue::Position(p)) => *p,
            _ => Vec2::ZERO,
        }
    }

    pub fn rotation(&self) -> f32 {
        match self.field(Field::Rotation) {
            Some(FieldValue::Rotation(r)) => *r,
            _ => 0.0,
        }
    }

    pub fn alive(&self) -> Option<bool> {
        match self.field(Field::Alive) {
            Some(FieldValue::Alive(alive)) => Some(*alive),
            _ => None,
        }
    }

    pub fn length(&self) -> Option<u16> {
        match self.field(Field::Length) {
            Some(FieldValue::Length(length)) => Some(*length),
            _ => None,
        }
    }

    pub fn visible(&self) -> Option<bool> {
        match self.field(Field::Visible) {
            Some(FieldValue::Visible(visible)) => Some(*visible),
            _ => None,
        }
    }

    pub fn active(&self) -> Option<bool> {
        match self.field(Field::Active) {
            Some(FieldValue::Active(active)) => Some(*active),
            _ => None,
        }
    }
}

/// Parts of one snapshot tick received so far
#[derive(Debug)]
struct SnapshotProgress {
    tick: u32,
    parts: BTreeSet<u16>,
    seen: HashSet<EntityId>,
}

pub struct ReplicaWorld {
    pub client_id: Option<ClientId>,
    pub head: Option<EntityId>,
    pub last_tick: u32,
    entities: BTreeMap<EntityId, MirrorEntity>,
    /// Despawned ids with the tick that removed them
    tombstones: BTreeMap<EntityId, u32>,
    snapshot: Option<SnapshotProgress>,
    /// Newest snapshot tick with every part applied
    completed_tick: Option<u32>,
    parked: Vec<Notification>,
    seen_notifications: HashSet<u64>,
    events_tx: mpsc::UnboundedSender<ReplicaEvent>,
    events_rx: mpsc::UnboundedReceiver<ReplicaEvent>,
}

impl ReplicaWorld {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client_id: None,
            head: None,
            last_tick: 0,
            entities: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            snapshot: None,
            completed_tick: None,
            parked: Vec::new(),
            seen_notifications: HashSet::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn set_identity(&mut self, client_id: ClientId, head: EntityId) {
        self.client_id = Some(client_id);
        self.head = Some(head);
    }

    pub fn entity(&self, id: EntityId) -> Option<&MirrorEntity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &MirrorEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn own_head(&self) -> Option<&MirrorEntity> {
        self.head.and_then(|id| self.entities.get(&id))
    }

    /// False once the own head has been observed dead.
    pub fn is_alive(&self) -> bool {
        self.own_head()
            .and_then(MirrorEntity::alive)
            .unwrap_or(true)
    }

    pub fn parked_notifications(&self) -> usize {
        self.parked.len()
    }

    /// Upserts one snapshot part. Once every part of a tick has arrived,
    /// mirrors that tick did not mention are dropped. Parts of a tick at or
    /// before the last completed snapshot are ignored.
    pub fn apply_snapshot(&mut self, tick: u32, part: u16, parts: u16, entities: Vec<EntitySnapshot>) {
        self.last_tick = self.last_tick.max(tick);

        if self.completed_tick.map_or(false, |done| tick <= done) {
            debug!("Ignoring part of snapshot {} older than a completed one", tick);
            return;
        }

        let mut progress = match self.snapshot.take() {
            Some(progress) if progress.tick == tick => progress,
            Some(progress) if progress.tick > tick => {
                debug!("Ignoring part of superseded snapshot {}", tick);
                self.snapshot = Some(progress);
                return;
            }
            _ => SnapshotProgress {
                tick,
                parts: BTreeSet::new(),
                seen: HashSet::new(),
            },
        };
        progress.parts.insert(part);

        for snapshot in entities {
            progress.seen.insert(snapshot.id);
            self.upsert(snapshot, tick);
        }

        if progress.parts.len() >= usize::from(parts) {
            self.prune(tick, &progress.seen);
            self.tombstones.retain(|_, removed| *removed > tick);
            self.completed_tick = Some(tick);
            self.release_notifications(Some(&progress.seen));
        } else {
            self.snapshot = Some(progress);
            self.release_notifications(None);
        }
    }

    /// Applies one tick's replication events in commit order.
    pub fn apply_delta(&mut self, tick: u32, events: Vec<Replication>) {
        self.last_tick = self.last_tick.max(tick);

        for event in events {
            match event {
                Replication::Spawn(snapshot) => self.upsert(snapshot, tick),
                Replication::Update(update) => match self.entities.get_mut(&update.entity) {
                    Some(entity) => {
                        entity.apply(update.seq, update.value, &self.events_tx);
                    }
                    None => debug!("Update for unknown entity {}", update.entity),
                },
                Replication::Despawn(id) => self.despawn(id, tick),
            }
        }

        self.release_notifications(None);
    }

    /// Accepts a notification from the authority. Returns false for a
    /// duplicate. Either way the caller should acknowledge it.
    pub fn receive_notification(&mut self, notification: Notification) -> bool {
        if !self.seen_notifications.insert(notification.id) {
            return false;
        }
        self.parked.push(notification);
        self.release_notifications(None);
        true
    }

    /// Moves each display pose toward its replicated value.
    pub fn interpolate(&mut self, dt: f32, rate: f32) {
        let t = (rate * dt).clamp(0.0, 1.0);
        for entity in self.entities.values_mut() {
            let target = entity.position();
            entity.display_position = entity.display_position.lerp(&target, t);
            let turn = wrap_angle(entity.rotation() - entity.display_rotation);
            entity.display_rotation = wrap_angle(entity.display_rotation + turn * t);
        }
    }

    /// Closest active pickup to `from`.
    pub fn nearest_pickup(&self, from: &Vec2) -> Option<(EntityId, Vec2)> {
        self.entities
            .values()
            .filter(|entity| matches!(entity.kind, EntityKind::Pickup { .. }))
            .filter(|entity| entity.active() == Some(true))
            .map(|entity| (entity.id, entity.position()))
            .min_by(|(_, a), (_, b)| from.distance(a).total_cmp(&from.distance(b)))
    }

    /// Events observed since the last drain, in application order.
    pub fn drain_events(&mut self) -> Vec<ReplicaEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn upsert(&mut self, snapshot: EntitySnapshot, tick: u32) {
        if let Some(removed) = self.tombstones.get(&snapshot.id) {
            if *removed > tick {
                debug!("Skipping {} despawned at tick {}", snapshot.id, removed);
                return;
            }
        }

        match self.entities.get_mut(&snapshot.id) {
            Some(entity) => {
                for state in snapshot.fields {
                    entity.apply(state.seq, state.value, &self.events_tx);
                }
            }
            None => {
                let entity = MirrorEntity::new(&snapshot, tick, &self.events_tx);
                self.notify_local(ReplicaEvent::Spawned {
                    id: snapshot.id,
                    kind: snapshot.kind,
                });
                self.entities.insert(snapshot.id, entity);
            }
        }
    }

    fn despawn(&mut self, id: EntityId, tick: u32) {
        self.tombstones.insert(id, tick);
        if self.entities.remove(&id).is_some() {
            self.notify_local(ReplicaEvent::Despawned { id });
        }
    }

    fn prune(&mut self, tick: u32, seen: &HashSet<EntityId>) {
        let stale: Vec<EntityId> = self
            .entities
            .values()
            .filter(|entity| entity.spawn_tick <= tick && !seen.contains(&entity.id))
            .map(|entity| entity.id)
            .collect();
        for id in stale {
            debug!("Snapshot {} no longer contains {}", tick, id);
            self.despawn(id, tick);
        }
    }

    /// Releases parked notifications whose loser no longer reads as alive
    /// here. A mirrored loser must have applied the `alive` commit. A loser
    /// that is not mirrored must have been despawned here, or be missing from
    /// the snapshot whose `completed` id set is passed in.
    fn release_notifications(&mut self, completed: Option<&HashSet<EntityId>>) {
        let entities = &self.entities;
        let tombstones = &self.tombstones;
        let (ready, parked): (Vec<Notification>, Vec<Notification>) =
            self.parked.drain(..).partition(|notification| {
                let loser = notification.loser;
                match entities.get(&loser) {
                    Some(mirror) => mirror
                        .seq(Field::Alive)
                        .map_or(false, |seq| seq >= notification.loser_alive_seq),
                    None => {
                        tombstones.contains_key(&loser)
                            || completed.map_or(false, |seen| !seen.contains(&loser))
                    }
                }
            });
        self.parked = parked;

        for notification in ready {
            self.notify_local(ReplicaEvent::Notified(notification));
        }
    }

    fn notify_local(&self, event: ReplicaEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Folds an angle into `[-PI, PI)`.
fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

impl Default for ReplicaWorld {
    fn default() -> Self {
        Self::new()
    }
}

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    ClientId, CoreError, EntityId, EntitySnapshot, GameConfig, Intent, Notification, Pose,
    Replication, Role, Vec2, TURN_DEADZONE,
};

use crate::body;
use crate::collision::{CollisionResolver, Outcome, Overlap, ResolveContext, ResolverStats};
use crate::entity::{Entity, EntityStore, Head};
use crate::notifier::Notifier;
use crate::physics::{detect_overlaps, Radii};
use crate::pool::{CapacityPolicy, EntityPool};

/// The authoritative world. Mutated only from the server's tick loop.
#[derive(Debug)]
pub struct GameState {
    pub tick: u32,
    config: GameConfig,
    store: EntityStore,
    pickups: EntityPool<EntityId>,
    resolver: CollisionResolver,
    notifier: Notifier,
    rng: StdRng,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic spawn placement, for tests and replays.
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, rng: StdRng) -> Self {
        let mut store = EntityStore::new();
        let pickups =
            EntityPool::initialize(config.pickup_capacity, CapacityPolicy::Fixed, &mut store);

        Self {
            tick: 0,
            config,
            store,
            pickups,
            resolver: CollisionResolver::new(),
            notifier: Notifier::new(),
            rng,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn pickups(&self) -> &EntityPool<EntityId> {
        &self.pickups
    }

    pub fn resolver_stats(&self) -> ResolverStats {
        self.resolver.stats()
    }

    pub fn random_position(&mut self) -> Vec2 {
        let b = self.config.bounds;
        Vec2::new(
            self.rng.gen_range(b.min_x..=b.max_x),
            self.rng.gen_range(b.min_y..=b.max_y),
        )
    }

    /// Creates a head for `client_id` at a random position in bounds.
    pub fn add_player(&mut self, client_id: ClientId) -> EntityId {
        let position = self.random_position();
        self.add_player_at(client_id, position)
    }

    pub fn add_player_at(&mut self, client_id: ClientId, position: Vec2) -> EntityId {
        if self.store.head_of(client_id).is_some() {
            warn!("Client {} already has a head, replacing it", client_id);
            self.remove_player(&client_id);
        }

        let position = self.config.bounds.clamp(&position);
        let id = self.store.allocate_id();
        self.store
            .insert(Entity::Head(Head::new(id, client_id, position)));

        info!(
            "Added head {} for client {} at ({:.2}, {:.2})",
            id, client_id, position.x, position.y
        );
        id
    }

    /// Despawns the client's head and every segment it owns.
    pub fn remove_player(&mut self, client_id: &ClientId) -> bool {
        let Some(head) = self.store.head_of(*client_id) else {
            return false;
        };

        let segments = body::dissolve(&mut self.store, head).unwrap_or(0);
        self.store.remove(head);
        info!(
            "Removed head {} of client {} with {} segments",
            head, client_id, segments
        );
        true
    }

    pub fn head_of(&self, client_id: ClientId) -> Option<EntityId> {
        self.store.head_of(client_id)
    }

    /// Records the steering target from an intent.
    ///
    /// The target is written as the sender, so the head's owner-only write
    /// policy rejects impersonation. Intents for a dead head are accepted and
    /// ignored.
    pub fn submit_intent(&mut self, client_id: ClientId, intent: &Intent) -> Result<(), CoreError> {
        let unauthorized = CoreError::UnauthorizedIntent {
            client: client_id,
            entity: intent.head,
        };

        let alive = match self.store.head(intent.head) {
            Ok(head) => head.is_alive(),
            Err(CoreError::WrongKind { .. }) => return Err(unauthorized),
            Err(e) => return Err(e),
        };
        if !alive {
            return Ok(());
        }

        let target = self.config.bounds.clamp(&intent.target);
        match self
            .store
            .set_target(intent.head, Role::Participant(client_id), target)
        {
            Ok(_) => Ok(()),
            Err(CoreError::PermissionDenied { .. }) => Err(unauthorized),
            Err(e) => Err(e),
        }
    }

    /// Moves every live head toward its target at no more than
    /// `move_speed * dt`, then drags each body along behind it.
    pub fn update_positions(&mut self, dt: f32) {
        let max_step = self.config.move_speed * dt;
        let moving: Vec<(EntityId, Vec2, Vec2)> = self
            .store
            .heads()
            .filter(|head| head.is_alive())
            .map(|head| (head.id, *head.position.get(), *head.target.get()))
            .collect();

        for (id, position, target) in moving {
            let next = self
                .config
                .bounds
                .clamp(&position.move_towards(&target, max_step));

            let result = self
                .store
                .set_position(id, Role::Authority, next)
                .and_then(|_| {
                    if target.distance(&next) > TURN_DEADZONE {
                        let heading = target.sub(&next).angle();
                        self.store.set_rotation(id, Role::Authority, heading)?;
                    }
                    self.store.head_mut(id)?.last_step = next.distance(&position);
                    body::follow(&mut self.store, id, self.config.segment_spacing)
                });
            if let Err(e) = result {
                warn!("Failed to move head {}: {}", id, e);
            }
        }
    }

    /// Resolves a single overlap event.
    pub fn resolve(&mut self, overlap: Overlap) -> Result<Outcome, CoreError> {
        let mut ctx = ResolveContext {
            store: &mut self.store,
            pickups: &mut self.pickups,
            notifier: &mut self.notifier,
        };
        self.resolver.resolve(&mut ctx, overlap)
    }

    /// One simulation step: movement, overlap detection, then resolution of
    /// each overlap in detection order.
    pub fn step(&mut self, dt: f32) -> Vec<Outcome> {
        self.update_positions(dt);

        let overlaps = detect_overlaps(&self.store, Radii::from(&self.config));
        let mut outcomes = Vec::new();
        for overlap in overlaps {
            match self.resolve(overlap) {
                Ok(Outcome::Ignored) => {}
                Ok(outcome) => outcomes.push(outcome),
                Err(CoreError::StaleReference(_)) => {}
                Err(e) => warn!("Failed to resolve {:?}: {}", overlap, e),
            }
        }
        outcomes
    }

    /// Grows `head` by one segment as the authority.
    pub fn grow(&mut self, head: EntityId) -> Result<EntityId, CoreError> {
        body::grow(&mut self.store, Role::Authority, head)
    }

    /// Activates one pooled pickup at a random position in bounds.
    pub fn spawn_pickup(&mut self) -> Result<EntityId, CoreError> {
        let position = self.random_position();
        self.spawn_pickup_at(position)
    }

    pub fn spawn_pickup_at(&mut self, position: Vec2) -> Result<EntityId, CoreError> {
        let (slot, id) = self.pickups.acquire(Pose::at(position), &mut self.store)?;
        debug!("Spawned pickup {} in slot {}", id, slot.0);
        Ok(id)
    }

    /// Returns every active pickup to the pool.
    pub fn release_all_pickups(&mut self) -> usize {
        let active = self.pickups.active_items();
        let mut released = 0;
        for (slot, _) in active {
            if self.pickups.release(slot, &mut self.store).is_ok() {
                released += 1;
            }
        }
        released
    }

    pub fn active_pickups(&self) -> usize {
        self.pickups.active_count()
    }

    pub fn drain_replication(&mut self) -> Vec<Replication> {
        self.store.drain_outbox()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifier.drain()
    }

    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        self.store.snapshot()
    }
}

//! Round start, join and leave handling, and the periodic pickup spawner.
//!
//! The spawner is a separate tokio task that never touches game state. It
//! only posts `SpawnTick` into the server's message queue, so every pool
//! mutation still happens on the tick loop. The task watches the
//! connected-participant count and exits as soon as it reaches zero; the
//! next join spawns a fresh one.

use log::{debug, info, warn};
use shared::{ClientId, CoreError, EntityId};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::game::GameState;
use crate::network::ServerMessage;

pub struct Lifecycle {
    spawn_interval: Duration,
    participants: watch::Sender<usize>,
    spawn_task: Option<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn new(spawn_interval: Duration) -> Self {
        let (participants, _) = watch::channel(0);
        Self {
            spawn_interval,
            participants,
            spawn_task: None,
        }
    }

    /// Activates the initial pickup batch. Returns how many were spawned.
    pub fn on_start(&self, game: &mut GameState) -> usize {
        let batch = game.config().initial_pickups;
        let mut spawned = 0;
        for _ in 0..batch {
            match game.spawn_pickup() {
                Ok(_) => spawned += 1,
                Err(e) => {
                    warn!("Initial pickup batch stopped early: {}", e);
                    break;
                }
            }
        }
        info!("Round started with {} pickups", spawned);
        spawned
    }

    /// Creates the participant's head and makes sure the spawner runs.
    pub fn on_join(
        &mut self,
        game: &mut GameState,
        client_id: ClientId,
        connected: usize,
        tx: &mpsc::UnboundedSender<ServerMessage>,
    ) -> EntityId {
        let head = game.add_player(client_id);
        self.set_participants(connected, tx);
        head
    }

    /// Destroys the participant's head and body.
    pub fn on_leave(
        &mut self,
        game: &mut GameState,
        client_id: ClientId,
        connected: usize,
        tx: &mpsc::UnboundedSender<ServerMessage>,
    ) -> bool {
        let removed = game.remove_player(&client_id);
        self.set_participants(connected, tx);
        removed
    }

    /// Tops active pickups up by one while anyone is connected.
    pub fn on_spawn_tick(&self, game: &mut GameState) -> Option<EntityId> {
        if self.participants() == 0 {
            return None;
        }
        if game.active_pickups() >= game.config().pickup_capacity {
            return None;
        }

        match game.spawn_pickup() {
            Ok(id) => Some(id),
            Err(CoreError::PoolExhausted { .. }) => None,
            Err(e) => {
                warn!("Pickup spawn failed: {}", e);
                None
            }
        }
    }

    pub fn participants(&self) -> usize {
        *self.participants.borrow()
    }

    pub fn is_spawning(&self) -> bool {
        self.spawn_task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Publishes the participant count and starts the spawner if it is needed
    /// and not already running.
    pub fn set_participants(&mut self, count: usize, tx: &mpsc::UnboundedSender<ServerMessage>) {
        self.participants.send_replace(count);

        if count > 0 && !self.is_spawning() {
            debug!("Starting pickup spawn loop for {} participants", count);
            self.spawn_task = Some(tokio::spawn(run_spawn_loop(
                self.spawn_interval,
                self.participants.subscribe(),
                tx.clone(),
            )));
        }
    }

    /// Stops the spawner and returns every pickup to the pool.
    pub fn shutdown(&mut self, game: &mut GameState) {
        self.participants.send_replace(0);
        if let Some(task) = self.spawn_task.take() {
            task.abort();
        }
        let released = game.release_all_pickups();
        info!("Lifecycle shut down, released {} pickups", released);
    }
}

/// Posts one `SpawnTick` per interval until the participant count drops to
/// zero or the server queue closes.
pub async fn run_spawn_loop(
    period: Duration,
    mut participants: watch::Receiver<usize>,
    tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        if *participants.borrow() == 0 {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if *participants.borrow() == 0 {
                    break;
                }
                if tx.send(ServerMessage::SpawnTick).is_err() {
                    break;
                }
            }
            changed = participants.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Pickup spawn loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GameConfig;
    use tokio::time::timeout;

    fn game() -> GameState {
        GameState::with_seed(GameConfig::default(), 11)
    }

    #[test]
    fn test_on_start_spawns_initial_batch() {
        let mut game = game();
        let lifecycle = Lifecycle::new(Duration::from_secs(2));

        assert_eq!(lifecycle.on_start(&mut game), 30);
        assert_eq!(game.active_pickups(), 30);
    }

    #[test]
    fn test_spawn_tick_without_participants_does_nothing() {
        let mut game = game();
        let lifecycle = Lifecycle::new(Duration::from_secs(2));

        assert_eq!(lifecycle.on_spawn_tick(&mut game), None);
        assert_eq!(game.active_pickups(), 0);
    }

    #[tokio::test]
    async fn test_spawn_tick_tops_up_to_capacity() {
        let mut game = game();
        let mut lifecycle = Lifecycle::new(Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        lifecycle.on_start(&mut game);
        lifecycle.on_join(&mut game, 1, 1, &tx);

        for _ in 0..20 {
            assert!(lifecycle.on_spawn_tick(&mut game).is_some());
        }

        assert_eq!(game.active_pickups(), 50);
        assert_eq!(lifecycle.on_spawn_tick(&mut game), None);
        lifecycle.shutdown(&mut game);
        assert_eq!(game.active_pickups(), 0);
    }

    #[tokio::test]
    async fn test_spawn_loop_exits_with_zero_participants() {
        let (participants, rx) = watch::channel(0usize);
        let (tx, mut messages) = mpsc::unbounded_channel();

        let finished = timeout(
            Duration::from_millis(500),
            run_spawn_loop(Duration::from_millis(10), rx, tx),
        )
        .await;

        assert!(finished.is_ok());
        assert!(messages.try_recv().is_err());
        drop(participants);
    }

    #[tokio::test]
    async fn test_spawn_loop_ticks_while_connected_and_stops_on_leave() {
        let mut game = game();
        let mut lifecycle = Lifecycle::new(Duration::from_millis(10));
        let (tx, mut messages) = mpsc::unbounded_channel();

        lifecycle.on_join(&mut game, 1, 1, &tx);
        assert!(lifecycle.is_spawning());

        for _ in 0..2 {
            let message = timeout(Duration::from_secs(1), messages.recv()).await;
            assert!(matches!(message, Ok(Some(ServerMessage::SpawnTick))));
        }

        lifecycle.on_leave(&mut game, 1, 0, &tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lifecycle.is_spawning());
        while messages.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(messages.try_recv().is_err());
    }
}

//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::game::GameState;
use crate::lifecycle::Lifecycle;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    timestamp_ms, ClientId, CoreError, GameConfig, Packet, DELTA_CHUNK, MAX_DATAGRAM,
    PROTOCOL_VERSION, SNAPSHOT_CHUNK,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Longest simulated step, so a stalled tick cannot teleport heads
const MAX_STEP: f32 = 0.05;

/// Messages sent from auxiliary tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ClientId },
    /// Posted by the pickup spawn loop once per interval
    SpawnTick,
    Shutdown,
}

/// Messages sent from the game loop to the network sender
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ClientId>,
    },
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    lifecycle: Lifecycle,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        config: GameConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let clients = ClientManager::new(config.max_clients, config.client_timeout);
        let lifecycle = Lifecycle::new(config.spawn_interval);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(clients)),
            game_state: GameState::new(config),
            lifecycle,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for posting messages to the main loop, such as `Shutdown`.
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ClientId>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet, exclude }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let sender = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };

        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A reconnect from the same address replaces the old session
                if let Some(existing_id) = sender {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.drop_client(existing_id).await;
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr)
                };

                let Some(client_id) = client_id else {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    );
                    return;
                };

                let connected = self.clients.read().await.len();
                let head = self.lifecycle.on_join(
                    &mut self.game_state,
                    client_id,
                    connected,
                    &self.server_tx,
                );
                self.clients.write().await.set_head(client_id, head);

                self.send_packet(Packet::Connected { client_id, head }, addr);
                self.send_snapshot(Some(addr));
            }

            Packet::Intent(intent) => {
                if let Some(client_id) = sender {
                    let mut clients = self.clients.write().await;
                    clients.add_intent(client_id, intent);
                }
            }

            Packet::NotificationAck { id } => {
                if let Some(client_id) = sender {
                    let mut clients = self.clients.write().await;
                    if !clients.acknowledge(client_id, id) {
                        debug!("Duplicate ack {} from client {}", id, client_id);
                    }
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = sender {
                    self.drop_client(client_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Forgets the client and tears down everything it owned.
    async fn drop_client(&mut self, client_id: ClientId) {
        let connected = {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
            clients.len()
        };
        self.handle_departure(client_id, connected);
    }

    fn handle_departure(&mut self, client_id: ClientId, connected: usize) {
        self.lifecycle
            .on_leave(&mut self.game_state, client_id, connected, &self.server_tx);
    }

    /// Applies buffered intents in arrival order
    async fn process_intents(&mut self) {
        let intents = {
            let mut clients = self.clients.write().await;
            clients.take_intents()
        };

        let mut unauthorized = 0;
        for (client_id, intent) in intents {
            match self.game_state.submit_intent(client_id, &intent) {
                Ok(()) => {}
                Err(CoreError::UnauthorizedIntent { entity, .. }) => {
                    unauthorized += 1;
                    debug!(
                        "Dropped intent {} from client {} for foreign entity {}",
                        intent.sequence, client_id, entity
                    );
                }
                Err(e) => debug!("Dropped intent from client {}: {}", client_id, e),
            }
        }

        if unauthorized > 0 {
            let mut clients = self.clients.write().await;
            for _ in 0..unauthorized {
                clients.record_unauthorized();
            }
        }
    }

    /// Queues every entity as one or more snapshot datagrams, to one address
    /// or to everyone.
    fn send_snapshot(&self, addr: Option<SocketAddr>) {
        let entities = self.game_state.snapshot();
        let timestamp = timestamp_ms();
        let chunks: Vec<_> = entities.chunks(SNAPSHOT_CHUNK).collect();
        let parts = chunks.len().max(1) as u16;

        for part in 0..parts {
            let entities = chunks
                .get(part as usize)
                .map(|chunk| chunk.to_vec())
                .unwrap_or_default();
            let packet = Packet::Snapshot {
                tick: self.game_state.tick,
                timestamp,
                part,
                parts,
                entities,
            };
            match addr {
                Some(addr) => self.send_packet(packet, addr),
                None => self.broadcast_packet(packet, None),
            }
        }
    }

    /// Fans out this tick's replication events in commit order.
    fn broadcast_replication(&mut self) {
        let events = self.game_state.drain_replication();
        for chunk in events.chunks(DELTA_CHUNK) {
            self.broadcast_packet(
                Packet::Delta {
                    tick: self.game_state.tick,
                    events: chunk.to_vec(),
                },
                None,
            );
        }
    }

    /// Unicasts new notifications and re-sends unacknowledged ones. Always
    /// queued after the tick's deltas.
    async fn deliver_notifications(&mut self) {
        let fresh = self.game_state.drain_notifications();
        let resend_after = self.game_state.config().notification_resend;

        let outgoing = {
            let mut clients = self.clients.write().await;
            let mut outgoing = clients.due_resends(resend_after);
            for notification in fresh {
                match clients.track_notification(notification) {
                    Some(addr) => outgoing.push((addr, notification)),
                    None => debug!(
                        "Recipient {} of notification {} is gone",
                        notification.recipient, notification.id
                    ),
                }
            }
            outgoing
        };

        for (addr, notification) in outgoing {
            self.send_packet(Packet::Notify(notification), addr);
        }
    }

    async fn run_tick(&mut self, dt: f32) {
        self.process_intents().await;

        let outcomes = self.game_state.step(dt);
        if !outcomes.is_empty() {
            debug!("Tick {}: {:?}", self.game_state.tick, outcomes);
        }
        self.game_state.tick += 1;

        let connected = self.clients.read().await.len();
        if connected == 0 {
            // Nobody to replicate to; joiners get a snapshot
            self.game_state.drain_replication();
            return;
        }

        self.broadcast_replication();
        let snapshot_every = self.game_state.config().snapshot_interval_ticks;
        if self.game_state.tick % snapshot_every == 0 {
            self.send_snapshot(None);
        }
        self.deliver_notifications().await;

        if self.game_state.tick % 60 == 0 {
            let diagnostics = self.clients.read().await.diagnostics();
            let stats = self.game_state.resolver_stats();
            debug!(
                "Tick {}: {} clients, {} pickups, {:?}, {:?}",
                self.game_state.tick,
                connected,
                self.game_state.active_pickups(),
                diagnostics,
                stats
            );
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        self.lifecycle.on_start(&mut self.game_state);

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            let connected = self.clients.read().await.len();
                            self.handle_departure(client_id, connected);
                        },
                        Some(ServerMessage::SpawnTick) => {
                            self.lifecycle.on_spawn_tick(&mut self.game_state);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32().min(MAX_STEP);
                    last_tick = now;

                    self.run_tick(dt).await;
                },
            }
        }

        self.lifecycle.shutdown(&mut self.game_state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{EntityId, Intent, Vec2};
    use std::net::{IpAddr, Ipv4Addr};

    async fn test_server() -> Server {
        Server::new("127.0.0.1:0", Duration::from_millis(16), GameConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_server_message_creation() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: Packet::Connect { client_version: 1 },
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Connect { client_version: 1 });
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = GameConfig {
            move_speed: 0.0,
            ..GameConfig::default()
        };

        let result = Server::new("127.0.0.1:0", Duration::from_millis(16), config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_creates_head_and_queues_snapshot() {
        let mut server = test_server().await;
        let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();

        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, addr)
            .await;

        let client_id = server.clients.read().await.find_client_by_addr(addr).unwrap();
        let head = server.game_state.head_of(client_id).unwrap();
        assert_eq!(server.clients.read().await.get(client_id).unwrap().head, Some(head));
        assert!(server.lifecycle.is_spawning());

        match server.game_rx.try_recv() {
            Ok(GameMessage::SendPacket { packet, addr: a }) => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Connected { client_id, head });
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert!(matches!(
            server.game_rx.try_recv(),
            Ok(GameMessage::SendPacket {
                packet: Packet::Snapshot { part: 0, .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let mut server = test_server().await;
        let addr: SocketAddr = "127.0.0.1:9101".parse().unwrap();

        server
            .handle_packet(Packet::Connect { client_version: 99 }, addr)
            .await;

        assert!(server.clients.read().await.is_empty());
        assert!(matches!(
            server.game_rx.try_recv(),
            Ok(GameMessage::SendPacket {
                packet: Packet::Disconnected { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_foreign_intent_counted_as_unauthorized() {
        let mut server = test_server().await;
        let a: SocketAddr = "127.0.0.1:9102".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9103".parse().unwrap();
        server.handle_packet(Packet::Connect { client_version: 1 }, a).await;
        server.handle_packet(Packet::Connect { client_version: 1 }, b).await;
        let a_id = server.clients.read().await.find_client_by_addr(a).unwrap();
        let a_head = server.game_state.head_of(a_id).unwrap();
        let before = *server
            .game_state
            .store()
            .head(a_head)
            .unwrap()
            .target
            .get();

        let forged = Intent {
            sequence: 1,
            timestamp: 0,
            head: a_head,
            target: Vec2::new(1.0, 1.0),
        };
        server.handle_packet(Packet::Intent(forged), b).await;
        server.process_intents().await;

        assert_eq!(server.clients.read().await.diagnostics().unauthorized, 1);
        let after = *server.game_state.store().head(a_head).unwrap().target.get();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_disconnect_removes_head() {
        let mut server = test_server().await;
        let addr: SocketAddr = "127.0.0.1:9104".parse().unwrap();
        server
            .handle_packet(Packet::Connect { client_version: 1 }, addr)
            .await;
        let client_id = server.clients.read().await.find_client_by_addr(addr).unwrap();

        server.handle_packet(Packet::Disconnect, addr).await;

        assert!(server.clients.read().await.is_empty());
        assert_eq!(server.game_state.head_of(client_id), None);
        assert_eq!(server.lifecycle.participants(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_split_into_parts() {
        let mut server = test_server().await;

        server.send_snapshot(None);

        let mut parts = Vec::new();
        while let Ok(GameMessage::BroadcastPacket { packet, .. }) = server.game_rx.try_recv() {
            if let Packet::Snapshot { part, parts: total, entities, .. } = packet {
                assert!(entities.len() <= SNAPSHOT_CHUNK);
                parts.push((part, total));
            }
        }
        // 50 pooled pickups fit in one part
        assert_eq!(parts, vec![(0, 1)]);
        assert_eq!(EntityId(1), server.game_state.snapshot()[0].id);
    }
}

use crate::game::{ReplicaEvent, ReplicaWorld};
use crate::steering::SteeringController;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{GameConfig, NotificationKind, Packet, MAX_DATAGRAM, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Headless participant that mirrors the arena and steers its own head.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,

    world: ReplicaWorld,
    steering: SteeringController,
    interpolation_rate: f32,

    fake_ping_ms: u64,
    run_for: Option<Duration>,
    eliminated: bool,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        run_for: Option<Duration>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;
        let config = GameConfig::default();

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            world: ReplicaWorld::new(),
            steering: SteeringController::new(config.bounds),
            interpolation_rate: config.interpolation_rate,
            fake_ping_ms,
            run_for,
            eliminated: false,
        })
    }

    pub fn world(&self) -> &ReplicaWorld {
        &self.world
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { client_id, head } => {
                info!("Connected! Client ID: {}, head {}", client_id, head);
                self.world.set_identity(client_id, head);
                self.connected = true;
            }

            Packet::Snapshot {
                tick,
                part,
                parts,
                entities,
                ..
            } => {
                self.world.apply_snapshot(tick, part, parts, entities);
            }

            Packet::Delta { tick, events } => {
                self.world.apply_delta(tick, events);
            }

            Packet::Notify(notification) => {
                if !self.world.receive_notification(notification) {
                    debug!("Duplicate notification {}", notification.id);
                }
                let ack = Packet::NotificationAck {
                    id: notification.id,
                };
                if let Err(e) = self.send_packet(&ack).await {
                    error!("Error acknowledging notification: {}", e);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.world.client_id = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    async fn send_intent(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }

        if let Some(intent) = self.steering.update(&self.world) {
            self.send_packet(&Packet::Intent(intent)).await?;
        }

        Ok(())
    }

    fn process_events(&mut self) {
        for event in self.world.drain_events() {
            match event {
                ReplicaEvent::Spawned { id, kind } => {
                    debug!("{} spawned {}", kind.name(), id);
                }
                ReplicaEvent::Changed {
                    id,
                    previous,
                    current,
                } => {
                    debug!("{} changed {:?} -> {:?}", id, previous, current);
                }
                ReplicaEvent::Despawned { id } => {
                    debug!("{} despawned", id);
                }
                ReplicaEvent::Notified(notification) => match notification.kind {
                    NotificationKind::AteOpponent => {
                        info!("Ate {}", notification.loser);
                    }
                    NotificationKind::Eliminated => {
                        info!("Eliminated by {}", notification.winner);
                        self.eliminated = true;
                    }
                },
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let started = Instant::now();
        let mut intent_interval = interval(Duration::from_millis(33));
        let mut frame_interval = interval(Duration::from_millis(16));
        let mut last_frame = Instant::now();

        let mut buffer = vec![0u8; MAX_DATAGRAM];

        while !self.eliminated {
            if let Some(limit) = self.run_for {
                if started.elapsed() >= limit {
                    info!("Run time elapsed");
                    break;
                }
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => self.handle_packet(packet).await,
                                Err(e) => warn!("Failed to decode packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = intent_interval.tick() => {
                    if let Err(e) = self.send_intent().await {
                        error!("Error sending intent: {}", e);
                    }
                },

                _ = frame_interval.tick() => {
                    let dt = last_frame.elapsed().as_secs_f32();
                    last_frame = Instant::now();
                    self.world.interpolate(dt, self.interpolation_rate);
                    self.process_events();
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        info!(
            "Client stopped after {:?} with {} mirrored entities",
            started.elapsed(),
            self.world.len()
        );

        Ok(())
    }
}
